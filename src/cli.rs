use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::SurfacerConfig;
use crate::error::StatusError;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9313";

#[derive(Parser, Debug)]
#[command(name = "probe-status")]
#[command(version)]
#[command(about = "Serves a dashboard of windowed probe success ratios")]
pub struct Args {
    /// TOML file with surfacer settings
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address the dashboard server binds to
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Newline-delimited JSON events to ingest; "-" reads stdin
    #[arg(long, short)]
    pub input: Option<String>,

    /// Override the dashboard URL path from the config file
    #[arg(long)]
    pub url: Option<String>,

    /// Log filter used when RUST_LOG is unset (e.g. "info", "probe_status=debug")
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied, validated.
    pub fn load_config(&self) -> Result<SurfacerConfig, StatusError> {
        let mut cfg = match &self.config {
            Some(path) => SurfacerConfig::load(path)?,
            None => SurfacerConfig::default(),
        };
        if let Some(url) = &self.url {
            cfg.url = url.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// True when events should be read from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.input.as_deref() == Some("-")
    }
}
