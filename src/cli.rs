//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::channel::{Endpoint, DEFAULT_PORT};

/// Connection parameters shared by every channel subcommand.
#[derive(Clone, Debug, Parser)]
pub struct ConnectOpts {
    /// Instance host (the IP or alias the pinned certificate was issued for)
    #[arg(long, env = "SKIFF_HOST")]
    pub host: String,

    /// Channel port on the instance
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SKIFF_PORT")]
    pub port: u16,

    /// Pinned server certificate (PEM)
    #[arg(long, env = "SKIFF_CERT")]
    pub cert: PathBuf,

    /// Authorization key sent with the upgrade request
    #[arg(long, env = "SKIFF_KEY", hide_env_values = true)]
    pub key: String,
}

impl ConnectOpts {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            cert: self.cert.clone(),
            key: self.key.clone(),
        }
    }
}
