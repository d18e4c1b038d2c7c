use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Cli {
    /// Address to listen on.
    #[clap(short = 'p', long, default_value = "127.0.0.1:9000")]
    pub bind: SocketAddr,

    /// Unix socket path; overrides the bind address.
    #[clap(short = 's', long)]
    pub socket: Option<PathBuf>,

    /// Path prefix the service is reachable under, e.g. `/paste`.
    #[clap(short = 'b', long, default_value = "")]
    pub base_path: String,

    /// Directory for the paste database.
    #[clap(long, default_value = "kleister.db")]
    pub store_path: PathBuf,

    /// Include error details in responses and enable debug logging.
    #[clap(short = 'd', long)]
    pub debug: bool,

    /// Minimum number of seconds between submissions per address.
    #[clap(short = 'r', long, default_value_t = 10)]
    pub rate_limit: u32,

    /// How many days an address probing for vulnerable paths stays banned.
    #[clap(short = 'x', long, default_value_t = 90)]
    pub ban_days: u32,
}
