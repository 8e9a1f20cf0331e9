use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "airlink-sidecar",
    version,
    about = "Polls AirLink air-quality sensors and serves AQI-derived observations"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the poller and the HTTP dispatch surface (default).
    Serve,
    /// Poll a single device every 5 seconds and print what would be published.
    Probe {
        #[arg(long)]
        hostname: String,
        #[arg(long, default_value_t = 80)]
        port: u16,
        /// Request timeout in seconds.
        #[arg(long, default_value_t = 2)]
        timeout: u64,
    },
}
