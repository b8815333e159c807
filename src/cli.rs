use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shakeq", version)]
#[command(
    about = "Event-dispatch daemon for the shake map pipeline",
    long_about = "shakeq listens for earthquake event triggers on a TCP socket, decides whether \
each event should be processed by the shake map generator, schedules magnitude-tiered repeat \
runs, and supervises the resulting child processes."
)]
#[command(after_long_help = "Examples:
  shakeq --config /etc/shakeq/queue.toml
  shakeq --config queue.toml --attached
  RUST_LOG=debug shakeq --config queue.toml --attached --data-root /tmp/shakeq")]
pub struct Cli {
    #[arg(long, value_name = "PATH", help = "Path to the queue TOML configuration")]
    pub config: PathBuf,

    #[arg(long, help = "Stay attached to the terminal (no PID-file guard)")]
    pub attached: bool,

    #[arg(long, value_name = "DIR", help = "Override the configured data root")]
    pub data_root: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Override the configured database path")]
    pub db: Option<PathBuf>,
}
