use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shakeq::cli::Cli;
use shakeq::config::QueueConfig;
use shakeq::pidfile::PidFile;
use shakeq::queue::Queue;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = QueueConfig::load(&cli.config)?;
    if let Some(root) = cli.data_root {
        cfg.data_root = root;
    }
    if let Some(db) = cli.db {
        cfg.db = db;
    }

    // Held for the life of the loop; removed on all exits, including errors.
    let _guard = if cli.attached {
        None
    } else {
        Some(PidFile::acquire(cfg.data_root.join("shakeq.pid"))?)
    };

    Queue::new(cfg)?.run()
}
