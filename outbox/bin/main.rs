use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use outbox::config::{Args, Settings};
use outbox_delivery::{QueueProcessor, RunMode, Signal, SmtpMailer};
use outbox_spool::Maildir;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::resolve(Args::parse())?;

    let store = Maildir::new(&settings.queue_path);
    store.init().with_context(|| {
        format!(
            "failed to initialize queue at {}",
            settings.queue_path.display()
        )
    })?;

    let mut mailer =
        SmtpMailer::new(settings.hostname.clone(), settings.port).with_tls_policy(settings.tls);
    if let Some(credentials) = settings.credentials.clone() {
        mailer = mailer.with_credentials(credentials);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing the in-flight message first");
            let _ = shutdown_tx.send(Signal::Shutdown);
        }
    });

    info!(
        queue = %settings.queue_path.display(),
        relay = %format!("{}:{}", settings.hostname, settings.port),
        daemon = settings.daemon,
        "outbox starting"
    );

    let processor =
        QueueProcessor::new(store, Arc::new(mailer)).with_interval(settings.interval);
    let mode = if settings.daemon {
        RunMode::Daemon
    } else {
        RunMode::Once
    };
    processor.run(mode, shutdown_rx).await;

    Ok(())
}
