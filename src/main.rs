use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use mail_relay::channels::{ChannelClient, ImapSession, TelegramClient, spawn_mail_poller};
use mail_relay::config::RelayConfig;
use mail_relay::pipeline::MessageProcessor;

const LOG_FILE_NAME: &str = "mail-relay.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = RelayConfig::from_env()?;
    setup_logging(config.log_dir.as_deref());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        imap = %config.imap.host,
        mailbox = %config.imap.mailbox,
        chat = %config.telegram.chat_id,
        interval_secs = config.check_interval.as_secs(),
        "Mail relay starting"
    );

    let channel = Arc::new(TelegramClient::new(&config.telegram));
    if let Err(e) = channel.health_check().await {
        tracing::warn!("Telegram health check failed: {e}");
    }

    let session = Arc::new(ImapSession::new(config.imap.clone()));
    let processor = Arc::new(MessageProcessor::new(
        channel,
        tracing::info_span!("relay"),
    ));

    let (mut handle, shutdown) = spawn_mail_poller(session, processor, config.check_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested; poller stops at its next tick (Ctrl-C again to force)");
    shutdown.store(true, Ordering::Relaxed);

    tokio::select! {
        _ = &mut handle => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Forced shutdown");
            handle.abort();
        }
    }

    Ok(())
}

/// Stderr logging, plus a plain log file when a directory is configured.
fn setup_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = log_dir
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(tracing_appender::rolling::never(dir, LOG_FILE_NAME))
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}
