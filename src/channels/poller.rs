//! Poll loop: fetches unseen mail on a fixed interval and relays it.
//!
//! The first cycle runs immediately. Messages within a cycle are relayed one
//! after another; a transport failure abandons the rest of the cycle and the
//! next tick starts fresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::channels::MailSession;
use crate::error::PipelineError;
use crate::pipeline::processor::MessageProcessor;

/// Spawn a background task that polls the mail session and relays new mail.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling
/// after the current cycle.
pub fn spawn_mail_poller(
    session: Arc<dyn MailSession>,
    processor: Arc<MessageProcessor>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Mail poller started: polling {} every {}s",
            session.name(),
            interval.as_secs()
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mail poller shutting down");
                return;
            }

            if let Err(e) = poll_once(session.as_ref(), &processor).await {
                error!("Mail poll cycle aborted: {e}");
            }
            // The next cycle starts a full interval after this one ends.
            tick.reset();
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle: fetch unseen → normalize and deliver each.
///
/// Returns how many messages were delivered.
pub async fn poll_once(
    session: &dyn MailSession,
    processor: &MessageProcessor,
) -> Result<usize, PipelineError> {
    let messages = session.fetch_unseen().await?;
    if messages.is_empty() {
        return Ok(0);
    }

    debug!("Fetched {} unseen messages", messages.len());
    let reports = processor.process_batch(messages).await?;
    Ok(reports.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tracing::Span;

    use super::*;
    use crate::channels::ChannelClient;
    use crate::error::ChannelError;
    use crate::pipeline::types::{AttachmentBlob, AttachmentKind, RawMessage};

    struct QueueSession {
        batches: Mutex<Vec<Result<Vec<RawMessage>, ChannelError>>>,
        calls: AtomicUsize,
    }

    impl QueueSession {
        fn new(batches: Vec<Result<Vec<RawMessage>, ChannelError>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MailSession for QueueSession {
        fn name(&self) -> &str {
            "queue"
        }

        async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                batches.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct CountingChannel {
        texts: AtomicUsize,
    }

    #[async_trait]
    impl ChannelClient for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send_text(&self, _chunk: &str) -> Result<(), ChannelError> {
            self.texts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_attachment(
            &self,
            _blob: AttachmentBlob,
            _kind: AttachmentKind,
        ) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn mail(subject: &str) -> RawMessage {
        RawMessage::from(format!("From: a@example.com\r\nSubject: {subject}\r\n\r\nbody").as_str())
    }

    #[tokio::test]
    async fn poll_once_delivers_every_message() {
        let session = QueueSession::new(vec![Ok(vec![mail("one"), mail("two")])]);
        let channel = Arc::new(CountingChannel::default());
        let processor = MessageProcessor::new(channel.clone(), Span::none());

        let delivered = poll_once(&session, &processor).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(channel.texts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_transport_error() {
        let session = QueueSession::new(vec![Err(ChannelError::Disconnected {
            name: "queue".into(),
            reason: "reset".into(),
        })]);
        let processor = MessageProcessor::new(Arc::new(CountingChannel::default()), Span::none());

        let err = poll_once(&session, &processor).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn unparseable_message_skipped() {
        let session = QueueSession::new(vec![Ok(vec![RawMessage::new(Vec::new()), mail("ok")])]);
        let channel = Arc::new(CountingChannel::default());
        let processor = MessageProcessor::new(channel.clone(), Span::none());

        let delivered = poll_once(&session, &processor).await.unwrap();
        assert_eq!(delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_runs_immediately_and_stops_on_flag() {
        let session = Arc::new(QueueSession::new(vec![Ok(vec![mail("first")])]));
        let channel = Arc::new(CountingChannel::default());
        let processor = Arc::new(MessageProcessor::new(channel.clone(), Span::none()));

        let (handle, shutdown) =
            spawn_mail_poller(session.clone(), processor, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.texts.load(Ordering::SeqCst), 1);

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.await.unwrap();
        assert_eq!(session.calls.load(Ordering::SeqCst), 1);
    }

    struct SlowSession {
        cycle: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MailSession for SlowSession {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.cycle).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_waits_full_interval_before_next() {
        let session = Arc::new(SlowSession {
            cycle: Duration::from_secs(90),
            calls: AtomicUsize::new(0),
        });
        let processor = Arc::new(MessageProcessor::new(
            Arc::new(CountingChannel::default()),
            Span::none(),
        ));

        let (handle, _shutdown) =
            spawn_mail_poller(session.clone(), processor, Duration::from_secs(60));

        // First cycle runs 0..90s; the next tick is due at 150s, not at 90s.
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(session.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(session.calls.load(Ordering::SeqCst), 2);

        handle.abort();
    }
}
