//! Collaborators at both ends of the pipeline: where mail comes from and
//! where the relayed text and attachments go.

pub mod imap;
pub mod poller;
pub mod telegram;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::pipeline::types::{AttachmentBlob, AttachmentKind, RawMessage};

pub use imap::ImapSession;
pub use poller::{poll_once, spawn_mail_poller};
pub use telegram::TelegramClient;

/// Source of unseen mail.
///
/// Owns connection lifecycle, search criteria and mark-as-read semantics.
#[async_trait]
pub trait MailSession: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetch every currently-unseen message, oldest first.
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, ChannelError>;
}

/// Outbound messaging channel.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one text chunk. Chunks may contain anchor markup.
    async fn send_text(&self, chunk: &str) -> Result<(), ChannelError>;

    /// Deliver one attachment on the image or document path.
    async fn send_attachment(
        &self,
        blob: AttachmentBlob,
        kind: AttachmentKind,
    ) -> Result<(), ChannelError>;

    /// Verify credentials and reachability.
    async fn health_check(&self) -> Result<(), ChannelError>;
}
