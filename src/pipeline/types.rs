//! Shared types for the message normalization pipeline.

use std::fmt;

// ── Raw message ─────────────────────────────────────────────────────

/// One fetched mail item, exactly as the mail session returned it.
///
/// Immutable. Consumed by the pipeline once per poll cycle and then dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct RawMessage {
    bytes: Vec<u8>,
}

impl RawMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl From<Vec<u8>> for RawMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for RawMessage {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes())
    }
}

// ── Attachments ─────────────────────────────────────────────────────

/// Decoded attachment payload plus its decoded filename.
#[derive(Clone, PartialEq, Eq)]
pub struct AttachmentBlob {
    pub bytes: Vec<u8>,
    pub filename: String,
}

impl AttachmentBlob {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
        }
    }

    /// Delivery path, decided by filename extension only.
    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_filename(&self.filename)
    }
}

impl fmt::Debug for AttachmentBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentBlob")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// How the channel client should deliver an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
}

impl AttachmentKind {
    const IMAGE_EXTENSIONS: [&'static str; 3] = [".jpg", ".jpeg", ".png"];

    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if Self::IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            Self::Image
        } else {
            Self::Document
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
        }
    }
}

// ── Pipeline output ─────────────────────────────────────────────────

/// A message after decoding and HTML normalization, before assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Decoded `From` header; empty when absent or undecodable.
    pub sender: String,
    /// Decoded `Subject` header; empty when absent or undecodable.
    pub subject: String,
    /// Plain text with restored `<a href>` markup.
    pub body: String,
    /// Attachments in traversal order.
    pub attachments: Vec<AttachmentBlob>,
}

/// What was actually handed to the channel for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub chunks_sent: usize,
    pub attachments_sent: usize,
    pub attachments_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions_case_insensitive() {
        assert_eq!(AttachmentKind::from_filename("photo.JPG"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_filename("scan.jpeg"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_filename("logo.Png"), AttachmentKind::Image);
    }

    #[test]
    fn other_extensions_are_documents() {
        assert_eq!(AttachmentKind::from_filename("report.pdf"), AttachmentKind::Document);
        assert_eq!(AttachmentKind::from_filename("anim.gif"), AttachmentKind::Document);
        assert_eq!(AttachmentKind::from_filename("jpg"), AttachmentKind::Document);
        assert_eq!(AttachmentKind::from_filename(""), AttachmentKind::Document);
    }

    #[test]
    fn blob_kind_follows_filename() {
        let blob = AttachmentBlob::new(vec![1, 2, 3], "image.jpg");
        assert_eq!(blob.kind(), AttachmentKind::Image);
        assert_eq!(blob.kind().label(), "image");
    }

    #[test]
    fn raw_message_debug_hides_content() {
        let raw = RawMessage::from("Subject: secret\r\n\r\nbody");
        let dbg = format!("{raw:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("len"));
    }
}
