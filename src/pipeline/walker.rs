//! MIME walker: flattens a parsed message into classified parts and pulls out
//! the HTML body and attachments.
//!
//! Classification, first match wins:
//! 1. `text/html` with no Content-Disposition → HTML body (last one wins)
//! 2. Content-Disposition containing `attachment` → attachment (dropped without a filename)
//! 3. `image/*` with no Content-Disposition → inline image (`image.jpg` without a filename)
//! 4. anything else → ignored
//!
//! Single-part messages skip classification: the whole payload is the HTML
//! body, decoded as lossy UTF-8 with no meta-charset sniffing.

use base64::Engine;
use mail_parser::{HeaderName, Message, MessagePart, MimeHeaders, PartType};
use tracing::{debug, error, warn};

use crate::error::PartExtractionError;
use crate::pipeline::charset::decode_html_bytes;
use crate::pipeline::header::{BASE64_LENIENT, decode_mime_header, hex_pair};
use crate::pipeline::types::AttachmentBlob;

/// Nesting limit for `message/rfc822` and multipart descent.
const MAX_DEPTH: usize = 32;

/// Filename given to inline images that do not carry one.
pub const DEFAULT_INLINE_IMAGE_NAME: &str = "image.jpg";

// ── Parts ───────────────────────────────────────────────────────────

/// Content-Disposition of a part, as far as classification cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Header absent or empty.
    None,
    /// Header value contains `attachment` (case-sensitive, as transmitted).
    Attachment,
    /// Any other non-empty value (`inline`, `inline; filename=...`, ...).
    Inline,
}

impl Disposition {
    pub fn from_header(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::None,
            Some(value) if value.contains("attachment") => Self::Attachment,
            Some(_) => Self::Inline,
        }
    }
}

/// One node of the message part tree, flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Lowercase `type/subtype`.
    pub content_type: String,
    pub disposition: Disposition,
    /// Transfer-decoded payload bytes.
    pub payload: Vec<u8>,
    /// Filename as reported by the parser (Content-Disposition or Content-Type `name`).
    pub filename: Option<String>,
}

/// What the walker does with a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartRole {
    HtmlBody,
    Attachment,
    InlineImage,
    Ignored,
}

impl MimePart {
    pub fn role(&self) -> PartRole {
        let no_disposition = self.disposition == Disposition::None;
        if self.content_type == "text/html" && no_disposition {
            PartRole::HtmlBody
        } else if self.disposition == Disposition::Attachment {
            PartRole::Attachment
        } else if self.content_type.starts_with("image/") && no_disposition {
            PartRole::InlineImage
        } else {
            PartRole::Ignored
        }
    }

    /// Decoded filename, or `None` when absent, blank or undecodable.
    fn decoded_filename(&self) -> Result<Option<String>, PartExtractionError> {
        let decoded = decode_mime_header(self.filename.as_deref())?;
        Ok(Some(decoded).filter(|name| !name.is_empty()))
    }

    /// Turn an attachment part into a blob. Parts without a filename yield nothing.
    pub fn into_attachment(self) -> Result<AttachmentBlob, PartExtractionError> {
        match self.decoded_filename()? {
            Some(filename) => Ok(AttachmentBlob::new(self.payload, filename)),
            None => Err(PartExtractionError::MissingFilename {
                content_type: self.content_type,
            }),
        }
    }

    /// Turn an inline image into a blob, falling back to `image.jpg`.
    pub fn into_inline_image(self) -> AttachmentBlob {
        let filename = match self.decoded_filename() {
            Ok(Some(name)) => name,
            Ok(None) => DEFAULT_INLINE_IMAGE_NAME.to_string(),
            Err(e) => {
                warn!(error = %e, "Inline image filename undecodable; using default");
                DEFAULT_INLINE_IMAGE_NAME.to_string()
            }
        };
        AttachmentBlob::new(self.payload, filename)
    }
}

// ── Extraction ──────────────────────────────────────────────────────

/// HTML body and attachments pulled out of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub html_body: String,
    pub attachments: Vec<AttachmentBlob>,
}

/// Extract HTML body and attachments from a parsed message.
pub fn extract_content(message: &Message<'_>) -> ExtractedContent {
    if !is_multipart(message) {
        let payload = message
            .parts
            .first()
            .map(|root| part_payload(root, &message.raw_message))
            .unwrap_or_default();
        return ExtractedContent {
            html_body: String::from_utf8_lossy(&payload).into_owned(),
            attachments: Vec::new(),
        };
    }

    classify_parts(collect_parts(message))
}

/// Apply the classification rules to already-flattened parts, in order.
pub fn classify_parts(parts: Vec<MimePart>) -> ExtractedContent {
    let mut content = ExtractedContent::default();

    for part in parts {
        match part.role() {
            PartRole::HtmlBody => {
                content.html_body = decode_html_bytes(&part.payload).unwrap_or_else(|e| {
                    error!(error = %e, "Failed to decode HTML part; using empty body");
                    String::new()
                });
            }
            PartRole::Attachment => match part.into_attachment() {
                Ok(blob) => content.attachments.push(blob),
                Err(e) => debug!(error = %e, "Dropping attachment part"),
            },
            PartRole::InlineImage => content.attachments.push(part.into_inline_image()),
            PartRole::Ignored => {}
        }
    }

    content
}

/// Whether the message root is a multipart container.
pub fn is_multipart(message: &Message<'_>) -> bool {
    message
        .parts
        .first()
        .is_some_and(|root| matches!(root.body, PartType::Multipart(_)))
}

/// Flatten the part tree in depth-first pre-order, descending into
/// `message/rfc822` parts.
pub fn collect_parts(message: &Message<'_>) -> Vec<MimePart> {
    let mut parts = Vec::new();
    collect_from(message, 0, 0, &mut parts);
    parts
}

fn collect_from(message: &Message<'_>, part_id: usize, depth: usize, out: &mut Vec<MimePart>) {
    if depth > MAX_DEPTH {
        warn!(depth, "MIME nesting too deep; ignoring remaining parts");
        return;
    }
    let Some(part) = message.parts.get(part_id) else {
        return;
    };
    let raw: &[u8] = &message.raw_message;

    out.push(to_mime_part(part, raw));

    match &part.body {
        PartType::Multipart(children) => {
            for child in children {
                collect_from(message, *child as usize, depth + 1, out);
            }
        }
        PartType::Message(nested) => collect_from(nested, 0, depth + 1, out),
        _ => {}
    }
}

fn to_mime_part(part: &MessagePart<'_>, raw: &[u8]) -> MimePart {
    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "text/plain".to_string())
        .to_lowercase();

    let payload = match part.body {
        PartType::Multipart(_) => Vec::new(),
        _ => part_payload(part, raw),
    };

    MimePart {
        content_type,
        disposition: Disposition::from_header(raw_disposition(part, raw).as_deref()),
        payload,
        filename: part.attachment_name().map(str::to_string),
    }
}

/// Content-Disposition exactly as transmitted, so substring checks see the
/// original casing.
fn raw_disposition(part: &MessagePart<'_>, raw: &[u8]) -> Option<String> {
    let header = part
        .headers
        .iter()
        .find(|h| matches!(h.name, HeaderName::ContentDisposition))?;

    raw.get(header.offset_start as usize..header.offset_end as usize)
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .or_else(|| part.content_disposition().map(|d| d.ctype().to_string()))
}

/// Raw body bytes of a part with its Content-Transfer-Encoding undone.
fn part_payload(part: &MessagePart<'_>, raw: &[u8]) -> Vec<u8> {
    let body = raw
        .get(part.raw_body_offset() as usize..part.raw_end_offset() as usize)
        .unwrap_or_default();
    decode_transfer(part.content_transfer_encoding(), body)
}

/// Undo a Content-Transfer-Encoding. Unknown encodings pass through.
pub fn decode_transfer(encoding: Option<&str>, body: &[u8]) -> Vec<u8> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        Some("base64") => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64_LENIENT.decode(&compact).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid base64 payload; passing through undecoded");
                body.to_vec()
            })
        }
        Some("quoted-printable") => decode_quoted_printable(body),
        _ => body.to_vec(),
    }
}

/// Quoted-printable body decoding: `=XX` escapes and `=` soft line breaks.
/// Spaces and tabs between a soft-break `=` and the line end are padding.
fn decode_quoted_printable(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] != b'=' {
            out.push(body[i]);
            i += 1;
            continue;
        }
        let after = &body[i + 1..];
        let padding = after
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t'))
            .count();
        match &after[padding..] {
            [b'\r', b'\n', ..] => i += 1 + padding + 2,
            [b'\n', ..] => i += 1 + padding + 1,
            [hi, lo, ..] if padding == 0 => match hex_pair(*hi, *lo) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}
