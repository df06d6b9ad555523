//! Message assembly: header block, escaping and positional chunking.

use super::types::{AttachmentBlob, NormalizedMessage};

/// Longest text a single outbound chunk may carry, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// A formatted message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Full formatted text.
    pub text: String,
    /// Consecutive slices of `text`; concatenated in order they equal `text`.
    pub chunks: Vec<String>,
    /// Attachments in traversal order, sent after every chunk.
    pub attachments: Vec<AttachmentBlob>,
}

/// Build the outbound message for one normalized mail.
pub fn assemble(message: NormalizedMessage) -> OutboundMessage {
    let text = format_message(&message.sender, &message.subject, &message.body);
    let chunks = split_into_chunks(&text, MAX_MESSAGE_LENGTH);
    OutboundMessage {
        text,
        chunks,
        attachments: message.attachments,
    }
}

/// Fill the header template. Sender and subject are escaped; the body already
/// carries anchor markup and goes in as is.
pub fn format_message(sender: &str, subject: &str, body: &str) -> String {
    format!(
        "<b>New email received</b>\n\n<b>From:</b> {}\n<b>Subject:</b> {}\n\n<b>Content:</b>\n{}",
        escape_html(sender),
        escape_html(subject),
        body
    )
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Cut `text` into consecutive pieces of `max_chars` characters; the last one
/// may be shorter. Text that fits yields exactly one chunk, even when empty.
///
/// Cuts are positional and can land inside a tag.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(text[start..idx].to_string());
            start = idx;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() || chunks.is_empty() {
        chunks.push(text[start..].to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_layout() {
        let text = format_message("a@b.c", "Hi", "Hello");
        assert_eq!(
            text,
            "<b>New email received</b>\n\n<b>From:</b> a@b.c\n<b>Subject:</b> Hi\n\n<b>Content:</b>\nHello"
        );
    }

    #[test]
    fn sender_and_subject_escaped_body_not() {
        let text = format_message(
            "Ivan <ivan@example.com>",
            "R&D \"plans\" 'q'",
            r#"<a href="http://x">click</a>"#,
        );
        assert!(text.contains("<b>From:</b> Ivan &lt;ivan@example.com&gt;\n"));
        assert!(text.contains("<b>Subject:</b> R&amp;D &quot;plans&quot; &#x27;q&#x27;\n"));
        assert!(text.ends_with(r#"<a href="http://x">click</a>"#));
    }

    #[test]
    fn short_message_single_chunk() {
        let chunks = split_into_chunks("Hello", MAX_MESSAGE_LENGTH);
        assert_eq!(chunks, vec!["Hello".to_string()]);
    }

    #[test]
    fn exact_limit_single_chunk() {
        let text = "x".repeat(MAX_MESSAGE_LENGTH);
        let chunks = split_into_chunks(&text, MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn long_message_reconstructs() {
        let text = "abcdefghij".repeat(1000);
        let chunks = split_into_chunks(&text, MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), MAX_MESSAGE_LENGTH);
        assert_eq!(chunks[1].chars().count(), MAX_MESSAGE_LENGTH);
        assert_eq!(chunks[2].chars().count(), 10_000 - 2 * MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_counted_as_characters() {
        let text = "ж".repeat(5);
        let chunks = split_into_chunks(&text, 2);
        assert_eq!(chunks, vec!["жж", "жж", "ж"]);
    }

    #[test]
    fn empty_text_one_empty_chunk() {
        assert_eq!(split_into_chunks("", 10), vec![String::new()]);
    }

    #[test]
    fn assemble_single_part_hello() {
        let out = assemble(NormalizedMessage {
            sender: "me@example.com".into(),
            subject: "Greeting".into(),
            body: "Hello".into(),
            attachments: vec![],
        });
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0], out.text);
        assert!(out.text.ends_with("<b>Content:</b>\nHello"));
        assert!(out.attachments.is_empty());
    }

    #[test]
    fn assemble_keeps_attachment_order() {
        let out = assemble(NormalizedMessage {
            sender: String::new(),
            subject: String::new(),
            body: String::new(),
            attachments: vec![
                AttachmentBlob::new(vec![1], "b.pdf"),
                AttachmentBlob::new(vec![2], "a.png"),
            ],
        });
        let names: Vec<&str> = out.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, ["b.pdf", "a.png"]);
    }
}
