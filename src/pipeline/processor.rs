//! Message processor: normalizes one raw message and delivers it.
//!
//! Flow:
//! 1. Parse MIME, decode `From` and `Subject`
//! 2. MIME walk → HTML body + attachments
//! 3. HTML normalization
//! 4. Assembly → chunks
//! 5. Delivery: every chunk in order, then every attachment in traversal order
//!
//! Decode and part-extraction failures are logged and recovered in place. Only
//! a failed text send aborts the message, and it is reported as a transport
//! error so the poll loop can end the cycle.

use std::sync::Arc;

use mail_parser::{HeaderName, Message, MessageParser};
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};
use uuid::Uuid;

use crate::channels::ChannelClient;
use crate::error::PipelineError;
use crate::pipeline::assembler::{OutboundMessage, assemble};
use crate::pipeline::header::decode_mime_header;
use crate::pipeline::html::normalize_html;
use crate::pipeline::types::{DeliveryReport, NormalizedMessage, RawMessage};
use crate::pipeline::walker::extract_content;

/// Normalizes raw mail and hands the result to a channel client.
///
/// Log output is scoped under the span passed to [`MessageProcessor::new`].
pub struct MessageProcessor {
    channel: Arc<dyn ChannelClient>,
    span: Span,
}

impl MessageProcessor {
    pub fn new(channel: Arc<dyn ChannelClient>, span: Span) -> Self {
        Self { channel, span }
    }

    /// Normalize and deliver one message.
    ///
    /// The per-message span records sender and subject as soon as they are
    /// decoded, so every later failure is logged with them.
    pub async fn process(&self, raw: &RawMessage) -> Result<DeliveryReport, PipelineError> {
        let (span, outbound) = {
            let message = parse(raw)?;
            let message_id = message
                .message_id()
                .map(str::to_string)
                .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));
            let span = info_span!(
                parent: &self.span,
                "message",
                id = %message_id,
                sender = field::Empty,
                subject = field::Empty
            );

            let normalized = span.in_scope(|| {
                let (sender, subject) = decode_headers(&message);
                span.record("sender", field::display(&sender));
                span.record("subject", field::display(&subject));
                normalize_body(&message, sender, subject)
            });
            info!(
                parent: &span,
                attachments = normalized.attachments.len(),
                "Relaying message"
            );
            (span, assemble(normalized))
        };

        let result = self.deliver(outbound).instrument(span.clone()).await;
        if let Err(e) = &result {
            error!(parent: &span, error = %e, "Failed to deliver message");
        }
        result
    }

    /// Process messages in order. A transport failure stops the batch and is
    /// returned; any other failure only skips its message.
    pub async fn process_batch(
        &self,
        messages: Vec<RawMessage>,
    ) -> Result<Vec<DeliveryReport>, PipelineError> {
        let count = messages.len();
        let mut reports = Vec::with_capacity(count);

        for raw in &messages {
            match self.process(raw).await {
                Ok(report) => reports.push(report),
                Err(e) if e.is_transport() => {
                    error!(
                        parent: &self.span,
                        error = %e,
                        delivered = reports.len(),
                        total = count,
                        "Transport failure; abandoning the rest of this cycle"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(parent: &self.span, error = %e, "Skipping message");
                }
            }
        }

        debug!(
            parent: &self.span,
            delivered = reports.len(),
            total = count,
            "Batch complete"
        );
        Ok(reports)
    }

    /// Text first, then attachments. A failed attachment is logged and the
    /// rest still go out.
    async fn deliver(&self, outbound: OutboundMessage) -> Result<DeliveryReport, PipelineError> {
        let mut report = DeliveryReport::default();

        for chunk in &outbound.chunks {
            self.channel.send_text(chunk).await?;
            report.chunks_sent += 1;
        }

        for blob in outbound.attachments {
            let kind = blob.kind();
            let filename = blob.filename.clone();
            match self.channel.send_attachment(blob, kind).await {
                Ok(()) => report.attachments_sent += 1,
                Err(e) => {
                    warn!(
                        filename = %filename,
                        kind = kind.label(),
                        error = %e,
                        "Failed to send attachment"
                    );
                    report.attachments_failed += 1;
                }
            }
        }

        debug!(
            chunks = report.chunks_sent,
            attachments = report.attachments_sent,
            failed = report.attachments_failed,
            "Delivered"
        );
        Ok(report)
    }
}

/// Decode headers and normalize the body of a raw message, without delivery.
pub fn normalize(raw: &RawMessage) -> Result<NormalizedMessage, PipelineError> {
    let message = parse(raw)?;
    Ok(normalize_parsed(&message))
}

fn parse(raw: &RawMessage) -> Result<Message<'_>, PipelineError> {
    MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or(PipelineError::Unparseable { size: raw.len() })
}

fn normalize_parsed(message: &Message<'_>) -> NormalizedMessage {
    let (sender, subject) = decode_headers(message);
    normalize_body(message, sender, subject)
}

fn decode_headers(message: &Message<'_>) -> (String, String) {
    (
        decoded_header(message, HeaderName::From, "From"),
        decoded_header(message, HeaderName::Subject, "Subject"),
    )
}

fn normalize_body(message: &Message<'_>, sender: String, subject: String) -> NormalizedMessage {
    let content = extract_content(message);
    let body = normalize_html(&content.html_body);
    if body.is_empty() {
        debug!("Message has no body text");
    }

    NormalizedMessage {
        sender,
        subject,
        body,
        attachments: content.attachments,
    }
}

fn decoded_header<'x>(message: &Message<'x>, name: HeaderName<'x>, label: &str) -> String {
    decode_mime_header(message.header_raw(name)).unwrap_or_else(|e| {
        warn!(header = label, error = %e, "Header undecodable; using empty value");
        String::new()
    })
}
