//! Telegram channel client: relays chunks and attachments through the Bot API.
//!
//! Text goes out with `parse_mode=HTML`. Positional chunking can cut an anchor
//! in half, which Telegram rejects, so a rejected chunk is re-sent once as
//! plain text.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::ChannelClient;
use crate::config::TelegramConfig;
use crate::error::ChannelError;
use crate::pipeline::types::{AttachmentBlob, AttachmentKind};

const CHANNEL_NAME: &str = "telegram";

/// Bot API client bound to one target chat.
pub struct TelegramClient {
    bot_token: SecretString,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Send a single chunk, HTML first with plain-text fallback.
    async fn send_message_chunk(&self, text: &str) -> Result<(), ChannelError> {
        let html_body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        let html_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&html_body)
            .send()
            .await
            .map_err(send_failed)?;

        if html_resp.status().is_success() {
            return Ok(());
        }

        let html_status = html_resp.status();
        let html_err = html_resp.text().await.unwrap_or_default();
        tracing::warn!(
            status = ?html_status,
            response = %html_err,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(send_failed)?;

        if !plain_resp.status().is_success() {
            let plain_status = plain_resp.status();
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!(
                    "sendMessage failed (html: {html_status}, plain: {plain_status} {plain_err})"
                ),
            });
        }

        Ok(())
    }

    /// Send a document from bytes (in-memory).
    pub async fn send_document_bytes(
        &self,
        file_bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<(), ChannelError> {
        self.send_file("sendDocument", "document", file_bytes, file_name)
            .await
    }

    /// Send a photo from bytes (in-memory).
    pub async fn send_photo_bytes(
        &self,
        file_bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<(), ChannelError> {
        self.send_file("sendPhoto", "photo", file_bytes, file_name)
            .await
    }

    async fn send_file(
        &self,
        method: &str,
        field: &'static str,
        file_bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<(), ChannelError> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .part(field, part);

        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(send_failed)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("{method} returned {status}: {err}"),
            });
        }

        tracing::info!(file_name, method, "Telegram attachment sent");
        Ok(())
    }
}

fn send_failed(e: reqwest::Error) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL_NAME.into(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl ChannelClient for TelegramClient {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send_text(&self, chunk: &str) -> Result<(), ChannelError> {
        self.send_message_chunk(chunk).await
    }

    async fn send_attachment(
        &self,
        blob: AttachmentBlob,
        kind: AttachmentKind,
    ) -> Result<(), ChannelError> {
        match kind {
            AttachmentKind::Image => self.send_photo_bytes(blob.bytes, &blob.filename).await,
            AttachmentKind::Document => {
                self.send_document_bytes(blob.bytes, &blob.filename).await
            }
        }
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
