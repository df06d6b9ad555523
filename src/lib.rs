//! Mail relay: forwards unseen mail to a Telegram chat as link-preserving
//! plain text plus attachments.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
