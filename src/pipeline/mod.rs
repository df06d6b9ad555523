//! Message normalization pipeline.
//!
//! Every fetched message flows through:
//! 1. `walker::extract_content()`: MIME tree → HTML body + attachments
//!    (with `header` and `charset` decoding along the way)
//! 2. `html::normalize_html()`: markup stripped, reply tail cut, links restored
//! 3. `assembler::assemble()`: header block + positional chunks
//! 4. `MessageProcessor::process()`: ordered delivery to the channel client

pub mod assembler;
pub mod charset;
pub mod header;
pub mod html;
pub mod processor;
pub mod types;
pub mod walker;

pub use processor::{MessageProcessor, normalize};
pub use types::{AttachmentBlob, AttachmentKind, DeliveryReport, NormalizedMessage, RawMessage};
