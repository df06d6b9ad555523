//! Header decoding: RFC 2047 encoded words (`=?charset?B|Q?text?=`) to plain text.
//!
//! A header value is split into segments, each either literal text or raw
//! bytes with an optional charset. Segments are decoded independently and
//! concatenated in order with no separator.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::error::DecodeError;

/// Standard alphabet, padding optional. Mailers routinely drop or mangle `=`.
pub(crate) const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// One piece of a header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSegment {
    /// Literal text between encoded words.
    Text(String),
    /// Payload of an encoded word. `charset: None` decodes as UTF-8.
    Bytes {
        bytes: Vec<u8>,
        charset: Option<String>,
    },
}

impl HeaderSegment {
    /// Decode one segment strictly. Malformed bytes are an error, not replaced.
    pub fn decode(&self) -> Result<String, DecodeError> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Bytes { bytes, charset } => {
                decode_strict(charset.as_deref().unwrap_or("utf-8"), bytes)
            }
        }
    }
}

/// Decode a possibly-absent header value. `None` yields an empty string.
pub fn decode_mime_header(value: Option<&str>) -> Result<String, DecodeError> {
    let Some(value) = value else {
        return Ok(String::new());
    };

    let mut decoded = String::with_capacity(value.len());
    for segment in split_segments(&unfold(value))? {
        decoded.push_str(&segment.decode()?);
    }
    Ok(decoded)
}

/// Join folded header lines and drop surrounding whitespace.
fn unfold(value: &str) -> String {
    value
        .split("\r\n")
        .flat_map(|l| l.split('\n'))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

/// Split a header value into literal and encoded-word segments.
///
/// Whitespace that only separates two adjacent encoded words is dropped.
/// Text that merely looks like the start of an encoded word stays literal.
pub fn split_segments(value: &str) -> Result<Vec<HeaderSegment>, DecodeError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut remaining = value;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        let Some((segment, consumed)) = parse_encoded_word(&remaining[start..])? else {
            literal.push_str(&remaining[..start + 2]);
            remaining = &remaining[start + 2..];
            last_was_encoded = false;
            continue;
        };

        if !(last_was_encoded && literal.is_empty() && before.trim().is_empty()) {
            literal.push_str(before);
        }
        if !literal.is_empty() {
            segments.push(HeaderSegment::Text(std::mem::take(&mut literal)));
        }
        segments.push(segment);
        remaining = &remaining[start + consumed..];
        last_was_encoded = true;
    }

    literal.push_str(remaining);
    if !literal.is_empty() {
        segments.push(HeaderSegment::Text(literal));
    }
    Ok(segments)
}

/// Parse an encoded word at the start of `s` (which begins with `=?`).
///
/// Returns `Ok(None)` when `s` is not shaped like an encoded word, and an error
/// when it is shaped like one but its payload cannot be decoded.
fn parse_encoded_word(s: &str) -> Result<Option<(HeaderSegment, usize)>, DecodeError> {
    let body = &s[2..];
    let Some(first_q) = body.find('?') else {
        return Ok(None);
    };
    let charset = &body[..first_q];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return Ok(None);
    }

    let rest = &body[first_q + 1..];
    let Some(second_q) = rest.find('?') else {
        return Ok(None);
    };
    let encoding = &rest[..second_q];

    let text_and_tail = &rest[second_q + 1..];
    let Some(end) = text_and_tail.find("?=") else {
        return Ok(None);
    };
    let encoded_text = &text_and_tail[..end];
    if encoded_text.contains(char::is_whitespace) {
        return Ok(None);
    }

    let bytes = match encoding {
        "B" | "b" => BASE64_LENIENT
            .decode(encoded_text)
            .map_err(|_| DecodeError::InvalidEncodedWord(encoded_text.to_string()))?,
        "Q" | "q" => decode_q(encoded_text),
        _ => return Ok(None),
    };

    // RFC 2231 language suffix: `utf-8*en`
    let charset = charset.split('*').next().unwrap_or(charset).to_string();
    let consumed = 2 + first_q + 1 + second_q + 1 + end + 2;
    Ok(Some((
        HeaderSegment::Bytes {
            bytes,
            charset: Some(charset),
        },
        consumed,
    )))
}

/// Q encoding: `_` is a space, `=XX` is a byte.
fn decode_q(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => match hex_pair(bytes[i + 1], bytes[i + 2]) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Decode two ASCII hex digits into a byte.
pub(crate) fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}

/// Decode bytes in a named charset without replacement characters.
fn decode_strict(charset: &str, bytes: &[u8]) -> Result<String, DecodeError> {
    let encoding = encoding_rs::Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| DecodeError::UnknownCharset(charset.to_string()))?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| DecodeError::Malformed {
            charset: encoding.name().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_header_is_empty() {
        assert_eq!(decode_mime_header(None).unwrap(), "");
    }

    #[test]
    fn plain_header_passthrough() {
        assert_eq!(
            decode_mime_header(Some("Quarterly report")).unwrap(),
            "Quarterly report"
        );
    }

    #[test]
    fn base64_utf8_word() {
        // "Привет"
        let decoded = decode_mime_header(Some("=?UTF-8?B?0J/RgNC40LLQtdGC?=")).unwrap();
        assert_eq!(decoded, "Привет");
    }

    #[test]
    fn q_encoded_latin1_word() {
        let decoded = decode_mime_header(Some("=?ISO-8859-1?Q?Caf=E9_cr=E8me?=")).unwrap();
        assert_eq!(decoded, "Café crème");
    }

    #[test]
    fn koi8r_word() {
        // "Тест" in KOI8-R
        let decoded = decode_mime_header(Some("=?koi8-r?B?9MXT1A==?=")).unwrap();
        assert_eq!(decoded, "Тест");
    }

    #[test]
    fn adjacent_words_join_without_whitespace() {
        let decoded =
            decode_mime_header(Some("=?UTF-8?Q?Hello?= =?UTF-8?Q?_world?=")).unwrap();
        assert_eq!(decoded, "Hello world");
    }

    #[test]
    fn mixed_literal_and_encoded() {
        let decoded = decode_mime_header(Some(
            "\"=?UTF-8?B?0JjQstCw0L0=?=\" <ivan@example.com>",
        ))
        .unwrap();
        assert_eq!(decoded, "\"Иван\" <ivan@example.com>");
    }

    #[test]
    fn literal_text_between_words_kept() {
        let decoded = decode_mime_header(Some("=?UTF-8?Q?a?= and =?UTF-8?Q?b?=")).unwrap();
        assert_eq!(decoded, "a and b");
    }

    #[test]
    fn folded_header_unfolded() {
        let decoded = decode_mime_header(Some(
            " =?UTF-8?Q?Long?=\r\n =?UTF-8?Q?_subject?=\r\n",
        ))
        .unwrap();
        assert_eq!(decoded, "Long subject");
    }

    #[test]
    fn lone_marker_stays_literal() {
        assert_eq!(decode_mime_header(Some("a =? b")).unwrap(), "a =? b");
    }

    #[test]
    fn unknown_charset_is_error() {
        let err = decode_mime_header(Some("=?x-klingon?Q?abc?=")).unwrap_err();
        assert_eq!(err, DecodeError::UnknownCharset("x-klingon".into()));
    }

    #[test]
    fn malformed_bytes_are_error() {
        let err = decode_mime_header(Some("=?UTF-8?Q?=FF=FE?=")).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn language_suffix_ignored() {
        assert_eq!(
            decode_mime_header(Some("=?UTF-8*en?Q?hi?=")).unwrap(),
            "hi"
        );
    }

    #[test]
    fn segments_keep_order() {
        let segments = split_segments("pre =?UTF-8?Q?x?= post").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], HeaderSegment::Text("pre ".into()));
        assert_eq!(
            segments[1],
            HeaderSegment::Bytes {
                bytes: b"x".to_vec(),
                charset: Some("UTF-8".into())
            }
        );
        assert_eq!(segments[2], HeaderSegment::Text(" post".into()));
    }

    #[test]
    fn bytes_without_charset_decode_as_utf8() {
        let seg = HeaderSegment::Bytes {
            bytes: "ü".as_bytes().to_vec(),
            charset: None,
        };
        assert_eq!(seg.decode().unwrap(), "ü");
    }
}
