//! Charset resolution for HTML body parts.
//!
//! A `<meta http-equiv="Content-Type" content="text/html; charset=...">`
//! declaration inside the HTML wins over everything else; without one the
//! bytes are treated as UTF-8. Decoding always substitutes U+FFFD for invalid
//! sequences.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::DecodeError;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<meta\s+http-equiv="Content-Type"\s+content="text/html;\s*charset=([^"]+)""#,
    )
    .expect("meta charset pattern is valid")
});

/// Find the charset declared by a Content-Type meta tag, if any.
///
/// The bytes are scanned through a throwaway lossy UTF-8 view, which is enough
/// for the ASCII-only declaration.
pub fn sniff_meta_charset(html: &[u8]) -> Option<String> {
    let scan = String::from_utf8_lossy(html);
    META_CHARSET
        .captures(&scan)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|label| !label.is_empty())
}

/// Decode an HTML part with its declared charset, defaulting to UTF-8.
///
/// Invalid byte sequences never fail; only an unsupported charset name does.
pub fn decode_html_bytes(html: &[u8]) -> Result<String, DecodeError> {
    let label = sniff_meta_charset(html).unwrap_or_else(|| "utf-8".to_string());
    decode_lossy(&label, html)
}

/// Decode bytes in a named charset with replacement characters.
pub fn decode_lossy(label: &str, bytes: &[u8]) -> Result<String, DecodeError> {
    let encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| DecodeError::UnknownCharset(label.to_string()))?;
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        tracing::debug!(charset = encoding.name(), "Replaced invalid byte sequences in HTML body");
    }
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_meta_defaults_to_utf8() {
        let html = "<p>Grüße</p>".as_bytes();
        assert_eq!(sniff_meta_charset(html), None);
        assert_eq!(decode_html_bytes(html).unwrap(), "<p>Grüße</p>");
    }

    #[test]
    fn meta_charset_detected_case_insensitive() {
        let html = br#"<META HTTP-EQUIV="content-type" CONTENT="TEXT/HTML; CHARSET=windows-1251">"#;
        assert_eq!(sniff_meta_charset(html).as_deref(), Some("windows-1251"));
    }

    #[test]
    fn meta_charset_overrides_utf8() {
        let mut html =
            br#"<meta http-equiv="Content-Type" content="text/html; charset=windows-1251"><p>"#
                .to_vec();
        // "Привет" in windows-1251
        html.extend_from_slice(&[0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2]);
        html.extend_from_slice(b"</p>");
        let decoded = decode_html_bytes(&html).unwrap();
        assert!(decoded.ends_with("<p>Привет</p>"));
    }

    #[test]
    fn invalid_utf8_replaced_not_rejected() {
        let html = b"<p>ok \xFF\xFE end</p>";
        let decoded = decode_html_bytes(html).unwrap();
        assert_eq!(decoded, "<p>ok \u{FFFD}\u{FFFD} end</p>");
    }

    #[test]
    fn unknown_declared_charset_is_error() {
        let html = br#"<meta http-equiv="Content-Type" content="text/html; charset=x-made-up">"#;
        let err = decode_html_bytes(html).unwrap_err();
        assert_eq!(err, DecodeError::UnknownCharset("x-made-up".into()));
    }

    #[test]
    fn html5_meta_charset_not_recognised() {
        // Only the http-equiv form is honoured.
        let html = br#"<meta charset="koi8-r"><p>x</p>"#;
        assert_eq!(sniff_meta_charset(html), None);
    }
}
