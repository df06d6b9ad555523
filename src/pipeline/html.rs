//! HTML normalizer: turns an HTML body into plain text that keeps its links.
//!
//! Steps, in order:
//! 1. tokenize the HTML
//! 2. collect anchors into a [`LinkMap`] (visible text → href)
//! 3. render plain text, with a newline at every block element boundary
//! 4. cut everything from the first case-insensitive `from:` (quoted reply)
//! 5. collapse runs of blank lines to a single blank line
//! 6. wrap every occurrence of each link text in `<a href="...">...</a>`
//!
//! Step 4 is a plain substring heuristic and will also cut a body that
//! legitimately says "from:". Step 6 replaces text in map order, so a link
//! text that is a substring of another link's markup can get wrapped twice.

use std::borrow::Cow;

/// Elements whose start and end both break the line.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "br", "caption", "center", "dd",
    "details", "dialog", "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol",
    "p", "pre", "section", "summary", "table", "tbody", "td", "tfoot", "th", "thead",
    "title", "tr", "ul",
];

/// Elements whose content is never rendered.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "template"];

/// Marker that starts a quoted reply.
const REPLY_MARKER: &[u8] = b"from:";

// ── Link map ────────────────────────────────────────────────────────

/// Visible link text → href. Keys are unique; a later anchor with the same
/// text replaces the earlier href but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMap {
    entries: Vec<(String, String)>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, text: impl Into<String>, href: impl Into<String>) {
        let text = text.into();
        let href = href.into();
        match self.entries.iter_mut().find(|(t, _)| *t == text) {
            Some(entry) => entry.1 = href,
            None => self.entries.push((text, href)),
        }
    }

    pub fn get(&self, text: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == text)
            .map(|(_, href)| href.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, h)| (t.as_str(), h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Full normalization: links kept, markup stripped, reply tail removed,
/// blank lines collapsed, surrounding whitespace trimmed.
pub fn normalize_html(html: &str) -> String {
    let tokens = tokenize(html);
    let links = extract_links(&tokens);

    let text = render_text(&tokens);
    let text = strip_quoted_reply(&text);
    let text = collapse_blank_lines(text);

    restore_links(text.trim(), &links)
}

/// Collect every anchor that has an `href`.
///
/// Key is the anchor's text with each text run trimmed; an anchor with no
/// visible text is keyed by its href.
pub fn extract_links(tokens: &[Token<'_>]) -> LinkMap {
    let mut links = LinkMap::new();
    let mut open: Option<(String, String)> = None;

    for token in tokens {
        match token {
            Token::Open { name, attrs, .. } if name == "a" => {
                if let Some((href, text)) = open.take() {
                    links.insert(link_key(text, &href), href);
                }
                open = attrs
                    .iter()
                    .find(|(k, _)| k == "href")
                    .map(|(_, href)| (href.clone(), String::new()));
            }
            Token::Close { name } if name == "a" => {
                if let Some((href, text)) = open.take() {
                    links.insert(link_key(text, &href), href);
                }
            }
            Token::Text(raw) => {
                if let Some((_, text)) = open.as_mut() {
                    text.push_str(decode_entities(raw).trim());
                }
            }
            _ => {}
        }
    }

    if let Some((href, text)) = open {
        links.insert(link_key(text, &href), href);
    }
    links
}

fn link_key(text: String, href: &str) -> String {
    if text.is_empty() { href.to_string() } else { text }
}

/// Plain-text rendering: text runs with entities decoded, a newline at each
/// block element boundary, nothing else.
pub fn render_text(tokens: &[Token<'_>]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(raw) => out.push_str(&decode_entities(raw)),
            Token::Open { name, .. } | Token::Close { name } if is_block(name) => out.push('\n'),
            _ => {}
        }
    }
    out
}

/// Drop everything from the first case-insensitive `from:` onward.
pub fn strip_quoted_reply(text: &str) -> &str {
    let position = text
        .as_bytes()
        .windows(REPLY_MARKER.len())
        .position(|w| w.eq_ignore_ascii_case(REPLY_MARKER));
    match position {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// Keep at most one blank line in any run of whitespace-only lines.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut kept = Vec::new();
    let mut blank_run = 0;

    for line in text.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                kept.push(line);
            }
        } else {
            blank_run = 0;
            kept.push(line);
        }
    }

    kept.join("\n")
}

/// Wrap every occurrence of each link text in anchor markup.
pub fn restore_links(text: &str, links: &LinkMap) -> String {
    let mut restored = text.to_string();
    for (link_text, href) in links.iter() {
        if link_text.is_empty() {
            continue;
        }
        restored = restored.replace(link_text, &format!("<a href=\"{href}\">{link_text}</a>"));
    }
    restored
}

// ── Tokenizer ───────────────────────────────────────────────────────

/// A lexical piece of an HTML document. Comments, doctypes and processing
/// instructions are dropped during tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Open {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        name: String,
    },
}

fn is_block(name: &str) -> bool {
    BLOCK_ELEMENTS.contains(&name)
}

/// Split HTML into text runs and tags. A `<` that does not start a tag is text.
pub fn tokenize(html: &str) -> Vec<Token<'_>> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut text_from = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        let after = &html[i + 1..];
        let (token, len) = if let Some(comment) = after.strip_prefix("!--") {
            let len = comment.find("-->").map_or(html.len() - i, |p| 4 + p + 3);
            (None, len)
        } else if after.starts_with('!') || after.starts_with('?') {
            let len = after.find('>').map_or(html.len() - i, |p| p + 2);
            (None, len)
        } else if let Some((tag, len)) = parse_tag(after) {
            (Some(tag), len + 1)
        } else {
            i += 1;
            continue;
        };

        if text_from < i {
            tokens.push(Token::Text(&html[text_from..i]));
        }
        i += len;

        if let Some(Token::Open { name, self_closing: false, .. }) = &token {
            if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                let closing = format!("</{name}");
                i += html[i..]
                    .to_ascii_lowercase()
                    .find(&closing)
                    .unwrap_or(html.len() - i);
            }
        }
        text_from = i;
        tokens.extend(token);
    }

    if text_from < html.len() {
        tokens.push(Token::Text(&html[text_from..]));
    }
    tokens
}

/// Parse a tag starting just after `<`. Returns the token and the number of
/// bytes consumed up to and including `>`.
fn parse_tag(s: &str) -> Option<(Token<'static>, usize)> {
    let (closing, body) = match s.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if !body.chars().next()?.is_ascii_alphabetic() {
        return None;
    }

    let end = find_tag_end(body)?;
    let inner = &body[..end];
    let name_len = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ':'))
        .unwrap_or(inner.len());
    let name = inner[..name_len].to_ascii_lowercase();
    let consumed = usize::from(closing) + end + 1;

    let token = if closing {
        Token::Close { name }
    } else {
        Token::Open {
            name,
            attrs: parse_attrs(&inner[name_len..]),
            self_closing: inner.trim_end().ends_with('/'),
        }
    };
    Some((token, consumed))
}

/// Index of the `>` that ends a tag, ignoring any inside quoted attribute values.
fn find_tag_end(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, c) in body.char_indices() {
        match (quote, c) {
            (None, '>') => return Some(idx),
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    body.find('>')
}

fn parse_attrs(mut s: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        s = s.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if s.is_empty() {
            break;
        }

        let name_end = s
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(s.len());
        let name = s[..name_end].to_ascii_lowercase();
        s = s[name_end..].trim_start();

        let mut value = String::new();
        if let Some(after_eq) = s.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (raw, rest) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let quoted = &after_eq[1..];
                    match quoted.find(q) {
                        Some(p) => (&quoted[..p], &quoted[p + 1..]),
                        None => (quoted, ""),
                    }
                }
                _ => {
                    let p = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                    (&after_eq[..p], &after_eq[p..])
                }
            };
            value = decode_entities(raw).into_owned();
            s = rest;
        }

        if !name.is_empty() {
            attrs.push((name, value));
        }
    }
    attrs
}

// ── Character references ────────────────────────────────────────────

/// Decode the common named references and all numeric ones. Unknown
/// references are left as written.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp + 1..];
        let decoded = candidate
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 10)
            .and_then(|semi| resolve_entity(&candidate[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
