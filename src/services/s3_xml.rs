//! Minimal helpers for the flat XML documents S3 exchanges.
//!
//! S3 responses are shallow and never use attributes on the elements we
//! read, so plain tag scanning is enough; documents are built with
//! `format!` and escaped through [`xml_escape`].

/// Escape XML special characters.
pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Reverse [`xml_escape`], including numeric character references.
pub fn xml_unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Inner text of every `<tag>...</tag>` element, in document order.
/// Self-closing `<tag/>` elements yield an empty string.
pub fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after_name = &rest[start + open.len()..];
        // Skip longer tag names that share the prefix, e.g. <Key> vs <KeyCount>.
        let Some(next) = after_name.chars().next() else {
            break;
        };
        if !matches!(next, '>' | '/' | ' ' | '\t' | '\r' | '\n') {
            rest = after_name;
            continue;
        }
        let Some(gt) = after_name.find('>') else {
            break;
        };
        if after_name[..gt].ends_with('/') {
            found.push("");
            rest = &after_name[gt + 1..];
            continue;
        }
        let body = &after_name[gt + 1..];
        let Some(end) = body.find(&close) else {
            break;
        };
        found.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    found
}

/// Unescaped text of the first `<tag>` element, if any.
pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    elements(xml, tag).first().map(|raw| xml_unescape(raw))
}
