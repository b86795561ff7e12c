//! Content-type matching.
//!
//! Matching is tolerant in the ways peers actually vary (case, parameters,
//! linear whitespace) and never fails: anything malformed is simply not
//! supported.

/// A parsed `type/subtype; name=value` content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub media_type: String,
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a content type, returning `None` when it is malformed.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let media_type = parts.next()?.trim();
        let (kind, subtype) = media_type.split_once('/')?;
        if !is_token(kind) || !is_token(subtype) {
            return None;
        }

        let mut parameters = Vec::new();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = part.split_once('=')?;
            let name = name.trim();
            if !is_token(name) {
                return None;
            }
            let value = value.trim();
            let value = match value.strip_prefix('"') {
                Some(quoted) => quoted.strip_suffix('"')?,
                None if is_token(value) => value,
                None => return None,
            };
            parameters.push((name.to_ascii_lowercase(), value.to_owned()));
        }

        Some(Self {
            media_type: media_type.to_ascii_lowercase(),
            parameters,
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
        })
}

/// Whether `content_type` names the encoder's `supported` content type.
///
/// Accepts, in order: an exact match; the supported type followed by `;`;
/// a case-insensitive match, optionally followed by CRLF and whitespace
/// before `;`; and finally a parse whose media type equals `media_type`
/// and whose charset, if any, satisfies `charset_supported`.
pub fn is_content_type_supported(
    content_type: &str,
    supported: &str,
    media_type: &str,
    charset_supported: impl Fn(&str) -> bool,
) -> bool {
    if content_type.is_empty() {
        return false;
    }

    if content_type == supported {
        return true;
    }
    if let Some(rest) = content_type.strip_prefix(supported) {
        if rest.starts_with(';') {
            return true;
        }
    }

    if content_type.len() >= supported.len()
        && content_type.is_char_boundary(supported.len())
        && content_type[..supported.len()].eq_ignore_ascii_case(supported)
    {
        let rest = &content_type[supported.len()..];
        if rest.is_empty() {
            return true;
        }
        let rest = rest.strip_prefix("\r\n").unwrap_or(rest);
        if rest.trim_start_matches([' ', '\t']).starts_with(';') {
            return true;
        }
    }

    let Some(parsed) = ContentType::parse(content_type) else {
        return false;
    };
    if !parsed.media_type.eq_ignore_ascii_case(media_type) {
        return false;
    }
    match parsed.charset() {
        Some(charset) => charset_supported(charset),
        None => true,
    }
}
