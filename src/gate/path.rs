use std::borrow::Cow;
use std::fmt;

/// Percent-decodes a request path. Invalid UTF-8 sequences are replaced so
/// that an encoded path can never dodge a rule by failing to decode.
pub fn decode(path: &str) -> Cow<'_, str> {
    if !path.contains('%') {
        return Cow::Borrowed(path);
    }
    let bytes = urlencoding::decode_binary(path.as_bytes());
    Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())
}

/// Lexically cleans a path: duplicate slashes are collapsed, `.` segments
/// dropped and `..` segments resolved. The result is always rooted and has no
/// trailing slash unless it is `/` itself.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return String::from("/");
    }

    let mut cleaned = String::with_capacity(path.len());
    for segment in segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    cleaned
}

/// A rule path, normalized once when the rule is built.
///
/// Matching happens on segment boundaries: `/admin` covers `/admin` and
/// `/admin/users` but not `/administrator`. A pattern with a trailing slash
/// only covers what is strictly below it. `/` covers everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    base: String,
    below_only: bool,
}

impl Pattern {
    pub fn new(raw: &str) -> Self {
        Self {
            base: normalize(raw),
            below_only: raw.len() > 1 && raw.ends_with('/'),
        }
    }

    /// Reports whether the normalized `path` is this pattern or lies below it.
    pub fn matches(&self, path: &str) -> bool {
        if self.base == "/" {
            return true;
        }

        let Some(rest) = path.strip_prefix(self.base.as_str()) else {
            return false;
        };
        if rest.is_empty() {
            return !self.below_only;
        }
        rest.starts_with('/')
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.below_only {
            write!(f, "{}/", self.base)
        } else {
            write!(f, "{}", self.base)
        }
    }
}
