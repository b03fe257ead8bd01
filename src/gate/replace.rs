use actix_web::HttpRequest;
use url::form_urlencoded;

use super::extract::{header_value, QueryParams};
use super::path;

/// Substitutes `{placeholder}` tokens in redirect templates with values taken
/// from the request being denied.
///
/// Supported placeholders: `{method}`, `{scheme}`, `{host}`, `{hostonly}`,
/// `{path}`, `{path_escaped}`, `{query}`, `{uri}`, `{uri_escaped}`,
/// `{remote}`, `{>Header-Name}` and `{?param}`. `{path}` is percent-decoded
/// while `{uri}` is kept as sent; the escaped variants form-urlencode them.
/// Unknown placeholders are kept as written.
pub struct Replacer<'a> {
    req: &'a HttpRequest,
}

impl<'a> Replacer<'a> {
    pub fn new(req: &'a HttpRequest) -> Self {
        Self { req }
    }

    pub fn replace(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let Some(end) = tail.find('}') else {
                out.push_str(tail);
                return out;
            };

            let key = &tail[1..end];
            match self.value(key) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&tail[..=end]),
            }
            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        out
    }

    fn value(&self, key: &str) -> Option<String> {
        if let Some(name) = key.strip_prefix('>') {
            return Some(header_value(self.req, name).unwrap_or_default());
        }
        if let Some(name) = key.strip_prefix('?') {
            let queries = QueryParams::parse(self.req.query_string());
            return Some(queries.get(name).unwrap_or_default().to_string());
        }

        let value = match key {
            "method" => self.req.method().as_str().to_string(),
            "scheme" => self.req.connection_info().scheme().to_string(),
            "host" => self.req.connection_info().host().to_string(),
            "hostonly" => host_only(self.req.connection_info().host()).to_string(),
            "path" => path::decode(self.req.path()).into_owned(),
            "path_escaped" => escape(&path::decode(self.req.path())),
            "query" => self.req.query_string().to_string(),
            "uri" => self.uri(),
            "uri_escaped" => escape(&self.uri()),
            "remote" => self
                .req
                .peer_addr()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }

    /// Path and query exactly as the client sent them.
    fn uri(&self) -> String {
        let query = self.req.query_string();
        if query.is_empty() {
            return self.req.path().to_string();
        }
        format!("{}?{}", self.req.path(), query)
    }
}

fn escape(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn host_only(host: &str) -> &str {
    if let Some(bracketed) = host.strip_prefix('[') {
        return match bracketed.find(']') {
            Some(end) => &bracketed[..end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
