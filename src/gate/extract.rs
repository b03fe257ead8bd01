use std::collections::BTreeMap;

use actix_web::HttpRequest;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::rule::Rule;

/// The credential material sent to an authorization endpoint.
///
/// Names are the ones configured on the rule; a name only appears when the
/// request carried a non-empty value for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub headers: BTreeMap<String, String>,
    pub queries: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub request: AuthRequest,
    /// Set when any required header, query or header-or-query alternative
    /// was absent.
    pub missing_required: bool,
}

/// Decoded query parameters of a request, in order of appearance.
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query_string: &str) -> Self {
        let pairs = form_urlencoded::parse(query_string.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self { pairs }
    }

    /// Value of the first occurrence of `name`, when it is not empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        let (_, value) = self.pairs.iter().find(|(key, _)| key == name)?;
        if value.is_empty() {
            return None;
        }
        Some(value)
    }
}

/// Value of header `name`, when it is present and not empty. Header names are
/// matched case-insensitively.
pub fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    let value = req.headers().get(name)?;
    if value.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
}

/// Collects the credentials `rule` asks for. Every field is inspected even
/// after a required one turned out to be missing.
pub fn extract(req: &HttpRequest, rule: &Rule) -> Extraction {
    let queries = QueryParams::parse(req.query_string());
    let mut request = AuthRequest::default();
    let mut missing_required = false;

    for name in rule.optional_headers.iter() {
        if let Some(value) = header_value(req, name) {
            request.headers.insert(name.clone(), value);
        }
    }
    for name in rule.optional_queries.iter() {
        if let Some(value) = queries.get(name) {
            request.queries.insert(name.clone(), value.to_string());
        }
    }

    for name in rule.headers.iter() {
        match header_value(req, name) {
            Some(value) => {
                request.headers.insert(name.clone(), value);
            }
            None => missing_required = true,
        }
    }
    for name in rule.queries.iter() {
        match queries.get(name) {
            Some(value) => {
                request.queries.insert(name.clone(), value.to_string());
            }
            None => missing_required = true,
        }
    }

    for pair in rule.header_or_query.iter() {
        if let Some(value) = header_value(req, &pair.header) {
            request.headers.insert(pair.header.clone(), value);
            continue;
        }
        match queries.get(&pair.query) {
            Some(value) => {
                request.queries.insert(pair.query.clone(), value.to_string());
            }
            None => missing_required = true,
        }
    }

    Extraction {
        request,
        missing_required,
    }
}
