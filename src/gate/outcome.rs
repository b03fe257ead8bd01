use actix_web::HttpRequest;

use crate::rule::Rule;

use super::delegate::{DelegationError, Grant};
use super::replace::Replacer;

/// Status used when a request is denied without an upstream status code.
pub const DEFAULT_DENY_STATUS: u16 = 401;

/// Endpoint statuses below this are not errors and are never answered to a
/// denied request.
const MIN_DENY_STATUS: u16 = 400;

/// The result of checking a request against the rule governing it.
#[derive(Debug)]
pub enum Verdict {
    /// A required credential was absent; no delegation took place.
    MissingFields,
    Delegated(Result<Grant, DelegationError>),
}

/// How a denied request is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Status code plus a `WWW-Authenticate` challenge.
    Status(u16),
    /// See-other redirect to an already substituted location.
    Redirect(String),
}

#[derive(Debug)]
pub enum Outcome {
    /// Forward the request with the granted headers set.
    Forward(Grant),
    /// The rule failed but lets evaluation move on to the next rule.
    Continue,
    Reject(Rejection),
}

pub fn resolve(rule: &Rule, req: &HttpRequest, verdict: Verdict) -> Outcome {
    let status = match verdict {
        Verdict::Delegated(Ok(grant)) => return Outcome::Forward(grant),
        Verdict::Delegated(Err(err)) => err.status(),
        Verdict::MissingFields => None,
    };

    if rule.passthrough {
        return Outcome::Continue;
    }

    let status = status
        .filter(|code| *code >= MIN_DENY_STATUS)
        .unwrap_or(DEFAULT_DENY_STATUS);
    Outcome::Reject(reject(rule, req, status))
}

fn reject(rule: &Rule, req: &HttpRequest, status: u16) -> Rejection {
    match rule.redirect.as_ref() {
        Some(template) => Rejection::Redirect(Replacer::new(req).replace(template)),
        None => Rejection::Status(status),
    }
}
