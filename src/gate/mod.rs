pub mod delegate;
pub mod extract;
pub mod outcome;
pub mod path;
pub mod replace;

use std::sync::Arc;

use actix_web::http::Method;
use actix_web::HttpRequest;
use log::{debug, warn};

use crate::rule::Rule;

use delegate::{DelegationError, Delegator, Grant};
use outcome::{Outcome, Rejection, Verdict};

/// What to do with a request once the rules have been evaluated.
#[derive(Debug)]
pub enum Decision<'a> {
    /// No rule governed the request; forward it unchanged.
    Pass,
    /// `rule` authorized the request; forward it with `grant` set.
    Grant { rule: &'a Rule, grant: Grant },
    /// Answer the request directly.
    Reject(Rejection),
}

/// The rule engine. Holds the ordered rules and the delegator used to reach
/// authorization endpoints; both are shared read-only by all requests.
pub struct Gate {
    rules: Vec<Rule>,
    delegator: Arc<dyn Delegator>,
}

impl Gate {
    pub fn new(rules: Vec<Rule>, delegator: Arc<dyn Delegator>) -> Self {
        Self { rules, delegator }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Evaluates the rules in declaration order. The first rule that governs
    /// the request and does not pass through decides.
    pub async fn evaluate(&self, req: &HttpRequest) -> Decision<'_> {
        // Pre-flight requests are never protected.
        if req.method() == Method::OPTIONS {
            return Decision::Pass;
        }

        let path = path::normalize(&path::decode(req.path()));
        for (idx, rule) in self.rules.iter().enumerate() {
            if !Self::governs(rule, &path) {
                continue;
            }

            let verdict = self.check(rule, req).await;
            match outcome::resolve(rule, req, verdict) {
                Outcome::Forward(grant) => {
                    debug!(
                        "{} {} granted by rule #{idx} '{}'",
                        req.method(),
                        path,
                        rule.path
                    );
                    return Decision::Grant { rule, grant };
                }
                Outcome::Continue => {
                    debug!(
                        "{} {} failed rule #{idx} '{}', passing through",
                        req.method(),
                        path,
                        rule.path
                    );
                }
                Outcome::Reject(rejection) => {
                    debug!(
                        "{} {} rejected by rule #{idx} '{}': {:?}",
                        req.method(),
                        path,
                        rule.path,
                        rejection
                    );
                    return Decision::Reject(rejection);
                }
            }
        }

        Decision::Pass
    }

    fn governs(rule: &Rule, path: &str) -> bool {
        if !rule.pattern.matches(path) {
            return false;
        }
        if rule.except.iter().any(|excepted| excepted.matches(path)) {
            return false;
        }
        if rule.allow_root && path == "/" {
            return false;
        }
        true
    }

    async fn check(&self, rule: &Rule, req: &HttpRequest) -> Verdict {
        let extraction = extract::extract(req, rule);
        if extraction.missing_required {
            return Verdict::MissingFields;
        }

        let Some(endpoint) = rule.endpoint.as_ref() else {
            return Verdict::Delegated(Err(DelegationError::NoEndpoint));
        };

        let result = self
            .delegator
            .delegate(endpoint, &extraction.request)
            .await;
        if let Err(err) = result.as_ref() {
            warn!("Delegation to {endpoint} for rule '{}' failed: {err}", rule.path);
        }
        Verdict::Delegated(result)
    }
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use crate::rule::{HeaderOrQuery, RuleConfig};

    use super::delegate::mock::{MockAnswer, MockDelegator};
    use super::*;

    const ALLOW: &str = "http://auth.local/allow";
    const ALICE: &str = "http://auth.local/alice";
    const FORBID: &str = "http://auth.local/forbid";
    const GARBAGE: &str = "http://auth.local/garbage";

    fn mock() -> Arc<MockDelegator> {
        Arc::new(MockDelegator::new(vec![
            (ALLOW, MockAnswer::Grant(vec![])),
            (ALICE, MockAnswer::Grant(vec![("X-User", "alice")])),
            (FORBID, MockAnswer::Status(403)),
            (GARBAGE, MockAnswer::Garbage),
        ]))
    }

    fn rule(path: &str, endpoint: &str) -> RuleConfig {
        RuleConfig {
            path: path.to_string(),
            endpoint: Some(endpoint.to_string()),
            headers: vec!["Authorization".to_string()],
            ..Default::default()
        }
    }

    fn build_gate(rules: Vec<RuleConfig>, delegator: Arc<MockDelegator>) -> Gate {
        let rules = rules.into_iter().map(|cfg| cfg.build().unwrap()).collect();
        Gate::new(rules, delegator)
    }

    fn authorized(uri: &str) -> HttpRequest {
        TestRequest::with_uri(uri)
            .insert_header(("Authorization", "Bearer xyz"))
            .to_http_request()
    }

    #[actix_web::test]
    async fn test_no_rule() {
        let delegator = mock();
        let gate = build_gate(vec![rule("/admin", ALLOW)], delegator.clone());

        let req = TestRequest::with_uri("/public").to_http_request();
        assert!(matches!(gate.evaluate(&req).await, Decision::Pass));
        let req = TestRequest::with_uri("/administrator").to_http_request();
        assert!(matches!(gate.evaluate(&req).await, Decision::Pass));
        assert_eq!(delegator.call_count(), 0);
    }

    #[actix_web::test]
    async fn test_grant() {
        let delegator = mock();
        let gate = build_gate(vec![rule("/admin", ALICE)], delegator.clone());

        let req = authorized("/admin/users?page=1");
        match gate.evaluate(&req).await {
            Decision::Grant { rule, grant } => {
                assert_eq!(rule.path, "/admin");
                assert_eq!(grant.len(), 1);
                assert_eq!(grant[0].0.as_str(), "x-user");
                assert_eq!(grant[0].1, "alice");
            }
            other => panic!("expect grant, got {other:?}"),
        }

        let calls = delegator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ALICE);
        assert_eq!(calls[0].1.headers["Authorization"], "Bearer xyz");
    }

    #[actix_web::test]
    async fn test_missing_credentials() {
        let delegator = mock();
        let gate = build_gate(vec![rule("/admin", ALLOW)], delegator.clone());

        let req = TestRequest::with_uri("/admin").to_http_request();
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(401))
        ));
        // Never delegated without credentials.
        assert_eq!(delegator.call_count(), 0);
    }

    #[actix_web::test]
    async fn test_upstream_status() {
        let delegator = mock();
        let gate = build_gate(
            vec![rule("/forbid", FORBID), rule("/garbage", GARBAGE)],
            delegator,
        );

        let req = authorized("/forbid");
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(403))
        ));

        let req = authorized("/garbage");
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(401))
        ));
    }

    #[actix_web::test]
    async fn test_first_rule_governs() {
        let delegator = mock();
        let gate = build_gate(
            vec![rule("/admin", FORBID), rule("/admin/users", ALICE)],
            delegator.clone(),
        );

        let req = authorized("/admin/users");
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(403))
        ));
        assert_eq!(delegator.call_count(), 1);
    }

    #[actix_web::test]
    async fn test_passthrough() {
        let delegator = mock();
        let mut first = rule("/admin", FORBID);
        first.passthrough = true;
        let gate = build_gate(vec![first, rule("/admin", ALICE)], delegator.clone());

        let req = authorized("/admin");
        match gate.evaluate(&req).await {
            Decision::Grant { grant, .. } => assert_eq!(grant[0].1, "alice"),
            other => panic!("expect grant, got {other:?}"),
        }
        assert_eq!(delegator.call_count(), 2);

        // Missing credentials with nothing after the rule: forwarded as is.
        let mut only = rule("/admin", ALLOW);
        only.passthrough = true;
        let gate = build_gate(vec![only], delegator.clone());
        let req = TestRequest::with_uri("/admin").to_http_request();
        assert!(matches!(gate.evaluate(&req).await, Decision::Pass));
        assert_eq!(delegator.call_count(), 2);
    }

    #[actix_web::test]
    async fn test_except() {
        let delegator = mock();
        let mut cfg = rule("/admin", FORBID);
        cfg.except = vec!["/admin/public".to_string()];
        let gate = build_gate(vec![cfg], delegator.clone());

        for uri in ["/admin/public", "/admin/public/logo.png", "/admin/x/../public"] {
            let req = TestRequest::with_uri(uri).to_http_request();
            assert!(
                matches!(gate.evaluate(&req).await, Decision::Pass),
                "expect {uri} to pass"
            );
        }
        assert_eq!(delegator.call_count(), 0);

        let req = TestRequest::with_uri("/admin/publicity").to_http_request();
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(401))
        ));
    }

    #[actix_web::test]
    async fn test_allow_root() {
        let delegator = mock();
        let mut cfg = rule("/", FORBID);
        cfg.allow_root = true;
        let gate = build_gate(vec![cfg], delegator);

        let req = TestRequest::with_uri("/").to_http_request();
        assert!(matches!(gate.evaluate(&req).await, Decision::Pass));
        let req = TestRequest::with_uri("/index.html").to_http_request();
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(401))
        ));
    }

    #[actix_web::test]
    async fn test_normalized_path() {
        let delegator = mock();
        let gate = build_gate(vec![rule("/admin", FORBID)], delegator);

        for uri in ["/public/../admin", "//admin", "/adm%69n/users", "/./admin/"] {
            let req = TestRequest::with_uri(uri).to_http_request();
            assert!(
                matches!(gate.evaluate(&req).await, Decision::Reject(_)),
                "expect {uri} to be protected"
            );
        }
    }

    #[actix_web::test]
    async fn test_preflight() {
        let delegator = mock();
        let gate = build_gate(vec![rule("/admin", FORBID)], delegator.clone());

        let req = TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/admin")
            .to_http_request();
        assert!(matches!(gate.evaluate(&req).await, Decision::Pass));
        assert_eq!(delegator.call_count(), 0);
    }

    #[actix_web::test]
    async fn test_no_endpoint() {
        let delegator = mock();
        let cfg = RuleConfig {
            path: "/private".to_string(),
            ..Default::default()
        };
        let gate = build_gate(vec![cfg], delegator.clone());

        let req = TestRequest::with_uri("/private").to_http_request();
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Reject(Rejection::Status(401))
        ));
        assert_eq!(delegator.call_count(), 0);
    }

    #[actix_web::test]
    async fn test_header_or_query() {
        let delegator = mock();
        let cfg = RuleConfig {
            path: "/api".to_string(),
            endpoint: Some(ALLOW.to_string()),
            header_or_query: vec![HeaderOrQuery {
                header: "X-Api-Key".to_string(),
                query: "api_key".to_string(),
            }],
            ..Default::default()
        };
        let gate = build_gate(vec![cfg], delegator.clone());

        let req = TestRequest::with_uri("/api?api_key=secret").to_http_request();
        assert!(matches!(
            gate.evaluate(&req).await,
            Decision::Grant { .. }
        ));
        let calls = delegator.calls.lock().unwrap();
        assert_eq!(calls[0].1.queries["api_key"], "secret");
        assert!(calls[0].1.headers.is_empty());
    }

    #[actix_web::test]
    async fn test_idempotent() {
        let delegator = mock();
        let gate = build_gate(
            vec![rule("/admin", FORBID), rule("/api", ALICE)],
            delegator,
        );

        for uri in ["/admin", "/api/x", "/other"] {
            let req = authorized(uri);
            let first = format!("{:?}", gate.evaluate(&req).await);
            let second = format!("{:?}", gate.evaluate(&req).await);
            assert_eq!(first, second);
        }
    }
}
