use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage, HttpResponse};
use futures::future::LocalBoxFuture;

use crate::gate::{Decision, Gate};
use crate::response::Response;

/// Request extension recorded when a rule authorized the request.
#[derive(Debug, Clone)]
pub struct Granted {
    /// Path pattern of the governing rule.
    pub rule_path: String,
    pub strip_header: bool,
    /// Credential headers read by the rule, minus the ones the endpoint
    /// granted back.
    pub credential_headers: Vec<String>,
}

/// Middleware that guards the wrapped service with a [`Gate`].
///
/// Granted headers replace same-named request headers before the inner
/// service runs. Rejections are answered without reaching it.
#[derive(Clone)]
pub struct Authorize {
    gate: Arc<Gate>,
}

impl Authorize {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authorize
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthorizeMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthorizeMiddleware {
            service: Rc::new(service),
            gate: self.gate.clone(),
        }))
    }
}

pub struct AuthorizeMiddleware<S> {
    service: Rc<S>,
    gate: Arc<Gate>,
}

impl<S, B> Service<ServiceRequest> for AuthorizeMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let gate = self.gate.clone();

        Box::pin(async move {
            let decision = gate.evaluate(req.request()).await;
            let granted = match decision {
                Decision::Pass => None,
                Decision::Grant { rule, grant } => {
                    let credential_headers = rule
                        .credential_headers()
                        .filter(|name| !grant.iter().any(|(granted, _)| granted == *name))
                        .map(String::from)
                        .collect();
                    for (name, value) in grant {
                        req.headers_mut().insert(name, value);
                    }
                    Some(Granted {
                        rule_path: rule.path.clone(),
                        strip_header: rule.strip_header,
                        credential_headers,
                    })
                }
                Decision::Reject(rejection) => {
                    let resp: HttpResponse = Response::from(rejection).into();
                    return Ok(req.into_response(resp).map_into_right_body());
                }
            };

            if let Some(granted) = granted {
                req.extensions_mut().insert(granted);
            }

            let resp = service.call(req).await?;
            Ok(resp.map_into_left_body())
        })
    }
}
