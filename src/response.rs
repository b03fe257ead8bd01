use actix_web::http::header::{HeaderValue, LOCATION, WWW_AUTHENTICATE};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, HttpResponseBuilder};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::gate::outcome::{Rejection, DEFAULT_DENY_STATUS};

pub const INVALID_TOKEN_CHALLENGE: &str = r#"Bearer error="invalid_token""#;

#[derive(Debug, Serialize, Deserialize)]
pub struct CommonResponse {
    pub code: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A wrapper struct for HTTP responses produced by the gate itself
pub struct Response {
    http_response: HttpResponse,
}

impl Response {
    /// Denies the request with `code` and a bearer challenge.
    pub fn denied(code: u16) -> Self {
        let status = match StatusCode::from_u16(code) {
            Ok(status) => status,
            Err(_) => {
                warn!("Endpoint answered unusable status {code}, denying with {DEFAULT_DENY_STATUS}");
                StatusCode::UNAUTHORIZED
            }
        };
        let message = format!(
            "Access denied: {}",
            status.canonical_reason().unwrap_or("unknown reason")
        );

        let mut builder = HttpResponseBuilder::new(status);
        builder.insert_header((WWW_AUTHENTICATE, INVALID_TOKEN_CHALLENGE));
        Self::err_response(builder, status, message)
    }

    /// See-other redirect to `location`.
    pub fn redirect(location: HeaderValue) -> Self {
        Self {
            http_response: HttpResponse::SeeOther()
                .insert_header((LOCATION, location))
                .finish(),
        }
    }

    pub fn bad_gateway(message: impl AsRef<str>) -> Self {
        let message = format!("Bad gateway: {}", message.as_ref());
        let builder = HttpResponseBuilder::new(StatusCode::BAD_GATEWAY);
        Self::err_response(builder, StatusCode::BAD_GATEWAY, message)
    }

    fn err_response(mut builder: HttpResponseBuilder, status: StatusCode, message: String) -> Self {
        let resp = CommonResponse {
            code: status.into(),
            message: Some(message),
        };
        Self {
            http_response: builder.json(resp),
        }
    }
}

impl From<Rejection> for Response {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Status(code) => Self::denied(code),
            Rejection::Redirect(location) => match HeaderValue::from_str(&location) {
                Ok(location) => Self::redirect(location),
                Err(_) => {
                    warn!("Redirect location {location:?} is not a valid header value, denying instead");
                    Self::denied(DEFAULT_DENY_STATUS)
                }
            },
        }
    }
}

impl From<Response> for HttpResponse {
    fn from(val: Response) -> Self {
        val.http_response
    }
}
