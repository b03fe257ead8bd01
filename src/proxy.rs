use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::web::{Bytes, Data};
use actix_web::{HttpMessage, HttpRequest, HttpResponse};
use anyhow::{Context, Result};
use log::{debug, error};
use url::Url;

use crate::middleware::Granted;
use crate::response::Response;

/// Headers that only make sense for a single connection and are never
/// relayed.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Relays admitted requests to the upstream service.
pub struct Upstream {
    url: Url,
    client: reqwest::Client,
}

impl Upstream {
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    /// Upstream url for `req`: the upstream path prefix followed by the
    /// request path and query.
    pub fn target(&self, req: &HttpRequest) -> Url {
        let mut target = self.url.clone();
        let path = format!("{}{}", target.path().trim_end_matches('/'), req.path());
        target.set_path(&path);

        let query = req.query_string();
        target.set_query(if query.is_empty() { None } else { Some(query) });
        target
    }

    /// End-to-end headers of `req` to relay. Credential headers are dropped
    /// when the governing rule asks for it.
    pub fn request_headers(&self, req: &HttpRequest) -> Result<reqwest::header::HeaderMap> {
        let granted = req.extensions().get::<Granted>().cloned();
        let stripped: &[String] = match granted.as_ref() {
            Some(granted) if granted.strip_header => &granted.credential_headers,
            _ => &[],
        };

        let mut headers = reqwest::header::HeaderMap::with_capacity(req.headers().len());
        for (name, value) in req.headers().iter() {
            let name = name.as_str();
            if name == "host" || is_hop_by_hop(name) {
                continue;
            }
            if stripped.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                continue;
            }

            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("convert header name '{name}'"))?;
            let header_value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
                .with_context(|| format!("convert value of header '{name}'"))?;
            headers.append(header_name, header_value);
        }

        if let Some(peer) = req.peer_addr() {
            let forwarded_for = match headers.get(X_FORWARDED_FOR).map(|v| v.to_str()) {
                Some(Ok(prev)) => format!("{prev}, {}", peer.ip()),
                _ => peer.ip().to_string(),
            };
            let value = reqwest::header::HeaderValue::from_str(&forwarded_for)
                .context("build x-forwarded-for")?;
            headers.insert(X_FORWARDED_FOR, value);
        }

        Ok(headers)
    }

    pub async fn forward(&self, req: &HttpRequest, body: Bytes) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
            .context("convert request method")?;
        let target = self.target(req);
        let headers = self.request_headers(req)?;
        debug!("Forward {} {} to {}", method, req.path(), target);

        let resp = self
            .client
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("send upstream request")?;

        let status =
            StatusCode::from_u16(resp.status().as_u16()).context("convert upstream status")?;
        let mut builder = HttpResponse::build(status);
        for (name, value) in resp.headers().iter() {
            let name = name.as_str();
            if name == "content-length" || is_hop_by_hop(name) {
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("convert upstream header name '{name}'"))?;
            let header_value = HeaderValue::from_bytes(value.as_bytes())
                .with_context(|| format!("convert value of upstream header '{name}'"))?;
            builder.append_header((header_name, header_value));
        }

        let body = resp.bytes().await.context("read upstream response")?;
        Ok(builder.body(body))
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Default service of the gate server: relays every request that made it
/// through the gate.
pub async fn handle(req: HttpRequest, body: Bytes, upstream: Data<Upstream>) -> HttpResponse {
    match upstream.forward(&req, body).await {
        Ok(resp) => resp,
        Err(e) => {
            error!("Forward {} {} failed: {e:#}", req.method(), req.path());
            Response::bad_gateway("upstream unavailable").into()
        }
    }
}
