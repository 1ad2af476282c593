//! C2: raw HTTP transport.
//!
//! A thin wrapper around a blocking `reqwest` client. It knows nothing about
//! JWS, nonces or ACME semantics — it just performs requests, captures
//! status and headers, and opportunistically parses the body as JSON so the
//! JOSE layer can inspect RFC 7807 error bodies without caring whether the
//! response happened to be a raw PEM chain instead.

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::error::Result;

const USER_AGENT: &str = concat!("acme-rs/", env!("CARGO_PKG_VERSION"));
const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// A response body, parsed opportunistically.
#[derive(Debug, Clone)]
pub enum Body {
    Json(serde_json::Value),
    Text(String),
}

impl Body {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Body::Json(v) => Some(v),
            Body::Text(_) => None,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Body::Json(v) => v.to_string(),
            Body::Text(t) => t,
        }
    }
}

pub struct Transport {
    client: Client,
}

impl Transport {
    pub fn new() -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    pub fn get(&self, url: &str) -> Result<(Body, u16, HeaderMap)> {
        self.request(Method::GET, url, None)
    }

    pub fn head(&self, url: &str) -> Result<(Body, u16, HeaderMap)> {
        self.request(Method::HEAD, url, None)
    }

    pub fn post(&self, url: &str, body: String) -> Result<(Body, u16, HeaderMap)> {
        self.request(Method::POST, url, Some(body))
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
    ) -> Result<(Body, u16, HeaderMap)> {
        let mut builder = self.client.request(method, url);
        if let Some(body) = body {
            log_body(">>", url, &body);
            builder = builder.header("Content-Type", JOSE_CONTENT_TYPE).body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text()?;

        log::debug!("{} -> {} ({} bytes)", url, status, text.len());
        log_body("<<", url, &text);

        let body = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(text),
        };

        Ok((body, status, headers))
    }
}

/// Logs a request/response body at `debug`, redacting key material and
/// signature fields wherever they appear (`signature`, `jwk`, `n`). Bodies
/// that aren't JSON (the downloaded certificate chain) are logged by length
/// only.
fn log_body(direction: &str, url: &str, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(mut value) => {
            redact(&mut value);
            log::debug!("{direction} {url} body: {value}");
        }
        Err(_) => log::debug!("{direction} {url} body: <{} non-JSON bytes>", text.len()),
    }
}

fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if matches!(key.as_str(), "signature" | "jwk" | "n") {
                    *v = serde_json::Value::String("<redacted>".to_string());
                } else {
                    redact(v);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
