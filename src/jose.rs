//! C3: the JOSE layer — wraps [`Transport`] with JWS signing, nonce
//! management and badNonce retry.

use reqwest::header::HeaderMap;

use crate::error::{Error, Result};
use crate::signer::{b64, Signer, JWS_ALG};
use crate::transport::{Body, Transport};
use crate::types::Directory;

const BAD_NONCE_TYPE: &str = "urn:ietf:params:acme:error:badNonce";
const MAX_BAD_NONCE_RETRIES: u32 = 100;

/// Which of `jwk`/`kid` a signed request should carry. Session owns this —
/// the JOSE layer only reads whatever is handed to it (spec §4.3 / §9).
#[derive(Debug, Clone)]
pub enum Identity {
    /// Before the account exists: inline the public key.
    Jwk,
    /// After `newAccount`: the account's `Location` URL.
    Kid(String),
}

/// Whether this is a genuine `signed()` call or the tagged retry outcome
/// used internally instead of exception-based control flow (REDESIGN
/// FLAGS: recursion → iterative loop with a tagged result).
enum Attempt {
    Done(Body, u16, HeaderMap),
    BadNonce,
    Fatal(Error),
}

/// Performs one signed ACME request, transparently retrying on `badNonce`
/// up to [`MAX_BAD_NONCE_RETRIES`] times.
///
/// `payload = None` means a POST-as-GET: the JWS payload is the empty
/// string, not `null` and not `{}`.
pub fn signed(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    identity: &Identity,
    url: &str,
    payload: Option<&serde_json::Value>,
    purpose: &str,
) -> Result<(Body, u16, HeaderMap)> {
    for retry in 0..=MAX_BAD_NONCE_RETRIES {
        match try_once(transport, directory, signer, identity, url, payload, purpose)? {
            Attempt::Done(body, status, headers) => return Ok((body, status, headers)),
            Attempt::BadNonce => {
                log::debug!("badNonce for {purpose} at {url}, retry {retry}");
                continue;
            }
            Attempt::Fatal(err) => return Err(err),
        }
    }

    Err(Error::BadNonceRetriesExhausted {
        purpose: purpose.to_string(),
        url: url.to_string(),
    })
}

fn try_once(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    identity: &Identity,
    url: &str,
    payload: Option<&serde_json::Value>,
    purpose: &str,
) -> Result<Attempt> {
    let nonce = fetch_nonce(transport, directory)?;
    let protected = build_protected(signer, identity, &nonce, url);

    let protected64 = b64(serde_json::to_string(&protected)?.as_bytes());
    let payload64 = match payload {
        Some(value) => b64(serde_json::to_string(value)?.as_bytes()),
        None => String::new(),
    };

    let signing_input = format!("{}.{}", protected64, payload64);
    let signature = signer.sign(signing_input.as_bytes())?;

    let body = serde_json::json!({
        "protected": protected64,
        "payload": payload64,
        "signature": signature,
    });

    let (resp_body, status, headers) = transport.post(url, body.to_string())?;

    if status == 400 {
        if let Some(problem_type) = problem_type(&resp_body) {
            if problem_type == BAD_NONCE_TYPE {
                return Ok(Attempt::BadNonce);
            }
            if let Some(suffix) = problem_type.strip_prefix("urn:ietf:params:acme:error:") {
                if let Some(err) = Error::from_problem_type(suffix) {
                    return Ok(Attempt::Fatal(err));
                }
            }
        }
    }

    if matches!(status, 200 | 201 | 204) {
        return Ok(Attempt::Done(resp_body, status, headers));
    }

    Ok(Attempt::Fatal(Error::UnexpectedStatus {
        purpose: purpose.to_string(),
        url: url.to_string(),
        status: Some(status),
        body: resp_body.into_string(),
    }))
}

/// Builds the JWS protected header. `jwk`/`kid` are mutually exclusive by
/// construction (spec §4.3): before an account exists a request carries the
/// public key inline, afterwards it carries the account's `kid` URL.
fn build_protected(signer: &dyn Signer, identity: &Identity, nonce: &str, url: &str) -> serde_json::Value {
    let mut protected = serde_json::json!({
        "alg": JWS_ALG,
        "url": url,
        "nonce": nonce,
    });
    match identity {
        Identity::Jwk => {
            protected["jwk"] = signer.jwk_json();
        }
        Identity::Kid(kid) => {
            protected["kid"] = serde_json::Value::String(kid.clone());
        }
    }
    protected
}

fn problem_type(body: &Body) -> Option<String> {
    body.as_json()?
        .get("type")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

fn fetch_nonce(transport: &Transport, directory: &Directory) -> Result<String> {
    let (_, _, headers) = transport.head(&directory.new_nonce)?;
    header_str(&headers, "replay-nonce")
        .ok_or_else(|| Error::MissingNonceHeader(directory.new_nonce.clone()))
}

pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_owned)
}
