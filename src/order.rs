//! C5: the order driver — per-CSR order creation, authorization
//! enumeration, challenge selection/content computation, polling and
//! finalization (spec §4.5).

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::jose::{signed, Identity};
use crate::signer::{b64, Signer};
use crate::transport::Transport;
use crate::types::{Authorization, ChallengeType, Directory, Identifier, Order, OrderStatus};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_TIMEOUT: Duration = Duration::from_secs(3600);

/// A caller-supplied CSR: an opaque identifier, the DER bytes to submit at
/// finalize time, and the DNS names it covers (spec §3: "core consumes ...
/// opaque CSR bytes (DER) with a pre-extracted set of DNS names").
#[derive(Debug, Clone)]
pub struct Csr {
    pub id: String,
    pub der: Vec<u8>,
    pub names: Vec<String>,
}

/// A pending challenge response, alive between challenge selection and the
/// `remove` hook call (spec §3 `ChallengeTask`).
#[derive(Debug, Clone)]
pub struct ChallengeTask {
    pub csr_id: String,
    pub domain: String,
    pub token: String,
    pub content: String,
    pub challenge_url: String,
    pub auth_url: String,
}

/// Creates a new order for `csr` and returns it along with the order's own
/// URL (from the `Location` header).
pub fn create_order(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    kid: &str,
    csr: &Csr,
) -> Result<(Order, String)> {
    let payload = serde_json::json!({
        "identifiers": csr.names.iter().map(|n| Identifier::dns(n)).collect::<Vec<_>>(),
    });

    let (body, _status, headers) = signed(
        transport,
        directory,
        signer,
        &Identity::Kid(kid.to_string()),
        &directory.new_order,
        Some(&payload),
        "create order",
    )?;

    let location = headers
        .get("location")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::MissingLocationHeader(directory.new_order.clone()))?
        .to_string();

    let order: Order = serde_json::from_value(
        body.as_json()
            .cloned()
            .ok_or(Error::UnexpectedStatus {
                purpose: "create order".to_string(),
                url: directory.new_order.clone(),
                status: None,
                body: "non-JSON order body".to_string(),
            })?,
    )?;

    Ok((order, location))
}

/// The result of fetching and, where required, starting work on one
/// authorization.
pub enum AuthorizationOutcome {
    /// Already `valid`; nothing to do.
    AlreadyValid,
    /// Was `pending`; the requested challenge has been selected and the
    /// `setup` hook invoked.
    NeedsChallenge(ChallengeTask),
    /// Reached a terminal state other than `valid` (`invalid`,
    /// `deactivated`, `expired`, `revoked`). The order this authorization
    /// belongs to must fail, scoped to that order alone (spec §3
    /// Authorization invariant: "Only `pending` and `valid` are acted upon;
    /// any other terminal state fails the order").
    Failed,
}

/// Fetches one authorization and, depending on its status, selects the
/// requested challenge type and invokes the `setup` hook, producing a
/// [`ChallengeTask`] — or reports that it's already done, or that it has
/// failed terminally. Only `pending` and `valid` are acted upon; any other
/// status (spec §3 Authorization invariant) is reported as
/// [`AuthorizationOutcome::Failed`] rather than treated as if it were
/// `pending`.
pub fn setup_authorization(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    kid: &str,
    csr_id: &str,
    auth_url: &str,
    challenge_type: ChallengeType,
    hook: &crate::hook::Hook,
) -> Result<AuthorizationOutcome> {
    let authorization = fetch_authorization(transport, directory, signer, kid, auth_url)?;

    match authorization.status {
        crate::types::AuthorizationStatus::Valid => {
            log::info!("{} already verified, skipping", authorization.identifier.value);
            return Ok(AuthorizationOutcome::AlreadyValid);
        }
        crate::types::AuthorizationStatus::Pending => {}
        other => {
            log::error!(
                "{} authorization reached terminal state {:?}, failing its order",
                authorization.identifier.value,
                other
            );
            return Ok(AuthorizationOutcome::Failed);
        }
    }

    let domain = authorization.identifier.value.clone();
    let challenge = authorization
        .challenges
        .iter()
        .find(|c| c.kind == challenge_type.wire_name())
        .ok_or_else(|| Error::NoMatchingChallenge(challenge_type.wire_name(), domain.clone()))?;

    let token = sanitize_token(&challenge.token);
    let keyauth = format!("{}.{}", token, signer.thumbprint());
    let content = match challenge_type {
        ChallengeType::Http01 => keyauth,
        ChallengeType::Dns01 => b64(&openssl::sha::sha256(keyauth.as_bytes())),
    };

    hook.setup(&domain, &token, &content)?;

    Ok(AuthorizationOutcome::NeedsChallenge(ChallengeTask {
        csr_id: csr_id.to_string(),
        domain,
        token,
        content,
        challenge_url: challenge.url.clone(),
        auth_url: auth_url.to_string(),
    }))
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`. Tokens are
/// already base64url-safe; this is defensive so the hook boundary never
/// sees shell-special characters.
pub fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Submits the challenge response and polls the authorization until it
/// leaves `pending`. Returns whether the authorization became `valid`.
pub fn submit_and_poll_challenge(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    kid: &str,
    task: &ChallengeTask,
) -> Result<bool> {
    signed(
        transport,
        directory,
        signer,
        &Identity::Kid(kid.to_string()),
        &task.challenge_url,
        Some(&serde_json::json!({})),
        "submit challenge",
    )?;

    let authorization = poll_until(
        transport,
        directory,
        signer,
        kid,
        &task.auth_url,
        "authorization",
        POLL_INTERVAL,
        POLL_TIMEOUT,
        |body| {
            let status = body.get("status").and_then(|v| v.as_str());
            status.is_none() || status == Some("pending")
        },
    )?;

    let authorization: Authorization = serde_json::from_value(authorization)?;
    Ok(authorization.status == crate::types::AuthorizationStatus::Valid)
}

/// Finalizes an order whose every authorization is `valid`, polls it to a
/// terminal state, and downloads the certificate chain if it became
/// `valid`.
pub fn finalize_and_download(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    kid: &str,
    order: &Order,
    order_url: &str,
    csr_der: &[u8],
) -> Result<String> {
    let payload = serde_json::json!({ "csr": b64(csr_der) });

    signed(
        transport,
        directory,
        signer,
        &Identity::Kid(kid.to_string()),
        &order.finalize,
        Some(&payload),
        "finalize order",
    )?;

    let final_state = poll_until(
        transport,
        directory,
        signer,
        kid,
        order_url,
        "order",
        POLL_INTERVAL,
        POLL_TIMEOUT,
        |body| {
            let status = body.get("status").and_then(|v| v.as_str());
            matches!(status, None | Some("pending") | Some("processing"))
        },
    )?;

    let final_order: Order = serde_json::from_value(final_state)?;
    if final_order.status != OrderStatus::Valid {
        return Err(Error::UnexpectedStatus {
            purpose: "finalize order".to_string(),
            url: order_url.to_string(),
            status: None,
            body: format!("order ended in {:?}", final_order.status),
        });
    }

    let certificate_url = final_order
        .certificate
        .ok_or_else(|| Error::MissingDirectoryField("certificate"))?;

    let (body, _status, _headers) = signed(
        transport,
        directory,
        signer,
        &Identity::Kid(kid.to_string()),
        &certificate_url,
        None,
        "download certificate",
    )?;

    Ok(body.into_string())
}

fn fetch_authorization(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    kid: &str,
    auth_url: &str,
) -> Result<Authorization> {
    let (body, _status, _headers) = signed(
        transport,
        directory,
        signer,
        &Identity::Kid(kid.to_string()),
        auth_url,
        None,
        "fetch authorization",
    )?;

    let value = body.as_json().cloned().ok_or(Error::UnexpectedStatus {
        purpose: "fetch authorization".to_string(),
        url: auth_url.to_string(),
        status: None,
        body: "non-JSON authorization body".to_string(),
    })?;

    Ok(serde_json::from_value(value)?)
}

/// The first query is immediate; `still_pending` inspects the raw JSON body
/// so callers can apply their own "what counts as pending" predicate before
/// deserializing into a concrete status enum. `interval`/`timeout` are
/// parameters rather than hardcoded so tests can exercise the timeout path
/// without an hour-long wait; production call sites always pass
/// [`POLL_INTERVAL`]/[`POLL_TIMEOUT`] (spec §4.5 "Polling policy").
fn poll_until(
    transport: &Transport,
    directory: &Directory,
    signer: &dyn Signer,
    kid: &str,
    url: &str,
    purpose: &'static str,
    interval: Duration,
    timeout: Duration,
    still_pending: impl Fn(&serde_json::Value) -> bool,
) -> Result<serde_json::Value> {
    let start = Instant::now();
    let mut first = true;

    loop {
        if start.elapsed() > timeout {
            return Err(Error::PollingTimeout {
                url: url.to_string(),
            });
        }
        if !first {
            sleep(interval);
        }
        first = false;

        let (body, _status, _headers) = signed(
            transport,
            directory,
            signer,
            &Identity::Kid(kid.to_string()),
            url,
            None,
            purpose,
        )?;

        let value = body.as_json().cloned().ok_or(Error::UnexpectedStatus {
            purpose: purpose.to_string(),
            url: url.to_string(),
            status: None,
            body: "non-JSON status body".to_string(),
        })?;

        if !still_pending(&value) {
            return Ok(value);
        }
    }
}
