//! C6: the session — top-level entry point. Parses the account key,
//! fetches the directory, registers/updates the account, and sequences the
//! order drivers and batch-level hook calls (spec §4.6).

use crate::error::{Error, Result};
use crate::hook::Hook;
use crate::jose::{signed, Identity};
use crate::order::{self, AuthorizationOutcome, ChallengeTask, Csr};
use crate::signer::Signer;
use crate::transport::Transport;
use crate::types::{ChallengeType, Directory, Order};

/// Everything the core needs to run one issuance batch (spec §6 "Inputs to
/// the core").
pub struct SessionInput {
    pub account_key: Box<dyn Signer>,
    pub csrs: Vec<Csr>,
    pub directory_url: String,
    pub contact: Option<Vec<String>>,
    pub hook: Hook,
    pub challenge_type: ChallengeType,
    pub disable_check: bool,
}

/// The per-order status a port tracks explicitly instead of mutating a
/// shared list in place (REDESIGN FLAGS / DESIGN NOTES).
#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    CheckFailed,
    AuthFailed,
    Finalized(String),
    FinalizeFailed,
}

struct OrderEntry {
    csr: Csr,
    order: Order,
    order_url: String,
    outcome: Outcome,
}

/// Runs one issuance batch end to end and returns `(identifier,
/// certificate_chain_pem)` for every CSR that succeeded (spec §6 "Output").
pub fn run(input: SessionInput) -> Result<Vec<(String, String)>> {
    let transport = Transport::new()?;
    let signer = input.account_key.as_ref();

    log::info!("fetching directory from {}", input.directory_url);
    let (body, _status, _headers) = transport.get(&input.directory_url)?;
    let directory_json = body.as_json().cloned().ok_or_else(|| Error::UnexpectedStatus {
        purpose: "fetch directory".to_string(),
        url: input.directory_url.clone(),
        status: None,
        body: "non-JSON directory body".to_string(),
    })?;
    let directory = Directory::from_value(&directory_json)?;

    log::info!("registering account");
    let mut reg_payload = serde_json::json!({ "termsOfServiceAgreed": true });
    if let Some(contact) = &input.contact {
        reg_payload["contact"] = serde_json::Value::Array(
            contact.iter().cloned().map(serde_json::Value::String).collect(),
        );
    }

    let (_body, status, headers) = signed(
        &transport,
        &directory,
        signer,
        &Identity::Jwk,
        &directory.new_account,
        Some(&reg_payload),
        "register account",
    )?;
    let kid = headers
        .get("location")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::MissingLocationHeader(directory.new_account.clone()))?
        .to_string();

    if status == 201 {
        log::info!("registered new account at {kid}");
    } else {
        log::info!("account already exists at {kid}");
    }

    // Per spec §4.6 step 4 / §9 open question (c): the contact update only
    // runs (and only logs) once per session, before the per-CSR loop.
    if let Some(contact) = &input.contact {
        if status != 201 {
            let update_payload = serde_json::json!({
                "contact": contact.iter().cloned().collect::<Vec<_>>(),
            });
            let (_, _, _) = signed(
                &transport,
                &directory,
                signer,
                &Identity::Kid(kid.clone()),
                &kid,
                Some(&update_payload),
                "update contact",
            )?;
            log::info!("updated contact details: {}", contact.join("; "));
        }
    }

    let mut entries = Vec::with_capacity(input.csrs.len());
    let mut tasks: Vec<ChallengeTask> = Vec::new();

    for csr in input.csrs {
        log::info!("creating order for {:?}", csr.names);
        let (order, order_url) = order::create_order(&transport, &directory, signer, &kid, &csr)?;

        let mut auth_failed = false;
        for auth_url in &order.authorizations {
            match order::setup_authorization(
                &transport,
                &directory,
                signer,
                &kid,
                &csr.id,
                auth_url,
                input.challenge_type,
                &input.hook,
            )? {
                AuthorizationOutcome::AlreadyValid => {}
                AuthorizationOutcome::NeedsChallenge(task) => tasks.push(task),
                AuthorizationOutcome::Failed => {
                    auth_failed = true;
                    break;
                }
            }
        }

        entries.push(OrderEntry {
            csr,
            order,
            order_url,
            outcome: if auth_failed { Outcome::AuthFailed } else { Outcome::Pending },
        });
    }

    input.hook.activate()?;
    log::info!("activated {} challenge(s)", tasks.len());

    if !input.disable_check {
        for task in &tasks {
            if let Err(err) = input.hook.check(&task.domain, &task.token, &task.content) {
                log::error!("check failed for {}: {err}", task.domain);
                drop_order(&mut entries, &task.csr_id, Outcome::CheckFailed);
            }
        }
    }

    for task in &tasks {
        log::info!("verifying {}", task.domain);
        let valid = order::submit_and_poll_challenge(&transport, &directory, signer, &kid, task);
        match valid {
            Ok(true) => log::info!("{} verified", task.domain),
            Ok(false) => {
                log::error!("challenge did not pass for {}", task.domain);
                drop_order(&mut entries, &task.csr_id, Outcome::AuthFailed);
            }
            Err(err) => {
                log::error!("error checking challenge status for {}: {err}", task.domain);
                drop_order(&mut entries, &task.csr_id, Outcome::AuthFailed);
            }
        }

        log::info!("removing challenge for {}", task.domain);
        input.hook.remove(&task.domain, &task.token, &task.content)?;
    }

    input.hook.finish()?;

    let mut results = Vec::new();
    for entry in &mut entries {
        if !matches!(entry.outcome, Outcome::Pending) {
            continue;
        }

        log::info!("finalizing order for {:?}", entry.csr.names);
        match order::finalize_and_download(
            &transport,
            &directory,
            signer,
            &kid,
            &entry.order,
            &entry.order_url,
            &entry.csr.der,
        ) {
            Ok(chain) => {
                // `write`'s own stdout is a caller-facing echo (spec §4.4);
                // the value returned to our caller is the downloaded chain
                // itself (spec §6 "Output").
                input.hook.write(&entry.csr.id, &chain)?;
                entry.outcome = Outcome::Finalized(chain);
            }
            Err(err) => {
                log::error!("order failed for {:?}: {err}", entry.csr.names);
                entry.outcome = Outcome::FinalizeFailed;
            }
        }
    }

    for entry in entries {
        if let Outcome::Finalized(chain) = entry.outcome {
            results.push((entry.csr.id, chain));
        }
    }

    Ok(results)
}

fn drop_order(entries: &mut [OrderEntry], csr_id: &str, reason: Outcome) {
    for entry in entries.iter_mut() {
        if entry.csr.id == csr_id && matches!(entry.outcome, Outcome::Pending) {
            entry.outcome = reason;
            return;
        }
    }
}
