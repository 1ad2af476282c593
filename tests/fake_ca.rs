//! Integration tests driving `session::run` end to end against a fake CA
//! (`mockito`) and a fake hook (a small shell script logging its own
//! invocations), covering the scenarios from spec §8.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use acme::{run, ChallengeType, Csr, Hook, SessionInput};

/// Writes an executable shell script that appends `verb arg1 arg2 ...` to
/// `log.txt` in `dir` for every invocation, and echoes stdin back on stdout
/// for the `write` verb (so the chain hook.write sees round-trips).
fn fake_hook(dir: &tempfile::TempDir) -> (Hook, std::path::PathBuf) {
    let log_path = dir.path().join("log.txt");
    let script_path = dir.path().join("hook.sh");
    fs::write(
        &script_path,
        format!(
            "#!/bin/sh\necho \"$@\" >> {}\nif [ \"$1\" = \"write\" ]; then cat; fi\n",
            log_path.display()
        ),
    )
    .unwrap();
    let mut perms = fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).unwrap();

    (Hook::new(script_path.to_str().unwrap().to_string(), vec![]), log_path)
}

fn hook_log_lines(log_path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(log_path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn happy_path_single_domain_http01() {
    let mut server = mockito::Server::new();
    let base = server.url();

    server
        .mock("GET", "/directory")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"newNonce":"{base}/new-nonce","newAccount":"{base}/new-account","newOrder":"{base}/new-order"}}"#
        ))
        .create();
    server
        .mock("HEAD", "/new-nonce")
        .with_status(200)
        .with_header("replay-nonce", "nonce-0")
        .create();
    server
        .mock("POST", "/new-account")
        .with_status(201)
        .with_header("location", &format!("{base}/acct/1"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"valid"}"#)
        .create();
    server
        .mock("POST", "/new-order")
        .with_status(201)
        .with_header("location", &format!("{base}/order/1"))
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"status":"pending","identifiers":[{{"type":"dns","value":"example.org"}}],"authorizations":["{base}/authz/1"],"finalize":"{base}/order/1/finalize","certificate":null}}"#
        ))
        .create();

    let authz_calls = Arc::new(AtomicUsize::new(0));
    let authz_calls_clone = authz_calls.clone();
    let pending_body = format!(
        r#"{{"status":"pending","identifier":{{"type":"dns","value":"example.org"}},"challenges":[{{"type":"http-01","url":"{base}/chall/1","token":"tok123","status":"pending"}}]}}"#
    );
    let valid_body = r#"{"status":"valid","identifier":{"type":"dns","value":"example.org"},"challenges":[{"type":"http-01","url":"irrelevant","token":"tok123","status":"valid"}]}"#.to_string();
    server
        .mock("POST", "/authz/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let n = authz_calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                pending_body.clone().into_bytes()
            } else {
                valid_body.clone().into_bytes()
            }
        })
        .create();

    server
        .mock("POST", "/chall/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"type":"http-01","url":"irrelevant","token":"tok123","status":"pending"}"#)
        .create();

    server
        .mock("POST", "/order/1/finalize")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"processing","identifiers":[],"authorizations":[],"finalize":"x","certificate":null}"#)
        .create();
    server
        .mock("POST", "/order/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"status":"valid","identifiers":[{{"type":"dns","value":"example.org"}}],"authorizations":["{base}/authz/1"],"finalize":"{base}/order/1/finalize","certificate":"{base}/cert/1"}}"#
        ))
        .create();
    server
        .mock("POST", "/cert/1")
        .with_status(200)
        .with_header("content-type", "application/pem-certificate-chain")
        .with_body("FAKECERTCHAIN")
        .create();

    let dir = tempfile::tempdir().unwrap();
    let (hook, log_path) = fake_hook(&dir);

    let input = SessionInput {
        account_key: Box::new(acme::generate_account_key().unwrap()),
        csrs: vec![Csr {
            id: "a.csr".to_string(),
            der: vec![1, 2, 3, 4],
            names: vec!["example.org".to_string()],
        }],
        directory_url: format!("{base}/directory"),
        contact: None,
        hook,
        challenge_type: ChallengeType::Http01,
        disable_check: false,
    };

    let results = run(input).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "a.csr");
    assert_eq!(results[0].1, "FAKECERTCHAIN");

    let lines = hook_log_lines(&log_path);
    assert!(lines.iter().any(|l| l.starts_with("setup example.org tok123 ")));
    assert!(lines.contains(&"activate".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("check example.org tok123 ")));
    assert!(lines.iter().any(|l| l.starts_with("remove example.org tok123 ")));
    assert!(lines.contains(&"finish".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("write a.csr")));
}

#[test]
fn check_disabled_skips_check_verb() {
    let mut server = mockito::Server::new();
    let base = server.url();

    server
        .mock("GET", "/directory")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"newNonce":"{base}/new-nonce","newAccount":"{base}/new-account","newOrder":"{base}/new-order"}}"#
        ))
        .create();
    server
        .mock("HEAD", "/new-nonce")
        .with_status(200)
        .with_header("replay-nonce", "nonce-0")
        .create();
    server
        .mock("POST", "/new-account")
        .with_status(201)
        .with_header("location", &format!("{base}/acct/1"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"valid"}"#)
        .create();
    server
        .mock("POST", "/new-order")
        .with_status(201)
        .with_header("location", &format!("{base}/order/1"))
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"status":"pending","identifiers":[{{"type":"dns","value":"example.org"}}],"authorizations":["{base}/authz/1"],"finalize":"{base}/order/1/finalize","certificate":null}}"#
        ))
        .create();

    let authz_calls = Arc::new(AtomicUsize::new(0));
    let authz_calls_clone = authz_calls.clone();
    let pending_body = format!(
        r#"{{"status":"pending","identifier":{{"type":"dns","value":"example.org"}},"challenges":[{{"type":"http-01","url":"{base}/chall/1","token":"tok123","status":"pending"}}]}}"#
    );
    let valid_body = r#"{"status":"valid","identifier":{"type":"dns","value":"example.org"},"challenges":[{"type":"http-01","url":"irrelevant","token":"tok123","status":"valid"}]}"#.to_string();
    server
        .mock("POST", "/authz/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let n = authz_calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                pending_body.clone().into_bytes()
            } else {
                valid_body.clone().into_bytes()
            }
        })
        .create();
    server
        .mock("POST", "/chall/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"type":"http-01","url":"irrelevant","token":"tok123","status":"pending"}"#)
        .create();
    server
        .mock("POST", "/order/1/finalize")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"processing","identifiers":[],"authorizations":[],"finalize":"x","certificate":null}"#)
        .create();
    server
        .mock("POST", "/order/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"status":"valid","identifiers":[{{"type":"dns","value":"example.org"}}],"authorizations":["{base}/authz/1"],"finalize":"{base}/order/1/finalize","certificate":"{base}/cert/1"}}"#
        ))
        .create();
    server
        .mock("POST", "/cert/1")
        .with_status(200)
        .with_header("content-type", "application/pem-certificate-chain")
        .with_body("FAKECERTCHAIN")
        .create();

    let dir = tempfile::tempdir().unwrap();
    let (hook, log_path) = fake_hook(&dir);

    let input = SessionInput {
        account_key: Box::new(acme::generate_account_key().unwrap()),
        csrs: vec![Csr {
            id: "a.csr".to_string(),
            der: vec![1, 2, 3, 4],
            names: vec!["example.org".to_string()],
        }],
        directory_url: format!("{base}/directory"),
        contact: None,
        hook,
        challenge_type: ChallengeType::Http01,
        disable_check: true,
    };

    let results = run(input).unwrap();
    assert_eq!(results.len(), 1);

    let lines = hook_log_lines(&log_path);
    assert!(!lines.iter().any(|l| l.starts_with("check ")));
}

/// Two CSRs share a batch; one domain's authorization ends `invalid`. The
/// failing order must be dropped from the results while the other
/// completes normally, and the failure must not abort the other order's
/// processing (spec §8 scenario 3 / §4.6 step semantics).
#[test]
fn one_authorization_failing_does_not_abort_the_other_order() {
    let mut server = mockito::Server::new();
    let base = server.url();

    server
        .mock("GET", "/directory")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"newNonce":"{base}/new-nonce","newAccount":"{base}/new-account","newOrder":"{base}/new-order"}}"#
        ))
        .create();
    server
        .mock("HEAD", "/new-nonce")
        .with_status(200)
        .with_header("replay-nonce", "nonce-0")
        .create();
    server
        .mock("POST", "/new-account")
        .with_status(201)
        .with_header("location", &format!("{base}/acct/1"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"valid"}"#)
        .create();

    // `create_order` always posts to the same `newOrder` URL; since the two
    // CSRs in this batch are processed in order (a.csr, then b.csr), a
    // single dynamic mock keyed on call count hands each its own order body.
    let new_order_calls = Arc::new(AtomicUsize::new(0));
    let new_order_calls_clone = new_order_calls.clone();
    let order_a_body = format!(
        r#"{{"status":"pending","identifiers":[{{"type":"dns","value":"a.example.org"}}],"authorizations":["{base}/authz/a"],"finalize":"{base}/order/a/finalize","certificate":null}}"#
    );
    let order_b_body = format!(
        r#"{{"status":"pending","identifiers":[{{"type":"dns","value":"b.example.org"}}],"authorizations":["{base}/authz/b"],"finalize":"{base}/order/b/finalize","certificate":null}}"#
    );
    // Order B's `Location` is never actually dereferenced: its authorization
    // fails before this driver ever finalizes (and thus polls) the order, so
    // both calls can share one Location value.
    server
        .mock("POST", "/new-order")
        .with_status(201)
        .with_header("location", &format!("{base}/order/1"))
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let n = new_order_calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 { order_a_body.clone().into_bytes() } else { order_b_body.clone().into_bytes() }
        })
        .create();
    let a_calls = Arc::new(AtomicUsize::new(0));
    let a_calls_clone = a_calls.clone();
    let a_pending = format!(
        r#"{{"status":"pending","identifier":{{"type":"dns","value":"a.example.org"}},"challenges":[{{"type":"http-01","url":"{base}/chall/a","token":"tok-a","status":"pending"}}]}}"#
    );
    let a_valid = r#"{"status":"valid","identifier":{"type":"dns","value":"a.example.org"},"challenges":[{"type":"http-01","url":"irrelevant","token":"tok-a","status":"valid"}]}"#.to_string();
    server
        .mock("POST", "/authz/a")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let n = a_calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 { a_pending.clone().into_bytes() } else { a_valid.clone().into_bytes() }
        })
        .create();
    server
        .mock("POST", "/chall/a")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"type":"http-01","url":"irrelevant","token":"tok-a","status":"pending"}"#)
        .create();
    server
        .mock("POST", "/order/a/finalize")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"processing","identifiers":[],"authorizations":[],"finalize":"x","certificate":null}"#)
        .create();
    server
        .mock("POST", "/order/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"status":"valid","identifiers":[{{"type":"dns","value":"a.example.org"}}],"authorizations":["{base}/authz/a"],"finalize":"{base}/order/a/finalize","certificate":"{base}/cert/a"}}"#
        ))
        .create();
    server
        .mock("POST", "/cert/a")
        .with_status(200)
        .with_header("content-type", "application/pem-certificate-chain")
        .with_body("CHAIN-A")
        .create();

    // Domain B: authorization goes `invalid`; its order is never finalized
    // or polled, so it needs no `/order/.../finalize` or cert mock.
    let b_calls = Arc::new(AtomicUsize::new(0));
    let b_calls_clone = b_calls.clone();
    let b_pending = format!(
        r#"{{"status":"pending","identifier":{{"type":"dns","value":"b.example.org"}},"challenges":[{{"type":"http-01","url":"{base}/chall/b","token":"tok-b","status":"pending"}}]}}"#
    );
    let b_invalid = r#"{"status":"invalid","identifier":{"type":"dns","value":"b.example.org"},"challenges":[{"type":"http-01","url":"irrelevant","token":"tok-b","status":"invalid"}]}"#.to_string();
    server
        .mock("POST", "/authz/b")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let n = b_calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 { b_pending.clone().into_bytes() } else { b_invalid.clone().into_bytes() }
        })
        .create();
    server
        .mock("POST", "/chall/b")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"type":"http-01","url":"irrelevant","token":"tok-b","status":"pending"}"#)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let (hook, _log_path) = fake_hook(&dir);

    let input = SessionInput {
        account_key: Box::new(acme::generate_account_key().unwrap()),
        csrs: vec![
            Csr {
                id: "a.csr".to_string(),
                der: vec![1, 2, 3],
                names: vec!["a.example.org".to_string()],
            },
            Csr {
                id: "b.csr".to_string(),
                der: vec![4, 5, 6],
                names: vec!["b.example.org".to_string()],
            },
        ],
        directory_url: format!("{base}/directory"),
        contact: None,
        hook,
        challenge_type: ChallengeType::Http01,
        disable_check: true,
    };

    let results = run(input).unwrap();
    assert_eq!(results, vec![("a.csr".to_string(), "CHAIN-A".to_string())]);
}
