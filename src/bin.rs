use std::fs;

use acme::{session, ChallengeType, Csr, Hook, RsaAccountKey};
use clap::Parser;
use flexi_logger::Logger;
use log::info;

const LETS_ENCRYPT_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// An ACME client (RFC 8555) driver — solves challenges via an external hook.
///
/// Key generation, CSR creation and SAN extraction stay the caller's job
/// (spec §1): this binary expects an already-built DER CSR and the exact
/// list of names it covers.
#[derive(Parser, Debug)]
#[clap(version = "0.1.0")]
struct Args {
    /// Path to the PEM-encoded RSA account private key.
    #[clap(long)]
    account_key: String,
    /// Path to a DER-encoded CSR.
    #[clap(long)]
    csr: String,
    /// A DNS name covered by the CSR; repeat for each SAN.
    #[clap(long = "name", required = true)]
    names: Vec<String>,
    /// Contact URIs (e.g. mailto:you@example.org).
    #[clap(long)]
    contact: Vec<String>,
    /// The ACME directory URL. Defaults to Let's Encrypt production.
    #[clap(long)]
    directory_url: Option<String>,
    /// Use the Let's Encrypt staging directory instead of production.
    #[clap(long)]
    staging: bool,
    /// Path to the hook executable.
    #[clap(long)]
    hook: String,
    /// Static leading arguments passed to the hook before the verb.
    #[clap(long)]
    hook_arg: Vec<String>,
    /// Which challenge type to complete: `http-01` or `dns-01`.
    #[clap(long, default_value = "http-01")]
    challenge_type: String,
    /// Skip the pre-verification `check` hook call.
    #[clap(long)]
    disable_check: bool,
    /// Enables debug output.
    #[clap(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    Logger::with_str(level)
        .log_target(flexi_logger::LogTarget::StdOut)
        .start()
        .unwrap_or_else(|e| panic!("Logger initialization failed with {e}"));

    let challenge_type = match args.challenge_type.as_str() {
        "http-01" => ChallengeType::Http01,
        "dns-01" => ChallengeType::Dns01,
        other => {
            eprintln!("unknown challenge type `{other}`, expected http-01 or dns-01");
            std::process::exit(2);
        }
    };

    let directory_url = args.directory_url.unwrap_or_else(|| {
        if args.staging {
            LETS_ENCRYPT_STAGING.to_string()
        } else {
            LETS_ENCRYPT_SERVER.to_string()
        }
    });

    let key_pem = fs::read(&args.account_key).expect("failed to read account key");
    let account_key = RsaAccountKey::from_pem(&key_pem).expect("failed to parse account key");
    let der = fs::read(&args.csr).expect("failed to read CSR");

    let csr = Csr {
        id: args.csr.clone(),
        der,
        names: args.names,
    };

    let input = session::SessionInput {
        account_key: Box::new(account_key),
        csrs: vec![csr],
        directory_url,
        contact: if args.contact.is_empty() {
            None
        } else {
            Some(args.contact)
        },
        hook: Hook::new(args.hook, args.hook_arg),
        challenge_type,
        disable_check: args.disable_check,
    };

    let results = session::run(input).expect("issuance failed");
    for (id, chain) in &results {
        info!("issued certificate for {id}");
        println!("{chain}");
    }
}
