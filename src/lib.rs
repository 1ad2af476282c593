//! An ACME v2 (RFC 8555) protocol driver.
//!
//! Given an account key and one or more CSRs, this crate registers an
//! account with a CA, creates an order covering the subject names, solves
//! the authorization challenges for each name by delegating the physical
//! placement of challenge tokens to an external hook program, finalizes the
//! order, and returns the issued certificate chain.
//!
//! Key/CSR generation, DER/PEM conversion and SAN extraction, and the
//! concrete mechanism by which a challenge gets published are all outside
//! this crate's scope — see [`session::SessionInput`] for the boundary.

pub mod error;
pub mod hook;
pub mod jose;
pub mod order;
pub mod session;
pub mod signer;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use hook::Hook;
pub use order::Csr;
pub use session::{run, SessionInput};
pub use signer::{RsaAccountKey, Signer};
pub use types::ChallengeType;

const KEY_WIDTH: u32 = 2048;

/// Generates a fresh RSA account key of this crate's default width.
///
/// Key generation itself is a caller concern in general (spec §1), but
/// callers without an existing account key need somewhere to start from.
pub fn generate_account_key() -> Result<RsaAccountKey> {
    let rsa = openssl::rsa::Rsa::generate(KEY_WIDTH)?;
    RsaAccountKey::from_rsa(rsa)
}
