//! C1: the account-key signer.
//!
//! Produces SHA-256 signatures over byte strings using the account key and
//! computes the JWK and its thumbprint. The rest of the driver only depends
//! on the [`Signer`] trait, so tests can substitute any implementation.

use base64::{encode_config, URL_SAFE_NO_PAD};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::Signer as OpensslSigner;

use crate::error::Result;

/// The RSA algorithm identifier this driver speaks (JWS `alg`).
pub const JWS_ALG: &str = "RS256";

/// Base64url-encodes `bytes` without padding.
///
/// `=` padding is always stripped, matching the JOSE base64url convention
/// used throughout the protocol (invariant: no emitted value ever contains
/// `=`).
pub fn b64(bytes: &[u8]) -> String {
    encode_config(bytes, URL_SAFE_NO_PAD)
}

/// Something that can produce a JWK, a thumbprint of that JWK, and RS256
/// signatures over arbitrary byte strings — the abstract "account key"
/// collaborator from spec §4.1.
pub trait Signer {
    /// The canonical `{"e":...,"kty":"RSA","n":...}` JWK for this key.
    fn jwk_json(&self) -> serde_json::Value;

    /// `base64url(sha256(canonical_jwk))`, computed once per key.
    fn thumbprint(&self) -> &str;

    /// `base64url(RSASSA-PKCS1-v1_5-SHA256(bytes))`.
    fn sign(&self, bytes: &[u8]) -> Result<String>;
}

/// An RSA account key: a signing handle plus the JWK and thumbprint, both
/// computed once from the key and held immutable for the session's
/// lifetime.
pub struct RsaAccountKey {
    pkey: PKey<Private>,
    jwk: serde_json::Value,
    thumbprint: String,
}

impl RsaAccountKey {
    /// Parses a PEM-encoded RSA private key and precomputes its JWK and
    /// thumbprint.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = Rsa::private_key_from_pem(pem)?;
        Self::from_rsa(key)
    }

    /// Wraps an already-parsed RSA key.
    pub fn from_rsa(key: Rsa<Private>) -> Result<Self> {
        let n = b64(&key.n().to_vec());
        let e = b64(&key.e().to_vec());
        let jwk = canonical_jwk(&e, &n);
        let thumbprint = b64(&openssl::sha::sha256(jwk.as_bytes()));
        let pkey = PKey::from_rsa(key)?;

        Ok(Self {
            pkey,
            jwk: serde_json::json!({ "e": e, "kty": "RSA", "n": n }),
            thumbprint,
        })
    }
}

/// Builds the canonical JWK encoding used for thumbprinting: keys `e`,
/// `kty`, `n` in that exact lexicographic order, no whitespace. Built by
/// hand rather than via `serde_json::to_string` so the field order never
/// depends on `serde_json`'s internal map representation.
fn canonical_jwk(e: &str, n: &str) -> String {
    format!(
        "{{\"e\":\"{}\",\"kty\":\"RSA\",\"n\":\"{}\"}}",
        e, n
    )
}

impl Signer for RsaAccountKey {
    fn jwk_json(&self) -> serde_json::Value {
        self.jwk.clone()
    }

    fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    fn sign(&self, bytes: &[u8]) -> Result<String> {
        let mut signer = OpensslSigner::new(MessageDigest::sha256(), &self.pkey)?;
        signer.set_rsa_padding(Padding::PKCS1)?;
        signer.update(bytes)?;
        Ok(b64(&signer.sign_to_vec()?))
    }
}
