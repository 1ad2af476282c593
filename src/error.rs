use std::io;
use thiserror::Error;

use openssl::error::ErrorStack;
use reqwest::header::ToStrError;

#[derive(Error, Debug)]
pub enum Error {
    // RFC 7807 problem types the CA may report via `type`. Recognized subset;
    // anything else falls back to `UnexpectedStatus`.
    #[error("Account does not exist")]
    AccountDoesNotExist,
    #[error("Certificate has already been revoked")]
    AlreadyRevokedCertificate,
    #[error("The CSR is unacceptable")]
    BadCsr,
    #[error("Unacceptable anti-replay nonce")]
    BadNonce,
    #[error("Server does not support the provided public key")]
    BadPublicKey,
    #[error("Revocation reason provided is not allowed")]
    BadRevocationReason,
    #[error("Signing with an algorithm not supported by the server")]
    BadSignatureAlgorithm,
    #[error("CAA records forbid the CA from issuing a certificate")]
    CaaError,
    #[error("Specific error conditions are indicated in the \"subproblems\" array")]
    Compound,
    #[error("Server could not connect to validation target")]
    Connection,
    #[error("Problem with a DNS query")]
    DnsError,
    #[error("The request must include a value for the \"externalAccountBinding\" field")]
    ExternalAccountRequired,
    #[error("Response received didn't match the challenge's requirements")]
    IncorrectResponse,
    #[error("Invalid contact URL for account")]
    InvalidContact,
    #[error("The request message was malformed")]
    MalformedRequest,
    #[error("Cannot finalize an order that is not ready to be finalized")]
    OrderNotReady,
    #[error("Exceeds rate limit")]
    RateLimited,
    #[error("Server will not issue certificates for the identifier")]
    RejectedIdentifier,
    #[error("Internal server error")]
    InternalServerError,
    #[error("TLS error during validation")]
    TlsError,
    #[error("Insufficient authorization")]
    Unauthorized,
    #[error("Unsupported contact URL scheme")]
    UnsupportedContact,
    #[error("Unsupported identifier type")]
    UnsupportedIdentifier,
    #[error("Visit the \"instance\" URL and take the actions specified there")]
    UserActionRequired,

    // Structural / protocol errors specific to this driver.
    #[error("Directory response is missing field `{0}`")]
    MissingDirectoryField(&'static str),
    #[error("Response from {0} is missing a Replay-Nonce header")]
    MissingNonceHeader(String),
    #[error("Response from {0} is missing a Location header")]
    MissingLocationHeader(String),
    #[error("No challenge of type `{0}` was offered for {1}")]
    NoMatchingChallenge(&'static str, String),
    #[error("Hook `{verb}` failed: {message}")]
    HookFailed { verb: &'static str, message: String },
    #[error("Timed out waiting for {url} to leave its pending state")]
    PollingTimeout { url: String },
    #[error("Exhausted badNonce retries for {purpose} against {url}")]
    BadNonceRetriesExhausted { purpose: String, url: String },
    #[error("Unexpected response for {purpose} at {url}: status {status:?}, body {body}")]
    UnexpectedStatus {
        purpose: String,
        url: String,
        /// `None` for failures this driver detects itself (a non-JSON body,
        /// an order that finalized into `invalid`) rather than from the
        /// HTTP status code of a CA response.
        status: Option<u16>,
        body: String,
    },

    #[error("Error reading the string: {0}")]
    FromUtf8Error(#[from] std::str::Utf8Error),
    #[error("Error in reqwest: {0}")]
    FromReqwestError(#[from] reqwest::Error),
    #[error("Error in openssl: {0}")]
    FromRsaError(#[from] ErrorStack),
    #[error("Error while de/encoding json: {0}")]
    FromSerdeError(#[from] serde_json::Error),
    #[error("Error writing header value: {0}")]
    FromToStrError(#[from] ToStrError),
    #[error("IO error: {0}")]
    FromIoError(#[from] io::Error),
}

impl Error {
    /// Maps an RFC 7807 `type` URN suffix (the part after
    /// `urn:ietf:params:acme:error:`) to a recognized variant, if any.
    pub(crate) fn from_problem_type(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "accountDoesNotExist" => Error::AccountDoesNotExist,
            "alreadyRevoked" => Error::AlreadyRevokedCertificate,
            "badCSR" => Error::BadCsr,
            "badNonce" => Error::BadNonce,
            "badPublicKey" => Error::BadPublicKey,
            "badRevocationReason" => Error::BadRevocationReason,
            "badSignatureAlgorithm" => Error::BadSignatureAlgorithm,
            "caa" => Error::CaaError,
            "compound" => Error::Compound,
            "connection" => Error::Connection,
            "dns" => Error::DnsError,
            "externalAccountRequired" => Error::ExternalAccountRequired,
            "incorrectResponse" => Error::IncorrectResponse,
            "invalidContact" => Error::InvalidContact,
            "malformed" => Error::MalformedRequest,
            "orderNotReady" => Error::OrderNotReady,
            "rateLimited" => Error::RateLimited,
            "rejectedIdentifier" => Error::RejectedIdentifier,
            "serverInternal" => Error::InternalServerError,
            "tls" => Error::TlsError,
            "unauthorized" => Error::Unauthorized,
            "unsupportedContact" => Error::UnsupportedContact,
            "unsupportedIdentifier" => Error::UnsupportedIdentifier,
            "userActionRequired" => Error::UserActionRequired,
            _ => return None,
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
