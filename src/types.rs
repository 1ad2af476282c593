//! Wire types for the subset of RFC 8555 this driver speaks: camelCase on
//! the wire, snake_case in Rust via `serde(rename_all)`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The directory document fetched once at session start. Only the three
/// URLs this driver uses are modeled; other keys (`revokeCert`,
/// `keyChange`, …) are ignored rather than rejected.
#[derive(Debug, Clone)]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
}

impl Directory {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let field = |name: &'static str| -> Result<String> {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .ok_or(Error::MissingDirectoryField(name))
        };

        Ok(Self {
            new_nonce: field("newNonce")?,
            new_account: field("newAccount")?,
            new_order: field("newOrder")?,
        })
    }
}

/// The ACME identifier type this driver issues for: always `dns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(name: &str) -> Self {
        Self {
            kind: "dns".to_string(),
            value: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// `{ status, identifiers, authorizations[], finalize, certificate? }`
/// (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,
    pub identifiers: Vec<Identifier>,
    pub authorizations: Vec<String>,
    pub finalize: String,
    pub certificate: Option<String>,
}

/// `{ status, identifier, challenges[] }` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub status: AuthorizationStatus,
    pub identifier: Identifier,
    pub challenges: Vec<Challenge>,
}

/// `{ type, url, token, status }` (spec §3). Supported `type` values are
/// `http-01` and `dns-01`; others may appear on the wire and are simply
/// skipped during challenge selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub token: String,
    pub status: ChallengeStatus,
}

/// The account resource returned by `newAccount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub status: String,
    #[serde(default)]
    pub contact: Option<Vec<String>>,
}

/// The challenge type a caller asks the driver to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Http01,
    Dns01,
}

impl ChallengeType {
    pub fn wire_name(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
        }
    }
}
