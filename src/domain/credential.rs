//! Ticket identity and the scannable credential payload.
//!
//! Wire format: `base64url(json) "." hex(sha256(json))[..16]`, where the JSON
//! body is `{"v":1,"tid":..,"eid":..,"iat":..}`. Only immutable ticket fields
//! are encoded, so the payload for a given ticket never changes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const CREDENTIAL_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 16;
/// Tolerated clock drift for payloads stamped slightly in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Malformed credential: {0}")]
    Malformed(String),
    #[error("Credential checksum mismatch")]
    ChecksumMismatch,
    #[error("Unsupported credential version {0}")]
    UnsupportedVersion(u8),
    #[error("Credential expired (issued {issued_at})")]
    Expired { issued_at: DateTime<Utc> },
    #[error("Credential issued in the future ({issued_at})")]
    IssuedInFuture { issued_at: DateTime<Utc> },
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialBody {
    v: u8,
    tid: Uuid,
    eid: Uuid,
    iat: i64,
}

/// Decoded, validated credential contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedCredential {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

pub fn new_ticket_identity() -> Uuid {
    Uuid::new_v4()
}

pub fn encode_credential(ticket_id: Uuid, event_id: Uuid, issued_at: DateTime<Utc>) -> String {
    let body = CredentialBody {
        v: CREDENTIAL_VERSION,
        tid: ticket_id,
        eid: event_id,
        iat: issued_at.timestamp(),
    };
    // Serializing a struct of plain fields cannot fail.
    let json = serde_json::to_vec(&body).unwrap_or_default();
    format!("{}.{}", URL_SAFE_NO_PAD.encode(&json), checksum(&json))
}

pub fn decode_and_validate(
    payload: &str,
    now: DateTime<Utc>,
    max_age: Option<Duration>,
) -> Result<ValidatedCredential, CredentialError> {
    let (encoded, sum) = payload
        .trim()
        .split_once('.')
        .ok_or_else(|| CredentialError::Malformed("missing checksum separator".to_string()))?;
    if encoded.is_empty() || sum.len() != CHECKSUM_LEN {
        return Err(CredentialError::Malformed(
            "incomplete credential".to_string(),
        ));
    }

    let json = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CredentialError::Malformed(format!("invalid base64: {e}")))?;
    if checksum(&json) != sum {
        return Err(CredentialError::ChecksumMismatch);
    }

    let body: CredentialBody = serde_json::from_slice(&json)
        .map_err(|e| CredentialError::Malformed(format!("invalid body: {e}")))?;
    if body.v != CREDENTIAL_VERSION {
        return Err(CredentialError::UnsupportedVersion(body.v));
    }
    if body.tid.is_nil() || body.eid.is_nil() {
        return Err(CredentialError::Malformed("nil identifier".to_string()));
    }

    let issued_at = Utc
        .timestamp_opt(body.iat, 0)
        .single()
        .ok_or_else(|| CredentialError::Malformed("invalid issue timestamp".to_string()))?;
    if issued_at - now > Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(CredentialError::IssuedInFuture { issued_at });
    }
    if let Some(max_age) = max_age {
        if now - issued_at > max_age {
            return Err(CredentialError::Expired { issued_at });
        }
    }

    Ok(ValidatedCredential {
        ticket_id: body.tid,
        event_id: body.eid,
        issued_at,
    })
}

fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(CHECKSUM_LEN);
    hex
}
