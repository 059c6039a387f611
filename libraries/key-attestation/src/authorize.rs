//! Acceptance decision for a single attested-key record.
//!
//! A record is emitted only when it is bound to this instance, has not
//! passed its expiry deadline, and carries a signer signature over its
//! exact wire bytes. A caller-supplied fingerprint narrows which accepted
//! keys are emitted; it never short-circuits the checks before signature
//! verification.

use std::fmt;

use base64::prelude::*;
use log::debug;
use ssh_key::{HashAlg, PublicKey};

use crate::chain::SignerPublicKey;
use crate::record::AttestedKeyRecord;

/// Why a record was not accepted. Reported in diagnostics, never to the
/// SSH daemon.
#[derive(Debug, PartialEq, Eq)]
pub enum Rejection {
    MissingInstance,
    InstanceMismatch,
    MissingTimestamp,
    Expired,
    MalformedKey,
    MalformedSignature,
    BadSignature,
    FingerprintMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingInstance => write!(f, "record carries no instance id"),
            Rejection::InstanceMismatch => write!(f, "record is bound to another instance"),
            Rejection::MissingTimestamp => write!(f, "record carries no expiry timestamp"),
            Rejection::Expired => write!(f, "record has expired"),
            Rejection::MalformedKey => write!(f, "record key line does not parse"),
            Rejection::MalformedSignature => write!(f, "record signature is not valid base64"),
            Rejection::BadSignature => write!(f, "record signature does not verify"),
            Rejection::FingerprintMismatch => {
                write!(f, "record key does not match the requested fingerprint")
            }
        }
    }
}

/// A record that passed every check, ready for emission.
#[derive(Debug)]
pub struct AcceptedKey {
    pub key_line: String,
    pub fingerprint: String,
    pub caller: Option<String>,
    pub request_id: Option<String>,
}

/// Apply the full acceptance predicate to one record.
///
/// `now_unix` is compared strictly against the record's `#Timestamp=`
/// value, which is an expiry deadline. The fingerprint filter is evaluated
/// last: a filtered-out record has still had its signature verified.
pub fn authorize_record(
    record: &AttestedKeyRecord,
    signer: &SignerPublicKey,
    instance_id: &str,
    now_unix: i64,
    expected_fingerprint: Option<&str>,
) -> Result<AcceptedKey, Rejection> {
    match record.instance_id.as_deref() {
        None => return Err(Rejection::MissingInstance),
        Some(bound) if bound != instance_id => return Err(Rejection::InstanceMismatch),
        Some(_) => {}
    }

    let deadline = record.timestamp.ok_or(Rejection::MissingTimestamp)?;
    if deadline <= now_unix {
        return Err(Rejection::Expired);
    }

    let key = PublicKey::from_openssh(&record.key_line).map_err(|err| {
        debug!("unparseable key line: {err}");
        Rejection::MalformedKey
    })?;
    let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();

    let signature = BASE64_STANDARD
        .decode(&record.signature_b64)
        .map_err(|_| Rejection::MalformedSignature)?;
    signer
        .verify(&record.signed_data, &signature)
        .map_err(|_| Rejection::BadSignature)?;

    if let Some(expected) = expected_fingerprint {
        if fingerprint != expected {
            return Err(Rejection::FingerprintMismatch);
        }
    }

    Ok(AcceptedKey {
        key_line: record.key_line.clone(),
        fingerprint,
        caller: record.caller.clone(),
        request_id: record.request_id.clone(),
    })
}
