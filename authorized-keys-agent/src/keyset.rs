//! Fetch of the per-user key set: signer certificate chain, OCSP staples,
//! and the attested-key blob.

use anyhow::Context;
use base64::prelude::*;
use fn_error_context::context;
use instance_metadata::ImdsClient;
use key_attestation::{parse_staple_index, OcspStapleSet};
use log::debug;
use reqwest::StatusCode;

const ACTIVE_KEYS_PATH: &str = "/meta-data/managed-ssh-keys/active-keys";
const SIGNER_CERT_PATH: &str = "/meta-data/managed-ssh-keys/signer-cert/";
const SIGNER_OCSP_PATH: &str = "/meta-data/managed-ssh-keys/signer-ocsp/";

/// Whether the user has any active keys at all. A plain existence probe so
/// that nothing else (signer chain included) is fetched for users the
/// service knows nothing about.
pub async fn user_has_active_keys(imds: &ImdsClient, user: &str) -> anyhow::Result<bool> {
    let status = imds
        .head_status(&format!("{ACTIVE_KEYS_PATH}/{user}/"))
        .await?;
    match status {
        StatusCode::OK => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        status => anyhow::bail!("Metadata service answered {status} probing for active keys"),
    }
}

#[context("Error fetching the active keys for {}", user)]
pub async fn fetch_active_keys(imds: &ImdsClient, user: &str) -> anyhow::Result<String> {
    imds.fetch_string(&format!("{ACTIVE_KEYS_PATH}/{user}/"))
        .await?
        .context("The active-keys document disappeared between probe and fetch")
}

#[context("Error fetching the signer certificate chain")]
pub async fn fetch_signer_chain(imds: &ImdsClient) -> anyhow::Result<Vec<u8>> {
    imds.fetch(SIGNER_CERT_PATH)
        .await?
        .context("The metadata service has no signer certificate")
}

/// The staple index names one token per chain certificate; each token is
/// the lowercase hex SHA-1 fingerprint of the certificate it vouches for,
/// and its document is a base64-encoded DER OCSP response.
#[context("Error fetching the OCSP staples")]
pub async fn fetch_staples(imds: &ImdsClient) -> anyhow::Result<OcspStapleSet> {
    let index = imds
        .fetch_string(SIGNER_OCSP_PATH)
        .await?
        .context("The metadata service has no OCSP staple index")?;

    let mut staples = OcspStapleSet::default();
    for token in parse_staple_index(&index) {
        let body = imds
            .fetch_string(&format!("{SIGNER_OCSP_PATH}{token}"))
            .await?
            .with_context(|| format!("The staple {token} vanished from the index"))?;
        let der = BASE64_STANDARD
            .decode(body.trim())
            .with_context(|| format!("The staple {token} is not valid base64"))?;
        staples.insert(token, der);
    }
    debug!("fetched {} OCSP staples", staples.len());
    Ok(staples)
}
