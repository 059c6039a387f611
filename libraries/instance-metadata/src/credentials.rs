use anyhow::Context;
use fn_error_context::context;
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::client::ImdsClient;

const ROLE_CREDENTIALS_PATH: &str =
    "/meta-data/identity-credentials/ec2/security-credentials/ec2-instance/";
const IDENTITY_DOCUMENT_PATH: &str = "/dynamic/instance-identity/document";

/// Temporary instance-identity credentials handed out by the metadata
/// service. The secret and token are wiped from memory when the value is
/// dropped, on every exit path including panics.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "PascalCase")]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub token: String,
}

/// The subset of the signed instance-identity document the publisher needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentityDocument {
    pub account_id: String,
}

#[context("Error fetching instance-identity credentials")]
pub async fn fetch_role_credentials(imds: &ImdsClient) -> anyhow::Result<RoleCredentials> {
    let body = imds
        .fetch(ROLE_CREDENTIALS_PATH)
        .await?
        .context("Metadata service has no instance-identity credentials")?;
    serde_json::from_slice(&body).context("Error parsing the identity-credentials document")
}

#[context("Error fetching the instance-identity document")]
pub async fn fetch_identity_document(
    imds: &ImdsClient,
) -> anyhow::Result<InstanceIdentityDocument> {
    let body = imds
        .fetch(IDENTITY_DOCUMENT_PATH)
        .await?
        .context("Metadata service has no instance-identity document")?;
    serde_json::from_slice(&body).context("Error parsing the instance-identity document")
}
