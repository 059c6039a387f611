//! Boot-time publisher of the instance's SSH host public keys.
//!
//! Confirms the host is a genuine instance, harvests every readable
//! `*.pub` under the host key directory, and POSTs them to the regional
//! key service endpoint in a SigV4-signed request authenticated with the
//! instance-identity credentials from the metadata service.
//!
//! Exit codes: 0 after a successful publish, 255 on any earlier failure.
//! Unlike the authorization agent, this binary has no useful no-op path.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use instance_metadata::credentials::{fetch_identity_document, fetch_role_credentials};
use instance_metadata::{resolve_identity, HostProbe, ImdsClient};
use log::{error, info};
use serde::Serialize;

mod hostkeys;
mod sigv4;

const SERVICE: &str = "ec2-instance-connect";
const PUBLISH_PATH: &str = "/PutEC2HostKeys/";
const AMZ_TARGET: &str =
    "com.amazon.aws.sshaccessproxyservice.AWSEC2InstanceConnectService.PutEC2HostKeys";

/// Publish this instance's SSH host keys to the key service.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the sshd host key pairs.
    #[arg(long, default_value = "/etc/ssh")]
    host_key_dir: PathBuf,
}

#[derive(Serialize)]
struct PutHostKeysRequest<'a> {
    #[serde(rename = "AccountID")]
    account_id: &'a str,
    #[serde(rename = "AvailabilityZone")]
    availability_zone: &'a str,
    #[serde(rename = "HostKeys")]
    host_keys: &'a [String],
    #[serde(rename = "InstanceId")]
    instance_id: &'a str,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(255)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let imds = ImdsClient::new()?;
    let identity = resolve_identity(&imds, &HostProbe::default())
        .await?
        .context("Invoked on a non-instance")?;

    let host_keys = hostkeys::collect_host_keys(&args.host_key_dir)?;
    anyhow::ensure!(!host_keys.is_empty(), "No host keys to publish");

    let document = fetch_identity_document(&imds).await?;
    // Dropped (and wiped) when this function returns, on every path.
    let credentials = fetch_role_credentials(&imds).await?;

    let body = serde_json::to_vec(&PutHostKeysRequest {
        account_id: &document.account_id,
        availability_zone: &identity.availability_zone,
        host_keys: &host_keys,
        instance_id: &identity.instance_id,
    })
    .context("Error encoding the publish request body")?;

    let host = format!("{SERVICE}.{}.{}", identity.region, identity.domain);
    let signed = sigv4::sign(&sigv4::SigningParams {
        access_key_id: &credentials.access_key_id,
        secret_access_key: &credentials.secret_access_key,
        session_token: &credentials.token,
        region: &identity.region,
        service: SERVICE,
        host: &host,
        path: PUBLISH_PATH,
        body: &body,
        time: Utc::now(),
    });

    let client = reqwest::Client::builder()
        .build()
        .context("Error building the publish HTTP client")?;
    let response = client
        .post(format!("https://{host}{PUBLISH_PATH}"))
        .header("Authorization", signed.authorization.as_str())
        .header("Content-Encoding", "amz-1.0")
        .header("Content-Type", "application/json")
        .header("x-amz-content-sha256", signed.content_sha256.as_str())
        .header("x-amz-date", signed.amz_date.as_str())
        .header("x-amz-security-token", credentials.token.as_str())
        .header("x-amz-target", AMZ_TARGET)
        .body(body)
        .send()
        .await
        .context("Error delivering the host keys to the key service")?;

    let status = response.status();
    anyhow::ensure!(status.is_success(), "The key service answered {status}");

    info!(
        "published {} host keys for {}",
        host_keys.len(),
        identity.instance_id
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_body_field_order_is_fixed() -> anyhow::Result<()> {
        // The signature covers the exact bytes, so the field order is part
        // of the wire contract.
        let host_keys = vec!["ssh-ed25519 AAAAC3Nza root@host".to_string()];
        let body = serde_json::to_string(&PutHostKeysRequest {
            account_id: "123456789012",
            availability_zone: "us-east-1a",
            host_keys: &host_keys,
            instance_id: "i-0123456789abcdef0",
        })?;
        assert_eq!(
            body,
            r#"{"AccountID":"123456789012","AvailabilityZone":"us-east-1a","HostKeys":["ssh-ed25519 AAAAC3Nza root@host"],"InstanceId":"i-0123456789abcdef0"}"#
        );
        Ok(())
    }
}
