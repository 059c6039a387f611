//! Per-connection authorization agent for managed, short-lived SSH keys.
//!
//! Invoked by sshd (`AuthorizedKeysCommand`) with the target user name and
//! optionally the connecting key's fingerprint. The agent confirms the host
//! is a genuine instance, fetches the signer certificate chain, its OCSP
//! staples, and the user's attested-key blob from the metadata service,
//! validates the chain against the local trust store, and emits every
//! attested key that verifies, is bound to this instance, and has not
//! expired.
//!
//! Exit codes: 0 on success or clean no-op (non-instance, unknown user, no
//! active keys), 1 when the user argument is missing, 255 on any hard
//! failure. Nothing is ever written to stdout unless at least one key was
//! accepted.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use instance_metadata::{resolve_identity, HostProbe, ImdsClient};
use key_attestation::{authorize_record, records, verify_signer_chain, TrustStore};
use log::{debug, error, info, warn};
use nix::unistd::User;

mod keyset;

const EXIT_HARD_FAILURE: u8 = 255;
const EXIT_MISSING_USER: u8 = 1;

/// Emit the managed SSH keys a user is currently authorized with.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Local user the SSH daemon is authorizing.
    user: Option<String>,

    /// Only emit the key with this fingerprint (as reported by sshd %f).
    fingerprint: Option<String>,

    /// CA trust store: a directory of PEM files or one bundle file.
    #[arg(long, default_value = "/etc/ssl/certs")]
    trust_store: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_HARD_FAILURE)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let Some(user) = args.user.filter(|user| !user.is_empty()) else {
        error!("no user name supplied");
        return Ok(ExitCode::from(EXIT_MISSING_USER));
    };

    let imds = ImdsClient::new()?;
    let Some(identity) = resolve_identity(&imds, &HostProbe::default()).await? else {
        // Let the daemon fall through to its other key sources.
        info!("invoked on a non-instance");
        return Ok(ExitCode::SUCCESS);
    };

    if User::from_name(&user)?.is_none() {
        info!("unknown local user {user}");
        return Ok(ExitCode::SUCCESS);
    }

    if !keyset::user_has_active_keys(&imds, &user).await? {
        debug!("no active keys for {user}");
        return Ok(ExitCode::SUCCESS);
    }

    let chain_pem = keyset::fetch_signer_chain(&imds).await?;
    let staples = keyset::fetch_staples(&imds).await?;
    let blob = keyset::fetch_active_keys(&imds, &user).await?;

    let store = TrustStore::load(&args.trust_store)?;
    let expected_cn = format!(
        "managed-ssh-signer.{}.{}",
        identity.region, identity.domain
    );
    let now = Utc::now().timestamp();

    let signer = match verify_signer_chain(&chain_pem, &store, &expected_cn, &staples, now) {
        Ok(signer) => signer,
        Err(err) => {
            error!("{err:#}; no keys have been trusted");
            return Ok(ExitCode::from(EXIT_HARD_FAILURE));
        }
    };

    let mut accepted = Vec::new();
    for record in records(&blob) {
        match authorize_record(
            &record,
            &signer,
            &identity.instance_id,
            now,
            args.fingerprint.as_deref(),
        ) {
            Ok(key) => {
                match (&key.request_id, &key.caller) {
                    (Some(request_id), Some(caller)) => info!(
                        "authorized {} for {user} (request {request_id}, caller {caller})",
                        key.fingerprint
                    ),
                    _ => info!("authorized {} for {user}", key.fingerprint),
                }
                accepted.push(key);
            }
            Err(reason) => debug!("record skipped: {reason}"),
        }
    }

    if accepted.is_empty() {
        warn!("no valid keys for {user}");
        return Ok(ExitCode::from(EXIT_HARD_FAILURE));
    }

    // All-or-nothing emission, in wire order.
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for key in &accepted {
        writeln!(out, "{}", key.key_line)?;
    }
    out.flush()?;

    Ok(ExitCode::SUCCESS)
}
