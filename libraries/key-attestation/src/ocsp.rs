//! OCSP staple handling.
//!
//! Staples arrive out of band from the metadata service: an index of
//! tokens, each token the lowercase hex SHA-1 fingerprint of one chain
//! certificate, and one base64-encoded DER OCSP response per token. A
//! staple is honored when the response verifies under the certificate's
//! issuer (no nonce), covers the certificate's serial, is inside its update
//! window, and reports `good`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, SHA_256_WITH_RSA_ENCRYPTION,
    SHA_384_WITH_RSA_ENCRYPTION,
};
use der::{Decode, Encode};
use fn_error_context::context;
use ring::signature::{
    UnparsedPublicKey, ECDSA_P256_SHA256_ASN1, ECDSA_P384_SHA384_ASN1,
    RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_2048_8192_SHA384,
};
use x509_ocsp::{BasicOcspResponse, CertStatus, OcspResponse, OcspResponseStatus};
use x509_parser::prelude::X509Certificate;

/// Staples keyed by the lowercase hex SHA-1 fingerprint of the certificate
/// they vouch for.
#[derive(Default)]
pub struct OcspStapleSet {
    staples: HashMap<String, Vec<u8>>,
}

impl OcspStapleSet {
    pub fn insert(&mut self, fingerprint: String, response_der: Vec<u8>) {
        self.staples.insert(fingerprint, response_der);
    }

    pub fn get(&self, fingerprint: &str) -> Option<&[u8]> {
        self.staples.get(fingerprint).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.staples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staples.is_empty()
    }
}

/// Tokens of the staple index: one per line, blanks ignored.
pub fn parse_staple_index(index: &str) -> Vec<String> {
    index
        .lines()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check one staple: DER OCSP response `staple` must be a successful
/// response signed by `issuer`, covering `cert`'s serial, currently inside
/// its update window, with status `good`.
#[context("OCSP staple rejected")]
pub fn check_staple(
    staple: &[u8],
    cert: &X509Certificate<'_>,
    issuer: &X509Certificate<'_>,
    now_unix: i64,
) -> anyhow::Result<()> {
    let response = OcspResponse::from_der(staple).context("Error parsing the OCSP response")?;
    ensure!(
        response.response_status == OcspResponseStatus::Successful,
        "OCSP response status is {:?}",
        response.response_status
    );

    let basic = BasicOcspResponse::from_der(
        response
            .response_bytes
            .context("The OCSP response carries no response bytes")?
            .response
            .as_bytes(),
    )
    .context("Error parsing the basic OCSP response")?;

    verify_response_signature(&basic, issuer)?;

    let serial = strip_leading_zeros(cert.raw_serial());
    let single = basic
        .tbs_response_data
        .responses
        .iter()
        .find(|single| strip_leading_zeros(single.cert_id.serial_number.as_bytes()) == serial)
        .context("The OCSP response does not cover this certificate")?;

    let now = Duration::from_secs(now_unix as u64);
    let this_update = single.this_update.0.to_unix_duration();
    ensure!(this_update <= now, "The OCSP response is not yet valid");
    if let Some(next_update) = &single.next_update {
        ensure!(
            now <= next_update.0.to_unix_duration(),
            "The OCSP response has expired"
        );
    }

    match &single.cert_status {
        CertStatus::Good(_) => Ok(()),
        CertStatus::Revoked(info) => {
            bail!(
                "The certificate is revoked (reason: {:?})",
                info.revocation_reason
            )
        }
        CertStatus::Unknown(_) => bail!("The certificate's revocation status is unknown"),
    }
}

/// Signature of the response data under the issuer key. The algorithm is
/// taken from the response itself; anything outside the RSA/ECDSA SHA-2
/// family the signer service uses is rejected.
fn verify_response_signature(
    basic: &BasicOcspResponse,
    issuer: &X509Certificate<'_>,
) -> anyhow::Result<()> {
    let oid = basic.signature_algorithm.oid;
    let algorithm: &'static dyn ring::signature::VerificationAlgorithm =
        if oid == SHA_256_WITH_RSA_ENCRYPTION {
            &RSA_PKCS1_2048_8192_SHA256
        } else if oid == SHA_384_WITH_RSA_ENCRYPTION {
            &RSA_PKCS1_2048_8192_SHA384
        } else if oid == ECDSA_WITH_SHA_256 {
            &ECDSA_P256_SHA256_ASN1
        } else if oid == ECDSA_WITH_SHA_384 {
            &ECDSA_P384_SHA384_ASN1
        } else {
            bail!("Unsupported OCSP signature algorithm {oid}")
        };

    let message = basic
        .tbs_response_data
        .to_der()
        .context("Error re-encoding the OCSP response data")?;
    let signature = basic
        .signature
        .as_bytes()
        .context("The OCSP signature is not byte-aligned")?;

    let issuer_key = issuer.public_key().subject_public_key.data.as_ref();
    UnparsedPublicKey::new(algorithm, issuer_key)
        .verify(&message, signature)
        .map_err(|_| anyhow::anyhow!("The OCSP response is not signed by the issuer"))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Test-only construction of signed OCSP responses, shared with the chain
/// verifier's tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use der::asn1::{BitString, GeneralizedTime, Null, OctetString};
    use p256::ecdsa::signature::Signer;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::spki::AlgorithmIdentifierOwned;
    use x509_ocsp::{
        CertId, OcspGeneralizedTime, ResponderId, ResponseBytes, ResponseData, SingleResponse,
    };

    use super::*;

    pub(crate) fn generalized(unix: i64) -> anyhow::Result<OcspGeneralizedTime> {
        Ok(OcspGeneralizedTime(GeneralizedTime::from_unix_duration(
            Duration::from_secs(unix as u64),
        )?))
    }

    /// A successful, `p256`-signed OCSP response for `cert`, to be keyed by
    /// `cert`'s fingerprint. `issuer_key` must be the key behind `issuer`'s
    /// certificate for the staple to verify.
    pub(crate) fn build_staple(
        cert: &X509Certificate<'_>,
        issuer: &X509Certificate<'_>,
        issuer_key: &p256::ecdsa::SigningKey,
        status: CertStatus,
        now_unix: i64,
    ) -> anyhow::Result<Vec<u8>> {
        let sha1 = |data: &[u8]| {
            ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data)
                .as_ref()
                .to_vec()
        };

        let cert_id = CertId {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ID_SHA_1,
                parameters: None,
            },
            issuer_name_hash: OctetString::new(sha1(issuer.subject().as_raw()))?,
            issuer_key_hash: OctetString::new(sha1(
                issuer.public_key().subject_public_key.data.as_ref(),
            ))?,
            serial_number: SerialNumber::new(cert.raw_serial())?,
        };

        let tbs = ResponseData {
            version: Default::default(),
            responder_id: ResponderId::ByKey(OctetString::new(sha1(
                issuer.public_key().subject_public_key.data.as_ref(),
            ))?),
            produced_at: generalized(now_unix - 600)?,
            responses: vec![SingleResponse {
                cert_id,
                cert_status: status,
                this_update: generalized(now_unix - 600)?,
                next_update: Some(generalized(now_unix + 7 * 24 * 3600)?),
                single_extensions: None,
            }],
            response_extensions: None,
        };

        let signature: p256::ecdsa::Signature = issuer_key.sign(&tbs.to_der()?);
        let basic = BasicOcspResponse {
            tbs_response_data: tbs,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_256,
                parameters: None,
            },
            signature: BitString::from_bytes(signature.to_der().as_bytes())?,
            certs: None,
        };

        let response = OcspResponse {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: const_oid::db::rfc6960::ID_PKIX_OCSP_BASIC,
                response: OctetString::new(basic.to_der()?)?,
            }),
        };
        Ok(response.to_der()?)
    }

    pub(crate) fn good() -> CertStatus {
        CertStatus::Good(Null)
    }

    pub(crate) fn revoked(at_unix: i64) -> anyhow::Result<CertStatus> {
        Ok(CertStatus::Revoked(x509_ocsp::RevokedInfo {
            revocation_time: generalized(at_unix)?,
            revocation_reason: None,
        }))
    }
}
