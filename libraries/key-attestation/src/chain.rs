//! Signer certificate chain validation.
//!
//! The metadata service delivers the chain as concatenated PEM, leaf first.
//! The leaf must carry the expected Common Name, the chain must build to an
//! anchor in the local trust store under strict path validation, and every
//! chain element below the first trusted one must present a `good` OCSP
//! staple. Only then is the leaf's public key released for record
//! verification.

use anyhow::{anyhow, ensure, Context};
use fn_error_context::context;
use log::{debug, info};
use ring::signature::{UnparsedPublicKey, RSA_PSS_2048_8192_SHA256};
use x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION;
use x509_parser::pem::Pem;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::time::ASN1Time;

use crate::ocsp::{check_staple, OcspStapleSet};
use crate::trust_store::TrustStore;

/// Lowercase hex SHA-1 fingerprint of a DER certificate. This is the key
/// under which OCSP staples are published and one leg of the trust-store
/// containment tuple.
pub fn sha1_fingerprint(der: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, der);
    hex::encode(digest.as_ref())
}

/// Public key of a validated signer leaf. Record signatures are RSA-PSS
/// with SHA-256 and a 32 byte salt over the record's signed bytes.
#[derive(Debug)]
pub struct SignerPublicKey(UnparsedPublicKey<Vec<u8>>);

impl SignerPublicKey {
    /// Build from the PKCS#1 `RSAPublicKey` encoding (the bit-string
    /// contents of an RSA SubjectPublicKeyInfo).
    pub fn from_pkcs1_der(der: Vec<u8>) -> Self {
        Self(UnparsedPublicKey::new(&RSA_PSS_2048_8192_SHA256, der))
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> anyhow::Result<()> {
        self.0
            .verify(message, signature)
            .map_err(|_| anyhow!("Bad record signature"))
    }
}

fn leaf_common_name<'a>(cert: &'a X509Certificate<'a>) -> anyhow::Result<&'a str> {
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .context("The signer leaf has no Common Name")?;
    cn.as_str()
        .context("The signer leaf Common Name is not a string")
}

fn subject_of(cert: &X509Certificate<'_>) -> String {
    cert.subject().to_string()
}

/// Split concatenated PEM into DER certificates in on-wire order.
pub fn split_pem_chain(pem: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut ders = Vec::new();
    for block in Pem::iter_from_buffer(pem) {
        let block = block.context("Error parsing a PEM block of the signer chain")?;
        ensure!(
            block.label == "CERTIFICATE",
            "Unexpected {} block in the signer chain",
            block.label
        );
        ders.push(block.contents);
    }
    ensure!(!ders.is_empty(), "The signer chain contains no certificates");
    Ok(ders)
}

/// Validate the signer chain and return the leaf public key.
///
/// `now_unix` is the single time observation the whole invocation uses for
/// certificate windows and staple windows.
#[context("Signer chain validation failed")]
pub fn verify_signer_chain(
    pem: &[u8],
    store: &TrustStore,
    expected_cn: &str,
    staples: &OcspStapleSet,
    now_unix: i64,
) -> anyhow::Result<SignerPublicKey> {
    let ders = split_pem_chain(pem)?;
    let certs = ders
        .iter()
        .map(|der| {
            X509Certificate::from_der(der)
                .map(|(_, cert)| cert)
                .context("Error parsing a signer chain certificate")
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let leaf_cn = leaf_common_name(&certs[0])?;
    ensure!(
        leaf_cn == expected_cn,
        "Signer Common Name {leaf_cn:?} does not match the expected {expected_cn:?}"
    );

    validate_path(&ders, &certs, store, now_unix)?;
    validate_staples(&ders, &certs, store, staples, now_unix)?;

    let spki = certs[0].public_key();
    ensure!(
        spki.algorithm.algorithm == OID_PKCS1_RSAENCRYPTION,
        "The signer key is not an RSA key"
    );
    info!("signer chain for {leaf_cn} validated");
    Ok(SignerPublicKey::from_pkcs1_der(
        spki.subject_public_key.data.to_vec(),
    ))
}

/// Strict path validation of the leaf: validity windows, key usage, basic
/// constraints, issuer/subject chaining, and the signature of every
/// certificate under its issuer's key. The walk stops at the first chain
/// element the trust store already contains; when none is, the last chain
/// element must verify against a trust-store anchor.
fn validate_path(
    ders: &[Vec<u8>],
    certs: &[X509Certificate<'_>],
    store: &TrustStore,
    now_unix: i64,
) -> anyhow::Result<()> {
    let now = ASN1Time::from_timestamp(now_unix).context("Current time is not representable")?;

    for (i, cert) in certs.iter().enumerate() {
        ensure!(
            cert.validity().is_valid_at(now),
            "Certificate {} is outside its validity window",
            subject_of(cert)
        );

        if store.contains(&ders[i], cert) {
            // Everything from here toward the root is implicitly trusted.
            debug!("chain element {} found in the trust store", subject_of(cert));
            return Ok(());
        }

        if i == 0 {
            if let Some(key_usage) = cert.key_usage()? {
                ensure!(
                    key_usage.value.digital_signature(),
                    "The signer leaf is not a signing certificate"
                );
            }
        } else {
            let constraints = cert
                .basic_constraints()?
                .with_context(|| format!("{} has no basic constraints", subject_of(cert)))?;
            ensure!(
                constraints.critical && constraints.value.ca,
                "{} is not a CA certificate",
                subject_of(cert)
            );
            if let Some(path_len) = constraints.value.path_len_constraint {
                ensure!(
                    i - 1 <= path_len as usize,
                    "Chain exceeds the path length constraint of {}",
                    subject_of(cert)
                );
            }
            if let Some(key_usage) = cert.key_usage()? {
                ensure!(
                    key_usage.value.key_cert_sign(),
                    "{} may not sign certificates",
                    subject_of(cert)
                );
            }
        }

        match certs.get(i + 1) {
            Some(issuer) => {
                ensure!(
                    cert.issuer() == issuer.subject(),
                    "{} is not issued by the next chain element",
                    subject_of(cert)
                );
                cert.verify_signature(Some(issuer.public_key()))
                    .with_context(|| {
                        format!("The signature of {} does not verify", subject_of(cert))
                    })?;
            }
            None => {
                // Top of the chain and still untrusted: it must be issued
                // directly by a trust-store anchor.
                let anchor = store
                    .find_issuer(cert.issuer().as_raw())
                    .with_context(|| {
                        format!("No trusted issuer for chain top {}", subject_of(cert))
                    })?;
                let (_, anchor_cert) = X509Certificate::from_der(&anchor.der)
                    .context("Error parsing a trust store anchor")?;
                ensure!(
                    anchor_cert.validity().is_valid_at(now),
                    "Trust anchor {} is outside its validity window",
                    subject_of(&anchor_cert)
                );
                cert.verify_signature(Some(anchor_cert.public_key()))
                    .with_context(|| {
                        format!("The signature of {} does not verify", subject_of(cert))
                    })?;
            }
        }
    }

    Ok(())
}

/// Revocation: walk leaf-up until the first trust-store element; every
/// earlier certificate needs a staple keyed by its SHA-1 fingerprint,
/// signed by the next chain element, with status `good`.
fn validate_staples(
    ders: &[Vec<u8>],
    certs: &[X509Certificate<'_>],
    store: &TrustStore,
    staples: &OcspStapleSet,
    now_unix: i64,
) -> anyhow::Result<()> {
    for (i, cert) in certs.iter().enumerate() {
        if store.contains(&ders[i], cert) {
            return Ok(());
        }

        let fingerprint = sha1_fingerprint(&ders[i]);
        let staple = staples.get(&fingerprint).with_context(|| {
            format!("No OCSP staple for {} ({fingerprint})", subject_of(cert))
        })?;
        let issuer = certs.get(i + 1).with_context(|| {
            format!("No issuer available to check the staple of {}", subject_of(cert))
        })?;
        check_staple(staple, cert, issuer, now_unix)
            .with_context(|| format!("OCSP check failed for {}", subject_of(cert)))?;
        debug!("OCSP status good for {}", subject_of(cert));
    }
    Ok(())
}
