//! Local CA trust store.
//!
//! The store path is either a directory of PEM files (one or more
//! certificates each) or a single concatenated bundle. Both shapes are
//! normalized into parsed anchors up front; whether a chain certificate is
//! already trusted is then decided by tuple equality of its exact subject
//! encoding, SHA-1 fingerprint, and public key.

use std::fs;
use std::path::Path;

use anyhow::Context;
use fn_error_context::context;
use log::{debug, warn};
use x509_parser::pem::Pem;
use x509_parser::prelude::X509Certificate;

use crate::chain::sha1_fingerprint;

/// One trusted anchor, reduced to the attributes containment and issuer
/// lookup need. The DER is kept so the anchor's key can be re-parsed when
/// it has to verify a chain signature.
pub(crate) struct Anchor {
    pub der: Vec<u8>,
    pub subject_der: Vec<u8>,
    pub fingerprint: String,
    pub spki_der: Vec<u8>,
}

pub struct TrustStore {
    anchors: Vec<Anchor>,
}

impl TrustStore {
    /// Load every certificate under `path`, which is either a directory of
    /// PEM files or one concatenated bundle file. Unparseable entries are
    /// skipped with a warning; system stores routinely carry non-certificate
    /// files next to the CAs.
    #[context("Error loading the trust store at {:?}", path)]
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut anchors = Vec::new();

        if path.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(path)
                .with_context(|| format!("Error listing the trust store directory {path:?}"))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            for file in entries {
                match fs::read(&file) {
                    Ok(contents) => collect_pem_anchors(&contents, &mut anchors),
                    Err(err) => warn!("skipping unreadable trust store file {file:?}: {err}"),
                }
            }
        } else {
            let contents = fs::read(path)
                .with_context(|| format!("Error reading the trust store bundle {path:?}"))?;
            collect_pem_anchors(&contents, &mut anchors);
        }

        anyhow::ensure!(!anchors.is_empty(), "The trust store at {path:?} is empty");
        debug!("loaded {} trust anchors from {path:?}", anchors.len());
        Ok(Self { anchors })
    }

    /// Whether the store already contains this certificate: same subject
    /// encoding, same SHA-1 fingerprint, same public key.
    pub fn contains(&self, der: &[u8], cert: &X509Certificate<'_>) -> bool {
        let fingerprint = sha1_fingerprint(der);
        let subject = cert.subject().as_raw();
        let spki = cert.public_key().raw;
        self.anchors.iter().any(|anchor| {
            anchor.subject_der == subject
                && anchor.fingerprint == fingerprint
                && anchor.spki_der == spki
        })
    }

    /// Anchor whose subject equals the given issuer encoding, if any.
    pub(crate) fn find_issuer(&self, issuer_der: &[u8]) -> Option<&Anchor> {
        self.anchors
            .iter()
            .find(|anchor| anchor.subject_der == issuer_der)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

fn collect_pem_anchors(contents: &[u8], anchors: &mut Vec<Anchor>) {
    for pem in Pem::iter_from_buffer(contents) {
        let pem = match pem {
            Ok(pem) if pem.label == "CERTIFICATE" => pem,
            Ok(_) => continue,
            Err(err) => {
                warn!("skipping malformed PEM block in trust store: {err}");
                continue;
            }
        };
        match pem.parse_x509() {
            Ok(cert) => anchors.push(Anchor {
                subject_der: cert.subject().as_raw().to_vec(),
                fingerprint: sha1_fingerprint(&pem.contents),
                spki_der: cert.public_key().raw.to_vec(),
                der: pem.contents.clone(),
            }),
            Err(err) => warn!("skipping unparseable certificate in trust store: {err}"),
        }
    }
}
