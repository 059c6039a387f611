//! Verification pipeline for operator-pushed, short-lived SSH keys.
//!
//! The pipeline runs leaf-first over material fetched from the instance
//! metadata service: the signer certificate chain is validated against the
//! local trust store ([`chain`]), every non-trusted chain element must carry
//! a `good` OCSP staple ([`ocsp`]), the attested-key blob is tokenized into
//! records ([`record`]), and each record is accepted or rejected against the
//! signer key, the local instance identity, and its expiry deadline
//! ([`authorize`]).
//!
//! Everything is fail-closed: any undecidable step rejects the whole
//! invocation rather than widening SSH trust.

pub mod authorize;
pub mod chain;
pub mod ocsp;
pub mod record;
pub mod trust_store;

pub use authorize::{authorize_record, AcceptedKey, Rejection};
pub use chain::{sha1_fingerprint, verify_signer_chain, SignerPublicKey};
pub use ocsp::{parse_staple_index, OcspStapleSet};
pub use record::{records, AttestedKeyRecord};
pub use trust_store::TrustStore;
