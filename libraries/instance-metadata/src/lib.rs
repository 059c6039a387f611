//! Client for the EC2 instance metadata service and the identity checks
//! built on top of it.
//!
//! Everything in this crate is scoped to a single short-lived invocation:
//! the HTTP client is built fresh, nothing is cached, and credential
//! material is wiped when dropped.

pub mod client;
pub mod credentials;
pub mod identity;

pub use client::ImdsClient;
pub use credentials::{InstanceIdentityDocument, RoleCredentials};
pub use identity::{resolve_identity, HostProbe, InstanceIdentity};
