//! OpenPGP identities backed by remote keys
//!
//! This crate lets a non-exportable key held by a key-management service
//! act as the primary key of an OpenPGP certificate.  The private key
//! never leaves the service: every signature Sequoia needs is computed by
//! sending a pre-hashed digest to the remote side.
//!
//! The pipeline has two halves:
//!
//!   - [`RemoteSigner`] adapts a "sign this digest" RPC
//!     ([`SigningTransport`]) to Sequoia's [`Signer`] contract,
//!   - [`Converter`] wraps an [`Entity`] built around that signer, and
//!     exports a self-certified public key or signs data in detached,
//!     clear-signed, or inline form.
//!
//! Two transports are provided: [`dsm::DsmBackend`] talks to Fortanix
//! DSM, [`LocalTransport`] keeps the key in memory.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use openpgp_kms::{dsm, Converter, Entity, SignContext};
//! use std::time::Duration;
//!
//! let backend = dsm::DsmBackend::new(dsm::Credentials::new_from_env()?);
//! let context = SignContext::new().with_timeout(Duration::from_secs(30));
//! let entity = Entity::open(backend, "release-key", context)?;
//!
//! let mut converter = Converter::new(entity);
//! let cert = converter.export("Release Team", "", "release@example.org", true)?;
//! let sig = converter.sign(&b"artifact"[..], false, true, true)?;
//! # let _ = (cert, sig);
//! # Ok(()) }
//! ```
//!
//!   [`Signer`]: sequoia_openpgp::crypto::Signer

mod converter;
mod der;
pub mod dsm;
mod error;
mod key;
mod local;
mod signer;

pub use crate::converter::{
    user_id, Converter, Entity, FileHints, Identity, SignMode,
};
pub use crate::error::{Error, Result};
pub use crate::key::{KeyDiscovery, RemoteKey};
pub use crate::local::LocalTransport;
pub use crate::signer::{
    CancelToken, RemoteSigner, SignContext, SigningAlgorithm,
    SigningCapability, SigningTransport,
};
