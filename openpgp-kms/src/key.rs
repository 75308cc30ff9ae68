use std::sync::Arc;
use std::time::SystemTime;

use sequoia_openpgp::crypto::mpi;
use sequoia_openpgp::packet::key::{Key4, PublicParts, UnspecifiedRole};
use sequoia_openpgp::packet::Key;

use crate::der;
use crate::signer::{SignContext, SigningAlgorithm};
use crate::{Error, Result};

/// Public material of a remote key, as reported by the key service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteKey {
    /// Identifier used to address the key in signing requests.
    pub key_id: String,
    /// DER-encoded SubjectPublicKeyInfo.
    pub spki: Vec<u8>,
    /// Creation time recorded by the key service.  OpenPGP fingerprints
    /// and binding signatures depend on it, so it has to be reproduced
    /// exactly on every run.
    pub creation_time: SystemTime,
}

/// Looks up the public half of a remote key.
///
/// Implementations must honor [`SignContext::remaining`] as their I/O
/// budget, like [`SigningTransport`] does.
///
///   [`SigningTransport`]: crate::SigningTransport
pub trait KeyDiscovery {
    fn discover(&self, key_id: &str, context: &SignContext)
        -> anyhow::Result<RemoteKey>;
}

impl<T: KeyDiscovery + ?Sized> KeyDiscovery for Arc<T> {
    fn discover(&self, key_id: &str, context: &SignContext)
        -> anyhow::Result<RemoteKey>
    {
        (**self).discover(key_id, context)
    }
}

impl RemoteKey {
    /// Converts the key into an OpenPGP v4 public key for `algorithm`.
    pub fn to_public_key(&self, algorithm: SigningAlgorithm)
        -> Result<Key<PublicParts, UnspecifiedRole>>
    {
        let malformed = |reason: String| Error::MalformedPublicKey {
            key: self.key_id.clone(),
            reason,
        };

        let (x, y) = der::parse::ec_point_x_y(&self.spki)
            .map_err(|e| malformed(e.to_string()))?;

        let curve = algorithm.curve();
        let bits_field = curve.bits()
            .ok_or_else(|| Error::UnsupportedAlgorithm(curve.to_string()))?;
        if x.len() * 8 != bits_field {
            return Err(Error::UnsupportedAlgorithm(format!(
                "key {} is not on {} ({}-bit coordinates)",
                self.key_id, curve, x.len() * 8)));
        }

        let point = mpi::MPI::new_point(&x, &y, bits_field);
        let key = Key4::new(
            self.creation_time,
            algorithm.pk_algo(),
            mpi::PublicKey::ECDSA { curve, q: point },
        ).map_err(|e| malformed(e.to_string()))?;

        Ok(key.into())
    }
}
