use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::Context;
use sequoia_openpgp::crypto::{mpi, KeyPair, Signer};
use sequoia_openpgp::packet::key::{Key4, SecretParts, UnspecifiedRole};
use sequoia_openpgp::packet::Key;

use crate::der;
use crate::key::{KeyDiscovery, RemoteKey};
use crate::signer::{SignContext, SigningAlgorithm, SigningTransport};

/// A transport whose key lives in process memory.
///
/// It speaks the same wire format as a remote key service (SPKI public
/// keys, DER signatures), which makes it a drop-in replacement for
/// offline runs and tests.
pub struct LocalTransport {
    key_id:  String,
    keypair: Mutex<KeyPair>,
}

impl LocalTransport {
    /// Generates a fresh NIST P-256 key created at `creation_time`.
    pub fn generate<S>(key_id: S, creation_time: SystemTime)
        -> anyhow::Result<Self>
        where S: Into<String>
    {
        let mut key = Key4::<SecretParts, UnspecifiedRole>::generate_ecc(
            true, SigningAlgorithm::EcdsaP256Sha256.curve())?;
        key.set_creation_time(creation_time)?;
        Self::from_keypair(key_id, Key::from(key).into_keypair()?)
    }

    /// Wraps an existing key pair.
    pub fn from_keypair<S>(key_id: S, keypair: KeyPair)
        -> anyhow::Result<Self>
        where S: Into<String>
    {
        match keypair.public().mpis() {
            mpi::PublicKey::ECDSA { curve, .. }
                if *curve == SigningAlgorithm::EcdsaP256Sha256.curve() => (),
            _ => return Err(anyhow::anyhow!("only NIST P-256 ECDSA keys \
                                             are supported")),
        }

        Ok(LocalTransport {
            key_id: key_id.into(),
            keypair: Mutex::new(keypair),
        })
    }

    pub fn key_id(&self) -> &str { &self.key_id }
}

impl SigningTransport for LocalTransport {
    fn sign_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        algorithm: SigningAlgorithm,
        _context: &SignContext,
    ) -> anyhow::Result<Vec<u8>> {
        if key_id != self.key_id {
            return Err(anyhow::anyhow!("NotFoundException: no key {}", key_id));
        }
        let mut keypair = self.keypair.lock()
            .map_err(|_| anyhow::anyhow!("key pair lock poisoned"))?;
        match keypair.sign(algorithm.hash_algo(), digest)? {
            mpi::Signature::ECDSA { r, s } =>
                Ok(der::serialize::ecdsa_signature(r.value(), s.value())),
            sig => Err(anyhow::anyhow!("unexpected signature {:?}", sig)),
        }
    }
}

impl KeyDiscovery for LocalTransport {
    fn discover(&self, key_id: &str, _context: &SignContext)
        -> anyhow::Result<RemoteKey>
    {
        if key_id != self.key_id {
            return Err(anyhow::anyhow!("NotFoundException: no key {}", key_id));
        }
        let keypair = self.keypair.lock()
            .map_err(|_| anyhow::anyhow!("key pair lock poisoned"))?;
        let public = keypair.public();
        let spki = match public.mpis() {
            mpi::PublicKey::ECDSA { curve, q } =>
                der::serialize::spki_ec(curve, q.value())
                .context("cannot encode public key")?,
            _ => unreachable!("checked in from_keypair"),
        };

        Ok(RemoteKey {
            key_id: self.key_id.clone(),
            spki,
            creation_time: public.creation_time(),
        })
    }
}
