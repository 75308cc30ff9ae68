//! Remote signing adapter.
//!
//! A [`RemoteSigner`] turns a "sign this digest" RPC into the
//! [`Signer`] contract Sequoia expects from a private key.  It checks
//! every request locally before anything goes over the wire, issues
//! exactly one remote call per signature, and keeps no per-call state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use sequoia_openpgp::crypto::{mpi, Signer};
use sequoia_openpgp::packet::key::{PublicParts, UnspecifiedRole};
use sequoia_openpgp::packet::Key;
use sequoia_openpgp::types::{Curve, HashAlgorithm, PublicKeyAlgorithm};

use crate::der;
use crate::{Error, Result};

/// The signature scheme a remote key is restricted to.
///
/// Remote keys are created for exactly one (curve, hash) pairing; a key
/// is never asked to sign anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SigningAlgorithm {
    /// ECDSA on NIST P-256 over a SHA-256 digest.
    EcdsaP256Sha256,
}

impl SigningAlgorithm {
    pub fn hash_algo(&self) -> HashAlgorithm {
        match self {
            SigningAlgorithm::EcdsaP256Sha256 => HashAlgorithm::SHA256,
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            SigningAlgorithm::EcdsaP256Sha256 => 32,
        }
    }

    pub fn pk_algo(&self) -> PublicKeyAlgorithm {
        match self {
            SigningAlgorithm::EcdsaP256Sha256 => PublicKeyAlgorithm::ECDSA,
        }
    }

    pub fn curve(&self) -> Curve {
        match self {
            SigningAlgorithm::EcdsaP256Sha256 => Curve::NistP256,
        }
    }
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        SigningAlgorithm::EcdsaP256Sha256
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SigningAlgorithm::EcdsaP256Sha256 => f.write_str("ECDSA_SHA_256"),
        }
    }
}

/// A reference to a remote key and the one algorithm it signs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningCapability {
    key_id:    String,
    algorithm: SigningAlgorithm,
}

impl SigningCapability {
    pub fn new<S: Into<String>>(key_id: S, algorithm: SigningAlgorithm)
        -> Self
    {
        SigningCapability {
            key_id: key_id.into(),
            algorithm,
        }
    }

    pub fn key_id(&self) -> &str { &self.key_id }

    pub fn algorithm(&self) -> SigningAlgorithm { self.algorithm }
}

/// Cancels every [`SignContext`] it was handed to.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation state handed to each remote call.
#[derive(Clone, Debug, Default)]
pub struct SignContext {
    deadline: Option<Instant>,
    cancel:   CancelToken,
}

impl SignContext {
    /// A context without deadline that is never canceled unless its
    /// [`CancelToken`] is.
    pub fn new() -> Self { Self::default() }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Time left before the deadline, if there is one.  Zero once the
    /// deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context was canceled or its deadline has passed.
    pub fn check(&self, key_id: &str) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(Error::Canceled(key_id.into()));
        }
        match self.remaining() {
            Some(left) if left == Duration::from_secs(0) =>
                Err(Error::DeadlineExceeded(key_id.into())),
            _ => Ok(()),
        }
    }
}

/// The remote "sign this digest" operation.
///
/// Implementations perform a single request and return the signature
/// as a DER-encoded `ECDSA-Sig-Value`.  They must honor
/// [`SignContext::remaining`] as their I/O budget.
pub trait SigningTransport: Send + Sync {
    fn sign_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        algorithm: SigningAlgorithm,
        context: &SignContext,
    ) -> anyhow::Result<Vec<u8>>;
}

impl<T: SigningTransport + ?Sized> SigningTransport for Arc<T> {
    fn sign_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        algorithm: SigningAlgorithm,
        context: &SignContext,
    ) -> anyhow::Result<Vec<u8>> {
        (**self).sign_digest(key_id, digest, algorithm, context)
    }
}

/// RemoteSigner implements [`Signer`] for a key living in a remote
/// key-management service.
///
/// Retries are left to the transport: each signature is at most one
/// attempt.
pub struct RemoteSigner<T> {
    capability: SigningCapability,
    transport:  Arc<T>,
    public:     Key<PublicParts, UnspecifiedRole>,
    context:    SignContext,
}

impl<T> Clone for RemoteSigner<T> {
    fn clone(&self) -> Self {
        RemoteSigner {
            capability: self.capability.clone(),
            transport:  self.transport.clone(),
            public:     self.public.clone(),
            context:    self.context.clone(),
        }
    }
}

impl<T> fmt::Debug for RemoteSigner<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("capability", &self.capability)
            .field("public", &self.public.fingerprint())
            .finish()
    }
}

impl<T: SigningTransport> RemoteSigner<T> {
    /// Wraps `transport` for the key described by `capability`.
    ///
    /// `public` must be the key's public half, as reported by the key
    /// service.
    pub fn new(
        capability: SigningCapability,
        transport: T,
        public: Key<PublicParts, UnspecifiedRole>,
    ) -> Result<Self> {
        let algorithm = capability.algorithm();
        match (public.pk_algo(), public.mpis()) {
            (pk_algo, mpi::PublicKey::ECDSA { curve, .. })
                if pk_algo == algorithm.pk_algo()
                && *curve == algorithm.curve() => (),
            (pk_algo, _) => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "key {} is a {} key, expected {} on {}",
                    capability.key_id(), pk_algo,
                    algorithm.pk_algo(), algorithm.curve())));
            }
        }

        Ok(RemoteSigner {
            capability,
            transport: Arc::new(transport),
            public,
            context: SignContext::new(),
        })
    }

    /// Replaces the context used for subsequent signatures.
    pub fn with_context(mut self, context: SignContext) -> Self {
        self.context = context;
        self
    }

    pub fn capability(&self) -> &SigningCapability { &self.capability }

    pub fn context(&self) -> &SignContext { &self.context }

    pub fn public_key(&self) -> &Key<PublicParts, UnspecifiedRole> {
        &self.public
    }

    /// Signs a pre-hashed `digest` and returns the remote signature
    /// unchanged.
    pub fn sign_digest(&self, digest: &[u8], hash_algo: HashAlgorithm)
        -> Result<Vec<u8>>
    {
        let key_id = self.capability.key_id();
        let algorithm = self.capability.algorithm();

        if hash_algo != algorithm.hash_algo() {
            return Err(Error::UnsupportedAlgorithm(format!(
                "key {} signs {} digests only, got {}",
                key_id, algorithm.hash_algo(), hash_algo)));
        }
        if digest.len() != algorithm.digest_size() {
            return Err(Error::UnsupportedAlgorithm(format!(
                "key {} expects a {}-byte digest, got {} bytes",
                key_id, algorithm.digest_size(), digest.len())));
        }
        self.context.check(key_id)?;

        debug!("signing request for key {} ({})", key_id, algorithm);
        self.transport
            .sign_digest(key_id, digest, algorithm, &self.context)
            .map_err(|err| {
                warn!("signing request for key {} failed: {:#}", key_id, err);
                match self.context.check(key_id) {
                    Err(e) => e,
                    Ok(()) => Error::SigningRequestFailed {
                        key: key_id.into(),
                        source: err.into(),
                    },
                }
            })
    }
}

impl<T: SigningTransport> Signer for RemoteSigner<T> {
    fn public(&self) -> &Key<PublicParts, UnspecifiedRole> { &self.public }

    fn sign(
        &mut self,
        hash_algo: HashAlgorithm,
        digest: &[u8],
    ) -> anyhow::Result<mpi::Signature> {
        let raw = self.sign_digest(digest, hash_algo)?;
        let (r, s) = der::parse::ecdsa_r_s(&raw).map_err(|err| {
            Error::SigningRequestFailed {
                key: self.capability.key_id().into(),
                source: err.context("malformed ECDSA signature").into(),
            }
        })?;

        Ok(mpi::Signature::ECDSA {
            r: r.into(),
            s: s.into(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::SystemTime;

    use sequoia_openpgp::crypto::KeyPair;

    use crate::key::{KeyDiscovery, RemoteKey};
    use sequoia_openpgp::packet::key::{Key4, SecretParts};

    /// Signs with an in-memory key and records every exchange as
    /// (digest, DER signature).
    pub struct StubTransport {
        keypair:         Mutex<KeyPair>,
        pub requests:    Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        /// Time budget seen by each key lookup.
        pub discoveries: Mutex<Vec<Option<Duration>>>,
        pub fail:        bool,
    }

    impl StubTransport {
        pub fn new(creation_time: SystemTime) -> Self {
            let mut key = Key4::<SecretParts, UnspecifiedRole>::generate_ecc(
                true, Curve::NistP256).unwrap();
            key.set_creation_time(creation_time).unwrap();
            StubTransport {
                keypair: Mutex::new(Key::from(key).into_keypair().unwrap()),
                requests: Mutex::new(Vec::new()),
                discoveries: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing(creation_time: SystemTime) -> Self {
            StubTransport {
                fail: true,
                ..Self::new(creation_time)
            }
        }

        pub fn public(&self) -> Key<PublicParts, UnspecifiedRole> {
            self.keypair.lock().unwrap().public().clone()
        }

        pub fn digests(&self) -> Vec<Vec<u8>> {
            self.requests.lock().unwrap().iter()
                .map(|(d, _)| d.clone()).collect()
        }

        pub fn signatures(&self) -> Vec<Vec<u8>> {
            self.requests.lock().unwrap().iter()
                .map(|(_, s)| s.clone()).collect()
        }
    }

    impl SigningTransport for StubTransport {
        fn sign_digest(
            &self,
            _key_id: &str,
            digest: &[u8],
            algorithm: SigningAlgorithm,
            _context: &SignContext,
        ) -> anyhow::Result<Vec<u8>> {
            if self.fail {
                self.requests.lock().unwrap()
                    .push((digest.to_vec(), Vec::new()));
                return Err(anyhow::anyhow!(
                    "AccessDeniedException: key disabled"));
            }
            let sig = match self.keypair.lock().unwrap()
                .sign(algorithm.hash_algo(), digest)?
            {
                mpi::Signature::ECDSA { r, s } =>
                    der::serialize::ecdsa_signature(r.value(), s.value()),
                sig => panic!("unexpected signature {:?}", sig),
            };
            self.requests.lock().unwrap().push((digest.to_vec(), sig.clone()));
            Ok(sig)
        }
    }

    impl KeyDiscovery for StubTransport {
        fn discover(&self, key_id: &str, context: &SignContext)
            -> anyhow::Result<RemoteKey>
        {
            self.discoveries.lock().unwrap().push(context.remaining());
            let public = self.public();
            let spki = match public.mpis() {
                mpi::PublicKey::ECDSA { curve, q } =>
                    der::serialize::spki_ec(curve, q.value())?,
                mpis => panic!("unexpected key material {:?}", mpis),
            };
            Ok(RemoteKey {
                key_id: key_id.into(),
                spki,
                creation_time: public.creation_time(),
            })
        }
    }

    fn stub(transport: StubTransport)
        -> (Arc<StubTransport>, RemoteSigner<Arc<StubTransport>>)
    {
        let transport = Arc::new(transport);
        let signer = RemoteSigner::new(
            SigningCapability::new("alias/test", SigningAlgorithm::EcdsaP256Sha256),
            transport.clone(),
            transport.public(),
        ).unwrap();
        (transport, signer)
    }

    fn working() -> (Arc<StubTransport>, RemoteSigner<Arc<StubTransport>>) {
        stub(StubTransport::new(SystemTime::now()))
    }

    #[test]
    fn short_digest_never_reaches_transport() {
        let (transport, signer) = working();
        match signer.sign_digest(&[0u8; 20], HashAlgorithm::SHA256) {
            Err(Error::UnsupportedAlgorithm(_)) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn other_hash_never_reaches_transport() {
        let (transport, signer) = working();
        match signer.sign_digest(&[0u8; 64], HashAlgorithm::SHA512) {
            Err(Error::UnsupportedAlgorithm(_)) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        match signer.sign_digest(&[0u8; 32], HashAlgorithm::SHA512) {
            Err(Error::UnsupportedAlgorithm(_)) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn signature_returned_verbatim() {
        let (transport, signer) = working();
        let digest = [7u8; 32];
        let sig = signer.sign_digest(&digest, HashAlgorithm::SHA256).unwrap();
        assert_eq!(transport.digests(), vec![digest.to_vec()]);
        assert_eq!(transport.signatures(), vec![sig]);
    }

    #[test]
    fn remote_failure_is_wrapped() {
        let (transport, signer) =
            stub(StubTransport::failing(SystemTime::now()));
        let err = signer.sign_digest(&[0u8; 32], HashAlgorithm::SHA256)
            .unwrap_err();
        match &err {
            Error::SigningRequestFailed { key, source } => {
                assert_eq!(key, "alias/test");
                assert!(source.to_string().contains("key disabled"));
            }
            e => panic!("unexpected error: {}", e),
        }
        assert!(err.is_remote());
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn expired_deadline_never_reaches_transport() {
        let (transport, signer) = working();
        let signer = signer.with_context(
            SignContext::new().with_deadline(Instant::now()));
        match signer.sign_digest(&[0u8; 32], HashAlgorithm::SHA256) {
            Err(Error::DeadlineExceeded(key)) => assert_eq!(key, "alias/test"),
            r => panic!("unexpected result: {:?}", r),
        }
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn canceled_context() {
        let (transport, signer) = working();
        let token = CancelToken::new();
        let signer = signer.with_context(
            SignContext::new().with_cancel_token(token.clone()));
        token.cancel();
        match signer.sign_digest(&[0u8; 32], HashAlgorithm::SHA256) {
            Err(Error::Canceled(_)) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn sequoia_signer_decodes_der() {
        let (transport, mut signer) = working();
        let sig = Signer::sign(&mut signer, HashAlgorithm::SHA256, &[1u8; 32])
            .unwrap();
        let (r, s) = der::parse::ecdsa_r_s(&transport.signatures()[0])
            .unwrap();
        match sig {
            mpi::Signature::ECDSA { r: sr, s: ss } => {
                assert_eq!(sr.value(), &r[..]);
                assert_eq!(ss.value(), &s[..]);
            }
            sig => panic!("unexpected signature: {:?}", sig),
        }
    }

    struct GarbageTransport;

    impl SigningTransport for GarbageTransport {
        fn sign_digest(&self, _: &str, _: &[u8], _: SigningAlgorithm,
                       _: &SignContext)
            -> anyhow::Result<Vec<u8>>
        {
            Ok(b"not a signature".to_vec())
        }
    }

    #[test]
    fn malformed_remote_signature() {
        let mut signer = RemoteSigner::new(
            SigningCapability::new("k", SigningAlgorithm::EcdsaP256Sha256),
            GarbageTransport,
            StubTransport::new(SystemTime::now()).public(),
        ).unwrap();
        let err = Signer::sign(&mut signer, HashAlgorithm::SHA256, &[1u8; 32])
            .unwrap_err();
        match err.downcast::<Error>() {
            Ok(Error::SigningRequestFailed { key, .. }) => assert_eq!(key, "k"),
            r => panic!("unexpected error: {:?}", r),
        }
    }

    #[test]
    fn non_p256_key_rejected() {
        let key: Key<SecretParts, UnspecifiedRole> =
            Key4::generate_ecc(true, Curve::Ed25519).unwrap().into();
        let r = RemoteSigner::new(
            SigningCapability::new("k", SigningAlgorithm::EcdsaP256Sha256),
            GarbageTransport,
            key.parts_into_public());
        match r {
            Err(Error::UnsupportedAlgorithm(_)) => (),
            r => panic!("unexpected result: {:?}", r.map(|_| ())),
        }
    }

    #[test]
    fn context_remaining() {
        assert_eq!(SignContext::new().remaining(), None);
        let ctx = SignContext::new().with_timeout(Duration::from_secs(60));
        assert!(ctx.remaining().unwrap() > Duration::from_secs(50));
        assert!(ctx.check("k").is_ok());
    }
}
