//! OpenPGP conversion engine.
//!
//! An [`Entity`] is a minimal OpenPGP certificate whose primary key is a
//! [`RemoteSigner`].  A [`Converter`] exports it, self-certifying a user
//! ID first, and signs data with it.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;

use log::{debug, info};
use sequoia_openpgp as openpgp;
use openpgp::armor;
use openpgp::packet::key::{PrimaryRole, PublicParts};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::{Key, Signature, UserID};
use openpgp::serialize::stream::{Armorer, LiteralWriter, Message, Signer};
use openpgp::serialize::Serialize;
use openpgp::types::{HashAlgorithm, KeyFlags, SignatureType, Timestamp};
use openpgp::{Cert, Packet};

use crate::key::KeyDiscovery;
use crate::signer::{
    RemoteSigner, SignContext, SigningAlgorithm, SigningCapability,
    SigningTransport,
};
use crate::{Error, Result};

/// Longest file name a literal data packet can carry.
const MAX_FILE_NAME_LEN: usize = 255;

/// Formats a user ID as `Name (Comment) <email>`.
///
/// The comment may be empty, in which case the parentheses are omitted.
/// Name and email are required.  None of the fields may contain `(`,
/// `)`, `<`, `>` or NUL.
pub fn user_id(name: &str, comment: &str, email: &str) -> Result<String> {
    fn check(field: &str, value: &str) -> Result<()> {
        if value.contains(|c| matches!(c, '(' | ')' | '<' | '>' | '\0')) {
            return Err(Error::InvalidIdentity(format!(
                "{} {:?} contains a reserved character", field, value)));
        }
        Ok(())
    }

    if name.is_empty() {
        return Err(Error::InvalidIdentity("name is empty".into()));
    }
    if email.is_empty() {
        return Err(Error::InvalidIdentity("email is empty".into()));
    }
    check("name", name)?;
    check("comment", comment)?;
    check("email", email)?;

    let mut uid = String::from(name);
    if !comment.is_empty() {
        uid.push_str(" (");
        uid.push_str(comment);
        uid.push(')');
    }
    uid.push_str(" <");
    uid.push_str(email);
    uid.push('>');
    Ok(uid)
}

/// A user ID together with its self-certification.
#[derive(Clone, Debug)]
pub struct Identity {
    pub user_id:        UserID,
    pub self_signature: Signature,
}

/// An OpenPGP identity whose private key is held remotely.
///
/// The primary key is derived from the signer's public key, so the two
/// can never disagree.
///
/// Exporting adds identities to the entity; share an `Entity` between
/// threads only behind a lock.
pub struct Entity<T> {
    primary:    Key<PublicParts, PrimaryRole>,
    signer:     RemoteSigner<T>,
    identities: BTreeMap<String, Identity>,
}

impl<T: SigningTransport> Entity<T> {
    pub fn new(signer: RemoteSigner<T>) -> Self {
        Entity {
            primary: signer.public_key().clone().role_into_primary(),
            signer,
            identities: BTreeMap::new(),
        }
    }

    /// Looks `key_id` up with `backend` and wraps it.
    ///
    /// The backend is used both for discovery and for signing.  The
    /// lookup and every signature issued through the entity are bounded
    /// by `context`.
    pub fn open(backend: T, key_id: &str, context: SignContext)
        -> Result<Self>
        where T: KeyDiscovery
    {
        let algorithm = SigningAlgorithm::EcdsaP256Sha256;
        info!("opening remote key {}", key_id);
        context.check(key_id)?;
        let remote = backend.discover(key_id, &context)
            .map_err(|err| match context.check(key_id) {
                Err(e) => e,
                Ok(()) => Error::KeyDiscoveryFailed {
                    key: key_id.into(),
                    source: err.into(),
                },
            })?;
        let public = remote.to_public_key(algorithm)?;
        debug!("remote key {} is {}", key_id, public.fingerprint());

        let capability = SigningCapability::new(remote.key_id, algorithm);
        let signer = RemoteSigner::new(capability, backend, public)?
            .with_context(context);
        Ok(Entity::new(signer))
    }

    pub fn primary_key(&self) -> &Key<PublicParts, PrimaryRole> {
        &self.primary
    }

    pub fn signer(&self) -> &RemoteSigner<T> { &self.signer }

    pub fn identities(&self) -> &BTreeMap<String, Identity> {
        &self.identities
    }

    /// Binds `uid` to the primary key with a positive certification and
    /// records it, replacing any identity with the same user ID.
    fn certify(&mut self, uid: String, hash_algo: HashAlgorithm)
        -> Result<&Identity>
    {
        let user_id = UserID::from(uid.as_str());
        let cert = Cert::try_from(vec![Packet::from(self.primary.clone())])
            .map_err(Error::serialization("primary key"))?;

        let flags = KeyFlags::empty().set_certification().set_signing();
        let builder = SignatureBuilder::new(SignatureType::PositiveCertification)
            .set_hash_algo(hash_algo)
            .set_signature_creation_time(self.primary.creation_time())
            .and_then(|b| b.set_issuer(self.primary.keyid()))
            .and_then(|b| b.set_issuer_fingerprint(self.primary.fingerprint()))
            .and_then(|b| b.set_primary_userid(true))
            .and_then(|b| b.set_key_flags(flags))
            .map_err(Error::serialization("self-signature"))?;

        let self_signature = user_id.bind(&mut self.signer, &cert, builder)
            .map_err(Error::serialization("self-signature"))?;

        let identity = Identity { user_id, self_signature };
        self.identities.insert(uid.clone(), identity);
        Ok(&self.identities[&uid])
    }

    /// Writes the primary key, then every user ID followed by its
    /// self-signature.
    pub fn serialize(&self, o: &mut dyn io::Write) -> openpgp::Result<()> {
        Packet::from(self.primary.clone()).serialize(o)?;
        for identity in self.identities.values() {
            Packet::from(identity.user_id.clone()).serialize(o)?;
            Packet::from(identity.self_signature.clone()).serialize(o)?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize(&mut buf)
            .map_err(Error::serialization("public key"))?;
        Ok(buf)
    }
}

/// The shape of a signature produced by [`Converter::sign`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignMode {
    /// Only the signature, optionally ASCII armored.
    Detached { armored: bool },
    /// Dash-escaped text followed by an armored signature.
    ClearSigned,
    /// The data in a literal packet, framed by the signature.  Never
    /// armored.
    Inline,
}

impl SignMode {
    /// Maps command-line style flags to a mode.  `detached` takes
    /// precedence over `clear_signed`; `armored` only matters for
    /// detached signatures.
    pub fn from_flags(clear_signed: bool, detached: bool, armored: bool)
        -> Self
    {
        match (clear_signed, detached) {
            (_, true) => SignMode::Detached { armored },
            (true, false) => SignMode::ClearSigned,
            (false, false) => SignMode::Inline,
        }
    }

    /// Whether the output ends in a text block that must end with a
    /// newline.
    fn is_text(&self) -> bool {
        matches!(self, SignMode::Detached { armored: true } | SignMode::ClearSigned)
    }
}

/// Metadata recorded in the literal packet of inline signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileHints {
    pub file_name:         Option<String>,
    pub modification_time: Option<SystemTime>,
}

impl FileHints {
    /// Collects hints for `file`, opened from `path`.  Whatever cannot be
    /// determined is left out.
    pub fn for_file<P: AsRef<Path>>(path: P, file: &File) -> Self {
        FileHints {
            file_name: path.as_ref().file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            modification_time: file.metadata()
                .and_then(|m| m.modified())
                .ok(),
        }
    }
}

/// Exports and signs with an [`Entity`].
pub struct Converter<T> {
    entity:    Entity<T>,
    hash_algo: HashAlgorithm,
}

impl<T: SigningTransport + 'static> Converter<T> {
    pub fn new(entity: Entity<T>) -> Self {
        Converter {
            entity,
            hash_algo: HashAlgorithm::SHA256,
        }
    }

    /// Sets the hash algorithm used for all signatures.
    pub fn with_hash_algo(mut self, hash_algo: HashAlgorithm) -> Self {
        self.hash_algo = hash_algo;
        self
    }

    pub fn entity(&self) -> &Entity<T> { &self.entity }

    fn check_hash_algo(&self) -> Result<()> {
        let capability = self.entity.signer().capability();
        let supported = capability.algorithm().hash_algo();
        if self.hash_algo != supported {
            return Err(Error::UnsupportedAlgorithm(format!(
                "key {} cannot sign {} digests (only {})",
                capability.key_id(), self.hash_algo, supported)));
        }
        Ok(())
    }

    /// Self-certifies `Name (Comment) <email>` and exports the public
    /// key.
    ///
    /// When `armored` is set the output is a `PGP PUBLIC KEY BLOCK`.
    /// Terminating it with a newline is left to the caller.
    pub fn export(&mut self, name: &str, comment: &str, email: &str,
                  armored: bool)
        -> Result<Vec<u8>>
    {
        let uid = user_id(name, comment, email)?;
        self.check_hash_algo()?;

        info!("exporting {} for {}", self.entity.primary_key().fingerprint(), uid);
        self.entity.certify(uid, self.hash_algo)?;

        if !armored {
            return self.entity.to_vec();
        }

        let mut buf = Vec::new();
        let mut w = armor::Writer::new(&mut buf, armor::Kind::PublicKey)
            .map_err(|e| Error::SerializationFailed {
                what: "armored public key",
                source: e.into(),
            })?;
        self.entity.serialize(&mut w)
            .map_err(Error::serialization("armored public key"))?;
        w.finalize()
            .map_err(|e| Error::SerializationFailed {
                what: "armored public key",
                source: e.into(),
            })?;
        Ok(buf)
    }

    /// Signs everything `data` yields.
    ///
    /// See [`SignMode::from_flags`] for how the flags combine.  Detached
    /// armored and clear-signed output always end with a newline.
    pub fn sign<R: Read>(&mut self, data: R, clear_signed: bool,
                         detached: bool, armored: bool)
        -> Result<Vec<u8>>
    {
        self.sign_with_hints(data,
                             SignMode::from_flags(clear_signed, detached, armored),
                             &FileHints::default())
    }

    /// Like [`Converter::sign`], recording `hints` in inline
    /// signatures.
    pub fn sign_with_hints<R: Read>(&mut self, mut data: R, mode: SignMode,
                                    hints: &FileHints)
        -> Result<Vec<u8>>
    {
        self.check_hash_algo()?;
        info!("signing with {} ({:?})",
              self.entity.primary_key().fingerprint(), mode);

        let mut sink = Vec::new();
        let message = Message::new(&mut sink);
        let signer = self.entity.signer().clone();

        let mut writer = match mode {
            SignMode::Detached { armored } => {
                let message = if armored {
                    Armorer::new(message)
                        .kind(armor::Kind::Signature)
                        .build()
                        .map_err(Error::encoding("create armor writer"))?
                } else {
                    message
                };
                Signer::new(message, signer)
                    .hash_algo(self.hash_algo)
                    .map_err(Error::encoding("create signature writer"))?
                    .detached()
                    .build()
                    .map_err(Error::encoding("create signature writer"))?
            }
            SignMode::ClearSigned => {
                Signer::new(message, signer)
                    .hash_algo(self.hash_algo)
                    .map_err(Error::encoding("create clearsign writer"))?
                    .cleartext()
                    .build()
                    .map_err(Error::encoding("create clearsign writer"))?
            }
            SignMode::Inline => {
                let signer = Signer::new(message, signer)
                    .hash_algo(self.hash_algo)
                    .map_err(Error::encoding("create signature writer"))?
                    .build()
                    .map_err(Error::encoding("create signature writer"))?;

                let mut literal = LiteralWriter::new(signer);
                if let Some(name) = &hints.file_name {
                    if name.len() <= MAX_FILE_NAME_LEN {
                        debug!("recording file name {:?}", name);
                        literal = literal.filename(name)
                            .map_err(Error::encoding("create literal writer"))?;
                    }
                }
                if let Some(time) = hints.modification_time
                    .and_then(|t| Timestamp::try_from(t).ok())
                {
                    debug!("recording modification time {}", time);
                    literal = literal.date(SystemTime::from(time))
                        .map_err(Error::encoding("create literal writer"))?;
                }
                literal.build()
                    .map_err(Error::encoding("create literal writer"))?
            }
        };

        // io::copy reads in bounded chunks, the hash is updated as the
        // data streams through.
        io::copy(&mut data, &mut writer)
            .map_err(|e| Error::EncodingFailed {
                what: "sign data",
                source: e.into(),
            })?;
        writer.finalize()
            .map_err(Error::encoding("finalize signature"))?;

        if mode.is_text() && sink.last() != Some(&b'\n') {
            sink.push(b'\n');
        }
        Ok(sink)
    }
}
