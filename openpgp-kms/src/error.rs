use std::error::Error as StdError;

/// Boxed cause carried by the remote and encoding error kinds.
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Result specialization used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the signing adapter and the conversion engine.
///
/// Any error aborts the current export or sign operation; partial output
/// is never returned.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A user ID field is missing or contains reserved characters.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// The requested hash/signature combination is not the one the key
    /// supports.  Raised before anything is sent to the remote service.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The public key handed out by the key service cannot be decoded.
    #[error("Malformed public key for {key}: {reason}")]
    MalformedPublicKey {
        key: String,
        reason: String,
    },

    /// Looking up the key's public material failed.
    #[error("Could not discover key {key}")]
    KeyDiscoveryFailed {
        key: String,
        #[source]
        source: Cause,
    },

    /// The remote signing call failed or was rejected.
    #[error("Signing request for key {key} failed")]
    SigningRequestFailed {
        key: String,
        #[source]
        source: Cause,
    },

    /// The signing context was canceled.
    #[error("Signing request for key {0} was canceled")]
    Canceled(String),

    /// The signing context's deadline passed.
    #[error("Signing request for key {0} exceeded its deadline")]
    DeadlineExceeded(String),

    /// Building the OpenPGP packets failed.
    #[error("Failed to serialize {what}")]
    SerializationFailed {
        what: &'static str,
        #[source]
        source: Cause,
    },

    /// Streaming the input through the signing writer failed.
    #[error("Failed to {what}")]
    EncodingFailed {
        what: &'static str,
        #[source]
        source: Cause,
    },
}

impl Error {
    /// Recovers an `Error` that travelled through Sequoia as an
    /// `anyhow::Error`, or classifies a foreign one with `otherwise`.
    pub(crate) fn recover<F>(err: anyhow::Error, otherwise: F) -> Self
        where F: FnOnce(Cause) -> Self
    {
        match err.downcast::<Error>() {
            Ok(e) => e,
            Err(err) => otherwise(err.into()),
        }
    }

    pub(crate) fn serialization(what: &'static str)
        -> impl FnOnce(anyhow::Error) -> Self
    {
        move |err| Error::recover(err, |source| {
            Error::SerializationFailed { what, source }
        })
    }

    pub(crate) fn encoding(what: &'static str)
        -> impl FnOnce(anyhow::Error) -> Self
    {
        move |err| Error::recover(err, |source| {
            Error::EncodingFailed { what, source }
        })
    }

    /// Returns whether retrying the same request could succeed.
    pub fn is_remote(&self) -> bool {
        matches!(self,
                 Error::SigningRequestFailed { .. }
                 | Error::KeyDiscoveryFailed { .. }
                 | Error::Canceled(_)
                 | Error::DeadlineExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recover_roundtrips_through_anyhow() {
        let err: anyhow::Error = Error::Canceled("k".into()).into();
        let err = err.context("while signing");
        match Error::recover(err, |source| Error::EncodingFailed {
            what: "sign", source
        }) {
            Error::Canceled(key) => assert_eq!(key, "k"),
            e => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn recover_classifies_foreign_errors() {
        let err = anyhow::anyhow!("broken pipe");
        match Error::encoding("copy input")(err) {
            e @ Error::EncodingFailed { .. } => {
                assert_eq!(e.to_string(), "Failed to copy input");
                assert!(!e.is_remote());
            }
            e => panic!("unexpected error: {}", e),
        }
    }
}
