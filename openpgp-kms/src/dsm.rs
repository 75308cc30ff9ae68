//! Fortanix DSM backend.
//!
//! Keys are addressed by their Sobject name.  Discovery needs a DSM of
//! at least version 4.2.0; signing sends the pre-hashed digest, so the
//! data to sign never leaves the process.
//!
//! Every client is built with the time left in the caller's
//! [`SignContext`] as its socket read and write timeout.

use std::env;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Error, Result};
use hyper::client::Client as HyperClient;
use hyper::net::HttpsConnector;
use hyper_native_tls::NativeTlsClient;
use log::{debug, info};
use sdkms::api_model::{
    DigestAlgorithm, EllipticCurve as ApiCurve, ObjectType, SignRequest,
    Sobject, SobjectDescriptor,
};
use sdkms::SdkmsClient as DsmClient;
use semver::{Version, VersionReq};

use crate::key::{KeyDiscovery, RemoteKey};
use crate::signer::{SignContext, SigningAlgorithm, SigningTransport};

const ENV_API_KEY: &str = "FORTANIX_API_KEY";
const ENV_API_ENDPOINT: &str = "FORTANIX_API_ENDPOINT";
const MIN_DSM_VERSION: &str = "4.2.0";

/// Where to reach DSM, and the API key to authenticate with.
#[derive(Clone)]
pub struct Credentials {
    api_endpoint: String,
    api_key:      String,
}

impl Credentials {
    pub fn new<E, K>(api_endpoint: E, api_key: K) -> Self
        where E: Into<String>, K: Into<String>
    {
        Credentials {
            api_endpoint: api_endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Reads `FORTANIX_API_ENDPOINT` and `FORTANIX_API_KEY`.
    pub fn new_from_env() -> Result<Self> {
        let api_endpoint = env::var(ENV_API_ENDPOINT)
            .with_context(|| format!("{} env var absent", ENV_API_ENDPOINT))?;
        let api_key = env::var(ENV_API_KEY)
            .with_context(|| format!("{} env var absent", ENV_API_KEY))?;

        Ok(Self::new(api_endpoint, api_key))
    }

    pub fn api_endpoint(&self) -> &str { &self.api_endpoint }

    /// Builds a client whose socket reads and writes give up after
    /// `timeout`.
    fn http_client(&self, timeout: Option<Duration>) -> Result<DsmClient> {
        let mut hyper_client = HyperClient::with_connector(
            HttpsConnector::new(NativeTlsClient::new()?));
        hyper_client.set_read_timeout(timeout);
        hyper_client.set_write_timeout(timeout);

        DsmClient::builder()
            .with_api_endpoint(&self.api_endpoint)
            .with_api_key(&self.api_key)
            .with_hyper_client(Arc::new(hyper_client))
            .build()
            .context("could not initiate a DSM client")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_endpoint", &self.api_endpoint)
            .finish()
    }
}

fn check_version(cli: &DsmClient) -> Result<()> {
    let min = VersionReq::parse(&(">=".to_string() + MIN_DSM_VERSION))?;
    let ver = Version::parse(&cli.version()?.version)?;
    if min.matches(&ver) {
        Ok(())
    } else {
        Err(Error::msg(format!(
            "Incompatible DSM version: ({} < {})", ver, MIN_DSM_VERSION)))
    }
}

/// Discovers and signs with keys stored in Fortanix DSM.
#[derive(Debug, Clone)]
pub struct DsmBackend {
    credentials: Credentials,
}

impl DsmBackend {
    pub fn new(credentials: Credentials) -> Self {
        DsmBackend { credentials }
    }
}

/// Extracts the public key and creation time of a P-256 signing key.
fn remote_key(key_id: &str, sob: Sobject) -> Result<RemoteKey> {
    match (&sob.obj_type, &sob.elliptic_curve) {
        (ObjectType::Ec, Some(ApiCurve::NistP256)) => (),
        (ObjectType::Ec, Some(curve)) => {
            return Err(Error::msg(format!(
                "unsupported curve {:?}, expected NistP256", curve)));
        }
        (ObjectType::Ec, None) => {
            return Err(Error::msg("Sobject has no curve attribute"));
        }
        (t, _) => {
            return Err(Error::msg(format!(
                "{} is a {:?} object, expected an EC key", key_id, t)));
        }
    }

    let creation_time: SystemTime = sob.created_at.to_datetime().into();
    let spki: Vec<u8> = sob.pub_key
        .context("public bits of sobject missing")?
        .into();

    Ok(RemoteKey {
        key_id: key_id.to_string(),
        spki,
        creation_time,
    })
}

impl KeyDiscovery for DsmBackend {
    fn discover(&self, key_id: &str, context: &SignContext)
        -> Result<RemoteKey>
    {
        info!("looking up {} at {}", key_id, self.credentials.api_endpoint);
        let http_client = self.credentials.http_client(context.remaining())?;
        check_version(&http_client)?;

        let descriptor = SobjectDescriptor::Name(key_id.to_string());
        let sobject = http_client
            .get_sobject(None, &descriptor)
            .with_context(|| format!("could not get key {}", key_id))?;
        remote_key(key_id, sobject)
    }
}

impl SigningTransport for DsmBackend {
    fn sign_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        algorithm: SigningAlgorithm,
        context: &SignContext,
    ) -> Result<Vec<u8>> {
        let hash_alg = match algorithm {
            SigningAlgorithm::EcdsaP256Sha256 => DigestAlgorithm::Sha256,
        };
        let http_client = self.credentials.http_client(context.remaining())?;

        let sign_req = SignRequest {
            key: Some(SobjectDescriptor::Name(key_id.to_string())),
            hash_alg,
            hash: Some(digest.to_vec().into()),
            data: None,
            mode: None,
            deterministic_signature: None,
        };
        debug!("sending {} request for {}", algorithm, key_id);
        let sign_resp = http_client.sign(&sign_req)
            .with_context(|| format!("DSM rejected signing with {}", key_id))?;

        Ok(sign_resp.signature.into())
    }
}
