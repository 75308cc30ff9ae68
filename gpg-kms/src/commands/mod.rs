use openpgp_kms::{Converter, Entity, KeyDiscovery, SigningTransport};

use crate::Config;

mod export;
pub use self::export::{export, ExportOpts};
mod sign;
pub use self::sign::{sign, SignOpts};

/// Looks `key` up and wraps it in a converter bounded by the configured
/// context.
fn open<B>(config: &Config, backend: B, key: &str)
    -> anyhow::Result<Converter<B>>
    where B: KeyDiscovery + SigningTransport + 'static
{
    let entity = Entity::open(backend, key, config.context.clone())?;
    Ok(Converter::new(entity))
}
