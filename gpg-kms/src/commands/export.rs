use anyhow::Context as _;
use std::io::Write;

use openpgp_kms::{KeyDiscovery, SigningTransport};

use crate::Config;

pub struct ExportOpts<'a, B> {
    pub config: Config,
    pub backend: B,
    pub key: &'a str,
    pub name: &'a str,
    pub comment: &'a str,
    pub email: &'a str,
    pub armored: bool,
    pub output: Option<&'a str>,
}

pub fn export<B>(opts: ExportOpts<B>) -> anyhow::Result<()>
    where B: KeyDiscovery + SigningTransport + 'static
{
    let ExportOpts {
        config, backend, key, name, comment, email, armored, output,
    } = opts;

    let mut converter = super::open(&config, backend, key)?;
    let mut exported = converter.export(name, comment, email, armored)?;
    if armored && exported.last() != Some(&b'\n') {
        exported.push(b'\n');
    }

    // Only touch the output once there is something to write.
    let mut output = crate::create_or_stdout(output, config.force)?;
    output.write_all(&exported)
        .and_then(|()| output.flush())
        .context("Failed to write public key")?;
    Ok(())
}
