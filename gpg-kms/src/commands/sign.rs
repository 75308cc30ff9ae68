use anyhow::Context as _;
use std::fs::File;
use std::io::{self, Write};

use openpgp_kms::{FileHints, KeyDiscovery, SignMode, SigningTransport};

use crate::Config;

pub struct SignOpts<'a, B> {
    pub config: Config,
    pub backend: B,
    pub key: &'a str,
    pub input: &'a str,
    pub clear_signed: bool,
    pub detached: bool,
    pub armored: bool,
    pub output: Option<&'a str>,
}

pub fn sign<B>(opts: SignOpts<B>) -> anyhow::Result<()>
    where B: KeyDiscovery + SigningTransport + 'static
{
    let SignOpts {
        config, backend, key, input, clear_signed, detached, armored,
        output,
    } = opts;
    let mode = SignMode::from_flags(clear_signed, detached, armored);

    // Open the input first, there is no point in contacting the key
    // service for a file that does not exist.
    let (data, hints): (Box<dyn io::Read>, FileHints) = if input == "-" {
        (Box::new(io::stdin()), FileHints::default())
    } else {
        let file = File::open(input)
            .with_context(|| format!("Failed to open {}", input))?;
        let hints = FileHints::for_file(input, &file);
        (Box::new(file), hints)
    };

    let mut converter = super::open(&config, backend, key)?;
    let signed = converter.sign_with_hints(data, mode, &hints)?;

    // Only touch the output once there is something to write.
    let mut output = crate::create_or_stdout(output, config.force)?;
    output.write_all(&signed)
        .and_then(|()| output.flush())
        .context("Failed to write signature")?;
    Ok(())
}
