/// A command-line frontend for OpenPGP keys held in a key-management
/// service.

use anyhow::Context as _;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::time::Duration;

use openpgp_kms::{dsm, SignContext};

mod gpg_kms_cli;
mod commands;

pub struct Config {
    force: bool,
    context: SignContext,
}

pub(crate) fn create_or_stdout(f: Option<&str>, force: bool)
    -> anyhow::Result<Box<dyn io::Write>> {
    match f {
        None => Ok(Box::new(io::stdout())),
        Some(p) if p == "-" => Ok(Box::new(io::stdout())),
        Some(f) => {
            let p = Path::new(f);
            if !p.exists() || force {
                Ok(Box::new(OpenOptions::new()
                            .write(true)
                            .truncate(true)
                            .create(true)
                            .open(f)
                            .context("Failed to create output file")?))
            } else {
                Err(anyhow::anyhow!(
                    format!("File {:?} exists, use --force to overwrite", p)))
            }
        }
    }
}

fn parse_timeout(timeout: &str) -> anyhow::Result<Duration> {
    let secs: u64 = timeout.trim().parse()
        .with_context(|| format!("--timeout: not a number of seconds: {:?}",
                                 timeout))?;
    if secs == 0 {
        return Err(anyhow::anyhow!("--timeout: must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = gpg_kms_cli::build().get_matches();

    let mut context = SignContext::new();
    if let Some(timeout) = matches.value_of("timeout") {
        context = context.with_timeout(parse_timeout(timeout)?);
    }
    let config = Config {
        force: matches.is_present("force"),
        context,
    };

    match matches.subcommand() {
        ("dsm", Some(m)) => {
            let credentials = dsm::Credentials::new_from_env()
                .context("Fortanix DSM is not configured")?;
            log::debug!("using DSM at {}", credentials.api_endpoint());
            let backend = dsm::DsmBackend::new(credentials);

            match m.subcommand() {
                ("export", Some(m)) => {
                    commands::export(commands::ExportOpts {
                        config,
                        backend,
                        key: m.value_of("key").expect("required"),
                        name: m.value_of("name").expect("required"),
                        comment: m.value_of("comment").unwrap_or(""),
                        email: m.value_of("email").expect("required"),
                        armored: m.is_present("armor"),
                        output: m.value_of("output"),
                    })?
                },
                ("sign", Some(m)) => {
                    commands::sign(commands::SignOpts {
                        config,
                        backend,
                        key: m.value_of("key").expect("required"),
                        input: m.value_of("input").expect("has a default"),
                        clear_signed: m.is_present("clear-sign"),
                        detached: m.is_present("detach-sign"),
                        armored: m.is_present("armor"),
                        output: m.value_of("output"),
                    })?
                },
                _ => unreachable!(),
            }
        },
        _ => unreachable!(),
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout(" 5 ").unwrap(), Duration::from_secs(5));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("1m").is_err());
    }

    #[test]
    fn sign_input_defaults_to_stdin() {
        let m = gpg_kms_cli::build()
            .get_matches_from_safe(vec!["gpg-kms", "dsm", "sign", "--key", "k"])
            .unwrap();
        let (_, m) = m.subcommand();
        let (_, m) = m.unwrap().subcommand();
        let m = m.unwrap();
        assert_eq!(m.value_of("input"), Some("-"));
        assert_eq!(m.value_of("output"), None);

        let m = gpg_kms_cli::build()
            .get_matches_from_safe(vec!["gpg-kms", "dsm", "sign", "--key", "k",
                                        "in.txt", "out.sig"])
            .unwrap();
        let (_, m) = m.subcommand();
        let (_, m) = m.unwrap().subcommand();
        let m = m.unwrap();
        assert_eq!(m.value_of("input"), Some("in.txt"));
        assert_eq!(m.value_of("output"), Some("out.sig"));
    }
}
