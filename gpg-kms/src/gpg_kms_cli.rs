/// Command-line parser for gpg-kms.

use clap::{App, AppSettings, Arg, SubCommand};

pub fn build() -> App<'static, 'static> {
    configure(App::new("gpg-kms"))
}

/// Defines the CLI.
///
/// Every key-management service is a subcommand of its own, with
/// `export` and `sign` below it.
pub fn configure(app: App<'static, 'static>) -> App<'static, 'static> {
    app
        .version(env!("CARGO_PKG_VERSION"))
        .about("Uses a key held by a key-management service as an OpenPGP \
                key.  The private key never leaves the service.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("force")
             .short("f").long("force")
             .global(true)
             .help("Overwrite existing files"))
        .arg(Arg::with_name("timeout")
             .long("timeout").value_name("SECONDS")
             .global(true)
             .help("Gives up on the key service after SECONDS \
                    (default: no limit)"))

        .subcommand(SubCommand::with_name("dsm")
                    .about("Uses a key stored in Fortanix DSM.  \
                            FORTANIX_API_ENDPOINT and FORTANIX_API_KEY \
                            must be set")
                    .setting(AppSettings::SubcommandRequiredElseHelp)
                    .subcommand(export_command())
                    .subcommand(sign_command()))
}

fn key_arg() -> Arg<'static, 'static> {
    Arg::with_name("key")
        .long("key").value_name("KEY")
        .required(true)
        .help("Name of the key in the key-management service")
}

fn export_command() -> App<'static, 'static> {
    SubCommand::with_name("export")
        .display_order(100)
        .about("Exports the public key, self-certifying a user ID")
        .arg(key_arg())
        .arg(Arg::with_name("name")
             .long("name").value_name("NAME")
             .required(true)
             .help("Name part of the user ID"))
        .arg(Arg::with_name("comment")
             .long("comment").value_name("COMMENT")
             .help("Comment part of the user ID"))
        .arg(Arg::with_name("email")
             .long("email").value_name("EMAIL")
             .required(true)
             .help("Email part of the user ID"))
        .arg(Arg::with_name("armor")
             .short("a").long("armor")
             .help("Emits an ASCII armored public key block"))
        .arg(Arg::with_name("output")
             .value_name("OUTPUT")
             .help("Writes to OUTPUT instead of stdout"))
}

fn sign_command() -> App<'static, 'static> {
    SubCommand::with_name("sign")
        .display_order(200)
        .about("Signs a file")
        .after_help("\
Without --clear-sign or --detach-sign, an inline-signed binary message is \
produced that embeds the file's name and modification time.  \
Without INPUT, or with '-', stdin is signed.  \
--detach-sign takes precedence over --clear-sign.")
        .arg(key_arg())
        .arg(Arg::with_name("armor")
             .short("a").long("armor")
             .help("ASCII armors a detached signature"))
        .arg(Arg::with_name("clear-sign")
             .long("clear-sign")
             .help("Makes a clear text signature"))
        .arg(Arg::with_name("detach-sign")
             .short("b").long("detach-sign")
             .help("Makes a detached signature"))
        .arg(Arg::with_name("input")
             .value_name("INPUT")
             .default_value("-")
             .help("File to sign, '-' for stdin"))
        .arg(Arg::with_name("output")
             .value_name("OUTPUT")
             .help("Writes to OUTPUT instead of stdout"))
}
