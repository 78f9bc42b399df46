#[macro_use]
extern crate tracing;

use std::env;
use std::path::PathBuf;

use anyhow::Context as _;
use seahorse::error::FlagError;
use seahorse::{App, Context, Flag, FlagType};
use sslcheck::inputs::InputsCfg;
use sslcheck::listener::DEFAULT_PORT;
use sslcheck::prompt::TermPrompter;
use sslcheck::report::{ColorMode, Console};
use sslcheck::verify::{Verifier, VerifierKind};
use sslcheck::CheckCfg;
use tokio::runtime;
use tracing_appender::non_blocking::WorkerGuard;

fn main() {
    let args: Vec<String> = if let Ok(args_str) = env::var("SSLCHECK_ARGS") {
        env::args()
            .take(1)
            .chain(parse_env_variable_as_args(&args_str))
            .collect()
    } else {
        env::args().collect()
    };

    let app = App::new(env!("CARGO_PKG_NAME"))
        .description(env!("CARGO_PKG_DESCRIPTION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .usage(generate_usage())
        .action(check_action);

    apply_flags(app).run(args);
}

fn generate_usage() -> String {
    format!(
        r##"{command} [DIRECTORY] [options]

Checks that a TLS certificate bundle is usable by a server:
    1. A TLS listener is started from the PFX (PKCS#12) archive, then closed.
    2. A TLS listener is started from the key, certificate and CA files, then closed.
    3. The certificate is verified against the CA file with OpenSSL.

The files are selected interactively among the files of DIRECTORY (default: current folder).
Files ending with .key, .crt, .ca-bundle and .pfx are preselected.

Example: non-interactive check using the built-in verifier

    {command} --key server.key --cert server.crt --ca root.ca-bundle --pfx bundle.pfx --verifier rustls --no-wait

Arguments can also be provided with the SSLCHECK_ARGS environment variable:

    SSLCHECK_ARGS="certs --handshake" {command}"##,
        command = env!("CARGO_PKG_NAME"),
    )
}

fn apply_flags(app: App) -> App {
    app.flag(Flag::new("key", FlagType::String).description("Private key file (PEM), skips the question"))
        .flag(Flag::new("cert", FlagType::String).description("Certificate file (PEM or DER), skips the question"))
        .flag(Flag::new("ca", FlagType::String).description("CA chain file (PEM), skips the question"))
        .flag(Flag::new("pfx", FlagType::String).description("PFX (PKCS#12) archive, skips the question"))
        .flag(
            Flag::new("port", FlagType::Int)
                .description(&format!("Preferred listener port, a free one is used when busy [default = {DEFAULT_PORT}]")),
        )
        .flag(Flag::new("openssl", FlagType::String).description("Path to the OpenSSL executable"))
        .flag(Flag::new("verifier", FlagType::String).description("Chain verifier: openssl or rustls [default = openssl]"))
        .flag(Flag::new("handshake", FlagType::Bool).description("Also perform a TLS handshake against each listener"))
        .flag(Flag::new("no-wait", FlagType::Bool).description("Exit without waiting for a key press"))
        .flag(Flag::new("color", FlagType::String).description("When to color the output: always, never or auto (NO_COLOR and FORCE_COLOR apply when omitted)"))
        .flag(Flag::new("log-file", FlagType::String).description("Specify filepath for log file"))
        .flag(Flag::new("log-term", FlagType::Bool).description("Print logs to stderr instead of log file"))
}

pub fn check_action(c: &Context) {
    let res = CheckArgs::parse(c).and_then(|CheckArgs { cfg, color, no_wait, logging }| {
        let _guard = setup_logger(logging);
        run(cfg, color, no_wait)
    });

    exit(res);
}

/// Whether the check succeeded.
fn run(cfg: CheckCfg, color: Option<ColorMode>, no_wait: bool) -> anyhow::Result<bool> {
    if let Err(error) = sslcheck::term::install_interrupt_handler() {
        warn!(error = format!("{error:#}"), "Terminal modes won't be restored on Ctrl-C");
    }

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("runtime build failed")?;

    let console = Console::stdout(color);
    let verifier = Verifier::new(cfg.verifier, cfg.openssl.clone(), &cfg.inputs.dir);

    let result = {
        let mut prompter = TermPrompter::stdio();
        sslcheck::run(&cfg, &mut prompter, &verifier, &console, &rt)
    };

    rt.shutdown_timeout(std::time::Duration::from_millis(100)); // just to be safe

    if !no_wait {
        console.press_any_key();

        if let Err(error) = sslcheck::term::wait_for_keypress() {
            warn!(%error, "Failed to wait for a key press");
        }
    }

    Ok(result.is_ok())
}

pub fn exit(res: anyhow::Result<bool>) -> ! {
    match res {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{:?}", e);
            std::process::exit(1);
        }
    }
}

// args parsing

fn parse_env_variable_as_args(env_var_str: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut arg = String::new();
    let mut iter = env_var_str.chars();

    loop {
        match iter.next() {
            Some('"') => loop {
                // read until next "
                match iter.next() {
                    Some('"') | None => break,
                    Some(c) => arg.push(c),
                }
            },
            Some('\'') => loop {
                // read until next '
                match iter.next() {
                    Some('\'') | None => break,
                    Some(c) => arg.push(c),
                }
            },
            Some(' ') => {
                // push current arg, consecutive spaces are a single separator
                if !arg.is_empty() {
                    args.push(std::mem::take(&mut arg));
                }
            }
            Some(c) => arg.push(c),
            None => break,
        }
    }

    if !arg.is_empty() {
        args.push(arg);
    }

    args
}

enum Logging {
    Term,
    File { filepath: PathBuf },
}

struct CheckArgs {
    cfg: CheckCfg,
    /// `None` when the flag is absent, so the environment decides.
    color: Option<ColorMode>,
    no_wait: bool,
    logging: Logging,
}

impl CheckArgs {
    fn parse(c: &Context) -> anyhow::Result<Self> {
        let logging = if c.bool_flag("log-term") {
            Logging::Term
        } else if let Ok(filepath) = c.string_flag("log-file") {
            let filepath = PathBuf::from(filepath);
            Logging::File { filepath }
        } else if let Some(mut filepath) = dirs_next::data_dir() {
            use std::time::{SystemTime, UNIX_EPOCH};

            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("couldn't retrieve duration since UNIX epoch")?;

            filepath.push("sslcheck");
            std::fs::create_dir_all(&filepath).context("couldn't create sslcheck folder")?;

            filepath.push(format!("check_{}", now.as_secs()));
            filepath.set_extension("log");

            Logging::File { filepath }
        } else {
            eprintln!("Couldn't retrieve data directory for log files. Enabling --log-term flag implicitly.");
            Logging::Term
        };

        let dir = match c.args.first() {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir().context("couldn't retrieve current directory")?,
        };

        let exclude = env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(ToOwned::to_owned));

        let path_flag = |name: &str| c.string_flag(name).ok().map(PathBuf::from);

        let inputs = InputsCfg {
            dir,
            exclude,
            key: path_flag("key"),
            cert: path_flag("cert"),
            ca: path_flag("ca"),
            pfx: path_flag("pfx"),
        };

        let port = match c.int_flag("port") {
            Ok(port) => u16::try_from(port).map_err(|_| anyhow::anyhow!("{port} is not a valid port number")),
            Err(FlagError::NotFound) => Ok(DEFAULT_PORT),
            Err(_) => Err(anyhow::anyhow!("expected an integer")),
        }
        .context("invalid 'port'")?;

        let verifier = match c.string_flag("verifier") {
            Ok(verifier) => verifier.parse::<VerifierKind>().context("invalid 'verifier'")?,
            Err(_) => VerifierKind::default(),
        };

        let color = match c.string_flag("color") {
            Ok(color) => Some(color.parse::<ColorMode>().context("invalid 'color'")?),
            Err(_) => None,
        };

        let cfg = CheckCfg {
            inputs,
            port,
            verifier,
            openssl: path_flag("openssl"),
            handshake: c.bool_flag("handshake"),
        };

        Ok(Self {
            cfg,
            color,
            no_wait: c.bool_flag("no-wait"),
            logging,
        })
    }
}

// logging

fn setup_logger(logging: Logging) -> Option<WorkerGuard> {
    use std::fs::OpenOptions;
    use std::panic;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let (layer, guard) = match logging {
        Logging::Term => {
            let (non_blocking_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
            let layer = fmt::layer().with_writer(non_blocking_stderr).boxed();
            (layer, guard)
        }
        Logging::File { filepath } => {
            let file = match OpenOptions::new().create(true).append(true).open(&filepath) {
                Ok(file) => file,
                Err(error) => {
                    eprintln!("Couldn't open log file {}: {error}", filepath.display());
                    return None;
                }
            };

            let (non_blocking_file, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false).boxed();
            (layer, guard)
        }
    };

    let env_filter = EnvFilter::try_from_env("SSLCHECK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(layer).with(env_filter).init();

    let default_panic_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        error!(%panic_info, "Panic");
        default_panic_hook(panic_info);
    }));

    Some(guard)
}
