// Used by the sslcheck binary.
use {dirs_next as _, seahorse as _, tracing_appender as _, tracing_subscriber as _};

// Used by tests
#[cfg(test)]
use {rstest as _, tempfile as _, test_utils as _};

#[macro_use]
extern crate tracing;

pub mod bundle;
pub mod error;
pub mod inputs;
pub mod listener;
pub mod prompt;
pub mod report;
pub mod term;
pub mod verify;

mod help;

use std::path::PathBuf;

use anyhow::Context as _;
use tokio::runtime::Runtime;
use tracing::Instrument as _;

use crate::bundle::{ServerIdentity, log_chain};
use crate::error::{BindStage, CheckError};
use crate::inputs::{CredentialBundle, InputsCfg, collect_inputs};
use crate::prompt::Prompter;
use crate::report::{Console, StatusIndicator};
use crate::verify::{ChainVerifier, VerifierKind};

#[derive(Debug, Clone)]
pub struct CheckCfg {
    pub inputs: InputsCfg,
    /// Preferred listener port, replaced by a free one when busy.
    pub port: u16,
    pub verifier: VerifierKind,
    pub openssl: Option<PathBuf>,
    /// Also perform a TLS handshake against each listener.
    pub handshake: bool,
}

/// Runs the whole check and reports the result on `console`.
///
/// Questions are asked on the calling thread; the bind checks and the chain verification run on `rt`.
pub fn run<P, V>(
    cfg: &CheckCfg,
    prompter: &mut P,
    verifier: &V,
    console: &Console,
    rt: &Runtime,
) -> Result<(), CheckError>
where
    P: Prompter,
    V: ChainVerifier,
{
    info!(version = env!("CARGO_PKG_VERSION"), "Start SSL check");
    debug!(?cfg);

    console.banner();

    let mut status: Option<StatusIndicator> = None;

    let result = collect_and_check(cfg, prompter, verifier, console, rt, &mut status);

    match &result {
        Ok(()) => {
            info!("SSL OK");

            if let Some(status) = status.take() {
                status.succeed("SSL OK!");
            }
        }
        Err(e) => {
            let message = e.to_string();

            error!(stage = ?e.stage(), error = %message, "SSL check failed");

            match status.take() {
                Some(status) => status.fail(&message),
                None => console.plain_error(&message),
            }

            if let Some(help) = e.help() {
                console.help(&help);
            }
        }
    }

    result
}

fn collect_and_check<P, V>(
    cfg: &CheckCfg,
    prompter: &mut P,
    verifier: &V,
    console: &Console,
    rt: &Runtime,
    status: &mut Option<StatusIndicator>,
) -> Result<(), CheckError>
where
    P: Prompter,
    V: ChainVerifier,
{
    let bundle = collect_inputs(&cfg.inputs, prompter);

    // The answers were all given, even when the confirmation does not match.
    if !matches!(bundle, Err(CheckError::NoCandidate(_) | CheckError::Input(_))) {
        console.separator();
    }

    let bundle = bundle?;

    *status = Some(console.start("Checking SSL"));

    rt.block_on(check_bundle(cfg, &bundle, verifier))
}

/// Bind checks for both credential shapes, then the chain verification.
#[instrument(skip_all)]
pub async fn check_bundle<V: ChainVerifier>(
    cfg: &CheckCfg,
    bundle: &CredentialBundle,
    verifier: &V,
) -> Result<(), CheckError> {
    let port = listener::probe_port(cfg.port).map_err(|source| CheckError::TlsConfig {
        stage: BindStage::Pfx,
        source,
    })?;

    info!(port, "Port selected");

    bind_pfx(cfg, bundle, port)
        .instrument(info_span!("bind_check", stage = %BindStage::Pfx))
        .await
        .map_err(|source| CheckError::TlsConfig {
            stage: BindStage::Pfx,
            source,
        })?;

    bind_raw(cfg, bundle, port)
        .instrument(info_span!("bind_check", stage = %BindStage::Raw))
        .await
        .map_err(|source| CheckError::TlsConfig {
            stage: BindStage::Raw,
            source,
        })?;

    info!("Verify certificate chain");

    verifier
        .verify_chain(&bundle.ca, &bundle.cert)
        .await
        .map_err(CheckError::ChainVerification)?;

    Ok(())
}

async fn bind_pfx(cfg: &CheckCfg, bundle: &CredentialBundle, port: u16) -> anyhow::Result<()> {
    let der = tokio::fs::read(&bundle.pfx)
        .await
        .with_context(|| format!("failed to read {}", bundle.pfx.display()))?;

    let identity = ServerIdentity::from_pkcs12(&der, &bundle.passphrase)?;
    log_chain(&identity.chain);

    listener::bind_check(port, identity, cfg.handshake).await
}

async fn bind_raw(cfg: &CheckCfg, bundle: &CredentialBundle, port: u16) -> anyhow::Result<()> {
    let identity = ServerIdentity::from_pem_files(&bundle.key, &bundle.cert, &bundle.ca)?;
    log_chain(&identity.chain);

    listener::bind_check(port, identity, cfg.handshake).await
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;

    use test_utils::pki::{Pki, PkiOptions};

    use super::*;
    use crate::error::CheckStage;
    use crate::prompt::TermPrompter;
    use crate::report::tests::Captured;
    use crate::verify::{ChainDiagnostic, RustlsVerifier};

    /// Records the calls and answers with a fixed result.
    struct MockVerifier {
        calls: Mutex<Vec<(PathBuf, PathBuf)>>,
        result: Result<(), ChainDiagnostic>,
    }

    impl MockVerifier {
        fn new(result: Result<(), ChainDiagnostic>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                result,
            }
        }

        fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ChainVerifier for MockVerifier {
        async fn verify_chain(&self, ca: &Path, cert: &Path) -> Result<(), ChainDiagnostic> {
            self.calls.lock().unwrap().push((ca.to_owned(), cert.to_owned()));
            self.result.clone()
        }
    }

    fn cfg(dir: &Path) -> CheckCfg {
        CheckCfg {
            inputs: InputsCfg {
                dir: dir.to_owned(),
                ..InputsCfg::default()
            },
            port: 0,
            verifier: VerifierKind::Rustls,
            openssl: None,
            handshake: false,
        }
    }

    /// Accepts every default then types the two passphrases.
    fn answers(passphrase: &str, confirmation: &str) -> TermPrompter<Cursor<Vec<u8>>, Vec<u8>> {
        let input = format!("\n\n\n\n{passphrase}\n{confirmation}\n");
        TermPrompter::new(Cursor::new(input.into_bytes()), Vec::new())
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn valid_bundle_with_defaults() {
        let pki = Pki::generate(PkiOptions::default()).unwrap();
        let files = pki.write_to_dir("s3cr3t").unwrap();
        let verifier = MockVerifier::new(Ok(()));
        let (console, captured) = Captured::console(false, false);

        run(
            &cfg(files.path()),
            &mut answers("s3cr3t", "s3cr3t"),
            &verifier,
            &console,
            &runtime(),
        )
        .unwrap();

        assert_eq!(verifier.calls(), [(files.ca(), files.cert())]);
        assert!(captured.text().ends_with("===============================\n\n✔ SSL OK!\n"));
    }

    #[test]
    fn mismatching_confirmation_stops_before_any_bind() {
        let pki = Pki::generate(PkiOptions::default()).unwrap();
        let files = pki.write_to_dir("s3cr3t").unwrap();
        let verifier = MockVerifier::new(Ok(()));
        let (console, captured) = Captured::console(false, false);

        let error = run(
            &cfg(files.path()),
            &mut answers("s3cr3t", "S3cr3t"),
            &verifier,
            &console,
            &runtime(),
        )
        .unwrap_err();

        assert_eq!(error.stage(), CheckStage::CollectInputs);
        assert!(verifier.calls().is_empty());
        assert!(
            captured
                .text()
                .ends_with("\n PFX confirm password does not match\n")
        );
    }

    #[test]
    fn wrong_pfx_passphrase_fails_first_bind() {
        let pki = Pki::generate(PkiOptions::default()).unwrap();
        let files = pki.write_to_dir("s3cr3t").unwrap();
        let verifier = MockVerifier::new(Ok(()));
        let (console, captured) = Captured::console(false, false);

        let error = run(
            &cfg(files.path()),
            &mut answers("other", "other"),
            &verifier,
            &console,
            &runtime(),
        )
        .unwrap_err();

        assert_eq!(error.stage(), CheckStage::BindCheck(BindStage::Pfx));
        assert!(verifier.calls().is_empty());
        assert!(captured.text().contains("✖ PKCS#12 archive: failed to decrypt PKCS#12 archive"));
    }

    #[test]
    fn foreign_ca_fails_after_both_binds() {
        let pki = Pki::generate(PkiOptions::default()).unwrap();
        let other = Pki::generate(PkiOptions {
            ca_name: Some("another root"),
            ..PkiOptions::default()
        })
        .unwrap();
        let files = pki.write_to_dir("s3cr3t").unwrap();
        std::fs::write(files.ca(), other.ca_pem.as_bytes()).unwrap();
        let (console, captured) = Captured::console(false, false);

        let error = run(
            &cfg(files.path()),
            &mut answers("s3cr3t", "s3cr3t"),
            &RustlsVerifier,
            &console,
            &runtime(),
        )
        .unwrap_err();

        assert_eq!(error.stage(), CheckStage::ExternalVerify);
        assert!(captured.text().contains("✖ failed to verify certification chain"));
        assert!(captured.text().contains("issuer is unknown"));
    }

    #[test]
    fn handshake_probe_on_valid_bundle() {
        let pki = Pki::generate(PkiOptions::default()).unwrap();
        let files = pki.write_to_dir("s3cr3t").unwrap();
        let (console, _captured) = Captured::console(false, false);

        let cfg = CheckCfg {
            handshake: true,
            ..cfg(files.path())
        };

        run(
            &cfg,
            &mut answers("s3cr3t", "s3cr3t"),
            &RustlsVerifier,
            &console,
            &runtime(),
        )
        .unwrap();
    }

    #[test]
    fn empty_directory_is_reported_without_spinner() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = MockVerifier::new(Ok(()));
        let (console, captured) = Captured::console(false, false);

        let error = run(&cfg(dir.path()), &mut answers("", ""), &verifier, &console, &runtime()).unwrap_err();

        assert!(matches!(error, CheckError::NoCandidate(_)));
        assert!(captured.text().contains("\n Not found any file\n"));
        assert!(captured.text().contains("No file could be offered for selection."));
    }

    #[test]
    fn truncated_answers_are_reported_without_listing_help() {
        let pki = Pki::generate(PkiOptions::default()).unwrap();
        let files = pki.write_to_dir("s3cr3t").unwrap();
        let verifier = MockVerifier::new(Ok(()));
        let (console, captured) = Captured::console(false, false);
        let mut prompter = TermPrompter::new(Cursor::new(b"\n\n".to_vec()), Vec::new());

        let error = run(&cfg(files.path()), &mut prompter, &verifier, &console, &runtime()).unwrap_err();

        assert!(matches!(error, CheckError::Input(_)));
        assert!(captured.text().ends_with("\n unexpected end of input\n"));
        assert!(!captured.text().contains("No file could be offered"));
        assert!(verifier.calls().is_empty());
    }
}
