//! Certificate chain verification against the supplied CA file.
//!
//! The default verifier runs `openssl verify` in partial chain mode, so any certificate of the CA
//! file may act as trust anchor and no system store is consulted. [`RustlsVerifier`] performs the
//! same check in process.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use rustls::pki_types::UnixTime;
use rustls::{CertificateError, Error};

use crate::bundle::{crypto_provider, read_certificates};
use crate::help;

/// Why a chain did not verify, with a hint when the cause is recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDiagnostic {
    pub summary: String,
    pub detail: Option<String>,
    pub help: Option<String>,
}

impl ChainDiagnostic {
    fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: None,
            help: None,
        }
    }

    #[must_use]
    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    fn with_help(mut self, help: Option<String>) -> Self {
        self.help = help;
        self
    }
}

impl fmt::Display for ChainDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.summary),
            None => write!(f, "{}", self.summary),
        }
    }
}

impl std::error::Error for ChainDiagnostic {}

pub trait ChainVerifier {
    /// Checks that `cert` is issued by a certificate found in `ca`.
    fn verify_chain(&self, ca: &Path, cert: &Path) -> impl Future<Output = Result<(), ChainDiagnostic>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifierKind {
    #[default]
    Openssl,
    Rustls,
}

impl FromStr for VerifierKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openssl" => Ok(VerifierKind::Openssl),
            "rustls" => Ok(VerifierKind::Rustls),
            _ => anyhow::bail!("unknown verifier '{s}' (expected openssl or rustls)"),
        }
    }
}

pub enum Verifier {
    Openssl(OpensslCli),
    Rustls(RustlsVerifier),
}

impl Verifier {
    pub fn new(kind: VerifierKind, openssl: Option<PathBuf>, dir: &Path) -> Self {
        match kind {
            VerifierKind::Openssl => Verifier::Openssl(OpensslCli::locate(openssl, dir)),
            VerifierKind::Rustls => Verifier::Rustls(RustlsVerifier),
        }
    }
}

impl ChainVerifier for Verifier {
    async fn verify_chain(&self, ca: &Path, cert: &Path) -> Result<(), ChainDiagnostic> {
        match self {
            Verifier::Openssl(cli) => cli.verify_chain(ca, cert).await,
            Verifier::Rustls(rustls) => rustls.verify_chain(ca, cert).await,
        }
    }
}

/// Runs `openssl verify -no-CAfile -no-CApath -partial_chain -trusted <ca> <cert>`.
#[derive(Debug, Clone)]
pub struct OpensslCli {
    program: PathBuf,
}

impl OpensslCli {
    pub const BUNDLED_DIR: &'static str = "openssl-lib";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Picks `explicit`, then the executable bundled in `dir`, then `openssl` from the PATH.
    pub fn locate(explicit: Option<PathBuf>, dir: &Path) -> Self {
        if let Some(program) = explicit {
            return Self::new(program);
        }

        let file_name = if cfg!(windows) { "openssl.exe" } else { "openssl" };
        let bundled = dir.join(Self::BUNDLED_DIR).join(file_name);

        if bundled.is_file() {
            Self::new(bundled)
        } else {
            Self::new("openssl")
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ChainVerifier for OpensslCli {
    #[instrument(skip(self), fields(program = %self.program.display()))]
    async fn verify_chain(&self, ca: &Path, cert: &Path) -> Result<(), ChainDiagnostic> {
        let output = tokio::process::Command::new(&self.program)
            .arg("verify")
            .args(["-no-CAfile", "-no-CApath", "-partial_chain", "-trusted"])
            .arg(ca)
            .arg(cert)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                let program = self.program.display().to_string();
                ChainDiagnostic::new(format!("failed to run {program}"))
                    .with_detail(e.to_string())
                    .with_help(Some(help::verifier_missing(&program)))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            debug!(stdout = %stdout.trim(), "Chain verified");
            return Ok(());
        }

        warn!(status = %output.status, %stderr, %stdout, "Chain verification failed");

        let diagnostic = format!("{stderr}\n{stdout}");

        let detail = match single_line(&diagnostic) {
            detail if detail.is_empty() => format!("{} exited with {}", self.program.display(), output.status),
            detail => detail,
        };

        Err(ChainDiagnostic::new("certificate chain verification failed")
            .with_detail(detail)
            .with_help(openssl_error_code(&diagnostic).and_then(help_for_openssl_code)))
    }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Extracts `N` from the first `error N at D depth lookup: ...` line.
fn openssl_error_code(text: &str) -> Option<u32> {
    text.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("error ")?;
        let (code, rest) = rest.split_once(' ')?;

        if !rest.starts_with("at ") {
            return None;
        }

        code.parse().ok()
    })
}

fn help_for_openssl_code(code: u32) -> Option<String> {
    // X509_V_ERR_* values.
    match code {
        2 | 20 | 21 => Some(help::cert_unknown_issuer()),
        7 => Some(help::cert_bad_signature()),
        9 => Some(help::cert_is_not_yet_valid()),
        10 => Some(help::cert_is_expired()),
        26 => Some(help::cert_invalid_purpose()),
        _ => None,
    }
}

/// Same partial chain check done with rustls.
///
/// The leaf must be valid for server authentication when it carries an extended key usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsVerifier;

impl RustlsVerifier {
    pub fn verify_pem(ca: &[u8], cert: &[u8], now: UnixTime) -> Result<(), ChainDiagnostic> {
        use rustls::client::verify_server_cert_signed_by_trust_anchor;

        let anchors =
            read_certificates(ca).map_err(|e| ChainDiagnostic::new("invalid CA file").with_detail(format!("{e:#}")))?;

        let end_entity_cert = read_certificates(cert)
            .map_err(|e| ChainDiagnostic::new("invalid certificate file").with_detail(format!("{e:#}")))?
            .into_iter()
            .next()
            .ok_or_else(|| ChainDiagnostic::new("invalid certificate file").with_detail("empty chain"))?;

        // Trusted as is.
        if anchors.iter().any(|anchor| anchor.as_ref() == end_entity_cert.as_ref()) {
            return Ok(());
        }

        let mut root_store = rustls::RootCertStore::empty();

        for (idx, anchor) in anchors.into_iter().enumerate() {
            root_store.add(anchor).map_err(|e| {
                ChainDiagnostic::new("invalid CA file").with_detail(format!("certificate number {idx}: {e}"))
            })?;
        }

        let end_entity_cert = rustls::server::ParsedCertificate::try_from(&end_entity_cert)
            .map_err(|e| ChainDiagnostic::new("failed to parse end entity certificate").with_detail(e.to_string()))?;

        let provider = crypto_provider();

        verify_server_cert_signed_by_trust_anchor(
            &end_entity_cert,
            &root_store,
            &[],
            now,
            provider.signature_verification_algorithms.all,
        )
        .map_err(|error| {
            ChainDiagnostic::new("failed to verify certification chain")
                .with_detail(error.to_string())
                .with_help(help_for_rustls_error(&error))
        })
    }
}

impl ChainVerifier for RustlsVerifier {
    #[instrument(skip(self))]
    async fn verify_chain(&self, ca: &Path, cert: &Path) -> Result<(), ChainDiagnostic> {
        let read = |path: &Path| {
            let path = path.to_owned();
            async move {
                tokio::fs::read(&path).await.map_err(|e| {
                    ChainDiagnostic::new(format!("failed to read {}", path.display())).with_detail(e.to_string())
                })
            }
        };

        let ca = read(ca).await?;
        let cert = read(cert).await?;

        Self::verify_pem(&ca, &cert, UnixTime::now())
    }
}

fn help_for_rustls_error(error: &Error) -> Option<String> {
    let Error::InvalidCertificate(cert_error) = error else {
        return None;
    };

    match cert_error {
        CertificateError::Expired | CertificateError::ExpiredContext { .. } => Some(help::cert_is_expired()),
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
            Some(help::cert_is_not_yet_valid())
        }
        CertificateError::UnknownIssuer => Some(help::cert_unknown_issuer()),
        CertificateError::BadSignature => Some(help::cert_bad_signature()),
        CertificateError::InvalidPurpose | CertificateError::InvalidPurposeContext { .. } => {
            Some(help::cert_invalid_purpose())
        }
        _ => None,
    }
}
