//! Loading of the server identity from either credential shape.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use secrecy::{ExposeSecret as _, SecretString};

/// Certificate chain (leaf first) and the matching private key.
pub struct ServerIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Decrypts a DER-encoded PKCS#12 archive.
    pub fn from_pkcs12(der: &[u8], passphrase: &SecretString) -> anyhow::Result<Self> {
        use openssl::pkcs12::Pkcs12;

        let archive = Pkcs12::from_der(der).context("not a DER-encoded PKCS#12 archive")?;

        let parsed = archive
            .parse2(passphrase.expose_secret())
            .context("failed to decrypt PKCS#12 archive (wrong password?)")?;

        let leaf = parsed.cert.context("no certificate in PKCS#12 archive")?;
        let pkey = parsed.pkey.context("no private key in PKCS#12 archive")?;

        let mut chain = vec![CertificateDer::from(leaf.to_der().context("encode leaf certificate")?)];

        if let Some(ca) = parsed.ca {
            for (idx, cert) in ca.iter().enumerate() {
                let der = cert
                    .to_der()
                    .with_context(|| format!("encode CA certificate number {idx}"))?;
                chain.push(CertificateDer::from(der));
            }
        }

        let key = pkey.private_key_to_pkcs8().context("encode private key as PKCS#8")?;
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key));

        Ok(Self { chain, key })
    }

    pub fn from_pem(key: &[u8], cert: &[u8], ca: &[u8]) -> anyhow::Result<Self> {
        let key = rustls_pemfile::private_key(&mut &key[..])
            .context("failed to read private key")?
            .context("no private key found in key file")?;

        // Intermediates shipped in the certificate file are served too.
        let mut chain = read_certificates(cert).context("invalid certificate file")?;

        for cert in read_certificates(ca).context("invalid CA file")? {
            if !chain.contains(&cert) {
                chain.push(cert);
            }
        }

        Ok(Self { chain, key })
    }

    pub fn from_pem_files(key: &Path, cert: &Path, ca: &Path) -> anyhow::Result<Self> {
        let key = std::fs::read(key).with_context(|| format!("failed to read {}", key.display()))?;
        let cert = std::fs::read(cert).with_context(|| format!("failed to read {}", cert.display()))?;
        let ca = std::fs::read(ca).with_context(|| format!("failed to read {}", ca.display()))?;

        Self::from_pem(&key, &cert, &ca)
    }

    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.chain.first()
    }
}

/// Reads every certificate in `data`, PEM first, raw DER otherwise.
///
/// Fails when no certificate is found.
pub fn read_certificates(data: &[u8]) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut certificates = Vec::new();

    for (idx, certificate) in rustls_pemfile::certs(&mut &data[..]).enumerate() {
        let certificate = certificate.with_context(|| format!("failed to read certificate number {idx}"))?;
        certificates.push(certificate);
    }

    if certificates.is_empty() {
        // Not PEM, maybe a single DER certificate.
        openssl::x509::X509::from_der(data).context("no PEM or DER certificate found")?;
        certificates.push(CertificateDer::from(data.to_vec()));
    }

    Ok(certificates)
}

pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the TLS server configuration for `identity`.
///
/// Fails when the key cannot be used or does not match the leaf certificate.
pub fn build_server_config(identity: ServerIdentity) -> anyhow::Result<rustls::ServerConfig> {
    use rustls::sign::CertifiedKey;

    let ServerIdentity { chain, key } = identity;

    anyhow::ensure!(!chain.is_empty(), "empty certificate chain");

    let provider = crypto_provider();

    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .context("unsupported private key")?;

    CertifiedKey::new(chain.clone(), signing_key)
        .keys_match()
        .context("private key does not match the certificate")?;

    rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("couldn't set supported TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("couldn't set server config cert")
}

/// Logs the subject, issuer and validity of each certificate.
pub fn log_chain(chain: &[CertificateDer<'_>]) {
    for (cert_idx, cert) in chain.iter().enumerate() {
        if let Err(e) = log_cert(cert_idx, cert) {
            warn!(error = format!("{e:#}"), "Failed to log certificate");
        }
    }
}

fn common_name(name: &openssl::x509::X509NameRef) -> String {
    name.entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .map(|entry| String::from_utf8_lossy(entry.data().as_slice()).into_owned())
        .unwrap_or_else(|| String::from("???"))
}

fn log_cert(cert_idx: usize, cert: &CertificateDer<'_>) -> anyhow::Result<()> {
    use openssl::x509::X509;

    let cert = X509::from_der(cert).context("decode certificate")?;

    info!(
        cert_idx,
        subject = %common_name(cert.subject_name()),
        issuer = %common_name(cert.issuer_name()),
        not_before = %cert.not_before(),
        not_after = %cert.not_after(),
    );

    Ok(())
}
