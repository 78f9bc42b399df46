//! Throwaway certification authority, leaf certificate and PKCS#12 archive.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    date_time_ymd,
};
use tempfile::TempDir;

pub const KEY_FILE: &str = "server.key";
pub const CERT_FILE: &str = "server.crt";
pub const CA_FILE: &str = "root.ca-bundle";
pub const PFX_FILE: &str = "bundle.pfx";

#[derive(Debug, Clone, Copy, Default)]
pub struct PkiOptions {
    /// Leaf valid from 2020 to 2021.
    pub expired: bool,
    /// Leaf restricted to client authentication.
    pub client_auth_only: bool,
    /// Common name of the root, `sslcheck test root` when unset.
    pub ca_name: Option<&'static str>,
}

/// A root CA and a `localhost` leaf it issued.
pub struct Pki {
    pub ca_pem: String,
    pub ca_der: Vec<u8>,
    pub leaf_pem: String,
    pub leaf_der: Vec<u8>,
    pub leaf_key_pem: String,
}

impl Pki {
    pub fn generate(options: PkiOptions) -> anyhow::Result<Self> {
        let ca_key = KeyPair::generate().context("generate CA key")?;

        let mut ca_params = CertificateParams::new(Vec::<String>::new()).context("CA params")?;
        ca_params
            .distinguished_name
            .push(DnType::CommonName, options.ca_name.unwrap_or("sslcheck test root"));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let ca_cert = ca_params.self_signed(&ca_key).context("self-sign CA")?;

        let leaf_key = KeyPair::generate().context("generate leaf key")?;

        let mut leaf_params = CertificateParams::new(vec!["localhost".to_owned()]).context("leaf params")?;
        leaf_params.distinguished_name.push(DnType::CommonName, "localhost");
        leaf_params.extended_key_usages = if options.client_auth_only {
            vec![ExtendedKeyUsagePurpose::ClientAuth]
        } else {
            vec![ExtendedKeyUsagePurpose::ServerAuth]
        };
        leaf_params.not_before = date_time_ymd(2020, 1, 1);
        leaf_params.not_after = if options.expired {
            date_time_ymd(2021, 1, 1)
        } else {
            date_time_ymd(2050, 1, 1)
        };

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .context("sign leaf")?;

        Ok(Self {
            ca_pem: ca_cert.pem(),
            ca_der: ca_cert.der().to_vec(),
            leaf_pem: leaf_cert.pem(),
            leaf_der: leaf_cert.der().to_vec(),
            leaf_key_pem: leaf_key.serialize_pem(),
        })
    }

    /// PKCS#12 archive holding the leaf, its key and the CA.
    pub fn pkcs12(&self, passphrase: &str) -> anyhow::Result<Vec<u8>> {
        use openssl::pkcs12::Pkcs12;
        use openssl::pkey::PKey;
        use openssl::stack::Stack;
        use openssl::x509::X509;

        let pkey = PKey::private_key_from_pem(self.leaf_key_pem.as_bytes()).context("load leaf key")?;
        let leaf = X509::from_der(&self.leaf_der).context("load leaf")?;

        let mut ca = Stack::new().context("new stack")?;
        ca.push(X509::from_der(&self.ca_der).context("load CA")?)
            .context("push CA")?;

        let archive = Pkcs12::builder()
            .name("sslcheck")
            .pkey(&pkey)
            .cert(&leaf)
            .ca(ca)
            .build2(passphrase)
            .context("build PKCS#12")?;

        archive.to_der().context("encode PKCS#12")
    }

    /// Writes `server.key`, `server.crt`, `root.ca-bundle` and `bundle.pfx` into a fresh folder.
    pub fn write_to_dir(&self, passphrase: &str) -> anyhow::Result<BundleDir> {
        let dir = tempfile::tempdir().context("create temporary directory")?;

        std::fs::write(dir.path().join(KEY_FILE), &self.leaf_key_pem).context("write key")?;
        std::fs::write(dir.path().join(CERT_FILE), &self.leaf_pem).context("write certificate")?;
        std::fs::write(dir.path().join(CA_FILE), &self.ca_pem).context("write CA")?;
        std::fs::write(dir.path().join(PFX_FILE), self.pkcs12(passphrase)?).context("write PFX")?;

        Ok(BundleDir { dir })
    }
}

/// Folder holding the four bundle files, removed on drop.
pub struct BundleDir {
    dir: TempDir,
}

impl BundleDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn key(&self) -> PathBuf {
        self.path().join(KEY_FILE)
    }

    pub fn cert(&self) -> PathBuf {
        self.path().join(CERT_FILE)
    }

    pub fn ca(&self) -> PathBuf {
        self.path().join(CA_FILE)
    }

    pub fn pfx(&self) -> PathBuf {
        self.path().join(PFX_FILE)
    }
}
