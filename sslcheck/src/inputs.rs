use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use secrecy::{ExposeSecret as _, SecretString};

use crate::error::CheckError;
use crate::prompt::Prompter;

/// The four files and the PKCS#12 passphrase selected by the user.
pub struct CredentialBundle {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub ca: PathBuf,
    pub pfx: PathBuf,
    pub passphrase: SecretString,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("key", &self.key)
            .field("cert", &self.cert)
            .field("ca", &self.ca)
            .field("pfx", &self.pfx)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputsCfg {
    /// Folder listed for candidate files.
    pub dir: PathBuf,
    /// File name never offered (the running executable).
    pub exclude: Option<OsString>,
    pub key: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub ca: Option<PathBuf>,
    pub pfx: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Key,
    Certificate,
    Chain,
    Pfx,
}

impl MaterialKind {
    pub fn question(self) -> &'static str {
        match self {
            MaterialKind::Key => "Select the SSL KEY",
            MaterialKind::Certificate => "Select the SSL CERTIFICATE",
            MaterialKind::Chain => "Select the SSL CHAIN (CA)",
            MaterialKind::Pfx => "Select the SSL PFX (CA)",
        }
    }

    /// Conventional extension used to preselect a candidate.
    pub fn extension(self) -> &'static str {
        match self {
            MaterialKind::Key => ".key",
            MaterialKind::Certificate => ".crt",
            MaterialKind::Chain => ".ca-bundle",
            MaterialKind::Pfx => ".pfx",
        }
    }
}

/// Lists the regular files of `dir`, sorted by name.
///
/// Dot files and the `exclude` file name are skipped.
pub fn list_candidate_files(dir: &Path, exclude: Option<&OsStr>) -> anyhow::Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;

    let mut candidates = Vec::new();

    for entry in entries {
        let entry = entry.context("failed to read directory entry")?;

        let file_name = entry.file_name();

        if Some(file_name.as_os_str()) == exclude {
            continue;
        }

        let Some(file_name) = file_name.to_str() else {
            debug!(?file_name, "Skip non UTF-8 file name");
            continue;
        };

        if file_name.starts_with('.') {
            continue;
        }

        // Symbolic links are followed.
        let is_file = std::fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false);

        if is_file {
            candidates.push(file_name.to_owned());
        }
    }

    if candidates.is_empty() {
        anyhow::bail!("Not found any file");
    }

    candidates.sort();

    Ok(candidates)
}

/// Index of the first candidate whose name contains `extension`.
pub fn default_for(candidates: &[String], extension: &str) -> Option<usize> {
    candidates.iter().position(|name| name.contains(extension))
}

pub fn confirm_passphrase(passphrase: &SecretString, confirmation: &SecretString) -> Result<(), CheckError> {
    if passphrase.expose_secret() == confirmation.expose_secret() {
        Ok(())
    } else {
        Err(CheckError::passphrase_mismatch())
    }
}

/// Asks the four selection questions and the passphrase twice.
///
/// Files given in `cfg` are used without asking.
pub fn collect_inputs<P: Prompter>(cfg: &InputsCfg, prompter: &mut P) -> Result<CredentialBundle, CheckError> {
    let presets = [&cfg.key, &cfg.cert, &cfg.ca, &cfg.pfx];

    for preset in presets.iter().copied().flatten() {
        if !preset.is_file() {
            return Err(CheckError::Input(anyhow::anyhow!("{}: no such file", preset.display())));
        }
    }

    let candidates = if presets.iter().any(|preset| preset.is_none()) {
        list_candidate_files(&cfg.dir, cfg.exclude.as_deref()).map_err(CheckError::NoCandidate)?
    } else {
        Vec::new()
    };

    let mut select = |kind: MaterialKind, preset: &Option<PathBuf>| -> Result<PathBuf, CheckError> {
        let path = match preset {
            Some(path) => path.clone(),
            None => {
                let default = default_for(&candidates, kind.extension());
                let idx = prompter
                    .select(kind.question(), &candidates, default)
                    .map_err(CheckError::Input)?;
                let name = candidates
                    .get(idx)
                    .ok_or_else(|| CheckError::Input(anyhow::anyhow!("selection {idx} is out of range")))?;
                cfg.dir.join(name)
            }
        };

        debug!(?kind, path = %path.display(), "Selected");

        Ok(path)
    };

    let key = select(MaterialKind::Key, &cfg.key)?;
    let cert = select(MaterialKind::Certificate, &cfg.cert)?;
    let ca = select(MaterialKind::Chain, &cfg.ca)?;
    let pfx = select(MaterialKind::Pfx, &cfg.pfx)?;

    let passphrase = prompter.password("PFX Password: ").map_err(CheckError::Input)?;
    let confirmation = prompter.password("PFX Confirm Password: ").map_err(CheckError::Input)?;

    confirm_passphrase(&passphrase, &confirmation)?;

    Ok(CredentialBundle {
        key,
        cert,
        ca,
        pfx,
        passphrase,
    })
}
