use core::fmt;

use crate::verify::ChainDiagnostic;

/// Which credential shape a bind check is exercising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStage {
    /// PKCS#12 archive unlocked with the passphrase.
    Pfx,
    /// Separate private key, certificate and CA files.
    Raw,
}

impl fmt::Display for BindStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindStage::Pfx => write!(f, "PKCS#12 archive"),
            BindStage::Raw => write!(f, "key/certificate/CA files"),
        }
    }
}

/// Steps of a check run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    CollectInputs,
    BindCheck(BindStage),
    ExternalVerify,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The folder could not be listed or holds no candidate file.
    #[error("{0:#}")]
    NoCandidate(anyhow::Error),

    /// A preset file is missing, or an answer could not be read.
    #[error("{0:#}")]
    Input(anyhow::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{stage}: {source:#}")]
    TlsConfig { stage: BindStage, source: anyhow::Error },

    #[error("{0}")]
    ChainVerification(ChainDiagnostic),
}

impl CheckError {
    pub fn passphrase_mismatch() -> Self {
        Self::Validation("PFX confirm password does not match".to_owned())
    }

    pub fn stage(&self) -> CheckStage {
        match self {
            CheckError::NoCandidate(_) | CheckError::Input(_) | CheckError::Validation(_) => {
                CheckStage::CollectInputs
            }
            CheckError::TlsConfig { stage, .. } => CheckStage::BindCheck(*stage),
            CheckError::ChainVerification(_) => CheckStage::ExternalVerify,
        }
    }

    pub fn help(&self) -> Option<String> {
        match self {
            CheckError::NoCandidate(_) => Some(crate::help::no_candidate_files()),
            CheckError::Input(_) | CheckError::Validation(_) => None,
            CheckError::TlsConfig {
                stage: BindStage::Pfx, ..
            } => Some(crate::help::pfx_not_loadable()),
            CheckError::TlsConfig {
                stage: BindStage::Raw, ..
            } => Some(crate::help::raw_files_not_loadable()),
            CheckError::ChainVerification(diagnostic) => diagnostic.help.clone(),
        }
    }
}
