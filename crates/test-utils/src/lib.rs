pub mod pki;

use std::path::PathBuf;
use std::process::{Command, Stdio};

/// The OpenSSL executable, if one can be run.
///
/// `SSLCHECK_TEST_OPENSSL` overrides the `openssl` found in the PATH.
pub fn openssl_program() -> Option<PathBuf> {
    let program = std::env::var_os("SSLCHECK_TEST_OPENSSL")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openssl"));

    let status = Command::new(&program)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .ok()?;

    status.success().then_some(program)
}
