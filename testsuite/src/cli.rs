#![allow(clippy::unwrap_used, reason = "test infrastructure can panic on errors")]

use std::sync::LazyLock;

static SSLCHECK_BIN_PATH: LazyLock<std::path::PathBuf> = LazyLock::new(|| {
    escargot::CargoBuild::new()
        .manifest_path("../sslcheck/Cargo.toml")
        .bin("sslcheck")
        .current_release()
        .current_target()
        .run()
        .expect("build sslcheck")
        .path()
        .to_path_buf()
});

pub fn sslcheck_assert_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(&*SSLCHECK_BIN_PATH);
    cmd.env("RUST_BACKTRACE", "0");
    cmd.env_remove("SSLCHECK_ARGS");
    cmd
}

pub fn assert_stdout_contains(output: &assert_cmd::assert::Assert, expected: &str) {
    let stdout = std::str::from_utf8(&output.get_output().stdout).unwrap();
    assert!(stdout.contains(expected), "{expected:?} not found in:\n{stdout}");
}

pub fn assert_stderr_eq(output: &assert_cmd::assert::Assert, expected: expect_test::Expect) {
    let stderr = std::str::from_utf8(&output.get_output().stderr).unwrap();
    expected.assert_eq(stderr);
}
