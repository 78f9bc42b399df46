use expect_test::expect;
use rstest::rstest;
use test_utils::pki::{BundleDir, Pki, PkiOptions};
use testsuite::cli::{assert_stderr_eq, assert_stdout_contains, sslcheck_assert_cmd};

const PASSPHRASE: &str = "s3cr3t";

const BANNER: &str = "===============================
==         SSL Checker       ==
===============================
";

fn bundle_dir(options: PkiOptions) -> BundleDir {
    Pki::generate(options).unwrap().write_to_dir(PASSPHRASE).unwrap()
}

/// Accepts every preselected file, then types the passphrase and its confirmation.
fn default_answers(passphrase: &str, confirmation: &str) -> String {
    format!("\n\n\n\n{passphrase}\n{confirmation}\n")
}

#[test]
fn help_shows_usage() {
    let output = sslcheck_assert_cmd().arg("--help").assert().success();

    assert_stdout_contains(&output, "sslcheck [DIRECTORY] [options]");
    assert_stdout_contains(&output, "--verifier");
    assert_stdout_contains(&output, "--no-wait");
}

#[test]
fn valid_bundle_with_builtin_verifier() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term", "--color", "never"])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    assert_stdout_contains(&output, BANNER);
    assert_stdout_contains(&output, "? Select the SSL KEY");
    assert_stdout_contains(&output, "> 4) server.key");
    assert_stdout_contains(&output, "? Select the SSL PFX (CA)");
    assert_stdout_contains(&output, "? PFX Confirm Password: ");
    assert_stdout_contains(&output, "✔ SSL OK!\n");
}

#[test]
fn preset_files_skip_the_questions() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg("--key")
        .arg(dir.key())
        .arg("--cert")
        .arg(dir.cert())
        .arg("--ca")
        .arg(dir.ca())
        .arg("--pfx")
        .arg(dir.pfx())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term", "--color", "never"])
        .write_stdin(format!("{PASSPHRASE}\n{PASSPHRASE}\n"))
        .assert()
        .success();

    let stdout = std::str::from_utf8(&output.get_output().stdout).unwrap();
    assert!(!stdout.contains("Select the SSL"), "{stdout}");
    assert!(stdout.ends_with("✔ SSL OK!\n"), "{stdout}");
}

#[test]
fn passphrase_mismatch() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--no-wait", "--log-term", "--color", "never"])
        .write_stdin(default_answers(PASSPHRASE, "S3cr3t"))
        .assert()
        .failure()
        .code(1);

    assert_stdout_contains(&output, " PFX confirm password does not match\n");
}

#[test]
fn wrong_pfx_passphrase() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term", "--color", "never"])
        .write_stdin(default_answers("wrong", "wrong"))
        .assert()
        .failure()
        .code(1);

    assert_stdout_contains(&output, "✖ PKCS#12 archive: failed to decrypt PKCS#12 archive");
}

#[test]
fn foreign_ca_with_builtin_verifier() {
    let dir = bundle_dir(PkiOptions::default());
    let other = Pki::generate(PkiOptions {
        ca_name: Some("another root"),
        ..PkiOptions::default()
    })
    .unwrap();
    std::fs::write(dir.ca(), other.ca_pem).unwrap();

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term", "--color", "never"])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .failure()
        .code(1);

    assert_stdout_contains(&output, "✖ failed to verify certification chain");
    assert_stdout_contains(&output, "(issuer is unknown)");
}

#[test]
fn rekeyed_ca_with_builtin_verifier() {
    let dir = bundle_dir(PkiOptions::default());
    let rekeyed = Pki::generate(PkiOptions::default()).unwrap();
    std::fs::write(dir.ca(), rekeyed.ca_pem).unwrap();

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term", "--color", "never"])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .failure()
        .code(1);

    assert_stdout_contains(&output, "✖ failed to verify certification chain");
    assert_stdout_contains(&output, "re-issued with a new key");
}

#[test]
fn truncated_answers() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--no-wait", "--log-term", "--color", "never"])
        .write_stdin("\n\n")
        .assert()
        .failure()
        .code(1);

    let stdout = std::str::from_utf8(&output.get_output().stdout).unwrap();
    assert!(stdout.ends_with(" unexpected end of input\n"), "{stdout}");
    assert!(!stdout.contains("No file could be offered"), "{stdout}");
}

#[test]
fn empty_directory() {
    let dir = tempfile::tempdir().unwrap();

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--no-wait", "--log-term", "--color", "never"])
        .write_stdin("")
        .assert()
        .failure()
        .code(1);

    assert_stdout_contains(&output, " Not found any file\n");
}

#[test]
fn handshake_against_both_listeners() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args([
            "--verifier",
            "rustls",
            "--port",
            "0",
            "--handshake",
            "--no-wait",
            "--log-term",
            "--color",
            "never",
        ])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    assert_stdout_contains(&output, "✔ SSL OK!\n");
}

#[test]
fn press_any_key_returns_on_end_of_input() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--log-term", "--color", "never"])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    let stdout = std::str::from_utf8(&output.get_output().stdout).unwrap();
    assert!(stdout.ends_with("✔ SSL OK!\n\n==== Press any key to exit ====\n"), "{stdout}");
}

#[test]
fn forced_colors() {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term", "--color", "always"])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    assert_stdout_contains(&output, "\x1b[0m\x1b[32m✔ SSL OK!\x1b[0m\n");
}

#[rstest]
#[case::forced_by_env(&[], &[("FORCE_COLOR", "1")], true)]
#[case::explicit_auto_ignores_env(&["--color", "auto"], &[("FORCE_COLOR", "1")], false)]
#[case::explicit_always_ignores_env(&["--color", "always"], &[("NO_COLOR", "1")], true)]
fn color_flag_and_environment(#[case] args: &[&str], #[case] envs: &[(&str, &str)], #[case] expect_ansi: bool) {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .env_remove("NO_COLOR")
        .env_remove("FORCE_COLOR")
        .envs(envs.iter().copied())
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term"])
        .args(args)
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    let stdout = std::str::from_utf8(&output.get_output().stdout).unwrap();
    assert_eq!(stdout.contains("\x1b[32m✔ SSL OK!"), expect_ansi, "{stdout:?}");
}

#[rstest]
#[case::no_color(&[("NO_COLOR", "1")])]
#[case::dumb_term(&[("TERM", "dumb")])]
#[case::not_a_terminal(&[])]
fn auto_colors_disabled(#[case] envs: &[(&str, &str)]) {
    let dir = bundle_dir(PkiOptions::default());

    let output = sslcheck_assert_cmd()
        .env_remove("FORCE_COLOR")
        .envs(envs.iter().copied())
        .arg(dir.path())
        .args(["--verifier", "rustls", "--port", "0", "--no-wait", "--log-term"])
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    let stdout = std::str::from_utf8(&output.get_output().stdout).unwrap();
    assert!(!stdout.contains('\x1b'), "{stdout:?}");
}

#[test]
fn env_args() {
    let dir = bundle_dir(PkiOptions::default());

    let args = format!(
        "'{}' --verifier rustls --port 0 --no-wait --log-term --color never",
        dir.path().display()
    );

    let output = sslcheck_assert_cmd()
        .env("SSLCHECK_ARGS", args)
        .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
        .assert()
        .success();

    assert_stdout_contains(&output, "✔ SSL OK!\n");
}

#[test]
fn invalid_verifier() {
    let output = sslcheck_assert_cmd()
        .args(["--verifier", "gnutls", "--no-wait", "--log-term"])
        .assert()
        .failure()
        .code(1);

    assert_stderr_eq(
        &output,
        expect![[r#"
            invalid 'verifier'

            Caused by:
                unknown verifier 'gnutls' (expected openssl or rustls)
        "#]],
    );
}

#[test]
fn invalid_port() {
    let output = sslcheck_assert_cmd()
        .args(["--port", "invalid", "--no-wait", "--log-term"])
        .assert()
        .failure()
        .code(1);

    assert_stderr_eq(
        &output,
        expect![[r#"
            invalid 'port'

            Caused by:
                expected an integer
        "#]],
    );
}

#[test]
fn out_of_range_port() {
    let output = sslcheck_assert_cmd()
        .args(["--port", "70000", "--no-wait", "--log-term"])
        .assert()
        .failure()
        .code(1);

    assert_stderr_eq(
        &output,
        expect![[r#"
            invalid 'port'

            Caused by:
                70000 is not a valid port number
        "#]],
    );
}

#[test]
fn invalid_color() {
    let output = sslcheck_assert_cmd()
        .args(["--color", "sometimes", "--no-wait", "--log-term"])
        .assert()
        .failure()
        .code(1);

    assert_stderr_eq(
        &output,
        expect![[r#"
            invalid 'color'

            Caused by:
                unknown color mode 'sometimes' (expected always, never or auto)
        "#]],
    );
}

mod openssl {
    use super::*;

    fn openssl_args(program: &std::path::Path) -> Vec<std::ffi::OsString> {
        vec![
            "--openssl".into(),
            program.into(),
            "--port".into(),
            "0".into(),
            "--no-wait".into(),
            "--log-term".into(),
            "--color".into(),
            "never".into(),
        ]
    }

    #[test]
    fn valid_bundle() {
        let Some(program) = test_utils::openssl_program() else {
            eprintln!("openssl not found, skipping");
            return;
        };

        let dir = bundle_dir(PkiOptions::default());

        let output = sslcheck_assert_cmd()
            .arg(dir.path())
            .args(openssl_args(&program))
            .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
            .assert()
            .success();

        assert_stdout_contains(&output, "✔ SSL OK!\n");
    }

    #[test]
    fn foreign_ca() {
        let Some(program) = test_utils::openssl_program() else {
            eprintln!("openssl not found, skipping");
            return;
        };

        let dir = bundle_dir(PkiOptions::default());
        let other = Pki::generate(PkiOptions::default()).unwrap();
        std::fs::write(dir.ca(), other.ca_pem).unwrap();

        let output = sslcheck_assert_cmd()
            .arg(dir.path())
            .args(openssl_args(&program))
            .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
            .assert()
            .failure()
            .code(1);

        assert_stdout_contains(&output, "✖ certificate chain verification failed");
    }

    #[test]
    fn missing_program() {
        let dir = bundle_dir(PkiOptions::default());

        let output = sslcheck_assert_cmd()
            .arg(dir.path())
            .args(["--openssl", "/nonexistent/openssl", "--port", "0", "--no-wait", "--log-term", "--color", "never"])
            .write_stdin(default_answers(PASSPHRASE, PASSPHRASE))
            .assert()
            .failure()
            .code(1);

        assert_stdout_contains(&output, "✖ failed to run /nonexistent/openssl");
    }
}
