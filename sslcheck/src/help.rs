pub(crate) fn no_candidate_files() -> String {
    "No file could be offered for selection.
Please verify that:
- You started the checker from the folder holding the key, certificate, CA bundle and PFX files.
- Or you passed that folder as the first argument."
        .to_owned()
}

pub(crate) fn pfx_not_loadable() -> String {
    "The PFX (PKCS#12) archive could not be used to configure a TLS server.
Please verify that:
- The selected file is the PFX archive (binary DER, usually with a .pfx or .p12 extension).
- The password is the one used when exporting the archive.
- The archive holds both the private key and the certificate.
Archives exported with legacy algorithms (RC2, 3DES) may need to be exported again with AES."
        .to_owned()
}

pub(crate) fn raw_files_not_loadable() -> String {
    "The key, certificate and CA files could not be used to configure a TLS server.
Please verify that:
- The key file holds an unencrypted PEM private key (PKCS#8, PKCS#1 or SEC1).
- The certificate file holds the certificate issued for that same private key.
- The CA bundle holds one or more PEM certificates."
        .to_owned()
}

pub(crate) fn verifier_missing(program: &str) -> String {
    format!(
        "The chain verification program '{program}' could not be executed.
To resolve this issue, you can:
- Install OpenSSL and make sure 'openssl' is found in the PATH.
- Place the OpenSSL executable in an 'openssl-lib' folder next to the certificate files.
- Point to the executable with the --openssl option.
- Use the built-in verifier with --verifier rustls."
    )
}

pub(crate) fn cert_unknown_issuer() -> String {
    "The certificate is not issued by any certificate found in the CA bundle (issuer is unknown).
Please ensure the following:
- The CA bundle is the chain delivered with this certificate.
- The CA bundle contains the issuing (intermediate) certificate, not only the root.
- The certificate file contains the server certificate and not one of the CA certificates."
        .to_owned()
}

pub(crate) fn cert_bad_signature() -> String {
    "The CA bundle holds a certificate with the expected issuer name, but its key did not sign this certificate.
This usually happens when the root or intermediate was re-issued with a new key.
Please ensure the following:
- The CA bundle comes from the same order as the certificate.
- No older copy of the intermediate certificate is left in the CA bundle."
        .to_owned()
}

pub(crate) fn cert_is_expired() -> String {
    "The selected certificate is past its expiry date (notAfter).
Request a renewed certificate, then export the key, certificate, CA bundle and PFX again.
When the dates look right, check the clock of this machine."
        .to_owned()
}

pub(crate) fn cert_is_not_yet_valid() -> String {
    "The selected certificate starts being valid in the future (notBefore).
Check the clock of this machine, or wait until the validity period begins."
        .to_owned()
}

pub(crate) fn cert_invalid_purpose() -> String {
    "The selected certificate carries an extended key usage without TLS Web Server Authentication.
Request a certificate issued for server authentication (serverAuth) for this bundle."
        .to_owned()
}
