// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-user certificate issuance and PKCS#12 export.

use crate::config::{p12_password, Paths};
use crate::error::{Error, Result};
use crate::fs::{atomic_write, atomic_write_secret, remove_if_exists};
use crate::name::validate_name;
use crate::pki::{PkiTool, USER_KEY_BITS};
use crate::run::CommandRunner;
use std::path::PathBuf;
use tracing::info;

pub struct CertificateIssuer<'a> {
    paths: &'a Paths,
    runner: &'a dyn CommandRunner,
    p12_password: String,
}

impl<'a> CertificateIssuer<'a> {
    pub fn new(paths: &'a Paths, runner: &'a dyn CommandRunner) -> Self {
        Self {
            paths,
            runner,
            p12_password: p12_password(),
        }
    }

    pub fn with_password(paths: &'a Paths, runner: &'a dyn CommandRunner, password: &str) -> Self {
        Self {
            paths,
            runner,
            p12_password: password.to_string(),
        }
    }

    /// Issue (or reissue) a client certificate for `username` and export it
    /// as a password-protected PKCS#12 bundle. Returns the bundle path.
    ///
    /// Reissuing is not an error: any prior key, certificate and bundle for
    /// the name are destroyed first so two generations never coexist.
    pub fn issue(&self, username: &str) -> Result<PathBuf> {
        let username = validate_name(username)?;

        if !self.paths.ca_exists() {
            return Err(Error::CaNotInitialized);
        }

        let key_path = self.paths.user_key(username);
        let cert_path = self.paths.user_cert(username);
        let p12_path = self.paths.user_p12(username);

        self.remove_artifacts(username)?;

        let pki = PkiTool::new(self.runner);

        let key = pki.generate_rsa_key(USER_KEY_BITS)?;
        atomic_write_secret(&key_path, &key)?;

        let public = pki.public_key(&key_path)?;
        let cert = pki.issue_cert(
            &public,
            &self.paths.ca_cert(),
            &self.paths.ca_key(),
            username,
            &["clientAuth"],
        )?;
        atomic_write(&cert_path, &cert)?;

        pki.export_p12(
            &key_path,
            &cert_path,
            &self.paths.ca_cert(),
            username,
            &p12_path,
            &self.p12_password,
        )?;

        info!(username, p12 = %p12_path.display(), "issued client certificate");
        Ok(p12_path)
    }

    /// Delete the key/cert/p12 triple for `username`. Missing files are
    /// no-ops so removal is idempotent.
    pub fn remove_artifacts(&self, username: &str) -> Result<()> {
        let username = validate_name(username)?;
        remove_if_exists(&self.paths.user_key(username))?;
        remove_if_exists(&self.paths.user_cert(username))?;
        remove_if_exists(&self.paths.user_p12(username))
    }

    /// Usernames with an issued certificate on disk (basenames of
    /// `certs/*.crt`, excluding the server's own certificate).
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.paths.certs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| Error::ReadDir {
            path: dir.clone(),
            source: e,
        })?;

        let mut users: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "crt").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    let name = stem.to_string_lossy().to_string();
                    if name != "server" {
                        users.push(name);
                    }
                }
            }
        }
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::testing::{succeed, ScriptedRunner};
    use std::fs;

    /// Scripted PKI toolchain: key/pub/issue answer on stdout, the pkcs12
    /// export writes its `-out` argument like the real openssl does.
    fn issuing_runner() -> ScriptedRunner {
        ScriptedRunner::new(|argv, _| {
            if argv.contains(&"--gen") {
                succeed("USER KEY\n")
            } else if argv.contains(&"--pub") {
                succeed("USER PUB\n")
            } else if argv.contains(&"--issue") {
                succeed("USER CERT\n")
            } else if argv.contains(&"pkcs12") {
                let out = argv
                    .iter()
                    .position(|a| *a == "-out")
                    .map(|i| argv[i + 1])
                    .expect("-out expected");
                fs::write(out, b"P12 BYTES").expect("p12 write should succeed");
                succeed("")
            } else {
                succeed("")
            }
        })
    }

    fn bootstrapped_paths(dir: &std::path::Path) -> Paths {
        let paths = Paths::under(dir);
        fs::create_dir_all(paths.private_dir()).expect("private dir");
        fs::create_dir_all(paths.certs_dir()).expect("certs dir");
        fs::write(paths.ca_cert(), "CA CERT").expect("ca.crt");
        fs::write(paths.ca_key(), "CA KEY").expect("ca.key");
        paths
    }

    #[test]
    fn test_issue_produces_bundle() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = bootstrapped_paths(dir.path());
        let runner = issuing_runner();

        let issuer = CertificateIssuer::with_password(&paths, &runner, "pw");
        let p12 = issuer.issue("bob").expect("issue should succeed");

        assert_eq!(p12, paths.user_p12("bob"));
        assert_eq!(fs::read(&p12).expect("p12 readable"), b"P12 BYTES");
        assert_eq!(
            fs::read(paths.user_cert("bob")).expect("cert readable"),
            b"USER CERT\n"
        );

        let issue_call = runner
            .calls()
            .into_iter()
            .find(|argv| argv.contains(&"--issue".to_string()))
            .expect("issue should have been invoked");
        assert!(issue_call.contains(&"CN=bob".to_string()));
        assert!(issue_call.contains(&"clientAuth".to_string()));
        assert!(
            !issue_call.contains(&"serverAuth".to_string()),
            "client certificates must never carry serverAuth"
        );
    }

    #[test]
    fn test_reissue_replaces_previous_generation() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = bootstrapped_paths(dir.path());
        fs::write(paths.user_p12("bob"), b"OLD P12").expect("stale p12");
        fs::create_dir_all(paths.private_dir()).expect("private dir");
        fs::write(paths.user_key("bob"), b"OLD KEY").expect("stale key");

        let runner = issuing_runner();
        let issuer = CertificateIssuer::with_password(&paths, &runner, "pw");
        issuer.issue("bob").expect("reissue should succeed");

        assert_eq!(
            fs::read(paths.user_key("bob")).expect("key readable"),
            b"USER KEY\n"
        );
        assert_eq!(
            fs::read(paths.user_p12("bob")).expect("p12 readable"),
            b"P12 BYTES"
        );
    }

    #[test]
    fn test_issue_rejects_injected_username_before_touching_disk() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = bootstrapped_paths(dir.path());
        let runner = ScriptedRunner::ok();

        let issuer = CertificateIssuer::with_password(&paths, &runner, "pw");
        let err = issuer
            .issue("bob$(reboot)")
            .expect_err("metacharacters should be rejected");

        assert!(matches!(err, Error::InvalidName(_)));
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_issue_requires_ca() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = ScriptedRunner::ok();

        let issuer = CertificateIssuer::with_password(&paths, &runner, "pw");
        let err = issuer.issue("bob").expect_err("missing CA should fail");
        assert!(matches!(err, Error::CaNotInitialized));
    }

    #[test]
    fn test_list_skips_server_certificate() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = bootstrapped_paths(dir.path());
        fs::write(paths.user_cert("alice"), "A").expect("alice.crt");
        fs::write(paths.user_cert("bob"), "B").expect("bob.crt");
        fs::write(paths.server_cert(), "S").expect("server.crt");
        fs::write(paths.user_p12("alice"), "P").expect("alice.p12");

        let runner = ScriptedRunner::ok();
        let issuer = CertificateIssuer::with_password(&paths, &runner, "pw");
        assert_eq!(issuer.list().expect("list should succeed"), ["alice", "bob"]);
    }

    #[test]
    fn test_list_tolerates_missing_directory() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = ScriptedRunner::ok();

        let issuer = CertificateIssuer::with_password(&paths, &runner, "pw");
        assert!(issuer.list().expect("list should succeed").is_empty());
    }
}
