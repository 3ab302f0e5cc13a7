// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Certificate authority bootstrap.
//!
//! The CA is created once and is immutable afterward; every server and user
//! certificate is signed by it. Bootstrap is idempotent: an existing
//! `ca.crt` means the PKI is already in place and the call is a no-op.

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::fs::{atomic_write, atomic_write_secret, ensure_dir};
use crate::pki::{PkiTool, SERVER_KEY_BITS};
use crate::run::CommandRunner;
use crate::name::validate_name;
use std::fs;
use tracing::info;

pub struct CertificateAuthority<'a> {
    paths: &'a Paths,
    runner: &'a dyn CommandRunner,
}

impl<'a> CertificateAuthority<'a> {
    pub fn new(paths: &'a Paths, runner: &'a dyn CommandRunner) -> Self {
        Self { paths, runner }
    }

    /// Create the CA and server identity for `domain` and publish them into
    /// the IKE daemon's trust store directories. Safe to call repeatedly.
    pub fn bootstrap(&self, domain: &str) -> Result<()> {
        let domain = validate_name(domain)?;

        if self.paths.ca_exists() {
            info!(path = %self.paths.ca_cert().display(), "CA already bootstrapped");
            return Ok(());
        }

        self.create_dirs()?;
        info!(domain, "generating CA and server certificates");

        let pki = PkiTool::new(self.runner);

        let ca_key_path = self.paths.ca_key();
        let ca_cert_path = self.paths.ca_cert();
        let server_key_path = self.paths.server_key();
        let server_cert_path = self.paths.server_cert();

        let ca_key = pki.generate_rsa_key(SERVER_KEY_BITS)?;
        atomic_write_secret(&ca_key_path, &ca_key)?;

        let ca_cert = pki.self_sign_ca(&ca_key_path)?;
        atomic_write(&ca_cert_path, &ca_cert)?;

        let server_key = pki.generate_rsa_key(SERVER_KEY_BITS)?;
        atomic_write_secret(&server_key_path, &server_key)?;

        let server_pub = pki.public_key(&server_key_path)?;
        let server_cert = pki.issue_cert(
            &server_pub,
            &ca_cert_path,
            &ca_key_path,
            domain,
            &["serverAuth", "ikeIntermediate"],
        )?;
        atomic_write(&server_cert_path, &server_cert)?;

        self.publish_to_swan(&ca_cert_path, &server_cert_path, &server_key_path)
    }

    /// Raw bytes of the CA certificate.
    pub fn ca_content(&self) -> Result<Vec<u8>> {
        let path = self.paths.ca_cert();
        if !path.exists() {
            return Err(Error::CaNotInitialized);
        }
        fs::read(&path).map_err(|e| Error::ReadFile { path, source: e })
    }

    fn create_dirs(&self) -> Result<()> {
        let private = self.paths.private_dir();
        ensure_dir(&private)?;
        restrict_to_owner(&private)?;
        ensure_dir(&self.paths.certs_dir())
    }

    /// Copy the CA cert, server cert and server key into the strongSwan
    /// `ipsec.d` layout so charon can find them.
    fn publish_to_swan(
        &self,
        ca_cert: &std::path::Path,
        server_cert: &std::path::Path,
        server_key: &std::path::Path,
    ) -> Result<()> {
        let cacerts = self.paths.swan_cacerts_dir();
        let certs = self.paths.swan_certs_dir();
        let private = self.paths.swan_private_dir();
        ensure_dir(&cacerts)?;
        ensure_dir(&certs)?;
        ensure_dir(&private)?;

        copy_into(ca_cert, &cacerts)?;
        copy_into(server_cert, &certs)?;
        copy_into(server_key, &private)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

fn copy_into(src: &std::path::Path, dir: &std::path::Path) -> Result<()> {
    let file_name = src
        .file_name()
        .ok_or_else(|| Error::InvalidPath(src.to_path_buf()))?;
    fs::copy(src, dir.join(file_name)).map_err(|e| Error::WriteFile {
        path: dir.join(file_name),
        source: e,
    })?;
    Ok(())
}
