// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Filesystem layout of the gateway state.
//!
//! All paths are explicit fields threaded through constructors so tests can
//! point every store at an isolated temporary tree. `NEXUS_VPN_ROOT`
//! relocates the whole layout under one directory; without it the default
//! system locations are used.

use std::env;
use std::path::{Path, PathBuf};

/// Name of the systemd unit running the Xray proxy daemon.
pub const XRAY_SERVICE: &str = "nexus-xray";

/// Default export password for user PKCS#12 bundles.
const DEFAULT_P12_PASSWORD: &str = "nexusvpn";

/// PKCS#12 export password, overridable via `NEXUS_P12_PASSWORD`.
pub fn p12_password() -> String {
    env::var("NEXUS_P12_PASSWORD").unwrap_or_else(|_| DEFAULT_P12_PASSWORD.to_string())
}

#[derive(Debug, Clone)]
pub struct Paths {
    /// PKI root holding the CA, server and user material.
    pub pki_dir: PathBuf,
    /// strongSwan EAP secrets file.
    pub ipsec_secrets: PathBuf,
    /// strongSwan connection configuration.
    pub ipsec_conf: PathBuf,
    /// strongSwan trust store root (`cacerts/`, `certs/`, `private/`).
    pub ipsec_dir: PathBuf,
    /// Xray proxy configuration document.
    pub xray_config: PathBuf,
    /// Directory client-installable artifacts are written to.
    pub export_dir: PathBuf,
}

impl Paths {
    /// System layout, honoring the `NEXUS_VPN_ROOT` override.
    pub fn new() -> Self {
        match env::var("NEXUS_VPN_ROOT") {
            Ok(root) => Self::under(Path::new(&root)),
            Err(_) => Self {
                pki_dir: PathBuf::from("/etc/nexus-vpn/pki"),
                ipsec_secrets: PathBuf::from("/etc/ipsec.secrets"),
                ipsec_conf: PathBuf::from("/etc/ipsec.conf"),
                ipsec_dir: PathBuf::from("/etc/ipsec.d"),
                xray_config: PathBuf::from("/usr/local/etc/xray/config.json"),
                export_dir: PathBuf::from("."),
            },
        }
    }

    /// Relocate the whole layout under `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            pki_dir: root.join("nexus-vpn/pki"),
            ipsec_secrets: root.join("ipsec.secrets"),
            ipsec_conf: root.join("ipsec.conf"),
            ipsec_dir: root.join("ipsec.d"),
            xray_config: root.join("xray/config.json"),
            export_dir: root.to_path_buf(),
        }
    }

    pub fn private_dir(&self) -> PathBuf {
        self.pki_dir.join("private")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.pki_dir.join("certs")
    }

    pub fn ca_key(&self) -> PathBuf {
        self.private_dir().join("ca.key")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.pki_dir.join("ca.crt")
    }

    pub fn server_key(&self) -> PathBuf {
        self.private_dir().join("server.key")
    }

    pub fn server_cert(&self) -> PathBuf {
        self.certs_dir().join("server.crt")
    }

    pub fn user_key(&self, username: &str) -> PathBuf {
        self.private_dir().join(format!("{}.key", username))
    }

    pub fn user_cert(&self, username: &str) -> PathBuf {
        self.certs_dir().join(format!("{}.crt", username))
    }

    pub fn user_p12(&self, username: &str) -> PathBuf {
        self.certs_dir().join(format!("{}.p12", username))
    }

    pub fn mobileconfig(&self, username: &str) -> PathBuf {
        self.export_dir.join(format!("{}.mobileconfig", username))
    }

    /// strongSwan directory the CA certificate is published into.
    pub fn swan_cacerts_dir(&self) -> PathBuf {
        self.ipsec_dir.join("cacerts")
    }

    /// strongSwan directory the server certificate is published into.
    pub fn swan_certs_dir(&self) -> PathBuf {
        self.ipsec_dir.join("certs")
    }

    /// strongSwan directory the server key is published into.
    pub fn swan_private_dir(&self) -> PathBuf {
        self.ipsec_dir.join("private")
    }

    /// An empty or missing CA certificate means "not yet bootstrapped".
    pub fn ca_exists(&self) -> bool {
        self.ca_cert().exists()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
