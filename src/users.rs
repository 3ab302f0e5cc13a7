// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! User lifecycle across the three identity backends.
//!
//! A "user" is a name known to one of: the proxy client list (`v2ray`),
//! the certificate store (`ikev2-cert`) or the EAP secrets file
//! (`ikev2-eap`). This module dispatches add/remove/list to the right
//! backend and assembles the client-side artifacts for certificate users.

use crate::cert::CertificateIssuer;
use crate::config::Paths;
use crate::error::{Error, Result};
use crate::fs::atomic_write;
use crate::ikev2::{first_token, parse_left_id};
use crate::name::validate_name;
use crate::profile::MobileProfileBuilder;
use crate::proxy::ProxySynthesizer;
use crate::run::CommandRunner;
use crate::secrets::SecretsStore;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKind {
    /// Proxy client (VLESS over Reality).
    Proxy,
    /// IKEv2 with client certificate authentication.
    Ikev2Cert,
    /// IKEv2 with EAP username/password authentication.
    Ikev2Eap,
}

impl FromStr for UserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v2ray" => Ok(Self::Proxy),
            "ikev2-cert" => Ok(Self::Ikev2Cert),
            "ikev2-eap" => Ok(Self::Ikev2Eap),
            other => Err(Error::UnknownUserKind(other.to_string())),
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Proxy => "v2ray",
            Self::Ikev2Cert => "ikev2-cert",
            Self::Ikev2Eap => "ikev2-eap",
        })
    }
}

/// Resolves the gateway's public address when no identity is configured.
pub trait PublicIpLookup {
    fn public_ip(&self) -> Option<String>;
}

/// Looks the address up over HTTP. Any failure (network, non-success
/// status, implausible body) yields `None`; callers fall back further.
pub struct HttpIpLookup {
    endpoint: String,
}

impl HttpIpLookup {
    pub fn new() -> Self {
        Self {
            endpoint: "https://api.ipify.org".to_string(),
        }
    }
}

impl Default for HttpIpLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicIpLookup for HttpIpLookup {
    fn public_ip(&self) -> Option<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .ok()?;
        let body = client
            .get(&self.endpoint)
            .send()
            .ok()?
            .error_for_status()
            .ok()?
            .text()
            .ok()?;
        let ip = body.trim().to_string();
        // Sanity check before the value ends up inside a client profile.
        if validate_name(&ip).is_err() {
            warn!(body = %body, "discarding implausible public IP response");
            return None;
        }
        Some(ip)
    }
}

pub struct UserManager<'a> {
    paths: &'a Paths,
    runner: &'a dyn CommandRunner,
    ip_lookup: Box<dyn PublicIpLookup + 'a>,
}

impl<'a> UserManager<'a> {
    pub fn new(paths: &'a Paths, runner: &'a dyn CommandRunner) -> Self {
        Self {
            paths,
            runner,
            ip_lookup: Box::new(HttpIpLookup::new()),
        }
    }

    pub fn with_ip_lookup(
        paths: &'a Paths,
        runner: &'a dyn CommandRunner,
        ip_lookup: Box<dyn PublicIpLookup + 'a>,
    ) -> Self {
        Self {
            paths,
            runner,
            ip_lookup,
        }
    }

    /// Add `username` to the backend for `kind`. EAP users need a `secret`;
    /// it is ignored for the other kinds. For certificate users the client
    /// bundle and mobileconfig profile are produced as well, and the
    /// profile path is returned.
    pub fn add(&self, kind: UserKind, username: &str, secret: Option<&str>) -> Result<Option<PathBuf>> {
        match kind {
            UserKind::Proxy => {
                ProxySynthesizer::new(self.paths, self.runner).add_user(username)?;
                Ok(None)
            }
            UserKind::Ikev2Eap => {
                let secret = secret.ok_or(Error::SecretRequired)?;
                SecretsStore::new(self.paths, self.runner).upsert(username, secret)?;
                Ok(None)
            }
            UserKind::Ikev2Cert => {
                CertificateIssuer::new(self.paths, self.runner).issue(username)?;
                let domain = self.resolve_domain();
                let profile =
                    MobileProfileBuilder::new(self.paths).render(username, &domain)?;
                let path = self.paths.mobileconfig(username);
                atomic_write(&path, profile.as_bytes())?;
                info!(username, profile = %path.display(), "client profile written");
                Ok(Some(path))
            }
        }
    }

    /// Remove `username` from the backend for `kind`. Removing an unknown
    /// user is a no-op.
    pub fn remove(&self, kind: UserKind, username: &str) -> Result<()> {
        match kind {
            UserKind::Proxy => {
                ProxySynthesizer::new(self.paths, self.runner).remove_user(username)?;
                Ok(())
            }
            UserKind::Ikev2Eap => SecretsStore::new(self.paths, self.runner).remove(username),
            UserKind::Ikev2Cert => {
                let issuer = CertificateIssuer::new(self.paths, self.runner);
                issuer.remove_artifacts(username)?;
                crate::fs::remove_if_exists(&self.paths.mobileconfig(username))
            }
        }
    }

    /// All known users as `(kind, username)` pairs. A backend whose state
    /// file is absent simply contributes nothing.
    pub fn list(&self) -> Result<Vec<(UserKind, String)>> {
        let mut users = Vec::new();
        for name in ProxySynthesizer::new(self.paths, self.runner).list_users()? {
            users.push((UserKind::Proxy, name));
        }
        for name in CertificateIssuer::new(self.paths, self.runner).list()? {
            users.push((UserKind::Ikev2Cert, name));
        }
        for name in SecretsStore::new(self.paths, self.runner).list()? {
            users.push((UserKind::Ikev2Eap, name));
        }
        Ok(users)
    }

    /// Gateway identity for client profiles. Prefers the configured
    /// `leftid`, then the looked-up public address, then a placeholder the
    /// operator must edit by hand.
    pub fn resolve_domain(&self) -> String {
        if let Ok(conf) = fs::read_to_string(&self.paths.ipsec_conf) {
            if let Some(id) = parse_left_id(&conf) {
                return first_token(&id).to_string();
            }
        }
        if let Some(ip) = self.ip_lookup.public_ip() {
            debug!(ip, "resolved gateway identity from public IP lookup");
            return ip;
        }
        warn!("could not determine gateway identity, emitting placeholder");
        "your-server-ip".to_string()
    }
}
