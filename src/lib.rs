// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Identity and configuration management for a NexusVPN gateway.
//!
//! The gateway runs two data planes side by side: strongSwan terminating
//! IKEv2/IPsec and an Xray daemon terminating VLESS over Reality. This
//! crate owns the control plane for both: a local certificate authority,
//! per-user credentials across three authentication backends, the daemons'
//! configuration files and the client-installable artifacts (PKCS#12
//! bundles, Apple profiles, share links).
//!
//! All privileged work happens through external tools (`ipsec pki`,
//! `openssl`, `xray`, `systemctl`) behind the [`run::CommandRunner`] seam,
//! so every store can be tested against a scripted runner and a temporary
//! directory tree.

pub mod ca;
pub mod cert;
pub mod config;
pub mod error;
pub mod fs;
pub mod ikev2;
pub mod name;
pub mod pki;
pub mod profile;
pub mod proxy;
pub mod run;
pub mod secrets;
pub mod users;

pub use ca::CertificateAuthority;
pub use cert::CertificateIssuer;
pub use config::Paths;
pub use error::{Error, Result};
pub use profile::MobileProfileBuilder;
pub use proxy::{ConnectionInfo, ProxySynthesizer};
pub use run::{CommandRunner, SystemRunner};
pub use secrets::SecretsStore;
pub use users::{UserKind, UserManager};
