// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Xray/Reality proxy configuration synthesis.
//!
//! The proxy daemon owns a single JSON document. This module rewrites it on
//! user and key events while preserving unrelated operator state: unknown
//! fields survive round trips, and in preserve mode the existing client
//! list and private key are kept verbatim with the public key re-derived
//! from that private key. The daemon is restarted (not reloaded) after any
//! effective mutation so the listener rebinds.

use crate::config::{Paths, XRAY_SERVICE};
use crate::error::{Error, Result};
use crate::fs::{atomic_write, ensure_dir, FileLock};
use crate::name::validate_name;
use crate::run::{display_argv, CommandRunner};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Well-known VLESS listening port; TLS termination happens at the Reality
/// transport layer, so inbound decryption stays disabled.
pub const VLESS_PORT: u16 = 443;

/// Flow control mode assigned to every client.
pub const VLESS_FLOW: &str = "xtls-rprx-vision";

/// Client created for the operator on a fresh install.
pub const ADMIN_USER: &str = "admin";

#[derive(Debug, Serialize, Deserialize)]
pub struct XrayConfig {
    #[serde(default)]
    pub log: LogSettings,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub loglevel: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Inbound {
    pub port: u16,
    pub protocol: String,
    pub settings: InboundSettings,
    #[serde(rename = "streamSettings")]
    pub stream_settings: StreamSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboundSettings {
    pub clients: Vec<Client>,
    pub decryption: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub flow: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    #[serde(rename = "realitySettings")]
    pub reality_settings: RealitySettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RealitySettings {
    /// Canonical fronting target as `host:port`.
    pub dest: String,
    #[serde(rename = "serverNames")]
    pub server_names: Vec<String>,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    /// Always re-derived from `private_key`; never trusted independently.
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(rename = "shortIds")]
    pub short_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Outbound {
    pub protocol: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Everything a client needs to connect, reported after synthesis.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub uuid: String,
    pub public_key: String,
    pub short_id: String,
    pub sni: String,
    pub port: u16,
}

pub struct ProxySynthesizer<'a> {
    config_path: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> ProxySynthesizer<'a> {
    pub fn new(paths: &Paths, runner: &'a dyn CommandRunner) -> Self {
        Self {
            config_path: paths.xray_config.clone(),
            runner,
        }
    }

    /// Build or rewrite the proxy configuration.
    ///
    /// `destinations` is one or more `host:port` fronting targets; the first
    /// is the canonical SNI. With `preserve_users` set and a config present,
    /// existing clients and the private key are kept verbatim and only the
    /// destination material changes. Otherwise everything is regenerated and
    /// the client list is reset to a single admin entry.
    pub fn synthesize(
        &self,
        domain: &str,
        destinations: &[String],
        preserve_users: bool,
    ) -> Result<ConnectionInfo> {
        validate_name(domain)?;
        let dest = destinations.first().ok_or(Error::NoDestinations)?.clone();
        let server_names: Vec<String> = destinations
            .iter()
            .map(|d| host_of(d).to_string())
            .collect();
        let sni = server_names[0].clone();

        let _lock = FileLock::acquire(&self.config_path)?;

        let info;
        let config = if preserve_users && self.config_path.exists() {
            let mut config = self.load()?;
            let inbound = first_inbound(&mut config, &self.config_path)?;
            if inbound.settings.clients.is_empty() {
                inbound.settings.clients.push(Client {
                    id: Uuid::new_v4().to_string(),
                    flow: VLESS_FLOW.to_string(),
                    email: ADMIN_USER.to_string(),
                });
            }

            let reality = &mut inbound.stream_settings.reality_settings;
            let public_key = self.derive_public_key(&reality.private_key)?;
            reality.dest = dest;
            reality.server_names = server_names;
            reality.public_key = Some(public_key.clone());
            if reality.short_ids.is_empty() {
                reality.short_ids.push(self.random_short_id()?);
            }

            info = ConnectionInfo {
                uuid: inbound.settings.clients[0].id.clone(),
                public_key,
                short_id: reality.short_ids[0].clone(),
                sni,
                port: inbound.port,
            };
            debug!(dest = %reality.dest, "rewrote Reality destinations, users preserved");
            config
        } else {
            let (private_key, public_key) = self.generate_keypair()?;
            let short_id = self.random_short_id()?;
            let client_id = Uuid::new_v4().to_string();

            info = ConnectionInfo {
                uuid: client_id.clone(),
                public_key: public_key.clone(),
                short_id: short_id.clone(),
                sni,
                port: VLESS_PORT,
            };
            debug!("generated fresh Reality keypair and client list");
            fresh_config(client_id, private_key, public_key, dest, server_names, short_id)
        };

        self.store(&config)?;
        self.restart_daemon()?;
        info!(domain, "proxy configuration synthesized");
        Ok(info)
    }

    /// Add `username` to the client list, or rotate their identifier if they
    /// are already present.
    pub fn add_user(&self, username: &str) -> Result<String> {
        let username = validate_name(username)?;

        let _lock = FileLock::acquire(&self.config_path)?;

        let mut config = self.load()?;
        let inbound = first_inbound(&mut config, &self.config_path)?;
        let id = Uuid::new_v4().to_string();

        match inbound
            .settings
            .clients
            .iter_mut()
            .find(|c| c.email == username)
        {
            Some(client) => client.id = id.clone(),
            None => inbound.settings.clients.push(Client {
                id: id.clone(),
                flow: VLESS_FLOW.to_string(),
                email: username.to_string(),
            }),
        }

        self.store(&config)?;
        self.restart_daemon()?;
        info!(username, "proxy user added");
        Ok(id)
    }

    /// Remove `username` from the client list. Returns `false` (and leaves
    /// the daemon alone) when the user was not present.
    pub fn remove_user(&self, username: &str) -> Result<bool> {
        let username = validate_name(username)?;

        let _lock = FileLock::acquire(&self.config_path)?;

        if !self.config_path.exists() {
            return Ok(false);
        }

        let mut config = self.load()?;
        let inbound = first_inbound(&mut config, &self.config_path)?;
        let before = inbound.settings.clients.len();
        inbound.settings.clients.retain(|c| c.email != username);
        if inbound.settings.clients.len() == before {
            debug!(username, "no proxy client to remove");
            return Ok(false);
        }

        self.store(&config)?;
        self.restart_daemon()?;
        info!(username, "proxy user removed");
        Ok(true)
    }

    /// Client emails in config order; a missing config means no users.
    pub fn list_users(&self) -> Result<Vec<String>> {
        if !self.config_path.exists() {
            return Ok(Vec::new());
        }
        let mut config = self.load()?;
        let inbound = first_inbound(&mut config, &self.config_path)?;
        Ok(inbound
            .settings
            .clients
            .iter()
            .map(|c| c.email.clone())
            .collect())
    }

    fn load(&self) -> Result<XrayConfig> {
        if !self.config_path.exists() {
            return Err(Error::ProxyConfigMissing(self.config_path.clone()));
        }
        let content = fs::read(&self.config_path).map_err(|e| Error::ReadFile {
            path: self.config_path.clone(),
            source: e,
        })?;
        serde_json::from_slice(&content).map_err(|e| Error::Json {
            path: self.config_path.clone(),
            source: e,
        })
    }

    fn store(&self, config: &XrayConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            ensure_dir(parent)?;
        }
        let mut content = serde_json::to_vec_pretty(config).map_err(|e| Error::Json {
            path: self.config_path.clone(),
            source: e,
        })?;
        content.push(b'\n');
        atomic_write(&self.config_path, &content)
    }

    fn restart_daemon(&self) -> Result<()> {
        let output = self.runner.run(&["systemctl", "restart", XRAY_SERVICE])?;
        if !output.success() {
            return Err(Error::ServiceControl {
                service: XRAY_SERVICE.to_string(),
                stderr: output.stderr_text(),
            });
        }
        Ok(())
    }

    /// Generate an X25519 keypair with the daemon's own tool, so the stored
    /// pair is consistent with what the daemon computes at runtime.
    fn generate_keypair(&self) -> Result<(String, String)> {
        let argv = ["xray", "x25519"];
        let output = self.run_key_tool(&argv)?;
        let text = output.stdout_text();
        let private = parse_labeled(&text, "Private key:")
            .ok_or_else(|| unexpected(&argv, "missing 'Private key:' line"))?;
        let public = parse_labeled(&text, "Public key:")
            .ok_or_else(|| unexpected(&argv, "missing 'Public key:' line"))?;
        Ok((private, public))
    }

    /// Re-derive the public half from a stored private key. Must go through
    /// the same primitive as generation; failure is fatal for the operation
    /// since persisting a mismatched pair is a defect, not a state.
    fn derive_public_key(&self, private_key: &str) -> Result<String> {
        let argv = ["xray", "x25519", "-i", private_key];
        let output = self.run_key_tool(&argv)?;
        parse_labeled(&output.stdout_text(), "Public key:")
            .ok_or_else(|| unexpected(&argv, "missing 'Public key:' line"))
    }

    fn random_short_id(&self) -> Result<String> {
        let argv = ["openssl", "rand", "-hex", "4"];
        let output = self.run_key_tool(&argv)?;
        let id = output.stdout_text().trim().to_string();
        if id.is_empty() {
            return Err(unexpected(&argv, "empty short id"));
        }
        Ok(id)
    }

    fn run_key_tool(&self, argv: &[&str]) -> Result<crate::run::CommandOutput> {
        let output = self.runner.run(argv)?;
        if !output.success() {
            return Err(Error::Signing {
                command: display_argv(argv),
                stderr: output.stderr_text(),
            });
        }
        Ok(output)
    }
}

/// Rendered share link for a VLESS/Reality client.
pub fn share_link(domain: &str, info: &ConnectionInfo) -> String {
    format!(
        "vless://{}@{}:{}?encryption=none&flow={}&security=reality&sni={}&fp=chrome&pbk={}&sid={}&type=tcp#NexusVPN-{}",
        info.uuid, domain, info.port, VLESS_FLOW, info.sni, info.public_key, info.short_id, domain
    )
}

fn first_inbound<'c>(config: &'c mut XrayConfig, path: &Path) -> Result<&'c mut Inbound> {
    config
        .inbounds
        .first_mut()
        .ok_or_else(|| Error::ProxyConfigInvalid {
            path: path.to_path_buf(),
            detail: "no inbounds defined".to_string(),
        })
}

fn host_of(dest: &str) -> &str {
    dest.split(':').next().unwrap_or(dest)
}

fn parse_labeled(text: &str, label: &str) -> Option<String> {
    text.lines().find_map(|line| {
        line.strip_prefix(label)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn unexpected(argv: &[&str], detail: &str) -> Error {
    Error::UnexpectedOutput {
        command: display_argv(argv),
        detail: detail.to_string(),
    }
}

fn fresh_config(
    client_id: String,
    private_key: String,
    public_key: String,
    dest: String,
    server_names: Vec<String>,
    short_id: String,
) -> XrayConfig {
    XrayConfig {
        log: LogSettings {
            loglevel: "warning".to_string(),
            extra: Map::new(),
        },
        inbounds: vec![Inbound {
            port: VLESS_PORT,
            protocol: "vless".to_string(),
            settings: InboundSettings {
                clients: vec![Client {
                    id: client_id,
                    flow: VLESS_FLOW.to_string(),
                    email: ADMIN_USER.to_string(),
                }],
                decryption: "none".to_string(),
                extra: Map::new(),
            },
            stream_settings: StreamSettings {
                network: "tcp".to_string(),
                security: "reality".to_string(),
                reality_settings: RealitySettings {
                    dest,
                    server_names,
                    private_key,
                    public_key: Some(public_key),
                    short_ids: vec![short_id],
                    extra: Map::new(),
                },
                extra: Map::new(),
            },
            extra: Map::new(),
        }],
        outbounds: vec![Outbound {
            protocol: "freedom".to_string(),
            extra: Map::new(),
        }],
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::testing::{succeed, ScriptedRunner};
    use std::path::Path;

    /// Fake key tooling: deterministic keypair generation and a derivation
    /// that tags the private key it was fed.
    fn key_tool_runner() -> ScriptedRunner {
        ScriptedRunner::new(|argv, _| match argv {
            ["xray", "x25519"] => succeed("Private key: PRIV-NEW\nPublic key: PUB-NEW\n"),
            ["xray", "x25519", "-i", private] => {
                succeed(&format!("Public key: PUB-FOR-{}\n", private))
            }
            ["openssl", "rand", "-hex", "4"] => succeed("abcd1234\n"),
            _ => succeed(""),
        })
    }

    fn seeded_config(dir: &Path) -> Paths {
        let paths = Paths::under(dir);
        let config = serde_json::json!({
            "log": {"loglevel": "warning"},
            "inbounds": [{
                "port": 443,
                "protocol": "vless",
                "settings": {
                    "clients": [
                        {"id": "uuid-admin", "flow": VLESS_FLOW, "email": "admin"},
                        {"id": "uuid-bob", "flow": VLESS_FLOW, "email": "bob"}
                    ],
                    "decryption": "none"
                },
                "streamSettings": {
                    "network": "tcp",
                    "security": "reality",
                    "realitySettings": {
                        "dest": "www.microsoft.com:443",
                        "serverNames": ["www.microsoft.com"],
                        "privateKey": "PRIV-K",
                        "shortIds": ["abcd1234"]
                    }
                },
                "sniffing": {"enabled": true}
            }],
            "outbounds": [{"protocol": "freedom"}],
            "dns": {"servers": ["1.1.1.1"]}
        });
        std::fs::create_dir_all(paths.xray_config.parent().expect("parent")).expect("mkdir");
        std::fs::write(
            &paths.xray_config,
            serde_json::to_vec_pretty(&config).expect("json"),
        )
        .expect("seed config");
        paths
    }

    fn read_config(paths: &Paths) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(&paths.xray_config).expect("config readable"))
            .expect("config should be valid JSON")
    }

    #[test]
    fn test_preserve_mode_keeps_users_and_private_key() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let dests = vec!["www.cloudflare.com:443".to_string()];
        let info = proxy
            .synthesize("vpn.example.com", &dests, true)
            .expect("preserve synthesize should succeed");

        let config = read_config(&paths);
        let inbound = &config["inbounds"][0];
        let clients = inbound["settings"]["clients"]
            .as_array()
            .expect("clients array");
        let emails: Vec<&str> = clients.iter().map(|c| c["email"].as_str().unwrap()).collect();
        assert_eq!(emails, ["admin", "bob"]);
        assert_eq!(clients[0]["id"], "uuid-admin");

        let reality = &inbound["streamSettings"]["realitySettings"];
        assert_eq!(reality["privateKey"], "PRIV-K");
        assert_eq!(reality["publicKey"], "PUB-FOR-PRIV-K");
        assert_eq!(reality["dest"], "www.cloudflare.com:443");
        assert_eq!(reality["serverNames"][0], "www.cloudflare.com");

        assert_eq!(info.uuid, "uuid-admin");
        assert_eq!(info.public_key, "PUB-FOR-PRIV-K");
        assert_eq!(info.sni, "www.cloudflare.com");
        assert!(runner.invoked("restart"));
    }

    #[test]
    fn test_preserve_mode_keeps_unrelated_state() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        proxy
            .synthesize(
                "vpn.example.com",
                &["www.cloudflare.com:443".to_string()],
                true,
            )
            .expect("preserve synthesize should succeed");

        let config = read_config(&paths);
        assert_eq!(config["dns"]["servers"][0], "1.1.1.1");
        assert_eq!(config["inbounds"][0]["sniffing"]["enabled"], true);
    }

    #[test]
    fn test_reset_mode_regenerates_everything() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let info = proxy
            .synthesize(
                "vpn.example.com",
                &["www.microsoft.com:443".to_string()],
                false,
            )
            .expect("reset synthesize should succeed");

        let config = read_config(&paths);
        let clients = config["inbounds"][0]["settings"]["clients"]
            .as_array()
            .expect("clients array");
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "admin");
        assert_ne!(clients[0]["id"], "uuid-admin");

        let reality = &config["inbounds"][0]["streamSettings"]["realitySettings"];
        assert_eq!(reality["privateKey"], "PRIV-NEW");
        assert_eq!(reality["publicKey"], "PUB-NEW");
        assert_eq!(info.public_key, "PUB-NEW");
        assert_eq!(info.port, VLESS_PORT);
    }

    #[test]
    fn test_synthesize_multiple_destinations() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let dests = vec![
            "www.microsoft.com:443".to_string(),
            "www.apple.com:443".to_string(),
        ];
        let info = proxy
            .synthesize("vpn.example.com", &dests, false)
            .expect("synthesize should succeed");

        let config = read_config(&paths);
        let reality = &config["inbounds"][0]["streamSettings"]["realitySettings"];
        assert_eq!(reality["dest"], "www.microsoft.com:443");
        assert_eq!(reality["serverNames"][0], "www.microsoft.com");
        assert_eq!(reality["serverNames"][1], "www.apple.com");
        assert_eq!(info.sni, "www.microsoft.com");
    }

    #[test]
    fn test_synthesize_requires_destinations() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let err = proxy
            .synthesize("vpn.example.com", &[], false)
            .expect_err("no destinations should fail");
        assert!(matches!(err, Error::NoDestinations));
    }

    #[test]
    fn test_add_user_appends_and_restarts() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        proxy.add_user("carol").expect("add should succeed");

        let config = read_config(&paths);
        let clients = config["inbounds"][0]["settings"]["clients"]
            .as_array()
            .expect("clients array");
        assert!(clients.iter().any(|c| c["email"] == "carol"));
        assert!(clients.iter().any(|c| c["email"] == "admin"));
        assert!(clients.iter().any(|c| c["email"] == "bob"));
        assert!(runner.invoked("restart"));
    }

    #[test]
    fn test_add_existing_user_rotates_identifier() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let new_id = proxy.add_user("bob").expect("re-add should succeed");

        let config = read_config(&paths);
        let clients = config["inbounds"][0]["settings"]["clients"]
            .as_array()
            .expect("clients array");
        let bobs: Vec<_> = clients.iter().filter(|c| c["email"] == "bob").collect();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0]["id"], serde_json::json!(new_id));
        assert_ne!(bobs[0]["id"], "uuid-bob");
    }

    #[test]
    fn test_remove_user_filters_and_restarts() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let removed = proxy.remove_user("bob").expect("remove should succeed");
        assert!(removed);

        let config = read_config(&paths);
        let clients = config["inbounds"][0]["settings"]["clients"]
            .as_array()
            .expect("clients array");
        assert!(clients.iter().all(|c| c["email"] != "bob"));
        assert!(clients.iter().any(|c| c["email"] == "admin"));
        assert!(runner.invoked("restart"));
    }

    #[test]
    fn test_remove_absent_user_leaves_file_and_daemon_alone() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = seeded_config(dir.path());
        let before = std::fs::read(&paths.xray_config).expect("config readable");

        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);
        let removed = proxy.remove_user("mallory").expect("absent remove is a no-op");

        assert!(!removed);
        let after = std::fs::read(&paths.xray_config).expect("config readable");
        assert_eq!(before, after, "file must be byte-identical");
        assert!(!runner.invoked("restart"), "no restart when nothing changed");
    }

    #[test]
    fn test_add_user_requires_config() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        let err = proxy.add_user("carol").expect_err("missing config should fail");
        assert!(matches!(err, Error::ProxyConfigMissing(_)));
    }

    #[test]
    fn test_list_users_with_missing_config_is_empty() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = key_tool_runner();
        let proxy = ProxySynthesizer::new(&paths, &runner);

        assert!(proxy.list_users().expect("list should succeed").is_empty());
    }

    #[test]
    fn test_share_link_contains_connection_material() {
        let info = ConnectionInfo {
            uuid: "u-1".to_string(),
            public_key: "PUB".to_string(),
            short_id: "abcd1234".to_string(),
            sni: "www.microsoft.com".to_string(),
            port: 443,
        };
        let link = share_link("vpn.example.com", &info);
        assert!(link.starts_with("vless://u-1@vpn.example.com:443?"));
        assert!(link.contains("security=reality"));
        assert!(link.contains("pbk=PUB"));
        assert!(link.contains("sid=abcd1234"));
        assert!(link.contains("sni=www.microsoft.com"));
    }
}
