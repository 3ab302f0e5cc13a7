// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! strongSwan connection configuration.

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::fs::atomic_write;
use crate::run::CommandRunner;
use tracing::info;

/// First whitespace-delimited token of a stored domain value. Malformed
/// config occasionally carries trailing junk; only the leading token is a
/// usable identity.
pub fn first_token(domain: &str) -> &str {
    domain.split_whitespace().next().unwrap_or("")
}

/// Render and install the IKEv2 connection config for `domain`, then ask
/// the daemon to reload it.
pub fn write_conn_config(paths: &Paths, runner: &dyn CommandRunner, domain: &str) -> Result<()> {
    let domain = first_token(domain);
    let config = render_conn_config(domain);
    atomic_write(&paths.ipsec_conf, config.as_bytes())?;

    let output = runner.run(&["ipsec", "reload"])?;
    if !output.success() {
        return Err(Error::ServiceControl {
            service: "ipsec".to_string(),
            stderr: output.stderr_text(),
        });
    }
    info!(domain, path = %paths.ipsec_conf.display(), "IKEv2 connection config installed");
    Ok(())
}

/// Extract the gateway identity from a `leftid=@<name>` field.
pub fn parse_left_id(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        line.trim()
            .strip_prefix("leftid=@")
            .map(|id| first_token(id).to_string())
    })
}

fn render_conn_config(domain: &str) -> String {
    format!(
        r#"config setup
    charondebug="ike 1, knl 1, cfg 0"
    uniqueids=no

conn %default
    keyexchange=ikev2
    ike=aes256-sha256-modp2048,aes256-sha1-modp1024!
    esp=aes256-sha256,aes256-sha1!
    dpdaction=clear
    dpddelay=300s
    rekey=no
    left=%any
    leftid=@{domain}
    leftcert=server.crt
    leftsendcert=always
    leftsubnet=0.0.0.0/0
    right=%any
    rightdns=8.8.8.8,1.1.1.1
    rightsourceip=10.10.10.0/24

conn IKEv2-Cert
    rightauth=pubkey
    auto=add

conn IKEv2-EAP
    rightauth=eap-mschapv2
    eap_identity=%identity
    auto=add
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::testing::ScriptedRunner;
    use std::fs;

    #[test]
    fn test_conn_config_content() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = ScriptedRunner::ok();

        write_conn_config(&paths, &runner, "example.com").expect("write should succeed");

        let content = fs::read_to_string(&paths.ipsec_conf).expect("conf readable");
        assert!(content.contains("keyexchange=ikev2"));
        assert!(content.contains("leftid=@example.com"));
        assert!(content.contains("conn IKEv2-Cert"));
        assert!(content.contains("conn IKEv2-EAP"));
        assert!(runner.invoked("reload"));
    }

    #[test]
    fn test_conn_config_truncates_domain_to_first_token() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::under(dir.path());
        let runner = ScriptedRunner::ok();

        write_conn_config(&paths, &runner, "example.com   extra stuff")
            .expect("write should succeed");

        let content = fs::read_to_string(&paths.ipsec_conf).expect("conf readable");
        assert!(content.contains("leftid=@example.com"));
        assert!(!content.contains("extra"));
    }

    #[test]
    fn test_parse_left_id() {
        let conf = "config setup\n\nconn IKEv2-Cert\n    leftid=@vpn.example.com\n    auto=add\n";
        assert_eq!(
            parse_left_id(conf).expect("leftid should parse"),
            "vpn.example.com"
        );
    }

    #[test]
    fn test_parse_left_id_absent() {
        assert_eq!(parse_left_id("config setup\n"), None);
    }
}
