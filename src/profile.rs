// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Apple `.mobileconfig` provisioning profiles.
//!
//! One profile per certificate user, carrying three payloads: the CA root,
//! the user's PKCS#12 identity and an IKEv2 VPN configuration wired to use
//! that identity. Installing the profile on an iPhone or Mac sets up the
//! tunnel in one tap.

use crate::config::{p12_password, Paths};
use crate::error::{Error, Result};
use crate::ikev2::first_token;
use crate::name::validate_name;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub struct MobileProfileBuilder<'a> {
    paths: &'a Paths,
    p12_password: String,
}

impl<'a> MobileProfileBuilder<'a> {
    pub fn new(paths: &'a Paths) -> Self {
        Self {
            paths,
            p12_password: p12_password(),
        }
    }

    pub fn with_password(paths: &'a Paths, password: &str) -> Self {
        Self {
            paths,
            p12_password: password.to_string(),
        }
    }

    /// Render the profile XML for `username`, embedding the CA certificate
    /// and the user's PKCS#12 bundle from disk. `domain` is the gateway
    /// identity clients dial; only its first token is used.
    pub fn render(&self, username: &str, domain: &str) -> Result<String> {
        let username = validate_name(username)?;
        let domain = first_token(domain);

        let ca = read_b64(&self.paths.ca_cert())?;
        let p12 = read_b64(&self.paths.user_p12(username))?;

        let ca_uuid = Uuid::new_v4();
        let p12_uuid = Uuid::new_v4();
        let vpn_uuid = Uuid::new_v4();
        let profile_uuid = Uuid::new_v4();

        Ok(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>PayloadContent</key>
    <array>
        <dict>
            <key>PayloadCertificateFileName</key>
            <string>ca.crt</string>
            <key>PayloadContent</key>
            <data>{ca}</data>
            <key>PayloadDescription</key>
            <string>NexusVPN Root CA</string>
            <key>PayloadDisplayName</key>
            <string>NexusVPN Root CA</string>
            <key>PayloadIdentifier</key>
            <string>com.nexusvpn.ca.{ca_uuid}</string>
            <key>PayloadType</key>
            <string>com.apple.security.root</string>
            <key>PayloadUUID</key>
            <string>{ca_uuid}</string>
            <key>PayloadVersion</key>
            <integer>1</integer>
        </dict>
        <dict>
            <key>Password</key>
            <string>{password}</string>
            <key>PayloadCertificateFileName</key>
            <string>{username}.p12</string>
            <key>PayloadContent</key>
            <data>{p12}</data>
            <key>PayloadDescription</key>
            <string>Client certificate for {username}</string>
            <key>PayloadDisplayName</key>
            <string>{username}.p12</string>
            <key>PayloadIdentifier</key>
            <string>com.nexusvpn.p12.{p12_uuid}</string>
            <key>PayloadType</key>
            <string>com.apple.security.pkcs12</string>
            <key>PayloadUUID</key>
            <string>{p12_uuid}</string>
            <key>PayloadVersion</key>
            <integer>1</integer>
        </dict>
        <dict>
            <key>IKEv2</key>
            <dict>
                <key>AuthenticationMethod</key>
                <string>Certificate</string>
                <key>ChildSecurityAssociationParameters</key>
                <dict>
                    <key>DiffieHellmanGroup</key>
                    <integer>14</integer>
                    <key>EncryptionAlgorithm</key>
                    <string>AES-256</string>
                    <key>IntegrityAlgorithm</key>
                    <string>SHA2-256</string>
                    <key>LifeTimeInMinutes</key>
                    <integer>1440</integer>
                </dict>
                <key>IKESecurityAssociationParameters</key>
                <dict>
                    <key>DiffieHellmanGroup</key>
                    <integer>14</integer>
                    <key>EncryptionAlgorithm</key>
                    <string>AES-256</string>
                    <key>IntegrityAlgorithm</key>
                    <string>SHA2-256</string>
                    <key>LifeTimeInMinutes</key>
                    <integer>1440</integer>
                </dict>
                <key>LocalIdentifier</key>
                <string>{username}</string>
                <key>PayloadCertificateUUID</key>
                <string>{p12_uuid}</string>
                <key>RemoteAddress</key>
                <string>{domain}</string>
                <key>RemoteIdentifier</key>
                <string>{domain}</string>
                <key>ServerCertificateIssuerCommonName</key>
                <string>NexusVPN Root CA</string>
            </dict>
            <key>PayloadDescription</key>
            <string>IKEv2 tunnel to {domain}</string>
            <key>PayloadDisplayName</key>
            <string>NexusVPN ({username})</string>
            <key>PayloadIdentifier</key>
            <string>com.nexusvpn.vpn.{vpn_uuid}</string>
            <key>PayloadType</key>
            <string>com.apple.vpn.managed</string>
            <key>PayloadUUID</key>
            <string>{vpn_uuid}</string>
            <key>PayloadVersion</key>
            <integer>1</integer>
            <key>UserDefinedName</key>
            <string>NexusVPN ({username})</string>
            <key>VPNType</key>
            <string>IKEv2</string>
        </dict>
    </array>
    <key>PayloadDisplayName</key>
    <string>NexusVPN ({username})</string>
    <key>PayloadIdentifier</key>
    <string>com.nexusvpn.profile.{profile_uuid}</string>
    <key>PayloadRemovalDisallowed</key>
    <false/>
    <key>PayloadType</key>
    <string>Configuration</string>
    <key>PayloadUUID</key>
    <string>{profile_uuid}</string>
    <key>PayloadVersion</key>
    <integer>1</integer>
</dict>
</plist>
"#,
            password = self.p12_password,
        ))
    }
}

fn read_b64(path: &Path) -> Result<String> {
    let content = fs::read(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(BASE64.encode(content))
}
