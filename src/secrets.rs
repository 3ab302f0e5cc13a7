// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! Idempotent editor for the IKE daemon's EAP secrets file.
//!
//! One logical record per line: `[ "]<username>["] : EAP "<secret>"`.
//! Header lines with no key before the colon (such as the server's
//! `: RSA server.key` stanza) are never matched or removed. Every edit
//! holds an advisory lock, rewrites the file atomically and tells the
//! daemon to re-read its secrets.

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::fs::{atomic_write_secret, FileLock};
use crate::name::validate_name;
use crate::run::CommandRunner;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct SecretsStore<'a> {
    path: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> SecretsStore<'a> {
    pub fn new(paths: &Paths, runner: &'a dyn CommandRunner) -> Self {
        Self {
            path: paths.ipsec_secrets.clone(),
            runner,
        }
    }

    /// Add or replace the EAP entry for `username`. The new line is always
    /// written unquoted; a prior quoted spelling is dropped as well.
    pub fn upsert(&self, username: &str, secret: &str) -> Result<()> {
        let username = validate_name(username)?;
        if secret.contains('"') || secret.contains('\n') || secret.contains('\r') {
            return Err(Error::InvalidSecret);
        }

        let _lock = FileLock::acquire(&self.path)?;

        let mut lines = self.read_lines()?;
        lines.retain(|line| !line_matches(line, username));
        lines.push(format!("{} : EAP \"{}\"", username, secret));

        self.write_lines(&lines)?;
        self.reread_secrets()?;
        info!(username, "EAP user upserted");
        Ok(())
    }

    /// Drop the entry for `username` (quoted or unquoted spelling).
    /// Removing an absent user is a no-op and does not poke the daemon.
    pub fn remove(&self, username: &str) -> Result<()> {
        let username = validate_name(username)?;

        let _lock = FileLock::acquire(&self.path)?;

        if !self.path.exists() {
            return Ok(());
        }

        let mut lines = self.read_lines()?;
        let before = lines.len();
        lines.retain(|line| !line_matches(line, username));
        if lines.len() == before {
            debug!(username, "no EAP entry to remove");
            return Ok(());
        }

        self.write_lines(&lines)?;
        self.reread_secrets()?;
        info!(username, "EAP user removed");
        Ok(())
    }

    pub fn exists(&self, username: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|u| u == username))
    }

    /// All usernames present in the file, in file order. Missing file means
    /// no users.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .read_lines()?
            .iter()
            .filter_map(|line| line_key(line).map(str::to_string))
            .collect())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| Error::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(content.lines().map(str::to_string).collect())
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        let mut content = lines.join("\n");
        content.push('\n');
        atomic_write_secret(&self.path, content.as_bytes())
    }

    fn reread_secrets(&self) -> Result<()> {
        let output = self.runner.run(&["ipsec", "rereadsecrets"])?;
        if !output.success() {
            return Err(Error::ServiceControl {
                service: "ipsec".to_string(),
                stderr: output.stderr_text(),
            });
        }
        Ok(())
    }
}

/// Key of a secrets line: the first token before the colon, with one layer
/// of double quotes stripped. `None` for header/comment lines.
fn line_key(line: &str) -> Option<&str> {
    let (key, _) = line.split_once(':')?;
    let key = key.trim();
    let key = key
        .strip_prefix('"')
        .and_then(|k| k.strip_suffix('"'))
        .unwrap_or(key);
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

fn line_matches(line: &str, username: &str) -> bool {
    line_key(line) == Some(username)
}
