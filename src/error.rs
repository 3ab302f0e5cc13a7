// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid name '{0}': only alphanumerics, '.', '_' and '-' are allowed")]
    InvalidName(String),

    #[error("Secret may not contain double quotes or line breaks")]
    InvalidSecret,

    #[error("A secret is required when adding an EAP user")]
    SecretRequired,

    #[error("Unknown user kind '{0}' (expected v2ray, ikev2-cert or ikev2-eap)")]
    UnknownUserKind(String),

    #[error("CA not initialized. Run 'nexus-vpn setup' first.")]
    CaNotInitialized,

    #[error("No Reality destinations specified")]
    NoDestinations,

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid path (non-UTF8): {0}")]
    InvalidPath(PathBuf),

    #[error("Command failed: {command}\n{stderr}")]
    Command { command: String, stderr: String },

    #[error("Command '{command}' timed out after {seconds} seconds")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Certificate operation failed: {command}\n{stderr}")]
    Signing { command: String, stderr: String },

    #[error("Failed to control service '{service}': {stderr}")]
    ServiceControl { service: String, stderr: String },

    #[error("Unexpected output from '{command}': {detail}")]
    UnexpectedOutput { command: String, detail: String },

    #[error("Proxy configuration not found at {0}. Run 'nexus-vpn setup' first.")]
    ProxyConfigMissing(PathBuf),

    #[error("Proxy configuration at {path} is malformed: {detail}")]
    ProxyConfigInvalid { path: PathBuf, detail: String },

    #[error("Failed to parse JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
