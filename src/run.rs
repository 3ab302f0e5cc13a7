// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! External command execution.
//!
//! Every privileged tool this crate drives (`ipsec`, `openssl`, `xray`,
//! `systemctl`) goes through the [`CommandRunner`] trait so tests can
//! substitute a scripted implementation and record the exact invocations.

use crate::error::{Error, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// Default bound on any single external command. A hung tool fails the
/// operation instead of blocking it indefinitely.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs privileged external commands on behalf of the stores.
pub trait CommandRunner {
    /// Run `argv` to completion and capture its output. Spawn failures and
    /// timeouts are errors; a non-zero exit status is not, and must be
    /// classified by the call site.
    fn run(&self, argv: &[&str]) -> Result<CommandOutput>;

    /// Like [`CommandRunner::run`], feeding `input` to the child's stdin.
    fn run_with_input(&self, argv: &[&str], input: &[u8]) -> Result<CommandOutput>;
}

pub fn display_argv(argv: &[&str]) -> String {
    argv.join(" ")
}

/// Executes commands directly on the host. The process is expected to run
/// with sufficient privileges (the installer runs this tool as root).
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn spawn_and_wait(&self, argv: &[&str], input: Option<&[u8]>) -> Result<CommandOutput> {
        let command = display_argv(argv);
        let (program, args) = argv.split_first().ok_or_else(|| Error::Command {
            command: command.clone(),
            stderr: "empty command line".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Command {
                command: command.clone(),
                stderr: e.to_string(),
            })?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).map_err(|e| Error::Command {
                    command: command.clone(),
                    stderr: format!("failed to write stdin: {}", e),
                })?;
                // Dropping stdin closes the pipe so the child sees EOF.
            }
        }

        let start = std::time::Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    let output = child.wait_with_output().map_err(|e| Error::Command {
                        command: command.clone(),
                        stderr: e.to_string(),
                    })?;
                    return Ok(CommandOutput {
                        code: output.status.code().unwrap_or(-1),
                        stdout: output.stdout,
                        stderr: output.stderr,
                    });
                }
                Ok(None) => {
                    if start.elapsed() >= self.timeout {
                        // Kill and reap so no zombie is left behind.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::CommandTimeout {
                            command,
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(Error::Command {
                        command,
                        stderr: e.to_string(),
                    });
                }
            }
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        self.spawn_and_wait(argv, None)
    }

    fn run_with_input(&self, argv: &[&str], input: &[u8]) -> Result<CommandOutput> {
        self.spawn_and_wait(argv, Some(input))
    }
}
