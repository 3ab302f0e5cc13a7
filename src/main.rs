// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use nexus_vpn::ca::CertificateAuthority;
use nexus_vpn::config::Paths;
use nexus_vpn::error::Result;
use nexus_vpn::proxy::{share_link, ProxySynthesizer};
use nexus_vpn::run::SystemRunner;
use nexus_vpn::users::{UserKind, UserManager};
use nexus_vpn::{ikev2, Error};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nexus-vpn", version, about = "NexusVPN gateway identity and configuration manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the gateway: CA, server identity, IKEv2 and proxy config
    Setup {
        /// Public DNS name of this gateway
        #[arg(long)]
        domain: String,
        /// Reality fronting destination(s) as host:port; first is canonical
        #[arg(long = "dest", required = true)]
        destinations: Vec<String>,
        /// Keep existing proxy users and keys, only rewrite destinations
        #[arg(long)]
        preserve_users: bool,
    },
    /// Manage users across the authentication backends
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Certificate authority operations
    Ca {
        #[command(subcommand)]
        command: CaCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user
    Add {
        /// Backend: v2ray, ikev2-cert or ikev2-eap
        #[arg(long)]
        kind: String,
        username: String,
        /// EAP password; prompted for interactively when omitted
        #[arg(long)]
        secret: Option<String>,
    },
    /// Remove a user
    Remove {
        /// Backend: v2ray, ikev2-cert or ikev2-eap
        #[arg(long)]
        kind: String,
        username: String,
    },
    /// List all users across all backends
    List,
}

#[derive(Subcommand)]
enum CaCommands {
    /// Print the CA certificate to stdout
    Export,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::new();
    let runner = SystemRunner::new();

    match cli.command {
        Commands::Setup {
            domain,
            destinations,
            preserve_users,
        } => {
            CertificateAuthority::new(&paths, &runner).bootstrap(&domain)?;
            ikev2::write_conn_config(&paths, &runner, &domain)?;
            let info = ProxySynthesizer::new(&paths, &runner).synthesize(
                &domain,
                &destinations,
                preserve_users,
            )?;
            println!("Gateway ready.");
            println!("Proxy share link:\n{}", share_link(&domain, &info));
            Ok(())
        }
        Commands::User { command } => {
            let manager = UserManager::new(&paths, &runner);
            match command {
                UserCommands::Add {
                    kind,
                    username,
                    secret,
                } => {
                    let kind: UserKind = kind.parse()?;
                    let secret = match (kind, secret) {
                        (UserKind::Ikev2Eap, None) => Some(prompt_secret(&username)?),
                        (_, secret) => secret,
                    };
                    let profile = manager.add(kind, &username, secret.as_deref())?;
                    println!("Added {} user '{}'.", kind, username);
                    if let Some(profile) = profile {
                        println!("Client profile: {}", profile.display());
                    }
                    Ok(())
                }
                UserCommands::Remove { kind, username } => {
                    let kind: UserKind = kind.parse()?;
                    manager.remove(kind, &username)?;
                    println!("Removed {} user '{}'.", kind, username);
                    Ok(())
                }
                UserCommands::List => {
                    for (kind, username) in manager.list()? {
                        println!("{}\t{}", kind, username);
                    }
                    Ok(())
                }
            }
        }
        Commands::Ca { command } => match command {
            CaCommands::Export => {
                let ca = CertificateAuthority::new(&paths, &runner).ca_content()?;
                print!("{}", String::from_utf8_lossy(&ca));
                Ok(())
            }
        },
    }
}

fn prompt_secret(username: &str) -> Result<String> {
    let secret = rpassword::prompt_password(format!("EAP password for '{}': ", username))
        .map_err(|_| Error::SecretRequired)?;
    if secret.is_empty() {
        return Err(Error::SecretRequired);
    }
    Ok(secret)
}
