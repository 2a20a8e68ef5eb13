#![forbid(unsafe_code)]

use std::io::{self, BufRead, IsTerminal};

use clap::Parser;
use cmp_kernel_contracts::directory::PasswordCredential;
use cmp_tools::cli::{
    execute, open_portal, Cli, SecretPurpose, SecretSource, ENV_NEW_PASSWORD, ENV_PASSWORD,
};
use cmp_tools::config::PortalConfig;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let (mut config, warnings) = PortalConfig::load();
    if let Some(path) = &cli.store {
        config.store_path = path.clone();
    }
    init_logging(&config.log_filter);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let portal = open_portal(&config)?;
    let output = execute(&cli, &portal, &EnvOrPrompt)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

struct EnvOrPrompt;

impl SecretSource for EnvOrPrompt {
    fn secret(&self, purpose: SecretPurpose) -> Result<PasswordCredential, String> {
        let (var, prompt) = match purpose {
            SecretPurpose::SignIn => (ENV_PASSWORD, "Password:"),
            SecretPurpose::NewAccount => (ENV_NEW_PASSWORD, "Password for new account:"),
        };
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Ok(PasswordCredential::new(value));
            }
        }
        read_secret_value(prompt).map(PasswordCredential::new)
    }
}

fn read_secret_value(prompt: &str) -> Result<String, String> {
    if io::stdin().is_terminal() {
        let value = rpassword::prompt_password(prompt).map_err(|e| e.to_string())?;
        if value.trim().is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(value)
    } else {
        // One line per secret, so `staff add` can take both passwords from a pipe.
        let mut input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut input)
            .map_err(|e| e.to_string())?;
        let trimmed = input.trim().to_string();
        if trimmed.is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(trimmed)
    }
}
