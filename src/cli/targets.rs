//! CLI command for managing configured targets.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use twopence::config::{Config, TargetConfig};
use twopence::PluginRegistry;

use super::failure;

#[derive(Args)]
#[command(about = "List or edit configured targets")]
pub struct TargetsCommand {
    #[command(subcommand)]
    pub action: Option<TargetsAction>,
}

#[derive(Subcommand)]
pub enum TargetsAction {
    /// List configured targets (the default)
    List,

    /// Show the configuration file path
    Path,

    /// Add or replace a target
    Add {
        /// Name to refer to the target by
        name: String,

        /// Target spec, e.g. ssh:sut.example.com:2222
        spec: String,

        /// Remote user for this target
        #[arg(short, long)]
        user: Option<String>,

        /// Command timeout in seconds for this target
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Remove a target
    Remove {
        /// Name of the target to remove
        name: String,
    },
}

impl TargetsCommand {
    pub fn execute(self) -> Result<()> {
        match self.action.unwrap_or(TargetsAction::List) {
            TargetsAction::List => list_targets(),
            TargetsAction::Path => show_path(),
            TargetsAction::Add {
                name,
                spec,
                user,
                timeout,
            } => add_target(name, spec, user, timeout),
            TargetsAction::Remove { name } => remove_target(&name),
        }
    }
}

fn list_targets() -> Result<()> {
    let config = Config::load()?;
    if config.targets.is_empty() {
        println!("No targets configured.");
        println!();
        println!("To add one, run:");
        println!("  twopence targets add <name> ssh:<host>[:<port>]");
        return Ok(());
    }

    println!("Configured targets:");
    println!("{:-<60}", "");
    for (name, target) in &config.targets {
        println!("{}", name);
        println!("  Spec:    {}", target.spec);
        println!(
            "  User:    {}",
            target
                .user
                .as_deref()
                .or(config.defaults.user.as_deref())
                .unwrap_or("root")
        );
        println!(
            "  Timeout: {}s",
            target.timeout.unwrap_or(config.defaults.timeout)
        );
    }
    Ok(())
}

fn show_path() -> Result<()> {
    match Config::default_path() {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("Could not determine the configuration directory"),
    }
}

fn add_target(name: String, spec: String, user: Option<String>, timeout: Option<u64>) -> Result<()> {
    // Creating a target parses the target spec without connecting.
    PluginRegistry::builtin()
        .target_new(&spec)
        .map_err(|e| failure(&format!("Invalid target '{}'", spec), e))?
        .end();

    let mut config = Config::load()?;
    let mut target = TargetConfig::new(spec);
    target.user = user;
    target.timeout = timeout;
    config.set_target(name.clone(), target);
    config.save()?;

    println!("Target '{}' saved.", name);
    Ok(())
}

fn remove_target(name: &str) -> Result<()> {
    let mut config = Config::load()?;
    if config.remove_target(name).is_none() {
        bail!("No target named '{}'", name);
    }
    config.save()?;

    println!("Target '{}' removed.", name);
    Ok(())
}
