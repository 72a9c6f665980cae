pub mod command;
pub mod exit;
pub mod extract;
pub mod inject;
pub mod targets;

use anyhow::{anyhow, Result};
use log::info;
use twopence::config::{Config, ResolvedTarget};
use twopence::error::format_error;
use twopence::iostream::{FileStream, LocalStream};
use twopence::retry::connection_hints;
use twopence::{Error, PluginKind, PluginRegistry, Sink, Target};

/// Wraps a library error as `"<context>: <description>."`.
pub(crate) fn failure(context: &str, err: Error) -> anyhow::Error {
    anyhow!(format_error(context, err))
}

/// Creates the target named on the command line.
pub(crate) fn open_target(config: &Config, resolved: &ResolvedTarget) -> Result<Target> {
    let registry = PluginRegistry::builtin_with(config.ssh_settings());
    registry
        .target_new(&resolved.spec)
        .map_err(|e| failure("Unable to initialize target", e))
}

/// Logs troubleshooting hints after a target could not be reached.
pub(crate) fn explain_open_failure(resolved: &ResolvedTarget) {
    let Some((plugin, rest)) = resolved.spec.split_once(':') else {
        return;
    };
    if PluginKind::from_name(plugin) != Some(PluginKind::Ssh) {
        return;
    }
    if let Some((host, port)) = twopence::ssh::parse_target(rest) {
        info!("Troubleshooting suggestions:\n{}", connection_hints(&host, port));
    }
}

pub(crate) fn progress_sink(quiet: bool) -> Sink {
    if quiet {
        Sink::none()
    } else {
        Sink::screen()
    }
}

/// Opens a local file for reading, `-` meaning standard input.
pub(crate) fn open_input(path: &str) -> Result<LocalStream> {
    let stream = if path == "-" {
        FileStream::stdin()
    } else {
        FileStream::open(path)
    };
    stream
        .map(LocalStream::from)
        .map_err(|e| anyhow!("Unable to open {}: {}", path, e))
}

/// Creates a local file for writing, `-` meaning standard output.
pub(crate) fn open_output(path: &str) -> Result<LocalStream> {
    let stream = if path == "-" {
        FileStream::stdout()
    } else {
        FileStream::create(path)
    };
    stream
        .map(LocalStream::from)
        .map_err(|e| anyhow!("Unable to create {}: {}", path, e))
}
