use anyhow::{anyhow, Result};
use clap::Args;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use twopence::config::Config;
use twopence::iostream::{FileStream, LocalStream};
use twopence::retry::{self, RetryPolicy};
use twopence::ssh::signals::signal_name;
use twopence::{Command, Error};

use super::{explain_open_failure, failure, open_target};

#[derive(Args)]
#[command(about = "Run a command on the system under test")]
pub struct RunCommand {
    /// Configured target name, or a target spec such as ssh:host:port
    target: String,

    /// Command line to execute remotely
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    #[arg(short, long, help = "Remote user (default: root)")]
    user: Option<String>,

    #[arg(short, long, help = "Timeout in seconds")]
    timeout: Option<u64>,

    #[arg(long, help = "Allocate a pseudo-terminal")]
    tty: bool,

    #[arg(short, long, help = "Write stdout and stderr of the command to this file")]
    output: Option<PathBuf>,

    #[arg(short, long, help = "Discard the command's output")]
    quiet: bool,

    #[arg(short = 'i', long = "stdin", help = "Feed this file to the command's stdin")]
    input: Option<PathBuf>,

    #[arg(long, default_value_t = 0, help = "Retries when the session cannot be opened")]
    retries: u32,
}

impl RunCommand {
    pub fn execute(self) -> Result<ExitCode> {
        let config = Config::load()?;
        let resolved = config.resolve(&self.target);
        let mut target = open_target(&config, &resolved)?;

        let mut cmd = Command::new(self.command.join(" ")).tty(self.tty).timeout(
            self.timeout
                .map(Duration::from_secs)
                .unwrap_or(resolved.timeout),
        );
        cmd.user = self.user.clone().or_else(|| resolved.user.clone());
        self.bind_streams(&mut cmd)?;

        let policy = RetryPolicy::new(self.retries, Duration::from_secs(1));
        let result = retry::retry_with_backoff(&policy, "open session", retry::is_transient, || {
            target.run_test(&mut cmd)
        });
        target.end();

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                if e == Error::OpenSession {
                    explain_open_failure(&resolved);
                }
                return Err(failure("Unable to execute command", e));
            }
        };

        if let Some(signo) = status.signal() {
            match signal_name(signo) {
                Some(name) => eprintln!("Remote command killed by signal SIG{}", name),
                None => eprintln!("Remote command killed by an unknown signal"),
            }
            return Ok(ExitCode::from((128 + signo).clamp(0, 255) as u8));
        }
        Ok(ExitCode::from(status.minor.clamp(0, 255) as u8))
    }

    fn bind_streams(&self, cmd: &mut Command) -> Result<()> {
        cmd.stdin = Some(match &self.input {
            Some(path) => FileStream::open(path)
                .map_err(|e| anyhow!("Unable to open {}: {}", path.display(), e))?
                .into(),
            None => FileStream::stdin()?.into(),
        });

        if self.quiet {
            return Ok(());
        }
        match &self.output {
            Some(path) => {
                let file = File::create(path)
                    .map_err(|e| anyhow!("Unable to create {}: {}", path.display(), e))?;
                cmd.stderr = Some(LocalStream::from(file.try_clone()?));
                cmd.stdout = Some(LocalStream::from(file));
            }
            None => {
                cmd.stdout = Some(FileStream::stdout()?.into());
                cmd.stderr = Some(FileStream::stderr()?.into());
            }
        }
        Ok(())
    }
}
