use anyhow::Result;
use clap::Args;

use twopence::config::Config;
use twopence::{Error, FileTransfer};

use super::{explain_open_failure, failure, open_output, open_target, progress_sink};

#[derive(Args)]
#[command(about = "Copy a file from the system under test")]
pub struct ExtractCommand {
    /// Configured target name, or a target spec such as ssh:host:port
    target: String,

    /// Path of the file on the system under test
    remote: String,

    /// Local destination, or - for standard output
    local: String,

    #[arg(short, long, help = "Remote user (default: root)")]
    user: Option<String>,

    #[arg(short, long, help = "Do not print progress dots")]
    quiet: bool,
}

impl ExtractCommand {
    pub fn execute(self) -> Result<()> {
        let config = Config::load()?;
        let resolved = config.resolve(&self.target);
        let mut target = open_target(&config, &resolved)?;
        // Progress dots would end up mixed into the file data.
        target.set_output(progress_sink(self.quiet || self.local == "-"));

        let mut xfer = FileTransfer::new(open_output(&self.local)?, self.remote.as_str());
        xfer.user = self.user.or(resolved.user.clone());

        let result = target.extract_file(&mut xfer);
        target.end();
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e == Error::OpenSession {
                    explain_open_failure(&resolved);
                }
                Err(failure("Unable to extract file", e))
            }
        }
    }
}
