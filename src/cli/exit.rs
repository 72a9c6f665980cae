use anyhow::Result;
use clap::Args;

use twopence::config::Config;

use super::{failure, open_target};

#[derive(Args)]
#[command(about = "Tell the remote test server to exit")]
pub struct ExitCommand {
    /// Configured target name, or a target spec such as ssh:host:port
    target: String,
}

impl ExitCommand {
    pub fn execute(self) -> Result<()> {
        let config = Config::load()?;
        let resolved = config.resolve(&self.target);
        let mut target = open_target(&config, &resolved)?;

        let result = target.exit_remote();
        target.end();
        result.map_err(|e| failure("Unable to stop the remote server", e))
    }
}
