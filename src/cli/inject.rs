use anyhow::Result;
use clap::Args;

use twopence::config::Config;
use twopence::{Error, FileTransfer};

use super::{explain_open_failure, failure, open_input, open_target, progress_sink};

#[derive(Args)]
#[command(about = "Copy a local file to the system under test")]
pub struct InjectCommand {
    /// Configured target name, or a target spec such as ssh:host:port
    target: String,

    /// Local file to send, or - for standard input
    local: String,

    /// Destination path on the system under test
    remote: String,

    #[arg(short, long, help = "Remote user (default: root)")]
    user: Option<String>,

    #[arg(
        short,
        long,
        default_value = "0644",
        value_parser = parse_mode,
        help = "Permission bits of the remote file (octal)"
    )]
    mode: u32,

    #[arg(short, long, help = "Do not print progress dots")]
    quiet: bool,
}

fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(format!("'{}' is not an octal file mode", s)),
    }
}

impl InjectCommand {
    pub fn execute(self) -> Result<()> {
        let config = Config::load()?;
        let resolved = config.resolve(&self.target);
        let mut target = open_target(&config, &resolved)?;
        target.set_output(progress_sink(self.quiet));

        let mut xfer = FileTransfer::new(open_input(&self.local)?, self.remote.as_str()).mode(self.mode);
        xfer.user = self.user.or(resolved.user.clone());

        let result = target.inject_file(&mut xfer);
        target.end();
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e == Error::OpenSession {
                    explain_open_failure(&resolved);
                }
                Err(failure("Unable to inject file", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0644"), Ok(0o644));
        assert_eq!(parse_mode("755"), Ok(0o755));
        assert_eq!(parse_mode("0o600"), Ok(0o600));
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("17777").is_err());
    }
}
