use std::fmt;
use thiserror::Error;

/// Result codes shared by every transport.
///
/// The set is closed: each variant has a stable negative code (see
/// [`Error::code`]) and a fixed description that never carries dynamic
/// detail. Details of the underlying failure are logged where they happen.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TwopenceError {
    Parameter,
    OpenSession,
    SendCommand,
    ForwardInput,
    ReceiveResults,
    LocalFile,
    SendFile,
    RemoteFile,
    ReceiveFile,
    InterruptCommand,
    InvalidTargetSpec,
    UnknownPlugin,
    IncompatiblePlugin,
    NotSupported,
    CommandTimeout,
}

pub type Error = TwopenceError;
pub type Result<T> = std::result::Result<T, Error>;

const UNKNOWN_ERROR: &str = "Unknown error";

impl TwopenceError {
    const ALL: [TwopenceError; 15] = [
        Self::Parameter,
        Self::OpenSession,
        Self::SendCommand,
        Self::ForwardInput,
        Self::ReceiveResults,
        Self::LocalFile,
        Self::SendFile,
        Self::RemoteFile,
        Self::ReceiveFile,
        Self::InterruptCommand,
        Self::InvalidTargetSpec,
        Self::UnknownPlugin,
        Self::IncompatiblePlugin,
        Self::NotSupported,
        Self::CommandTimeout,
    ];

    /// Returns the stable numeric code of this error.
    pub fn code(self) -> i32 {
        match self {
            Self::Parameter => -1,
            Self::OpenSession => -2,
            Self::SendCommand => -3,
            Self::ForwardInput => -4,
            Self::ReceiveResults => -5,
            Self::LocalFile => -6,
            Self::SendFile => -7,
            Self::RemoteFile => -8,
            Self::ReceiveFile => -9,
            Self::InterruptCommand => -10,
            Self::InvalidTargetSpec => -11,
            Self::UnknownPlugin => -12,
            Self::IncompatiblePlugin => -13,
            Self::NotSupported => -14,
            Self::CommandTimeout => -15,
        }
    }

    /// Maps a numeric code back to its error, if it belongs to the set.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }
}

/// Returns the fixed description for a numeric result code.
///
/// Codes outside the taxonomy map to a generic "Unknown error".
pub fn strerror(code: i32) -> &'static str {
    match TwopenceError::from_code(code) {
        Some(err) => err.description(),
        None => UNKNOWN_ERROR,
    }
}

impl TwopenceError {
    /// The fixed human-readable description, without trailing punctuation.
    pub fn description(self) -> &'static str {
        match self {
            Self::Parameter => "Invalid command parameter",
            Self::OpenSession => "Error opening the communication with the system under test",
            Self::SendCommand => "Error sending command to the system under test",
            Self::ForwardInput => "Error forwarding keyboard input",
            Self::ReceiveResults => "Error receiving the results of action",
            Self::LocalFile => "Local error while transferring file",
            Self::SendFile => "Error sending file to the system under test",
            Self::RemoteFile => "Remote error while transferring file",
            Self::ReceiveFile => "Error receiving file from the system under test",
            Self::InterruptCommand => "Failed to interrupt command",
            Self::InvalidTargetSpec => "Invalid target spec",
            Self::UnknownPlugin => "Unknown plugin",
            Self::IncompatiblePlugin => "Incompatible plugin",
            Self::NotSupported => "Operation not supported by the plugin",
            Self::CommandTimeout => "Remote command took too long to execute",
        }
    }
}

impl fmt::Display for TwopenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::description(*self))
    }
}

/// Formats a diagnostic line as `"<context>: <description>."`.
pub fn format_error(context: &str, err: Error) -> String {
    format!("{}: {}.", context, err)
}

/// Prints a diagnostic line for `err` on standard error.
pub fn perror(context: &str, err: Error) {
    eprintln!("{}", format_error(context, err));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique_and_round_trip() {
        for err in TwopenceError::ALL {
            assert!(err.code() < 0);
            assert_eq!(TwopenceError::from_code(err.code()), Some(err));
        }
        assert_eq!(TwopenceError::from_code(0), None);
        assert_eq!(TwopenceError::from_code(-99), None);
    }

    #[test]
    fn test_display_matches_description() {
        for err in TwopenceError::ALL {
            assert_eq!(err.to_string(), err.description());
        }
        assert_eq!(
            Error::NotSupported.to_string(),
            "Operation not supported by the plugin"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(Error::CommandTimeout);
        assert_eq!(boxed.to_string(), "Remote command took too long to execute");
    }

    #[test]
    fn test_strerror_unknown_code() {
        assert_eq!(strerror(-1), "Invalid command parameter");
        assert_eq!(strerror(-15), "Remote command took too long to execute");
        assert_eq!(strerror(0), "Unknown error");
        assert_eq!(strerror(42), "Unknown error");
    }

    #[test]
    fn test_format_error() {
        assert_eq!(
            format_error("inject", Error::SendFile),
            "inject: Error sending file to the system under test."
        );
    }
}
