//! Mapping between the signal names carried in SSH `exit-signal` messages
//! and local signal numbers.

use nix::libc;

const SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("IOT", libc::SIGIOT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    ("STKFLT", libc::SIGSTKFLT),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    ("PWR", libc::SIGPWR),
    ("SYS", libc::SIGSYS),
];

/// Looks up the signal number for a short signal name (`"TERM"`).
pub fn signal_number(name: &str) -> Option<i32> {
    SIGNALS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|&(_, signo)| signo)
}

/// Looks up the short name for a signal number. Aliases resolve to the
/// first name in the table (`SIGIOT` is reported as `ABRT`).
pub fn signal_name(signo: i32) -> Option<&'static str> {
    SIGNALS
        .iter()
        .find(|&&(_, known)| known == signo)
        .map(|&(name, _)| name)
}

/// Exit signal captured for a remote command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitSignal {
    /// The command was not killed by a signal.
    #[default]
    None,
    Known(i32),
    /// Killed by a signal whose name is not in the table.
    Unknown,
}

impl ExitSignal {
    pub fn from_name(name: &str) -> Self {
        match signal_number(name) {
            Some(signo) => Self::Known(signo),
            None => Self::Unknown,
        }
    }

    /// Signal number to report, `-1` when the name was not recognized.
    pub fn number(self) -> Option<i32> {
        match self {
            Self::None => None,
            Self::Known(signo) => Some(signo),
            Self::Unknown => Some(-1),
        }
    }
}
