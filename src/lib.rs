//! Remote test-execution client.
//!
//! Runs commands on a system under test and moves files to and from it
//! through a transport plugin selected by a target spec:
//!
//! ```no_run
//! use twopence::{Command, PluginRegistry};
//! use twopence::iostream::BufferStream;
//!
//! let registry = PluginRegistry::builtin();
//! let mut target = registry.target_new("ssh:sut.example.com")?;
//!
//! let output = BufferStream::new();
//! let mut cmd = Command::new("uname -r").stdout(output.clone());
//! let status = target.run_test(&mut cmd)?;
//! println!("exit {}: {}", status.minor, String::from_utf8_lossy(&output.contents()));
//! # Ok::<(), twopence::Error>(())
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod iostream;
pub mod plugin;
pub mod retry;
pub mod sink;
pub mod ssh;

pub use command::{Command, FileTransfer, Status};
pub use error::{perror, strerror, Error, Result};
pub use plugin::{Interrupter, PluginKind, PluginRegistry, Target, Transport};
pub use sink::{OutputChannel, OutputMode, Sink};
