//! Poll loop driving a transaction to completion.
//!
//! Each pass delivers a queued interrupt, forwards stdin, then drains
//! stdout and stderr. When both output streams have ended the transaction
//! is finished; otherwise the loop waits on the session socket and stdin.
//! A pass that made progress is followed by a zero-length wait, since
//! libssh2 may hold buffered data the socket no longer signals.

use super::provider::{RemoteSession, StreamIndex};
use super::transaction::{Transaction, TransactionState};
use crate::command::Status;
use crate::error::{Error, Result};
use log::{debug, trace};
use std::time::Duration;

/// Longest single wait between passes.
const WAIT_SLICE: Duration = Duration::from_millis(100);

pub(crate) fn run<S: RemoteSession>(trans: &mut Transaction<'_, S>) -> Result<Status> {
    trans.set_state(TransactionState::Polling);

    let mut passes: u64 = 0;
    loop {
        passes += 1;
        let mut progress = trans.deliver_interrupt()?;
        progress |= trans.forward_stdin()?;
        progress |= trans.drain(StreamIndex::Stdout)?;
        progress |= trans.drain(StreamIndex::Stderr)?;

        if trans.outputs_done() {
            debug!("Output complete after {} passes", passes);
            return trans.finish();
        }

        let Some(remaining) = trans.remaining() else {
            debug!("Deadline passed after {} passes", passes);
            return Err(trans.fail(Error::CommandTimeout));
        };
        let wait = if progress {
            Duration::ZERO
        } else {
            remaining.min(WAIT_SLICE)
        };
        trace!("pass {}: progress={} wait={:?}", passes, progress, wait);
        trans.wait(wait)?;
    }
}
