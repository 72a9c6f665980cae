//! Foreground transaction tracking for interrupts.
//!
//! `run_test` holds the target mutably for the whole command, so interrupts
//! arrive through a shared slot instead. The slot holds the flags of the
//! foreground transaction; the multiplexer picks up a queued interrupt on
//! its next pass and writes the control byte itself.

use crate::error::{Error, Result};
use crate::plugin::Interrupt;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Flags of one transaction that are visible outside the polling thread.
#[derive(Debug, Default)]
pub(crate) struct ForegroundFlags {
    pub use_tty: AtomicBool,
    pub eof_sent: AtomicBool,
    pub interrupted: AtomicBool,
    pub interrupt_pending: AtomicBool,
}

impl ForegroundFlags {
    pub fn new(use_tty: bool) -> Self {
        Self {
            use_tty: AtomicBool::new(use_tty),
            ..Self::default()
        }
    }

    pub fn use_tty(&self) -> bool {
        self.use_tty.load(Ordering::SeqCst)
    }

    pub fn eof_sent(&self) -> bool {
        self.eof_sent.load(Ordering::SeqCst)
    }

    /// Marks end-of-input as sent. Returns whether it already was.
    pub fn mark_eof_sent(&self) -> bool {
        self.eof_sent.swap(true, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Takes a queued interrupt, if any.
    pub fn take_pending(&self) -> bool {
        self.interrupt_pending.swap(false, Ordering::SeqCst)
    }

    fn request_interrupt(&self) -> Result<()> {
        if !self.use_tty() {
            // Without a pty there is no way to deliver ^C.
            self.interrupted.store(true, Ordering::SeqCst);
            return Err(Error::InterruptCommand);
        }
        if self.eof_sent() {
            return Err(Error::InterruptCommand);
        }
        self.interrupt_pending.store(true, Ordering::SeqCst);
        // End-of-input may have raced ahead. If the polling thread has not
        // taken the ^C along with it, withdraw the request.
        if self.eof_sent() && self.take_pending() {
            warn!("Input closed before the interrupt could be sent");
            return Err(Error::InterruptCommand);
        }
        Ok(())
    }
}

/// The per-target slot holding the foreground transaction, if any.
#[derive(Debug, Clone, Default)]
pub(crate) struct ForegroundSlot {
    inner: Arc<Mutex<Option<Arc<ForegroundFlags>>>>,
}

impl ForegroundSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<ForegroundFlags>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `flags` the foreground transaction until the guard drops.
    pub fn install(&self, flags: Arc<ForegroundFlags>) -> ForegroundGuard {
        *self.lock() = Some(flags);
        ForegroundGuard { slot: self.clone() }
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }
}

impl Interrupt for ForegroundSlot {
    fn interrupt(&self) -> Result<()> {
        let Some(flags) = self.lock().clone() else {
            debug!("Interrupt requested with no foreground command");
            return Err(Error::OpenSession);
        };
        flags.request_interrupt()
    }
}

pub(crate) struct ForegroundGuard {
    slot: ForegroundSlot,
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}
