//! Session Identity, Staleness Checkpoints, Single-Flight Guards
//!
//! The wallet's chain and account change asynchronously and independently of
//! any in-flight operation. Every operation captures a [`StalenessToken`] at
//! start and re-checks it after each suspension point before mutating shared
//! state. Single-flight is enforced with synchronous atomic guards, kept
//! separate from the async-visible state on purpose: the guard is consulted
//! before any asynchronous work begins.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::deployment::Address;
use crate::error::StaleDimension;

/// The (chain, signer) tuple the orchestrator currently considers current
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    pub chain_id: u64,
    pub signer: Address,
}

/// Snapshot of the session identity and target contract at operation start.
///
/// Checked at every externally-observable commit point; a mismatch means the
/// operation's results must be discarded, not applied.
#[derive(Clone, Copy, Debug)]
pub struct StalenessToken {
    chain_id: u64,
    signer: Address,
    contract: Address,
}

impl StalenessToken {
    pub fn capture(session: SessionIdentity, contract: Address) -> Self {
        Self {
            chain_id: session.chain_id,
            signer: session.signer,
            contract,
        }
    }

    /// Verify nothing changed since capture. Reports the first changed
    /// dimension; a vanished session counts as a signer change.
    pub fn check(
        &self,
        current: Option<SessionIdentity>,
        current_contract: Address,
    ) -> Result<(), StaleDimension> {
        let session = current.ok_or(StaleDimension::Signer)?;
        if current_contract != self.contract {
            return Err(StaleDimension::Address);
        }
        if session.chain_id != self.chain_id {
            return Err(StaleDimension::Chain);
        }
        if session.signer != self.signer {
            return Err(StaleDimension::Signer);
        }
        Ok(())
    }
}

/// Single-flight guard for one operation kind.
///
/// At most one instance of the operation is in flight; a second caller gets
/// `None` and is expected to no-op, not queue. The guard releases on drop,
/// so release is guaranteed on success, failure, and staleness abort alike.
pub struct OpLock {
    kind: &'static str,
    busy: AtomicBool,
}

impl OpLock {
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            busy: AtomicBool::new(false),
        }
    }

    /// Acquire the lock, or `None` if an instance is already in flight
    pub fn try_acquire(&self) -> Option<OpGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(OpGuard { lock: self })
        } else {
            debug!(op = self.kind, "already in flight, dropping request");
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held while an operation is in flight; releases the lock on drop
pub struct OpGuard<'a> {
    lock: &'a OpLock,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}

/// Edge-triggered latch for the one-shot automatic refresh.
///
/// Fires exactly once when the (address, channel, signer) triple transitions
/// from incomplete to complete, and re-arms when the triple breaks.
pub struct RefreshLatch {
    armed: AtomicBool,
}

impl RefreshLatch {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }

    /// Consume the latch if armed; returns whether it fired
    pub fn try_fire(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    /// Re-arm after the triple became incomplete
    pub fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }
}

impl Default for RefreshLatch {
    fn default() -> Self {
        Self::new()
    }
}
