//! Page-level shared/exclusive locks under strict two-phase locking.
//!
//! Locks are only ever released all at once, when the owning transaction
//! completes. A request that cannot be granted waits on a condition
//! variable until one of:
//! - the conflicting holders release their locks (granted),
//! - waiting would close a cycle in the wait-for graph (deadlock abort),
//! - the lock timeout elapses (timeout abort),
//! - another thread cancels the transaction (cancel abort).
//!
//! Locks cover a page slot, so the same page number read as different
//! categories shares one lock.

use crate::error::{AbortReason, Result, StorageError};
use crate::transaction::TransactionId;
use crate::types::{PageId, PageSlot};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Lock strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<PageSlot, LockState>,
    held: HashMap<TransactionId, HashSet<PageId>>,
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
    cancelled: HashSet<TransactionId>,
}

impl LockTable {
    /// Transactions whose locks keep `tid` from getting `pid` in `mode`
    fn conflicting_holders(
        &self,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
    ) -> HashSet<TransactionId> {
        let mut holders = HashSet::new();
        let Some(state) = self.locks.get(&pid.slot()) else {
            return holders;
        };
        if let Some(ex) = state.exclusive {
            if ex != tid {
                holders.insert(ex);
            }
        }
        if mode == LockMode::Exclusive {
            holders.extend(state.shared.iter().copied().filter(|h| *h != tid));
        }
        holders
    }

    fn grant(&mut self, tid: TransactionId, pid: PageId, mode: LockMode) {
        let state = self.locks.entry(pid.slot()).or_default();
        match mode {
            LockMode::Shared => {
                if state.exclusive != Some(tid) {
                    state.shared.insert(tid);
                }
            }
            LockMode::Exclusive => {
                state.shared.remove(&tid);
                state.exclusive = Some(tid);
            }
        }
        self.held.entry(tid).or_default().insert(pid);
    }

    /// Depth-first search for a wait-for path leading back to `start`
    fn closes_cycle(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut stack: Vec<TransactionId> = self
            .waits_for
            .get(&start)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        while let Some(tid) = stack.pop() {
            if tid == start {
                return true;
            }
            if !visited.insert(tid) {
                continue;
            }
            if let Some(next) = self.waits_for.get(&tid) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    fn stop_waiting(&mut self, tid: TransactionId) {
        self.waits_for.remove(&tid);
    }
}

/// Lock table shared by every transaction of a buffer pool
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    cvar: Condvar,
    timeout: Duration,
}

impl LockManager {
    /// Create a lock manager whose requests wait at most `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            cvar: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until `tid` holds `pid` in at least `mode`.
    ///
    /// A shared lock is upgraded in place when `tid` is its only holder.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();
        let mut waited = false;

        loop {
            if table.cancelled.contains(&tid) {
                table.stop_waiting(tid);
                debug!(%tid, %pid, "lock request cancelled");
                return Err(StorageError::aborted(tid, AbortReason::Cancelled));
            }

            let holders = table.conflicting_holders(tid, pid, mode);
            if holders.is_empty() {
                table.grant(tid, pid, mode);
                table.stop_waiting(tid);
                trace!(%tid, %pid, ?mode, "lock granted");
                return Ok(());
            }

            table.waits_for.insert(tid, holders);
            if table.closes_cycle(tid) {
                table.stop_waiting(tid);
                warn!(%tid, %pid, ?mode, "deadlock detected, aborting requester");
                return Err(StorageError::aborted(tid, AbortReason::Deadlock));
            }

            if Instant::now() >= deadline {
                table.stop_waiting(tid);
                warn!(%tid, %pid, ?mode, "lock wait timed out");
                return Err(StorageError::aborted(tid, AbortReason::Timeout));
            }

            if !waited {
                debug!(%tid, %pid, ?mode, "waiting for lock");
                waited = true;
            }
            self.cvar.wait_until(&mut table, deadline);
        }
    }

    /// Release every lock `tid` holds and forget its pending cancellation
    pub fn release_all(&self, tid: TransactionId) {
        let mut table = self.table.lock();
        if let Some(pages) = table.held.remove(&tid) {
            for pid in pages {
                let now_free = match table.locks.get_mut(&pid.slot()) {
                    Some(state) => {
                        state.shared.remove(&tid);
                        if state.exclusive == Some(tid) {
                            state.exclusive = None;
                        }
                        state.is_free()
                    }
                    None => false,
                };
                if now_free {
                    table.locks.remove(&pid.slot());
                }
            }
        }
        table.stop_waiting(tid);
        for waiting_on in table.waits_for.values_mut() {
            waiting_on.remove(&tid);
        }
        table.cancelled.remove(&tid);
        drop(table);

        self.cvar.notify_all();
    }

    /// Make `tid`'s current and future lock requests fail until it completes.
    ///
    /// A transaction that neither holds nor waits for a lock is unknown
    /// here, so cancelling it does nothing.
    pub fn cancel(&self, tid: TransactionId) {
        let mut table = self.table.lock();
        if !table.held.contains_key(&tid) && !table.waits_for.contains_key(&tid) {
            trace!(%tid, "ignoring cancel of inactive transaction");
            return;
        }
        table.cancelled.insert(tid);
        drop(table);
        self.cvar.notify_all();
    }

    /// Strongest lock `tid` holds on `pid`
    pub fn lock_mode(&self, tid: TransactionId, pid: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        let state = table.locks.get(&pid.slot())?;
        if state.exclusive == Some(tid) {
            Some(LockMode::Exclusive)
        } else if state.shared.contains(&tid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Pages `tid` currently holds locks on
    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        table
            .held
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }
}
