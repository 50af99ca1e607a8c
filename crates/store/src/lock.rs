//! Statement gate and per-document advisory locks.
//!
//! Every statement passes the database-wide gate: queries share it, updating
//! statements hold it exclusively. `util:exclusive-lock` and `util:shared-lock`
//! additionally take per-document locks, always in document id order. A lock
//! that cannot be had within the configured timeout fails with `EXLK0001`.

use parking_lot::{Mutex, RawRwLock, RwLock};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sylva_xquery::runtime::{Error, ErrorCode, LockMode, LockProvider, LockToken};
use sylva_xquery::DocumentId;
use tracing::{trace, warn};

fn timed_out(what: &str, timeout: Duration) -> Error {
    warn!(what, timeout_ms = timeout.as_millis() as u64, "lock wait timed out");
    Error::from_code(
        ErrorCode::EXLK0001,
        format!("could not acquire {what} within {} ms", timeout.as_millis()),
    )
}

/// Held for the duration of one statement.
pub enum StatementGuard {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

#[derive(Clone)]
pub struct StatementGate {
    lock: Arc<RwLock<()>>,
    timeout: Duration,
}

impl StatementGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            timeout,
        }
    }

    pub fn enter(&self, exclusive: bool) -> Result<StatementGuard, Error> {
        if exclusive {
            self.lock
                .try_write_arc_for(self.timeout)
                .map(StatementGuard::Exclusive)
                .ok_or_else(|| timed_out("the database write lock", self.timeout))
        } else {
            self.lock
                .try_read_arc_for(self.timeout)
                .map(StatementGuard::Shared)
                .ok_or_else(|| timed_out("the database read lock", self.timeout))
        }
    }
}

/// Advisory document locks handed to the evaluator.
pub struct LockManager {
    locks: Mutex<HashMap<DocumentId, Arc<RwLock<()>>>>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn lock_for(&self, id: DocumentId) -> Arc<RwLock<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }

    /// Forget the lock of a removed document.
    pub fn forget(&self, id: DocumentId) {
        self.locks.lock().remove(&id);
    }
}

impl LockProvider for LockManager {
    fn acquire(&self, documents: &[DocumentId], mode: LockMode) -> Result<LockToken, Error> {
        let mut ids = documents.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut guards: Vec<Box<dyn std::any::Any>> = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self.lock_for(id);
            let what = format!("a {} lock on {id}", match mode {
                LockMode::Shared => "shared",
                LockMode::Exclusive => "exclusive",
            });
            match mode {
                LockMode::Shared => {
                    let guard = lock.try_read_arc_for(self.timeout).ok_or_else(|| timed_out(&what, self.timeout))?;
                    guards.push(Box::new(guard));
                }
                LockMode::Exclusive => {
                    let guard = lock.try_write_arc_for(self.timeout).ok_or_else(|| timed_out(&what, self.timeout))?;
                    guards.push(Box::new(guard));
                }
            }
            trace!(document = %id, ?mode, "document lock acquired");
        }
        Ok(LockToken::new(guards))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_xquery::xml::{ParseOptions, parse_document};

    fn doc_id() -> DocumentId {
        parse_document("<a/>", None, true, ParseOptions::default()).unwrap().id()
    }

    #[test]
    fn readers_share_the_gate() {
        let gate = StatementGate::new(Duration::from_millis(20));
        let _a = gate.enter(false).unwrap();
        let _b = gate.enter(false).unwrap();
        let err = gate.enter(true).err().unwrap();
        assert_eq!(err.code_enum(), ErrorCode::EXLK0001);
    }

    #[test]
    fn exclusive_document_lock_times_out() {
        let locks = LockManager::new(Duration::from_millis(20));
        let id = doc_id();
        let held = locks.acquire(&[id], LockMode::Exclusive).unwrap();
        let err = locks.acquire(&[id], LockMode::Shared).err().unwrap();
        assert_eq!(err.code_enum(), ErrorCode::EXLK0001);
        assert!(err.code_enum().is_retryable());
        drop(held);
        assert!(locks.acquire(&[id], LockMode::Shared).is_ok());
    }

    #[test]
    fn shared_document_locks_coexist() {
        let locks = LockManager::new(Duration::from_millis(20));
        let (a, b) = (doc_id(), doc_id());
        let _first = locks.acquire(&[b, a], LockMode::Shared).unwrap();
        let _second = locks.acquire(&[a], LockMode::Shared).unwrap();
    }
}
