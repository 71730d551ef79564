//! Per-filesystem transactions.
//!
//! While a transaction is active, write-mode files buffer their payload
//! and append a finalizer to the owning filesystem's queue instead of
//! committing at close. `complete` runs the queue in insertion order;
//! `cancel` drops it. Transactions are a single-filesystem construct;
//! there is no cross-filesystem atomicity.

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{Result, VfsError};

/// Deferred commit action, run at `complete`.
pub type Finalizer = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct PendingCommit {
    path: String,
    action: Finalizer,
}

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Idle,
    Active,
    Committing,
    Aborted,
}

/// Transaction slot embedded in filesystems that support deferred commit.
///
/// At most one transaction is active per filesystem instance.
pub struct TransactionState {
    status: Mutex<TxnStatus>,
    queue: Mutex<Vec<PendingCommit>>,
}

impl Default for TransactionState {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionState {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(TxnStatus::Idle),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> TxnStatus {
        *self.status.lock()
    }

    pub fn is_active(&self) -> bool {
        self.status() == TxnStatus::Active
    }

    /// Begin deferring writes. Fails if a transaction is already active.
    pub fn start(&self) -> Result<()> {
        let mut status = self.status.lock();
        match *status {
            TxnStatus::Idle | TxnStatus::Aborted => {
                *status = TxnStatus::Active;
                self.queue.lock().clear();
                Ok(())
            }
            _ => Err(VfsError::Backend(
                "a transaction is already active on this filesystem".to_string(),
            )),
        }
    }

    /// Queue a deferred commit for `path`. Only valid while active.
    pub fn defer(&self, path: &str, action: Finalizer) -> Result<()> {
        if !self.is_active() {
            return Err(VfsError::Backend(
                "no active transaction to defer into".to_string(),
            ));
        }
        self.queue.lock().push(PendingCommit {
            path: path.to_string(),
            action,
        });
        Ok(())
    }

    /// Run the queue in insertion order.
    ///
    /// Stops at the first failure; commit is best-effort, so the paths
    /// already finalized are reported via
    /// [`VfsError::TransactionAborted`] rather than rolled back. The
    /// filesystem always ends in `Idle`.
    pub async fn complete(&self) -> Result<Vec<String>> {
        {
            let mut status = self.status.lock();
            if *status != TxnStatus::Active {
                return Err(VfsError::Backend(
                    "no active transaction to complete".to_string(),
                ));
            }
            *status = TxnStatus::Committing;
        }
        let pending = std::mem::take(&mut *self.queue.lock());

        let mut committed = Vec::new();
        for commit in pending {
            match (commit.action)().await {
                Ok(()) => committed.push(commit.path),
                Err(e) => {
                    *self.status.lock() = TxnStatus::Idle;
                    return Err(VfsError::TransactionAborted {
                        committed,
                        source: Box::new(e),
                    });
                }
            }
        }
        *self.status.lock() = TxnStatus::Idle;
        Ok(committed)
    }

    /// Drop the queue without committing anything.
    pub fn cancel(&self) {
        self.queue.lock().clear();
        let mut status = self.status.lock();
        if *status == TxnStatus::Active || *status == TxnStatus::Committing {
            *status = TxnStatus::Aborted;
        }
    }

    /// Number of queued deferred commits.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Scoped transaction over a shared filesystem handle.
///
/// Obtained from [`FilesystemExt::transaction`](crate::fs::FilesystemExt).
/// Dropping the guard without calling [`complete`](Self::complete)
/// cancels the transaction, so an error path through the region discards
/// every deferred write.
pub struct TransactionGuard {
    fs: std::sync::Arc<dyn crate::fs::Filesystem>,
    finished: bool,
}

impl TransactionGuard {
    pub(crate) fn begin(fs: std::sync::Arc<dyn crate::fs::Filesystem>) -> Result<Self> {
        fs.transactions()
            .ok_or(VfsError::Unsupported("transactions"))?
            .start()?;
        Ok(Self {
            fs,
            finished: false,
        })
    }

    /// Run the deferred commits in order, returning the finalized paths.
    pub async fn complete(mut self) -> Result<Vec<String>> {
        self.finished = true;
        self.fs
            .transactions()
            .expect("transaction support checked at begin")
            .complete()
            .await
    }

    /// Discard every deferred write.
    pub fn cancel(mut self) {
        self.finished = true;
        if let Some(txn) = self.fs.transactions() {
            txn.cancel();
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(txn) = self.fs.transactions() {
                txn.cancel();
            }
        }
    }
}
