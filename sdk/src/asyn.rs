//! The dedicated I/O loop and the sync/async bridge.
//!
//! All blocking callers funnel their coroutines into one cooperative
//! scheduler hosted on a dedicated OS thread, created lazily on first
//! demand. Async-native callers never touch it: they drive the filesystem
//! futures on their own runtime.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::runtime::Handle;

use crate::error::{Result, VfsError};

/// Handle to the process-wide I/O loop.
pub struct IoLoop {
    handle: Handle,
}

impl IoLoop {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// The process-wide I/O loop, created on first use.
///
/// A current-thread tokio runtime parked on a dedicated thread named
/// `unifs-io`. The thread lives for the rest of the process.
pub fn io_loop() -> &'static IoLoop {
    static LOOP: OnceLock<IoLoop> = OnceLock::new();
    LOOP.get_or_init(|| {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("unifs-io".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build the unifs I/O runtime");
                tx.send(rt.handle().clone())
                    .expect("I/O loop creator went away");
                rt.block_on(futures::future::pending::<()>());
            })
            .expect("failed to spawn the unifs I/O thread");
        let handle = rx.recv().expect("unifs I/O thread died during startup");
        tracing::debug!("started dedicated I/O loop thread");
        IoLoop { handle }
    })
}

/// Run a coroutine on the I/O loop from a non-loop thread, blocking until
/// it resolves or `timeout` expires. Expiry cancels the coroutine (and
/// with it any children it spawned structured-concurrency style).
///
/// # Panics
///
/// Calling this from the I/O loop thread itself would deadlock the
/// scheduler, so it is treated as a programming error and panics.
pub fn sync<F, T>(fut: F, timeout: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let io = io_loop();
    if let Ok(current) = Handle::try_current() {
        assert!(
            current.id() != io.handle.id(),
            "sync() called from inside the I/O loop; await the future instead"
        );
    }

    let join = io.handle.spawn(async move {
        match timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(result) => result,
                Err(_) => Err(VfsError::Timeout),
            },
            None => fut.await,
        }
    });

    match futures::executor::block_on(join) {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(VfsError::Cancelled),
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

/// Run coroutines with at most `batch_size` in flight, admitting the next
/// as each completes. Per-item results preserve the input ordering.
pub async fn gather<T, F>(futures: Vec<F>, batch_size: usize) -> Vec<Result<T>>
where
    F: Future<Output = Result<T>>,
{
    stream::iter(futures)
        .buffered(batch_size.max(1))
        .collect()
        .await
}

/// Like [`gather`], but the first failure cancels the siblings still in
/// flight and is returned directly.
pub async fn try_gather<T, F>(futures: Vec<F>, batch_size: usize) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>>,
{
    stream::iter(futures.into_iter().map(Ok::<F, VfsError>))
        .try_buffered(batch_size.max(1))
        .try_collect()
        .await
}
