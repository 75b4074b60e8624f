use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{JoinHandle, ThreadId},
};

use crate::errors::ThreadError;

/// Body of a [`Thread`].
///
/// `execute` is the loop run on the spawned thread. `exit` must make a running or
/// blocked `execute` return; it may be called from any thread and does not join.
pub trait Runnable: Send + Sync + 'static {
    fn execute(&self);
    fn exit(&self);
}

/// Owns at most one OS thread running a [`Runnable`].
///
/// Lifecycle: idle → [`start`](Thread::start) spawns the thread → the body runs
/// until [`exit`](Thread::exit) makes it return → [`join`](Thread::join) waits for it.
/// A handle must be joined before it is dropped; dropping a handle whose thread
/// was started and never joined panics.
pub struct Thread<R: Runnable> {
    body: Arc<R>,
    name: Option<String>,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    id: Mutex<Option<ThreadId>>,
}

impl<R: Runnable> Thread<R> {
    pub fn new(body: Arc<R>) -> Self {
        Self {
            body,
            name: None,
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
            id: Mutex::new(None),
        }
    }
    pub fn named(body: Arc<R>, name: impl Into<String>) -> Self {
        let mut thread = Self::new(body);
        thread.name = Some(name.into());
        thread
    }
    pub fn body(&self) -> &Arc<R> {
        &self.body
    }

    /// Spawns the thread running `execute`. Calling it again, even after a join,
    /// does nothing.
    pub fn start(&self) -> Result<(), ThreadError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut builder = std::thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        // Held across the spawn so a concurrent join() waits for the handle.
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let body = self.body.clone();
        let handle = match builder.spawn(move || body.execute()) {
            Ok(handle) => handle,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(ThreadError::Spawn(e));
            }
        };
        log::debug!("thread [{:?}] started ({:?})", self.name, handle.thread().id());
        *self.id.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.thread().id());
        *slot = Some(handle);
        Ok(())
    }

    /// Blocks until `execute` has returned. No-op when never started or already joined.
    pub fn join(&self) -> Result<(), ThreadError> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                let joined = handle.join().map_err(|_| ThreadError::Panicked);
                log::debug!("thread [{:?}] joined", self.name);
                joined
            }
            None => Ok(()),
        }
    }

    pub fn exit(&self) {
        self.body.exit();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// `true` while a started thread has not been joined yet.
    pub fn is_joinable(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Identity of the spawned thread, for diagnostics.
    pub fn id(&self) -> Option<ThreadId> {
        *self.id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<R: Runnable> Drop for Thread<R> {
    fn drop(&mut self) {
        let joinable = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if joinable && !std::thread::panicking() {
            panic!(
                "thread [{:?}] dropped while still joinable, call exit() and join() first",
                self.name
            );
        }
    }
}
