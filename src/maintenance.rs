//! Background eviction.
//!
//! An `Evictor` owns a named thread that runs an eviction pass every
//! `eviction_interval`. The thread holds a strong reference to the table, so
//! the table outlives it; dropping (or stopping) the `Evictor` disconnects
//! the control channel and joins the thread.

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::error::CacheResult;
use crate::storage::LruHashMap;

/// Handle to a running background evictor.
#[derive(Debug)]
pub struct Evictor {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Evictor {
    pub(crate) fn spawn<K, V, S>(map: Arc<LruHashMap<K, V, S>>, interval: Duration) -> CacheResult<Self>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Send + Sync + 'static,
        S: BuildHasher + Send + Sync + 'static,
    {
        let (stop, stopped) = bounded::<()>(1);
        let name = format!("{}-evictor", map.name());

        let handle = thread::Builder::new().name(name).spawn(move || {
            tracing::debug!(cache = %map.name(), ?interval, "evictor started");
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        map.evict();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!(cache = %map.name(), "evictor stopped");
        })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the evictor and wait for the current pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Whether the evictor thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The thread may already be gone; disconnecting is enough.
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("evictor thread panicked");
            }
        }
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
