//! RT-safe garbage collection for mixer payloads
//!
//! Everything the control thread hands to the render thread that owns heap
//! memory (PCM segments, effect chains, submix nodes, speaker layouts) is
//! wrapped in `basedrop::Shared` or `basedrop::Owned`. Dropping one of those
//! on the render thread only enqueues the pointer; the actual free happens
//! here, on a background thread where latency doesn't matter.
//!
//! Unlike a process-wide singleton, each [`GcThread`] belongs to one mixer
//! and is stopped and joined when that mixer's control side is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basedrop::{Collector, Handle};

use super::error::{MixerError, MixerResult};

/// How often the collector sweeps deferred drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

/// A dedicated thread owning a `basedrop::Collector`
pub struct GcThread {
    handle: Handle,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GcThread {
    /// Spawn the collector thread and wait for its handle
    pub fn spawn() -> MixerResult<Self> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = thread::Builder::new()
            .name("mixer-gc".to_string())
            .spawn(move || {
                // Collector is !Sync, so it is created on the thread that runs it
                let mut collector = Collector::new();
                if tx.send(collector.handle()).is_err() {
                    return;
                }
                log::info!("Mixer GC thread started");

                while !thread_stop.load(Ordering::Relaxed) {
                    collector.collect();
                    thread::sleep(COLLECT_INTERVAL);
                }
                collector.collect();
                log::info!("Mixer GC thread stopped");
            })
            .map_err(|e| MixerError::CollectorThread(e.to_string()))?;

        let handle = rx
            .recv()
            .map_err(|e| MixerError::CollectorThread(e.to_string()))?;

        Ok(Self {
            handle,
            stop,
            thread: Some(thread),
        })
    }

    /// Handle for creating `Shared`/`Owned` allocations
    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for GcThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Mixer GC thread panicked");
            }
        }
    }
}
