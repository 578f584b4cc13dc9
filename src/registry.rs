// ABOUTME: Process-wide StreamId -> LiveStream map, guarded by a single short-held lock
// ABOUTME: Creation is lazy; removal is idempotent and safe while viewers still hold an Arc

use crate::session::SessionHandle;
use crate::stream::LiveStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Returned when a second producer tries to attach to a stream that already
/// has one. The existing producer is left untouched.
#[derive(Debug, PartialEq, Eq)]
pub struct AlreadyRunning;

/// The registry never blocks on I/O: the map is protected by a plain
/// `std::sync::Mutex` that is never held across an `.await`, so unlike the
/// callback-based source design there is no need to defer removal to a
/// separate task to avoid deadlocking against reactor internals.
pub struct Registry {
    streams: Mutex<HashMap<String, Arc<LiveStream>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Finds the `LiveStream` for `stream_id`, creating a `Pending` one if
    /// absent. The `bool` reports whether this call created the entry.
    pub fn find_or_create(&self, stream_id: &str) -> (Arc<LiveStream>, bool) {
        let mut streams = self.streams.lock().unwrap();
        if let Some(existing) = streams.get(stream_id) {
            return (existing.clone(), false);
        }
        let live = Arc::new(LiveStream::new());
        streams.insert(stream_id.to_string(), live.clone());
        debug!(stream_id, "live stream created");
        (live, true)
    }

    /// Attaches `handle` as the producer of `stream_id`, creating the
    /// `LiveStream` if it doesn't exist yet. Refuses rather than evicting an
    /// incumbent producer.
    ///
    /// Holds the registry lock for the lookup-or-create *and* the nested
    /// `LiveStream::attach_producer` call, so this can never interleave with
    /// `remove_if_idle` on the same `stream_id`: whichever of the two
    /// acquires the lock first completes its whole check-and-mutate before
    /// the other can observe the map.
    pub fn attach_producer(
        &self,
        stream_id: &str,
        handle: SessionHandle,
    ) -> Result<Arc<LiveStream>, AlreadyRunning> {
        let mut streams = self.streams.lock().unwrap();
        let live = streams
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                debug!(stream_id, "live stream created");
                Arc::new(LiveStream::new())
            })
            .clone();
        live.attach_producer(handle).map_err(|_| AlreadyRunning)?;
        Ok(live)
    }

    /// Removes `stream_id` from the map. Idempotent: a second call is a
    /// no-op. Safe to call while viewer tasks still hold a cloned `Arc` to
    /// the removed `LiveStream` — the map entry was just one more reference.
    pub fn remove(&self, stream_id: &str) {
        let mut streams = self.streams.lock().unwrap();
        if streams.remove(stream_id).is_some() {
            info!(stream_id, "live stream removed from registry");
        }
    }

    /// Removes `stream_id` only if it is still an idle `Pending` placeholder:
    /// no producer has ever attached and no viewers remain. Called when a
    /// viewer disconnects from a stream it was waiting on, so a client that
    /// subscribes to an arbitrary id and leaves doesn't leak an entry.
    ///
    /// Holds the registry lock across the `is_idle` check and the removal,
    /// so a producer calling `attach_producer` concurrently can't have its
    /// brand-new attach erased out from under it: the two calls fully
    /// serialize against each other on this one lock.
    pub fn remove_if_idle(&self, stream_id: &str) {
        let mut streams = self.streams.lock().unwrap();
        if let Some(live) = streams.get(stream_id) {
            if live.is_idle() {
                streams.remove(stream_id);
                info!(stream_id, "idle live stream removed from registry");
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, stream_id: &str) -> bool {
        self.streams.lock().unwrap().contains_key(stream_id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
