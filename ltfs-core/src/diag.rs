//! Diagnostics (C9): a fixed-capacity request-trace ring plus per-thread
//! function-trace rings, dumped on demand with a small self-describing
//! header.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::thread::ThreadId;
use std::time::{SystemTime, UNIX_EPOCH};

/// One request-trace record: 8 + 4 + 4 + 4 + 4 = 24 bytes.
#[derive(Debug, Clone, Copy)]
pub struct TraceEntry {
    pub timestamp_us: u64,
    pub request_number: u32,
    pub thread_id: u32,
    pub info1: u32,
    pub info2: u32,
}

impl TraceEntry {
    fn to_bytes(self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        out[8..12].copy_from_slice(&self.request_number.to_le_bytes());
        out[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.info1.to_le_bytes());
        out[20..24].copy_from_slice(&self.info2.to_le_bytes());
        out
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// 4 MiB / 24 B ~= 174762 entries.
const TRACE_RING_CAPACITY: usize = (4 * 1024 * 1024) / 24;

/// Global request-trace ring, its own mutex, one instance per process.
pub struct TraceRing {
    entries: Mutex<VecDeque<TraceEntry>>,
}

impl Default for TraceRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRing {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(TRACE_RING_CAPACITY)),
        }
    }

    pub fn record(&self, request_number: u32, thread_id: u32, info1: u32, info2: u32) {
        let entry = TraceEntry {
            timestamp_us: now_us(),
            request_number,
            thread_id,
            info1,
            info2,
        };
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == TRACE_RING_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `"LTFS_TRC"` tag, entry size, entry count, a little-endian marker
    /// byte, and a zeroed CRC slot (filled in by the caller once the body
    /// is known), followed by the ring contents oldest-first.
    pub fn dump(&self) -> Vec<u8> {
        let entries = self.entries.lock().unwrap();
        let mut out = Vec::with_capacity(32 + entries.len() * 24);
        out.extend_from_slice(b"LTFS_TRC");
        out.extend_from_slice(&24u32.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        out.push(1); // endian marker: 1 = little
        out.extend_from_slice(&[0u8; 3]); // pad
        out.extend_from_slice(&0u32.to_le_bytes()); // CRC slot, filled by caller
        for entry in entries.iter() {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }
}

/// One per-thread function-trace ring. Short calls live here; completed
/// admin-call traces move to [`FunctionTraces::completed`].
struct ThreadRing {
    active: VecDeque<TraceEntry>,
}

const COMPLETED_QUEUE_CAPACITY: usize = 512;

/// Per-thread function-trace rings, MRSW so readers (dump) don't block
/// writers on unrelated threads.
pub struct FunctionTraces {
    rings: RwLock<HashMap<ThreadId, ThreadRing>>,
    completed: Mutex<VecDeque<TraceEntry>>,
}

impl Default for FunctionTraces {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionTraces {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            completed: Mutex::new(VecDeque::with_capacity(COMPLETED_QUEUE_CAPACITY)),
        }
    }

    pub fn enter(&self, thread: ThreadId, request_number: u32, info1: u32, info2: u32) {
        let entry = TraceEntry {
            timestamp_us: now_us(),
            request_number,
            thread_id: thread_id_as_u32(thread),
            info1,
            info2,
        };
        let mut rings = self.rings.write().unwrap();
        rings
            .entry(thread)
            .or_insert_with(|| ThreadRing {
                active: VecDeque::new(),
            })
            .active
            .push_back(entry);
    }

    /// Mark the most recent open call on `thread` complete, moving it to the
    /// bounded tail queue of finished admin-call traces.
    pub fn complete(&self, thread: ThreadId) {
        let mut rings = self.rings.write().unwrap();
        let Some(ring) = rings.get_mut(&thread) else {
            return;
        };
        let Some(entry) = ring.active.pop_back() else {
            return;
        };
        drop(rings);

        let mut completed = self.completed.lock().unwrap();
        if completed.len() == COMPLETED_QUEUE_CAPACITY {
            completed.pop_front();
        }
        completed.push_back(entry);
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().unwrap().len()
    }
}

/// `ThreadId` has no stable numeric representation; hash it down to 32 bits
/// for the fixed-size trace record.
fn thread_id_as_u32(id: ThreadId) -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ring_drops_oldest_past_capacity() {
        let ring = TraceRing::new();
        for i in 0..10 {
            ring.record(i, 0, 0, 0);
        }
        assert_eq!(ring.len(), 10);
        let dump = ring.dump();
        assert_eq!(&dump[0..8], b"LTFS_TRC");
    }

    #[test]
    fn function_traces_round_trip_through_completed_queue() {
        let traces = FunctionTraces::new();
        let here = std::thread::current().id();
        traces.enter(here, 1, 0, 0);
        traces.complete(here);
        assert_eq!(traces.completed_count(), 1);
    }
}
