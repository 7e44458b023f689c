//! Per-stream receive buffers and pending-send queues.
//!
//! The two tables are locked independently: external callers push send
//! chunks and drain receive bytes, the worker advances send cursors and
//! appends received bytes. Locks are held only for queue peeks, pushes,
//! and pops.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use bytes::BytesMut;

/// Receive side of one stream.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    recv_buf: BytesMut,
    fin_received: bool,
    closed: bool,
}

/// One queued write: the cursor advances as the engine accepts bytes and
/// the chunk is popped once fully drained.
#[derive(Debug)]
pub(crate) struct OutgoingChunk {
    pub data: Vec<u8>,
    pub offset: usize,
    pub fin: bool,
}

pub(crate) type OutgoingTable = BTreeMap<u64, VecDeque<OutgoingChunk>>;

/// Shared stream tables, keyed by stream id.
#[derive(Debug, Default)]
pub(crate) struct StreamStore {
    streams: Mutex<HashMap<u64, StreamState>>,
    outgoing: Mutex<OutgoingTable>,
}

impl StreamStore {
    /// Record a newly opened stream.
    pub(crate) fn register(&self, stream_id: u64) {
        self.streams
            .lock()
            .unwrap()
            .entry(stream_id)
            .or_default();
    }

    /// Append a send chunk for the worker to drain.
    pub(crate) fn append_send(&self, stream_id: u64, data: &[u8], fin: bool) {
        let chunk = OutgoingChunk {
            data: data.to_vec(),
            offset: 0,
            fin,
        };
        self.outgoing
            .lock()
            .unwrap()
            .entry(stream_id)
            .or_default()
            .push_back(chunk);
    }

    /// Lock the pending-send table for the worker's drain pass.
    pub(crate) fn lock_outgoing(&self) -> MutexGuard<'_, OutgoingTable> {
        self.outgoing.lock().unwrap()
    }

    /// Append received bytes in wire order, optionally marking FIN.
    pub(crate) fn deliver_recv(&self, stream_id: u64, data: &[u8], fin: bool) {
        let mut streams = self.streams.lock().unwrap();
        let state = streams.entry(stream_id).or_default();
        state.recv_buf.extend_from_slice(data);
        if fin {
            state.fin_received = true;
        }
    }

    /// Consume up to `max` bytes in FIFO order.
    ///
    /// An unknown or drained stream yields an empty buffer.
    pub(crate) fn drain_recv(&self, stream_id: u64, max: usize) -> Vec<u8> {
        let mut streams = self.streams.lock().unwrap();
        let Some(state) = streams.get_mut(&stream_id) else {
            return Vec::new();
        };
        let n = max.min(state.recv_buf.len());
        state.recv_buf.split_to(n).to_vec()
    }

    /// Mark a stream closed by the peer or the engine.
    pub(crate) fn mark_closed(&self, stream_id: u64) {
        if let Some(state) = self.streams.lock().unwrap().get_mut(&stream_id) {
            state.closed = true;
        }
    }

    /// True once the peer has finished or reset the stream.
    pub(crate) fn stream_finished(&self, stream_id: u64) -> bool {
        self.streams
            .lock()
            .unwrap()
            .get(&stream_id)
            .map(|s| s.fin_received || s.closed)
            .unwrap_or(false)
    }

    /// Drop all stream state; used when a fresh connection begins.
    pub(crate) fn reset(&self) {
        self.streams.lock().unwrap().clear();
        self.outgoing.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_is_fifo_across_deliveries() {
        let store = StreamStore::default();
        store.register(0);
        store.deliver_recv(0, b"hello ", false);
        store.deliver_recv(0, b"world", false);

        assert_eq!(store.drain_recv(0, 8), b"hello wo");
        assert_eq!(store.drain_recv(0, 8), b"rld");
        assert_eq!(store.drain_recv(0, 8), b"");
    }

    #[test]
    fn drain_unknown_stream_is_empty() {
        let store = StreamStore::default();
        assert!(store.drain_recv(42, 1024).is_empty());
    }

    #[test]
    fn fin_flag_sticks() {
        let store = StreamStore::default();
        store.deliver_recv(4, b"tail", true);
        assert!(store.stream_finished(4));
        // Draining the buffer does not clear the flag.
        let _ = store.drain_recv(4, 1024);
        assert!(store.stream_finished(4));
    }

    #[test]
    fn peer_close_marks_stream_finished() {
        let store = StreamStore::default();
        store.register(8);
        assert!(!store.stream_finished(8));
        store.mark_closed(8);
        assert!(store.stream_finished(8));
    }

    #[test]
    fn send_chunks_keep_order_and_cursor() {
        let store = StreamStore::default();
        store.append_send(0, b"first", false);
        store.append_send(0, b"second", true);

        let mut outgoing = store.lock_outgoing();
        let queue = outgoing.get_mut(&0).unwrap();
        assert_eq!(queue.len(), 2);

        // Simulate the worker accepting part of the head chunk.
        let head = queue.front_mut().unwrap();
        assert_eq!(&head.data, b"first");
        assert!(!head.fin);
        head.offset += 3;
        assert_eq!(&head.data[head.offset..], b"st");

        // Fully drained chunks are popped, exposing the next in order.
        head.offset = head.data.len();
        if head.offset >= head.data.len() {
            queue.pop_front();
        }
        assert_eq!(&queue.front().unwrap().data, b"second");
        assert!(queue.front().unwrap().fin);
    }

    #[test]
    fn reset_clears_both_tables() {
        let store = StreamStore::default();
        store.register(0);
        store.deliver_recv(0, b"data", false);
        store.append_send(0, b"data", false);
        store.reset();
        assert!(store.drain_recv(0, 16).is_empty());
        assert!(store.lock_outgoing().is_empty());
    }

    #[test]
    fn streams_are_independent() {
        let store = StreamStore::default();
        store.deliver_recv(0, b"aaaa", false);
        store.deliver_recv(4, b"bbbb", false);
        assert_eq!(store.drain_recv(0, 16), b"aaaa");
        assert_eq!(store.drain_recv(4, 16), b"bbbb");
    }
}
