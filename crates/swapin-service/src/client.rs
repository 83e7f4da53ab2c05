//! Per-consumer read state.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use bytes::BytesMut;

use crate::backend::{ErrFlag, StoreIoState};
use crate::cbdata::CallbackToken;
use crate::entry::{SharedEntry, StoreEntry};

/// The callback receiving the result of a read: the destination buffer and the backend status.
pub type CopyCallback = Box<dyn FnOnce(BytesMut, ErrFlag) + Send>;

/// A read waiting for its result.
pub struct PendingRead {
    buffer: BytesMut,
    callback: CopyCallback,
}

impl fmt::Debug for PendingRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("buffer_len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl PendingRead {
    /// The caller-supplied destination buffer.
    pub fn buffer(&self) -> &BytesMut {
        &self.buffer
    }

    /// Delivers `data` and `errflag` to the waiting consumer.
    pub fn deliver(self, data: &[u8], errflag: ErrFlag) {
        let mut buffer = self.buffer;
        buffer.extend_from_slice(data);
        (self.callback)(buffer, errflag)
    }
}

/// A swap-in that is outstanding for a cursor.
#[derive(Debug)]
pub(crate) struct ActiveSwapIn {
    pub token: CallbackToken<Mutex<CursorState>>,
    /// The backend handle, set as soon as `open` returned it.
    pub io: Option<Arc<StoreIoState>>,
}

#[derive(Debug)]
pub(crate) struct CursorState {
    pub entry: Weak<Mutex<StoreEntry>>,
    pub pending: Option<PendingRead>,
    pub active_swap_in: Option<ActiveSwapIn>,
}

/// One consumer's read session against a cache entry.
///
/// A cursor may run any number of swap-ins, one after the other. It is destroyed once the last
/// clone is dropped. Swap-ins still in flight at that point are not aborted, but their callbacks
/// no longer reach the cursor.
#[derive(Clone)]
pub struct ReadCursor {
    state: Arc<Mutex<CursorState>>,
}

impl fmt::Debug for ReadCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ReadCursor")
            .field("pending", &state.pending)
            .field("swapping_in", &state.active_swap_in.is_some())
            .finish()
    }
}

impl ReadCursor {
    /// Starts a read session against `entry`.
    ///
    /// The cursor does not keep the entry alive.
    pub fn new(entry: &SharedEntry) -> Self {
        Self {
            state: Arc::new(Mutex::new(CursorState {
                entry: Arc::downgrade(entry),
                pending: None,
                active_swap_in: None,
            })),
        }
    }

    /// The entry being read, if it still exists.
    pub fn entry(&self) -> Option<SharedEntry> {
        self.state.lock().unwrap().entry.upgrade()
    }

    /// Whether this cursor reads `entry`.
    pub fn reads(&self, entry: &SharedEntry) -> bool {
        Weak::ptr_eq(&self.state.lock().unwrap().entry, &Arc::downgrade(entry))
    }

    /// Registers the callback for the next read result, together with its destination buffer.
    ///
    /// # Panics
    ///
    /// Panics if a callback is already pending.
    pub fn set_pending<F>(&self, buffer: BytesMut, callback: F)
    where
        F: FnOnce(BytesMut, ErrFlag) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        assert!(state.pending.is_none(), "read callback already pending");
        state.pending = Some(PendingRead {
            buffer,
            callback: Box::new(callback),
        });
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().unwrap().pending.is_some()
    }

    /// Removes the pending callback without invoking it.
    pub fn take_pending(&self) -> Option<PendingRead> {
        self.state.lock().unwrap().pending.take()
    }

    /// Whether a swap-in is outstanding for this cursor.
    pub fn is_swapping_in(&self) -> bool {
        self.state.lock().unwrap().active_swap_in.is_some()
    }

    /// The backend handle of the outstanding swap-in.
    pub fn swap_in_io(&self) -> Option<Arc<StoreIoState>> {
        let state = self.state.lock().unwrap();
        state.active_swap_in.as_ref()?.io.clone()
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<CursorState>> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use crate::entry::StoreEntry;
    use crate::key::StoreKey;

    use super::*;

    fn entry() -> SharedEntry {
        StoreEntry::new(StoreKey::public("GET", "http://example.com/")).into_shared()
    }

    #[test]
    fn test_cursor_does_not_own_entry() {
        let entry = entry();
        let cursor = ReadCursor::new(&entry);
        assert!(cursor.reads(&entry));
        assert!(cursor.entry().is_some());

        drop(entry);
        assert!(cursor.entry().is_none());
    }

    #[test]
    fn test_reads_other_entry() {
        let cursor = ReadCursor::new(&entry());
        assert!(!cursor.reads(&entry()));
    }

    #[test]
    fn test_pending_delivery() {
        let cursor = ReadCursor::new(&entry());
        let (tx, rx) = mpsc::channel();
        cursor.set_pending(BytesMut::from(&b"head:"[..]), move |buffer, errflag| {
            tx.send((buffer, errflag)).unwrap();
        });
        assert!(cursor.has_pending());

        let pending = cursor.take_pending().unwrap();
        assert!(!cursor.has_pending());
        pending.deliver(b"body", 0);

        let (buffer, errflag) = rx.recv().unwrap();
        assert_eq!(&buffer[..], b"head:body");
        assert_eq!(errflag, 0);
    }

    #[test]
    #[should_panic(expected = "read callback already pending")]
    fn test_second_pending_panics() {
        let cursor = ReadCursor::new(&entry());
        cursor.set_pending(BytesMut::new(), |_, _| {});
        cursor.set_pending(BytesMut::new(), |_, _| {});
    }
}
