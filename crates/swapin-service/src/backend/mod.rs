//! The storage backend contract.
//!
//! A [`StorageBackend`] opens a stored object for reading and reports back through two typed
//! callbacks: once the true location of the object is known, and once the read is done. Backends
//! own an [`IoCompletion`] for every opened object, which enforces the ordering and
//! exactly-once guarantees of those callbacks.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use thiserror::Error;

use crate::entry::{SwapLocation, SwapStatus};
use crate::key::StoreKey;

pub mod ufs;

pub use ufs::UfsBackend;

/// The status code a backend reports with its callbacks.
///
/// `0` means success, negative values are backend-defined errors. Positive values are never
/// legal.
pub type ErrFlag = i32;

pub const DISK_OK: ErrFlag = 0;
pub const DISK_ERROR: ErrFlag = -1;
pub const DISK_EOF: ErrFlag = -2;
pub const DISK_NO_SPACE_LEFT: ErrFlag = -6;

/// An error opening a stored object, reported synchronously by [`StorageBackend::open`].
#[derive(Debug, Error)]
pub enum OpenError {
    /// The backend does not know the cache directory.
    #[error("unknown cache directory {0}")]
    UnknownDirectory(i32),
    /// The file number cannot denote a stored object.
    #[error("invalid file number {0}")]
    InvalidFileNumber(i32),
    /// The object could not be opened.
    #[error("failed to open stored object")]
    Io(#[from] io::Error),
}

/// What a backend needs to know about an entry to open it.
///
/// This is a snapshot, so no entry lock is held while the backend runs.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub key: StoreKey,
    pub location: SwapLocation,
    pub swap_status: SwapStatus,
}

/// The progress of a single opened object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPhase {
    /// Opened, location not yet confirmed.
    Opening,
    /// The backend confirmed where the object lives.
    LocationKnown,
    /// The read finished, successfully or not. Terminal.
    Completed,
}

#[derive(Debug)]
struct IoInner {
    phase: IoPhase,
    location: SwapLocation,
    body: Bytes,
}

/// The I/O state of a single opened object. This is the handle a reader keeps while a swap-in
/// is in flight.
#[derive(Debug)]
pub struct StoreIoState {
    key: StoreKey,
    inner: Mutex<IoInner>,
}

impl StoreIoState {
    pub fn new(key: StoreKey, location: SwapLocation) -> Arc<Self> {
        Arc::new(Self {
            key,
            inner: Mutex::new(IoInner {
                phase: IoPhase::Opening,
                location,
                body: Bytes::new(),
            }),
        })
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    pub fn phase(&self) -> IoPhase {
        self.inner.lock().unwrap().phase
    }

    /// The location the backend reports for the object.
    pub fn location(&self) -> SwapLocation {
        self.inner.lock().unwrap().location
    }

    /// The bytes read, empty until the read completed successfully.
    pub fn body(&self) -> Bytes {
        self.inner.lock().unwrap().body.clone()
    }

    fn confirm_location(&self, location: SwapLocation) {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(
            inner.phase,
            IoPhase::Opening,
            "location confirmed for {} in phase {:?}",
            self.key,
            inner.phase
        );
        inner.phase = IoPhase::LocationKnown;
        inner.location = location;
    }

    fn complete(&self, body: Bytes) {
        let mut inner = self.inner.lock().unwrap();
        assert_ne!(
            inner.phase,
            IoPhase::Completed,
            "{} completed twice",
            self.key
        );
        inner.phase = IoPhase::Completed;
        inner.body = body;
    }
}

/// A callback fired by a backend with the status and the I/O state it refers to.
pub type IoCallback = Box<dyn FnOnce(ErrFlag, &StoreIoState) + Send>;

/// The two callbacks a swap-in hands to [`StorageBackend::open`].
pub struct SwapInCallbacks {
    /// Fired at most once, before `on_completed`, when the location of the object is known.
    pub on_location_confirmed: IoCallback,
    /// Fired exactly once when the read is done.
    pub on_completed: IoCallback,
}

impl fmt::Debug for SwapInCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapInCallbacks").finish_non_exhaustive()
    }
}

/// The backend side of an opened object.
///
/// Completing consumes the `IoCompletion`, so a location confirmation can never follow
/// completion. Dropping it without completing completes with [`DISK_ERROR`].
pub struct IoCompletion {
    io: Arc<StoreIoState>,
    on_location_confirmed: Option<IoCallback>,
    on_completed: Option<IoCallback>,
}

impl fmt::Debug for IoCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoCompletion")
            .field("io", &self.io)
            .field("location_pending", &self.on_location_confirmed.is_some())
            .finish()
    }
}

impl IoCompletion {
    pub fn new(io: Arc<StoreIoState>, callbacks: SwapInCallbacks) -> Self {
        Self {
            io,
            on_location_confirmed: Some(callbacks.on_location_confirmed),
            on_completed: Some(callbacks.on_completed),
        }
    }

    pub fn io(&self) -> &Arc<StoreIoState> {
        &self.io
    }

    /// Reports the true location of the object. Only the first call has an effect.
    pub fn confirm_location(&mut self, errflag: ErrFlag, location: SwapLocation) {
        if let Some(callback) = self.on_location_confirmed.take() {
            self.io.confirm_location(location);
            callback(errflag, &self.io);
        }
    }

    /// Finishes the read, handing `body` to the reader when `errflag` is [`DISK_OK`].
    pub fn complete(mut self, errflag: ErrFlag, body: Bytes) {
        self.finish(errflag, body);
    }

    fn finish(&mut self, errflag: ErrFlag, body: Bytes) {
        self.on_location_confirmed = None;
        if let Some(callback) = self.on_completed.take() {
            let body = if errflag == DISK_OK { body } else { Bytes::new() };
            self.io.complete(body);
            callback(errflag, &self.io);
        }
    }
}

impl Drop for IoCompletion {
    fn drop(&mut self) {
        if self.on_completed.is_some() {
            tracing::warn!(key = %self.io.key(), "Stored object dropped without completing");
            self.finish(DISK_ERROR, Bytes::new());
        }
    }
}

/// A storage backend that knows how to open stored objects for reading.
pub trait StorageBackend: Send + Sync {
    /// Opens the object described by `request`.
    ///
    /// On success, the backend keeps an [`IoCompletion`] for the returned state and fires the
    /// callbacks later, from its I/O loop. Callbacks must never be invoked from within `open`.
    fn open(
        &self,
        request: &OpenRequest,
        callbacks: SwapInCallbacks,
    ) -> Result<Arc<StoreIoState>, OpenError>;
}
