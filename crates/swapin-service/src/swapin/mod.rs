//! # Swap-in
//!
//! Swap-in brings the body of a cache entry that only lives on disk back into memory, on behalf
//! of a [`ReadCursor`] waiting for it.
//!
//! [`SwapInCoordinator::begin`] validates the entry and asks the [`StorageBackend`] to open it.
//! The backend later reports back twice:
//!
//! - *location confirmed* (optional, at most once): the entry's
//!   [`SwapLocation`](crate::entry::SwapLocation) is overwritten
//!   with the location the backend actually opened. The location recorded at swap-out time may be
//!   provisional, and is only authoritative after this point.
//! - *completed* (exactly once, terminal): the body is handed to the entry's memory object, the
//!   cursor's pending read callback is taken out of the cursor and invoked with the destination
//!   buffer and the backend status, and the completed swap-in counter is bumped.
//!
//! ## Preconditions
//!
//! Entries that are not ready to be swapped in are skipped with a [`BeginOutcome::NotReady`] and
//! no side effects at all. Callers are expected to retry later, for example once the rebuild
//! process validated the entry:
//!
//! - the entry has not been validated yet,
//! - the entry has no file on disk ([`SwapStatus::None`]),
//! - the entry's file number is negative.
//!
//! Calling `begin` with an entry that is already in memory, that has no memory object, or with
//! a cursor that already has a swap-in outstanding is a bug in the caller and panics.
//!
//! ## Cursor lifetime
//!
//! The backend callbacks only hold a [`CallbackToken`] for the cursor. If the cursor is dropped
//! while the backend is still reading, the callbacks find the token dead and do nothing: the
//! entry is not touched, no consumer callback runs and the completion is not counted.
//!
//! ## Metrics
//!
//! - `swapin.started`: Swap-ins submitted to the backend.
//! - `swapin.not_ready`: Skipped swap-ins, tagged with the `reason`.
//! - `swapin.open_failed`: Swap-ins the backend refused to open.
//! - `swapin.completed`: Completed swap-ins, tagged with `status:ok` or `status:error`.
//! - `swapin.discarded`: Completions dropped because the cursor was gone.
//! - `swapin.bytes`: A histogram of the size of swapped-in bodies.
//! - `swapin.registered`: The number of outstanding callback registrations.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::backend::{
    DISK_OK, ErrFlag, OpenError, OpenRequest, StorageBackend, StoreIoState, SwapInCallbacks,
};
use crate::cbdata::{CallbackRegistry, CallbackToken};
use crate::client::{ActiveSwapIn, CursorState, ReadCursor};
use crate::entry::{MemStatus, SharedEntry, SwapStatus};
use crate::stats::SwapInStats;


type CursorToken = CallbackToken<Mutex<CursorState>>;

/// Why an entry cannot be swapped in yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    /// The entry is still being reconciled with the disk by the rebuild process.
    NotValidated,
    /// No on-disk copy exists or is being written.
    BadSwapStatus(SwapStatus),
    /// The entry's file number does not denote a file.
    InvalidFileNumber(i32),
}

impl NotReady {
    fn as_str(&self) -> &'static str {
        match self {
            NotReady::NotValidated => "not_validated",
            NotReady::BadSwapStatus(_) => "bad_swap_status",
            NotReady::InvalidFileNumber(_) => "invalid_file_number",
        }
    }
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::NotValidated => f.write_str("entry not validated"),
            NotReady::BadSwapStatus(status) => write!(f, "bad swap status {status}"),
            NotReady::InvalidFileNumber(filen) => write!(f, "invalid file number {filen}"),
        }
    }
}

/// The outcome of [`SwapInCoordinator::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The backend is reading the entry. The cursor's pending callback fires once it is done.
    Submitted,
    /// Nothing happened.
    NotReady(NotReady),
}

/// Starts swap-ins and routes their backend callbacks to entries and cursors.
#[derive(Clone)]
pub struct SwapInCoordinator {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<CallbackRegistry>,
    stats: Arc<SwapInStats>,
}

impl fmt::Debug for SwapInCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapInCoordinator")
            .field("registered", &self.registry.registered())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SwapInCoordinator {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_stats(backend, Default::default())
    }

    /// Creates a coordinator counting completions into the shared `stats`.
    pub fn with_stats(backend: Arc<dyn StorageBackend>, stats: Arc<SwapInStats>) -> Self {
        Self {
            backend,
            registry: Default::default(),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<SwapInStats> {
        &self.stats
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Starts swapping `entry` in for `cursor`.
    ///
    /// The caller sets the cursor's pending callback before calling this. The callback fires
    /// once the backend is done, from the backend's I/O loop.
    ///
    /// # Panics
    ///
    /// Panics if `cursor` does not read `entry`, if the cursor already has a swap-in outstanding,
    /// if the entry is in memory, or if the entry has no memory object.
    pub fn begin(
        &self,
        cursor: &ReadCursor,
        entry: &SharedEntry,
    ) -> Result<BeginOutcome, OpenError> {
        assert!(cursor.reads(entry), "cursor reads a different entry");
        assert!(
            !cursor.is_swapping_in(),
            "cursor already has a swap-in outstanding"
        );

        let request = {
            let entry = entry.lock().unwrap();
            assert_eq!(
                entry.mem_status(),
                MemStatus::NotInMemory,
                "swap-in of in-memory entry {}",
                entry.key()
            );

            if !entry.is_validated() {
                // The rebuild has not reached this entry yet.
                return Ok(not_ready(NotReady::NotValidated));
            }

            let location = entry.location();
            tracing::debug!(%location, key = %entry.key(), "Starting swap-in");

            let swap_status = entry.swap_status();
            if !swap_status.has_disk_copy() {
                tracing::warn!(%swap_status, key = %entry.key(), "Bad swap status for swap-in");
                return Ok(not_ready(NotReady::BadSwapStatus(swap_status)));
            }
            if !location.has_valid_file() {
                tracing::warn!(filen = location.filen, key = %entry.key(), "Negative file number for swap-in");
                return Ok(not_ready(NotReady::InvalidFileNumber(location.filen)));
            }
            assert!(
                entry.mem_obj().is_some(),
                "swap-in of {} without a memory object",
                entry.key()
            );

            OpenRequest {
                key: entry.key().clone(),
                location,
                swap_status,
            }
        };

        let token = self.registry.register(cursor.state());
        cursor.state().lock().unwrap().active_swap_in = Some(ActiveSwapIn {
            token: token.clone(),
            io: None,
        });

        let context = SwapInContext {
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            token: token.clone(),
        };
        let callbacks = SwapInCallbacks {
            on_location_confirmed: {
                let context = context.clone();
                Box::new(move |errflag: ErrFlag, io: &StoreIoState| {
                    context.on_location_confirmed(errflag, io)
                })
            },
            on_completed: Box::new(move |errflag: ErrFlag, io: &StoreIoState| {
                context.on_completed(errflag, io)
            }),
        };

        tracing::trace!(location = %request.location, "Opening stored object");
        let result = self.backend.open(&request, callbacks);

        let mut state = cursor.state().lock().unwrap();
        let active = state
            .active_swap_in
            .as_mut()
            .filter(|active| active.token == token);

        match result {
            Ok(io) => {
                // The backend may have completed already, in which case there is nothing to keep.
                if let Some(active) = active {
                    active.io = Some(io);
                }
                drop(state);

                metric!(counter("swapin.started") += 1);
                metric!(gauge("swapin.registered") = self.registry.registered() as u64);
                Ok(BeginOutcome::Submitted)
            }
            Err(error) => {
                if active.is_some() {
                    state.active_swap_in = None;
                }
                drop(state);
                self.registry.unregister(token);

                let dynerr: &dyn std::error::Error = &error;
                tracing::error!(error = dynerr, location = %request.location, key = %request.key, "Failed to open stored object");
                metric!(counter("swapin.open_failed") += 1);
                Err(error)
            }
        }
    }
}

fn not_ready(reason: NotReady) -> BeginOutcome {
    metric!(counter("swapin.not_ready") += 1, "reason" => reason.as_str());
    BeginOutcome::NotReady(reason)
}

/// What the backend callbacks of one swap-in close over.
#[derive(Clone)]
struct SwapInContext {
    registry: Arc<CallbackRegistry>,
    stats: Arc<SwapInStats>,
    token: CursorToken,
}

impl SwapInContext {
    fn on_location_confirmed(&self, errflag: ErrFlag, io: &StoreIoState) {
        let Some(state) = self.registry.upgrade(&self.token) else {
            tracing::trace!(key = %io.key(), "Location confirmed for a closed cursor");
            return;
        };
        let Some(entry) = state.lock().unwrap().entry.upgrade() else {
            return;
        };

        let mut entry = entry.lock().unwrap();
        let location = io.location();
        tracing::debug!(
            from = %entry.location(),
            to = %location,
            errflag,
            key = %entry.key(),
            "Changing swap location"
        );
        entry.set_location(location);
    }

    fn on_completed(self, errflag: ErrFlag, io: &StoreIoState) {
        assert!(
            errflag <= 0,
            "swap-in of {} completed with positive status {errflag}",
            io.key()
        );

        let SwapInContext {
            registry,
            stats,
            token,
        } = self;

        let Some(state) = registry.upgrade(&token) else {
            registry.unregister(token);
            tracing::debug!(key = %io.key(), "Discarding swap-in completion for a closed cursor");
            metric!(counter("swapin.discarded") += 1);
            return;
        };

        let (pending, entry) = {
            let mut state = state.lock().unwrap();
            if state
                .active_swap_in
                .as_ref()
                .is_some_and(|active| active.token == token)
            {
                state.active_swap_in = None;
            }
            // Taken before invoking, so a callback re-entering the coordinator never sees it.
            (state.pending.take(), state.entry.upgrade())
        };
        registry.unregister(token);
        drop(state);

        tracing::debug!(errflag, key = %io.key(), "Swap-in completed");

        let body = io.body();
        if errflag == DISK_OK {
            if let Some(entry) = entry {
                if let Some(mem_obj) = entry.lock().unwrap().mem_obj_mut() {
                    mem_obj.set_body(body.clone());
                }
            }
            metric!(histogram("swapin.bytes") = body.len() as u64);
        }

        if let Some(pending) = pending {
            pending.deliver(&body, errflag);
        }

        stats.record_completion();
        let status = if errflag == DISK_OK { "ok" } else { "error" };
        metric!(counter("swapin.completed") += 1, "status" => status);
    }
}
