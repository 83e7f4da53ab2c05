//! A storage backend driven by hand from tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::backend::{
    ErrFlag, IoCompletion, OpenError, OpenRequest, StorageBackend, StoreIoState, SwapInCallbacks,
};
use crate::entry::SwapLocation;

/// Records every `open` and keeps the opened objects until the test completes them.
///
/// Callbacks are fired only from [`confirm_location`](Self::confirm_location) and
/// [`complete`](Self::complete), with no lock held, so they may re-enter the coordinator.
#[derive(Debug, Default)]
pub struct MockBackend {
    requests: Mutex<Vec<OpenRequest>>,
    in_flight: Mutex<VecDeque<IoCompletion>>,
    fail_next: Mutex<bool>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// All requests passed to `open`, including refused ones.
    pub fn requests(&self) -> Vec<OpenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Makes the next `open` fail synchronously.
    pub fn fail_next_open(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    /// Confirms the location of the oldest in-flight object.
    pub fn confirm_location(&self, errflag: ErrFlag, location: SwapLocation) {
        let mut completion = self.pop();
        completion.confirm_location(errflag, location);
        self.in_flight.lock().unwrap().push_front(completion);
    }

    /// Completes the oldest in-flight object.
    pub fn complete(&self, errflag: ErrFlag, body: &'static [u8]) {
        self.pop().complete(errflag, Bytes::from_static(body));
    }

    fn pop(&self) -> IoCompletion {
        self.in_flight
            .lock()
            .unwrap()
            .pop_front()
            .expect("no object in flight")
    }
}

impl StorageBackend for MockBackend {
    fn open(
        &self,
        request: &OpenRequest,
        callbacks: SwapInCallbacks,
    ) -> Result<Arc<StoreIoState>, OpenError> {
        self.requests.lock().unwrap().push(request.clone());

        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(io::Error::from(io::ErrorKind::NotFound).into());
        }

        let io = StoreIoState::new(request.key.clone(), request.location);
        let completion = IoCompletion::new(io.clone(), callbacks);
        self.in_flight.lock().unwrap().push_back(completion);
        Ok(io)
    }
}
