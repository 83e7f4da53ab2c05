use std::path::Path;
use std::sync::Arc;

use bytes::BytesMut;
use swapin_service::backend::{ErrFlag, UfsBackend};
use swapin_service::client::ReadCursor;
use swapin_service::config::CacheDirConfig;
use swapin_service::entry::{SharedEntry, StoreEntry, SwapLocation, SwapStatus};
use swapin_service::key::StoreKey;
use swapin_service::swapin::SwapInCoordinator;
use tokio::sync::oneshot;

pub const URL: &str = "http://example.com/index.html";

pub fn cache_dir(path: &Path) -> CacheDirConfig {
    CacheDirConfig {
        path: path.to_path_buf(),
        l1: 16,
        l2: 256,
    }
}

/// Creates a coordinator reading from a UFS backend on the current runtime.
pub fn setup_coordinator(dirs: &[CacheDirConfig]) -> (UfsBackend, SwapInCoordinator) {
    let backend = UfsBackend::from_current(dirs);
    let coordinator = SwapInCoordinator::new(Arc::new(backend.clone()));
    (backend, coordinator)
}

pub fn validated_entry(location: SwapLocation) -> SharedEntry {
    let mut entry = StoreEntry::on_disk(StoreKey::public("GET", URL), location, SwapStatus::Done);
    entry.set_validated(true);
    entry.create_mem_object(URL);
    entry.into_shared()
}

/// Sets a pending read on `cursor` and returns the receiving end of its result.
pub fn pending_read(cursor: &ReadCursor) -> oneshot::Receiver<(BytesMut, ErrFlag)> {
    let (sender, receiver) = oneshot::channel();
    cursor.set_pending(BytesMut::new(), move |buffer, errflag| {
        sender.send((buffer, errflag)).ok();
    });
    receiver
}
