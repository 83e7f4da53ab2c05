use swapin_service::backend::{DISK_OK, OpenError};
use swapin_service::client::ReadCursor;
use swapin_service::entry::SwapLocation;
use swapin_service::swapin::BeginOutcome;

use crate::utils::{cache_dir, pending_read, setup_coordinator, validated_entry};

#[tokio::test]
async fn test_swapin_from_disk() {
    swapin_test::setup();
    let cache = swapin_test::tempdir();
    let dirs = [cache_dir(cache.path())];
    let (backend, coordinator) = setup_coordinator(&dirs);

    let location = SwapLocation::new(0, 0x12345);
    swapin_test::store_file(backend.path_for(location).unwrap(), b"HTTP/1.1 200 OK\r\n\r\nhi");
    assert!(cache.path().join("01/23/00012345").is_file());

    let entry = validated_entry(location);
    let cursor = ReadCursor::new(&entry);
    let result = pending_read(&cursor);

    let outcome = coordinator.begin(&cursor, &entry).unwrap();
    assert_eq!(outcome, BeginOutcome::Submitted);
    assert!(cursor.swap_in_io().is_some());

    let (buffer, errflag) = result.await.unwrap();
    assert_eq!(errflag, DISK_OK);
    assert_eq!(&buffer[..], b"HTTP/1.1 200 OK\r\n\r\nhi");

    let entry = entry.lock().unwrap();
    assert_eq!(entry.location(), location);
    assert_eq!(
        &entry.mem_obj().unwrap().body()[..],
        b"HTTP/1.1 200 OK\r\n\r\nhi"
    );
    assert_eq!(coordinator.stats().ins(), 1);
    assert!(!cursor.is_swapping_in());
}

#[tokio::test]
async fn test_second_cache_dir() {
    swapin_test::setup();
    let first = swapin_test::tempdir();
    let second = swapin_test::tempdir();
    let dirs = [cache_dir(first.path()), cache_dir(second.path())];
    let (backend, coordinator) = setup_coordinator(&dirs);

    let location = SwapLocation::new(1, 7);
    swapin_test::store_file(backend.path_for(location).unwrap(), b"second");

    let entry = validated_entry(location);
    let cursor = ReadCursor::new(&entry);
    let result = pending_read(&cursor);
    coordinator.begin(&cursor, &entry).unwrap();

    let (buffer, errflag) = result.await.unwrap();
    assert_eq!(errflag, DISK_OK);
    assert_eq!(&buffer[..], b"second");
}

#[tokio::test]
async fn test_empty_object() {
    swapin_test::setup();
    let cache = swapin_test::tempdir();
    let dirs = [cache_dir(cache.path())];
    let (backend, coordinator) = setup_coordinator(&dirs);

    let location = SwapLocation::new(0, 0);
    swapin_test::store_file(backend.path_for(location).unwrap(), b"");

    let entry = validated_entry(location);
    let cursor = ReadCursor::new(&entry);
    let result = pending_read(&cursor);
    coordinator.begin(&cursor, &entry).unwrap();

    let (buffer, errflag) = result.await.unwrap();
    assert_eq!(errflag, DISK_OK);
    assert!(buffer.is_empty());
    assert_eq!(coordinator.stats().ins(), 1);
}

#[tokio::test]
async fn test_missing_file() {
    swapin_test::setup();
    let cache = swapin_test::tempdir();
    let dirs = [cache_dir(cache.path())];
    let (_backend, coordinator) = setup_coordinator(&dirs);

    let entry = validated_entry(SwapLocation::new(0, 42));
    let cursor = ReadCursor::new(&entry);
    let _result = pending_read(&cursor);

    let result = coordinator.begin(&cursor, &entry);
    assert!(matches!(result, Err(OpenError::Io(_))));
    assert!(!cursor.is_swapping_in());
    assert!(cursor.has_pending());
    assert_eq!(coordinator.stats().ins(), 0);
}

#[tokio::test]
async fn test_unknown_cache_dir() {
    swapin_test::setup();
    let cache = swapin_test::tempdir();
    let dirs = [cache_dir(cache.path())];
    let (_backend, coordinator) = setup_coordinator(&dirs);

    let entry = validated_entry(SwapLocation::new(3, 1));
    let cursor = ReadCursor::new(&entry);

    let result = coordinator.begin(&cursor, &entry);
    assert!(matches!(result, Err(OpenError::UnknownDirectory(3))));
    assert!(!cursor.is_swapping_in());
}

#[tokio::test]
async fn test_dropped_cursor() {
    swapin_test::setup();
    let cache = swapin_test::tempdir();
    let dirs = [cache_dir(cache.path())];
    let (backend, coordinator) = setup_coordinator(&dirs);

    let location = SwapLocation::new(0, 9);
    swapin_test::store_file(backend.path_for(location).unwrap(), b"unwanted");

    let entry = validated_entry(location);
    let cursor = ReadCursor::new(&entry);
    let result = pending_read(&cursor);
    coordinator.begin(&cursor, &entry).unwrap();
    let io = cursor.swap_in_io().unwrap();
    drop(cursor);

    // the pending read went away with the cursor
    assert!(result.await.is_err());

    // let the read task finish
    while io.phase() != swapin_service::backend::IoPhase::Completed {
        tokio::task::yield_now().await;
    }

    assert_eq!(coordinator.stats().ins(), 0);
    assert!(entry.lock().unwrap().mem_obj().unwrap().body().is_empty());
    assert_eq!(coordinator.registry().registered(), 0);
}
