//! The cache entry data model.
//!
//! A [`StoreEntry`] carries no behavior of its own. It is created by the store when an object is
//! first cached, mutated by the swap-out path and the rebuild process (both external), and read
//! by the swap-in coordinator, which rewrites its [`SwapLocation`] and hands the swapped-in body
//! to its [`MemObject`].

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::key::StoreKey;

/// An entry shared between the store, its readers and in-flight swap-ins.
///
/// The mutex serializes entry mutation across the I/O loop and consumers.
pub type SharedEntry = Arc<Mutex<StoreEntry>>;

/// Whether the body of an entry is resident in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemStatus {
    NotInMemory,
    InMemory,
}

/// Lifecycle of the swap-out that produced the on-disk copy of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStatus {
    /// No on-disk copy exists, or its state is unknown.
    None,
    /// The on-disk copy is still being written.
    Writing,
    /// The on-disk copy is complete.
    Done,
}

impl SwapStatus {
    /// Whether a file is known to exist on disk, possibly still being written.
    pub fn has_disk_copy(self) -> bool {
        match self {
            SwapStatus::Writing | SwapStatus::Done => true,
            SwapStatus::None => false,
        }
    }
}

impl AsRef<str> for SwapStatus {
    fn as_ref(&self) -> &str {
        match self {
            SwapStatus::None => "none",
            SwapStatus::Writing => "writing",
            SwapStatus::Done => "done",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Where the bytes of an object live: a cache directory index and a file number within it.
///
/// The location assigned at swap-out time may be provisional. It is only authoritative once a
/// backend has confirmed it while opening the object for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapLocation {
    pub dirn: i32,
    pub filen: i32,
}

impl SwapLocation {
    /// The location of an entry that was never swapped out.
    pub const UNSET: SwapLocation = SwapLocation {
        dirn: -1,
        filen: -1,
    };

    pub fn new(dirn: i32, filen: i32) -> Self {
        Self { dirn, filen }
    }

    /// Whether the file number denotes an actual file. Negative numbers never do.
    pub fn has_valid_file(&self) -> bool {
        self.filen >= 0
    }
}

impl Default for SwapLocation {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for SwapLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:08X}", self.dirn, self.filen)
    }
}

/// The in-memory representation of an entry, receiving swapped-in bytes.
#[derive(Debug, Default)]
pub struct MemObject {
    url: String,
    body: Bytes,
}

impl MemObject {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: Bytes::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The body read from storage by the last swap-in, empty before that.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }
}

/// A cached object.
#[derive(Debug)]
pub struct StoreEntry {
    key: StoreKey,
    mem_status: MemStatus,
    swap_status: SwapStatus,
    location: SwapLocation,
    /// Set once the rebuild process has reconciled this entry with the disk.
    validated: bool,
    mem_obj: Option<MemObject>,
}

impl StoreEntry {
    /// Creates an entry that is neither in memory nor on disk.
    pub fn new(key: StoreKey) -> Self {
        Self {
            key,
            mem_status: MemStatus::NotInMemory,
            swap_status: SwapStatus::None,
            location: SwapLocation::UNSET,
            validated: false,
            mem_obj: None,
        }
    }

    /// Creates an entry whose body was swapped out to `location`.
    ///
    /// The entry still has to be validated before it can be swapped in.
    pub fn on_disk(key: StoreKey, location: SwapLocation, swap_status: SwapStatus) -> Self {
        Self {
            location,
            swap_status,
            ..Self::new(key)
        }
    }

    pub fn into_shared(self) -> SharedEntry {
        Arc::new(Mutex::new(self))
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    pub fn mem_status(&self) -> MemStatus {
        self.mem_status
    }

    pub fn set_mem_status(&mut self, mem_status: MemStatus) {
        self.mem_status = mem_status;
    }

    pub fn swap_status(&self) -> SwapStatus {
        self.swap_status
    }

    pub fn set_swap_status(&mut self, swap_status: SwapStatus) {
        self.swap_status = swap_status;
    }

    pub fn location(&self) -> SwapLocation {
        self.location
    }

    pub fn set_location(&mut self, location: SwapLocation) {
        self.location = location;
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Marks the entry as reconciled with its on-disk state.
    pub fn set_validated(&mut self, validated: bool) {
        self.validated = validated;
    }

    pub fn mem_obj(&self) -> Option<&MemObject> {
        self.mem_obj.as_ref()
    }

    pub fn mem_obj_mut(&mut self) -> Option<&mut MemObject> {
        self.mem_obj.as_mut()
    }

    /// Creates the memory object for this entry, unless one exists already.
    pub fn create_mem_object(&mut self, url: impl Into<String>) -> &mut MemObject {
        self.mem_obj.get_or_insert_with(|| MemObject::new(url))
    }
}
