//! Swap-in of disk-backed cache entries.
//!
//! A cache entry whose body lives only on persistent storage is brought back into memory
//! on behalf of a reader by the [`SwapInCoordinator`](swapin::SwapInCoordinator). The
//! coordinator validates the entry, asks a [`StorageBackend`](backend::StorageBackend) to open
//! it, and wires the two backend callbacks (location confirmed, completed) to the entry and the
//! waiting [`ReadCursor`](client::ReadCursor).
//!
//! Callbacks never hold a strong reference to the cursor. They go through the
//! [`CallbackRegistry`](cbdata::CallbackRegistry), which only hands the cursor back while it is
//! still alive.

#[macro_use]
pub mod metrics;

pub mod backend;
pub mod cbdata;
pub mod client;
pub mod config;
pub mod entry;
pub mod key;
pub mod logging;
pub mod stats;
pub mod swapin;

#[cfg(test)]
mod test;
