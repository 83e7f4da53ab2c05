use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// The identity of a cached object.
///
/// A key is formed from human-readable, stable metadata (the request method and URL, plus
/// anything a caller writes into the [`StoreKeyBuilder`]), which is hashed with SHA-256.
/// Equality and hashing only consider the digest.
#[derive(Debug, Clone, Eq)]
pub struct StoreKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for StoreKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl StoreKey {
    /// Creates the public key for a `method` / `url` pair.
    pub fn public(method: &str, url: &str) -> Self {
        Self::builder(method, url).build()
    }

    /// Creates a [`StoreKeyBuilder`] seeded with the `method` / `url` pair.
    pub fn builder(method: &str, url: &str) -> StoreKeyBuilder {
        let mut builder = StoreKeyBuilder {
            metadata: String::new(),
        };
        builder.write_request(method, url).unwrap();
        builder
    }

    /// Returns the human-readable metadata that forms the basis of the [`StoreKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// The raw SHA-256 digest.
    pub fn digest(&self) -> &[u8; 32] {
        &self.hash
    }
}

/// A builder for [`StoreKey`]s.
///
/// The builder implements [`Write`](std::fmt::Write). Anything written becomes part of the
/// hashed metadata, so it **must** be stable across restarts, otherwise stored objects can no
/// longer be found by key.
pub struct StoreKeyBuilder {
    metadata: String,
}

impl StoreKeyBuilder {
    /// Writes the request line into the key metadata.
    pub fn write_request(&mut self, method: &str, url: &str) -> Result<(), fmt::Error> {
        self.metadata
            .write_fmt(format_args!("method: {}\nurl: {url}\n", method.to_uppercase()))
    }

    /// Finalize the [`StoreKey`].
    pub fn build(self) -> StoreKey {
        let hash = Sha256::digest(&self.metadata);
        let hash = <[u8; 32]>::try_from(hash).expect("sha256 outputs 32 bytes");

        StoreKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for StoreKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
