// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

//! The `KeyIndex` contract and the key capability trait.

use std::hash::{Hash, Hasher};

use ethereum_types::{H160, H256};
use siphasher::sip::SipHasher24;

use crate::{error::Result, snapshot::IndexSnapshot};

/// The dense identifier assigned to a key on first insertion.
/// Encoded little-endian, 4 bytes, everywhere it hits a wire or a disk.
pub type Ordinal = u32;

/// Serialized width of an [`Ordinal`].
pub const ORDINAL_SIZE: usize = 4;

/// A fixed-width index key.
///
/// `Ord` doubles as the comparator used by sorted blocks and pages;
/// for the provided hash types it is byte-lexicographic.
pub trait Key: Clone + Eq + Ord + Hash {
    /// Serialized width in bytes.
    const SIZE: usize;

    /// The serialized form. Must be exactly `SIZE` bytes.
    fn as_bytes(&self) -> &[u8];

    /// Reconstruct from `SIZE` bytes. Panics on a wrong-sized slice;
    /// callers validate lengths and surface `Corruption` beforehand.
    fn from_slice(bytes: &[u8]) -> Self;

    /// Stable 64-bit hash used for bucket addressing. Must not change
    /// between runs or the on-disk bucket layout becomes unreadable.
    fn bucket_hash(&self) -> u64 {
        let mut hasher = SipHasher24::new_with_keys(0, 0);
        hasher.write(self.as_bytes());
        hasher.finish()
    }
}

impl Key for H160 {
    const SIZE: usize = 20;

    fn as_bytes(&self) -> &[u8] {
        H160::as_bytes(self)
    }

    fn from_slice(bytes: &[u8]) -> Self {
        H160::from_slice(bytes)
    }
}

impl Key for H256 {
    const SIZE: usize = 32;

    fn as_bytes(&self) -> &[u8] {
        H256::as_bytes(self)
    }

    fn from_slice(bytes: &[u8]) -> Self {
        H256::from_slice(bytes)
    }
}

/// An append-only mapping from keys to dense ordinals `0, 1, 2, …`.
///
/// The first `get_or_add` of a key assigns it the ordinal equal to the
/// index size at that moment; the assignment is final. The state hash
/// is the SHA-256 chain over the serialized keys in insertion order,
/// so two instances fed the same key sequence agree on `(len, hash)`
/// regardless of the backend.
pub trait KeyIndex<K: Key> {
    /// Return the ordinal of `key`, assigning the next free one if the
    /// key has not been seen before. The flag reports whether the key
    /// was new.
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)>;

    /// Return the ordinal of `key`, or `Error::NotFound`. Read-only.
    fn get(&self, key: &K) -> Result<Ordinal>;

    /// Whether `key` has been assigned an ordinal. Read-only.
    fn contains(&self, key: &K) -> Result<bool>;

    /// Number of keys in the index; equally, the next free ordinal.
    fn len(&self) -> Result<Ordinal>;

    /// Whether the index holds no keys.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Commit pending keys into the hash chain and return the state
    /// hash. Idempotent when nothing is pending.
    fn state_hash(&mut self) -> Result<H256>;

    /// Make all side effects durable, including metadata and the
    /// committed state hash.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the backing medium. Any further operation,
    /// including a second `close`, returns `Error::Closed`.
    fn close(&mut self) -> Result<()>;

    /// Freeze the current `(len, hash, key sequence)` into a snapshot.
    /// Later mutations of the index do not affect it.
    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_hash_is_stable() {
        let key = H160::from_low_u64_be(42);
        assert_eq!(key.bucket_hash(), key.clone().bucket_hash());
        assert_ne!(
            H160::from_low_u64_be(1).bucket_hash(),
            H160::from_low_u64_be(2).bucket_hash()
        );
    }

    #[test]
    fn round_trips_through_bytes() {
        let key = H160::from_low_u64_be(0xdead_beef);
        assert_eq!(key.as_bytes().len(), <H160 as Key>::SIZE);
        assert_eq!(H160::from_slice(key.as_bytes()), key);

        let key = H256::from_low_u64_be(7);
        assert_eq!(key.as_bytes().len(), <H256 as Key>::SIZE);
        assert_eq!(<H256 as Key>::from_slice(key.as_bytes()), key);
    }
}
