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

//! Read-through LRU cache around any `KeyIndex`.
//!
//! Only positive lookups are cached. A negative result would have to
//! be invalidated by a later `get_or_add` of the same key; never
//! caching it keeps every cache entry permanently valid against an
//! append-only backend.

use ethereum_types::H256;
use lru_cache::LruCache;
use parking_lot::Mutex;

use crate::{
    error::{Error, Result},
    snapshot::IndexSnapshot,
    traits::{Key, KeyIndex, Ordinal},
};

/// Caching decorator. Writes and maintenance delegate to the wrapped
/// index.
pub struct CachedIndex<K: Key, I> {
    inner: I,
    cache: Mutex<LruCache<K, Ordinal>>,
}

impl<K: Key, I: KeyIndex<K>> CachedIndex<K, I> {
    /// Wrap `inner` with a cache of up to `capacity` key→ordinal
    /// entries.
    pub fn new(inner: I, capacity: usize) -> Self {
        CachedIndex {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The wrapped index.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    fn cached(&self, key: &K) -> Option<Ordinal> {
        self.cache.lock().get_mut(key).copied()
    }
}

impl<K: Key, I: KeyIndex<K>> KeyIndex<K> for CachedIndex<K, I> {
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)> {
        if let Some(ordinal) = self.cached(key) {
            return Ok((ordinal, false));
        }
        let (ordinal, added) = self.inner.get_or_add(key)?;
        self.cache.lock().insert(key.clone(), ordinal);
        Ok((ordinal, added))
    }

    fn get(&self, key: &K) -> Result<Ordinal> {
        if let Some(ordinal) = self.cached(key) {
            return Ok(ordinal);
        }
        let ordinal = self.inner.get(key)?;
        self.cache.lock().insert(key.clone(), ordinal);
        Ok(ordinal)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        if self.cached(key).is_some() {
            return Ok(true);
        }
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn len(&self) -> Result<Ordinal> {
        self.inner.len()
    }

    fn state_hash(&mut self) -> Result<H256> {
        self.inner.state_hash()
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        // Drop cached entries so a closed index cannot keep answering
        // from the cache.
        self.cache.lock().clear();
        self.inner.close()
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        self.inner.create_snapshot()
    }
}
