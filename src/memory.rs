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

//! Process-memory `KeyIndex` implementation.

use std::collections::HashMap;

use ethereum_types::H256;

use crate::{
    error::{Error, Result},
    hash_chain::HashChain,
    snapshot::IndexSnapshot,
    traits::{Key, KeyIndex, Ordinal},
};

/// Volatile index over a hash map. `flush` commits the hash chain but
/// nothing outlives the process; mainly a reference implementation for
/// the persistent backends to be measured against.
pub struct MemoryIndex<K> {
    map: HashMap<K, Ordinal>,
    keys: Vec<K>,
    chain: HashChain<K>,
    closed: bool,
}

impl<K: Key> MemoryIndex<K> {
    /// New empty index.
    pub fn new() -> Self {
        MemoryIndex {
            map: HashMap::new(),
            keys: Vec::new(),
            chain: HashChain::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl<K: Key> Default for MemoryIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> KeyIndex<K> for MemoryIndex<K> {
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)> {
        self.ensure_open()?;
        if let Some(&ordinal) = self.map.get(key) {
            return Ok((ordinal, false));
        }
        let ordinal = self.keys.len() as Ordinal;
        self.map.insert(key.clone(), ordinal);
        self.keys.push(key.clone());
        self.chain.add(key);
        Ok((ordinal, true))
    }

    fn get(&self, key: &K) -> Result<Ordinal> {
        self.ensure_open()?;
        self.map.get(key).copied().ok_or(Error::NotFound)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.map.contains_key(key))
    }

    fn len(&self) -> Result<Ordinal> {
        self.ensure_open()?;
        Ok(self.keys.len() as Ordinal)
    }

    fn state_hash(&mut self) -> Result<H256> {
        self.ensure_open()?;
        Ok(self.chain.commit())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.chain.commit();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        self.ensure_open()?;
        self.chain.commit();
        Ok(IndexSnapshot::from_keys(self.keys.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H160;

    fn key(first_byte: u8) -> H160 {
        let mut bytes = [0u8; 20];
        bytes[0] = first_byte;
        H160(bytes)
    }

    #[test]
    fn assigns_dense_ordinals() {
        let mut index = MemoryIndex::new();
        assert_eq!(index.get_or_add(&key(0x01)).unwrap(), (0, true));
        assert_eq!(index.get_or_add(&key(0x02)).unwrap(), (1, true));
        assert_eq!(index.get_or_add(&key(0x03)).unwrap(), (2, true));
        assert_eq!(index.len().unwrap(), 3);
    }

    #[test]
    fn duplicates_are_no_ops() {
        let mut index = MemoryIndex::new();
        index.get_or_add(&key(0x01)).unwrap();
        let hash = index.state_hash().unwrap();

        assert_eq!(index.get_or_add(&key(0x01)).unwrap(), (0, false));
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.state_hash().unwrap(), hash);
    }

    #[test]
    fn lookup_coherence() {
        let mut index = MemoryIndex::new();
        index.get_or_add(&key(0x01)).unwrap();

        assert!(index.contains(&key(0x01)).unwrap());
        assert_eq!(index.get(&key(0x01)).unwrap(), 0);

        assert!(!index.contains(&key(0x02)).unwrap());
        assert!(matches!(index.get(&key(0x02)), Err(Error::NotFound)));
    }

    #[test]
    fn state_hash_matches_reference() {
        let mut index = MemoryIndex::new();
        assert_eq!(index.state_hash().unwrap(), H256::zero());

        index.get_or_add(&key(0x01)).unwrap();
        assert_eq!(
            format!("{:x}", index.state_hash().unwrap()),
            "ff9226e320b1deb7fabecff9ac800cd8eb1e3fb7709c003e2effcce37eec68ed"
        );

        index.get_or_add(&key(0x02)).unwrap();
        assert_eq!(
            format!("{:x}", index.state_hash().unwrap()),
            "c28553369c52e217564d3f5a783e2643186064498d1b3071568408d49eae6cbe"
        );
    }

    #[test]
    fn closed_index_rejects_everything() {
        let mut index = MemoryIndex::new();
        index.get_or_add(&key(0x01)).unwrap();
        index.close().unwrap();

        assert!(matches!(index.get_or_add(&key(0x02)), Err(Error::Closed)));
        assert!(matches!(index.get(&key(0x01)), Err(Error::Closed)));
        assert!(matches!(index.len(), Err(Error::Closed)));
        assert!(matches!(index.close(), Err(Error::Closed)));
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut index = MemoryIndex::new();
        index.get_or_add(&key(0x01)).unwrap();
        index.get_or_add(&key(0x02)).unwrap();

        let snapshot = index.create_snapshot().unwrap();
        let frozen_root = snapshot.root_hash();

        index.get_or_add(&key(0x03)).unwrap();
        assert_eq!(snapshot.num_keys(), 2);
        assert_eq!(snapshot.root_hash(), frozen_root);
        assert_ne!(index.state_hash().unwrap(), frozen_root);
    }
}
