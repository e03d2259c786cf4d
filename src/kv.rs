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

//! `KeyIndex` over an external key-value store.
//!
//! Every record lives under a one-byte table-space prefix so that many
//! indexes share one store. Next to the key→ordinal mapping, the index
//! keeps two bookkeeping records per table space: the assigned size
//! under `prefix ‖ "last"` and the committed chain hash under
//! `prefix ‖ "hash"`.

use std::{collections::HashMap, sync::Arc};

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::H256;
use kvdb::KeyValueDB;
use log::trace;

use crate::{
    error::{Error, Result},
    hash_chain::HashChain,
    snapshot::IndexSnapshot,
    traits::{Key, KeyIndex, Ordinal, ORDINAL_SIZE},
};

const SIZE_RECORD: &[u8] = b"last";
const HASH_RECORD: &[u8] = b"hash";

/// When writes reach the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Every new key is written in its own batch at insert time;
    /// `flush` persists the committed hash.
    Immediate,
    /// Writes accumulate in a memory overlay and reach the store in a
    /// single batch on `close`; a mid-session `flush` does not touch
    /// the store.
    Batched,
}

fn data_key<K: Key>(table_space: u8, key: &K) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + K::SIZE);
    out.push(table_space);
    out.extend_from_slice(key.as_bytes());
    out
}

fn record_key(table_space: u8, record: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + record.len());
    out.push(table_space);
    out.extend_from_slice(record);
    out
}

fn encode_ordinal(ordinal: Ordinal) -> [u8; ORDINAL_SIZE] {
    let mut out = [0u8; ORDINAL_SIZE];
    LittleEndian::write_u32(&mut out, ordinal);
    out
}

fn decode_ordinal(value: &[u8]) -> Result<Ordinal> {
    if value.len() != ORDINAL_SIZE {
        return Err(Error::Corruption(format!(
            "ordinal record is {} bytes, expected {ORDINAL_SIZE}",
            value.len()
        )));
    }
    Ok(LittleEndian::read_u32(value))
}

/// Index persisted in a `KeyValueDB` column under a table-space
/// prefix.
pub struct KvIndex<K> {
    backing: Arc<dyn KeyValueDB>,
    column: u32,
    table_space: u8,
    policy: WritePolicy,
    overlay: HashMap<K, Ordinal>,
    chain: HashChain<K>,
    size: Ordinal,
    closed: bool,
}

impl<K: Key> KvIndex<K> {
    /// Open the index stored under `table_space` in the given column,
    /// reading back the persisted size and chain hash.
    pub fn open(
        backing: Arc<dyn KeyValueDB>,
        column: u32,
        table_space: u8,
        policy: WritePolicy,
    ) -> Result<Self> {
        let size = match backing.get(column, &record_key(table_space, SIZE_RECORD))? {
            Some(value) => decode_ordinal(&value)?,
            None => 0,
        };
        let hash = match backing.get(column, &record_key(table_space, HASH_RECORD))? {
            Some(value) => {
                if value.len() != 32 {
                    return Err(Error::Corruption(format!(
                        "hash record is {} bytes, expected 32",
                        value.len()
                    )));
                }
                H256::from_slice(&value)
            }
            None => H256::zero(),
        };
        trace!(target: "index", "opened kv index in table space {table_space}, size {size}");

        Ok(KvIndex {
            backing,
            column,
            table_space,
            policy,
            overlay: HashMap::new(),
            chain: HashChain::with_hash(hash),
            size,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Persist the hash the chain would commit to, then commit. A
    /// failed write leaves the in-memory chain untouched.
    fn persist_hash(&mut self) -> Result<H256> {
        if !self.chain.is_dirty() {
            return Ok(self.chain.hash());
        }
        let hash = self.chain.peek();
        if self.policy == WritePolicy::Immediate {
            let mut batch = self.backing.transaction();
            batch.put(
                self.column,
                &record_key(self.table_space, HASH_RECORD),
                hash.as_bytes(),
            );
            self.backing.write(batch)?;
        }
        Ok(self.chain.commit())
    }
}

impl<K: Key> KeyIndex<K> for KvIndex<K> {
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)> {
        self.ensure_open()?;
        if let Some(&ordinal) = self.overlay.get(key) {
            return Ok((ordinal, false));
        }
        let db_key = data_key(self.table_space, key);
        if let Some(value) = self.backing.get(self.column, &db_key)? {
            return Ok((decode_ordinal(&value)?, false));
        }

        let ordinal = self.size;
        match self.policy {
            WritePolicy::Immediate => {
                let mut batch = self.backing.transaction();
                batch.put(
                    self.column,
                    &record_key(self.table_space, SIZE_RECORD),
                    &encode_ordinal(ordinal + 1),
                );
                batch.put(self.column, &db_key, &encode_ordinal(ordinal));
                self.backing.write(batch)?;
            }
            WritePolicy::Batched => {
                self.overlay.insert(key.clone(), ordinal);
            }
        }
        self.chain.add(key);
        self.size += 1;
        Ok((ordinal, true))
    }

    fn get(&self, key: &K) -> Result<Ordinal> {
        self.ensure_open()?;
        if let Some(&ordinal) = self.overlay.get(key) {
            return Ok(ordinal);
        }
        match self.backing.get(self.column, &data_key(self.table_space, key))? {
            Some(value) => decode_ordinal(&value),
            None => Err(Error::NotFound),
        }
    }

    fn contains(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        if self.overlay.contains_key(key) {
            return Ok(true);
        }
        Ok(self
            .backing
            .has_key(self.column, &data_key(self.table_space, key))?)
    }

    fn len(&self) -> Result<Ordinal> {
        self.ensure_open()?;
        Ok(self.size)
    }

    fn state_hash(&mut self) -> Result<H256> {
        self.ensure_open()?;
        self.persist_hash()
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.persist_hash()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.policy {
            WritePolicy::Immediate => {
                self.persist_hash()?;
            }
            WritePolicy::Batched => {
                // The whole session commits as one batch.
                let hash = self.chain.peek();
                let mut batch = self.backing.transaction();
                for (key, ordinal) in &self.overlay {
                    batch.put(
                        self.column,
                        &data_key(self.table_space, key),
                        &encode_ordinal(*ordinal),
                    );
                }
                batch.put(
                    self.column,
                    &record_key(self.table_space, SIZE_RECORD),
                    &encode_ordinal(self.size),
                );
                batch.put(
                    self.column,
                    &record_key(self.table_space, HASH_RECORD),
                    hash.as_bytes(),
                );
                self.backing.write(batch)?;
                self.chain.commit();
                self.overlay.clear();
            }
        }
        self.closed = true;
        Ok(())
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        self.ensure_open()?;
        self.persist_hash()?;

        // Bucket order is not insertion order, so the sequence is
        // rebuilt by ordinal from the stored mapping plus the overlay.
        let mut keys: Vec<Option<K>> = vec![None; self.size as usize];
        let prefix = [self.table_space];
        for item in self.backing.iter_with_prefix(self.column, &prefix) {
            let (db_key, value) = item?;
            if db_key.len() != 1 + K::SIZE {
                // Bookkeeping records share the prefix.
                continue;
            }
            let ordinal = decode_ordinal(&value)?;
            let slot = keys.get_mut(ordinal as usize).ok_or_else(|| {
                Error::Corruption(format!("stored ordinal {ordinal} beyond size"))
            })?;
            *slot = Some(K::from_slice(&db_key[1..]));
        }
        for (key, ordinal) in &self.overlay {
            keys[*ordinal as usize] = Some(key.clone());
        }

        let keys = keys
            .into_iter()
            .enumerate()
            .map(|(ordinal, key)| {
                key.ok_or_else(|| Error::Corruption(format!("no key stored for ordinal {ordinal}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(IndexSnapshot::from_keys(keys))
    }
}
