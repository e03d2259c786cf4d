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

//! Disk-backed `KeyIndex` over a paged bucket file.
//!
//! Three files per index directory:
//!
//! - `buckets.bin` — fixed-size pages; every bucket is a chain of
//!   pages linked through a next-page pointer in the page trailer.
//! - `keys.log` — the key sequence in insertion order, appended on
//!   every flush. Bucket order is not insertion order, so snapshots
//!   read the sequence from here.
//! - `index.meta` — table geometry, record counts, the committed
//!   chain hash and the bucket head-page table, committed by writing
//!   a temp file and renaming it over the old one.
//!
//! Pages are served through a bounded LRU pool; evicting a dirty page
//! writes it back. Recovery hinges on every mid-session disk write
//! being harmless to the last committed metadata: page chains are
//! rewritten copy-on-write into pages the committed metadata does not
//! reference, and pages retired by a rewrite keep their on-disk
//! content until the commit that stops referencing them has landed.
//! A reopen after a crash therefore replays the previous metadata,
//! truncates the key log to the committed size and drops the bucket
//! entries that the log cannot vouch for.

use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::H256;
use log::{debug, trace};
use lru_cache::LruCache;
use parking_lot::Mutex;

use crate::{
    error::{Error, Result},
    hash_chain::HashChain,
    linear_map::address,
    snapshot::IndexSnapshot,
    traits::{Key, KeyIndex, Ordinal, ORDINAL_SIZE},
};

const PAGES_FILE: &str = "buckets.bin";
const KEYS_FILE: &str = "keys.log";
const META_FILE: &str = "index.meta";
const META_TMP_FILE: &str = "index.meta.tmp";

/// On-disk page size in bytes.
pub const PAGE_SIZE: usize = 4096;

// entry_count: u16 ‖ next_page: u64 at the end of every page.
const PAGE_TRAILER_SIZE: usize = 10;

// n_init: u32 ‖ bits: u8 ‖ split_next: u32 ‖ records: u64 ‖ size: u32
// ‖ hash: [u8; 32] ‖ next_free_page: u64 ‖ num_buckets: u32
const META_FIXED_SIZE: usize = 65;

fn page_capacity<K: Key>() -> usize {
    (PAGE_SIZE - PAGE_TRAILER_SIZE) / (K::SIZE + ORDINAL_SIZE)
}

/// Paged backend parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedIndexConfig {
    /// Bucket count of a fresh index; must be a power of two.
    pub initial_buckets: usize,
    /// Number of decoded pages the pool keeps in memory.
    pub pool_size: usize,
}

impl Default for PagedIndexConfig {
    fn default() -> Self {
        PagedIndexConfig {
            initial_buckets: 16,
            pool_size: 256,
        }
    }
}

/// A decoded page: sorted entries plus the id of the next page in the
/// bucket chain (`0` = none).
struct Page<K> {
    entries: Vec<(K, Ordinal)>,
    next: u64,
    dirty: bool,
}

impl<K: Key> Page<K> {
    fn fresh() -> Self {
        Page {
            entries: Vec::new(),
            next: 0,
            dirty: true,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut offset = 0;
        for (key, ordinal) in &self.entries {
            buf[offset..offset + K::SIZE].copy_from_slice(key.as_bytes());
            LittleEndian::write_u32(
                &mut buf[offset + K::SIZE..offset + K::SIZE + ORDINAL_SIZE],
                *ordinal,
            );
            offset += K::SIZE + ORDINAL_SIZE;
        }
        LittleEndian::write_u16(&mut buf[PAGE_SIZE - 10..], self.entries.len() as u16);
        LittleEndian::write_u64(&mut buf[PAGE_SIZE - 8..], self.next);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let count = LittleEndian::read_u16(&buf[PAGE_SIZE - 10..]) as usize;
        if count > page_capacity::<K>() {
            return Err(Error::Corruption(format!(
                "page declares {count} entries, capacity is {}",
                page_capacity::<K>()
            )));
        }
        let next = LittleEndian::read_u64(&buf[PAGE_SIZE - 8..]);
        let mut entries = Vec::with_capacity(count);
        let mut offset = 0;
        for _ in 0..count {
            let key = K::from_slice(&buf[offset..offset + K::SIZE]);
            let ordinal =
                LittleEndian::read_u32(&buf[offset + K::SIZE..offset + K::SIZE + ORDINAL_SIZE]);
            entries.push((key, ordinal));
            offset += K::SIZE + ORDINAL_SIZE;
        }
        Ok(Page {
            entries,
            next,
            dirty: false,
        })
    }
}

fn write_page<K: Key>(file: &mut File, id: u64, page: &Page<K>) -> Result<()> {
    file.seek(SeekFrom::Start((id - 1) * PAGE_SIZE as u64))?;
    file.write_all(&page.encode())?;
    Ok(())
}

/// Page file behind a bounded LRU pool. Pages are 1-based; `0` is the
/// nil pointer.
///
/// Free-page accounting keeps three pots. `limbo` holds pages no
/// committed metadata references; they are handed out by `alloc` and
/// may be overwritten at will. `retired` holds pages dropped by a
/// chain rewrite this session; the committed metadata still references
/// them, so they stay untouched on disk until the next metadata commit
/// moves them into limbo. The on-disk chain from the metadata's
/// `next_free_page` is only ever written at close and absorbed into
/// limbo on open.
struct PageStore<K> {
    file: File,
    pool: LruCache<u64, Page<K>>,
    capacity: usize,
    num_pages: u64,
    limbo: Vec<u64>,
    retired: Vec<u64>,
    declared_head: u64,
}

impl<K: Key> PageStore<K> {
    fn page_mut(&mut self, id: u64) -> Result<&mut Page<K>> {
        if !self.pool.contains_key(&id) {
            let page = self.read_page(id)?;
            self.room_for_one()?;
            self.pool.insert(id, page);
        }
        Ok(self
            .pool
            .get_mut(&id)
            .expect("the page was just inserted into the pool; qed"))
    }

    fn read_page(&mut self, id: u64) -> Result<Page<K>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start((id - 1) * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        Page::decode(&buf)
    }

    fn room_for_one(&mut self) -> Result<()> {
        while self.pool.len() >= self.capacity {
            let (id, page) = self
                .pool
                .remove_lru()
                .expect("pool is at capacity and therefore non-empty; qed");
            if page.dirty {
                write_page(&mut self.file, id, &page)?;
            }
        }
        Ok(())
    }

    fn alloc(&mut self) -> Result<u64> {
        let id = match self.limbo.pop() {
            Some(id) => id,
            None => {
                self.num_pages += 1;
                self.num_pages
            }
        };
        self.room_for_one()?;
        self.pool.insert(id, Page::fresh());
        Ok(id)
    }

    /// Take a page out of service without touching its disk content;
    /// the committed metadata may still reference it.
    fn retire(&mut self, id: u64) {
        self.pool.remove(&id);
        self.retired.push(id);
    }

    /// Lay `entries` out as a freshly allocated page chain. Returns
    /// the head page id, `0` for an empty chain.
    fn write_chain(&mut self, entries: &[(K, Ordinal)]) -> Result<u64> {
        let capacity = page_capacity::<K>();
        let mut head = 0u64;
        let mut previous = 0u64;
        for chunk in entries.chunks(capacity) {
            let id = self.alloc()?;
            let page = self.page_mut(id)?;
            page.entries.extend_from_slice(chunk);
            if previous == 0 {
                head = id;
            } else {
                let previous_page = self.page_mut(previous)?;
                previous_page.next = id;
                previous_page.dirty = true;
            }
            previous = id;
        }
        Ok(head)
    }

    fn flush_pages(&mut self) -> Result<()> {
        let PageStore {
            ref mut file,
            ref mut pool,
            ..
        } = *self;
        for (&id, page) in pool.iter_mut() {
            if page.dirty {
                write_page(file, id, page)?;
                page.dirty = false;
            }
        }
        file.sync_data()?;
        Ok(())
    }

    /// After a metadata commit nothing references retired pages any
    /// more, so they become allocatable.
    fn release_retired(&mut self) {
        let retired = ::std::mem::take(&mut self.retired);
        self.limbo.extend(retired);
    }

    /// Write the limbo pages out as the on-disk free chain. Only done
    /// at close: a declared page must stay untouched so that reopening
    /// can walk the chain.
    fn declare_free(&mut self) -> Result<()> {
        if self.limbo.is_empty() {
            return Ok(());
        }
        let limbo = ::std::mem::take(&mut self.limbo);
        for id in limbo {
            let page = Page::<K> {
                entries: Vec::new(),
                next: self.declared_head,
                dirty: false,
            };
            write_page(&mut self.file, id, &page)?;
            self.pool.remove(&id);
            self.declared_head = id;
        }
        self.file.sync_data()?;
        Ok(())
    }
}

struct Meta {
    n_init: u32,
    bits: u8,
    split_next: u32,
    records: u64,
    size: Ordinal,
    hash: H256,
    next_free_page: u64,
    heads: Vec<u64>,
}

impl Meta {
    fn fresh(initial_buckets: usize) -> Self {
        Meta {
            n_init: initial_buckets as u32,
            bits: initial_buckets.trailing_zeros() as u8,
            split_next: 0,
            records: 0,
            size: 0,
            hash: H256::zero(),
            next_free_page: 0,
            heads: vec![0; initial_buckets],
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; META_FIXED_SIZE + 8 * self.heads.len()];
        LittleEndian::write_u32(&mut buf[0..4], self.n_init);
        buf[4] = self.bits;
        LittleEndian::write_u32(&mut buf[5..9], self.split_next);
        LittleEndian::write_u64(&mut buf[9..17], self.records);
        LittleEndian::write_u32(&mut buf[17..21], self.size);
        buf[21..53].copy_from_slice(self.hash.as_bytes());
        LittleEndian::write_u64(&mut buf[53..61], self.next_free_page);
        LittleEndian::write_u32(&mut buf[61..65], self.heads.len() as u32);
        for (i, head) in self.heads.iter().enumerate() {
            LittleEndian::write_u64(&mut buf[65 + 8 * i..73 + 8 * i], *head);
        }
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < META_FIXED_SIZE {
            return Err(Error::Corruption(format!(
                "metadata is {} bytes, expected at least {META_FIXED_SIZE}",
                buf.len()
            )));
        }
        let num_buckets = LittleEndian::read_u32(&buf[61..65]) as usize;
        if buf.len() != META_FIXED_SIZE + 8 * num_buckets {
            return Err(Error::Corruption(format!(
                "metadata is {} bytes, expected {} for {num_buckets} buckets",
                buf.len(),
                META_FIXED_SIZE + 8 * num_buckets
            )));
        }
        let meta = Meta {
            n_init: LittleEndian::read_u32(&buf[0..4]),
            bits: buf[4],
            split_next: LittleEndian::read_u32(&buf[5..9]),
            records: LittleEndian::read_u64(&buf[9..17]),
            size: LittleEndian::read_u32(&buf[17..21]),
            hash: H256::from_slice(&buf[21..53]),
            next_free_page: LittleEndian::read_u64(&buf[53..61]),
            heads: (0..num_buckets)
                .map(|i| LittleEndian::read_u64(&buf[65 + 8 * i..73 + 8 * i]))
                .collect(),
        };
        if !meta.n_init.is_power_of_two() {
            return Err(Error::Corruption(format!(
                "initial bucket count {} is not a power of two",
                meta.n_init
            )));
        }
        if meta.heads.len() != (1usize << meta.bits) + meta.split_next as usize {
            return Err(Error::Corruption(format!(
                "{} buckets do not match {} bits and split point {}",
                meta.heads.len(),
                meta.bits,
                meta.split_next
            )));
        }
        Ok(meta)
    }
}

/// Disk-backed index. Single writer; readers go through the page pool
/// behind a lock.
pub struct PagedIndex<K> {
    path: PathBuf,
    store: Mutex<PageStore<K>>,
    keys_file: File,
    n_init: u32,
    bits: u32,
    split_next: usize,
    records: u64,
    heads: Vec<u64>,
    chain: HashChain<K>,
    log_buf: Vec<K>,
    size: Ordinal,
    closed: bool,
}

impl<K: Key> PagedIndex<K> {
    /// Open or create the index stored in `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: PagedIndexConfig) -> Result<Self> {
        assert!(config.pool_size > 0, "page pool must hold at least one page");
        assert!(
            config.initial_buckets.is_power_of_two(),
            "initial bucket count must be a power of two"
        );
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let meta_path = path.join(META_FILE);
        let meta = if meta_path.exists() {
            Meta::decode(&fs::read(&meta_path)?)?
        } else {
            Meta::fresh(config.initial_buckets)
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.join(PAGES_FILE))?;
        let num_pages = file.metadata()?.len().div_ceil(PAGE_SIZE as u64);

        let keys_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.join(KEYS_FILE))?;
        let expected_log = meta.size as u64 * K::SIZE as u64;
        let log_len = keys_file.metadata()?.len();
        if log_len < expected_log {
            return Err(Error::Corruption(format!(
                "key log holds {log_len} bytes, metadata requires {expected_log}"
            )));
        }
        if log_len > expected_log {
            // Keys appended after the last durable metadata write.
            trace!(target: "index", "truncating key log from {log_len} to {expected_log} bytes");
            keys_file.set_len(expected_log)?;
        }

        let mut index = PagedIndex {
            path,
            store: Mutex::new(PageStore {
                file,
                pool: LruCache::new(config.pool_size),
                capacity: config.pool_size,
                num_pages,
                limbo: Vec::new(),
                retired: Vec::new(),
                declared_head: 0,
            }),
            keys_file,
            n_init: meta.n_init,
            bits: meta.bits as u32,
            split_next: meta.split_next as usize,
            records: meta.records,
            heads: meta.heads,
            chain: HashChain::with_hash(meta.hash),
            log_buf: Vec::new(),
            size: meta.size,
            closed: false,
        };

        let absorbed = index.absorb_free_chain(meta.next_free_page)?;
        let repaired = index.repair()?;
        if absorbed || repaired {
            // Commit the absorbed free list and the repairs so that
            // reusing those pages stays safe against a later crash.
            index.flush_inner()?;
        }
        Ok(index)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Pull the on-disk free chain into limbo; the next metadata
    /// commit drops the chain from `next_free_page`.
    fn absorb_free_chain(&mut self, head: u64) -> Result<bool> {
        let store = self.store.get_mut();
        let mut cursor = head;
        let mut steps = 0u64;
        while cursor != 0 {
            steps += 1;
            if steps > store.num_pages {
                return Err(Error::Corruption(
                    "free page chain does not terminate".into(),
                ));
            }
            let next = store.read_page(cursor)?.next;
            store.limbo.push(cursor);
            cursor = next;
        }
        Ok(steps > 0)
    }

    /// Drop bucket entries the committed state cannot vouch for:
    /// everything with an ordinal at or beyond the persisted size, a
    /// key the log does not confirm, or a key addressed to a different
    /// bucket. Such entries are left-overs of page writes after the
    /// last metadata commit.
    fn repair(&mut self) -> Result<bool> {
        let log = self.read_log()?;
        let bits = self.bits;
        let split_next = self.split_next;
        let store = self.store.get_mut();

        let mut changed = false;
        for (bucket, &head) in self.heads.iter().enumerate() {
            let mut id = head;
            let mut steps = 0u64;
            while id != 0 {
                steps += 1;
                if steps > store.num_pages {
                    return Err(Error::Corruption(format!(
                        "bucket {bucket} page chain does not terminate"
                    )));
                }
                let num_pages = store.num_pages;
                let page = store.page_mut(id)?;
                let before = page.entries.len();
                page.entries.retain(|&(ref key, ordinal)| {
                    log.get(ordinal as usize) == Some(key)
                        && address(key.bucket_hash(), bits, split_next) == bucket
                });
                if page.entries.len() != before {
                    page.dirty = true;
                    changed = true;
                }
                // A dangling pointer past the end of the file marks a
                // chain extension that never made it to disk.
                if page.next > num_pages {
                    page.next = 0;
                    page.dirty = true;
                    changed = true;
                }
                id = page.next;
            }
        }
        if changed {
            debug!(target: "index", "dropped uncommitted bucket entries during reopen");
        }
        Ok(changed)
    }

    fn read_log(&mut self) -> Result<Vec<K>> {
        let mut buf = vec![0u8; self.size as usize * K::SIZE];
        self.keys_file.seek(SeekFrom::Start(0))?;
        self.keys_file.read_exact(&mut buf)?;
        Ok(buf.chunks(K::SIZE).map(K::from_slice).collect())
    }

    fn split(&mut self) -> Result<()> {
        let source = self.split_next;
        let new_index = self.heads.len();
        let next_bits = self.bits + 1;
        let store = self.store.get_mut();

        let mut entries = Vec::new();
        let mut sources = Vec::new();
        let mut id = self.heads[source];
        while id != 0 {
            let page = store.page_mut(id)?;
            entries.extend_from_slice(&page.entries);
            sources.push(id);
            id = page.next;
        }

        let mut kept = Vec::with_capacity(entries.len());
        let mut moved = Vec::new();
        for entry in entries {
            let bucket = address(entry.0.bucket_hash(), next_bits, 0);
            debug_assert!(bucket == source || bucket == new_index);
            if bucket == source {
                kept.push(entry);
            } else {
                moved.push(entry);
            }
        }
        kept.sort_by(|a, b| a.0.cmp(&b.0));
        moved.sort_by(|a, b| a.0.cmp(&b.0));

        // Rewrite both buckets copy-on-write; the old pages keep their
        // content until the rewrite is committed.
        let kept_head = store.write_chain(&kept)?;
        let moved_head = store.write_chain(&moved)?;
        for id in sources {
            store.retire(id);
        }
        self.heads[source] = kept_head;
        self.heads.push(moved_head);

        self.split_next += 1;
        if self.split_next == 1 << self.bits {
            self.bits += 1;
            self.split_next = 0;
        }
        trace!(
            target: "index",
            "split bucket {source} into {new_index}; {} buckets, {} bits",
            self.heads.len(), self.bits,
        );
        Ok(())
    }

    fn flush_inner(&mut self) -> Result<()> {
        self.store.get_mut().flush_pages()?;

        if !self.log_buf.is_empty() {
            let mut buf = Vec::with_capacity(self.log_buf.len() * K::SIZE);
            for key in &self.log_buf {
                buf.extend_from_slice(key.as_bytes());
            }
            self.keys_file.seek(SeekFrom::End(0))?;
            self.keys_file.write_all(&buf)?;
            self.keys_file.sync_data()?;
            self.log_buf.clear();
        }

        self.write_meta()?;
        self.store.get_mut().release_retired();
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let hash = self.chain.commit();
        let meta = Meta {
            n_init: self.n_init,
            bits: self.bits as u8,
            split_next: self.split_next as u32,
            records: self.records,
            size: self.size,
            hash,
            next_free_page: self.store.get_mut().declared_head,
            heads: self.heads.clone(),
        };
        let tmp_path = self.path.join(META_TMP_FILE);
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&meta.encode())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, self.path.join(META_FILE))?;
        Ok(())
    }
}

impl<K: Key> KeyIndex<K> for PagedIndex<K> {
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)> {
        self.ensure_open()?;
        let bucket = address(key.bucket_hash(), self.bits, self.split_next);
        let head = self.heads[bucket];
        let store = self.store.get_mut();

        let mut id = head;
        let mut tail = 0u64;
        let mut pages = 0usize;
        while id != 0 {
            let page = store.page_mut(id)?;
            if let Ok(position) = page.entries.binary_search_by(|probe| probe.0.cmp(key)) {
                return Ok((page.entries[position].1, false));
            }
            tail = id;
            pages += 1;
            id = page.next;
        }

        let ordinal = self.size;
        let target = if head == 0 {
            let id = store.alloc()?;
            self.heads[bucket] = id;
            pages = 1;
            id
        } else if store.page_mut(tail)?.entries.len() < page_capacity::<K>() {
            tail
        } else {
            let id = store.alloc()?;
            let tail_page = store.page_mut(tail)?;
            tail_page.next = id;
            tail_page.dirty = true;
            pages += 1;
            id
        };
        {
            let page = store.page_mut(target)?;
            let position = match page.entries.binary_search_by(|probe| probe.0.cmp(key)) {
                Ok(position) | Err(position) => position,
            };
            page.entries.insert(position, (key.clone(), ordinal));
            page.dirty = true;
        }

        self.records += 1;
        self.size += 1;
        self.chain.add(key);
        self.log_buf.push(key.clone());

        // An overflow page appeared: split one bucket, as the
        // in-memory table does on a chained block.
        if pages > 1 {
            self.split()?;
        }
        Ok((ordinal, true))
    }

    fn get(&self, key: &K) -> Result<Ordinal> {
        self.ensure_open()?;
        let bucket = address(key.bucket_hash(), self.bits, self.split_next);
        let mut store = self.store.lock();
        let mut id = self.heads[bucket];
        while id != 0 {
            let page = store.page_mut(id)?;
            if let Ok(position) = page.entries.binary_search_by(|probe| probe.0.cmp(key)) {
                return Ok(page.entries[position].1);
            }
            id = page.next;
        }
        Err(Error::NotFound)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn len(&self) -> Result<Ordinal> {
        self.ensure_open()?;
        Ok(self.size)
    }

    fn state_hash(&mut self) -> Result<H256> {
        self.ensure_open()?;
        Ok(self.chain.commit())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_inner()
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_inner()?;
        // With the data committed, the free list can be written out
        // and pointed at by a final metadata commit. The declared
        // chain is only safe to write because nothing allocates from
        // it until the next open.
        self.store.get_mut().declare_free()?;
        self.write_meta()?;
        self.closed = true;
        Ok(())
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        self.ensure_open()?;
        self.flush_inner()?;
        let keys = self.read_log()?;
        Ok(IndexSnapshot::from_keys(keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H160;
    use tempdir::TempDir;

    fn key(i: u64) -> H160 {
        H160::from_low_u64_be(i)
    }

    fn small_config() -> PagedIndexConfig {
        PagedIndexConfig {
            initial_buckets: 2,
            pool_size: 4,
        }
    }

    #[test]
    fn assigns_dense_ordinals() {
        let dir = TempDir::new("indexdb").unwrap();
        let mut index = PagedIndex::open(dir.path(), PagedIndexConfig::default()).unwrap();

        assert_eq!(index.get_or_add(&key(10)).unwrap(), (0, true));
        assert_eq!(index.get_or_add(&key(20)).unwrap(), (1, true));
        assert_eq!(index.get_or_add(&key(10)).unwrap(), (0, false));
        assert_eq!(index.len().unwrap(), 2);
        assert_eq!(index.get(&key(20)).unwrap(), 1);
        assert!(matches!(index.get(&key(30)), Err(Error::NotFound)));
    }

    #[test]
    fn state_hash_matches_reference() {
        let dir = TempDir::new("indexdb").unwrap();
        let mut index = PagedIndex::open(dir.path(), PagedIndexConfig::default()).unwrap();

        let mut bytes = [0u8; 20];
        bytes[0] = 0x01;
        index.get_or_add(&H160(bytes)).unwrap();
        assert_eq!(
            format!("{:x}", index.state_hash().unwrap()),
            "ff9226e320b1deb7fabecff9ac800cd8eb1e3fb7709c003e2effcce37eec68ed"
        );
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new("indexdb").unwrap();
        let hash = {
            let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
            for i in 0..500 {
                assert_eq!(index.get_or_add(&key(i)).unwrap(), (i as u32, true));
            }
            let hash = index.state_hash().unwrap();
            index.close().unwrap();
            hash
        };

        let mut index = PagedIndex::<H160>::open(dir.path(), small_config()).unwrap();
        assert_eq!(index.len().unwrap(), 500);
        assert_eq!(index.state_hash().unwrap(), hash);
        for i in 0..500 {
            assert_eq!(index.get(&key(i)).unwrap(), i as u32);
            assert_eq!(index.get_or_add(&key(i)).unwrap(), (i as u32, false));
        }
    }

    #[test]
    fn reopen_rolls_back_to_the_last_flush() {
        let dir = TempDir::new("indexdb").unwrap();
        let hash = {
            let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
            for i in 0..100 {
                index.get_or_add(&key(i)).unwrap();
            }
            index.flush().unwrap();
            let hash = index.state_hash().unwrap();

            // More insertions, never flushed. The small pool forces
            // dirty pages onto disk along the way.
            for i in 100..300 {
                index.get_or_add(&key(i)).unwrap();
            }
            hash
            // Dropped without flush or close.
        };

        let mut index = PagedIndex::<H160>::open(dir.path(), small_config()).unwrap();
        assert_eq!(index.len().unwrap(), 100);
        assert_eq!(index.state_hash().unwrap(), hash);
        for i in 0..100 {
            assert_eq!(index.get(&key(i)).unwrap(), i as u32);
        }
        // Keys from the lost session are invisible and reusable.
        assert!(matches!(index.get(&key(150)), Err(Error::NotFound)));
        assert_eq!(index.get_or_add(&key(150)).unwrap(), (100, true));
    }

    #[test]
    fn tiny_pool_still_serves_everything() {
        let dir = TempDir::new("indexdb").unwrap();
        let config = PagedIndexConfig {
            initial_buckets: 2,
            pool_size: 1,
        };
        let mut index = PagedIndex::open(dir.path(), config).unwrap();
        for i in 0..2000 {
            index.get_or_add(&key(i)).unwrap();
        }
        for i in 0..2000 {
            assert_eq!(index.get(&key(i)).unwrap(), i as u32);
        }
    }

    #[test]
    fn freed_pages_are_reused_after_reopen() {
        let dir = TempDir::new("indexdb").unwrap();
        {
            let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
            for i in 0..2000 {
                index.get_or_add(&key(i)).unwrap();
            }
            index.close().unwrap();
        }
        let pages_before = fs::metadata(dir.path().join(PAGES_FILE)).unwrap().len();

        let mut index = PagedIndex::<H160>::open(dir.path(), small_config()).unwrap();
        for i in 2000..2200 {
            index.get_or_add(&key(i)).unwrap();
        }
        for i in 0..2200 {
            assert_eq!(index.get(&key(i)).unwrap(), i as u32);
        }
        index.close().unwrap();
        let pages_after = fs::metadata(dir.path().join(PAGES_FILE)).unwrap().len();

        // Growth stays modest because splits recycle their pages.
        assert!(pages_after <= pages_before + 40 * PAGE_SIZE as u64);
    }

    #[test]
    fn truncated_metadata_is_corruption() {
        let dir = TempDir::new("indexdb").unwrap();
        {
            let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
            index.get_or_add(&key(1)).unwrap();
            index.close().unwrap();
        }
        let meta_path = dir.path().join(META_FILE);
        let meta = fs::read(&meta_path).unwrap();
        fs::write(&meta_path, &meta[..meta.len() - 1]).unwrap();

        assert!(matches!(
            PagedIndex::<H160>::open(dir.path(), small_config()),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn short_key_log_is_corruption() {
        let dir = TempDir::new("indexdb").unwrap();
        {
            let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
            for i in 0..10 {
                index.get_or_add(&key(i)).unwrap();
            }
            index.close().unwrap();
        }
        let log_path = dir.path().join(KEYS_FILE);
        let log = fs::read(&log_path).unwrap();
        fs::write(&log_path, &log[..log.len() - 20]).unwrap();

        assert!(matches!(
            PagedIndex::<H160>::open(dir.path(), small_config()),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn oversized_key_log_is_truncated() {
        let dir = TempDir::new("indexdb").unwrap();
        {
            let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
            for i in 0..10 {
                index.get_or_add(&key(i)).unwrap();
            }
            index.close().unwrap();
        }
        let log_path = dir.path().join(KEYS_FILE);
        let mut log = fs::read(&log_path).unwrap();
        log.extend_from_slice(key(999).as_bytes());
        fs::write(&log_path, &log).unwrap();

        let mut index = PagedIndex::<H160>::open(dir.path(), small_config()).unwrap();
        assert_eq!(index.len().unwrap(), 10);
        let snapshot = index.create_snapshot().unwrap();
        assert_eq!(snapshot.num_keys(), 10);
    }

    #[test]
    fn snapshot_reads_insertion_order() {
        let dir = TempDir::new("indexdb").unwrap();
        let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
        let keys: Vec<_> = [9u64, 2, 7, 4, 100, 1].iter().map(|&i| key(i)).collect();
        for k in &keys {
            index.get_or_add(k).unwrap();
        }

        let snapshot = index.create_snapshot().unwrap();
        assert_eq!(snapshot.part_keys(0).unwrap(), &keys[..]);
        assert_eq!(snapshot.root_hash(), index.state_hash().unwrap());

        // Later insertions leave the snapshot untouched.
        index.get_or_add(&key(12345)).unwrap();
        assert_eq!(snapshot.num_keys(), 6);
    }

    #[test]
    fn closed_index_rejects_operations() {
        let dir = TempDir::new("indexdb").unwrap();
        let mut index = PagedIndex::open(dir.path(), small_config()).unwrap();
        index.get_or_add(&key(1)).unwrap();
        index.close().unwrap();

        assert!(matches!(index.get_or_add(&key(2)), Err(Error::Closed)));
        assert!(matches!(index.get(&key(1)), Err(Error::Closed)));
        assert!(matches!(index.flush(), Err(Error::Closed)));
        assert!(matches!(index.close(), Err(Error::Closed)));
    }
}
