//! Byte-budgeted store of fully decoded clips.
//!
//! The cache only does the accounting: it never talks to the backend. Every
//! clip it gives up is returned to the caller, who decides whether to destroy
//! it now or once the voices still playing it are done.

use crate::backend::BufferHandle;
use crate::sound::AssetId;
use std::cmp::Reverse;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    clip: BufferHandle,
    bytes: usize,
    inserted: u64,
}

/// Result of [`SoundCache::put`].
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The clip is resident. `evicted` lists entries removed to make room.
    Cached { evicted: Vec<(AssetId, BufferHandle)> },
    /// The asset was already cached; the offered clip was not taken.
    AlreadyPresent,
    /// The clip alone exceeds the budget and was not taken.
    TooLarge,
}

#[derive(Debug)]
pub struct SoundCache {
    budget: usize,
    resident: usize,
    entries: HashMap<AssetId, CacheEntry>,
    next_insert: u64,
}

impl SoundCache {
    /// A `budget` of `0` never evicts.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            resident: 0,
            entries: HashMap::new(),
            next_insert: 0,
        }
    }

    pub fn get(&self, asset: AssetId) -> Option<BufferHandle> {
        self.entries.get(&asset).map(|entry| entry.clip)
    }

    pub fn contains(&self, asset: AssetId) -> bool {
        self.entries.contains_key(&asset)
    }

    pub fn put(&mut self, asset: AssetId, clip: BufferHandle, bytes: usize) -> PutOutcome {
        if self.entries.contains_key(&asset) {
            return PutOutcome::AlreadyPresent;
        }
        if self.budget > 0 && bytes > self.budget {
            return PutOutcome::TooLarge;
        }

        let mut evicted = Vec::new();
        while self.budget > 0 && self.resident + bytes > self.budget {
            match self.remove_largest() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }

        self.entries.insert(
            asset,
            CacheEntry {
                clip,
                bytes,
                inserted: self.next_insert,
            },
        );
        self.next_insert += 1;
        self.resident += bytes;
        PutOutcome::Cached { evicted }
    }

    /// Removes the largest entry. Among equally sized entries the oldest goes first.
    fn remove_largest(&mut self) -> Option<(AssetId, BufferHandle)> {
        let asset = self
            .entries
            .iter()
            .max_by_key(|(_, entry)| (entry.bytes, Reverse(entry.inserted)))
            .map(|(asset, _)| *asset)?;
        let entry = self.entries.remove(&asset)?;
        self.resident -= entry.bytes;
        log::debug!("Evicted {} ({} bytes) from sound cache", asset, entry.bytes);
        Some((asset, entry.clip))
    }

    pub fn evict_all(&mut self) -> Vec<(AssetId, BufferHandle)> {
        self.resident = 0;
        self.entries
            .drain()
            .map(|(asset, entry)| (asset, entry.clip))
            .collect()
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
