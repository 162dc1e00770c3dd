//! HPACK header table
//!
//! Combines the shared static table with this connection's dynamic table
//! (RFC 7541 Section 2.3). Dynamic entries live in a ring buffer with the
//! oldest entry at the front. Every entry carries its insertion number, so
//! the address of an entry is derived from the running insertion count and
//! stays O(1) to compute as entries come and go.

use super::static_table::{static_table, StaticTable, STATIC_TABLE_LEN};
use super::ENTRY_OVERHEAD;
use crate::h2::error::{Error, Result};
use crate::h2::DEFAULT_HEADER_TABLE_SIZE;
use bytes::Bytes;
use std::collections::vec_deque;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// A header table entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpackEntry {
    name: Bytes,
    value: Bytes,
    insertion_index: u64,
}

impl HpackEntry {
    pub(crate) fn new(name: Bytes, value: Bytes, insertion_index: u64) -> Self {
        HpackEntry {
            name,
            value,
            insertion_index,
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Cheap clone of the name buffer
    pub fn name_bytes(&self) -> Bytes {
        self.name.clone()
    }

    /// Cheap clone of the value buffer
    pub fn value_bytes(&self) -> Bytes {
        self.value.clone()
    }

    /// Insertion number within the owning table (static index for static entries)
    pub fn insertion_index(&self) -> u64 {
        self.insertion_index
    }

    /// Size as defined by RFC 7541 Section 4.1
    pub fn size(&self) -> usize {
        Self::size_of(&self.name, &self.value)
    }

    pub fn size_of(name: &[u8], value: &[u8]) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }
}

/// Static + dynamic HPACK index space for one direction of a connection
#[derive(Debug)]
pub struct HpackHeaderTable {
    static_table: &'static StaticTable,
    // Oldest entry at the front, newest at the back.
    dynamic_entries: VecDeque<HpackEntry>,
    // Name -> insertion number of the most recent dynamic entry with that name.
    dynamic_name_index: HashMap<Bytes, u64>,
    // Name -> value -> insertion number of the most recent exact match.
    dynamic_name_value_index: HashMap<Bytes, HashMap<Bytes, u64>>,
    // Last acknowledged SETTINGS_HEADER_TABLE_SIZE.
    settings_size_bound: usize,
    // Currently enforced maximum, never above `settings_size_bound`.
    max_size: usize,
    size: usize,
    total_insertions: u64,
}

impl HpackHeaderTable {
    /// Create a table with the protocol default size (4096)
    pub fn new() -> Self {
        Self::with_size(DEFAULT_HEADER_TABLE_SIZE as usize)
    }

    /// Create a table whose settings bound and maximum both equal `size`
    pub fn with_size(size: usize) -> Self {
        HpackHeaderTable {
            static_table: static_table(),
            dynamic_entries: VecDeque::new(),
            dynamic_name_index: HashMap::new(),
            dynamic_name_value_index: HashMap::new(),
            settings_size_bound: size,
            max_size: size,
            size: 0,
            total_insertions: 0,
        }
    }

    pub fn settings_size_bound(&self) -> usize {
        self.settings_size_bound
    }

    /// Sum of the sizes of all dynamic entries
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of dynamic entries
    pub fn len(&self) -> usize {
        self.dynamic_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dynamic_entries.is_empty()
    }

    pub fn total_insertions(&self) -> u64 {
        self.total_insertions
    }

    /// Look up a 1-based RFC 7541 address.
    ///
    /// `None` covers index 0 and anything past the newest-to-oldest range of
    /// the dynamic table; callers report that as a compression error.
    pub fn get_by_index(&self, index: usize) -> Option<&HpackEntry> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE_LEN {
            return self.static_table.get(index);
        }
        let recency = index - STATIC_TABLE_LEN;
        let len = self.dynamic_entries.len();
        if recency > len {
            return None;
        }
        self.dynamic_entries.get(len - recency)
    }

    /// Lowest index whose name matches, static entries first
    pub fn get_by_name(&self, name: &[u8]) -> Option<usize> {
        if let Some(index) = self.static_table.index_of_name(name) {
            return Some(index);
        }
        self.dynamic_name_index
            .get(name)
            .map(|&insertion| self.dynamic_index_of(insertion))
    }

    /// Lowest index of an exact match, static entries first
    pub fn get_by_name_and_value(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        if let Some(index) = self.static_table.index_of(name, value) {
            return Some(index);
        }
        self.dynamic_name_value_index
            .get(name)
            .and_then(|values| values.get(value))
            .map(|&insertion| self.dynamic_index_of(insertion))
    }

    /// Set the enforced maximum size, evicting oldest entries until the table fits.
    ///
    /// Fails if `max_size` is above the acknowledged settings bound; the
    /// table is left unchanged in that case.
    pub fn set_max_size(&mut self, max_size: usize) -> Result<()> {
        if max_size > self.settings_size_bound {
            return Err(Error::Compression(format!(
                "table size {} exceeds settings bound {}",
                max_size, self.settings_size_bound
            )));
        }
        self.max_size = max_size;
        self.evict_to_fit();
        Ok(())
    }

    /// Record a newly acknowledged SETTINGS_HEADER_TABLE_SIZE
    pub fn set_settings_header_table_size(&mut self, settings_size: usize) {
        self.settings_size_bound = settings_size;
        if self.max_size > settings_size {
            self.max_size = settings_size;
            self.evict_to_fit();
        }
    }

    /// Entries that inserting `(name, value)` would evict, oldest first.
    /// Does not modify the table.
    pub fn eviction_set(&self, name: &[u8], value: &[u8]) -> vec_deque::Iter<'_, HpackEntry> {
        let count = self.eviction_count_for_entry(name, value);
        self.dynamic_entries.range(..count)
    }

    /// Evict as needed, then insert `(name, value)` as the newest entry.
    ///
    /// Returns `None` when the entry is larger than `max_size`; the table is
    /// empty afterwards and the entry is not addressable.
    pub fn try_add_entry(&mut self, name: Bytes, value: Bytes) -> Option<&HpackEntry> {
        let count = self.eviction_count_for_entry(&name, &value);
        self.evict(count);

        let entry_size = HpackEntry::size_of(&name, &value);
        if entry_size > self.max_size {
            trace!(entry_size, max_size = self.max_size, "entry larger than table, not inserted");
            return None;
        }

        let insertion = self.total_insertions;
        self.total_insertions += 1;
        self.size += entry_size;
        self.dynamic_name_index.insert(name.clone(), insertion);
        self.dynamic_name_value_index
            .entry(name.clone())
            .or_default()
            .insert(value.clone(), insertion);
        self.dynamic_entries.push_back(HpackEntry::new(name, value, insertion));
        self.dynamic_entries.back()
    }

    /// Log every dynamic entry at trace level
    pub fn debug_log_table_state(&self) {
        trace!(
            size = self.size,
            max_size = self.max_size,
            settings_size_bound = self.settings_size_bound,
            entries = self.dynamic_entries.len(),
            "hpack table state"
        );
        for (recency, entry) in self.dynamic_entries.iter().rev().enumerate() {
            trace!(
                index = STATIC_TABLE_LEN + recency + 1,
                name = %String::from_utf8_lossy(entry.name()),
                value = %String::from_utf8_lossy(entry.value()),
                "hpack entry"
            );
        }
    }

    /// Approximate heap usage of the dynamic side
    pub fn estimate_memory_usage(&self) -> usize {
        let entries = self.dynamic_entries.capacity() * std::mem::size_of::<HpackEntry>();
        let payload: usize = self
            .dynamic_entries
            .iter()
            .map(|e| e.name.len() + e.value.len())
            .sum();
        let indices = (self.dynamic_name_index.capacity() + self.dynamic_name_value_index.capacity())
            * (std::mem::size_of::<Bytes>() + std::mem::size_of::<u64>());
        entries + payload + indices
    }

    fn dynamic_index_of(&self, insertion: u64) -> usize {
        STATIC_TABLE_LEN + (self.total_insertions - insertion) as usize
    }

    fn evict_to_fit(&mut self) {
        if self.size > self.max_size {
            let count = self.eviction_count_to_reclaim(self.size - self.max_size);
            self.evict(count);
        }
    }

    fn eviction_count_for_entry(&self, name: &[u8], value: &[u8]) -> usize {
        let available = self.max_size.saturating_sub(self.size);
        let entry_size = HpackEntry::size_of(name, value);
        if entry_size <= available {
            0
        } else {
            self.eviction_count_to_reclaim(entry_size - available)
        }
    }

    fn eviction_count_to_reclaim(&self, reclaim_size: usize) -> usize {
        let mut reclaimed = 0;
        let mut count = 0;
        for entry in &self.dynamic_entries {
            if reclaimed >= reclaim_size {
                break;
            }
            reclaimed += entry.size();
            count += 1;
        }
        count
    }

    fn evict(&mut self, count: usize) {
        for _ in 0..count {
            let Some(entry) = self.dynamic_entries.pop_front() else {
                break;
            };
            self.size -= entry.size();

            if self.dynamic_name_index.get(&entry.name) == Some(&entry.insertion_index) {
                self.dynamic_name_index.remove(&entry.name);
            }
            if let Some(values) = self.dynamic_name_value_index.get_mut(&entry.name) {
                if values.get(&entry.value) == Some(&entry.insertion_index) {
                    values.remove(&entry.value);
                }
                if values.is_empty() {
                    self.dynamic_name_value_index.remove(&entry.name);
                }
            }
        }
    }
}

impl Default for HpackHeaderTable {
    fn default() -> Self {
        Self::new()
    }
}
