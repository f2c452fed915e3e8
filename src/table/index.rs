//! Fixed-bucket chained hash index over an entry arena.
//!
//! Entries live in arena slots; each bucket holds the head of a singly linked
//! chain threaded through the slots. New entries are linked at the head of
//! their chain.

use crate::error::TableErrorKind;

use super::entry::{Entry, EntryId};
use super::hash::{HashSalt, BUCKET_COUNT};
use super::mac::MacAddr;

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
    next: Option<u32>,
}

/// Hash index of terminals keyed by hardware address.
///
/// Not synchronized; `TermTable` wraps it in its lock.
#[derive(Debug)]
pub struct HashIndex {
    salt: HashSalt,
    buckets: Box<[Option<u32>]>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    capacity: usize,
}

impl HashIndex {
    /// Create an empty index holding at most `capacity` entries.
    pub fn new(salt: HashSalt, capacity: usize) -> Self {
        Self {
            salt,
            buckets: vec![None; BUCKET_COUNT].into_boxed_slice(),
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walk the chain of `mac`'s bucket.
    pub fn find(&self, mac: &MacAddr) -> Option<EntryId> {
        let mut cursor = self.buckets[self.salt.bucket_of(mac)];
        while let Some(slot_idx) = cursor {
            let slot = &self.slots[slot_idx as usize];
            if let Some(entry) = &slot.entry {
                if entry.mac == *mac {
                    return Some(EntryId {
                        slot: slot_idx,
                        generation: slot.generation,
                    });
                }
            }
            cursor = slot.next;
        }
        None
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn get_by_mac(&self, mac: &MacAddr) -> Option<&Entry> {
        self.find(mac).and_then(|id| self.get(id))
    }

    pub fn get_by_mac_mut(&mut self, mac: &MacAddr) -> Option<&mut Entry> {
        let id = self.find(mac)?;
        self.get_mut(id)
    }

    /// Link a new entry at the head of its bucket.
    ///
    /// The caller guarantees no entry with the same address is present.
    pub fn insert(&mut self, entry: Entry) -> Result<EntryId, TableErrorKind> {
        debug_assert!(self.find(&entry.mac).is_none());
        if self.len >= self.capacity {
            return Err(TableErrorKind::ResourceExhausted {
                capacity: self.capacity,
            });
        }

        let bucket = self.salt.bucket_of(&entry.mac);
        let head = self.buckets[bucket];

        let slot_idx = match self.free.pop() {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                slot.entry = Some(entry);
                slot.next = head;
                idx
            }
            None => {
                let idx = u32::try_from(self.slots.len()).map_err(|_| {
                    TableErrorKind::ResourceExhausted {
                        capacity: self.capacity,
                    }
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                    next: head,
                });
                idx
            }
        };

        self.buckets[bucket] = Some(slot_idx);
        self.len += 1;

        Ok(EntryId {
            slot: slot_idx,
            generation: self.slots[slot_idx as usize].generation,
        })
    }

    /// Unlink and release the entry behind `id`.
    pub fn remove(&mut self, id: EntryId) -> Option<Entry> {
        let mac = self.get(id)?.mac;
        let bucket = self.salt.bucket_of(&mac);

        // Find the predecessor of the slot in its chain.
        let mut prev: Option<u32> = None;
        let mut cursor = self.buckets[bucket];
        while let Some(idx) = cursor {
            if idx == id.slot {
                break;
            }
            prev = Some(idx);
            cursor = self.slots[idx as usize].next;
        }
        cursor?;

        let next = self.slots[id.slot as usize].next;
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.buckets[bucket] = next,
        }

        let slot = &mut self.slots[id.slot as usize];
        let entry = slot.entry.take();
        slot.next = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.len -= 1;

        entry
    }

    /// Release every entry. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        for bucket in self.buckets.iter_mut() {
            *bucket = None;
        }
        self.free.clear();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            slot.next = None;
            self.free.push(idx as u32);
        }
        self.len = 0;
        dropped
    }

    /// Entries in bucket order, each chain head first.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        (0..BUCKET_COUNT).flat_map(move |bucket| self.chain(bucket))
    }

    /// Entries of a single bucket, head first.
    pub fn chain(&self, bucket: usize) -> impl Iterator<Item = &Entry> + '_ {
        let mut cursor = self.buckets.get(bucket).copied().flatten();
        std::iter::from_fn(move || {
            let idx = cursor?;
            let slot = &self.slots[idx as usize];
            cursor = slot.next;
            slot.entry.as_ref()
        })
    }

    pub fn bucket_of(&self, mac: &MacAddr) -> usize {
        self.salt.bucket_of(mac)
    }
}
