//! In-memory index of live event pointers.
//!
//! The queue keeps committed pointers in insertion order (oldest first) and
//! supports O(1) amortized append, head insertion and removal by pointer.
//! Removal in the middle leaves an empty slot that is trimmed once it
//! reaches either end of the ring. When empty slots outnumber live ones
//! the ring is compacted, so memory stays proportional to the queue size.
//!
//! Pointers handed to a take are moved out of the ordered slots and into
//! `reference_counts` until the take commits (`release`) or rolls back
//! (`restore`, which puts the pointer back at the head).

use crate::Checkpoint;
use spillway_core::Pointer;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Ordered set of live pointers plus in-flight take counts
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    slots: VecDeque<Option<Pointer>>,
    /// Logical position of `slots[0]`; goes negative after head inserts
    head: i64,
    index: HashMap<Pointer, i64>,
    reference_counts: HashMap<Pointer, u32>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the queue a checkpoint describes.
    ///
    /// Pointers that were being taken when the checkpoint was written are
    /// placed back at the head: the takes had not committed at that point,
    /// and the log tail decides whether they commit later.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let mut queue = Self::new();
        for pointer in &checkpoint.queue {
            queue.add(*pointer);
        }

        let mut in_flight: Vec<Pointer> = checkpoint
            .reference_counts
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(pointer, _)| *pointer)
            .collect();
        in_flight.sort();
        for pointer in in_flight.into_iter().rev() {
            queue.add_head(pointer);
        }

        queue
    }

    /// Snapshot this queue into a checkpoint
    pub fn to_checkpoint(&self, write_order_id: u64, transaction_id: u64) -> Checkpoint {
        let mut reference_counts: Vec<(Pointer, u32)> = self
            .reference_counts
            .iter()
            .map(|(pointer, count)| (*pointer, *count))
            .collect();
        reference_counts.sort();

        Checkpoint {
            write_order_id,
            transaction_id,
            queue: self.iter().collect(),
            reference_counts,
        }
    }

    /// Append a pointer at the tail. Returns false if it is already queued.
    pub fn add(&mut self, pointer: Pointer) -> bool {
        if self.index.contains_key(&pointer) {
            return false;
        }
        let position = self.head + self.slots.len() as i64;
        self.slots.push_back(Some(pointer));
        self.index.insert(pointer, position);
        true
    }

    /// Insert a pointer at the head. Returns false if it is already queued.
    pub fn add_head(&mut self, pointer: Pointer) -> bool {
        if self.index.contains_key(&pointer) {
            return false;
        }
        self.head -= 1;
        self.slots.push_front(Some(pointer));
        self.index.insert(pointer, self.head);
        true
    }

    /// Remove a pointer wherever it is. Returns false if it was not queued.
    pub fn remove(&mut self, pointer: &Pointer) -> bool {
        let Some(position) = self.index.remove(pointer) else {
            return false;
        };
        let slot = (position - self.head) as usize;
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
        }
        self.trim();
        if self.slots.len() > 2 * self.index.len() {
            self.compact();
        }
        true
    }

    /// Oldest live pointer, without removing it
    pub fn peek_next(&self) -> Option<Pointer> {
        self.slots.front().copied().flatten()
    }

    /// Remove and return the oldest live pointer
    pub fn remove_next(&mut self) -> Option<Pointer> {
        while let Some(slot) = self.slots.pop_front() {
            self.head += 1;
            if let Some(pointer) = slot {
                self.index.remove(&pointer);
                self.trim();
                return Some(pointer);
            }
        }
        None
    }

    /// Remove the oldest pointer and count it as an in-flight take
    pub fn take_next(&mut self) -> Option<Pointer> {
        let pointer = self.remove_next()?;
        *self.reference_counts.entry(pointer).or_insert(0) += 1;
        Some(pointer)
    }

    /// Drop one in-flight reference after its take committed.
    ///
    /// Returns the number of references still outstanding.
    pub fn release(&mut self, pointer: &Pointer) -> u32 {
        match self.reference_counts.get_mut(pointer) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                self.reference_counts.remove(pointer);
                0
            }
            None => 0,
        }
    }

    /// Undo an in-flight take: drop the reference and requeue at the head
    pub fn restore(&mut self, pointer: Pointer) -> bool {
        self.release(&pointer);
        self.add_head(pointer)
    }

    /// Number of in-flight takes referencing `pointer`
    pub fn reference_count(&self, pointer: &Pointer) -> u32 {
        self.reference_counts.get(pointer).copied().unwrap_or(0)
    }

    /// Whether `pointer` is queued
    pub fn contains(&self, pointer: &Pointer) -> bool {
        self.index.contains_key(pointer)
    }

    /// Number of queued pointers
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no pointer is queued
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of distinct pointers held by in-flight takes
    pub fn in_flight_len(&self) -> usize {
        self.reference_counts.len()
    }

    /// Queued pointers, oldest first
    pub fn iter(&self) -> impl Iterator<Item = Pointer> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    /// Segments still holding a queued or in-flight event
    pub fn live_segments(&self) -> BTreeSet<u64> {
        self.index
            .keys()
            .chain(self.reference_counts.keys())
            .map(|pointer| pointer.segment_id)
            .collect()
    }

    /// Drop every empty slot and renumber the survivors from `head`
    fn compact(&mut self) {
        self.slots.retain(|slot| slot.is_some());
        for (offset, slot) in self.slots.iter().enumerate() {
            if let Some(pointer) = slot {
                self.index.insert(*pointer, self.head + offset as i64);
            }
        }
    }

    fn trim(&mut self) {
        while let Some(None) = self.slots.front() {
            self.slots.pop_front();
            self.head += 1;
        }
        while let Some(None) = self.slots.back() {
            self.slots.pop_back();
        }
    }
}
