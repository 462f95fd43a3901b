// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending queues for messages whose destination is not registered yet.
//!
//! Every destination owns a circular doubly-linked ring threaded through a
//! shared slot arena. The ring head is a sentinel slot that never holds a
//! message, so linking and unlinking are plain index swaps.
//!
//! Each held message owns a cancel-once [`Timer`]. Whoever wins
//! [`Timer::cancel`] (the dispatcher's recheck, a wake drain, shutdown) takes
//! the message; if the timer fires first, only the timeout path may remove
//! it.
//!
//! # Locking
//!
//! One table-wide mutex guards the arena and all rings. When both are
//! needed, the arena lock is taken before the head map.

use crate::message::Message;
use crate::timeout::Timer;
use dashmap::mapref::entry::Entry as HeadEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Handle to a held message.
///
/// Slots are recycled; the generation tells a stale handle from the slot's
/// current occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}.{}", self.index, self.generation)
    }
}

enum SlotEntry {
    Free,
    Sentinel,
    Held { message: Message, timer: Arc<Timer> },
}

struct Slot {
    generation: u32,
    prev: u32,
    next: u32,
    entry: SlotEntry,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    held: usize,
}

impl Arena {
    fn alloc(&mut self, entry: SlotEntry) -> u32 {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = entry;
            slot.prev = index;
            slot.next = index;
            return index;
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            prev: index,
            next: index,
            entry,
        });
        index
    }

    fn node(&self, index: u32) -> NodeId {
        NodeId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn is_current(&self, node: NodeId) -> bool {
        self.slots.get(node.index as usize).is_some_and(|slot| {
            slot.generation == node.generation && matches!(slot.entry, SlotEntry::Held { .. })
        })
    }

    fn timer(&self, index: u32) -> Option<&Timer> {
        match &self.slots[index as usize].entry {
            SlotEntry::Held { timer, .. } => Some(timer),
            _ => None,
        }
    }

    /// Insert `index` right before `head`, i.e. at the ring's tail.
    fn link_tail(&mut self, head: u32, index: u32) {
        let tail = self.slots[head as usize].prev;
        self.slots[index as usize].prev = tail;
        self.slots[index as usize].next = head;
        self.slots[tail as usize].next = index;
        self.slots[head as usize].prev = index;
    }

    /// Unlink a held slot, free it and hand back its message.
    fn take(&mut self, index: u32) -> Option<Message> {
        let slot = &mut self.slots[index as usize];
        if !matches!(slot.entry, SlotEntry::Held { .. }) {
            return None;
        }
        let SlotEntry::Held { message, .. } = std::mem::replace(&mut slot.entry, SlotEntry::Free)
        else {
            return None;
        };
        let (prev, next) = (slot.prev, slot.next);
        slot.prev = index;
        slot.next = index;
        slot.generation = slot.generation.wrapping_add(1);

        self.slots[prev as usize].next = next;
        self.slots[next as usize].prev = prev;
        self.free.push(index);
        self.held -= 1;
        Some(message)
    }
}

/// Per-destination FIFO rings of held messages.
pub struct PendingQueueTable {
    arena: Mutex<Arena>,
    heads: DashMap<Arc<str>, u32>,
}

impl PendingQueueTable {
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            heads: DashMap::new(),
        }
    }

    /// Append `message` to the ring of `destination` and arm its timer.
    ///
    /// `make_timer` receives the new node's handle. The timer is scheduled
    /// only after the node is linked, so an early expiry always finds it.
    pub fn enqueue<F>(
        &self,
        destination: &Arc<str>,
        message: Message,
        timeout: Duration,
        make_timer: F,
    ) -> NodeId
    where
        F: FnOnce(NodeId) -> Timer,
    {
        let (node, timer) = {
            let mut arena = self.arena.lock();
            let head = match self.heads.entry(Arc::clone(destination)) {
                HeadEntry::Occupied(entry) => *entry.get(),
                HeadEntry::Vacant(entry) => *entry.insert(arena.alloc(SlotEntry::Sentinel)),
            };

            let index = arena.alloc(SlotEntry::Free);
            let node = arena.node(index);
            let timer = Arc::new(make_timer(node));
            arena.slots[index as usize].entry = SlotEntry::Held {
                message,
                timer: Arc::clone(&timer),
            };
            arena.link_tail(head, index);
            arena.held += 1;
            (node, timer)
        };

        // Refused when the node was already claimed or the timer service
        // has stopped; either way the node is someone else's now.
        if !timer.schedule(timeout) {
            tracing::debug!("[pending] timer for {} not armed ({:?})", node, timer.state());
        }
        node
    }

    /// Unlink `node` and return its message. Stale handles yield `None`.
    ///
    /// Used by the timeout path, which already owns the node through its
    /// fired timer.
    pub fn remove(&self, node: NodeId) -> Option<Message> {
        let mut arena = self.arena.lock();
        if !arena.is_current(node) {
            return None;
        }
        arena.take(node.index)
    }

    /// Cancel the timer of `node` and, if that cancel wins, unlink it.
    pub fn claim(&self, node: NodeId) -> Option<Message> {
        let mut arena = self.arena.lock();
        if !arena.is_current(node) {
            return None;
        }
        if !arena.timer(node.index).is_some_and(Timer::cancel) {
            return None;
        }
        arena.take(node.index)
    }

    /// Claim every held message of `destination` in FIFO order.
    ///
    /// Nodes whose timer already fired are left for the timeout path.
    /// `on_each` runs after the table lock is released. Returns the number of
    /// claimed messages.
    pub fn drain_for<F>(&self, destination: &str, mut on_each: F) -> usize
    where
        F: FnMut(Message),
    {
        let claimed = {
            let mut arena = self.arena.lock();
            let Some(head) = self.heads.get(destination).map(|h| *h) else {
                return 0;
            };

            let mut claimed = Vec::new();
            let mut cursor = arena.slots[head as usize].next;
            while cursor != head {
                let next = arena.slots[cursor as usize].next;
                if arena.timer(cursor).is_some_and(Timer::cancel) {
                    if let Some(message) = arena.take(cursor) {
                        claimed.push(message);
                    }
                }
                cursor = next;
            }
            claimed
        };

        let count = claimed.len();
        for message in claimed {
            on_each(message);
        }
        count
    }

    /// Claim every held message of every destination.
    pub fn close_all(&self) -> Vec<Message> {
        let mut arena = self.arena.lock();
        let mut released = Vec::new();
        for index in 0..arena.slots.len() as u32 {
            if arena.timer(index).is_some_and(Timer::cancel) {
                if let Some(message) = arena.take(index) {
                    released.push(message);
                }
            }
        }
        released
    }

    /// Held messages for `destination`.
    pub fn len_for(&self, destination: &str) -> usize {
        let arena = self.arena.lock();
        let Some(head) = self.heads.get(destination).map(|h| *h) else {
            return 0;
        };
        let mut count = 0;
        let mut cursor = arena.slots[head as usize].next;
        while cursor != head {
            count += 1;
            cursor = arena.slots[cursor as usize].next;
        }
        count
    }

    /// Held messages across all destinations.
    pub fn len(&self) -> usize {
        self.arena.lock().held
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destinations with a ring, empty or not.
    pub fn destinations(&self) -> usize {
        self.heads.len()
    }
}

impl Default for PendingQueueTable {
    fn default() -> Self {
        Self::new()
    }
}
