//! LRU (Least Recently Used) access order tracking.

use std::collections::HashMap;
use std::hash::Hash;

/// Tracks access order of cached keys
pub struct LruCache<K> {
    /// Maps a key to its node in the access order
    positions: HashMap<K, usize>,
    /// Doubly-linked list nodes for O(1) removal
    order: Vec<LruNode<K>>,
    /// Head of the list (most recently used)
    head: Option<usize>,
    /// Tail of the list (least recently used)
    tail: Option<usize>,
    /// Free list of node indices
    free_slots: Vec<usize>,
}

#[derive(Clone, Copy)]
struct LruNode<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K: Copy + Eq + Hash> LruCache<K> {
    /// Create a new LRU tracker sized for `capacity` keys
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: HashMap::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_slots: Vec::new(),
        }
    }

    /// Record access to a key (moves it to front)
    pub fn access(&mut self, key: K) {
        if let Some(&pos) = self.positions.get(&key) {
            self.move_to_front(pos);
        } else {
            self.insert(key);
        }
    }

    /// Stop tracking a key
    pub fn remove(&mut self, key: &K) {
        if let Some(pos) = self.positions.remove(key) {
            self.unlink(pos);
            self.free_slots.push(pos);
        }
    }

    /// Keys from least to most recently used
    pub fn iter_lru(&self) -> impl Iterator<Item = K> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            let pos = cursor?;
            cursor = self.order[pos].prev;
            Some(self.order[pos].key)
        })
    }

    /// Insert a new key at the front
    fn insert(&mut self, key: K) {
        let node = LruNode {
            key,
            prev: None,
            next: self.head,
        };
        let pos = if let Some(pos) = self.free_slots.pop() {
            self.order[pos] = node;
            pos
        } else {
            self.order.push(node);
            self.order.len() - 1
        };

        if let Some(old_head) = self.head {
            self.order[old_head].prev = Some(pos);
        }
        self.head = Some(pos);

        if self.tail.is_none() {
            self.tail = Some(pos);
        }

        self.positions.insert(key, pos);
    }

    /// Move a node to the front of the list
    fn move_to_front(&mut self, pos: usize) {
        if self.head == Some(pos) {
            return;
        }

        self.unlink(pos);

        self.order[pos].prev = None;
        self.order[pos].next = self.head;

        if let Some(old_head) = self.head {
            self.order[old_head].prev = Some(pos);
        }
        self.head = Some(pos);

        if self.tail.is_none() {
            self.tail = Some(pos);
        }
    }

    /// Unlink a node from the list
    fn unlink(&mut self, pos: usize) {
        let (prev, next) = (self.order[pos].prev, self.order[pos].next);

        if let Some(prev) = prev {
            self.order[prev].next = next;
        } else {
            self.head = next;
        }

        if let Some(next) = next {
            self.order[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }
}
