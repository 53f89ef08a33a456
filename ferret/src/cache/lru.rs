//! Aging LRU map.
//!
//! A bounded mapping with most-recently-used-first ordering and an
//! optional per-entry time-to-live. Eviction visits aged-out entries
//! first (oldest insertion first), then the least recently used, and
//! each candidate can be left, renewed, evicted or the scan stopped by
//! a caller-supplied policy.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

const NIL: usize = usize::MAX;

/// What to do with an eviction candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAction {
    /// Keep the entry and keep scanning.
    Leave,
    /// Reset the entry's recency and age.
    Renew,
    /// Remove the entry and keep scanning.
    Evict,
    /// Abort the scan.
    Stop,
}

/// What to do with an entry on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetAction {
    /// Leave the entry where it is.
    Leave,
    /// Promote the entry to most recently used.
    Renew,
}

/// Missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no such key in cache")]
pub struct NotFound;

struct Slot<K, V> {
    key: K,
    value: V,
    /// Recency list links, head side is most recently used.
    prev: usize,
    next: usize,
    /// Insertion-order list links, used for aging.
    aged_prev: usize,
    aged_next: usize,
    expires: Option<Instant>,
}

/// Bounded key-value map with LRU and optional age-based eviction.
pub struct Lru<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    /// Aging list, head is the newest insertion.
    aged_head: usize,
    aged_tail: usize,
    max_size: Option<usize>,
    max_age: Option<Duration>,
}

impl<K: Hash + Eq + Clone, V> Lru<K, V> {
    /// Unbounded map.
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Map bounded by entry count.
    pub fn with_max_size(max_size: usize) -> Self {
        Self::new(Some(max_size), None)
    }

    /// Map bounded by entry count and/or entry age.
    pub fn new(max_size: Option<usize>, max_age: Option<Duration>) -> Self {
        assert!(max_size != Some(0));
        Self {
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            aged_head: NIL,
            aged_tail: NIL,
            max_size,
            max_age,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Configured size bound.
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Insert, replacing any previous entry for the key, then trim to
    /// bounds. The new entry lands at the most-recently-used position.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.insert_with(key, value, |_, _| DropAction::Evict)
    }

    /// Insert and trim with an eviction policy instead of the default.
    pub fn insert_with<F>(&mut self, key: K, value: V, policy: F) -> Option<V>
    where
        F: FnMut(&K, &V) -> DropAction,
    {
        let old = self.erase(&key);
        let expires = self.max_age.map(|age| Instant::now() + age);
        let index = self.alloc(key.clone(), value, expires);
        self.link_front(index);
        self.aged_link_front(index);
        self.map.insert(key, index);
        self.trim_with(policy);
        old
    }

    /// Look a key up and promote it. Aged-out entries are erased and
    /// reported as absent.
    pub fn find(&mut self, key: &K) -> Option<&mut V> {
        let index = self.live_slot(key)?;
        self.unlink(index);
        self.link_front(index);
        Some(&mut self.slot_mut(index).value)
    }

    /// Look a key up, letting the policy decide whether to promote.
    pub fn find_and<F>(&mut self, policy: F, key: &K) -> Option<&mut V>
    where
        F: FnOnce(&V) -> GetAction,
    {
        let index = self.live_slot(key)?;
        if policy(&self.slot(index).value) == GetAction::Renew {
            self.unlink(index);
            self.link_front(index);
        }
        Some(&mut self.slot_mut(index).value)
    }

    /// Look a key up without touching recency or expiring anything.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let index = *self.map.get(key)?;
        if self.expired(index) {
            return None;
        }
        Some(&self.slot(index).value)
    }

    /// Like [`Self::find`], but a missing key is an error.
    pub fn at(&mut self, key: &K) -> Result<&mut V, NotFound> {
        self.find(key).ok_or(NotFound)
    }

    /// Look a key up, inserting a freshly built value when absent.
    pub fn get_or_insert_with<F>(&mut self, key: &K, build: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        if self.live_slot(key).is_none() {
            self.insert(key.clone(), build());
        }
        self.find(key).unwrap()
    }

    /// Remove an entry.
    pub fn erase(&mut self, key: &K) -> Option<V> {
        let index = self.map.remove(key)?;
        Some(self.release(index))
    }

    /// Evict enough entries to satisfy both bounds: aged-out entries
    /// first (oldest insertion first), then by least recency.
    pub fn trim(&mut self) {
        self.trim_with(|_, _| DropAction::Evict);
    }

    /// Walk eviction candidates under a policy.
    ///
    /// Aged-out entries are visited first when a `max_age` is set; the
    /// LRU scan then runs while the map is over `max_size`.
    pub fn trim_with<F>(&mut self, mut policy: F)
    where
        F: FnMut(&K, &V) -> DropAction,
    {
        if self.max_age.is_some() && !self.trim_aged(&mut policy) {
            return;
        }
        if self.max_size.is_some() {
            self.trim_lru(&mut policy);
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.aged_head = NIL;
        self.aged_tail = NIL;
    }

    /// Entries in most-recently-used-first order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            lru: self,
            index: self.head,
        }
    }

    /// Returns false when the scan was stopped by the policy.
    fn trim_aged<F>(&mut self, policy: &mut F) -> bool
    where
        F: FnMut(&K, &V) -> DropAction,
    {
        let now = Instant::now();
        let mut index = self.aged_tail;
        while index != NIL {
            let newer = self.slot(index).aged_prev;
            let expires = self.slot(index).expires;
            match expires {
                Some(expires) if expires <= now => {
                    let slot = self.slot(index);
                    let action = policy(&slot.key, &slot.value);
                    match action {
                        DropAction::Evict => {
                            let key = self.slot(index).key.clone();
                            self.map.remove(&key);
                            self.release(index);
                        }
                        DropAction::Renew => self.renew(index),
                        DropAction::Leave => {}
                        DropAction::Stop => return false,
                    }
                }
                // Insertion ordered: nothing older is left.
                _ => break,
            }
            index = newer;
        }
        true
    }

    fn trim_lru<F>(&mut self, policy: &mut F)
    where
        F: FnMut(&K, &V) -> DropAction,
    {
        let max_size = match self.max_size {
            Some(max) => max,
            None => return,
        };

        let mut index = self.tail;
        while index != NIL && self.map.len() > max_size {
            let recent = self.slot(index).prev;
            let slot = self.slot(index);
            let action = policy(&slot.key, &slot.value);
            match action {
                DropAction::Evict => {
                    let key = self.slot(index).key.clone();
                    self.map.remove(&key);
                    self.release(index);
                }
                DropAction::Renew => self.renew(index),
                DropAction::Leave => {}
                DropAction::Stop => return,
            }
            index = recent;
        }
    }

    fn slot(&self, index: usize) -> &Slot<K, V> {
        self.slots[index].as_ref().unwrap()
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot<K, V> {
        self.slots[index].as_mut().unwrap()
    }

    fn live_slot(&mut self, key: &K) -> Option<usize> {
        let index = *self.map.get(key)?;
        if self.expired(index) {
            self.map.remove(key);
            self.release(index);
            return None;
        }
        Some(index)
    }

    fn expired(&self, index: usize) -> bool {
        match self.slot(index).expires {
            Some(expires) => expires <= Instant::now(),
            None => false,
        }
    }

    fn renew(&mut self, index: usize) {
        self.unlink(index);
        self.link_front(index);
        if let Some(age) = self.max_age {
            self.slot_mut(index).expires = Some(Instant::now() + age);
            self.aged_unlink(index);
            self.aged_link_front(index);
        }
    }

    fn alloc(&mut self, key: K, value: V, expires: Option<Instant>) -> usize {
        let slot = Slot {
            key,
            value,
            prev: NIL,
            next: NIL,
            aged_prev: NIL,
            aged_next: NIL,
            expires,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) -> V {
        self.unlink(index);
        self.aged_unlink(index);
        self.free.push(index);
        self.slots[index].take().unwrap().value
    }

    fn link_front(&mut self, index: usize) {
        self.slot_mut(index).prev = NIL;
        self.slot_mut(index).next = self.head;
        if self.head != NIL {
            self.slot_mut(self.head).prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.slot(index).prev, self.slot(index).next);
        if prev != NIL {
            self.slot_mut(prev).next = next;
        } else if self.head == index {
            self.head = next;
        }
        if next != NIL {
            self.slot_mut(next).prev = prev;
        } else if self.tail == index {
            self.tail = prev;
        }
        self.slot_mut(index).prev = NIL;
        self.slot_mut(index).next = NIL;
    }

    fn aged_link_front(&mut self, index: usize) {
        self.slot_mut(index).aged_prev = NIL;
        self.slot_mut(index).aged_next = self.aged_head;
        if self.aged_head != NIL {
            self.slot_mut(self.aged_head).aged_prev = index;
        }
        self.aged_head = index;
        if self.aged_tail == NIL {
            self.aged_tail = index;
        }
    }

    fn aged_unlink(&mut self, index: usize) {
        let (prev, next) = (self.slot(index).aged_prev, self.slot(index).aged_next);
        if prev != NIL {
            self.slot_mut(prev).aged_next = next;
        } else if self.aged_head == index {
            self.aged_head = next;
        }
        if next != NIL {
            self.slot_mut(next).aged_prev = prev;
        } else if self.aged_tail == index {
            self.aged_tail = prev;
        }
        self.slot_mut(index).aged_prev = NIL;
        self.slot_mut(index).aged_next = NIL;
    }
}

/// MRU-first iterator.
pub struct Iter<'a, K, V> {
    lru: &'a Lru<K, V>,
    index: usize,
}

impl<'a, K: Hash + Eq + Clone, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == NIL {
            return None;
        }
        let slot = self.lru.slot(self.index);
        self.index = slot.next;
        Some((&slot.key, &slot.value))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_insert_find() {
        let mut lru = Lru::with_max_size(4);
        lru.insert("a", 1);
        lru.insert("b", 2);

        assert_eq!(lru.find(&"a"), Some(&mut 1));
        assert_eq!(lru.find(&"missing"), None);
        assert!(lru.at(&"missing").is_err());
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_mru_order() {
        let mut lru = Lru::with_max_size(8);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert("c", 3);

        // "c" is most recent, then a find promotes "a".
        let keys: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["c", "b", "a"]);

        lru.find(&"a");
        let keys: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["a", "c", "b"]);
    }

    #[test]
    fn test_size_bound_after_every_operation() {
        let mut lru = Lru::with_max_size(3);
        for i in 0..100 {
            lru.insert(i, i);
            assert!(lru.len() <= 3);
        }

        // Least recent got evicted.
        assert!(lru.peek(&96).is_none());
        assert!(lru.peek(&99).is_some());
    }

    #[test]
    fn test_insert_replaces() {
        let mut lru = Lru::with_max_size(4);
        lru.insert("a", 1);
        assert_eq!(lru.insert("a", 2), Some(1));
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.find(&"a"), Some(&mut 2));
    }

    #[test]
    fn test_aged_out_entries_vanish() {
        let mut lru = Lru::new(Some(16), Some(Duration::from_millis(20)));
        lru.insert("a", 1);
        assert!(lru.find(&"a").is_some());

        sleep(Duration::from_millis(30));
        assert!(lru.find(&"a").is_none());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_trim_evicts_aged_first() {
        let mut lru = Lru::new(Some(16), Some(Duration::from_millis(20)));
        lru.insert("old", 1);
        sleep(Duration::from_millis(30));
        lru.insert("new", 2);

        lru.trim();
        assert!(lru.peek(&"old").is_none());
        assert!(lru.peek(&"new").is_some());
    }

    #[test]
    fn test_trim_policy_leave_and_stop() {
        let mut lru = Lru::with_max_size(2);
        lru.insert("a", 1);
        lru.insert("b", 2);

        // Over the bound, but the policy refuses to drop anything.
        lru.insert_with("c", 3, |_, _| DropAction::Leave);
        assert_eq!(lru.len(), 3);

        let mut visited = 0;
        lru.trim_with(|_, _| {
            visited += 1;
            DropAction::Stop
        });
        assert_eq!(visited, 1);
        assert_eq!(lru.len(), 3);

        // Default policy brings it back under the bound.
        lru.trim();
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_trim_policy_renew() {
        let mut lru = Lru::with_max_size(2);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert_with("c", 3, |key, _| {
            if *key == "a" {
                DropAction::Renew
            } else {
                DropAction::Evict
            }
        });

        // "a" was renewed, "b" paid for the insert.
        assert_eq!(lru.len(), 2);
        assert!(lru.peek(&"a").is_some());
        assert!(lru.peek(&"b").is_none());
        assert!(lru.peek(&"c").is_some());

        let keys: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["a", "c"]);
    }

    #[test]
    fn test_find_and_leave() {
        let mut lru = Lru::with_max_size(4);
        lru.insert("a", 1);
        lru.insert("b", 2);

        lru.find_and(|_| GetAction::Leave, &"a");
        let keys: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["b", "a"]);

        lru.find_and(|_| GetAction::Renew, &"a");
        let keys: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut lru = Lru::with_max_size(4);
        assert_eq!(*lru.get_or_insert_with(&"a", || 10), 10);
        *lru.get_or_insert_with(&"a", || unreachable!()) += 1;
        assert_eq!(lru.peek(&"a"), Some(&11));
    }

    #[test]
    fn test_erase_and_slot_reuse() {
        let mut lru = Lru::with_max_size(4);
        lru.insert("a", 1);
        lru.insert("b", 2);
        assert_eq!(lru.erase(&"a"), Some(1));
        assert_eq!(lru.erase(&"a"), None);

        lru.insert("c", 3);
        lru.insert("d", 4);
        assert_eq!(lru.len(), 3);
        let keys: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["d", "c", "b"]);
    }

    #[test]
    fn test_clear() {
        let mut lru = Lru::with_max_size(4);
        lru.insert("a", 1);
        lru.clear();
        assert!(lru.is_empty());
        assert!(lru.find(&"a").is_none());
    }
}
