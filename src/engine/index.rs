use lru::LruCache;

use super::EngineLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    size: u64,
    generation: u64,
}

#[derive(Debug)]
pub(super) struct BlobIndex {
    lru: LruCache<String, Slot>,
    bytes_in_use: u64,
    next_generation: u64,
    limits: EngineLimits,
}

impl BlobIndex {
    pub(super) fn new(limits: EngineLimits) -> Self {
        Self {
            lru: LruCache::unbounded(),
            bytes_in_use: 0,
            next_generation: 0,
            limits,
        }
    }

    pub(super) fn reset(&mut self) {
        self.bytes_in_use = 0;
        self.lru.clear();
    }

    /// Marks `key` as recently used and returns the generation of its entry,
    /// or `None` if the key is not indexed.
    pub(super) fn touch(&mut self, key: &str) -> Option<u64> {
        self.lru.get(key).map(|slot| slot.generation)
    }

    pub(super) fn remove(&mut self, key: &str) -> Option<u64> {
        let removed = self.lru.pop(key)?;
        self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.size);
        Some(removed.size)
    }

    /// Removes `key` only while it still holds the entry seen as `generation`.
    pub(super) fn remove_generation(&mut self, key: &str, generation: u64) -> Option<u64> {
        match self.lru.peek(key) {
            Some(slot) if slot.generation == generation => self.remove(key),
            _ => None,
        }
    }

    /// Records a blob and returns the keys evicted to get back under the
    /// target size. Neither the inserted key nor any key in `keep` is part of
    /// the result.
    pub(super) fn insert(&mut self, key: String, size: u64, keep: &[&str]) -> Vec<(String, u64)> {
        let generation = self.next_generation;
        self.next_generation += 1;
        if let Some(previous) = self.lru.put(key.clone(), Slot { size, generation }) {
            self.bytes_in_use = self.bytes_in_use.saturating_sub(previous.size);
        }
        self.bytes_in_use = self.bytes_in_use.saturating_add(size);

        let mut evicted = Vec::new();
        if self.bytes_in_use <= self.limits.max_bytes {
            return evicted;
        }
        while self.bytes_in_use > self.limits.target_bytes {
            let victim = self
                .lru
                .iter()
                .rev()
                .map(|(candidate, _)| candidate)
                .find(|candidate| **candidate != key && !keep.contains(&candidate.as_str()))
                .cloned();
            let Some(victim) = victim else { break };
            if let Some(size) = self.remove(&victim) {
                evicted.push((victim, size));
            }
        }
        evicted
    }

    pub(super) fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    pub(super) fn len(&self) -> usize {
        self.lru.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(target_bytes: u64, max_bytes: u64) -> BlobIndex {
        BlobIndex::new(EngineLimits {
            target_bytes,
            max_bytes,
        })
    }

    #[test]
    fn stays_put_until_hard_bound_is_crossed() {
        let mut index = index(4, 8);
        assert!(index.insert("a".into(), 3, &[]).is_empty());
        assert!(index.insert("b".into(), 3, &[]).is_empty());
        assert_eq!(index.bytes_in_use(), 6);
    }

    #[test]
    fn evicts_least_recent_down_to_target() {
        let mut index = index(6, 8);
        index.insert("a".into(), 3, &[]);
        index.insert("b".into(), 3, &[]);
        assert!(index.touch("a").is_some());

        let evicted = index.insert("c".into(), 3, &[]);
        assert_eq!(evicted, vec![("b".to_string(), 3)]);
        assert_eq!(index.bytes_in_use(), 6);

        let evicted = index.insert("d".into(), 3, &[]);
        assert_eq!(evicted, vec![("a".to_string(), 3)]);
        assert_eq!(index.len(), 2);
        assert!(index.touch("a").is_none());
    }

    #[test]
    fn evicts_past_the_hard_bound_to_the_target() {
        let mut index = index(4, 8);
        index.insert("a".into(), 3, &[]);
        index.insert("b".into(), 3, &[]);

        let evicted = index.insert("c".into(), 3, &[]);
        let keys: Vec<_> = evicted.into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(index.bytes_in_use(), 3);
    }

    #[test]
    fn never_evicts_the_blob_just_inserted() {
        let mut index = index(1, 2);
        let evicted = index.insert("big".into(), 10, &[]);
        assert!(evicted.is_empty());
        assert_eq!(index.len(), 1);
        assert_eq!(index.bytes_in_use(), 10);
    }

    #[test]
    fn kept_keys_survive_eviction() {
        let mut index = index(4, 8);
        index.insert("old".into(), 2, &[]);
        index.insert("body".into(), 4, &[]);

        let evicted = index.insert("meta".into(), 3, &["body"]);
        assert_eq!(evicted, vec![("old".to_string(), 2)]);
        assert!(index.touch("body").is_some());
        assert_eq!(index.bytes_in_use(), 7);
    }

    #[test]
    fn replacing_a_key_updates_accounting() {
        let mut index = index(100, 100);
        index.insert("a".into(), 10, &[]);
        index.insert("a".into(), 4, &[]);
        assert_eq!(index.bytes_in_use(), 4);
        assert_eq!(index.remove("a"), Some(4));
        assert_eq!(index.bytes_in_use(), 0);
        assert_eq!(index.remove("a"), None);
    }

    #[test]
    fn stale_generation_does_not_remove_a_newer_entry() {
        let mut index = index(100, 100);
        index.insert("a".into(), 3, &[]);
        let seen = index.touch("a");
        index.remove("a");
        index.insert("a".into(), 5, &[]);

        assert_eq!(seen.and_then(|g| index.remove_generation("a", g)), None);
        assert_eq!(index.bytes_in_use(), 5);
        let current = index.touch("a");
        assert_eq!(current.and_then(|g| index.remove_generation("a", g)), Some(5));
    }
}
