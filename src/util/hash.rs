//! Separately chained hash table with caller-supplied hash and equality.
//!
//! Buckets are drawn from a fixed table of primes. The table grows to the
//! next prime once `size / buckets` reaches [`RESIZE_THRESHOLD`]; there is no
//! shrinking. New entries are prepended to their chain, so an entry with a
//! duplicate key shadows the older one until it is removed.

pub type HashFn<K> = fn(&K) -> usize;
pub type EqFn<K> = fn(&K, &K) -> bool;

pub const RESIZE_THRESHOLD: f64 = 0.75;

const PRIMES: [usize; 25] = [
    53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241, 786433,
    1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611, 402653189,
    805306457,
];
const PRIME_CEILING: usize = 1_610_612_741;

/// First prime in the table that is at least `n`, or the ceiling.
fn next_prime(n: usize) -> usize {
    PRIMES
        .iter()
        .copied()
        .find(|&p| p >= n)
        .unwrap_or(PRIME_CEILING)
}

struct Entry<K, V> {
    key: K,
    value: V,
    next: Option<Box<Entry<K, V>>>,
}

type Chain<K, V> = Option<Box<Entry<K, V>>>;

pub struct ChainedHashTable<K, V> {
    buckets: Vec<Chain<K, V>>,
    size: usize,
    hash: HashFn<K>,
    eq: EqFn<K>,
}

impl<K, V> ChainedHashTable<K, V> {
    /// Creates a table with at least `buckets` buckets (rounded up to a prime).
    pub fn new(buckets: usize, hash: HashFn<K>, eq: EqFn<K>) -> Self {
        let n = next_prime(buckets.max(1));
        Self {
            buckets: Self::empty_buckets(n),
            size: 0,
            hash,
            eq,
        }
    }

    fn empty_buckets(n: usize) -> Vec<Chain<K, V>> {
        let mut v = Vec::with_capacity(n);
        v.resize_with(n, || None);
        v
    }

    fn index(&self, key: &K) -> usize {
        (self.hash)(key) % self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Load factor, `size / buckets`.
    pub fn load(&self) -> f64 {
        self.size as f64 / self.buckets.len() as f64
    }

    /// Inserts `key`, prepending it to its chain. Never replaces an existing
    /// entry.
    pub fn insert(&mut self, key: K, value: V) {
        if self.load() >= RESIZE_THRESHOLD {
            self.grow();
        }
        let idx = self.index(&key);
        let next = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(Entry { key, value, next }));
        self.size += 1;
    }

    fn grow(&mut self) {
        let current = self.buckets.len();
        if current >= PRIME_CEILING {
            return;
        }
        let target = next_prime(current + 1);
        tracing::trace!(from = current, to = target, "resizing hash table");
        let old = std::mem::replace(&mut self.buckets, Self::empty_buckets(target));
        for mut chain in old {
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                let idx = self.index(&entry.key);
                entry.next = self.buckets[idx].take();
                self.buckets[idx] = Some(entry);
            }
        }
    }

    /// Value of the newest entry matching `key`.
    pub fn find(&self, key: &K) -> Option<&V> {
        let mut cur = self.buckets[self.index(key)].as_deref();
        while let Some(entry) = cur {
            if (self.eq)(&entry.key, key) {
                return Some(&entry.value);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.index(key);
        let eq = self.eq;
        let mut cur = self.buckets[idx].as_deref_mut();
        while let Some(entry) = cur {
            if eq(&entry.key, key) {
                return Some(&mut entry.value);
            }
            cur = entry.next.as_deref_mut();
        }
        None
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Replaces the value of the first matching entry, returning the old one.
    /// Absent keys are left absent and `value` is handed back as the error.
    pub fn update(&mut self, key: &K, value: V) -> Result<V, V> {
        match self.find_mut(key) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(value),
        }
    }

    /// Unlinks the first matching entry and returns its key and value.
    pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
        let idx = self.index(key);
        let eq = self.eq;
        let mut link = &mut self.buckets[idx];
        loop {
            let hit = match link.as_ref() {
                None => return None,
                Some(entry) => eq(&entry.key, key),
            };
            if hit {
                let mut removed = link.take()?;
                *link = removed.next.take();
                self.size -= 1;
                return Some((removed.key, removed.value));
            }
            link = &mut link.as_mut()?.next;
        }
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            buckets: self.buckets.iter(),
            chain: None,
        }
    }

    /// Drains every entry, leaving the table empty with its current bucket
    /// count.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.size);
        for bucket in self.buckets.iter_mut() {
            let mut chain = bucket.take();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                out.push((entry.key, entry.value));
            }
        }
        self.size = 0;
        out
    }
}

impl<K, V> Drop for ChainedHashTable<K, V> {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse.
        for bucket in self.buckets.iter_mut() {
            let mut chain = bucket.take();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
            }
        }
    }
}

pub struct Iter<'a, K, V> {
    buckets: std::slice::Iter<'a, Chain<K, V>>,
    chain: Option<&'a Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.chain {
                self.chain = entry.next.as_deref();
                return Some((&entry.key, &entry.value));
            }
            self.chain = self.buckets.next()?.as_deref();
        }
    }
}

pub fn uint_hash(key: &u32) -> usize {
    *key as usize
}

pub fn uint_eq(a: &u32, b: &u32) -> bool {
    a == b
}

/// Jenkins one-at-a-time hash.
pub fn bytes_hash(bytes: &[u8]) -> usize {
    let mut h: u32 = 0;
    for &b in bytes {
        h = h.wrapping_add(b as u32);
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h as usize
}

pub fn string_hash(key: &String) -> usize {
    bytes_hash(key.as_bytes())
}

pub fn string_eq(a: &String, b: &String) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn uint_table<V>() -> ChainedHashTable<u32, V> {
        ChainedHashTable::new(17, uint_hash, uint_eq)
    }

    #[test]
    fn rounds_bucket_count_to_prime() {
        assert_eq!(uint_table::<()>().buckets(), 53);
        let t: ChainedHashTable<u32, ()> = ChainedHashTable::new(100, uint_hash, uint_eq);
        assert_eq!(t.buckets(), 193);
    }

    #[test]
    fn insert_find_remove() {
        let mut t = uint_table();
        t.insert(1, "one");
        t.insert(2, "two");
        assert_eq!(t.find(&1), Some(&"one"));
        assert_eq!(t.find(&3), None);
        assert_eq!(t.remove(&1), Some((1, "one")));
        assert_eq!(t.find(&1), None);
        assert_eq!(t.len(), 1);
        assert_eq!(t.remove(&1), None);
    }

    #[test]
    fn duplicates_shadow_older_entries() {
        let mut t = uint_table();
        t.insert(7, 'a');
        t.insert(7, 'b');
        assert_eq!(t.len(), 2);
        assert_eq!(t.find(&7), Some(&'b'));
        assert_eq!(t.remove(&7), Some((7, 'b')));
        assert_eq!(t.find(&7), Some(&'a'));
    }

    #[test]
    fn colliding_keys_share_a_chain() {
        let mut t = uint_table();
        t.insert(5, 5);
        t.insert(5 + 53, 58);
        t.insert(5 + 106, 111);
        assert_eq!(t.remove(&58), Some((58, 58)));
        assert_eq!(t.find(&5), Some(&5));
        assert_eq!(t.find(&111), Some(&111));
    }

    #[test]
    fn grows_at_threshold_and_keeps_entries() {
        let mut t = uint_table();
        // 53 * 0.75 = 39.75, so the 41st insert triggers the first resize.
        for k in 0..40u32 {
            t.insert(k, k * 10);
        }
        assert_eq!(t.buckets(), 53);
        t.insert(40, 400);
        assert_eq!(t.buckets(), 97);
        for k in 0..5000u32 {
            t.insert(1000 + k, k);
        }
        assert!(t.load() < RESIZE_THRESHOLD);
        for k in 0..41u32 {
            assert_eq!(t.find(&k), Some(&(k * 10)));
        }
        for k in 0..5000u32 {
            assert_eq!(t.find(&(1000 + k)), Some(&k));
        }
        assert_eq!(t.iter().count(), t.len());
    }

    #[test]
    fn update_replaces_first_match() {
        let mut t = uint_table();
        t.insert(1, 10);
        assert_eq!(t.update(&1, 11), Ok(10));
        assert_eq!(t.find(&1), Some(&11));
        assert_eq!(t.update(&2, 20), Err(20));
        assert!(!t.contains(&2));
    }

    #[test]
    fn string_keys() {
        let mut t = ChainedHashTable::new(17, string_hash, string_eq);
        t.insert("wire".to_string(), 1);
        t.insert("hub".to_string(), 2);
        assert_eq!(t.find(&"wire".to_string()), Some(&1));
        assert_eq!(t.find(&"bridge".to_string()), None);
    }

    #[test]
    fn randomized_against_model() {
        let mut rng = rand::rng();
        let mut t = uint_table();
        let mut model = std::collections::HashMap::new();
        for _ in 0..20_000 {
            let k: u32 = rng.random_range(0..2000);
            if rng.random_bool(0.6) {
                if t.remove(&k).is_some() {
                    model.remove(&k);
                }
                t.insert(k, k ^ 0x5a5a);
                model.insert(k, k ^ 0x5a5a);
            } else {
                assert_eq!(t.remove(&k).map(|(_, v)| v), model.remove(&k));
            }
        }
        assert_eq!(t.len(), model.len());
        for (k, v) in &model {
            assert_eq!(t.find(k), Some(v));
        }
    }

    #[test]
    fn drain_empties_the_table() {
        let mut t = uint_table();
        for k in 0..10 {
            t.insert(k, ());
        }
        assert_eq!(t.drain().len(), 10);
        assert!(t.is_empty());
        assert_eq!(t.iter().count(), 0);
    }
}
