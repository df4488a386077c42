use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted set of interned `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Request series carry at most four tags (status, method, name, group).
    pairs: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    pub(crate) fn from_unsorted(mut pairs: SmallVec<[(KeyId, KeyId); 4]>) -> Self {
        pairs.sort_unstable_by_key(|(k, _)| *k);
        // Last write wins for duplicated keys.
        let mut out: SmallVec<[(KeyId, KeyId); 4]> = SmallVec::with_capacity(pairs.len());
        for (k, v) in pairs {
            match out.last_mut() {
                Some(last) if last.0 == k => last.1 = v,
                _ => out.push((k, v)),
            }
        }
        Self { pairs: out }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.pairs.partition_point(|(k, _)| *k < key);
        self.pairs
            .get(idx)
            .and_then(|(k, v)| (*k == key).then_some(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Interner;
    use smallvec::smallvec;

    #[test]
    fn tagset_sorts_and_dedups_keys() {
        let i = Interner::default();
        let (status, group) = (i.intern("status"), i.intern("group"));
        let (ok, created, list) = (i.intern("200"), i.intern("201"), i.intern("List Books"));

        let set = TagSet::from_unsorted(smallvec![(status, ok), (group, list), (status, created)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(status), Some(created));
        assert_eq!(set.get(group), Some(list));
        assert_eq!(set.get(ok), None);
    }
}
