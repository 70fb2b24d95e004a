//! Weighted random tables.
//!
//! Distributions such as the mutation-type mix are plain data: a list of
//! `(value, weight)` pairs walked in order against a single draw.

use rand::Rng;

/// An ordered table of values with integer weights.
#[derive(Debug, Clone)]
pub struct WeightedTable<T> {
    entries: Vec<(T, u32)>,
    total: u32,
}

impl<T: Copy> WeightedTable<T> {
    /// Build a table. Returns `None` when the weights sum to zero or the sum
    /// does not fit in a `u32`.
    pub fn new(entries: Vec<(T, u32)>) -> Option<Self> {
        let total = entries
            .iter()
            .try_fold(0u32, |sum, (_, w)| sum.checked_add(*w))?;
        if total == 0 {
            return None;
        }
        Some(Self { entries, total })
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn entries(&self) -> &[(T, u32)] {
        &self.entries
    }

    /// Return the first value whose cumulative weight exceeds `r`.
    ///
    /// `r` is expected in `[0, total)`; larger values resolve to the last
    /// non-zero bucket.
    pub fn pick_at(&self, r: u32) -> T {
        let mut cumulative = 0u32;
        let mut last = self.entries[0].0;
        for (value, weight) in &self.entries {
            if *weight == 0 {
                continue;
            }
            cumulative += weight;
            last = *value;
            if cumulative > r {
                return *value;
            }
        }
        last
    }

    /// Draw `r` uniformly in `[0, total)` and pick the matching value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        self.pick_at(rng.gen_range(0..self.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn table() -> WeightedTable<char> {
        WeightedTable::new(vec![('a', 40), ('b', 25), ('c', 20), ('d', 15)]).unwrap()
    }

    #[test]
    fn test_zero_total_is_rejected() {
        assert!(WeightedTable::new(vec![('a', 0), ('b', 0)]).is_none());
        assert!(WeightedTable::<char>::new(Vec::new()).is_none());
    }

    #[test]
    fn test_overflowing_total_is_rejected() {
        assert!(WeightedTable::new(vec![('a', u32::MAX), ('b', 1)]).is_none());
        let t = WeightedTable::new(vec![('a', u32::MAX - 1), ('b', 1)]).unwrap();
        assert_eq!(t.total(), u32::MAX);
        assert_eq!(t.pick_at(u32::MAX - 1), 'b');
    }

    #[test]
    fn test_bucket_boundaries() {
        let t = table();
        assert_eq!(t.total(), 100);
        assert_eq!(t.pick_at(0), 'a');
        assert_eq!(t.pick_at(39), 'a');
        assert_eq!(t.pick_at(40), 'b');
        assert_eq!(t.pick_at(64), 'b');
        assert_eq!(t.pick_at(65), 'c');
        assert_eq!(t.pick_at(84), 'c');
        assert_eq!(t.pick_at(85), 'd');
        assert_eq!(t.pick_at(99), 'd');
    }

    #[test]
    fn test_zero_weight_buckets_are_never_picked() {
        let t = WeightedTable::new(vec![('a', 0), ('b', 10), ('c', 0)]).unwrap();
        for r in 0..10 {
            assert_eq!(t.pick_at(r), 'b');
        }
        assert_eq!(t.pick_at(500), 'b');
    }

    #[test]
    fn test_sampling_follows_weights() {
        let t = table();
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 20_000;
        let hits = (0..trials).filter(|_| t.sample(&mut rng) == 'a').count();
        let share = hits as f64 / trials as f64;
        assert!((share - 0.40).abs() < 0.02, "share was {share}");
    }
}
