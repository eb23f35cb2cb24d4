use rand::Rng;

use crate::config::Scenario;
use crate::error::{Error, Result};

/// Picks scenario indices with probability proportional to their weight.
/// Cumulative-weight table + binary search, O(log n) per pick.
#[derive(Debug, Clone)]
pub struct WeightedPicker {
    cumulative: Vec<f64>,
    total: f64,
}

impl WeightedPicker {
    pub fn new(scenarios: &[Scenario]) -> Result<Self> {
        Self::from_weights(scenarios.iter().map(|s| s.weight))
    }

    pub fn from_weights(weights: impl IntoIterator<Item = f64>) -> Result<Self> {
        let mut cumulative = Vec::new();
        let mut total = 0.0f64;

        for w in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidWeights);
            }
            total += w;
            cumulative.push(total);
        }

        if total <= 0.0 {
            return Err(Error::InvalidWeights);
        }

        Ok(Self { cumulative, total })
    }

    #[must_use]
    pub fn pick(&self) -> usize {
        self.pick_with(&mut rand::rng())
    }

    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let x: f64 = rng.random_range(0.0..self.total);
        let idx = self.cumulative.partition_point(|&end| end <= x);
        idx.min(self.cumulative.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn rejects_invalid_weight_lists() {
        assert!(WeightedPicker::from_weights([]).is_err());
        assert!(WeightedPicker::from_weights([0.0, 0.0]).is_err());
        assert!(WeightedPicker::from_weights([1.0, -1.0]).is_err());
        assert!(WeightedPicker::from_weights([1.0, f64::NAN]).is_err());
    }

    #[test]
    fn zero_weight_scenarios_are_never_picked() {
        let picker = match WeightedPicker::from_weights([0.0, 1.0, 0.0]) {
            Ok(p) => p,
            Err(err) => panic!("picker: {err}"),
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert_eq!(picker.pick_with(&mut rng), 1);
        }
    }

    #[test]
    fn draws_converge_to_weight_ratio() {
        // {A: 1, B: 3} should converge to a 25/75 split.
        let picker = match WeightedPicker::from_weights([1.0, 3.0]) {
            Ok(p) => p,
            Err(err) => panic!("picker: {err}"),
        };

        let mut rng = StdRng::seed_from_u64(42);
        let n = 10_000;
        let mut counts = [0usize; 2];
        for _ in 0..n {
            counts[picker.pick_with(&mut rng)] += 1;
        }

        let share_a = counts[0] as f64 / n as f64;
        assert!((share_a - 0.25).abs() < 0.02, "share_a={share_a}");
    }

    #[test]
    fn same_weights_produce_same_distribution() {
        let a = match WeightedPicker::from_weights([2.0, 6.0]) {
            Ok(p) => p,
            Err(err) => panic!("picker: {err}"),
        };
        let b = match WeightedPicker::from_weights([2.0, 6.0]) {
            Ok(p) => p,
            Err(err) => panic!("picker: {err}"),
        };

        // Identical seeds walk identical cumulative tables.
        let mut rng_a = StdRng::seed_from_u64(1);
        let mut rng_b = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(a.pick_with(&mut rng_a), b.pick_with(&mut rng_b));
        }
    }
}
