//! Antithetic evolution-strategy primitives: population sampling, reward
//! normalization and the parameter update.

use super::config::RewardNormalization;
use crate::core::utils::stats::{average_ranks, mean, std_dev};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// SplitMix64 finalizer over `(seed, generation, pair)`.
fn pair_seed(seed: u64, generation: u64, pair: u64) -> u64 {
    let mut z = seed
        ^ generation.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ pair.wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One generation's perturbations. Member `2k` is `theta + eps_k`, member
/// `2k + 1` is `theta - eps_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    generation: u64,
    noise: Vec<Vec<f32>>,
}

impl Population {
    /// Draws `pair_count` isotropic Gaussian perturbations with standard
    /// deviation `sigma`. Each pair has its own seeded stream, so the result
    /// does not depend on sampling order or thread count.
    pub fn sample(seed: u64, generation: u64, pair_count: usize, dimension: usize, sigma: f64) -> Self {
        let pairs: Vec<u64> = (0..pair_count as u64).collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = pairs.iter();

        #[cfg(feature = "parallel")]
        let iterator = pairs.par_iter();

        let noise = iterator
            .map(|&pair| {
                let mut rng = StdRng::seed_from_u64(pair_seed(seed, generation, pair));
                (0..dimension)
                    .map(|_| (rng.sample::<f64, _>(StandardNormal) * sigma) as f32)
                    .collect()
            })
            .collect();
        Self { generation, noise }
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn pair_count(&self) -> usize {
        self.noise.len()
    }

    #[inline]
    pub fn member_count(&self) -> usize {
        2 * self.noise.len()
    }

    pub fn noise(&self, pair: usize) -> &[f32] {
        &self.noise[pair]
    }

    /// `base +- eps` for member `member`.
    pub fn member_parameters(&self, base: &[f32], member: usize) -> Vec<f32> {
        let eps = &self.noise[member / 2];
        if member % 2 == 0 {
            base.iter().zip(eps).map(|(t, e)| t + e).collect()
        } else {
            base.iter().zip(eps).map(|(t, e)| t - e).collect()
        }
    }
}

/// Maps raw rewards to a scale-free signal.
///
/// `Rank` gives centered average ranks in `[-0.5, 0.5]`; `ZScore` divides the
/// deviation from the mean by the population standard deviation. Constant
/// rewards normalize to zeros under both methods.
pub fn normalize_rewards(rewards: &[f64], method: RewardNormalization) -> Vec<f64> {
    let n = rewards.len();
    if n < 2 {
        return vec![0.0; n];
    }
    match method {
        RewardNormalization::Rank => average_ranks(rewards)
            .into_iter()
            .map(|rank| (rank - 1.0) / (n - 1) as f64 - 0.5)
            .collect(),
        RewardNormalization::ZScore => {
            let (Some(m), Some(s)) = (mean(rewards), std_dev(rewards)) else {
                return vec![0.0; n];
            };
            if s <= f64::EPSILON * m.abs().max(1.0) {
                return vec![0.0; n];
            }
            rewards.iter().map(|r| (r - m) / s).collect()
        }
    }
}

/// `step / (n * sigma) * sum_k (r+_k - r-_k) * eps_k`, accumulated in `f64`
/// strictly in pair order.
pub fn compute_update(population: &Population, normalized: &[f64], step_size: f64, sigma: f64) -> Vec<f64> {
    let dimension = population.noise.first().map_or(0, Vec::len);
    let scale = step_size / (population.member_count() as f64 * sigma);
    let mut delta = vec![0.0f64; dimension];
    for (k, eps) in population.noise.iter().enumerate() {
        let difference = normalized[2 * k] - normalized[2 * k + 1];
        if difference == 0.0 {
            continue;
        }
        let coefficient = scale * difference;
        for (d, &e) in delta.iter_mut().zip(eps) {
            *d += coefficient * e as f64;
        }
    }
    delta
}

/// Adds `delta` to `theta` in `f64`, storing the result as `f32`.
pub fn apply_update(theta: &mut [f32], delta: &[f64]) {
    for (t, d) in theta.iter_mut().zip(delta) {
        *t = (*t as f64 + d) as f32;
    }
}
