// Nucleus (top-p) sampling over decoder logits

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;

/// Sampling knobs for one generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Softmax temperature. Zero or below means greedy decoding.
    pub temperature: f64,
    /// Smallest probability mass kept before drawing
    pub top_p: f64,
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for SamplingParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            seed: config.seed,
        }
    }
}

impl SamplingParams {
    /// Same params with the seed shifted, so seeded candidates still differ
    pub fn for_candidate(&self, index: usize) -> Self {
        Self {
            seed: self.seed.map(|s| s.wrapping_add(index as u64)),
            ..*self
        }
    }
}

pub struct NucleusSampler {
    params: SamplingParams,
    rng: StdRng,
}

impl NucleusSampler {
    pub fn new(params: SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { params, rng }
    }

    /// Pick the next token id.
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        if self.params.temperature <= 0.0 {
            return argmax(logits);
        }

        let temperature = self.params.temperature as f32;
        let max = logits
            .iter()
            .copied()
            .filter(|l| l.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return argmax(logits);
        }

        let mut probs: Vec<(usize, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| {
                let p = if l.is_finite() { ((l - max) / temperature).exp() } else { 0.0 };
                (i, p)
            })
            .collect();
        let total: f32 = probs.iter().map(|(_, p)| p).sum();
        probs.sort_by(|a, b| b.1.total_cmp(&a.1));

        // Keep the smallest prefix whose mass reaches top_p
        let threshold = self.params.top_p as f32 * total;
        let mut cumulative = 0.0;
        let mut keep = 0;
        for (_, p) in &probs {
            cumulative += p;
            keep += 1;
            if cumulative >= threshold {
                break;
            }
        }
        probs.truncate(keep.max(1));

        match WeightedIndex::new(probs.iter().map(|(_, p)| *p)) {
            Ok(dist) => probs[dist.sample(&mut self.rng)].0 as u32,
            Err(_) => probs[0].0 as u32,
        }
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// Output budget scaled to the input: `floor(chars * 1.2)`, capped.
pub fn max_new_tokens(source: &str, cap: usize) -> usize {
    let scaled = (source.chars().count() as f64 * 1.2).floor() as usize;
    scaled.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(temperature: f64, top_p: f64) -> SamplingParams {
        SamplingParams {
            temperature,
            top_p,
            seed: Some(7),
        }
    }

    #[test]
    fn test_zero_temperature_is_greedy() {
        let mut sampler = NucleusSampler::new(params(0.0, 0.95));
        assert_eq!(sampler.sample(&[0.1, 3.0, 2.9, -1.0]), 1);
    }

    #[test]
    fn test_small_top_p_keeps_only_the_head() {
        let mut sampler = NucleusSampler::new(params(1.0, 0.5));
        for _ in 0..50 {
            assert_eq!(sampler.sample(&[0.0, 5.0, 0.0, 0.0]), 1);
        }
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let logits = [1.0, 1.0, 1.0, 1.0, 1.0];
        let draw = |p: SamplingParams| {
            let mut sampler = NucleusSampler::new(p);
            (0..20).map(|_| sampler.sample(&logits)).collect::<Vec<_>>()
        };
        assert_eq!(draw(params(0.9, 1.0)), draw(params(0.9, 1.0)));
    }

    #[test]
    fn test_masked_logits_are_never_drawn() {
        let mut sampler = NucleusSampler::new(params(1.0, 1.0));
        for _ in 0..50 {
            assert_ne!(sampler.sample(&[f32::NEG_INFINITY, 0.0, 0.0]), 0);
        }
    }

    #[test]
    fn test_max_new_tokens() {
        assert_eq!(max_new_tokens("hello", 100), 6);
        assert_eq!(max_new_tokens(&"x".repeat(200), 100), 100);
        assert_eq!(max_new_tokens("", 100), 0);
    }

    #[test]
    fn test_candidate_seeds_differ() {
        let p = params(0.9, 0.95);
        assert_eq!(p.for_candidate(0).seed, Some(7));
        assert_eq!(p.for_candidate(2).seed, Some(9));
    }
}
