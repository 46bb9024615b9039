//! Spherical k-means over unit vectors.
//!
//! Centroids are seeded kmeans++-style, refined by alternating assignment
//! and mean-recomputation, and renormalized after every update so the dot
//! product stays a valid similarity throughout.

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::index::{dot, normalize};
use crate::types::IndexError;

/// Safeguard against oscillating assignments; the loop normally exits on
/// convergence (no assignment changed) well before this many passes.
const MAX_ITERATIONS: usize = 100;

/// Clusters `samples` into `k` unit-length centroids.
///
/// Samples must all share one dimension and be unit-normalized already.
/// `k` is clamped to the sample count; asking for zero clusters of a
/// non-empty sample set is an error, as is an empty sample set.
pub fn cluster_vectors<R: Rng>(
    samples: &[Vec<f32>],
    k: usize,
    rng: &mut R,
) -> Result<Vec<Vec<f32>>, IndexError> {
    if samples.is_empty() {
        return Err(IndexError::Clustering("no vectors to cluster".into()));
    }
    if k == 0 {
        return Err(IndexError::Clustering("cluster count must be positive".into()));
    }
    let dimension = samples[0].len();
    if samples.iter().any(|sample| sample.len() != dimension) {
        return Err(IndexError::Clustering(
            "sample vectors have mixed dimensions".into(),
        ));
    }
    let k = k.min(samples.len());

    let mut centroids = seed_centroids(samples, k, rng);
    let mut assignments = vec![0usize; samples.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (index, sample) in samples.iter().enumerate() {
            let best = nearest(&centroids, sample);
            if assignments[index] != best {
                assignments[index] = best;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f32; dimension]; k];
        let mut counts = vec![0usize; k];
        for (sample, &cluster) in samples.iter().zip(&assignments) {
            counts[cluster] += 1;
            for (accumulator, component) in sums[cluster].iter_mut().zip(sample) {
                *accumulator += component;
            }
        }

        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Reseed drained clusters from a random sample so every
                // centroid keeps covering part of the space.
                if let Some(sample) = samples.choose(rng) {
                    centroids[cluster] = sample.clone();
                }
                continue;
            }
            let mut mean = sums[cluster].clone();
            for component in mean.iter_mut() {
                *component /= counts[cluster] as f32;
            }
            normalize(&mut mean);
            centroids[cluster] = mean;
        }

        if !changed {
            break;
        }
    }

    Ok(centroids)
}

/// kmeans++ seeding: first centroid uniform, each further one drawn with
/// probability proportional to its distance from the nearest chosen seed.
fn seed_centroids<R: Rng>(samples: &[Vec<f32>], k: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    let first = rng.random_range(0..samples.len());
    centroids.push(samples[first].clone());

    while centroids.len() < k {
        let weights: Vec<f32> = samples
            .iter()
            .map(|sample| {
                let closest = centroids
                    .iter()
                    .map(|centroid| dot(centroid, sample))
                    .fold(f32::NEG_INFINITY, f32::max);
                // Unit vectors: dot in [-1, 1], so this distance is >= 0.
                (1.0 - closest).max(0.0)
            })
            .collect();

        let total: f32 = weights.iter().sum();
        let chosen = if total <= f32::EPSILON {
            rng.random_range(0..samples.len())
        } else {
            let mut threshold = rng.random_range(0.0..total);
            let mut pick = samples.len() - 1;
            for (index, weight) in weights.iter().enumerate() {
                if threshold < *weight {
                    pick = index;
                    break;
                }
                threshold -= weight;
            }
            pick
        };
        centroids.push(samples[chosen].clone());
    }

    centroids
}

fn nearest(centroids: &[Vec<f32>], sample: &[f32]) -> usize {
    let mut best = 0;
    let mut best_similarity = f32::NEG_INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let similarity = dot(centroid, sample);
        if similarity > best_similarity {
            best_similarity = similarity;
            best = index;
        }
    }
    best
}
