//! UMAP embedding of samples into two dimensions.
//!
//! A compact UMAP: brute-force k-nearest-neighbours, smooth-kNN calibration,
//! fuzzy-union symmetrization, and negative-sampling SGD on the standard
//! 1/(1 + a·d^{2b}) low-dimensional curve. The embedding is stochastic;
//! every random choice flows from the explicit `seed`, so a fixed
//! configuration reproduces the same layout exactly.

use crate::data::NormalizedMatrix;
use crate::error::{ProteoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// UMAP parameters.
///
/// Results depend on all of these; when comparing embeddings, report the
/// seed, neighbour count, and minimum distance alongside the plot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UmapConfig {
    /// Neighbourhood size for the fuzzy graph (clamped to n_samples − 1).
    pub n_neighbors: usize,
    /// Minimum spacing between embedded points.
    pub min_dist: f64,
    /// SGD epochs.
    pub n_epochs: usize,
    /// Repulsive samples drawn per attractive move.
    pub negative_samples: usize,
    /// Initial SGD learning rate, decayed linearly to zero.
    pub learning_rate: f64,
    /// Random seed controlling initialization and sampling.
    pub seed: u64,
}

impl Default for UmapConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            min_dist: 0.1,
            n_epochs: 300,
            negative_samples: 5,
            learning_rate: 1.0,
            seed: 42,
        }
    }
}

impl UmapConfig {
    /// Set the neighbour count.
    pub fn with_n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.n_neighbors = n_neighbors;
        self
    }

    /// Set the minimum embedded distance.
    pub fn with_min_dist(mut self, min_dist: f64) -> Self {
        self.min_dist = min_dist;
        self
    }

    /// Set the epoch count.
    pub fn with_n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_neighbors < 2 {
            return Err(ProteoError::InvalidParameter(
                "n_neighbors must be at least 2".to_string(),
            ));
        }
        if !(self.min_dist > 0.0) {
            return Err(ProteoError::InvalidParameter(
                "min_dist must be positive".to_string(),
            ));
        }
        if self.n_epochs == 0 {
            return Err(ProteoError::InvalidParameter(
                "n_epochs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// 2-D embedding of the samples.
#[derive(Debug, Clone)]
pub struct UmapResult {
    pub sample_ids: Vec<String>,
    /// One (x, y) pair per sample.
    pub embedding: Vec<[f64; 2]>,
    /// The configuration that produced the embedding.
    pub config: UmapConfig,
}

impl UmapResult {
    /// Write the embedding to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "sample_id\tumap1\tumap2")?;
        for (sid, point) in self.sample_ids.iter().zip(&self.embedding) {
            writeln!(writer, "{}\t{}\t{}", sid, point[0], point[1])?;
        }
        Ok(())
    }
}

/// Simple deterministic RNG (xorshift64).
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() as f64) / (u64::MAX as f64)
    }

    fn next_below(&mut self, n: usize) -> usize {
        (self.next_u64() as usize) % n
    }
}

/// Embed the samples of a normalized matrix into two dimensions.
pub fn umap(matrix: &NormalizedMatrix, config: &UmapConfig) -> Result<UmapResult> {
    config.validate()?;
    let n = matrix.n_samples();
    if n < 3 {
        return Err(ProteoError::DegenerateInput(
            "UMAP needs at least three samples".to_string(),
        ));
    }
    let k = config.n_neighbors.min(n - 1);

    // Sample vectors in protein space.
    let points: Vec<Vec<f64>> = (0..n).map(|j| matrix.col_dense(j)).collect();

    // Brute-force kNN.
    let mut neighbors: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut dists: Vec<(usize, f64)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (j, euclidean(&points[i], &points[j])))
            .collect();
        dists.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        dists.truncate(k);
        neighbors.push(dists);
    }

    // Smooth-kNN calibration: per-point rho and sigma.
    let target = (k as f64).log2();
    let mut weights: Vec<Vec<f64>> = Vec::with_capacity(n);
    for nbrs in &neighbors {
        let rho = nbrs
            .iter()
            .map(|&(_, d)| d)
            .fold(f64::INFINITY, f64::min)
            .min(f64::MAX);
        let sigma = calibrate_sigma(nbrs, rho, target);
        let w = nbrs
            .iter()
            .map(|&(_, d)| (-((d - rho).max(0.0)) / sigma).exp())
            .collect();
        weights.push(w);
    }

    // Fuzzy union: w = a + b − ab over symmetrized pairs.
    let mut directed: HashMap<(usize, usize), f64> = HashMap::new();
    for (i, nbrs) in neighbors.iter().enumerate() {
        for (pos, &(j, _)) in nbrs.iter().enumerate() {
            directed.insert((i, j), weights[i][pos]);
        }
    }
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    for (&(i, j), &w_ij) in &directed {
        if i < j {
            let w_ji = directed.get(&(j, i)).copied().unwrap_or(0.0);
            edges.push((i, j, w_ij + w_ji - w_ij * w_ji));
        } else if !directed.contains_key(&(j, i)) {
            edges.push((j, i, w_ij));
        }
    }
    // Deterministic edge order regardless of map iteration.
    edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let (a, b) = fit_ab(config.min_dist);

    // Seeded uniform init.
    let mut rng = Rng::new(config.seed);
    let mut embedding: Vec<[f64; 2]> = (0..n)
        .map(|_| {
            [
                20.0 * rng.next_f64() - 10.0,
                20.0 * rng.next_f64() - 10.0,
            ]
        })
        .collect();

    // Edge sampling schedule proportional to weight.
    let max_weight = edges
        .iter()
        .map(|&(_, _, w)| w)
        .fold(0.0f64, f64::max)
        .max(1e-12);
    let epochs_per_sample: Vec<f64> = edges
        .iter()
        .map(|&(_, _, w)| max_weight / w.max(1e-12))
        .collect();
    let mut next_sample: Vec<f64> = epochs_per_sample.clone();

    for epoch in 0..config.n_epochs {
        let alpha =
            config.learning_rate * (1.0 - epoch as f64 / config.n_epochs as f64);
        for (e, &(i, j, _)) in edges.iter().enumerate() {
            if next_sample[e] > (epoch + 1) as f64 {
                continue;
            }
            next_sample[e] += epochs_per_sample[e];

            let d2 = sq_dist(&embedding[i], &embedding[j]);
            if d2 > 0.0 {
                let grad_coef =
                    (-2.0 * a * b * d2.powf(b - 1.0)) / (1.0 + a * d2.powf(b));
                for dim in 0..2 {
                    let g = clip(grad_coef * (embedding[i][dim] - embedding[j][dim]));
                    embedding[i][dim] += alpha * g;
                    embedding[j][dim] -= alpha * g;
                }
            }

            for _ in 0..config.negative_samples {
                let other = rng.next_below(n);
                if other == i {
                    continue;
                }
                let d2 = sq_dist(&embedding[i], &embedding[other]);
                let grad_coef =
                    2.0 * b / ((0.001 + d2) * (1.0 + a * d2.powf(b)));
                for dim in 0..2 {
                    let diff = embedding[i][dim] - embedding[other][dim];
                    let g = if d2 > 0.0 { clip(grad_coef * diff) } else { 4.0 };
                    embedding[i][dim] += alpha * g;
                }
            }
        }
    }

    Ok(UmapResult {
        sample_ids: matrix.sample_ids().to_vec(),
        embedding,
        config: *config,
    })
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn sq_dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn clip(v: f64) -> f64 {
    v.clamp(-4.0, 4.0)
}

/// Binary search for the kernel bandwidth so the smoothed neighbour weights
/// sum to log2(k).
fn calibrate_sigma(neighbors: &[(usize, f64)], rho: f64, target: f64) -> f64 {
    let mut lo = 1e-6;
    let mut hi = 1e3;
    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        let sum: f64 = neighbors
            .iter()
            .map(|&(_, d)| (-((d - rho).max(0.0)) / mid).exp())
            .sum();
        if sum > target {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Fit the (a, b) parameters of the low-dimensional curve from min_dist.
///
/// Matches the usual least-squares fit of 1/(1 + a·d^{2b}) to the ideal
/// membership curve (1 below min_dist, exponential decay above), done here
/// by a coarse grid search followed by a fine pass. Deterministic.
fn fit_ab(min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (1..=300).map(|i| i as f64 * 0.01).collect();
    let targets: Vec<f64> = xs
        .iter()
        .map(|&d| {
            if d <= min_dist {
                1.0
            } else {
                (-(d - min_dist)).exp()
            }
        })
        .collect();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&targets)
            .map(|(&d, &t)| {
                let phi = 1.0 / (1.0 + a * d.powf(2.0 * b));
                (phi - t) * (phi - t)
            })
            .sum()
    };

    let mut best = (1.0, 1.0);
    let mut best_err = f64::INFINITY;
    for ai in 1..=100 {
        for bi in 1..=25 {
            let a = ai as f64 * 0.1;
            let b = bi as f64 * 0.1;
            let err = sse(a, b);
            if err < best_err {
                best_err = err;
                best = (a, b);
            }
        }
    }
    // Fine pass around the coarse optimum.
    let (ca, cb) = best;
    for ai in -10..=10 {
        for bi in -10..=10 {
            let a = (ca + ai as f64 * 0.01).max(0.01);
            let b = (cb + bi as f64 * 0.01).max(0.05);
            let err = sse(a, b);
            if err < best_err {
                best_err = err;
                best = (a, b);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn cluster_matrix() -> NormalizedMatrix {
        // Two well-separated clusters of 8 samples in 10-protein space.
        let n_proteins = 10;
        let n_samples = 16;
        let data = DMatrix::from_fn(n_proteins, n_samples, |i, j| {
            let center = if j < 8 { 0.0 } else { 100.0 };
            center + ((i * 7 + j * 3) % 5) as f64 * 0.2
        });
        let protein_ids = (0..n_proteins).map(|i| format!("P{}", i)).collect();
        let sample_ids = (0..n_samples).map(|j| format!("S{}", j)).collect();
        NormalizedMatrix::new(data, protein_ids, sample_ids).unwrap()
    }

    #[test]
    fn test_same_seed_reproduces_embedding() {
        let matrix = cluster_matrix();
        let config = UmapConfig::default()
            .with_n_neighbors(4)
            .with_n_epochs(50);
        let a = umap(&matrix, &config).unwrap();
        let b = umap(&matrix, &config).unwrap();
        assert_eq!(a.embedding, b.embedding);
    }

    #[test]
    fn test_different_seed_differs() {
        let matrix = cluster_matrix();
        let config = UmapConfig::default()
            .with_n_neighbors(4)
            .with_n_epochs(50);
        let a = umap(&matrix, &config).unwrap();
        let b = umap(&matrix, &config.with_seed(7)).unwrap();
        assert_ne!(a.embedding, b.embedding);
    }

    #[test]
    fn test_embedding_is_finite() {
        let matrix = cluster_matrix();
        let config = UmapConfig::default().with_n_neighbors(4);
        let result = umap(&matrix, &config).unwrap();
        assert_eq!(result.embedding.len(), 16);
        for point in &result.embedding {
            assert!(point[0].is_finite() && point[1].is_finite());
        }
    }

    #[test]
    fn test_clusters_stay_separated() {
        let matrix = cluster_matrix();
        let config = UmapConfig::default()
            .with_n_neighbors(4)
            .with_n_epochs(200);
        let result = umap(&matrix, &config).unwrap();

        let mut intra = Vec::new();
        let mut inter = Vec::new();
        for i in 0..16 {
            for j in (i + 1)..16 {
                let d = sq_dist(&result.embedding[i], &result.embedding[j]).sqrt();
                if (i < 8) == (j < 8) {
                    intra.push(d);
                } else {
                    inter.push(d);
                }
            }
        }
        let mean_intra: f64 = intra.iter().sum::<f64>() / intra.len() as f64;
        let mean_inter: f64 = inter.iter().sum::<f64>() / inter.len() as f64;
        assert!(
            mean_intra < mean_inter,
            "intra {} should be below inter {}",
            mean_intra,
            mean_inter
        );
    }

    #[test]
    fn test_too_few_samples() {
        let data = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let matrix = NormalizedMatrix::new(
            data,
            vec!["P0".into(), "P1".into()],
            vec!["S0".into(), "S1".into()],
        )
        .unwrap();
        assert!(umap(&matrix, &UmapConfig::default()).is_err());
    }

    #[test]
    fn test_fit_ab_reasonable() {
        // For min_dist = 0.1 the canonical fit is roughly a≈1.58, b≈0.90.
        let (a, b) = fit_ab(0.1);
        assert!(a > 1.0 && a < 2.2, "a = {}", a);
        assert!(b > 0.7 && b < 1.1, "b = {}", b);
    }
}
