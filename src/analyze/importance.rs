//! Random-forest feature importance for clinical metadata.
//!
//! Fits a forest of Gini-split decision trees predicting a categorical
//! response (typically `Mechanism_Code`) from the remaining metadata
//! fields, under repeated stratified k-fold cross-validation for stability.
//! Importance is mean decrease in Gini impurity, normalized to sum to one,
//! so the ranking is invariant to predictor scale.

use crate::analyze::correlation::ExcludedVariable;
use crate::data::{SampleMetadata, Variable};
use crate::error::{ProteoError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Forest and cross-validation parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportanceConfig {
    /// Trees per forest.
    pub n_trees: usize,
    /// Cross-validation folds.
    pub k_folds: usize,
    /// Cross-validation repeats.
    pub repeats: usize,
    /// Minimum samples in a leaf.
    pub min_leaf: usize,
    /// Features tried per split; `None` means ⌈√p⌉.
    pub mtry: Option<usize>,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Random seed controlling bootstraps, feature subsets, and folds.
    pub seed: u64,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            n_trees: 200,
            k_folds: 10,
            repeats: 3,
            min_leaf: 1,
            mtry: None,
            max_depth: 16,
            seed: 42,
        }
    }
}

impl ImportanceConfig {
    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the tree count.
    pub fn with_n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    /// Set folds and repeats.
    pub fn with_cv(mut self, k_folds: usize, repeats: usize) -> Self {
        self.k_folds = k_folds;
        self.repeats = repeats;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_trees == 0 || self.k_folds < 2 || self.repeats == 0 {
            return Err(ProteoError::InvalidParameter(
                "need n_trees >= 1, k_folds >= 2, repeats >= 1".to_string(),
            ));
        }
        if self.min_leaf == 0 {
            return Err(ProteoError::InvalidParameter(
                "min_leaf must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One feature's normalized importance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Ranked importances plus cross-validated accuracy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceResult {
    /// Features sorted by descending importance (ties by name).
    pub ranking: Vec<FeatureImportance>,
    /// Predictors excluded before fitting, with reasons.
    pub excluded: Vec<ExcludedVariable>,
    /// Mean held-out accuracy over all CV models.
    pub mean_accuracy: f64,
    /// Standard deviation of held-out accuracy.
    pub sd_accuracy: f64,
    /// Number of CV models fitted.
    pub n_models: usize,
}

impl ImportanceResult {
    /// Write the ranking to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "feature\timportance")?;
        for item in &self.ranking {
            writeln!(writer, "{}\t{}", item.feature, item.importance)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ImportanceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Feature importance ({} CV models)", self.n_models)?;
        writeln!(
            f,
            "  Held-out accuracy: {:.3} +/- {:.3}",
            self.mean_accuracy, self.sd_accuracy
        )?;
        for item in &self.ranking {
            writeln!(f, "  {:<24} {:.4}", item.feature, item.importance)?;
        }
        for ex in &self.excluded {
            writeln!(f, "  excluded {}: {}", ex.name, ex.reason)?;
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

    fn next_below(&mut self, n: usize) -> usize {
        (self.next_u64() as usize) % n
    }

    /// Fisher-Yates shuffle.
    fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.next_below(i + 1);
            slice.swap(i, j);
        }
    }
}

/// Rank metadata features by their contribution to predicting a response.
pub fn feature_importance(
    metadata: &SampleMetadata,
    response: &str,
    fields: &[String],
    config: &ImportanceConfig,
) -> Result<ImportanceResult> {
    config.validate()?;
    if fields.iter().any(|f| f == response) {
        return Err(ProteoError::InvalidParameter(format!(
            "response '{}' cannot also be a predictor",
            response
        )));
    }

    // Samples with an observed response.
    let response_values = metadata.column(response)?;
    let levels = response_levels(metadata, response)?;
    let mut rows = Vec::new();
    let mut y = Vec::new();
    for (idx, value) in response_values.iter().enumerate() {
        if let Some(label) = encode_label(value, &levels) {
            rows.push(idx);
            y.push(label);
        }
    }
    let observed: std::collections::HashSet<usize> = y.iter().copied().collect();
    if observed.len() < 2 {
        return Err(ProteoError::DegenerateInput(format!(
            "response '{}' has fewer than two observed levels",
            response
        )));
    }

    // Encode predictors, excluding degenerate ones; impute median.
    let mut feature_names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut excluded = Vec::new();
    for field in fields {
        let encoded = metadata.encode_numeric(field)?;
        let values: Vec<Option<f64>> = rows.iter().map(|&i| encoded[i]).collect();
        let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
        if present.is_empty() {
            excluded.push(ExcludedVariable {
                name: field.clone(),
                reason: "all values missing".to_string(),
            });
            continue;
        }
        let first = present[0];
        if present.iter().all(|&v| v == first) {
            excluded.push(ExcludedVariable {
                name: field.clone(),
                reason: "zero variance".to_string(),
            });
            continue;
        }
        let fill = median(&present);
        columns.push(values.iter().map(|v| v.unwrap_or(fill)).collect());
        feature_names.push(field.clone());
    }
    if feature_names.is_empty() {
        return Err(ProteoError::DegenerateInput(
            "no usable predictor remains after exclusions".to_string(),
        ));
    }

    let n = rows.len();
    let p = feature_names.len();
    let x: Vec<Vec<f64>> = (0..n)
        .map(|i| columns.iter().map(|col| col[i]).collect())
        .collect();
    let n_classes = levels.len();
    let mtry = config.mtry.unwrap_or_else(|| (p as f64).sqrt().ceil() as usize);
    let mtry = mtry.clamp(1, p);

    // Repeated stratified k-fold.
    let mut importance_sum = vec![0.0f64; p];
    let mut accuracies = Vec::new();
    for repeat in 0..config.repeats {
        let mut fold_rng = Rng::new(config.seed.wrapping_add(repeat as u64).wrapping_mul(0x9E37_79B9));
        let folds = stratified_folds(&y, config.k_folds, &mut fold_rng);
        for fold in 0..config.k_folds {
            let test: Vec<usize> = (0..n).filter(|&i| folds[i] == fold).collect();
            let train: Vec<usize> = (0..n).filter(|&i| folds[i] != fold).collect();
            if test.is_empty() || train.is_empty() {
                continue;
            }
            let train_classes: std::collections::HashSet<usize> =
                train.iter().map(|&i| y[i]).collect();
            if train_classes.len() < 2 {
                continue;
            }

            let forest_seed = config
                .seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add((repeat * config.k_folds + fold) as u64);
            let forest = Forest::fit(
                &x,
                &y,
                &train,
                n_classes,
                mtry,
                config,
                forest_seed,
            );

            let correct = test
                .iter()
                .filter(|&&i| forest.predict(&x[i]) == y[i])
                .count();
            accuracies.push(correct as f64 / test.len() as f64);
            for (fi, imp) in forest.importance.iter().enumerate() {
                importance_sum[fi] += imp;
            }
        }
    }
    if accuracies.is_empty() {
        return Err(ProteoError::DegenerateInput(
            "no cross-validation fold produced a usable model".to_string(),
        ));
    }

    let total: f64 = importance_sum.iter().sum();
    let mut ranking: Vec<FeatureImportance> = feature_names
        .iter()
        .zip(&importance_sum)
        .map(|(name, &imp)| FeatureImportance {
            feature: name.clone(),
            importance: if total > 0.0 { imp / total } else { 0.0 },
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });

    let mean_accuracy = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    let sd_accuracy = if accuracies.len() > 1 {
        (accuracies
            .iter()
            .map(|a| (a - mean_accuracy).powi(2))
            .sum::<f64>()
            / (accuracies.len() - 1) as f64)
            .sqrt()
    } else {
        0.0
    };

    Ok(ImportanceResult {
        ranking,
        excluded,
        mean_accuracy,
        sd_accuracy,
        n_models: accuracies.len(),
    })
}

fn response_levels(metadata: &SampleMetadata, response: &str) -> Result<Vec<String>> {
    match metadata.column_type(response) {
        Some(crate::data::VariableType::Categorical) => metadata.levels(response),
        _ => {
            // Numeric responses are treated as categorical codes.
            let values = metadata.column(response)?;
            let mut levels: Vec<String> = values
                .iter()
                .filter_map(|v| v.as_continuous())
                .map(|v| format!("{}", v))
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();
            levels.sort();
            Ok(levels)
        }
    }
}

fn encode_label(value: &Variable, levels: &[String]) -> Option<usize> {
    match value {
        Variable::Missing => None,
        Variable::Categorical(s) => levels.iter().position(|l| l == s),
        Variable::Continuous(v) => {
            let s = format!("{}", v);
            levels.iter().position(|l| *l == s)
        }
    }
}

/// Deal each class's shuffled indices round-robin over the folds.
fn stratified_folds(y: &[usize], k: usize, rng: &mut Rng) -> Vec<usize> {
    let n_classes = y.iter().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut folds = vec![0usize; y.len()];
    let mut cursor = 0usize;
    for class in 0..n_classes {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        rng.shuffle(&mut members);
        for idx in members {
            folds[idx] = cursor % k;
            cursor += 1;
        }
    }
    folds
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

enum Node {
    Leaf {
        class: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct Tree {
    root: Node,
    /// Gini decrease accumulated per feature.
    importance: Vec<f64>,
}

struct Forest {
    trees: Vec<Tree>,
    n_classes: usize,
    /// Summed Gini decrease per feature across trees.
    importance: Vec<f64>,
}

impl Forest {
    fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        train: &[usize],
        n_classes: usize,
        mtry: usize,
        config: &ImportanceConfig,
        seed: u64,
    ) -> Self {
        let p = x[0].len();
        let trees: Vec<Tree> = (0..config.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = Rng::new(seed.wrapping_add(t as u64).wrapping_mul(0x2545_F491_4F6C_DD1D));
                // Bootstrap sample of the training indices.
                let sample: Vec<usize> = (0..train.len())
                    .map(|_| train[rng.next_below(train.len())])
                    .collect();
                let mut importance = vec![0.0f64; p];
                let root = grow(
                    x,
                    y,
                    &sample,
                    n_classes,
                    mtry,
                    config,
                    0,
                    sample.len(),
                    &mut rng,
                    &mut importance,
                );
                Tree { root, importance }
            })
            .collect();

        let mut importance = vec![0.0f64; p];
        for tree in &trees {
            for (fi, imp) in tree.importance.iter().enumerate() {
                importance[fi] += imp;
            }
        }
        Self {
            trees,
            n_classes,
            importance,
        }
    }

    fn predict(&self, row: &[f64]) -> usize {
        let mut votes = vec![0usize; self.n_classes];
        for tree in &self.trees {
            votes[predict_node(&tree.root, row)] += 1;
        }
        // Majority vote; tie broken toward the smaller class index.
        let mut best = 0;
        for class in 1..self.n_classes {
            if votes[class] > votes[best] {
                best = class;
            }
        }
        best
    }
}

fn predict_node(node: &Node, row: &[f64]) -> usize {
    match node {
        Node::Leaf { class } => *class,
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] <= *threshold {
                predict_node(left, row)
            } else {
                predict_node(right, row)
            }
        }
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let mut g = 1.0;
    for &c in counts {
        let f = c as f64 / n as f64;
        g -= f * f;
    }
    g
}

fn majority(counts: &[usize]) -> usize {
    let mut best = 0;
    for class in 1..counts.len() {
        if counts[class] > counts[best] {
            best = class;
        }
    }
    best
}

#[allow(clippy::too_many_arguments)]
fn grow(
    x: &[Vec<f64>],
    y: &[usize],
    indices: &[usize],
    n_classes: usize,
    mtry: usize,
    config: &ImportanceConfig,
    depth: usize,
    n_total: usize,
    rng: &mut Rng,
    importance: &mut [f64],
) -> Node {
    let n = indices.len();
    let mut counts = vec![0usize; n_classes];
    for &i in indices {
        counts[y[i]] += 1;
    }
    let node_gini = gini(&counts, n);
    if node_gini == 0.0 || depth >= config.max_depth || n < 2 * config.min_leaf {
        return Node::Leaf {
            class: majority(&counts),
        };
    }

    // Random feature subset: partial Fisher-Yates over the feature indices.
    let p = x[0].len();
    let mut features: Vec<usize> = (0..p).collect();
    for i in 0..mtry.min(p) {
        let j = i + rng.next_below(p - i);
        features.swap(i, j);
    }
    features.truncate(mtry.min(p));

    let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, decrease)
    for &feature in &features {
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| {
            x[a][feature]
                .partial_cmp(&x[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_counts = vec![0usize; n_classes];
        for split in 1..n {
            let prev = order[split - 1];
            left_counts[y[prev]] += 1;
            let prev_val = x[prev][feature];
            let next_val = x[order[split]][feature];
            if prev_val == next_val {
                continue;
            }
            if split < config.min_leaf || n - split < config.min_leaf {
                continue;
            }
            let right_counts: Vec<usize> = counts
                .iter()
                .zip(&left_counts)
                .map(|(&t, &l)| t - l)
                .collect();
            let weighted = (split as f64 * gini(&left_counts, split)
                + (n - split) as f64 * gini(&right_counts, n - split))
                / n as f64;
            let decrease = node_gini - weighted;
            let is_better = match best {
                None => decrease > 1e-12,
                Some((_, _, best_dec)) => decrease > best_dec + 1e-12,
            };
            if is_better {
                best = Some((feature, 0.5 * (prev_val + next_val), decrease));
            }
        }
    }

    match best {
        None => Node::Leaf {
            class: majority(&counts),
        },
        Some((feature, threshold, decrease)) => {
            // Weight by the node's share of the bootstrap sample.
            importance[feature] += decrease * n as f64 / n_total as f64;
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| x[i][feature] <= threshold);
            let left = grow(
                x, y, &left_idx, n_classes, mtry, config, depth + 1, n_total, rng,
                importance,
            );
            let right = grow(
                x, y, &right_idx, n_classes, mtry, config, depth + 1, n_total, rng,
                importance,
            );
            Node::Split {
                feature,
                threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
    }
}
