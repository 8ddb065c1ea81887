//! Rule extraction from a trained autoencoder, and the mining strategy seam.
//!
//! The extraction engine enumerates every non-empty subset of category blocks up to
//! `max_antecedents` blocks. For each subset it builds all combinatorially-marked probe
//! vectors: unmarked blocks hold a uniform distribution (`1/width` per cell) and the marked
//! blocks take every possible one-active-cell assignment (a Cartesian product across the
//! marked blocks, enumerated with an iterative odometer rather than recursion).
//!
//! A probe is accepted only when the model reconstructs every marked antecedent cell with a
//! probability at or above the similarity threshold: the model must be self-consistent about
//! the forced antecedents, not merely pass them through. For accepted probes, every other cell
//! clearing the threshold becomes one binary rule (`A → B ∧ C` splits into `A → B` and
//! `A → C`). Antecedent cells never imply themselves, and a single-cell antecedent never
//! implies a sibling value of its own block.
//!
//! Identical probe vectors reached through different subset enumerations are evaluated at most
//! once. Probe count grows combinatorially with `max_antecedents` and per-block cardinality;
//! that trade-off is the knob `max_antecedents` exposes.

use super::autoencoder::AutoEncoder;
use super::encoder::{CategoryBlock, EncodedTransactions, FeatureDescriptor};
use super::knowledge_graph::KnowledgeGraph;
use super::rule_quality::RuleStats;
use super::trainer::Trainer;
use super::transaction::Transaction;
use anyhow::Result;
use fxhash::FxHashSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// An association rule between encoded features, enriched with quality metrics after
/// extraction by the rule quality evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    /// The "if" side: one descriptor per marked antecedent cell.
    pub antecedents: Vec<FeatureDescriptor>,

    /// The "then" side: a single implied feature.
    pub consequent: FeatureDescriptor,

    /// Quality metrics, zeroed until the evaluator fills them in.
    pub stats: RuleStats,
}

/// Configuration surface of the mining pipeline. Defaults mirror the reference settings.
#[derive(Debug, Clone)]
pub struct MinerOptions {
    /// Number of bins to discretize sensor measurements into.
    pub num_bins: usize,

    /// Maximum hop distance when resolving a sensor's placement node.
    pub num_neighbors: usize,

    /// Maximum number of antecedent features per rule.
    pub max_antecedents: usize,

    /// Implication probability a cell must reach to count as antecedent-consistent or as a
    /// consequent.
    pub similarity_threshold: f32,

    /// Standard deviation of the Gaussian corruption applied during training.
    pub noise_factor: f32,

    /// Fixed number of training epochs.
    pub epochs: usize,

    /// Adam learning rate.
    pub learning_rate: f32,

    /// L2 weight decay.
    pub weight_decay: f32,

    /// Checkpoint stem for model persistence; `None` disables save/load.
    pub checkpoint: Option<PathBuf>,
}

impl Default for MinerOptions {
    fn default() -> Self {
        Self {
            num_bins: 10,
            num_neighbors: 1,
            max_antecedents: 2,
            similarity_threshold: 0.8,
            noise_factor: 0.5,
            epochs: 5,
            learning_rate: 5e-3,
            weight_decay: 2e-8,
            checkpoint: None,
        }
    }
}

/// Common capability of all rule-mining strategies: turn transactions plus their
/// knowledge-graph context into a list of rules. Decouples the quality evaluator from any
/// particular extraction approach.
pub trait RuleMiningStrategy {
    /// Mines association rules from the given transactions.
    fn mine(
        &mut self,
        graph: &KnowledgeGraph,
        transactions: &[Transaction],
    ) -> Result<Vec<Rule>>;
}

/// Enumerates all index combinations of size `1..=max_size` out of `count` elements, in
/// ascending lexicographic order. The empty combination is excluded.
pub fn feature_combinations(count: usize, max_size: usize) -> Vec<Vec<usize>> {
    let mut combinations = Vec::new();
    for size in 1..=max_size.min(count) {
        let mut indices: Vec<usize> = (0..size).collect();
        loop {
            combinations.push(indices.clone());
            // Find the rightmost index that can still advance.
            let mut position = size;
            while position > 0 && indices[position - 1] == count - size + (position - 1) {
                position -= 1;
            }
            if position == 0 {
                break;
            }
            indices[position - 1] += 1;
            for next in position..size {
                indices[next] = indices[next - 1] + 1;
            }
        }
    }
    combinations
}

/// Extracts rules by probing a trained model.
pub struct RuleExtractor {
    /// Maximum number of marked blocks per probe.
    pub max_antecedents: usize,

    /// Acceptance threshold for antecedent self-consistency and consequent harvest.
    pub similarity_threshold: f32,
}

impl RuleExtractor {
    /// Creates an extractor with the given limits.
    #[inline]
    pub fn new(max_antecedents: usize, similarity_threshold: f32) -> Self {
        Self {
            max_antecedents,
            similarity_threshold,
        }
    }

    /// Probes the trained model over every marked feature combination and harvests
    /// high-probability consequents. The category layout of the first transaction is taken
    /// as the layout of the whole corpus.
    pub fn extract(&self, model: &AutoEncoder, corpus: &EncodedTransactions) -> Vec<Rule> {
        let Some(blocks) = corpus.category_indices.first() else {
            return Vec::new();
        };
        let tracker = &corpus.trackers[0];
        let width = corpus.data_size();

        let uniform_base = uniform_vector(width, blocks);
        let mut seen_probes: FxHashSet<Vec<(usize, usize)>> = FxHashSet::default();
        let mut rules = Vec::new();
        let mut probes = 0usize;

        for combination in feature_combinations(blocks.len(), self.max_antecedents) {
            let marked: Vec<CategoryBlock> =
                combination.iter().map(|&index| blocks[index]).collect();

            let mut odometer = vec![0usize; marked.len()];
            loop {
                if seen_probes.insert(probe_key(&combination, &odometer, blocks)) {
                    probes += 1;
                    let (probe, antecedent_cells) =
                        build_probe(&uniform_base, &marked, &odometer);
                    let output = model.forward(&probe, blocks);

                    if self.antecedents_consistent(&output, &antecedent_cells) {
                        for consequent in harvest_consequents(
                            &output,
                            &antecedent_cells,
                            &marked,
                            self.similarity_threshold,
                        ) {
                            rules.push(Rule {
                                antecedents: antecedent_cells
                                    .iter()
                                    .map(|&cell| tracker[cell].clone())
                                    .collect(),
                                consequent: tracker[consequent].clone(),
                                stats: RuleStats::default(),
                            });
                        }
                    }
                }

                if !advance_odometer(&mut odometer, &marked) {
                    break;
                }
            }
        }

        debug!(probes, rules = rules.len(), "rule extraction finished");
        rules
    }

    /// The self-consistency filter: every forced antecedent cell must be reconstructed with
    /// at least the similarity threshold.
    #[inline]
    fn antecedents_consistent(&self, output: &[f32], antecedent_cells: &[usize]) -> bool {
        antecedent_cells
            .iter()
            .all(|&cell| output[cell] >= self.similarity_threshold)
    }
}

/// A vector with every block holding a uniform distribution over its cells.
fn uniform_vector(width: usize, blocks: &[CategoryBlock]) -> Vec<f32> {
    let mut vector = vec![0.0; width];
    for block in blocks {
        let probability = 1.0 / block.width() as f32;
        for cell in &mut vector[block.start..block.end] {
            *cell = probability;
        }
    }
    vector
}

/// Builds one probe: marked blocks are one-hot at the odometer's chosen cell, everything else
/// keeps the uniform base. Returns the probe and the absolute marked cell indices.
fn build_probe(
    uniform_base: &[f32],
    marked: &[CategoryBlock],
    choices: &[usize],
) -> (Vec<f32>, Vec<usize>) {
    let mut probe = uniform_base.to_vec();
    let mut cells = Vec::with_capacity(marked.len());
    for (block, &choice) in marked.iter().zip(choices) {
        for cell in &mut probe[block.start..block.end] {
            *cell = 0.0;
        }
        probe[block.start + choice] = 1.0;
        cells.push(block.start + choice);
    }
    (probe, cells)
}

/// Canonical identity of a probe vector. Width-1 blocks are dropped from the key: marking
/// them is indistinguishable from leaving them uniform, so probes differing only there are
/// the same vector.
fn probe_key(
    combination: &[usize],
    choices: &[usize],
    blocks: &[CategoryBlock],
) -> Vec<(usize, usize)> {
    combination
        .iter()
        .zip(choices)
        .filter(|(&block_index, _)| blocks[block_index].width() > 1)
        .map(|(&block_index, &choice)| (block_index, choice))
        .collect()
}

/// Advances the per-block cell odometer; returns false once all assignments are exhausted.
fn advance_odometer(odometer: &mut [usize], marked: &[CategoryBlock]) -> bool {
    for (digit, block) in odometer.iter_mut().zip(marked).rev() {
        *digit += 1;
        if *digit < block.width() {
            return true;
        }
        *digit = 0;
    }
    false
}

/// Scans the output for consequent candidates: cells clearing the threshold, excluding the
/// antecedent cells themselves, and excluding the whole containing block when there is only
/// one antecedent cell (a feature must not imply a sibling value of its own attribute).
fn harvest_consequents(
    output: &[f32],
    antecedent_cells: &[usize],
    marked: &[CategoryBlock],
    threshold: f32,
) -> Vec<usize> {
    let sibling_exclusion = if antecedent_cells.len() == 1 {
        Some(marked[0])
    } else {
        None
    };

    (0..output.len())
        .filter(|index| !antecedent_cells.contains(index))
        .filter(|&index| sibling_exclusion.map_or(true, |block| !block.contains(index)))
        .filter(|&index| output[index] >= threshold)
        .collect()
}

/// The autoencoder-based semantic rule mining strategy: encodes the corpus, trains (or loads)
/// the model, and extracts rules. The encoded corpus and fitted model remain available for
/// the quality evaluator after mining.
pub struct AeSemRl {
    /// Pipeline configuration.
    pub options: MinerOptions,

    /// The encoded corpus of the last `mine` call.
    pub corpus: Option<EncodedTransactions>,

    /// The fitted model of the last `mine` call.
    pub model: Option<AutoEncoder>,

    rng: StdRng,
}

impl AeSemRl {
    /// Creates a miner with a fixed seed for reproducible runs.
    #[inline]
    pub fn new(options: MinerOptions) -> Self {
        Self::seeded(options, [42u8; 32])
    }

    /// Creates a miner seeded with the given bytes.
    #[inline]
    pub fn seeded(options: MinerOptions, seed: [u8; 32]) -> Self {
        Self {
            options,
            corpus: None,
            model: None,
            rng: StdRng::from_seed(seed),
        }
    }
}

impl RuleMiningStrategy for AeSemRl {
    fn mine(
        &mut self,
        graph: &KnowledgeGraph,
        transactions: &[Transaction],
    ) -> Result<Vec<Rule>> {
        let encoder =
            super::encoder::FeatureEncoder::new(self.options.num_bins, self.options.num_neighbors);
        let corpus = encoder.encode(graph, transactions)?;
        if corpus.is_empty() {
            self.corpus = Some(corpus);
            return Ok(Vec::new());
        }

        let mut model = AutoEncoder::new(corpus.data_size(), &mut self.rng);
        let restored = match &self.options.checkpoint {
            Some(stem) => model.load(stem)?,
            None => false,
        };
        if restored {
            info!("restored model from checkpoint; skipping training");
        } else {
            let trainer = Trainer::new(
                self.options.epochs,
                self.options.learning_rate,
                self.options.weight_decay,
                self.options.noise_factor,
            );
            let final_loss = trainer.train(&mut model, &corpus, &mut self.rng)?;
            info!(final_loss, "trained autoencoder from scratch");
            if let Some(stem) = &self.options.checkpoint {
                model.save(stem)?;
            }
        }

        let extractor = RuleExtractor::new(
            self.options.max_antecedents,
            self.options.similarity_threshold,
        );
        let rules = extractor.extract(&model, &corpus);

        self.corpus = Some(corpus);
        self.model = Some(model);
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks_of(widths: &[usize]) -> Vec<CategoryBlock> {
        let mut start = 0;
        widths
            .iter()
            .map(|&w| {
                let block = CategoryBlock {
                    start,
                    end: start + w,
                };
                start += w;
                block
            })
            .collect()
    }

    fn choose(n: usize, r: usize) -> usize {
        (1..=r).fold(1, |acc, i| acc * (n - r + i) / i)
    }

    #[test]
    fn combination_count_matches_binomial_sum() {
        for (count, max_size) in [(5, 2), (4, 3), (6, 1), (3, 3)] {
            let expected: usize = (1..=max_size).map(|r| choose(count, r)).sum();
            assert_eq!(
                feature_combinations(count, max_size).len(),
                expected,
                "count={count} max={max_size}"
            );
        }
    }

    #[test]
    fn combination_size_never_exceeds_block_count() {
        let combinations = feature_combinations(2, 5);
        assert_eq!(combinations.len(), 3);
        assert!(combinations.iter().all(|c| c.len() <= 2));
    }

    #[test]
    fn probes_cover_the_cartesian_product_of_marked_blocks() {
        let blocks = blocks_of(&[2, 3]);
        let marked = vec![blocks[0], blocks[1]];
        let base = uniform_vector(5, &blocks);

        let mut odometer = vec![0usize; 2];
        let mut probes = Vec::new();
        loop {
            probes.push(build_probe(&base, &marked, &odometer));
            if !advance_odometer(&mut odometer, &marked) {
                break;
            }
        }

        assert_eq!(probes.len(), 6);
        // Every probe carries exactly one active cell per marked block.
        for (probe, cells) in &probes {
            assert_eq!(cells.len(), 2);
            assert!(cells.iter().all(|&c| probe[c] == 1.0));
        }
    }

    #[test]
    fn unmarked_blocks_hold_uniform_distributions() {
        let blocks = blocks_of(&[2, 4]);
        let base = uniform_vector(6, &blocks);
        let (probe, _) = build_probe(&base, &[blocks[0]], &[1]);

        assert_eq!(&probe[0..2], &[0.0, 1.0]);
        assert!(probe[2..6].iter().all(|&v| v == 0.25));
    }

    #[test]
    fn width_one_blocks_canonicalize_out_of_the_probe_key() {
        let blocks = blocks_of(&[1, 2]);
        // Marking the width-1 block produces the same vector as leaving it uniform.
        let with_mark = probe_key(&[0, 1], &[0, 1], &blocks);
        let without_mark = probe_key(&[1], &[1], &blocks);
        assert_eq!(with_mark, without_mark);
    }

    #[test]
    fn single_antecedent_excludes_its_sibling_values() {
        let blocks = blocks_of(&[3, 2]);
        let output = vec![0.9, 0.9, 0.9, 0.9, 0.1];

        let consequents = harvest_consequents(&output, &[0], &[blocks[0]], 0.8);
        // Cells 1 and 2 clear the threshold but live in the antecedent's own block.
        assert_eq!(consequents, vec![3]);
    }

    #[test]
    fn multi_antecedent_excludes_only_the_antecedent_cells() {
        let blocks = blocks_of(&[2, 2, 2]);
        let output = vec![0.9, 0.9, 0.9, 0.1, 0.9, 0.1];

        let consequents =
            harvest_consequents(&output, &[0, 2], &[blocks[0], blocks[1]], 0.8);
        assert_eq!(consequents, vec![1, 4]);
    }
}
