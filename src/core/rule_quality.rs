//! Rule quality statistics and deconstruction into human-readable form.
//!
//! For every raw rule the evaluator scans the encoded transaction corpus once, tallying the
//! 2×2 contingency counts (antecedents and consequent co-occur, antecedents only, consequent
//! only, neither) and derives the standard association-rule metrics: support, confidence,
//! coverage, lift, leverage and Zhang's metric. Zero antecedent support is a degenerate but
//! legal state: confidence is defined as 0 there instead of dividing by zero, and ratio
//! metrics with an empty denominator collapse to 0 likewise.
//!
//! The evaluator is a pure function of the rule and the corpus: evaluating the same rule
//! twice yields identical metrics. Across a rule *set* it also reports dataset coverage, the
//! fraction of transactions matched by at least one rule's antecedents.
//!
//! Deconstruction turns a rule expressed over vector-index descriptors back into structured
//! antecedent/consequent groups, one group per originating item, and marks whether the
//! consequent belongs to one of the antecedent groups via `consequent_index`.

use super::encoder::{EncodedTransactions, Feature, FeatureDescriptor};
use super::rule_miner::Rule;
use serde::Serialize;

/// Quality metrics of one rule, relative to the transaction corpus.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RuleStats {
    /// Fraction of transactions where antecedents and consequent co-occur.
    pub support: f64,

    /// `support / support(antecedents)`, or 0 when the antecedents never occur.
    pub confidence: f64,

    /// `support(antecedents)`: the fraction of transactions the rule applies to.
    pub coverage: f64,

    /// `confidence / support(consequent)`, or 0 when the consequent never occurs.
    pub lift: f64,

    /// `support − support(antecedents) · support(consequent)`.
    pub leverage: f64,

    /// `(confidence − confidence(¬antecedents → consequent)) / max(both)`, or 0 when the
    /// denominator vanishes.
    pub zhangs_metric: f64,
}

/// One item group of a deconstructed rule: the sensor's measurement range (when part of the
/// rule) plus any attribute conditions on the item's placement node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleItem {
    /// Sensor name of the originating item.
    pub sensor_id: String,

    /// Measurement aspect (sensor type), when a measurement range is part of the group.
    pub measurement_aspect: Option<String>,

    /// Discretized measurement range in `<lo>_<hi>` form, when part of the group.
    pub measurement_range: Option<String>,

    /// Attribute key/value conditions of the group.
    pub attributes: Vec<(String, String)>,
}

/// A rule reassembled into human-readable item groups.
#[derive(Debug, Clone, Serialize)]
pub struct DeconstructedRule {
    /// One group per distinct antecedent item, in first-appearance order.
    pub antecedents: Vec<RuleItem>,

    /// The implied feature, as its own group.
    pub consequent: RuleItem,

    /// Index of the antecedent group the consequent's item coincides with, or one past the
    /// last group when the consequent concerns a fresh item.
    pub consequent_index: usize,
}

/// Computes quality statistics for extracted rules against the encoded corpus.
pub struct RuleEvaluator<'a> {
    corpus: &'a EncodedTransactions,
}

impl<'a> RuleEvaluator<'a> {
    /// Creates an evaluator over the encoded transaction corpus.
    #[inline]
    pub fn new(corpus: &'a EncodedTransactions) -> Self {
        Self { corpus }
    }

    /// Fills in the quality metrics of every rule and returns the dataset coverage of the
    /// rule set: the fraction of transactions matched by at least one rule's antecedents.
    pub fn evaluate(&self, rules: &mut [Rule]) -> f64 {
        let num_transactions = self.corpus.len();
        if num_transactions == 0 {
            return 0.0;
        }
        let mut covered = vec![false; num_transactions];

        for rule in rules.iter_mut() {
            let mut antecedent_count = 0usize;
            let mut consequent_count = 0usize;
            let mut co_occurrence_count = 0usize;
            let mut only_consequent_count = 0usize;

            for index in 0..num_transactions {
                let antecedent_match = rule
                    .antecedents
                    .iter()
                    .all(|descriptor| self.feature_active(index, descriptor));
                let consequent_match = self.feature_active(index, &rule.consequent);

                if antecedent_match {
                    covered[index] = true;
                    antecedent_count += 1;
                }
                match (antecedent_match, consequent_match) {
                    (true, true) => co_occurrence_count += 1,
                    (false, true) => only_consequent_count += 1,
                    _ => {}
                }
                if consequent_match {
                    consequent_count += 1;
                }
            }

            rule.stats = contingency_stats(
                num_transactions,
                antecedent_count,
                consequent_count,
                co_occurrence_count,
                only_consequent_count,
            );
        }

        covered.iter().filter(|&&c| c).count() as f64 / num_transactions as f64
    }

    /// Whether the feature behind a descriptor is present (its cell is active) in the
    /// encoded transaction. A descriptor absent from the transaction's tracker counts as
    /// not present.
    fn feature_active(&self, transaction: usize, descriptor: &FeatureDescriptor) -> bool {
        let tracker = &self.corpus.trackers[transaction];
        tracker
            .iter()
            .position(|candidate| candidate == descriptor)
            .is_some_and(|cell| self.corpus.vectors[transaction][cell] == 1.0)
    }
}

/// Derives the metric set from raw contingency counts, guarding every ratio against an empty
/// denominator.
fn contingency_stats(
    num_transactions: usize,
    antecedent_count: usize,
    consequent_count: usize,
    co_occurrence_count: usize,
    only_consequent_count: usize,
) -> RuleStats {
    let n = num_transactions as f64;
    let support = co_occurrence_count as f64 / n;
    let support_body = antecedent_count as f64 / n;
    let support_head = consequent_count as f64 / n;

    let confidence = if support_body > 0.0 {
        support / support_body
    } else {
        0.0
    };
    let lift = if support_head > 0.0 {
        confidence / support_head
    } else {
        0.0
    };
    let leverage = support - support_body * support_head;

    // Confidence of the complementary rule ¬antecedents → consequent.
    let complement = num_transactions - antecedent_count;
    let confidence_complement = if complement > 0 {
        only_consequent_count as f64 / complement as f64
    } else {
        0.0
    };
    let denominator = confidence.max(confidence_complement);
    let zhangs_metric = if denominator > 0.0 {
        (confidence - confidence_complement) / denominator
    } else {
        0.0
    };

    RuleStats {
        support,
        confidence,
        coverage: support_body,
        lift,
        leverage,
        zhangs_metric,
    }
}

/// Reassembles a rule's descriptors into structured item groups.
pub fn deconstruct_rule(rule: &Rule) -> DeconstructedRule {
    let mut item_order: Vec<usize> = Vec::new();
    let mut groups: Vec<RuleItem> = Vec::new();

    for descriptor in &rule.antecedents {
        let position = match item_order.iter().position(|&item| item == descriptor.item) {
            Some(position) => position,
            None => {
                item_order.push(descriptor.item);
                groups.push(RuleItem {
                    sensor_id: descriptor.sensor_id.clone(),
                    ..RuleItem::default()
                });
                groups.len() - 1
            }
        };
        merge_feature(&mut groups[position], &descriptor.feature);
    }

    let consequent_index = item_order
        .iter()
        .position(|&item| item == rule.consequent.item)
        .unwrap_or(groups.len());

    let mut consequent = RuleItem {
        sensor_id: rule.consequent.sensor_id.clone(),
        ..RuleItem::default()
    };
    merge_feature(&mut consequent, &rule.consequent.feature);

    DeconstructedRule {
        antecedents: groups,
        consequent,
        consequent_index,
    }
}

fn merge_feature(item: &mut RuleItem, feature: &Feature) {
    match feature {
        Feature::MeasurementRange { aspect, range } => {
            item.measurement_aspect = Some(aspect.clone());
            item.measurement_range = Some(range.clone());
        }
        Feature::Attribute { key, value } => {
            item.attributes.push((key.clone(), value.clone()));
        }
        Feature::NumericAttribute { key } => {
            item.attributes.push((key.clone(), String::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoder::CategoryBlock;

    fn descriptor(item: usize, sensor: &str, range: &str) -> FeatureDescriptor {
        FeatureDescriptor {
            item,
            sensor_id: sensor.to_string(),
            feature: Feature::MeasurementRange {
                aspect: "pressure".to_string(),
                range: range.to_string(),
            },
        }
    }

    fn attribute(item: usize, sensor: &str, key: &str, value: &str) -> FeatureDescriptor {
        FeatureDescriptor {
            item,
            sensor_id: sensor.to_string(),
            feature: Feature::Attribute {
                key: key.to_string(),
                value: value.to_string(),
            },
        }
    }

    /// Corpus of 4 transactions over two 2-cell blocks (sensors a and b, low/high each):
    /// a-high co-occurs with b-high in 2 of 4 transactions; b-high appears 3 times.
    fn sample_corpus() -> EncodedTransactions {
        let blocks = vec![
            CategoryBlock { start: 0, end: 2 },
            CategoryBlock { start: 2, end: 4 },
        ];
        let tracker = vec![
            descriptor(0, "s_a", "low"),
            descriptor(0, "s_a", "high"),
            descriptor(1, "s_b", "low"),
            descriptor(1, "s_b", "high"),
        ];
        let vectors = vec![
            vec![0.0, 1.0, 0.0, 1.0], // a-high, b-high
            vec![0.0, 1.0, 0.0, 1.0], // a-high, b-high
            vec![1.0, 0.0, 0.0, 1.0], // a-low,  b-high
            vec![1.0, 0.0, 1.0, 0.0], // a-low,  b-low
        ];
        let mut corpus = EncodedTransactions::default();
        for vector in vectors {
            corpus.vectors.push(vector);
            corpus.trackers.push(tracker.clone());
            corpus.category_indices.push(blocks.clone());
        }
        corpus
    }

    fn sample_rule() -> Rule {
        Rule {
            antecedents: vec![descriptor(0, "s_a", "high")],
            consequent: descriptor(1, "s_b", "high"),
            stats: RuleStats::default(),
        }
    }

    #[test]
    fn metrics_match_hand_computed_counts() {
        let corpus = sample_corpus();
        let mut rules = vec![sample_rule()];
        let coverage = RuleEvaluator::new(&corpus).evaluate(&mut rules);

        let stats = rules[0].stats;
        assert_eq!(stats.support, 0.5);
        assert_eq!(stats.confidence, 1.0);
        assert_eq!(stats.coverage, 0.5);
        assert!((stats.lift - 1.0 / 0.75).abs() < 1e-12);
        assert!((stats.leverage - (0.5 - 0.5 * 0.75)).abs() < 1e-12);
        // ¬a-high → b-high has confidence 1/2; zhang = (1 − 0.5) / 1.
        assert!((stats.zhangs_metric - 0.5).abs() < 1e-12);
        assert_eq!(coverage, 0.5);
    }

    #[test]
    fn support_is_bounded_by_both_marginals() {
        let corpus = sample_corpus();
        let mut rules = vec![sample_rule()];
        RuleEvaluator::new(&corpus).evaluate(&mut rules);

        let stats = rules[0].stats;
        assert!(stats.support <= stats.coverage);
        assert!(stats.support <= 0.75); // support of the consequent
        assert!((0.0..=1.0).contains(&stats.confidence));
    }

    #[test]
    fn zero_antecedent_support_yields_zero_confidence() {
        let corpus = sample_corpus();
        let mut rules = vec![Rule {
            antecedents: vec![descriptor(0, "s_ghost", "high")],
            consequent: descriptor(1, "s_b", "high"),
            stats: RuleStats::default(),
        }];
        RuleEvaluator::new(&corpus).evaluate(&mut rules);

        let stats = rules[0].stats;
        assert_eq!(stats.support, 0.0);
        assert_eq!(stats.confidence, 0.0);
        assert_eq!(stats.lift, 0.0);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let corpus = sample_corpus();
        let mut rules = vec![sample_rule()];
        let evaluator = RuleEvaluator::new(&corpus);

        let coverage_first = evaluator.evaluate(&mut rules);
        let first = rules[0].stats;
        let coverage_second = evaluator.evaluate(&mut rules);
        let second = rules[0].stats;

        assert_eq!(coverage_first, coverage_second);
        assert_eq!(first.support, second.support);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.zhangs_metric, second.zhangs_metric);
    }

    #[test]
    fn deconstruction_groups_by_item_ordinal() {
        let rule = Rule {
            antecedents: vec![
                descriptor(0, "s_a", "0_5"),
                attribute(0, "s_a", "material", "iron"),
                descriptor(1, "s_b", "5_9"),
            ],
            consequent: descriptor(1, "s_b", "5_9"),
            stats: RuleStats::default(),
        };
        let deconstructed = deconstruct_rule(&rule);

        assert_eq!(deconstructed.antecedents.len(), 2);
        assert_eq!(deconstructed.antecedents[0].sensor_id, "s_a");
        assert_eq!(
            deconstructed.antecedents[0].attributes,
            vec![("material".to_string(), "iron".to_string())]
        );
        assert_eq!(
            deconstructed.antecedents[0].measurement_range.as_deref(),
            Some("0_5")
        );
        // The consequent's item matches the second antecedent group.
        assert_eq!(deconstructed.consequent_index, 1);
    }

    #[test]
    fn fresh_consequent_item_gets_index_past_the_groups() {
        let rule = Rule {
            antecedents: vec![descriptor(0, "s_a", "0_5")],
            consequent: descriptor(2, "s_c", "1_2"),
            stats: RuleStats::default(),
        };
        let deconstructed = deconstruct_rule(&rule);

        assert_eq!(deconstructed.antecedents.len(), 1);
        assert_eq!(deconstructed.consequent_index, 1);
        assert_eq!(
            deconstructed.consequent.measurement_aspect.as_deref(),
            Some("pressure")
        );
    }
}
