//! One-hot feature encoding of transactions enriched with knowledge-graph context.
//!
//! Each transaction becomes a fixed-width numeric vector partitioned into contiguous,
//! mutually-exclusive category blocks. Encoding proceeds item by item; for every item the
//! encoder appends:
//! - a one-hot block over the sensor's discretized measurement range, and
//! - one block per linearized attribute of the node the sensor is placed in: categorical
//!   attributes are one-hot over the union of values observed for that key across the whole
//!   graph, numerical attributes pass through as single-cell blocks.
//!
//! The same attribute on different items gets independent blocks, so the model can learn
//! per-item implications. Alongside the vector, a tracker carries one `FeatureDescriptor` per
//! index, identifying the semantic feature behind every cell (sensor, item ordinal, and either
//! a measurement range or an attribute key/value). Trackers and category blocks are derived
//! once per run and never mutated afterwards.
//!
//! A sensor whose placement cannot be resolved in the knowledge graph is a hard error: the
//! encoder cannot invent a neighborhood for it.

use super::discretizer::Discretizer;
use super::knowledge_graph::{linearize, AttributeValue, KnowledgeGraph, SENSOR_LABEL};
use super::transaction::{values_by_sensor_type, Transaction};
use anyhow::{bail, Result};
use fxhash::FxHashMap;
use serde::Serialize;

/// A contiguous index range `[start, end)` in a feature vector representing one
/// mutually-exclusive nominal feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryBlock {
    /// First index of the block.
    pub start: usize,

    /// One past the last index of the block.
    pub end: usize,
}

impl CategoryBlock {
    /// Number of cells in the block.
    #[inline]
    pub fn width(&self) -> usize {
        self.end - self.start
    }

    /// Whether the given vector index falls inside the block.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// The semantic feature one vector cell stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Feature {
    /// A discretized measurement range of the item's sensor.
    MeasurementRange {
        /// Measurement aspect (sensor type), e.g. `pressure`.
        aspect: String,

        /// Range label in `<lo>_<hi>` form.
        range: String,
    },

    /// One class value of a categorical attribute on the item's placement node.
    Attribute {
        /// Linearized attribute key.
        key: String,

        /// The class value this cell stands for.
        value: String,
    },

    /// A numerical attribute on the item's placement node, passed through as one cell.
    NumericAttribute {
        /// Linearized attribute key.
        key: String,
    },
}

/// Identifies the semantic feature at one vector index: which item of the transaction it
/// belongs to, which sensor produced it, and what the cell encodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FeatureDescriptor {
    /// Ordinal of the owning item within its transaction.
    pub item: usize,

    /// Sensor name of the owning item.
    pub sensor_id: String,

    /// The encoded feature.
    pub feature: Feature,
}

/// The encoded corpus: one vector, tracker, and category-block list per transaction.
#[derive(Debug, Default)]
pub struct EncodedTransactions {
    /// Fixed-width numeric vectors, one per transaction.
    pub vectors: Vec<Vec<f32>>,

    /// Per-index semantic labels, aligned with `vectors`.
    pub trackers: Vec<Vec<FeatureDescriptor>>,

    /// Category blocks per transaction; all transactions share the same layout.
    pub category_indices: Vec<Vec<CategoryBlock>>,
}

impl EncodedTransactions {
    /// Width of the encoded vectors.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.vectors.first().map_or(0, Vec::len)
    }

    /// Number of encoded transactions.
    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// True if no transactions were encoded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// The observed value domain of one linearized attribute key.
enum AttributeDomain {
    /// All observed values, sorted; one one-hot cell per value.
    Categorical(Vec<String>),

    /// All observed values were numeric; encoded as a single passthrough cell.
    Numeric,
}

/// Converts transactions plus their knowledge-graph context into the vector corpus.
pub struct FeatureEncoder {
    /// Number of bins to discretize sensor measurements into.
    pub num_bins: usize,

    /// Maximum hop distance when resolving a sensor's placement node.
    pub num_neighbors: usize,
}

impl FeatureEncoder {
    /// Creates an encoder with the given discretization and neighborhood settings.
    #[inline]
    pub fn new(num_bins: usize, num_neighbors: usize) -> Self {
        Self {
            num_bins,
            num_neighbors,
        }
    }

    /// Fits the discretizer on the transactions and encodes every transaction into a
    /// vector, tracker, and category-block list.
    pub fn encode(
        &self,
        graph: &KnowledgeGraph,
        transactions: &[Transaction],
    ) -> Result<EncodedTransactions> {
        let discretizer = Discretizer::fit(&values_by_sensor_type(transactions), self.num_bins);
        let domains = attribute_domains(graph);

        let mut encoded = EncodedTransactions::default();
        for transaction in transactions {
            let mut vector: Vec<f32> = Vec::new();
            let mut tracker: Vec<FeatureDescriptor> = Vec::new();
            let mut blocks: Vec<CategoryBlock> = Vec::new();

            for (ordinal, item) in transaction.items.iter().enumerate() {
                let Some(host_id) = graph.placement_host(&item.sensor_id, self.num_neighbors)
                else {
                    bail!(
                        "sensor '{}' has no resolvable placement in the knowledge graph",
                        item.sensor_id
                    );
                };

                let (Some(labels), Some(bin)) = (
                    discretizer.labels(&item.sensor_type),
                    discretizer.bin_of(&item.sensor_type, item.value),
                ) else {
                    bail!(
                        "no discretization boundaries for sensor type '{}'",
                        item.sensor_type
                    );
                };

                // Measurement-range block: one-hot over the sensor type's bins.
                let start = vector.len();
                for (candidate, label) in labels.iter().enumerate() {
                    vector.push(if candidate == bin { 1.0 } else { 0.0 });
                    tracker.push(FeatureDescriptor {
                        item: ordinal,
                        sensor_id: item.sensor_id.clone(),
                        feature: Feature::MeasurementRange {
                            aspect: item.sensor_type.clone(),
                            range: format!("{}_{}", label.lo, label.hi),
                        },
                    });
                }
                blocks.push(CategoryBlock {
                    start,
                    end: vector.len(),
                });

                // One block per linearized attribute of the placement node.
                let host = graph.node(host_id);
                for (key, value) in linearize(&host.properties) {
                    if key == "name" {
                        continue;
                    }
                    let Some(domain) = domains.get(&key) else {
                        bail!("no value domain for placement attribute '{key}'");
                    };
                    let start = vector.len();
                    match domain {
                        AttributeDomain::Categorical(values) => {
                            let active = value.as_text();
                            for class in values {
                                vector.push(if *class == active { 1.0 } else { 0.0 });
                                tracker.push(FeatureDescriptor {
                                    item: ordinal,
                                    sensor_id: item.sensor_id.clone(),
                                    feature: Feature::Attribute {
                                        key: key.clone(),
                                        value: class.clone(),
                                    },
                                });
                            }
                        }
                        AttributeDomain::Numeric => {
                            let number = match value {
                                AttributeValue::Number(n) => n as f32,
                                _ => 0.0,
                            };
                            vector.push(number);
                            tracker.push(FeatureDescriptor {
                                item: ordinal,
                                sensor_id: item.sensor_id.clone(),
                                feature: Feature::NumericAttribute { key: key.clone() },
                            });
                        }
                    }
                    blocks.push(CategoryBlock {
                        start,
                        end: vector.len(),
                    });
                }
            }

            encoded.vectors.push(vector);
            encoded.trackers.push(tracker);
            encoded.category_indices.push(blocks);
        }

        Ok(encoded)
    }
}

/// Classifies every linearized attribute key observed on non-sensor nodes: numeric if all
/// observed values are numbers, otherwise categorical over the sorted union of values.
fn attribute_domains(graph: &KnowledgeGraph) -> FxHashMap<String, AttributeDomain> {
    let mut numeric_only: FxHashMap<String, bool> = FxHashMap::default();
    for id in graph.node_ids() {
        let node = graph.node(id);
        if node.label == SENSOR_LABEL {
            continue;
        }
        for (key, value) in linearize(&node.properties) {
            if key == "name" {
                continue;
            }
            let numeric = matches!(value, AttributeValue::Number(_));
            numeric_only
                .entry(key)
                .and_modify(|flag| *flag &= numeric)
                .or_insert(numeric);
        }
    }

    numeric_only
        .into_iter()
        .map(|(key, numeric)| {
            let domain = if numeric {
                AttributeDomain::Numeric
            } else {
                AttributeDomain::Categorical(graph.unique_attribute_values(&key))
            };
            (key, domain)
        })
        .collect()
}
