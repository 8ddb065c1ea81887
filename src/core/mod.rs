//! Core building blocks of the semantic rule mining pipeline.
//!
//! Data flows bottom-up through the modules: sensor readings are grouped into
//! [`transaction`]s, discretized by the [`discretizer`], enriched with [`knowledge_graph`]
//! context and one-hot encoded by the [`encoder`]. The [`trainer`] fits the
//! [`autoencoder`] on the encoded corpus, the [`rule_miner`] probes the trained model for
//! association rules, and [`rule_quality`] scores them against the corpus.

pub mod autoencoder;
pub mod discretizer;
pub mod encoder;
pub mod knowledge_graph;
pub mod rule_miner;
pub mod rule_quality;
pub mod trainer;
pub mod transaction;

pub use autoencoder::AutoEncoder;
pub use discretizer::Discretizer;
pub use encoder::{EncodedTransactions, Feature, FeatureDescriptor, FeatureEncoder};
pub use knowledge_graph::{AttributeValue, KnowledgeGraph};
pub use rule_miner::{AeSemRl, MinerOptions, Rule, RuleMiningStrategy};
pub use rule_quality::{deconstruct_rule, DeconstructedRule, RuleEvaluator, RuleStats};
pub use trainer::Trainer;
pub use transaction::{transactions_from_readings, SensorReading, Transaction};
