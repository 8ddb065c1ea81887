//! Autoencoder-based semantic association rule mining over sensor time-series.
//!
//! The crate learns implication rules of the form `pressure(s_a) in [2.1, 3.4] →
//! material(junction of s_b) = iron` from two inputs: a stream of timestamped sensor
//! readings, and a knowledge graph describing where each sensor is placed and what the
//! surrounding infrastructure looks like. Readings sharing a time bucket form a
//! transaction; each transaction is one-hot encoded together with the attributes of every
//! sensor's placement node, a denoising autoencoder is trained to reconstruct the encoded
//! corpus, and rules are read off the trained model by probing it with partially-forced
//! input vectors.
//!
//! The entry point is [`core::AeSemRl`] behind the [`core::RuleMiningStrategy`] trait;
//! extracted rules are scored with [`core::RuleEvaluator`] and rendered with
//! [`core::deconstruct_rule`].

pub mod core;
