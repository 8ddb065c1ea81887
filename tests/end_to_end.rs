//! Full-pipeline tests: readings and a knowledge graph in, scored rules out.

use semrl::core::{
    deconstruct_rule, transactions_from_readings, AeSemRl, AttributeValue, Feature,
    KnowledgeGraph, MinerOptions, Rule, RuleEvaluator, RuleMiningStrategy, SensorReading,
    Transaction,
};

fn text(s: &str) -> AttributeValue {
    AttributeValue::Text(s.to_string())
}

/// Two pressure sensors on junctions of different materials, plus a flow sensor whose
/// reading never changes.
fn water_network() -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new();
    graph.add_node(
        "junction1",
        "Junction",
        vec![("material".to_string(), text("iron"))],
    );
    graph.add_node(
        "junction2",
        "Junction",
        vec![("material".to_string(), text("pvc"))],
    );
    graph.add_node(
        "junction3",
        "Junction",
        vec![("material".to_string(), text("iron"))],
    );
    graph.add_sensor("s_a", "pressure", "junction1").unwrap();
    graph.add_sensor("s_b", "pressure", "junction2").unwrap();
    graph.add_sensor("s_c", "flow", "junction3").unwrap();
    graph
}

fn reading(bucket: i64, value: f64, name: &str, sensor_type: &str) -> SensorReading {
    SensorReading {
        bucket,
        value,
        ident: format!("_name_{name}_end__type_{sensor_type}_end_"),
    }
}

/// 20 transactions where `s_a` and `s_b` always measure the same pressure, alternating
/// between a low band around 1 and a high band around 8, while `s_c` is constant.
fn correlated_transactions() -> Vec<Transaction> {
    let mut readings = Vec::new();
    for step in 0..20i64 {
        let band = if step % 2 == 0 { 1.0 } else { 8.0 };
        let pressure = band + 0.1 * (step / 2) as f64;
        readings.push(reading(step, pressure, "s_a", "pressure"));
        readings.push(reading(step, pressure, "s_b", "pressure"));
        readings.push(reading(step, 5.0, "s_c", "flow"));
    }
    transactions_from_readings(&readings).unwrap()
}

fn options() -> MinerOptions {
    MinerOptions {
        num_bins: 2,
        epochs: 600,
        ..MinerOptions::default()
    }
}

fn measurement_range(rule_side: &Feature) -> Option<&str> {
    match rule_side {
        Feature::MeasurementRange { range, .. } => Some(range),
        _ => None,
    }
}

/// A single-antecedent pressure-to-pressure rule between the two correlated sensors.
fn pressure_rule(rule: &Rule, from: &str, to: &str) -> Option<(String, String)> {
    if rule.antecedents.len() != 1 {
        return None;
    }
    let antecedent = &rule.antecedents[0];
    if antecedent.sensor_id != from || rule.consequent.sensor_id != to {
        return None;
    }
    let lhs = measurement_range(&antecedent.feature)?;
    let rhs = measurement_range(&rule.consequent.feature)?;
    Some((lhs.to_string(), rhs.to_string()))
}

#[test]
fn mines_the_correlated_pressure_rule() {
    let graph = water_network();
    let transactions = correlated_transactions();

    let mut miner = AeSemRl::new(options());
    let mut rules = miner.mine(&graph, &transactions).unwrap();
    assert!(!rules.is_empty());

    let corpus = miner.corpus.as_ref().unwrap();
    let dataset_coverage = RuleEvaluator::new(corpus).evaluate(&mut rules);
    assert!((0.0..=1.0).contains(&dataset_coverage));

    // The two sensors always share a band, so some same-range implication must surface,
    // and no cross-band implication may.
    let mut matched = None;
    for rule in &rules {
        if let Some((lhs, rhs)) = pressure_rule(rule, "s_a", "s_b") {
            assert_eq!(lhs, rhs, "mined a cross-band rule: {lhs} -> {rhs}");
            matched = Some(rule.clone());
        }
    }
    let rule = matched.expect("no pressure rule between the correlated sensors");
    assert!((rule.stats.confidence - 1.0).abs() < 1e-12);
    assert_eq!(rule.stats.support, rule.stats.coverage);
    assert!(rule.stats.lift > 1.0);
    assert!(rule.stats.leverage > 0.0);
    assert!(rule.stats.zhangs_metric > 0.0);
}

#[test]
fn deconstructed_rule_points_past_the_antecedent_groups() {
    let graph = water_network();
    let transactions = correlated_transactions();

    let mut miner = AeSemRl::new(options());
    let rules = miner.mine(&graph, &transactions).unwrap();

    let rule = rules
        .iter()
        .find(|rule| pressure_rule(rule, "s_a", "s_b").is_some())
        .expect("no pressure rule between the correlated sensors");
    let deconstructed = deconstruct_rule(rule);

    assert_eq!(deconstructed.antecedents.len(), 1);
    assert_eq!(deconstructed.antecedents[0].sensor_id, "s_a");
    assert_eq!(deconstructed.consequent.sensor_id, "s_b");
    assert_eq!(
        deconstructed.consequent.measurement_aspect.as_deref(),
        Some("pressure")
    );
    // The consequent concerns a different item, so its index lands one past the groups.
    assert_eq!(deconstructed.consequent_index, 1);
}

#[test]
fn unreachable_threshold_yields_no_rules() {
    let graph = water_network();
    let transactions = correlated_transactions();

    let mut miner = AeSemRl::new(MinerOptions {
        similarity_threshold: 1.01,
        ..options()
    });
    let rules = miner.mine(&graph, &transactions).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn empty_transaction_list_yields_no_rules() {
    let graph = water_network();
    let mut miner = AeSemRl::new(options());
    let rules = miner.mine(&graph, &[]).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn constant_sensor_type_survives_the_whole_pipeline() {
    let graph = water_network();
    let mut readings = Vec::new();
    for step in 0..6i64 {
        readings.push(reading(step, 5.0, "s_c", "flow"));
    }
    let transactions = transactions_from_readings(&readings).unwrap();

    let mut miner = AeSemRl::new(MinerOptions {
        epochs: 50,
        ..options()
    });
    // Degenerate discretization boundaries must not break mining.
    let rules = miner.mine(&graph, &transactions).unwrap();
    let corpus = miner.corpus.as_ref().unwrap();
    assert_eq!(corpus.len(), 6);
    // Whatever is mined must never pair a feature with a sibling value of its own block.
    for rule in &rules {
        if rule.antecedents.len() == 1 {
            let antecedent = &rule.antecedents[0];
            if antecedent.sensor_id == rule.consequent.sensor_id {
                assert_ne!(antecedent.feature, rule.consequent.feature);
            }
        }
    }
}

#[test]
fn mining_is_deterministic_for_a_fixed_seed() {
    let graph = water_network();
    let transactions = correlated_transactions();

    let mut first = AeSemRl::seeded(options(), [7u8; 32]);
    let mut second = AeSemRl::seeded(options(), [7u8; 32]);

    let rules_first = first.mine(&graph, &transactions).unwrap();
    let rules_second = second.mine(&graph, &transactions).unwrap();

    assert_eq!(rules_first.len(), rules_second.len());
    for (a, b) in rules_first.iter().zip(&rules_second) {
        assert_eq!(a.antecedents, b.antecedents);
        assert_eq!(a.consequent, b.consequent);
    }
}
