//! Transactions: per-time-bucket groups of sensor readings.
//!
//! The time-series collaborator delivers rows of `(time bucket, averaged value, sensor
//! identifier)`, where the identifier carries the sensor name and type in the delimited wire
//! form `_name_<id>_end__type_<type>_end_`. This module parses that form and groups rows into
//! immutable `Transaction`s, one per time bucket, preserving the order in which sensors first
//! appear. Everything downstream (discretization, encoding, rule quality) consumes transactions
//! only through this representation.

use anyhow::{bail, Result};
use fxhash::FxHashMap;

/// One row returned by the time-series collaborator: a bucketed, averaged sensor value.
#[derive(Debug, Clone)]
pub struct SensorReading {
    /// The time bucket the average belongs to.
    pub bucket: i64,

    /// The averaged measurement within the bucket.
    pub value: f64,

    /// Delimited sensor identifier: `_name_<id>_end__type_<type>_end_`.
    pub ident: String,
}

/// A single sensor reading inside a transaction, with its identity resolved.
#[derive(Debug, Clone)]
pub struct Item {
    /// Stable sensor name, matching the sensor node name in the knowledge graph.
    pub sensor_id: String,

    /// Measurement aspect of the sensor (e.g. `pressure`, `flow`).
    pub sensor_type: String,

    /// The numeric measurement.
    pub value: f64,
}

/// An ordered set of items measured in the same time bucket. Immutable once built.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// The time bucket all items were measured in.
    pub bucket: i64,

    /// The readings, in first-appearance order of their sensors.
    pub items: Vec<Item>,
}

/// Extracts the sensor name and type from a delimited identifier of the form
/// `_name_<id>_end__type_<type>_end_`.
pub fn parse_sensor_ident(ident: &str) -> Result<(String, String)> {
    let name = delimited_field(ident, "_name_")?;
    let sensor_type = delimited_field(ident, "_type_")?;
    Ok((name, sensor_type))
}

fn delimited_field(ident: &str, marker: &str) -> Result<String> {
    let Some(start) = ident.find(marker) else {
        bail!("sensor identifier '{ident}' is missing the '{marker}' field");
    };
    let rest = &ident[start + marker.len()..];
    let Some(end) = rest.find("_end_") else {
        bail!("sensor identifier '{ident}' has an unterminated '{marker}' field");
    };
    Ok(rest[..end].to_string())
}

/// Groups time-series rows into transactions, one per time bucket, ordered by bucket.
/// Within a transaction, items keep the order in which their rows appeared.
pub fn transactions_from_readings(readings: &[SensorReading]) -> Result<Vec<Transaction>> {
    let mut order: Vec<i64> = Vec::new();
    let mut by_bucket: FxHashMap<i64, Vec<Item>> = FxHashMap::default();

    for reading in readings {
        let (sensor_id, sensor_type) = parse_sensor_ident(&reading.ident)?;
        let items = by_bucket.entry(reading.bucket).or_insert_with(|| {
            order.push(reading.bucket);
            Vec::new()
        });
        items.push(Item {
            sensor_id,
            sensor_type,
            value: reading.value,
        });
    }

    order.sort_unstable();
    Ok(order
        .into_iter()
        .map(|bucket| Transaction {
            bucket,
            items: by_bucket.remove(&bucket).unwrap_or_default(),
        })
        .collect())
}

/// Collects all observed values per sensor type across the given transactions,
/// the input the discretizer is fitted on.
pub fn values_by_sensor_type(transactions: &[Transaction]) -> FxHashMap<String, Vec<f64>> {
    let mut values: FxHashMap<String, Vec<f64>> = FxHashMap::default();
    for transaction in transactions {
        for item in &transaction.items {
            values
                .entry(item.sensor_type.clone())
                .or_default()
                .push(item.value);
        }
    }
    values
}
