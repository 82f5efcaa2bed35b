use serde_derive::Deserialize;
use thiserror::Error;

use crate::reading::{AggregatedReading, InverterReading};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("no readings to aggregate")]
    NoReadings,
}

/// How the per-device values of one field collapse into a single fleet value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinationRule {
    /// Arithmetic sum over all readings.
    Sum,
    /// Sum divided by the number of readings.
    Average,
    /// Value from the reading with the lowest device identifier.
    First,
}

/// One rule per reading field. A struct rather than a map, so a missing or
/// duplicate rule is unrepresentable.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombinationRules {
    pub output_power: CombinationRule,
    pub energy_today: CombinationRule,
    pub energy_total: CombinationRule,
    pub grid_voltage: CombinationRule,
    pub grid_current: CombinationRule,
    pub grid_frequency: CombinationRule,
    pub inverter_temperature: CombinationRule,
}

impl Default for CombinationRules {
    fn default() -> Self {
        Self {
            output_power: CombinationRule::Sum,
            energy_today: CombinationRule::Sum,
            energy_total: CombinationRule::Sum,
            grid_voltage: CombinationRule::Average,
            grid_current: CombinationRule::Sum,
            grid_frequency: CombinationRule::Average,
            inverter_temperature: CombinationRule::Average,
        }
    }
}

/// Collapse the readings of one poll cycle into a single fleet reading.
///
/// Pure: the result depends only on the inputs, never on their order. The
/// `First` rule picks the reading with the lowest device identifier so that
/// re-polls of the same fleet reproduce the same value.
pub fn combine(
    readings: &[InverterReading],
    rules: &CombinationRules,
) -> Result<AggregatedReading, AggregationError> {
    let first = readings
        .iter()
        .min_by(|a, b| a.device_id.cmp(&b.device_id))
        .ok_or(AggregationError::NoReadings)?;
    let timestamp = readings
        .iter()
        .map(|r| r.timestamp)
        .max()
        .ok_or(AggregationError::NoReadings)?;

    let apply = |rule: CombinationRule, field: fn(&InverterReading) -> f64| match rule {
        CombinationRule::Sum => readings.iter().map(field).sum(),
        CombinationRule::Average => {
            readings.iter().map(field).sum::<f64>() / readings.len() as f64
        }
        CombinationRule::First => field(first),
    };

    Ok(AggregatedReading {
        timestamp,
        count: readings.len(),
        output_power_w: apply(rules.output_power, |r| r.output_power_w),
        energy_today_kwh: apply(rules.energy_today, |r| r.energy_today_kwh),
        energy_total_kwh: apply(rules.energy_total, |r| r.energy_total_kwh),
        grid_voltage_v: apply(rules.grid_voltage, |r| r.grid_voltage_v),
        grid_current_a: apply(rules.grid_current, |r| r.grid_current_a),
        grid_frequency_hz: apply(rules.grid_frequency, |r| r.grid_frequency_hz),
        inverter_temperature_c: apply(rules.inverter_temperature, |r| r.inverter_temperature_c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn reading(device_id: &str, power: f64, energy_today: f64) -> InverterReading {
        InverterReading {
            device_id: device_id.to_string(),
            timestamp: Local::now(),
            output_power_w: power,
            energy_today_kwh: energy_today,
            energy_total_kwh: 1000.0,
            grid_voltage_v: 230.0,
            grid_current_a: 2.0,
            grid_frequency_hz: 50.0,
            inverter_temperature_c: 40.0,
        }
    }

    #[test]
    fn sum_is_exact_per_field() {
        let readings = [
            reading("192.168.1.10", 100.0, 1.5),
            reading("192.168.1.11", 150.0, 2.5),
            reading("192.168.1.12", 50.0, 1.0),
        ];
        let rules = CombinationRules::default();
        let agg = combine(&readings, &rules).unwrap();
        assert_eq!(agg.count, 3);
        assert!((agg.output_power_w - 300.0).abs() < 1e-9);
        assert!((agg.energy_today_kwh - 5.0).abs() < 1e-9);
        assert!((agg.energy_total_kwh - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn average_divides_by_reading_count() {
        let mut a = reading("a", 0.0, 0.0);
        let mut b = reading("b", 0.0, 0.0);
        a.grid_voltage_v = 228.0;
        b.grid_voltage_v = 232.0;
        a.inverter_temperature_c = 38.0;
        b.inverter_temperature_c = 42.0;
        let agg = combine(&[a, b], &CombinationRules::default()).unwrap();
        assert!((agg.grid_voltage_v - 230.0).abs() < 1e-9);
        assert!((agg.inverter_temperature_c - 40.0).abs() < 1e-9);
    }

    #[test]
    fn single_reading_average_equals_first_equals_value() {
        let input = [reading("solo", 123.0, 4.5)];
        let mut rules = CombinationRules::default();

        rules.output_power = CombinationRule::Average;
        let avg = combine(&input, &rules).unwrap();
        rules.output_power = CombinationRule::First;
        let first = combine(&input, &rules).unwrap();

        assert!((avg.output_power_w - 123.0).abs() < 1e-9);
        assert!((first.output_power_w - 123.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_fails_with_no_readings() {
        let result = combine(&[], &CombinationRules::default());
        assert_eq!(result.unwrap_err(), AggregationError::NoReadings);
    }

    #[test]
    fn first_picks_lowest_device_id_not_input_order() {
        let mut rules = CombinationRules::default();
        rules.output_power = CombinationRule::First;

        let low = reading("192.168.1.10", 111.0, 0.0);
        let high = reading("192.168.1.20", 999.0, 0.0);

        let forwards = combine(&[low.clone(), high.clone()], &rules).unwrap();
        let backwards = combine(&[high, low], &rules).unwrap();

        assert!((forwards.output_power_w - 111.0).abs() < 1e-9);
        assert_eq!(forwards, backwards);
    }

    #[test]
    fn mixed_rules_scenario() {
        // Two devices, Sum for power, Average for daily energy.
        let mut rules = CombinationRules::default();
        rules.output_power = CombinationRule::Sum;
        rules.energy_today = CombinationRule::Average;

        let a = reading("a", 100.0, 50.0);
        let b = reading("b", 150.0, 70.0);
        let agg = combine(&[a, b], &rules).unwrap();

        assert_eq!(agg.count, 2);
        assert!((agg.output_power_w - 250.0).abs() < 1e-9);
        assert!((agg.energy_today_kwh - 60.0).abs() < 1e-9);
    }

    #[test]
    fn rules_deserialize_from_toml_fragment() {
        let rules: CombinationRules =
            toml::from_str("energy_today = \"average\"\ngrid_current = \"first\"").unwrap();
        assert_eq!(rules.energy_today, CombinationRule::Average);
        assert_eq!(rules.grid_current, CombinationRule::First);
        // untouched fields keep their defaults
        assert_eq!(rules.output_power, CombinationRule::Sum);
    }
}
