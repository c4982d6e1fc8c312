use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::error::{Result, SimulatorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Humidity,
    Temperature,
}

impl SensorType {
    pub const ALL: [SensorType; 2] = [SensorType::Humidity, SensorType::Temperature];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Humidity => "humidity",
            SensorType::Temperature => "temperature",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated sensor. `id` is its position in the input list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: SensorType,
    /// Seconds between readings.
    pub period: u64,
}

fn allowed_types() -> String {
    let names: Vec<String> = SensorType::ALL
        .iter()
        .map(|kind| format!("'{}'", kind.as_str()))
        .collect();
    format!("({})", names.join(", "))
}

/// Turns a raw `[[type, period], ...]` list into sensors.
///
/// Elements are checked in order; the first failing check is reported.
pub fn validate(raw: &Value) -> Result<Vec<Sensor>> {
    let entries = raw
        .as_array()
        .ok_or_else(|| SimulatorError::InvalidFormat("Sensors values must be a list".into()))?;

    let mut sensors = Vec::with_capacity(entries.len());
    for (id, entry) in entries.iter().enumerate() {
        let sensor = validate_entry(id, entry)?;
        info!(
            "Sensors successfully initialized: {}",
            serde_json::to_string(&sensor).unwrap_or_default()
        );
        sensors.push(sensor);
    }
    Ok(sensors)
}

fn validate_entry(id: usize, entry: &Value) -> Result<Sensor> {
    let pair = match entry.as_array() {
        Some(pair) if pair.len() == 2 => pair,
        _ => {
            return Err(SimulatorError::InvalidFormat(
                "Each sensor must be a tuple of 2 values.".into(),
            ))
        }
    };

    // Floats and booleans are not integers.
    let period = pair[1]
        .as_i64()
        .map(i128::from)
        .or_else(|| pair[1].as_u64().map(i128::from));
    let (Some(name), Some(period)) = (pair[0].as_str(), period) else {
        return Err(SimulatorError::InvalidFormat(
            "Each tuple must contain a sensor type (string) and sensor period (int).".into(),
        ));
    };

    let kind = SensorType::parse(name).ok_or_else(|| {
        SimulatorError::InvalidSensorType(format!(
            "Sensor type must be one of: {}",
            allowed_types()
        ))
    })?;

    if period <= 0 {
        return Err(SimulatorError::InvalidPeriod(format!(
            "Sensor period must be a positive integer, got {period}."
        )));
    }

    let period = u64::try_from(period).map_err(|_| {
        SimulatorError::InvalidPeriod(format!(
            "Sensor period must be a positive integer, got {period}."
        ))
    })?;

    Ok(Sensor { id, kind, period })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    #[traced_test]
    #[test]
    fn test_valid_list_keeps_order_and_ids() {
        let sensors = validate(&json!([["humidity", 5], ["temperature", 1], ["humidity", 2]]))
            .unwrap();

        let ids: Vec<usize> = sensors.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(sensors[0].kind, SensorType::Humidity);
        assert_eq!(sensors[0].period, 5);
        assert_eq!(sensors[1].kind, SensorType::Temperature);
        assert_eq!(sensors[1].period, 1);
        assert_eq!(sensors[2].period, 2);

        assert!(logs_contain(
            r#"Sensors successfully initialized: {"id":1,"type":"temperature","period":1}"#
        ));
    }

    #[test]
    fn test_empty_list_is_valid() {
        assert!(validate(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_not_a_list() {
        for raw in [json!("not_a_list"), json!({"humidity": 3}), json!(null), json!(3)] {
            let err = validate(&raw).unwrap_err();
            assert_eq!(
                err,
                SimulatorError::InvalidFormat("Sensors values must be a list".into())
            );
        }
    }

    #[test]
    fn test_wrong_arity() {
        for raw in [
            json!([["humidity"]]),
            json!([["humidity", 3, 1]]),
            json!(["humidity"]),
            json!([{"type": "humidity", "period": 3}]),
        ] {
            let err = validate(&raw).unwrap_err();
            assert_eq!(err.to_string(), "Each sensor must be a tuple of 2 values.");
            assert!(matches!(err, SimulatorError::InvalidFormat(_)));
        }
    }

    #[test]
    fn test_wrong_item_types() {
        for raw in [
            json!([[3, "humidity"]]),
            json!([["humidity", "3"]]),
            json!([["humidity", 2.5]]),
            json!([["humidity", true]]),
            json!([[null, 3]]),
        ] {
            let err = validate(&raw).unwrap_err();
            assert_eq!(
                err,
                SimulatorError::InvalidFormat(
                    "Each tuple must contain a sensor type (string) and sensor period (int)."
                        .into()
                ),
                "input: {raw}"
            );
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = validate(&json!([["pressure", 3]])).unwrap_err();
        assert_eq!(
            err,
            SimulatorError::InvalidSensorType(
                "Sensor type must be one of: ('humidity', 'temperature')".into()
            )
        );
        // Matching is case sensitive.
        assert!(validate(&json!([["Humidity", 3]])).is_err());
    }

    #[test]
    fn test_non_positive_period() {
        let err = validate(&json!([["humidity", 0]])).unwrap_err();
        assert_eq!(
            err,
            SimulatorError::InvalidPeriod("Sensor period must be a positive integer, got 0.".into())
        );
        assert!(matches!(
            validate(&json!([["temperature", -4]])),
            Err(SimulatorError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_period_beyond_i64_is_an_integer() {
        let sensors = validate(&json!([["humidity", u64::MAX]])).unwrap();
        assert_eq!(sensors[0].period, u64::MAX);
    }

    #[test]
    fn test_first_failure_wins() {
        let err = validate(&json!([["humidity", 3], ["pressure", 1], ["humidity"]])).unwrap_err();
        assert!(matches!(err, SimulatorError::InvalidSensorType(_)));
    }

    #[test]
    fn test_sensor_serialization() {
        let sensor = Sensor {
            id: 0,
            kind: SensorType::Humidity,
            period: 3,
        };
        assert_eq!(
            serde_json::to_value(&sensor).unwrap(),
            json!({"id": 0, "type": "humidity", "period": 3})
        );
    }
}
