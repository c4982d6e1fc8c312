use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::sensor::{Sensor, SensorType};

pub const MIN_VALUE: f64 = 20.0;
pub const MAX_VALUE: f64 = 100.0;

/// One synthetic measurement. Created per tick and handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: SensorType,
    pub period: u64,
    pub value: f64,
    /// Epoch seconds with sub-second precision.
    pub timestamp: f64,
}

pub fn generate(sensor: &Sensor) -> Reading {
    generate_with(sensor, &mut rand::thread_rng())
}

/// Uniform value in `[MIN_VALUE, MAX_VALUE]` rounded to two decimals,
/// whatever the sensor type.
pub fn generate_with<R: Rng + ?Sized>(sensor: &Sensor, rng: &mut R) -> Reading {
    let raw: f64 = rng.gen_range(MIN_VALUE..=MAX_VALUE);
    Reading {
        id: sensor.id,
        kind: sensor.kind,
        period: sensor.period,
        value: ((raw * 100.0).round() / 100.0).clamp(MIN_VALUE, MAX_VALUE),
        timestamp: now_epoch_seconds(),
    }
}

fn now_epoch_seconds() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}
