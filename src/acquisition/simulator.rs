//! Synthetic telemetry generator used when no receiver is attached.
//!
//! Every field is a closed-form function of the sample phase, so a run is
//! fully reproducible. Time runs on a virtual clock: the k-th sample (k >= 1)
//! is stamped `k * interval` milliseconds.

use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::domain::TelemetryRecord;

/// status square wave: high for the first half of every period
const STATUS_PERIOD_MS: u64 = 5000;
const STATUS_HIGH_MS: u64 = 2500;

const PHASE_STEP: f64 = 0.1;

const ORIGIN_LAT: f64 = -23.5505;
const ORIGIN_LON: f64 = -46.6333;

#[derive(Debug, Clone)]
pub struct Simulator {
    interval_ms: u64,
    samples: u64,
    phase: f64,
    max_altitude: f64,
}

impl Simulator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis().max(1) as u64,
            samples: 0,
            phase: 0.0,
            max_altitude: 0.0,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn next_record(&mut self) -> TelemetryRecord {
        self.samples += 1;
        let t = self.phase;
        let time_ms = self.samples * self.interval_ms;

        let status = u8::from(time_ms % STATUS_PERIOD_MS < STATUS_HIGH_MS);

        let temperature = 25.0 + 5.0 * (t * 0.1).sin();
        let pressure = 1013.25 + 2.0 * (t * 0.05).sin();
        let bmp_altitude = round(500.0 + 100.0 * (t * 0.02).sin(), 2);
        if bmp_altitude > self.max_altitude {
            self.max_altitude = bmp_altitude;
        }

        let accel_x = 0.5 * (t * 5.0).sin();
        let accel_y = 0.5 * (t * 5.0).cos();
        let accel_z = 9.81 + 0.2 * (t * 10.0).sin();

        let rotation_x = (t * 10.0) % 360.0;

        let latitude = ORIGIN_LAT + 0.001 * (t * 0.01).sin();
        let longitude = ORIGIN_LON + 0.001 * (t * 0.01).cos();
        let voltage = 4.2 - 0.01 * (t * 0.1);

        let fields = json!({
            "time": time_ms,
            "status": status,
            "pressure": round(pressure, 4),
            "temperature": round(temperature, 2),
            "bmp_altitude": bmp_altitude,
            "max_altitude": self.max_altitude,
            "accel_x": round(accel_x, 4),
            "accel_y": round(accel_y, 4),
            "accel_z": round(accel_z, 4),
            "rotation_x": round(rotation_x, 2),
            "rotation_y": 0.0,
            "rotation_z": 0.0,
            "latitude": round(latitude, 6),
            "longitude": round(longitude, 6),
            "gps_altitude": round(bmp_altitude + 5.0, 2),
            "voltage": round(voltage, 2),
        });

        self.phase += PHASE_STEP;

        match fields {
            Value::Object(map) => TelemetryRecord::new(map),
            _ => TelemetryRecord::new(Map::new()),
        }
    }
}

impl Iterator for Simulator {
    type Item = TelemetryRecord;

    fn next(&mut self) -> Option<TelemetryRecord> {
        Some(self.next_record())
    }
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
