// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor registry
//!
//! Sensors are platform code; the client only needs to know what a sensor
//! produces and how to read it. A scan probes every added sensor, activates
//! the ones present and registers their metric names for the heartbeat.

use crate::client::Client;
use crate::config::MAX_SENSORS;
use crate::error::{InputError, Result};
use crate::hal::Hal;
use thiserror::Error;

/// Static description of a sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorDescriptor {
    /// Model name, e.g. "BME280"
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Metric names, one per value returned by [`Sensor::read`]
    pub metrics: &'static [&'static str],
    /// Nominal sampling rate
    pub sample_rate_hz: f32,
}

/// Sensor read failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sensor read failed: {0}")]
pub struct SensorError(pub String);

/// A readable sensor
pub trait Sensor {
    /// What this sensor produces
    fn descriptor(&self) -> &SensorDescriptor;

    /// Check the device is present and initialize it
    fn probe(&mut self) -> bool {
        true
    }

    /// Fill `values`, one slot per descriptor metric
    fn read(&mut self, values: &mut [f64]) -> std::result::Result<(), SensorError>;
}

struct Entry {
    sensor: Box<dyn Sensor + Send>,
    active: bool,
}

/// Fixed-capacity set of sensors owned by the client
#[derive(Default)]
pub struct SensorRegistry {
    entries: Vec<Entry>,
}

impl SensorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sensor, inactive until scanned
    pub fn add(&mut self, sensor: Box<dyn Sensor + Send>) -> std::result::Result<usize, InputError> {
        if self.entries.len() >= MAX_SENSORS {
            return Err(InputError::QueueFull {
                capacity: MAX_SENSORS,
            });
        }
        self.entries.push(Entry {
            sensor,
            active: false,
        });
        Ok(self.entries.len() - 1)
    }

    /// Probe every sensor, returning how many are active
    pub fn scan(&mut self) -> usize {
        for entry in &mut self.entries {
            entry.active = entry.sensor.probe();
            if !entry.active {
                log::warn!("Sensor {} not detected", entry.sensor.descriptor().name);
            }
        }
        self.active_count()
    }

    /// Number of sensors added
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no sensor was added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of sensors that passed the last scan
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }

    /// Sensor at `index`
    pub fn get(&self, index: usize) -> Option<&(dyn Sensor + Send)> {
        self.entries.get(index).map(|e| e.sensor.as_ref())
    }

    /// Whether the sensor at `index` is active
    pub fn is_active(&self, index: usize) -> bool {
        self.entries.get(index).map_or(false, |e| e.active)
    }

    /// Descriptors of active sensors
    pub fn active_descriptors(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.active)
            .map(|e| e.sensor.descriptor())
    }

    /// Read every active sensor, skipping failures
    pub fn read_all(&mut self) -> Vec<(&'static str, f64)> {
        let mut readings = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| e.active) {
            let desc = *entry.sensor.descriptor();
            let mut values = vec![0.0; desc.metrics.len()];
            match entry.sensor.read(&mut values) {
                Ok(()) => readings.extend(desc.metrics.iter().copied().zip(values)),
                Err(e) => log::warn!("{}: {}", desc.name, e),
            }
        }
        readings
    }
}

impl std::fmt::Debug for SensorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.sensor.descriptor().name, e.active)))
            .finish()
    }
}

impl<H: Hal> Client<H> {
    /// Add a sensor to the registry
    pub fn add_sensor<S>(&mut self, sensor: S) -> Result<usize>
    where
        S: Sensor + Send + 'static,
    {
        Ok(self.sensors.add(Box::new(sensor))?)
    }

    /// Probe sensors and register the metrics of those present
    pub fn scan_sensors(&mut self) -> Result<usize> {
        let active = self.sensors.scan();
        let names: Vec<&'static str> = self
            .sensors
            .active_descriptors()
            .flat_map(|d| d.metrics.iter().copied())
            .collect();
        for name in names {
            self.register_metric(name)?;
        }
        log::info!("Sensor scan: {} of {} active", active, self.sensors.len());
        Ok(active)
    }

    /// Read active sensors and enqueue one number per metric
    ///
    /// Returns how many metrics were queued.
    pub fn read_sensors(&mut self) -> Result<usize> {
        let readings = self.sensors.read_all();
        let count = readings.len();
        for (name, value) in readings {
            self.enqueue_number(name, value)?;
        }
        Ok(count)
    }

    /// Number of sensors added
    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Sensor at `index`
    pub fn sensor(&self, index: usize) -> Option<&(dyn Sensor + Send)> {
        self.sensors.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::hal::MockHal;

    static CLIMATE: SensorDescriptor = SensorDescriptor {
        name: "BME280",
        description: "Temperature, humidity, pressure",
        metrics: &["temperature", "humidity", "pressure"],
        sample_rate_hz: 1.0,
    };

    struct FakeSensor {
        present: bool,
        fail: bool,
    }

    impl Sensor for FakeSensor {
        fn descriptor(&self) -> &SensorDescriptor {
            &CLIMATE
        }

        fn probe(&mut self) -> bool {
            self.present
        }

        fn read(&mut self, values: &mut [f64]) -> std::result::Result<(), SensorError> {
            if self.fail {
                return Err(SensorError("bus timeout".into()));
            }
            values.copy_from_slice(&[21.5, 40.0, 1013.25]);
            Ok(())
        }
    }

    fn client() -> Client<MockHal> {
        Client::with_config(MockHal::new(), "key", "dev-001", ClientConfig::manual_flush()).unwrap()
    }

    #[test]
    fn test_registry_capacity() {
        let mut reg = SensorRegistry::new();
        for _ in 0..MAX_SENSORS {
            reg.add(Box::new(FakeSensor { present: true, fail: false })).unwrap();
        }
        assert!(matches!(
            reg.add(Box::new(FakeSensor { present: true, fail: false })),
            Err(InputError::QueueFull { .. })
        ));
    }

    #[test]
    fn test_scan_activates_present_sensors() {
        let mut c = client();
        c.add_sensor(FakeSensor { present: true, fail: false }).unwrap();
        c.add_sensor(FakeSensor { present: false, fail: false }).unwrap();
        assert_eq!(c.sensor_count(), 2);
        assert_eq!(c.scan_sensors().unwrap(), 1);
        assert_eq!(c.registered_metrics(), ["temperature", "humidity", "pressure"]);
        assert_eq!(c.sensor(0).unwrap().descriptor().name, "BME280");
        assert!(c.sensor(2).is_none());
    }

    #[test]
    fn test_read_enqueues_values() {
        let mut c = client();
        c.add_sensor(FakeSensor { present: true, fail: false }).unwrap();
        // not scanned yet: nothing active
        assert_eq!(c.read_sensors().unwrap(), 0);

        c.scan_sensors().unwrap();
        assert_eq!(c.read_sensors().unwrap(), 3);
        assert_eq!(c.pending_count(), 3);
    }

    #[test]
    fn test_read_failure_skipped() {
        let mut c = client();
        c.add_sensor(FakeSensor { present: true, fail: true }).unwrap();
        c.add_sensor(FakeSensor { present: true, fail: false }).unwrap();
        c.scan_sensors().unwrap();
        assert_eq!(c.read_sensors().unwrap(), 3);
    }
}
