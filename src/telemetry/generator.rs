//! Synthetic sensor reading generation

use super::reading::SensorReading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Produces the lazy sequence of readings the publish loop draws from
pub trait ReadingGenerator: Send {
    fn next_reading(&mut self) -> SensorReading;
}

/// Random-walk vehicle simulator.
///
/// Temperature is sampled uniformly per reading; the remaining signals drift
/// from their previous values. Timestamps are whole seconds on a monotonic
/// clock since the simulator was created.
#[derive(Debug)]
pub struct VehicleSimulator {
    rng: StdRng,
    started: Instant,
    longitude: f64,
    latitude: f64,
    pressure: i64,
    rpm: i64,
    speed: i64,
    battery: f64,
}

const TEMP_MIN: f64 = 20.0;
const TEMP_MAX: f64 = 40.0;

impl VehicleSimulator {
    /// Simulator with the stock starting point and a fresh seed
    pub fn new() -> Self {
        Self::seeded(rand::random())
    }

    /// Deterministic simulator for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            started: Instant::now(),
            longitude: 39.09972,
            latitude: -94.57853,
            pressure: 111,
            rpm: 2216,
            speed: 18,
            battery: 12.3,
        }
    }

    /// Walk direction: -1, 0, or 1
    fn drift(&mut self) -> f64 {
        f64::from(self.rng.gen_range(-1i32..2))
    }
}

impl Default for VehicleSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingGenerator for VehicleSimulator {
    fn next_reading(&mut self) -> SensorReading {
        let temperature = self.rng.gen_range(TEMP_MIN..=TEMP_MAX);
        let lon_step = self.drift() * self.rng.gen::<f64>() * 0.001;
        let lat_step = self.drift() * self.rng.gen::<f64>() * 0.001;
        self.longitude += lon_step;
        self.latitude += lat_step;
        self.pressure += (self.drift() * self.rng.gen::<f64>() * 5.0) as i64;
        self.rpm += (self.drift() * self.rng.gen::<f64>() * 10.0) as i64;
        self.speed += (self.drift() * self.rng.gen::<f64>() * 2.0) as i64;
        self.battery += self.drift() * self.rng.gen::<f64>() * 0.1;

        SensorReading {
            car_name: format!("car-{}", self.rng.gen_range(1..=100)),
            temperature,
            longitude: self.longitude,
            latitude: self.latitude,
            pressure: self.pressure,
            rpm: self.rpm,
            speed: self.speed,
            battery: self.battery,
            timestamp: self.started.elapsed().as_secs(),
        }
    }
}
