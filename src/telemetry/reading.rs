//! Sensor readings and their wire payload form
//!
//! A [`SensorReading`] is the ephemeral value produced by a generator; it is
//! converted to a [`WirePayload`] and serialized immediately before publish,
//! never retained after send.

use serde::Serialize;

/// One synthetic sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub car_name: String,
    pub temperature: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub pressure: i64,
    pub rpm: i64,
    pub speed: i64,
    pub battery: f64,
    pub timestamp: u64,
}

/// JSON payload published on the data topic.
///
/// Field declaration order is the serialized field order; consumers depend
/// on it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WirePayload {
    pub car_name: String,
    pub temperature: String,
    pub location: String,
    #[serde(rename = "geoJSON")]
    pub geo_json: GeoJson,
    pub pressure: i64,
    pub rpm: i64,
    pub speed: i64,
    pub battery: String,
    pub timestamp: u64,
}

/// GeoJSON point with stringified coordinates
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeoJson {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [String; 2],
}

impl SensorReading {
    /// Format for the wire: temperature and battery as one-fractional-digit
    /// strings, location and coordinates with five decimal places.
    pub fn to_wire(&self) -> WirePayload {
        let lon = format!("{:.5}", self.longitude);
        let lat = format!("{:.5}", self.latitude);

        WirePayload {
            car_name: self.car_name.clone(),
            temperature: format!("{:.1}", self.temperature),
            location: format!("{lon}, {lat}"),
            geo_json: GeoJson {
                kind: "Point".to_string(),
                coordinates: [lon, lat],
            },
            pressure: self.pressure,
            rpm: self.rpm,
            speed: self.speed,
            battery: format!("{:.1}", self.battery),
            timestamp: self.timestamp,
        }
    }
}
