use serde::{Deserialize, Serialize};

/// Lifetime meter values below this are pre-login placeholders, not real data.
pub const MIN_LIFE_METER: f64 = 2.0;

/// One scrape cycle's telemetry, values kept verbatim as the portal renders them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub instant_power: String,
    pub life_meter: String,
    pub trees_saved: String,
    pub oil_offset: String,
    pub co2_offset: String,
    /// Unix seconds of the cycle that produced this reading.
    pub last_update: i64,
}

impl Reading {
    /// Whether the reading is worth broadcasting to the broker.
    pub fn is_publishable(&self) -> bool {
        if self.instant_power.is_empty() {
            return false;
        }
        let life_meter = self.life_meter.trim().parse::<f64>().unwrap_or(0.0);
        life_meter >= MIN_LIFE_METER
    }
}
