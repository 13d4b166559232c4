//! The current user as a driver, persisted across page loads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::KeyValueStore;
use crate::{Error, Result};

/// Store key for the serialized driver record
pub const DRIVER_KEY: &str = "driver";

/// Fastest lap seen on one track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestLap {
    pub lap_ms: f64,
    #[serde(default)]
    pub car_id: Option<u64>,
}

/// Per-car totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarStats {
    #[serde(default)]
    pub name: String,
    pub races_entered: u32,
    pub races_won: u32,
}

impl CarStats {
    pub fn win_rate(&self) -> f64 {
        win_rate(self.races_won, self.races_entered)
    }
}

/// Share of races won; 0 when nothing was entered
pub fn win_rate(won: u32, entered: u32) -> f64 {
    if entered == 0 {
        return 0.0;
    }
    won as f64 / entered as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: u64,
    skill: f64,
    #[serde(default)]
    records: BTreeMap<u32, BestLap>,
    #[serde(default)]
    cars: BTreeMap<u64, CarStats>,
}

#[derive(Deserialize)]
struct Identity {
    id: u64,
}

impl Driver {
    pub fn new(id: u64) -> Self {
        Driver { id, skill: 0.0, records: BTreeMap::new(), cars: BTreeMap::new() }
    }

    /// Build from the page's embedded identity payload (`{"id": .., ...}`)
    pub fn from_identity_payload(json: &str) -> Result<Self> {
        let identity: Identity = serde_json::from_str(json)
            .map_err(|e| Error::InvalidArgument(format!("identity payload: {}", e)))?;
        Ok(Driver::new(identity.id))
    }

    pub fn skill(&self) -> f64 {
        self.skill
    }

    /// Raise skill to `value`. Lower or non-finite readings are stale and
    /// ignored. Returns whether the stored skill changed.
    pub fn update_skill(&mut self, value: f64) -> bool {
        if !value.is_finite() || value <= self.skill {
            if value < self.skill {
                log::debug!("driver {}: ignoring skill regression {} < {}", self.id, value, self.skill);
            }
            return false;
        }
        self.skill = value;
        true
    }

    pub fn records(&self) -> &BTreeMap<u32, BestLap> {
        &self.records
    }

    pub fn best_lap(&self, track_id: u32) -> Option<BestLap> {
        self.records.get(&track_id).copied()
    }

    /// Keep `lap_ms` if it beats the current record for the track
    pub fn record_lap(&mut self, track_id: u32, lap_ms: f64, car_id: Option<u64>) -> bool {
        if !lap_ms.is_finite() || lap_ms <= 0.0 {
            return false;
        }
        match self.records.get(&track_id) {
            Some(best) if best.lap_ms <= lap_ms => false,
            _ => {
                self.records.insert(track_id, BestLap { lap_ms, car_id });
                true
            }
        }
    }

    pub fn cars(&self) -> &BTreeMap<u64, CarStats> {
        &self.cars
    }

    pub fn record_car_result(&mut self, car_id: u64, name: Option<&str>, won: bool) {
        let stats = self.cars.entry(car_id).or_default();
        if let Some(name) = name {
            stats.name = name.to_string();
        }
        stats.races_entered += 1;
        if won {
            stats.races_won += 1;
        }
    }

    /// Fold a previously persisted record for the same driver into this one.
    ///
    /// Skill stays monotonic, the faster lap per track wins and car totals
    /// take the larger count. Records for another driver are ignored.
    pub fn merge(&mut self, other: &Driver) -> bool {
        if other.id != self.id {
            return false;
        }
        self.update_skill(other.skill);
        for (track, lap) in &other.records {
            self.record_lap(*track, lap.lap_ms, lap.car_id);
        }
        for (car, theirs) in &other.cars {
            let ours = self.cars.entry(*car).or_default();
            if ours.name.is_empty() {
                ours.name = theirs.name.clone();
            }
            ours.races_entered = ours.races_entered.max(theirs.races_entered);
            ours.races_won = ours.races_won.max(theirs.races_won);
        }
        true
    }

    /// The current driver, merged with whatever was persisted for the same id
    pub fn load(store: &dyn KeyValueStore, current_id: u64) -> Driver {
        let mut driver = Driver::new(current_id);
        let Some(raw) = store.get(DRIVER_KEY) else {
            return driver;
        };
        match serde_json::from_str::<Driver>(&raw) {
            Ok(saved) if saved.id == current_id => {
                driver.merge(&saved);
            }
            Ok(saved) => log::debug!("persisted driver {} is not the current user {}", saved.id, current_id),
            Err(e) => log::warn!("discarding unreadable driver record: {}", e),
        }
        driver
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let json = serde_json::to_string(self).map_err(|e| Error::Storage(e.to_string()))?;
        store.set(DRIVER_KEY, &json)
    }
}
