//! Race status, lap decoding and results
//!
//! Participant lap data arrives base64-encoded as a comma-separated list of
//! per-interval times in milliseconds. A lap is `intervals_per_lap`
//! consecutive intervals; a participant whose interval count does not cover
//! every scheduled lap crashed out.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Where a race stands, derived only from the status text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceStatus {
    Unknown,
    Racing,
    Finished,
    Waiting,
    Joined,
}

impl RaceStatus {
    /// Case-insensitive, independent of any previous status
    pub fn from_status_text(text: &str) -> Self {
        let t = text.trim().to_lowercase();
        match t.as_str() {
            "" => RaceStatus::Unknown,
            "race started" | "race in progress" => RaceStatus::Racing,
            "race finished" => RaceStatus::Finished,
            _ if t.contains("starts:") => RaceStatus::Waiting,
            _ => RaceStatus::Joined,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RaceStatus::Unknown => "unknown",
            RaceStatus::Racing => "racing",
            RaceStatus::Finished => "finished",
            RaceStatus::Waiting => "waiting",
            RaceStatus::Joined => "joined",
        }
    }
}

/// One participant as reported by the race payload
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(alias = "driverID", alias = "userID")]
    pub driver_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "carID")]
    pub car_id: Option<u64>,
    #[serde(default)]
    pub car_name: Option<String>,
    /// base64 of comma-separated interval milliseconds
    #[serde(default)]
    pub lap_data: String,
}

/// Race payload picked out of the host page's traffic
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RaceData {
    #[serde(alias = "raceID")]
    pub race_id: u64,
    #[serde(alias = "trackID")]
    pub track_id: u32,
    pub laps: u32,
    pub intervals_per_lap: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResultStatus {
    Finished,
    Crashed,
}

/// One participant's outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RaceResult {
    pub driver_id: u64,
    pub name: String,
    pub car_id: Option<u64>,
    pub status: ResultStatus,
    /// Sum of every interval; 0 for a crash
    pub race_time_ms: f64,
    /// Fastest lap; `None` for a crash
    pub best_lap_ms: Option<f64>,
}

/// Outcome of decoding one participant's lap data
#[derive(Debug, Clone, PartialEq)]
pub enum LapOutcome {
    Finished { race_time_ms: f64, best_lap_ms: f64 },
    Crashed,
}

/// Base64 comma-separated list of interval times
pub fn decode_intervals(encoded: &str) -> Result<Vec<f64>> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidArgument(format!("lap data is not base64: {}", e)))?;
    let text = String::from_utf8(raw).map_err(|_| Error::InvalidArgument("lap data is not UTF-8".into()))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|s| {
            let v: f64 = s
                .trim()
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("bad interval '{}'", s.trim())))?;
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidArgument(format!("bad interval '{}'", s.trim())));
            }
            Ok(v)
        })
        .collect()
}

/// Classify a participant from their encoded intervals
pub fn decode_laps(encoded: &str, laps: u32, intervals_per_lap: u32) -> Result<LapOutcome> {
    let intervals = decode_intervals(encoded)?;
    Ok(classify(&intervals, laps, intervals_per_lap))
}

fn classify(intervals: &[f64], laps: u32, intervals_per_lap: u32) -> LapOutcome {
    let per_lap = intervals_per_lap as usize;
    if laps == 0 || per_lap == 0 || intervals.len() != laps as usize * per_lap {
        return LapOutcome::Crashed;
    }
    let race_time_ms = intervals.iter().sum();
    let best_lap_ms = intervals
        .chunks(per_lap)
        .map(|lap| lap.iter().sum::<f64>())
        .fold(f64::INFINITY, f64::min);
    LapOutcome::Finished { race_time_ms, best_lap_ms }
}

/// Finished before crashed, then ascending time; ties keep input order
pub fn sort_results(results: &mut [RaceResult]) {
    results.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then(a.race_time_ms.partial_cmp(&b.race_time_ms).unwrap_or(Ordering::Equal))
    });
}

/// Decode every participant and sort the outcomes.
///
/// Undecodable lap data degrades that participant to a crash.
pub fn compute_results(race: &RaceData) -> Vec<RaceResult> {
    let mut results: Vec<RaceResult> = race
        .participants
        .iter()
        .map(|p| {
            let outcome = decode_laps(&p.lap_data, race.laps, race.intervals_per_lap).unwrap_or_else(|e| {
                log::warn!("race {}: driver {} lap data unusable: {}", race.race_id, p.driver_id, e);
                LapOutcome::Crashed
            });
            let (status, race_time_ms, best_lap_ms) = match outcome {
                LapOutcome::Finished { race_time_ms, best_lap_ms } => {
                    (ResultStatus::Finished, race_time_ms, Some(best_lap_ms))
                }
                LapOutcome::Crashed => (ResultStatus::Crashed, 0.0, None),
            };
            RaceResult {
                driver_id: p.driver_id,
                name: p.name.clone(),
                car_id: p.car_id,
                status,
                race_time_ms,
                best_lap_ms,
            }
        })
        .collect();
    sort_results(&mut results);
    results
}

/// Results computed at most once per race id
#[derive(Default)]
pub struct ResultsMemo {
    by_race: HashMap<u64, Arc<Vec<RaceResult>>>,
    computations: usize,
}

impl ResultsMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, race_id: u64) -> Option<Arc<Vec<RaceResult>>> {
        self.by_race.get(&race_id).cloned()
    }

    pub fn get_or_compute(&mut self, race: &RaceData) -> Arc<Vec<RaceResult>> {
        if let Some(done) = self.by_race.get(&race.race_id) {
            return done.clone();
        }
        self.computations += 1;
        let results = Arc::new(compute_results(race));
        log::debug!("race {}: computed {} results", race.race_id, results.len());
        self.by_race.insert(race.race_id, results.clone());
        results
    }

    /// How many times results were actually computed
    pub fn computations(&self) -> usize {
        self.computations
    }
}

/// Per-row marker shown next to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGlyph {
    None,
    Waiting,
    Racing,
    Position(usize),
    Crashed,
}

impl StatusGlyph {
    /// Pure in race status, the results (when known) and the driver id
    pub fn for_row(status: RaceStatus, results: Option<&[RaceResult]>, driver_id: u64) -> Self {
        match (status, results) {
            (RaceStatus::Finished | RaceStatus::Racing, Some(results)) => {
                match results.iter().position(|r| r.driver_id == driver_id) {
                    Some(i) if results[i].status == ResultStatus::Finished => StatusGlyph::Position(i + 1),
                    Some(_) => StatusGlyph::Crashed,
                    None => StatusGlyph::None,
                }
            }
            (RaceStatus::Racing, None) => StatusGlyph::Racing,
            (RaceStatus::Waiting | RaceStatus::Joined, _) => StatusGlyph::Waiting,
            _ => StatusGlyph::None,
        }
    }
}

impl fmt::Display for StatusGlyph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusGlyph::None => Ok(()),
            StatusGlyph::Waiting => f.write_str("⏳"),
            StatusGlyph::Racing => f.write_str("🏎️"),
            StatusGlyph::Position(1) => f.write_str("🥇"),
            StatusGlyph::Position(2) => f.write_str("🥈"),
            StatusGlyph::Position(3) => f.write_str("🥉"),
            StatusGlyph::Position(n) => write!(f, "{}", n),
            StatusGlyph::Crashed => f.write_str("💥"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        STANDARD.encode(s)
    }

    fn result(id: u64, status: ResultStatus, time: f64) -> RaceResult {
        RaceResult { driver_id: id, name: id.to_string(), car_id: None, status, race_time_ms: time, best_lap_ms: None }
    }

    #[test]
    fn status_transitions_are_pure() {
        assert_eq!(RaceStatus::from_status_text("Race Finished"), RaceStatus::Finished);
        assert_eq!(RaceStatus::from_status_text("  RACE STARTED "), RaceStatus::Racing);
        assert_eq!(RaceStatus::from_status_text("Race in progress"), RaceStatus::Racing);
        assert_eq!(RaceStatus::from_status_text("Starts: 00:01:23"), RaceStatus::Waiting);
        assert_eq!(RaceStatus::from_status_text("Waiting for drivers"), RaceStatus::Joined);
        assert_eq!(RaceStatus::from_status_text(""), RaceStatus::Unknown);
        assert_eq!(RaceStatus::from_status_text("   "), RaceStatus::Unknown);
    }

    #[test]
    fn complete_lap_data_sums_and_finds_best_lap() {
        // 2 laps x 3 intervals
        let data = b64("10,20,30,5,15,25");
        assert_eq!(
            decode_laps(&data, 2, 3).unwrap(),
            LapOutcome::Finished { race_time_ms: 105.0, best_lap_ms: 45.0 }
        );
    }

    #[test]
    fn fractional_intervals_are_accepted() {
        let data = b64("1.5, 2.5");
        assert_eq!(decode_laps(&data, 1, 2).unwrap(), LapOutcome::Finished { race_time_ms: 4.0, best_lap_ms: 4.0 });
    }

    #[test]
    fn short_lap_data_is_a_crash() {
        assert_eq!(decode_laps(&b64("10,20,30,5"), 2, 3).unwrap(), LapOutcome::Crashed);
        assert_eq!(decode_laps(&b64(""), 2, 3).unwrap(), LapOutcome::Crashed);
        assert_eq!(decode_laps(&b64("1,2"), 1, 0).unwrap(), LapOutcome::Crashed);
    }

    #[test]
    fn malformed_lap_data_is_an_error() {
        assert!(decode_laps("%%%", 1, 1).is_err());
        assert!(decode_laps(&b64("1,x"), 1, 2).is_err());
        assert!(decode_laps(&b64("1,-2"), 1, 2).is_err());
    }

    #[test]
    fn results_sort_finished_first_then_by_time() {
        let mut r = vec![
            result(1, ResultStatus::Finished, 120.0),
            result(2, ResultStatus::Crashed, 0.0),
            result(3, ResultStatus::Finished, 90.0),
        ];
        sort_results(&mut r);
        let order: Vec<u64> = r.iter().map(|x| x.driver_id).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn results_sort_is_stable_on_ties() {
        let mut r = vec![
            result(1, ResultStatus::Crashed, 0.0),
            result(2, ResultStatus::Finished, 50.0),
            result(3, ResultStatus::Crashed, 0.0),
            result(4, ResultStatus::Finished, 50.0),
        ];
        sort_results(&mut r);
        let order: Vec<u64> = r.iter().map(|x| x.driver_id).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    fn race() -> RaceData {
        serde_json::from_value(serde_json::json!({
            "raceID": 77, "trackID": 21, "laps": 2, "intervalsPerLap": 2,
            "participants": [
                {"driverID": 1, "name": "Ann", "lapData": b64("30,30,30,30")},
                {"driverID": 2, "name": "Bo", "lapData": b64("30,30")},
                {"driverID": 3, "name": "Cy", "carID": 9, "lapData": b64("20,20,25,25")},
                {"driverID": 4, "name": "Di", "lapData": "not base64!"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn compute_results_from_payload() {
        let r = compute_results(&race());
        let order: Vec<(u64, ResultStatus)> = r.iter().map(|x| (x.driver_id, x.status)).collect();
        assert_eq!(
            order,
            vec![
                (3, ResultStatus::Finished),
                (1, ResultStatus::Finished),
                (2, ResultStatus::Crashed),
                (4, ResultStatus::Crashed),
            ]
        );
        assert_eq!(r[0].race_time_ms, 90.0);
        assert_eq!(r[0].best_lap_ms, Some(40.0));
        assert_eq!(r[0].car_id, Some(9));
        assert_eq!(r[2].race_time_ms, 0.0);
    }

    #[test]
    fn memo_computes_once_per_race() {
        let mut memo = ResultsMemo::new();
        let race = race();
        assert!(memo.get(77).is_none());
        let a = memo.get_or_compute(&race);
        let b = memo.get_or_compute(&race);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(memo.computations(), 1);
        assert!(memo.get(77).is_some());
    }

    #[test]
    fn glyphs() {
        let r = compute_results(&race());
        assert_eq!(StatusGlyph::for_row(RaceStatus::Finished, Some(r.as_slice()), 3), StatusGlyph::Position(1));
        assert_eq!(StatusGlyph::for_row(RaceStatus::Finished, Some(r.as_slice()), 2), StatusGlyph::Crashed);
        assert_eq!(StatusGlyph::for_row(RaceStatus::Racing, Some(r.as_slice()), 1), StatusGlyph::Position(2));
        assert_eq!(StatusGlyph::for_row(RaceStatus::Racing, None, 1), StatusGlyph::Racing);
        assert_eq!(StatusGlyph::for_row(RaceStatus::Finished, None, 1), StatusGlyph::None);
        assert_eq!(StatusGlyph::for_row(RaceStatus::Waiting, None, 1), StatusGlyph::Waiting);
        assert_eq!(StatusGlyph::for_row(RaceStatus::Unknown, Some(r.as_slice()), 1), StatusGlyph::None);
        assert_eq!(StatusGlyph::Position(1).to_string(), "🥇");
        assert_eq!(StatusGlyph::Position(7).to_string(), "7");
        assert_eq!(StatusGlyph::None.to_string(), "");
    }
}
