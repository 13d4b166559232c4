//! Domain values derived from page data

pub mod driver;
pub mod race;
pub mod track;
pub mod tracker;
pub mod units;

pub use driver::{win_rate, BestLap, CarStats, Driver};
pub use race::{
    compute_results, decode_laps, sort_results, LapOutcome, RaceData, RaceResult, RaceStatus, ResultStatus,
    ResultsMemo, StatusGlyph,
};
pub use track::{track, Track, TRACKS};
pub use tracker::SpeedTracker;
pub use units::{Distance, Speed, Unit};
