//! Race leaderboard augmentation
//!
//! Every pass reads the race status and the participant rows, then injects
//! per-row decorations: a status glyph, a live speed estimate, the racing
//! skill looked up through the API and a profile link. The race payload is
//! not in the page markup; it is picked out of observed network traffic by
//! `race_data_listener` and handed over through a `RaceDataSlot`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::api::{ApiClient, ResponseEvent};
use crate::dom::{Document, Dom, NodeId, ObserveOptions, Selector};
use crate::lifecycle::PageLifecycle;
use crate::model::{track, Distance, Driver, RaceData, RaceResult, RaceStatus, ResultStatus, ResultsMemo, SpeedTracker, StatusGlyph, Unit};
use crate::reconciler::{sync_decoration, MutationReconciler, Reconcile, ReconcileReport};
use crate::store::{KeyValueStore, Namespaced};
use crate::waiter::ElementWaiter;
use crate::{ReconcilerConfig, Result};

pub const GLYPH_CLASS: &str = "rw-glyph";
pub const SPEED_CLASS: &str = "rw-speed";
pub const SKILL_CLASS: &str = "rw-skill";
pub const PROFILE_CLASS: &str = "rw-profile";
/// Attribute mirroring the parsed race status onto the container
pub const STATUS_ATTR: &str = "data-race-status";
/// Store key of the display unit preference (`"mph"` / `"kph"`)
pub const UNIT_KEY: &str = "speed_unit";

/// Latest race payload seen on the wire
#[derive(Clone, Default)]
pub struct RaceDataSlot(Arc<Mutex<Option<RaceData>>>);

impl RaceDataSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, race: RaceData) {
        *self.lock() = Some(race);
    }

    pub fn get(&self) -> Option<RaceData> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<RaceData>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Parse a race payload body, bare or wrapped in `raceData`
pub fn parse_race_payload(body: &str) -> Result<RaceData> {
    let value: Value = serde_json::from_str(body)?;
    let race = value.get("raceData").cloned().unwrap_or(value);
    Ok(serde_json::from_value(race)?)
}

/// Response listener for `ObservedTransport::on_response` that stores race
/// payloads from URLs containing `marker`
pub fn race_data_listener(slot: RaceDataSlot, marker: impl Into<String>) -> impl Fn(&ResponseEvent) + Send + Sync + 'static {
    let marker = marker.into();
    move |event: &ResponseEvent| {
        if !event.url.contains(&marker) || !(200..300).contains(&event.status) {
            return;
        }
        match parse_race_payload(&event.body) {
            Ok(race) => {
                log::debug!("race {} payload captured ({} participants)", race.race_id, race.participants.len());
                slot.set(race);
            }
            Err(e) => log::warn!("ignoring unreadable race payload from {}: {}", event.url, e),
        }
    }
}

/// One participant row as read from the page
#[derive(Debug, Clone)]
pub struct RowSnapshot {
    pub node: NodeId,
    pub driver_id: u64,
    pub name: String,
    pub completion_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LeaderboardSnapshot {
    pub status: RaceStatus,
    pub rows: Vec<RowSnapshot>,
    pub at: Instant,
}

/// Decorations for one row; `None` removes the decoration
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub node: NodeId,
    pub glyph: Option<String>,
    pub speed: Option<String>,
    pub skill: Option<String>,
    /// (link text, href)
    pub profile: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardUpdate {
    pub status: RaceStatus,
    pub rows: Vec<RowUpdate>,
}

#[derive(Debug, Clone, Copy)]
struct Toggles {
    glyphs: bool,
    speed: bool,
    skill: bool,
    profile_links: bool,
}

pub struct LeaderboardReconciler {
    api: ApiClient,
    store: Namespaced,
    driver: Driver,
    race_data: RaceDataSlot,
    memo: ResultsMemo,
    recorded_races: HashSet<u64>,
    /// Driver id -> when its skill lookup last failed
    failed_lookups: HashMap<u64, Instant>,
    tracker: SpeedTracker,
    status_selector: Selector,
    row_selector: Selector,
    config: ReconcilerConfig,
}

impl LeaderboardReconciler {
    pub fn new(
        api: ApiClient,
        store: Namespaced,
        driver: Driver,
        race_data: RaceDataSlot,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        Ok(LeaderboardReconciler {
            status_selector: Selector::parse(&config.status_selector)?,
            row_selector: Selector::parse(&config.row_selector)?,
            api,
            store,
            driver,
            race_data,
            memo: ResultsMemo::new(),
            recorded_races: HashSet::new(),
            failed_lookups: HashMap::new(),
            tracker: SpeedTracker::new(),
            config,
        })
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn memo(&self) -> &ResultsMemo {
        &self.memo
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Persist the display unit for speeds
    pub fn set_unit(&self, unit: Unit) {
        if let Err(e) = self.store.set(UNIT_KEY, unit.as_pref()) {
            log::warn!("could not persist unit preference: {}", e);
        }
    }

    fn unit(&self) -> Option<Unit> {
        self.store.get(UNIT_KEY).and_then(|raw| Unit::from_pref(&raw))
    }

    /// Persisted toggles win over the configured defaults
    fn toggles(&self) -> Toggles {
        Toggles {
            glyphs: self.store.flag("show_glyphs", self.config.show_glyphs),
            speed: self.store.flag("show_speed", self.config.show_speed),
            skill: self.store.flag("show_skill", self.config.show_skill),
            profile_links: self.store.flag("show_profile_links", self.config.show_profile_links),
        }
    }

    fn results_for(&mut self, race: &RaceData) -> Arc<Vec<RaceResult>> {
        let results = self.memo.get_or_compute(race);
        if self.recorded_races.insert(race.race_id) {
            self.record_own_result(race, &results);
        }
        results
    }

    fn record_own_result(&mut self, race: &RaceData, results: &[RaceResult]) {
        let Some(position) = results.iter().position(|r| r.driver_id == self.driver.id) else {
            return;
        };
        let mine = &results[position];
        if let Some(best) = mine.best_lap_ms {
            self.driver.record_lap(race.track_id, best, mine.car_id);
        }
        if let Some(car_id) = mine.car_id {
            let car_name = race
                .participants
                .iter()
                .find(|p| p.driver_id == self.driver.id)
                .and_then(|p| p.car_name.as_deref());
            let won = position == 0 && mine.status == ResultStatus::Finished;
            self.driver.record_car_result(car_id, car_name, won);
        }
        self.persist_driver();
    }

    fn persist_driver(&self) {
        if let Err(e) = self.driver.save(&self.store) {
            log::warn!("driver {} not persisted: {}", self.driver.id, e);
        }
    }

    fn speed_for(&mut self, row: &RowSnapshot, race: Option<&RaceData>, at: Instant, unit: Option<Unit>) -> Option<String> {
        let race = race?;
        let length = Distance::from_miles(track(race.track_id)?.length_miles).ok()?;
        let speed = match row.completion_pct {
            Some(pct) => self.tracker.observe(row.driver_id, pct, at, length, race.laps),
            None => self.tracker.last(row.driver_id),
        };
        speed.map(|s| s.display(unit))
    }

    /// Skill per driver id. Each lookup fails on its own; a driver whose
    /// lookup failed is not asked for again until `skill_retry_ms` passes.
    async fn fetch_skills(&mut self, rows: &[RowSnapshot], now: Instant) -> HashMap<u64, f64> {
        if self.api.active_key().is_none() {
            return HashMap::new();
        }
        let cooldown = Duration::from_millis(self.config.skill_retry_ms);
        self.failed_lookups.retain(|_, at| now.saturating_duration_since(*at) < cooldown);

        let lookups = rows.iter().filter(|row| !self.failed_lookups.contains_key(&row.driver_id)).map(|row| {
            let api = self.api.clone();
            let id = row.driver_id;
            async move {
                let path = format!("{}/personalstats", id);
                let outcome = api.request("user", &path, &[("stat", "racingskill")]).await;
                (id, outcome)
            }
        });

        let outcomes = join_all(lookups).await;
        let mut skills = HashMap::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(body) => match parse_racing_skill(&body) {
                    Some(skill) => {
                        skills.insert(id, skill);
                    }
                    None => log::debug!("no racing skill for driver {}", id),
                },
                Err(e) => {
                    log::warn!("skill lookup for driver {} failed: {}", id, e);
                    self.failed_lookups.insert(id, now);
                }
            }
        }
        skills
    }
}

/// `personalstats` as a list of `{name, value}` or as a flat object
fn parse_racing_skill(body: &Value) -> Option<f64> {
    fn number(v: &Value) -> Option<f64> {
        v.as_f64().or_else(|| v.as_str()?.trim().parse().ok())
    }
    match body.get("personalstats")? {
        Value::Array(stats) => stats
            .iter()
            .find(|s| s.get("name").and_then(Value::as_str) == Some("racingskill"))
            .and_then(|s| s.get("value"))
            .and_then(number),
        stats @ Value::Object(_) => stats
            .get("racingskill")
            .and_then(number)
            .or_else(|| stats.pointer("/racing/skill").and_then(number)),
        _ => None,
    }
}

fn parse_completion(text: &str) -> Option<f64> {
    let pct: f64 = text.trim().trim_end_matches('%').trim().parse().ok()?;
    pct.is_finite().then_some(pct)
}

impl Reconcile for LeaderboardReconciler {
    type Snapshot = LeaderboardSnapshot;
    type Update = LeaderboardUpdate;

    fn snapshot(&mut self, dom: &Dom, root: NodeId) -> Option<LeaderboardSnapshot> {
        let status_text = dom.select_first(&self.status_selector, root).map(|n| dom.text_content(n)).unwrap_or_default();
        let rows = dom
            .select_all(&self.row_selector, root)
            .into_iter()
            .filter_map(|node| {
                let driver_id = dom.attr(node, &self.config.driver_id_attr)?.trim().parse().ok()?;
                let name = dom
                    .child_with_class(node, &self.config.name_class)
                    .map(|n| dom.text_content(n).trim().to_string())
                    .unwrap_or_default();
                let completion_pct = dom
                    .child_with_class(node, &self.config.completion_class)
                    .and_then(|n| parse_completion(&dom.text_content(n)));
                Some(RowSnapshot { node, driver_id, name, completion_pct })
            })
            .collect();
        Some(LeaderboardSnapshot { status: RaceStatus::from_status_text(&status_text), rows, at: Instant::now() })
    }

    fn derive<'a>(&'a mut self, snap: LeaderboardSnapshot) -> BoxFuture<'a, LeaderboardUpdate> {
        async move {
            let toggles = self.toggles();
            let unit = self.unit();
            let race = self.race_data.get();
            let results = match (&race, snap.status) {
                (Some(race), RaceStatus::Finished) => Some(self.results_for(race)),
                (Some(race), RaceStatus::Racing) => self.memo.get(race.race_id),
                _ => None,
            };

            let skills = if toggles.skill { self.fetch_skills(&snap.rows, snap.at).await } else { HashMap::new() };
            if let Some(own) = skills.get(&self.driver.id) {
                if self.driver.update_skill(*own) {
                    self.persist_driver();
                }
            }

            let mut rows = Vec::with_capacity(snap.rows.len());
            for row in &snap.rows {
                let glyph = StatusGlyph::for_row(snap.status, results.as_deref().map(Vec::as_slice), row.driver_id);
                let speed = if snap.status == RaceStatus::Racing {
                    self.speed_for(row, race.as_ref(), snap.at, unit)
                } else {
                    None
                };
                let skill = if row.driver_id == self.driver.id && self.driver.skill() > 0.0 {
                    Some(self.driver.skill())
                } else {
                    skills.get(&row.driver_id).copied()
                };
                rows.push(RowUpdate {
                    node: row.node,
                    glyph: Some(glyph.to_string()).filter(|g| toggles.glyphs && !g.is_empty()),
                    speed: speed.filter(|_| toggles.speed),
                    skill: skill.filter(|_| toggles.skill).map(|s| format!("{:.2}", s)),
                    profile: toggles.profile_links.then(|| {
                        let text = if row.name.is_empty() { row.driver_id.to_string() } else { row.name.clone() };
                        (text, format!("{}{}", self.config.profile_url_base, row.driver_id))
                    }),
                });
            }
            LeaderboardUpdate { status: snap.status, rows }
        }
        .boxed()
    }

    fn apply(&mut self, dom: &mut Dom, root: NodeId, update: LeaderboardUpdate) -> Result<usize> {
        let mut writes = dom.set_attr(root, STATUS_ATTR, update.status.as_str())? as usize;
        for row in update.rows {
            if !dom.is_connected(row.node) {
                continue;
            }
            writes += sync_decoration(dom, row.node, "span", GLYPH_CLASS, row.glyph.as_deref(), &[])?;
            writes += sync_decoration(dom, row.node, "span", SPEED_CLASS, row.speed.as_deref(), &[])?;
            writes += sync_decoration(dom, row.node, "span", SKILL_CLASS, row.skill.as_deref(), &[])?;
            writes += match &row.profile {
                Some((text, href)) => {
                    sync_decoration(dom, row.node, "a", PROFILE_CLASS, Some(text.as_str()), &[("href", href.as_str())])?
                }
                None => sync_decoration(dom, row.node, "a", PROFILE_CLASS, None, &[])?,
            };
        }
        Ok(writes)
    }
}

/// Wait for the leaderboard container, then keep it reconciled until the
/// page tears down or the container goes away
pub async fn watch_leaderboard(
    doc: Document,
    waiter: &ElementWaiter,
    reconciler: LeaderboardReconciler,
    lifecycle: Option<PageLifecycle>,
) -> Result<ReconcileReport> {
    let container = waiter.defer(&reconciler.config.container_selector).await?;
    let period = Duration::from_millis(reconciler.config.sample_interval_ms);
    let mut watcher = MutationReconciler::new(doc, container, reconciler, ObserveOptions::all())?.with_sampling(period);
    if let Some(lifecycle) = lifecycle {
        watcher = watcher.with_lifecycle(lifecycle);
    }
    Ok(watcher.run().await)
}
