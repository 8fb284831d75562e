//! Durable per-map play statistics.
//!
//! Records live in the key-value store under [`RECORDS_KEY`] as an object
//! keyed by map id. A bounded history of finished raid intervals backs the
//! `today` and `7d` windows; `all` reads the cumulative records. Every
//! mutating operation notifies the registered change listeners after the new
//! state has been persisted.
//!
//! Older builds kept a single flat `top_maps` object. [`AggregateStore::init`]
//! folds it into the current layout once and stamps the schema version.

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::kv::KvStore;
use chrono::{Local, TimeZone};
use raidclock_protocol::StatsRange;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const RECORDS_KEY: &str = "aggregates.records";
pub const HISTORY_KEY: &str = "aggregates.history";
pub const SCHEMA_VERSION_KEY: &str = "aggregates.schema_version";
pub const LEGACY_TOP_MAPS_KEY: &str = "top_maps";
pub const SCHEMA_VERSION: u64 = 2;
pub const HISTORY_LIMIT: usize = 5000;
/// Map id used for raid intervals that ended before any map was reported.
pub const UNKNOWN_MAP_ID: &str = "unknown";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub map_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub play_count: u64,
    pub total_play_time_ms: u64,
    pub last_played: i64,
    pub first_played: i64,
    #[serde(default)]
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub map_id: String,
    pub ended_at: i64,
    pub duration_ms: u64,
}

/// One row of a ranked query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMap {
    pub rank: usize,
    pub map_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub play_count: u64,
    pub total_play_time_ms: u64,
    pub last_played: i64,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_play_time_ms: u64,
    pub total_plays: u64,
    pub unique_maps: usize,
    pub favorite_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_map: Option<RankedMap>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub kept: usize,
    pub repaired: usize,
    pub discarded: usize,
}

impl RecoveryReport {
    pub fn changed(&self) -> bool {
        self.repaired > 0 || self.discarded > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateChange {
    Recorded { map_id: String },
    FavoriteChanged { map_id: String },
    TitleChanged { map_id: String },
    Migrated { records: usize },
    Recovered(RecoveryReport),
    Reset,
}

pub type ChangeListener = Arc<dyn Fn(&AggregateChange) + Send + Sync>;

#[derive(Default)]
struct Cache {
    records: BTreeMap<String, AggregateRecord>,
    history: Vec<HistoryEntry>,
}

pub struct AggregateStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Cache>,
    listeners: Mutex<Vec<(u64, ChangeListener)>>,
    next_listener: Mutex<u64>,
}

impl AggregateStore {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cache: Mutex::new(Cache::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        }
    }

    /// Migrates legacy storage (once) and loads the records, repairing what it can.
    pub fn init(&self) -> Result<RecoveryReport> {
        let version = self
            .read_lenient(SCHEMA_VERSION_KEY)?
            .and_then(|value| value.as_u64())
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            let migrated = self.migrate_legacy()?;
            self.store
                .set(SCHEMA_VERSION_KEY, &Value::from(SCHEMA_VERSION))?;
            if migrated > 0 {
                info!(records = migrated, "Migrated legacy map statistics");
                self.notify(&AggregateChange::Migrated { records: migrated });
            }
        }

        self.recover()
    }

    /// Reloads records and history leniently, rewriting storage when anything was repaired.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let raw_records = self.read_lenient(RECORDS_KEY)?;
        let raw_history = self.read_lenient(HISTORY_KEY)?;

        let mut report = RecoveryReport::default();
        let records = match raw_records {
            None => BTreeMap::new(),
            Some(Value::Object(table)) => repair_records(&table, &mut report),
            Some(other) => {
                warn!(kind = json_kind(&other), "Discarding non-object map record table");
                report.discarded += 1;
                BTreeMap::new()
            }
        };

        let (history, dropped_history) = match raw_history {
            None => (Vec::new(), false),
            Some(Value::Array(entries)) => {
                let total = entries.len();
                let parsed: Vec<HistoryEntry> = entries
                    .into_iter()
                    .filter_map(|entry| serde_json::from_value(entry).ok())
                    .collect();
                let dropped = parsed.len() != total;
                if dropped {
                    warn!(dropped = total - parsed.len(), "Dropped malformed history entries");
                }
                (parsed, dropped)
            }
            Some(_) => (Vec::new(), true),
        };

        {
            let mut cache = self.lock_cache()?;
            cache.records = records;
            cache.history = history;
            cap_history(&mut cache.history);
            if report.changed() {
                self.persist_records(&cache.records)?;
            }
            if dropped_history {
                self.persist_history(&cache.history)?;
            }
        }

        debug!(
            kept = report.kept,
            repaired = report.repaired,
            discarded = report.discarded,
            "Map statistics loaded"
        );
        if report.changed() {
            self.notify(&AggregateChange::Recovered(report));
        }
        Ok(report)
    }

    /// Folds one finished raid interval into the statistics for `map_id`.
    pub fn record_session_end(&self, map_id: &str, duration_ms: u64) -> Result<AggregateRecord> {
        let map_id = normalize_map_id(map_id);
        let now = self.clock.now_ms();

        let record = {
            let mut cache = self.lock_cache()?;
            let mut record = cache
                .records
                .get(&map_id)
                .cloned()
                .unwrap_or_else(|| AggregateRecord {
                    map_id: map_id.clone(),
                    title: None,
                    play_count: 0,
                    total_play_time_ms: 0,
                    last_played: now,
                    first_played: now,
                    is_favorite: false,
                });
            record.play_count = record.play_count.saturating_add(1);
            record.total_play_time_ms = record.total_play_time_ms.saturating_add(duration_ms);
            record.last_played = now;

            let mut records = cache.records.clone();
            records.insert(map_id.clone(), record.clone());
            let mut history = cache.history.clone();
            history.push(HistoryEntry {
                map_id: map_id.clone(),
                ended_at: now,
                duration_ms,
            });
            cap_history(&mut history);

            // The cache only changes once both writes have landed.
            self.persist_records(&records)?;
            if let Err(err) = self.persist_history(&history) {
                if let Err(restore) = self.persist_records(&cache.records) {
                    warn!(error = %restore, "Failed to restore map records after history write failure");
                }
                return Err(err);
            }
            cache.records = records;
            cache.history = history;
            record
        };

        info!(
            map_id = %record.map_id,
            duration_ms,
            play_count = record.play_count,
            "Recorded raid"
        );
        self.notify(&AggregateChange::Recorded { map_id });
        Ok(record)
    }

    /// Registers a listener invoked after every mutation. Returns an id for [`Self::off_change`].
    pub fn on_change<F>(&self, listener: F) -> u64
    where
        F: Fn(&AggregateChange) + Send + Sync + 'static,
    {
        let id = match self.next_listener.lock() {
            Ok(mut next) => {
                *next += 1;
                *next
            }
            Err(_) => 0,
        };
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    pub fn off_change(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(existing, _)| *existing != id);
        }
    }

    /// Maps ranked by time played within `range`, then most recent, then id.
    pub fn query(&self, range: StatsRange) -> Result<Vec<RankedMap>> {
        let cache = self.lock_cache()?;
        let mut rows: Vec<RankedMap> = match self.window_start(range) {
            None => cache
                .records
                .values()
                .map(|record| RankedMap {
                    rank: 0,
                    map_id: record.map_id.clone(),
                    title: record.title.clone(),
                    play_count: record.play_count,
                    total_play_time_ms: record.total_play_time_ms,
                    last_played: record.last_played,
                    is_favorite: record.is_favorite,
                })
                .collect(),
            Some(since) => {
                let mut windowed: HashMap<&str, (u64, u64, i64)> = HashMap::new();
                for entry in cache.history.iter().filter(|entry| entry.ended_at >= since) {
                    let slot = windowed.entry(entry.map_id.as_str()).or_insert((0, 0, i64::MIN));
                    slot.0 += 1;
                    slot.1 = slot.1.saturating_add(entry.duration_ms);
                    slot.2 = slot.2.max(entry.ended_at);
                }
                windowed
                    .into_iter()
                    .map(|(map_id, (plays, total, last))| {
                        let record = cache.records.get(map_id);
                        RankedMap {
                            rank: 0,
                            map_id: map_id.to_string(),
                            title: record.and_then(|record| record.title.clone()),
                            play_count: plays,
                            total_play_time_ms: total,
                            last_played: last,
                            is_favorite: record.map(|record| record.is_favorite).unwrap_or(false),
                        }
                    })
                    .collect()
            }
        };

        rows.sort_by(compare_ranked);
        for (index, row) in rows.iter_mut().enumerate() {
            row.rank = index + 1;
        }
        Ok(rows)
    }

    /// Every record, favourites first, then most recently played.
    pub fn library(&self) -> Result<Vec<AggregateRecord>> {
        let cache = self.lock_cache()?;
        let mut records: Vec<AggregateRecord> = cache.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.is_favorite
                .cmp(&a.is_favorite)
                .then_with(|| b.last_played.cmp(&a.last_played))
                .then_with(|| a.map_id.cmp(&b.map_id))
        });
        Ok(records)
    }

    pub fn dashboard(&self, range: StatsRange) -> Result<Dashboard> {
        let ranked = self.query(range)?;
        let favorite_count = {
            let cache = self.lock_cache()?;
            cache.records.values().filter(|record| record.is_favorite).count()
        };
        Ok(Dashboard {
            total_play_time_ms: ranked.iter().map(|row| row.total_play_time_ms).sum(),
            total_plays: ranked.iter().map(|row| row.play_count).sum(),
            unique_maps: ranked.len(),
            favorite_count,
            top_map: ranked.into_iter().next(),
        })
    }

    pub fn get(&self, map_id: &str) -> Result<Option<AggregateRecord>> {
        let cache = self.lock_cache()?;
        Ok(cache.records.get(map_id).cloned())
    }

    /// Returns `false` when no record exists for `map_id`.
    pub fn set_favorite(&self, map_id: &str, favorite: bool) -> Result<bool> {
        {
            let mut cache = self.lock_cache()?;
            let Some(record) = cache.records.get(map_id) else {
                return Ok(false);
            };
            if record.is_favorite == favorite {
                return Ok(true);
            }
            let mut updated = record.clone();
            updated.is_favorite = favorite;
            self.commit_record(&mut cache, updated)?;
        }
        self.notify(&AggregateChange::FavoriteChanged {
            map_id: map_id.to_string(),
        });
        Ok(true)
    }

    /// Returns `false` when no record exists for `map_id`.
    pub fn set_title(&self, map_id: &str, title: &str) -> Result<bool> {
        let title = title.trim();
        {
            let mut cache = self.lock_cache()?;
            let Some(record) = cache.records.get(map_id) else {
                return Ok(false);
            };
            let title = (!title.is_empty()).then(|| title.to_string());
            if record.title == title {
                return Ok(true);
            }
            let mut updated = record.clone();
            updated.title = title;
            self.commit_record(&mut cache, updated)?;
        }
        self.notify(&AggregateChange::TitleChanged {
            map_id: map_id.to_string(),
        });
        Ok(true)
    }

    /// Deletes every record and the history.
    pub fn reset(&self) -> Result<()> {
        {
            let mut cache = self.lock_cache()?;
            self.store.remove(RECORDS_KEY)?;
            self.store.remove(HISTORY_KEY)?;
            cache.records.clear();
            cache.history.clear();
        }
        info!("Map statistics reset");
        self.notify(&AggregateChange::Reset);
        Ok(())
    }

    fn window_start(&self, range: StatsRange) -> Option<i64> {
        let now = self.clock.now_ms();
        match range {
            StatsRange::All => None,
            StatsRange::SevenDays => Some(now.saturating_sub(7 * DAY_MS)),
            StatsRange::Today => Some(local_midnight(now).unwrap_or(now.saturating_sub(DAY_MS))),
        }
    }

    fn migrate_legacy(&self) -> Result<usize> {
        let Some(legacy) = self.read_lenient(LEGACY_TOP_MAPS_KEY)? else {
            return Ok(0);
        };
        let Value::Object(table) = legacy else {
            warn!("Legacy map statistics are not an object; dropping them");
            self.store.remove(LEGACY_TOP_MAPS_KEY)?;
            return Ok(0);
        };

        let mut records: Map<String, Value> = match self.read_lenient(RECORDS_KEY)? {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };

        let now = self.clock.now_ms();
        let mut migrated = 0;
        for (map_id, entry) in &table {
            let Some(record) = legacy_record(map_id, entry, now) else {
                warn!(map_id = %map_id, "Skipping unreadable legacy map entry");
                continue;
            };
            let merged = match records
                .get(map_id)
                .and_then(|value| serde_json::from_value::<AggregateRecord>(value.clone()).ok())
            {
                Some(existing) => merge_records(existing, record),
                None => record,
            };
            let value = serde_json::to_value(&merged)
                .map_err(|err| CoreError::json("Failed to serialize migrated record", err))?;
            records.insert(map_id.clone(), value);
            migrated += 1;
        }

        self.store.set(RECORDS_KEY, &Value::Object(records))?;
        self.store.remove(LEGACY_TOP_MAPS_KEY)?;
        Ok(migrated)
    }

    /// Reads `key`, reporting stored text that no longer parses as `Null` so
    /// the caller discards it like any other malformed value.
    fn read_lenient(&self, key: &str) -> Result<Option<Value>> {
        match self.store.get(key) {
            Err(CoreError::Json { source, .. }) => {
                warn!(key, error = %source, "Stored value is unreadable; treating it as corrupt");
                Ok(Some(Value::Null))
            }
            other => other,
        }
    }

    /// Persists the table with `record` replaced, then updates the cache.
    fn commit_record(&self, cache: &mut Cache, record: AggregateRecord) -> Result<()> {
        let mut records = cache.records.clone();
        records.insert(record.map_id.clone(), record);
        self.persist_records(&records)?;
        cache.records = records;
        Ok(())
    }

    fn persist_records(&self, records: &BTreeMap<String, AggregateRecord>) -> Result<()> {
        let value = serde_json::to_value(records)
            .map_err(|err| CoreError::json("Failed to serialize map records", err))?;
        self.store.set(RECORDS_KEY, &value)
    }

    fn persist_history(&self, history: &[HistoryEntry]) -> Result<()> {
        let value = serde_json::to_value(history)
            .map_err(|err| CoreError::json("Failed to serialize map history", err))?;
        self.store.set(HISTORY_KEY, &value)
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, Cache>> {
        self.cache
            .lock()
            .map_err(|_| CoreError::storage("aggregate cache", "lock poisoned"))
    }

    fn notify(&self, change: &AggregateChange) {
        let listeners: Vec<ChangeListener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, listener)| listener.clone()).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(change);
        }
    }
}

fn compare_ranked(a: &RankedMap, b: &RankedMap) -> Ordering {
    b.total_play_time_ms
        .cmp(&a.total_play_time_ms)
        .then_with(|| b.last_played.cmp(&a.last_played))
        .then_with(|| a.map_id.cmp(&b.map_id))
}

fn cap_history(history: &mut Vec<HistoryEntry>) {
    if history.len() > HISTORY_LIMIT {
        let excess = history.len() - HISTORY_LIMIT;
        history.drain(..excess);
    }
}

fn normalize_map_id(map_id: &str) -> String {
    let trimmed = map_id.trim();
    if trimmed.is_empty() {
        UNKNOWN_MAP_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

fn local_midnight(now_ms: i64) -> Option<i64> {
    let now = Local.timestamp_millis_opt(now_ms).single()?;
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|start| start.timestamp_millis())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_negative_ms(value: Option<&Value>) -> Option<(u64, bool)> {
    let value = value?;
    if let Some(ms) = value.as_u64() {
        return Some((ms, false));
    }
    match value.as_f64() {
        Some(ms) if ms.is_finite() && ms >= 0.0 => Some((ms as u64, true)),
        _ => None,
    }
}

fn repair_records(
    table: &Map<String, Value>,
    report: &mut RecoveryReport,
) -> BTreeMap<String, AggregateRecord> {
    let mut records = BTreeMap::new();
    for (key, raw) in table {
        match repair_record(key, raw) {
            Some((record, repaired)) => {
                if repaired {
                    report.repaired += 1;
                } else {
                    report.kept += 1;
                }
                records.insert(key.clone(), record);
            }
            None => {
                warn!(map_id = %key, "Discarding corrupt map record");
                report.discarded += 1;
            }
        }
    }
    records
}

fn repair_record(key: &str, raw: &Value) -> Option<(AggregateRecord, bool)> {
    let object = raw.as_object()?;
    let mut repaired = false;

    let (total_play_time_ms, coerced) = non_negative_ms(object.get("totalPlayTimeMs"))?;
    repaired |= coerced;

    let play_count = match object.get("playCount").and_then(Value::as_u64) {
        Some(count) => count,
        None => {
            repaired = true;
            1
        }
    };

    let first = object.get("firstPlayed").and_then(Value::as_i64);
    let last = object.get("lastPlayed").and_then(Value::as_i64);
    let (mut first_played, last_played) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        (Some(first), None) => {
            repaired = true;
            (first, first)
        }
        (None, Some(last)) => {
            repaired = true;
            (last, last)
        }
        (None, None) => return None,
    };
    if first_played > last_played {
        first_played = last_played;
        repaired = true;
    }

    if object.get("mapId").and_then(Value::as_str) != Some(key) {
        repaired = true;
    }

    let title = object
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string);
    let is_favorite = object
        .get("isFavorite")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some((
        AggregateRecord {
            map_id: key.to_string(),
            title,
            play_count,
            total_play_time_ms,
            last_played,
            first_played,
            is_favorite,
        },
        repaired,
    ))
}

fn legacy_record(map_id: &str, entry: &Value, now: i64) -> Option<AggregateRecord> {
    let object = entry.as_object()?;
    let total_play_time_ms = non_negative_ms(object.get("totalTime"))
        .map(|(ms, _)| ms)
        .unwrap_or(0);
    let play_count = object.get("count").and_then(Value::as_u64).unwrap_or(1);
    let last_played = object
        .get("lastPlayed")
        .and_then(Value::as_i64)
        .unwrap_or(now);
    let title = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(AggregateRecord {
        map_id: map_id.to_string(),
        title,
        play_count,
        total_play_time_ms,
        last_played,
        first_played: last_played,
        is_favorite: false,
    })
}

fn merge_records(existing: AggregateRecord, legacy: AggregateRecord) -> AggregateRecord {
    AggregateRecord {
        title: existing.title.or(legacy.title),
        play_count: existing.play_count.saturating_add(legacy.play_count),
        total_play_time_ms: existing
            .total_play_time_ms
            .saturating_add(legacy.total_play_time_ms),
        last_played: existing.last_played.max(legacy.last_played),
        first_played: existing.first_played.min(legacy.first_played),
        ..existing
    }
}
