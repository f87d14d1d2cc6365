//! The pass tracker: the single owner of live passes.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use crate::metrics;
use crate::pipeline::PipelinesConfig;

use super::config::TrackerConfig;
use super::types::{
    Pass, PassEvent, PassId, PassStatus, PassWindow, Platform, StageRecord,
};

/// Shared, lockable reference to a live pass.
///
/// All mutation of a pass happens while holding this lock.
#[derive(Debug, Clone)]
pub struct PassHandle {
    id: PassId,
    inner: Arc<Mutex<Pass>>,
}

impl PassHandle {
    fn new(pass: Pass) -> Self {
        Self {
            id: pass.id.clone(),
            inner: Arc::new(Mutex::new(pass)),
        }
    }

    pub fn id(&self) -> &PassId {
        &self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, Pass> {
        self.inner.lock().await
    }

    /// Clones the current state of the pass.
    pub async fn snapshot(&self) -> Pass {
        self.inner.lock().await.clone()
    }
}

/// Why an event did not create or join a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// No pipeline is configured for the platform.
    UnsupportedPlatform(Platform),
    /// The file name matches none of the raw input roles.
    UnrecognizedFile(String),
    /// The pass for this window finished recently.
    RecentlyProcessed(PassId),
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::UnsupportedPlatform(p) => write!(f, "no pipeline for platform {}", p),
            IgnoreReason::UnrecognizedFile(name) => write!(f, "unrecognized raw file {}", name),
            IgnoreReason::RecentlyProcessed(id) => write!(f, "pass {} processed recently", id),
        }
    }
}

/// Result of ingesting one event.
#[derive(Debug, Clone)]
pub enum Ingest {
    Created(PassHandle),
    /// The event joined an existing pass. `new_file` is false for a repeated announcement.
    Merged { handle: PassHandle, new_file: bool },
    Ignored(IgnoreReason),
}

impl Ingest {
    pub fn handle(&self) -> Option<&PassHandle> {
        match self {
            Ingest::Created(h) | Ingest::Merged { handle: h, .. } => Some(h),
            Ingest::Ignored(_) => None,
        }
    }

    /// Label used for metrics and audit.
    pub fn disposition(&self) -> &'static str {
        match self {
            Ingest::Created(_) => "created",
            Ingest::Merged { new_file: true, .. } => "merged",
            Ingest::Merged { new_file: false, .. } => "duplicate",
            Ingest::Ignored(_) => "ignored",
        }
    }
}

#[derive(Debug)]
struct LiveEntry {
    platform: Platform,
    window: PassWindow,
    created_at: DateTime<Utc>,
    handle: PassHandle,
}

#[derive(Debug)]
struct Tombstone {
    id: PassId,
    platform: Platform,
    window: PassWindow,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PassTable {
    live: HashMap<PassId, LiveEntry>,
    recent: Vec<Tombstone>,
}

/// Owns the set of in-flight passes keyed by (platform, window).
///
/// Lock order is table first, then pass. Callers holding a pass lock must
/// release it before calling back into the tracker.
pub struct PassTracker {
    config: TrackerConfig,
    pipelines: Arc<PipelinesConfig>,
    table: RwLock<PassTable>,
}

impl PassTracker {
    pub fn new(config: TrackerConfig, pipelines: Arc<PipelinesConfig>) -> Self {
        Self {
            config,
            pipelines,
            table: RwLock::new(PassTable::default()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn pipelines(&self) -> &PipelinesConfig {
        &self.pipelines
    }

    /// Ingests an event received now.
    pub async fn ingest(&self, event: PassEvent) -> Ingest {
        self.ingest_at(event, Utc::now()).await
    }

    /// Ingests an event with an explicit clock.
    pub async fn ingest_at(&self, event: PassEvent, now: DateTime<Utc>) -> Ingest {
        let result = self.ingest_inner(event, now).await;
        metrics::PASS_EVENTS
            .with_label_values(&[result.disposition()])
            .inc();
        result
    }

    async fn ingest_inner(&self, event: PassEvent, now: DateTime<Utc>) -> Ingest {
        let Some(pipeline) = self.pipelines.get(event.platform) else {
            return Ingest::Ignored(IgnoreReason::UnsupportedPlatform(event.platform));
        };

        let file_name = event.file_name().unwrap_or_default().to_string();
        let Some(role) = pipeline.role_for(&file_name).map(str::to_string) else {
            debug!("Ignoring {}: no raw input role matches", file_name);
            return Ingest::Ignored(IgnoreReason::UnrecognizedFile(file_name));
        };

        let mut table = self.table.write().await;

        if let Some(handle) = Self::find_live(&table, event.platform, event.start_time) {
            let mut pass = handle.lock().await;
            let new_file = Self::merge_into(&mut pass, &role, &event, now);
            debug!(
                pass_id = %pass.id,
                role = %role,
                new_file,
                "Merged event into pass"
            );
            drop(pass);
            return Ingest::Merged { handle, new_file };
        }

        if let Some(tomb) = table.recent.iter().find(|t| {
            t.platform == event.platform && t.window.contains(event.start_time) && t.expires_at > now
        }) {
            debug!("Ignoring {}: pass {} finished recently", file_name, tomb.id);
            return Ingest::Ignored(IgnoreReason::RecentlyProcessed(tomb.id.clone()));
        }

        let window = PassWindow::around(
            event.start_time,
            self.config.start_nudge(),
            self.config.end_nudge(),
        );
        let base_id = PassId::derive(event.platform, event.start_time);
        let mut id = base_id.clone();
        let mut n = 1;
        while table.live.contains_key(&id) {
            n += 1;
            id = base_id.with_suffix(n);
        }

        let mut raw_files = BTreeMap::new();
        raw_files.insert(role, event.uri.clone());

        let pass = Pass {
            id: id.clone(),
            platform: event.platform,
            window,
            start_time: event.start_time,
            orbit_number: event.orbit_number,
            raw_files,
            required_roles: pipeline.required_roles(),
            stages: pipeline
                .stages
                .iter()
                .map(|s| StageRecord::new(&s.name, s.enabled))
                .collect(),
            status: PassStatus::Active,
            events_merged: 1,
            created_at: now,
            last_updated_at: now,
            waiting_for_slot: None,
        };

        let handle = PassHandle::new(pass);
        table.live.insert(
            id.clone(),
            LiveEntry {
                platform: event.platform,
                window,
                created_at: now,
                handle: handle.clone(),
            },
        );
        metrics::LIVE_PASSES.set(table.live.len() as i64);

        info!(
            pass_id = %id,
            platform = %event.platform,
            start_time = %event.start_time,
            "Created pass"
        );
        Ingest::Created(handle)
    }

    /// Live pass of `platform` whose window contains `t`; the closest anchor wins.
    fn find_live(table: &PassTable, platform: Platform, t: DateTime<Utc>) -> Option<PassHandle> {
        table
            .live
            .values()
            .filter(|e| e.platform == platform && e.window.contains(t))
            .min_by_key(|e| ((e.window.anchor - t).num_milliseconds().abs(), e.created_at))
            .map(|e| e.handle.clone())
    }

    fn merge_into(pass: &mut Pass, role: &str, event: &PassEvent, now: DateTime<Utc>) -> bool {
        let started = pass.has_started();
        let new_file = match pass.raw_files.get(role) {
            Some(existing) if existing == &event.uri => false,
            Some(_) if started => {
                debug!(
                    pass_id = %pass.id,
                    "Keeping original {} file; processing already started", role
                );
                false
            }
            _ => {
                pass.raw_files.insert(role.to_string(), event.uri.clone());
                true
            }
        };

        if !started && event.start_time < pass.start_time {
            pass.start_time = event.start_time;
        }
        if pass.orbit_number.is_none() {
            pass.orbit_number = event.orbit_number;
        }
        pass.events_merged += 1;
        pass.touch(now);
        new_file
    }

    /// Handle of a live pass.
    pub async fn handle(&self, id: &PassId) -> Option<PassHandle> {
        self.table.read().await.live.get(id).map(|e| e.handle.clone())
    }

    /// Handles of all live passes, oldest first.
    pub async fn handles(&self) -> Vec<PassHandle> {
        let table = self.table.read().await;
        let mut entries: Vec<&LiveEntry> = table.live.values().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.handle.id.cmp(&b.handle.id)));
        entries.into_iter().map(|e| e.handle.clone()).collect()
    }

    /// Snapshot of a live pass.
    pub async fn get(&self, id: &PassId) -> Option<Pass> {
        let handle = self.handle(id).await?;
        Some(handle.snapshot().await)
    }

    /// Snapshots of all live passes, oldest first.
    pub async fn list(&self) -> Vec<Pass> {
        let mut passes = Vec::new();
        for handle in self.handles().await {
            passes.push(handle.snapshot().await);
        }
        passes
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes a finished pass and blocks its window for the recent horizon.
    pub async fn evict(&self, id: &PassId, now: DateTime<Utc>) -> Option<PassHandle> {
        let mut table = self.table.write().await;
        let entry = table.live.remove(id)?;
        table.recent.push(Tombstone {
            id: id.clone(),
            platform: entry.platform,
            window: entry.window,
            expires_at: now + self.config.recent_horizon(),
        });
        metrics::LIVE_PASSES.set(table.live.len() as i64);
        debug!(pass_id = %id, "Evicted pass");
        Some(entry.handle)
    }

    /// Removes passes that stopped receiving updates before reaching a terminal state.
    ///
    /// Passes with a running stage are left alone: their stage timeout bounds them.
    /// So are passes queued for a stage slot.
    /// Returned passes are already marked abandoned and keep their last update time.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<Pass> {
        let horizon = self.config.staleness_horizon();
        let mut table = self.table.write().await;
        table.recent.retain(|t| t.expires_at > now);

        let mut stale_ids = Vec::new();
        for (id, entry) in table.live.iter() {
            let pass = entry.handle.lock().await;
            let idle = now - pass.last_updated_at > horizon;
            let busy = pass.running_count() > 0 || pass.waiting_for_slot.is_some();
            if pass.status == PassStatus::Active && idle && !busy {
                stale_ids.push(id.clone());
            }
        }

        let mut abandoned = Vec::new();
        for id in stale_ids {
            if let Some(entry) = table.live.remove(&id) {
                let mut pass = entry.handle.lock().await;
                pass.status = PassStatus::Abandoned;
                info!(pass_id = %id, "Abandoning stale pass");
                abandoned.push(pass.clone());
            }
        }
        metrics::LIVE_PASSES.set(table.live.len() as i64);
        abandoned
    }

    /// Raw file recorded for a role, if any.
    pub async fn raw_file(&self, id: &PassId, role: &str) -> Option<PathBuf> {
        let handle = self.handle(id).await?;
        let pass = handle.lock().await;
        pass.raw_files.get(role).cloned()
    }
}
