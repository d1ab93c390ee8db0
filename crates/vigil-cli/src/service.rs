//! The tracking service: probes, monitor, and persistence wiring.
//!
//! A single tokio task owns the [`Monitor`] outright; nothing else
//! touches live records. The OS event thread only sends wakeup hints
//! into an mpsc channel, and the loop re-probes on its own schedule, so
//! a flood of change notifications can never produce overlapping
//! sessions. Finalized records go to the store on blocking worker
//! threads; consumers watch a channel of immutable snapshots.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vigil_core::{
    AggregateOptions, DateRange, FocusSample, Monitor, MonitorEvent, ProductNameSource, Resolver,
    UsageRecord, aggregate, local_date_of,
};
use vigil_db::Store;
use vigil_probe::{DesktopEntrySource, FocusEvents, ForegroundInfo, SystemProbe};

use crate::Config;
use crate::commands::report;

/// Messages feeding the tracking loop from outside the tick timer.
enum TrackerMessage {
    /// The OS hinted that the foreground window may have changed.
    FocusHint,
}

/// Runs the tracking service until Ctrl-C or SIGTERM.
///
/// Stop is synchronous from the caller's point of view: every live
/// session is finalized and flushed to the store before this returns.
pub async fn run(config: &Config) -> Result<()> {
    let _lock = acquire_lock(config)?;

    let store = Arc::new(Store::open_or_fallback(&config.database_path)?);
    if store.is_fallback() {
        warn!("durable store unavailable; usage recorded this session will not survive restart");
    }

    // Startup retention sweep, off the tracking path.
    let sweep_store = Arc::clone(&store);
    let retention = config.retention_days;
    drop(tokio::task::spawn_blocking(move || {
        run_sweep(&sweep_store, retention);
    }));

    let resolver = Resolver::with_source(DesktopEntrySource::new());
    let monitor = Monitor::with_resolver(config.monitor_config(), resolver);
    let (snapshot_tx, _snapshot_rx) = watch::channel(Vec::new());
    let mut tracking = TrackingLoop::new(
        monitor,
        vigil_probe::platform_probe(),
        Arc::clone(&store),
        config.max_session(),
        config.retention_days,
        snapshot_tx,
    );

    let (hint_tx, mut hint_rx) = mpsc::channel(16);
    if let Some(events) = vigil_probe::platform_events() {
        spawn_event_thread(events, hint_tx);
    }

    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(config.poll_interval_secs.into()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        db = %config.database_path.display(),
        fallback = store.is_fallback(),
        "tracking started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => tracking.handle_tick(Utc::now()),
            Some(TrackerMessage::FocusHint) = hint_rx.recv() => {
                tracking.handle_hint(Utc::now());
            }
            () = shutdown_signal() => break,
        }
    }

    info!("shutting down, flushing live sessions");
    tracking.shutdown(Utc::now()).await;
    print_day_summary(&store, config);
    Ok(())
}

/// The message-driven core of the service, separated from timers and
/// signals so it can run against scripted probes.
struct TrackingLoop<S: ProductNameSource> {
    monitor: Monitor<S>,
    probe: Box<dyn SystemProbe>,
    store: Arc<Store>,
    session_cap: chrono::Duration,
    retention_days: u32,
    snapshots: watch::Sender<Vec<UsageRecord>>,
    writes: JoinSet<()>,
    today: NaiveDate,
}

impl<S: ProductNameSource> TrackingLoop<S> {
    fn new(
        monitor: Monitor<S>,
        probe: Box<dyn SystemProbe>,
        store: Arc<Store>,
        session_cap: chrono::Duration,
        retention_days: u32,
        snapshots: watch::Sender<Vec<UsageRecord>>,
    ) -> Self {
        Self {
            monitor,
            probe,
            store,
            session_cap,
            retention_days,
            snapshots,
            writes: JoinSet::new(),
            today: local_date_of(Utc::now()),
        }
    }

    /// One scheduled tick: idle and media readings, duration refresh,
    /// then a foreground poll. Any probe failure skips that reading and
    /// nothing else.
    fn handle_tick(&mut self, now: DateTime<Utc>) {
        let idle = match self.probe.idle_time() {
            Ok(idle) => chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::MAX),
            Err(error) => {
                debug!(%error, "idle query failed, skipping tick");
                return;
            }
        };
        let media_playing = self.probe.media_playing().unwrap_or_else(|error| {
            debug!(%error, "media query failed, assuming silence");
            false
        });

        let mut events = self.monitor.tick(now, idle, media_playing);
        events.extend(self.poll_foreground(now));
        self.dispatch(events);

        let today = local_date_of(now);
        if today != self.today {
            self.today = today;
            sweep_on(&mut self.writes, Arc::clone(&self.store), self.retention_days);
        }
    }

    /// An event-thread wakeup: poll the foreground window right away.
    fn handle_hint(&mut self, now: DateTime<Utc>) {
        let events = self.poll_foreground(now);
        self.dispatch(events);
    }

    fn poll_foreground(&mut self, now: DateTime<Utc>) -> Vec<MonitorEvent> {
        match self.probe.foreground() {
            Ok(Some(info)) => self.monitor.observe(&sample_from(info), now),
            Ok(None) => Vec::new(),
            Err(error) => {
                debug!(%error, "foreground query failed, no observation this tick");
                Vec::new()
            }
        }
    }

    fn dispatch(&mut self, events: Vec<MonitorEvent>) {
        let mut changed = false;
        for event in events {
            match event {
                MonitorEvent::Updated(_) => changed = true,
                MonitorEvent::Finalized(record) => {
                    changed = true;
                    self.persist(record);
                }
            }
        }
        // Coalesced to one snapshot per tick regardless of how many
        // records moved.
        if changed {
            self.snapshots.send_replace(self.monitor.live_records());
        }
    }

    fn persist(&mut self, record: UsageRecord) {
        let store = Arc::clone(&self.store);
        let cap = self.session_cap;
        self.writes.spawn_blocking(move || {
            if let Err(error) = store.insert_record(&record, cap) {
                warn!(id = %record.id, %error, "failed to persist finalized session");
            }
        });
    }

    /// Finalizes every live session and waits for all pending writes.
    async fn shutdown(&mut self, now: DateTime<Utc>) {
        for event in self.monitor.stop(now) {
            if let MonitorEvent::Finalized(record) = event {
                self.persist(record);
            }
        }
        self.snapshots.send_replace(Vec::new());
        while self.writes.join_next().await.is_some() {}
    }
}

fn sample_from(info: ForegroundInfo) -> FocusSample {
    FocusSample {
        process_name: info.process_name,
        window_title: info.window_title,
        pid: info.pid,
        handle: info.handle,
    }
}

fn sweep_on(writes: &mut JoinSet<()>, store: Arc<Store>, retention_days: u32) {
    writes.spawn_blocking(move || run_sweep(&store, retention_days));
}

fn run_sweep(store: &Store, retention_days: u32) {
    match store.prune(retention_days) {
        Ok(deleted) if deleted > 0 => info!(deleted, "retention sweep removed old sessions"),
        Ok(_) => {}
        Err(error) => warn!(%error, "retention sweep failed"),
    }
}

/// Exclusive lock next to the database so a second tracker exits
/// cleanly instead of writing interleaved sessions.
fn acquire_lock(config: &Config) -> Result<std::fs::File> {
    let lock_path = lock_path(config);
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
    if file.try_lock_exclusive().is_err() {
        bail!("another vigil tracker is already running");
    }
    Ok(file)
}

fn lock_path(config: &Config) -> PathBuf {
    let mut os = config.database_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

fn spawn_event_thread(mut events: Box<dyn FocusEvents>, tx: mpsc::Sender<TrackerMessage>) {
    let spawned = thread::Builder::new()
        .name("vigil-focus-events".to_string())
        .spawn(move || {
            loop {
                match events.next_change() {
                    Ok(()) => {
                        if tx.blocking_send(TrackerMessage::FocusHint).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(%error, "focus event stream ended, polling only from here");
                        break;
                    }
                }
            }
        });
    if let Err(error) = spawned {
        warn!(%error, "failed to start focus event thread, polling only");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(error) => {
                warn!(%error, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_day_summary(store: &Store, config: &Config) {
    let today = local_date_of(Utc::now());
    let range = DateRange::single(today);
    match store.daily_totals(today, today) {
        Ok(rollups) => {
            let options = AggregateOptions {
                max_daily: config.max_daily(),
                ..AggregateOptions::default()
            };
            let entries = aggregate(rollups, &[], range, &options);
            print!("{}", report::format_report(&entries, range));
        }
        Err(error) => warn!(%error, "could not read back today's totals for the summary"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use vigil_core::{MonitorConfig, ProcessId, WindowHandle, resolver::NoProductNames};
    use vigil_probe::FakeProbe;

    use super::*;

    fn window(process: &str, pid: u32, handle: u64) -> Option<ForegroundInfo> {
        Some(ForegroundInfo {
            process_name: process.to_string(),
            window_title: format!("{process} window"),
            pid: Some(ProcessId(pid)),
            handle: Some(WindowHandle(handle)),
        })
    }

    fn tracking_with(
        probe: FakeProbe,
        store: Arc<Store>,
    ) -> (
        TrackingLoop<NoProductNames>,
        watch::Receiver<Vec<UsageRecord>>,
    ) {
        let monitor = Monitor::new(MonitorConfig {
            idle_threshold: Duration::minutes(5),
            max_session: Duration::hours(6),
            tick_interval: Duration::seconds(60),
        });
        let (tx, rx) = watch::channel(Vec::new());
        let tracking = TrackingLoop::new(monitor, Box::new(probe), store, Duration::hours(6), 90, tx);
        (tracking, rx)
    }

    #[tokio::test]
    async fn focus_switch_persists_finalized_sessions() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut probe = FakeProbe::new();
        probe.queue_foreground(window("chrome", 1, 10));
        probe.queue_foreground(window("figma", 2, 20));
        let (mut tracking, _rx) = tracking_with(probe, Arc::clone(&store));

        let t0 = Utc::now();
        tracking.handle_tick(t0);
        tracking.handle_tick(t0 + Duration::seconds(60));
        tracking.shutdown(t0 + Duration::seconds(120)).await;

        assert_eq!(store.session_count().unwrap(), 2);
        assert!(tracking.monitor.live_records().is_empty());
    }

    #[tokio::test]
    async fn probe_failure_skips_observation_without_crashing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut probe = FakeProbe::new();
        probe.queue_foreground(window("chrome", 1, 10));
        probe.queue_foreground_error();
        let (mut tracking, _rx) = tracking_with(probe, Arc::clone(&store));

        let t0 = Utc::now();
        tracking.handle_tick(t0);
        tracking.handle_tick(t0 + Duration::seconds(60));

        let active = tracking.monitor.active().unwrap();
        assert_eq!(active.name.as_str(), "Chrome");
        assert_eq!(active.duration_ms, 60_000);
        assert_eq!(store.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshots_are_published_once_per_tick() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut probe = FakeProbe::new();
        probe.queue_foreground(window("chrome", 1, 10));
        let (mut tracking, rx) = tracking_with(probe, store);

        tracking.handle_tick(Utc::now());
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name.as_str(), "Chrome");
        assert!(snapshot[0].is_focused());
    }

    #[tokio::test]
    async fn hint_polls_the_foreground_immediately() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut probe = FakeProbe::new();
        probe.queue_foreground(window("chrome", 1, 10));
        probe.queue_foreground(window("figma", 2, 20));
        let (mut tracking, _rx) = tracking_with(probe, Arc::clone(&store));

        let t0 = Utc::now();
        tracking.handle_tick(t0);
        tracking.handle_hint(t0 + Duration::seconds(5));

        assert_eq!(tracking.monitor.active().unwrap().name.as_str(), "Figma");
        tracking.shutdown(t0 + Duration::seconds(10)).await;
        assert_eq!(store.session_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn hint_after_resume_does_not_bill_the_sleep_span() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut probe = FakeProbe::new();
        probe.queue_foreground(window("chrome", 1, 10));
        probe.queue_foreground(window("chrome", 1, 10));
        probe.queue_foreground(window("figma", 2, 20));
        let (mut tracking, _rx) = tracking_with(probe, Arc::clone(&store));

        let t0 = Utc::now();
        tracking.handle_tick(t0);
        tracking.handle_tick(t0 + Duration::seconds(60));
        // Laptop lid closed; the next focus event arrives two hours later.
        let resumed = t0 + Duration::seconds(60) + Duration::hours(2);
        tracking.handle_hint(resumed);
        tracking.shutdown(resumed + Duration::seconds(5)).await;

        let mut stored = Vec::new();
        for offset in 0..=1 {
            let date = local_date_of(t0) + Duration::days(offset);
            stored.extend(store.records_for_date(date).unwrap());
        }
        assert!(!stored.is_empty());
        for record in &stored {
            assert!(
                record.duration_ms <= 60_000,
                "{} billed {}ms",
                record.name,
                record.duration_ms
            );
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut probe = FakeProbe::new();
        probe.queue_foreground(window("chrome", 1, 10));
        let (mut tracking, _rx) = tracking_with(probe, Arc::clone(&store));

        let t0 = Utc::now();
        tracking.handle_tick(t0);
        tracking.shutdown(t0 + Duration::seconds(30)).await;
        tracking.shutdown(t0 + Duration::seconds(31)).await;
        assert_eq!(store.session_count().unwrap(), 1);
    }

    #[test]
    fn second_lock_acquisition_fails() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("vigil.db"),
            ..Config::default()
        };
        let first = acquire_lock(&config).unwrap();
        assert!(acquire_lock(&config).is_err());
        drop(first);
        assert!(acquire_lock(&config).is_ok());
    }
}
