//! Auto-capture orchestrator: position stream → gate → capture → store.
//!
//! [`AutoCapturePipeline`] owns the collaborators and, while running, one
//! control-loop task. The loop receives fixes over a `tokio::sync::mpsc`
//! channel, feeds them to the session's gate and spawns at most one capture
//! task at a time.
//!
//! # Capture flow
//!
//! ```text
//! fix ──▶ TrackingSession::observe
//!           ├─ Seeded            → nothing
//!           ├─ Progress { d }    → progress status
//!           └─ Trigger { fix, d} → progress status
//!                 ├─ capture in flight → drop trigger
//!                 └─ idle → spawn capture
//!                        ├─ join!(sampler.sample, resolver.resolve)
//!                        ├─ geohash::encode
//!                        └─ store.save
//!                              ├─ Ok  → "new record" status, revert in 3 s
//!                              └─ Err → failure status, no retry
//! ```
//!
//! If the position stream ends on its own, the loop publishes a "position
//! lost" status, lets a capture in flight finish and then exits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::{NoiseSample, SignalLevelSampler, PERMISSION_DENIED_DB};
use crate::config::{AppConfig, TriggerPreset};
use crate::geo::geohash::{self, DEFAULT_PRECISION};
use crate::geo::{DistanceFormula, GateEvent, MovementGate, PositionFix};
use crate::place::PlaceResolver;
use crate::position::{PositionError, PositionSource, Subscription};
use crate::status::{self, StatusSink};
use crate::store::{CaptureRecord, CaptureStore, RecordId, StoreError};

use super::state::TrackingSession;

/// Buffered fixes between the source and the control loop.
const FIX_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Conditions that prevent a session from starting. Nothing after a
/// successful start is fatal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no authenticated user")]
    NotAuthenticated,

    #[error("{0} permission not granted")]
    PermissionDenied(&'static str),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("trigger distance must be a positive number of metres, got {0}")]
    InvalidTriggerDistance(f64),

    #[error("position subscription failed: {0}")]
    Subscribe(#[from] PositionError),
}

// ---------------------------------------------------------------------------
// Start request / options
// ---------------------------------------------------------------------------

/// Permissions the host platform has granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub location: bool,
    pub microphone: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            location: true,
            microphone: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Authenticated user; `None` or blank refuses to start.
    pub user_id: Option<String>,
    /// Explicit trigger distance. `None` loads the user's saved setting.
    pub trigger_distance_m: Option<f64>,
    pub permissions: Permissions,
}

impl StartRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            trigger_distance_m: None,
            permissions: Permissions::all(),
        }
    }

    pub fn with_trigger_distance(mut self, meters: f64) -> Self {
        self.trigger_distance_m = Some(meters);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Tunables taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Used when no explicit distance is given and settings cannot be loaded.
    pub default_trigger_distance_m: f64,
    pub distance_formula: DistanceFormula,
    pub max_accuracy_m: Option<f64>,
    /// How long the "new record" notice stays before reverting.
    pub status_revert: Duration,
    pub notifications_enabled: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_trigger_distance_m: config.tracking.trigger_distance_m,
            distance_formula: config.tracking.distance_formula,
            max_accuracy_m: config.tracking.max_accuracy_m,
            status_revert: Duration::from_secs(config.tracking.status_revert_secs),
            notifications_enabled: config.notifications_enabled,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// External collaborators the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub positions: Arc<dyn PositionSource>,
    pub sampler: SignalLevelSampler,
    pub resolver: PlaceResolver,
    pub store: Arc<dyn CaptureStore>,
    pub status: Arc<dyn StatusSink>,
}

// ---------------------------------------------------------------------------
// AutoCapturePipeline
// ---------------------------------------------------------------------------

struct RunningSession {
    cancel: CancellationToken,
    subscription: Subscription,
    handle: JoinHandle<()>,
}

/// Drives automatic noise captures while the user moves.
///
/// ```rust,no_run
/// use noise_mapper::pipeline::{AutoCapturePipeline, Collaborators, PipelineOptions, StartRequest};
///
/// # async fn demo(deps: Collaborators) -> Result<(), noise_mapper::pipeline::PipelineError> {
/// let mut pipeline = AutoCapturePipeline::new(deps, PipelineOptions::default());
/// pipeline.start(StartRequest::new("user-1")).await?;
/// // ... fixes arrive, records are saved ...
/// pipeline.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct AutoCapturePipeline {
    deps: Collaborators,
    options: PipelineOptions,
    running: Option<RunningSession>,
}

impl AutoCapturePipeline {
    pub fn new(deps: Collaborators, options: PipelineOptions) -> Self {
        Self {
            deps,
            options,
            running: None,
        }
    }

    /// False once stopped, and also once the control loop has exited on its
    /// own because the position stream ended.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Validate the request, subscribe to positions, publish the initial
    /// status and spawn the control loop.
    pub async fn start(&mut self, request: StartRequest) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        if self.running.is_some() {
            log::info!("pipeline: clearing session whose position stream ended");
            self.shut_down().await;
        }

        let user_id = request
            .user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(PipelineError::NotAuthenticated)?;

        if !request.permissions.location {
            return Err(PipelineError::PermissionDenied("location"));
        }
        if !request.permissions.microphone {
            log::warn!(
                "pipeline: microphone permission missing, levels will read {PERMISSION_DENIED_DB} dB"
            );
        }

        let (trigger_distance_m, notifications_enabled) = match request.trigger_distance_m {
            Some(d) => (d, self.options.notifications_enabled),
            None => self.load_user_settings(&user_id).await,
        };
        if !(trigger_distance_m.is_finite() && trigger_distance_m > 0.0) {
            return Err(PipelineError::InvalidTriggerDistance(trigger_distance_m));
        }

        let gate = MovementGate::new(trigger_distance_m)
            .with_formula(self.options.distance_formula)
            .with_max_accuracy(self.options.max_accuracy_m);
        let session = TrackingSession::new(
            user_id,
            gate,
            notifications_enabled,
            request.permissions.microphone,
        );

        let (tx, rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
        let subscription = self.deps.positions.subscribe(tx).await?;

        self.deps
            .status
            .publish(status::monitoring(trigger_distance_m));
        log::info!(
            "pipeline: started for {} (trigger {}, notifications {})",
            session.user_id(),
            describe_trigger(trigger_distance_m),
            if notifications_enabled { "on" } else { "off" }
        );

        let cancel = CancellationToken::new();
        let control = ControlLoop {
            session,
            deps: self.deps.clone(),
            status_revert: self.options.status_revert,
            cancel: cancel.clone(),
            in_flight: None,
            revert_at: None,
        };
        let handle = tokio::spawn(control.run(rx));

        self.running = Some(RunningSession {
            cancel,
            subscription,
            handle,
        });
        Ok(())
    }

    /// Unsubscribe, cancel any in-flight capture and wait until the audio
    /// device is released. Calling it when not running is a no-op.
    pub async fn stop(&mut self) {
        if self.shut_down().await {
            self.deps.status.publish(status::session_stopped());
            log::info!("pipeline: stopped");
        }
    }

    /// Tear down the running session, if any. Returns whether there was one.
    async fn shut_down(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };

        running.cancel.cancel();
        drop(running.subscription);

        if let Err(e) = running.handle.await {
            if e.is_panic() {
                log::error!("pipeline: control loop panicked: {e}");
            }
        }
        self.deps.sampler.release().await;
        true
    }

    /// Saved trigger distance and notification preference, or the configured
    /// defaults when they cannot be read.
    async fn load_user_settings(&self, user_id: &str) -> (f64, bool) {
        let fallback = (
            self.options.default_trigger_distance_m,
            self.options.notifications_enabled,
        );
        match self.deps.store.load_settings(user_id).await {
            Ok(settings) => {
                let d = settings.trigger_distance_m;
                if !(d.is_finite() && d > 0.0) {
                    log::warn!(
                        "pipeline: saved trigger distance {d} is invalid, using {:.0} m",
                        fallback.0
                    );
                    return (fallback.0, settings.notifications_enabled);
                }
                if !settings.auto_register_enabled {
                    log::warn!("pipeline: {user_id} has automatic registration disabled");
                }
                log::debug!(
                    "pipeline: loaded settings for {user_id}: {}",
                    describe_trigger(d)
                );
                (d, settings.notifications_enabled)
            }
            Err(e) => {
                log::warn!(
                    "pipeline: could not load settings for {user_id} ({e}), using {:.0} m",
                    fallback.0
                );
                fallback
            }
        }
    }
}

impl Drop for AutoCapturePipeline {
    fn drop(&mut self) {
        // Without an await point the loop can only be told to exit.
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// "500 m (medium preset)" for preset distances, "750 m" otherwise.
fn describe_trigger(distance_m: f64) -> String {
    match TriggerPreset::from_meters(distance_m) {
        Some(preset) => format!("{distance_m:.0} m ({} preset)", preset.label()),
        None => format!("{distance_m:.0} m"),
    }
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

/// What a successful capture reports back to the loop. The record itself
/// has been moved into the store.
#[derive(Debug)]
struct CaptureOutcome {
    id: RecordId,
    level_db: f64,
    address: String,
}

#[derive(Debug, Error)]
enum CaptureFailure {
    #[error("capture cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

type CaptureResult = Result<CaptureOutcome, CaptureFailure>;

struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<CaptureResult>,
}

struct ControlLoop {
    session: TrackingSession,
    deps: Collaborators,
    status_revert: Duration,
    cancel: CancellationToken,
    in_flight: Option<InFlight>,
    revert_at: Option<Instant>,
}

impl ControlLoop {
    async fn run(mut self, mut fixes: mpsc::Receiver<PositionFix>) {
        let mut fixes_open = true;
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                result = join_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.on_capture_finished(result);
                    if !fixes_open {
                        break;
                    }
                }

                _ = sleep_until_opt(self.revert_at), if fixes_open => {
                    self.revert_at = None;
                    self.deps
                        .status
                        .publish(status::monitoring(self.session.trigger_distance_m()));
                }

                fix = fixes.recv(), if fixes_open => match fix {
                    Some(fix) => self.on_fix(fix).await,
                    None => {
                        log::warn!("pipeline: position stream ended");
                        self.deps.status.publish(status::position_lost());
                        fixes_open = false;
                        // The capture already under way still gets saved.
                        if self.in_flight.is_none() {
                            break;
                        }
                    }
                },
            }
        }

        if let Some(capture) = self.in_flight.take() {
            capture.cancel.cancel();
            capture.handle.abort();
            // Wait for the task so everything it borrowed is dropped.
            let _ = capture.handle.await;
            log::debug!("pipeline: in-flight capture cancelled");
        }
        self.session.close();
    }

    async fn on_fix(&mut self, fix: PositionFix) {
        let trigger_distance_m = self.session.trigger_distance_m();
        match self.session.observe(fix) {
            GateEvent::Rejected => {}
            GateEvent::Seeded => {
                log::debug!(
                    "pipeline: baseline set at ({:.5}, {:.5})",
                    fix.latitude,
                    fix.longitude
                );
            }
            GateEvent::Progress { distance_m } => {
                log::debug!("pipeline: {distance_m:.1} m of {trigger_distance_m:.0} m");
                self.deps
                    .status
                    .publish(status::progress(distance_m, trigger_distance_m));
            }
            GateEvent::Trigger { fix, distance_m } => {
                self.deps
                    .status
                    .publish(status::progress(distance_m, trigger_distance_m));
                self.on_trigger(fix, distance_m).await;
            }
        }
    }

    async fn on_trigger(&mut self, fix: PositionFix, distance_m: f64) {
        // A finished task whose result the loop has not collected yet does
        // not count as in flight.
        if let Some(capture) = &self.in_flight {
            if !capture.handle.is_finished() {
                log::info!(
                    "pipeline: trigger dropped after {distance_m:.1} m, capture still in flight"
                );
                return;
            }
        }
        if let Some(done) = self.in_flight.take() {
            let result = done.handle.await;
            self.on_capture_finished(result);
        }

        log::info!(
            "pipeline: trigger after {distance_m:.1} m at ({:.5}, {:.5})",
            fix.latitude,
            fix.longitude
        );
        let cancel = self.cancel.child_token();
        let job = CaptureJob {
            user_id: self.session.user_id().to_string(),
            fix,
            distance_m,
            microphone_granted: self.session.microphone_granted(),
            sampler: self.deps.sampler.clone(),
            resolver: self.deps.resolver.clone(),
            store: Arc::clone(&self.deps.store),
            cancel: cancel.clone(),
        };
        self.in_flight = Some(InFlight {
            cancel,
            handle: tokio::spawn(job.run()),
        });
    }

    fn on_capture_finished(&mut self, result: Result<CaptureResult, JoinError>) {
        match result {
            Ok(Ok(outcome)) => {
                log::info!(
                    "pipeline: saved record {} ({:.1} dB, {})",
                    outcome.id,
                    outcome.level_db,
                    outcome.address
                );
                if self.session.notifications_enabled() {
                    self.deps
                        .status
                        .publish(status::new_record(outcome.level_db, &outcome.address));
                    self.revert_at = Some(Instant::now() + self.status_revert);
                }
            }
            Ok(Err(CaptureFailure::Cancelled)) => {
                log::debug!("pipeline: capture cancelled before saving");
            }
            Ok(Err(CaptureFailure::Store(e))) => {
                log::warn!("pipeline: saving record failed: {e}");
                self.deps.status.publish(status::capture_failed(&e.to_string()));
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                log::error!("pipeline: capture task failed: {e}");
                self.deps.status.publish(status::capture_failed("error interno"));
            }
        }
    }
}

async fn join_in_flight(slot: &mut Option<InFlight>) -> Result<CaptureResult, JoinError> {
    match slot {
        Some(capture) => (&mut capture.handle).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Capture job
// ---------------------------------------------------------------------------

struct CaptureJob {
    user_id: String,
    fix: PositionFix,
    distance_m: f64,
    microphone_granted: bool,
    sampler: SignalLevelSampler,
    resolver: PlaceResolver,
    store: Arc<dyn CaptureStore>,
    cancel: CancellationToken,
}

impl CaptureJob {
    async fn run(self) -> CaptureResult {
        let (lat, lng) = (self.fix.latitude, self.fix.longitude);

        let sample = async {
            if self.microphone_granted {
                self.sampler.sample(self.cancel.clone()).await
            } else {
                NoiseSample {
                    level_db: PERMISSION_DENIED_DB,
                    captured_at: Utc::now(),
                }
            }
        };
        let (sample, address) = tokio::join!(sample, self.resolver.resolve(lat, lng));
        // A stopped session must not produce a record.
        if self.cancel.is_cancelled() {
            return Err(CaptureFailure::Cancelled);
        }

        let spatial_key = geohash::encode(lat, lng, DEFAULT_PRECISION).unwrap_or_else(|e| {
            log::warn!("pipeline: no spatial key for ({lat}, {lng}): {e}");
            String::new()
        });

        let record = CaptureRecord {
            level_db: sample.level_db,
            latitude: lat,
            longitude: lng,
            spatial_key,
            address: address.clone(),
            distance_m: self.distance_m,
            auto_generated: true,
            captured_at: sample.captured_at,
        };

        let id = self.store.save(&self.user_id, record).await?;
        Ok(CaptureOutcome {
            id,
            level_db: sample.level_db,
            address,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{LevelSource, SamplerError, DEVICE_FALLBACK_DB};
    use crate::place::{GeocodeError, PlaceCandidate, ReverseGeocoder, UNKNOWN_LOCATION};
    use crate::position::ManualPositionSource;
    use crate::status::{ChannelStatusSink, StatusUpdate, MONITORING_TITLE, POSITION_LOST_TITLE};
    use crate::store::{MemoryStore, UserSettings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Mutex, Notify};

    const NEW_RECORD_TITLE: &str = "Nuevo registro de ruido";

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Level source returning a fixed result and counting calls.
    struct FixedLevel {
        result: Result<f64, SamplerError>,
        calls: AtomicUsize,
    }

    impl FixedLevel {
        fn new(result: Result<f64, SamplerError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LevelSource for FixedLevel {
        async fn measure(&self, _cancel: CancellationToken) -> Result<f64, SamplerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Level source that holds an exclusive device lease until released by
    /// the test or cancelled.
    struct GatedLevel {
        lease: Arc<Mutex<()>>,
        started: Notify,
        proceed: Notify,
        calls: AtomicUsize,
    }

    impl GatedLevel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                lease: Arc::new(Mutex::new(())),
                started: Notify::new(),
                proceed: Notify::new(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LevelSource for GatedLevel {
        async fn measure(&self, cancel: CancellationToken) -> Result<f64, SamplerError> {
            let _lease = Arc::clone(&self.lease).lock_owned().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            tokio::select! {
                _ = self.proceed.notified() => Ok(70.0),
                _ = cancel.cancelled() => Err(SamplerError::Cancelled),
            }
        }

        async fn release(&self) {
            let _guard = self.lease.lock().await;
        }
    }

    struct Canned(&'static str);

    #[async_trait]
    impl ReverseGeocoder for Canned {
        async fn lookup(&self, _: f64, _: f64) -> Result<Vec<PlaceCandidate>, GeocodeError> {
            Ok(vec![PlaceCandidate {
                formatted: Some(self.0.to_string()),
                ..Default::default()
            }])
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ReverseGeocoder for Unreachable {
        async fn lookup(&self, _: f64, _: f64) -> Result<Vec<PlaceCandidate>, GeocodeError> {
            Err(GeocodeError::Request("offline".into()))
        }
    }

    /// Store whose saves always fail; counts attempts.
    #[derive(Default)]
    struct FailingStore {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl CaptureStore for FailingStore {
        async fn save(&self, _: &str, _: CaptureRecord) -> Result<RecordId, StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Status(503))
        }

        async fn load_settings(&self, _: &str) -> Result<UserSettings, StoreError> {
            Err(StoreError::Status(503))
        }
    }

    /// Memory store that counts settings reads.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        settings_reads: AtomicUsize,
    }

    #[async_trait]
    impl CaptureStore for CountingStore {
        async fn save(&self, user_id: &str, record: CaptureRecord) -> Result<RecordId, StoreError> {
            self.inner.save(user_id, record).await
        }

        async fn load_settings(&self, user_id: &str) -> Result<UserSettings, StoreError> {
            self.settings_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_settings(user_id).await
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    struct Harness {
        pipeline: AutoCapturePipeline,
        positions: ManualPositionSource,
        status: mpsc::UnboundedReceiver<StatusUpdate>,
    }

    fn harness(
        level: Arc<dyn LevelSource>,
        geocoder: Arc<dyn ReverseGeocoder>,
        store: Arc<dyn CaptureStore>,
        options: PipelineOptions,
    ) -> Harness {
        let positions = ManualPositionSource::new();
        let (sink, status) = ChannelStatusSink::channel();
        let deps = Collaborators {
            positions: Arc::new(positions.clone()),
            sampler: SignalLevelSampler::new(level),
            resolver: PlaceResolver::new(geocoder, Duration::from_secs(5)),
            store,
            status: Arc::new(sink),
        };
        Harness {
            pipeline: AutoCapturePipeline::new(deps, options),
            positions,
            status,
        }
    }

    fn default_harness(store: Arc<dyn CaptureStore>) -> Harness {
        harness(
            FixedLevel::new(Ok(62.0)),
            Arc::new(Canned("Gran Vía, Madrid")),
            store,
            PipelineOptions::default(),
        )
    }

    fn fix(lat: f64, lng: f64) -> PositionFix {
        PositionFix::new(lat, lng, 5.0)
    }

    async fn next_status(rx: &mut mpsc::UnboundedReceiver<StatusUpdate>) -> StatusUpdate {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no status update in time")
            .expect("status channel closed")
    }

    async fn wait_for_title(
        rx: &mut mpsc::UnboundedReceiver<StatusUpdate>,
        title: &str,
    ) -> StatusUpdate {
        loop {
            let update = next_status(rx).await;
            if update.title == title {
                return update;
            }
        }
    }

    async fn wait_for_records(store: &MemoryStore, n: usize) -> Vec<(RecordId, String, CaptureRecord)> {
        for _ in 0..500 {
            let records = store.records().await;
            if records.len() >= n {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} records");
    }

    async fn wait_until_loop_exits(pipeline: &AutoCapturePipeline) {
        for _ in 0..500 {
            if !pipeline.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("control loop still running");
    }

    // -----------------------------------------------------------------------
    // Start validation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn start_without_user_is_not_authenticated() {
        let mut h = default_harness(Arc::new(MemoryStore::new()));

        let mut request = StartRequest::new("u1");
        request.user_id = None;
        assert!(matches!(
            h.pipeline.start(request).await,
            Err(PipelineError::NotAuthenticated)
        ));
        assert!(matches!(
            h.pipeline.start(StartRequest::new("   ")).await,
            Err(PipelineError::NotAuthenticated)
        ));
        assert!(!h.pipeline.is_running());
        assert!(!h.positions.is_subscribed());
    }

    #[tokio::test]
    async fn start_without_location_permission_is_fatal() {
        let mut h = default_harness(Arc::new(MemoryStore::new()));
        let request = StartRequest::new("u1").with_permissions(Permissions {
            location: false,
            microphone: true,
        });
        assert!(matches!(
            h.pipeline.start(request).await,
            Err(PipelineError::PermissionDenied("location"))
        ));
        assert!(!h.pipeline.is_running());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut h = default_harness(Arc::new(MemoryStore::new()));
        h.pipeline.start(StartRequest::new("u1")).await.unwrap();
        assert!(matches!(
            h.pipeline.start(StartRequest::new("u1")).await,
            Err(PipelineError::AlreadyRunning)
        ));
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn invalid_explicit_distance_is_rejected() {
        let mut h = default_harness(Arc::new(MemoryStore::new()));
        assert!(matches!(
            h.pipeline
                .start(StartRequest::new("u1").with_trigger_distance(0.0))
                .await,
            Err(PipelineError::InvalidTriggerDistance(_))
        ));
    }

    #[tokio::test]
    async fn start_publishes_monitoring_status() {
        let mut h = default_harness(Arc::new(MemoryStore::new()));
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(500.0))
            .await
            .unwrap();
        assert!(h.positions.is_subscribed());

        let first = next_status(&mut h.status).await;
        assert_eq!(first, status::monitoring(500.0));
        h.pipeline.stop().await;
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn explicit_distance_skips_settings_even_at_default() {
        let store = Arc::new(CountingStore::default());
        store
            .inner
            .set_settings(
                "u1",
                UserSettings {
                    trigger_distance_m: 1000.0,
                    ..Default::default()
                },
            )
            .await;
        let mut h = default_harness(store.clone());

        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();
        assert_eq!(next_status(&mut h.status).await, status::monitoring(200.0));
        assert_eq!(store.settings_reads.load(Ordering::SeqCst), 0);
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn missing_distance_loads_saved_settings_once() {
        let store = Arc::new(CountingStore::default());
        store
            .inner
            .set_settings(
                "u1",
                UserSettings {
                    trigger_distance_m: 500.0,
                    ..Default::default()
                },
            )
            .await;
        let mut h = default_harness(store.clone());

        h.pipeline.start(StartRequest::new("u1")).await.unwrap();
        assert_eq!(next_status(&mut h.status).await, status::monitoring(500.0));

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        let progress = next_status(&mut h.status).await;
        assert_eq!(progress.title, MONITORING_TITLE);
        assert!(progress.body.ends_with("de 500 m"));

        assert_eq!(store.settings_reads.load(Ordering::SeqCst), 1);
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn settings_failure_falls_back_to_default() {
        let mut h = default_harness(Arc::new(FailingStore::default()));
        h.pipeline.start(StartRequest::new("u1")).await.unwrap();
        assert_eq!(next_status(&mut h.status).await, status::monitoring(200.0));
        h.pipeline.stop().await;
    }

    // -----------------------------------------------------------------------
    // Capture flow
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn moving_200_metres_saves_one_record() {
        let store = Arc::new(MemoryStore::new());
        let mut h = default_harness(store.clone());
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;

        let notice = wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;
        assert_eq!(notice, status::new_record(62.0, "Gran Vía, Madrid"));

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        let (_, user, record) = &records[0];
        assert_eq!(user, "u1");
        assert!(record.auto_generated);
        assert_eq!(record.level_db, 62.0);
        assert_eq!(record.address, "Gran Vía, Madrid");
        assert_eq!((record.latitude, record.longitude), (0.0, 0.0018));
        assert!(
            (200.0..200.5).contains(&record.distance_m),
            "distance {}",
            record.distance_m
        );
        assert_eq!(
            record.spatial_key,
            geohash::encode(0.0, 0.0018, DEFAULT_PRECISION).unwrap()
        );
        assert_eq!(record.spatial_key.len(), 8);

        h.pipeline.stop().await;
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn first_fix_never_triggers() {
        let store = Arc::new(MemoryStore::new());
        let level = FixedLevel::new(Ok(50.0));
        let mut h = harness(
            level.clone(),
            Arc::new(Canned("x")),
            store.clone(),
            PipelineOptions::default(),
        );
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();
        next_status(&mut h.status).await;

        h.positions.push(fix(10.0, 10.0)).await;
        // A short hop afterwards yields a progress update, proving the first
        // fix was processed without a capture.
        h.positions.push(fix(10.0, 10.0001)).await;
        let progress = next_status(&mut h.status).await;
        assert!(progress.body.starts_with("Recorridos 11 m"));

        h.pipeline.stop().await;
        assert!(store.records().await.is_empty());
        assert_eq!(level.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trigger_while_capturing_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let level = GatedLevel::new();
        let mut h = harness(
            level.clone(),
            Arc::new(Canned("Calle Mayor")),
            store.clone(),
            PipelineOptions::default(),
        );
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        level.started.notified().await;

        // Second qualifying move while the first capture is still sampling.
        h.positions.push(fix(0.0, 0.0036)).await;
        // Initial monitoring status plus one progress update per trigger.
        let mut seen = 0;
        while seen < 3 {
            if next_status(&mut h.status).await.title == MONITORING_TITLE {
                seen += 1;
            }
        }

        level.proceed.notify_one();
        wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;

        h.pipeline.stop().await;
        assert_eq!(store.records().await.len(), 1);
        assert_eq!(level.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn next_trigger_after_capture_starts_fresh_capture() {
        let store = Arc::new(MemoryStore::new());
        let mut h = default_harness(store.clone());
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;

        h.positions.push(fix(0.0, 0.0036)).await;
        wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;

        let records = wait_for_records(&store, 2).await;
        assert_eq!(records[1].2.longitude, 0.0036);
        // Re-seeded on the first trigger, so the second distance is again ~200 m.
        assert!((200.0..200.5).contains(&records[1].2.distance_m));
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn save_failure_is_reported_without_retry() {
        let store = Arc::new(FailingStore::default());
        let mut h = harness(
            FixedLevel::new(Ok(60.0)),
            Arc::new(Canned("x")),
            store.clone(),
            PipelineOptions::default(),
        );
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        let failure = wait_for_title(&mut h.status, "Error al guardar la medición").await;
        assert!(failure.body.contains("503"));

        // The session survives; a small hop still reports progress.
        h.positions.push(fix(0.0, 0.0019)).await;
        let progress = next_status(&mut h.status).await;
        assert_eq!(progress.title, MONITORING_TITLE);

        h.pipeline.stop().await;
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sensor_and_geocoder_failures_use_fallbacks() {
        let store = Arc::new(MemoryStore::new());
        let mut h = harness(
            FixedLevel::new(Err(SamplerError::DeviceUnavailable("unplugged".into()))),
            Arc::new(Unreachable),
            store.clone(),
            PipelineOptions::default(),
        );
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;

        let records = wait_for_records(&store, 1).await;
        assert_eq!(records[0].2.level_db, DEVICE_FALLBACK_DB);
        assert_eq!(records[0].2.address, UNKNOWN_LOCATION);
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn missing_microphone_permission_records_sentinel() {
        let store = Arc::new(MemoryStore::new());
        let level = FixedLevel::new(Ok(80.0));
        let mut h = harness(
            level.clone(),
            Arc::new(Canned("x")),
            store.clone(),
            PipelineOptions::default(),
        );
        let request = StartRequest::new("u1")
            .with_trigger_distance(200.0)
            .with_permissions(Permissions {
                location: true,
                microphone: false,
            });
        h.pipeline.start(request).await.unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;

        let records = wait_for_records(&store, 1).await;
        assert_eq!(records[0].2.level_db, PERMISSION_DENIED_DB);
        assert_eq!(level.calls.load(Ordering::SeqCst), 0);
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn disabled_notifications_still_save() {
        let store = Arc::new(MemoryStore::new());
        let options = PipelineOptions {
            notifications_enabled: false,
            ..PipelineOptions::default()
        };
        let mut h = harness(
            FixedLevel::new(Ok(55.0)),
            Arc::new(Canned("x")),
            store.clone(),
            options,
        );
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        wait_for_records(&store, 1).await;
        h.pipeline.stop().await;

        while let Ok(update) = h.status.try_recv() {
            assert_ne!(update.title, NEW_RECORD_TITLE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn new_record_notice_reverts_after_delay() {
        let store = Arc::new(MemoryStore::new());
        let mut h = default_harness(store.clone());
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;
        let shown_at = Instant::now();

        let reverted = next_status(&mut h.status).await;
        assert_eq!(reverted, status::monitoring(200.0));
        assert!(shown_at.elapsed() >= Duration::from_secs(3));
        h.pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_revert() {
        let store = Arc::new(MemoryStore::new());
        let mut h = default_harness(store.clone());
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;
        h.pipeline.stop().await;

        assert_eq!(next_status(&mut h.status).await, status::session_stopped());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.status.try_recv().is_err());
    }

    // -----------------------------------------------------------------------
    // Position stream ending
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn capture_in_flight_is_saved_when_position_stream_ends() {
        let store = Arc::new(MemoryStore::new());
        let level = GatedLevel::new();
        let mut h = harness(
            level.clone(),
            Arc::new(Canned("Calle Mayor")),
            store.clone(),
            PipelineOptions::default(),
        );
        h.pipeline
            .start(StartRequest::new("u1").with_trigger_distance(200.0))
            .await
            .unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        level.started.notified().await;

        // A second subscriber takes the slot and the loop's sender is dropped.
        let (other_tx, _other_rx) = mpsc::channel(1);
        let other = h.positions.subscribe(other_tx).await.unwrap();
        wait_for_title(&mut h.status, POSITION_LOST_TITLE).await;
        assert!(h.pipeline.is_running(), "loop exited before the capture finished");

        level.proceed.notify_one();
        let records = wait_for_records(&store, 1).await;
        assert_eq!(records[0].2.level_db, 70.0);
        assert_eq!(records[0].2.address, "Calle Mayor");
        wait_for_title(&mut h.status, NEW_RECORD_TITLE).await;

        wait_until_loop_exits(&h.pipeline).await;
        drop(other);
        h.pipeline.stop().await;
    }

    #[tokio::test]
    async fn pipeline_restarts_after_position_stream_ends() {
        let store = Arc::new(MemoryStore::new());
        let mut h = default_harness(store.clone());
        let request = StartRequest::new("u1").with_trigger_distance(200.0);
        h.pipeline.start(request.clone()).await.unwrap();
        h.positions.push(fix(0.0, 0.0)).await;

        let (other_tx, _other_rx) = mpsc::channel(1);
        drop(h.positions.subscribe(other_tx).await.unwrap());
        wait_for_title(&mut h.status, POSITION_LOST_TITLE).await;
        wait_until_loop_exits(&h.pipeline).await;

        h.pipeline.start(request).await.unwrap();
        assert!(h.pipeline.is_running());
        h.positions.push(fix(1.0, 1.0)).await;
        h.positions.push(fix(1.0, 1.0018)).await;
        let records = wait_for_records(&store, 1).await;
        assert_eq!(records[0].2.level_db, 62.0);
        h.pipeline.stop().await;
    }

    #[test]
    fn trigger_description_names_presets() {
        assert_eq!(describe_trigger(500.0), "500 m (medium preset)");
        assert_eq!(describe_trigger(750.0), "750 m");
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut h = default_harness(Arc::new(MemoryStore::new()));
        h.pipeline.stop().await;

        h.pipeline.start(StartRequest::new("u1")).await.unwrap();
        h.pipeline.stop().await;
        h.pipeline.stop().await;
        assert!(!h.pipeline.is_running());
        assert!(!h.positions.is_subscribed());
        assert!(!h.positions.push(fix(0.0, 0.0)).await);
    }

    #[tokio::test]
    async fn stop_during_capture_releases_device_for_restart() {
        let store = Arc::new(MemoryStore::new());
        let level = GatedLevel::new();
        let mut h = harness(
            level.clone(),
            Arc::new(Canned("x")),
            store.clone(),
            PipelineOptions::default(),
        );
        let request = StartRequest::new("u1").with_trigger_distance(200.0);
        h.pipeline.start(request.clone()).await.unwrap();

        h.positions.push(fix(0.0, 0.0)).await;
        h.positions.push(fix(0.0, 0.0018)).await;
        level.started.notified().await;

        h.pipeline.stop().await;
        assert!(level.lease.try_lock().is_ok(), "device still held after stop");
        assert!(store.records().await.is_empty());

        // Immediately restart and capture again on the same device.
        h.pipeline.start(request).await.unwrap();
        h.positions.push(fix(1.0, 1.0)).await;
        h.positions.push(fix(1.0, 1.0018)).await;
        level.started.notified().await;
        level.proceed.notify_one();

        let records = wait_for_records(&store, 1).await;
        assert_eq!(records[0].2.level_db, 70.0);
        h.pipeline.stop().await;
    }
}
