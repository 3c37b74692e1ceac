use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PollIntervals;
use crate::services::influx::{InfluxWriter, Point};
use crate::services::scheduler::{IntervalScheduler, PollCategory};
use crate::services::tado::TadoClient;
use crate::services::tado_ingest;

const POLL_TICK: Duration = Duration::from_secs(60);
const INITIAL_POLL_DELAY: Duration = Duration::from_secs(5);
const CALL_COUNTER_RESET_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
struct RunState {
    last_update: Option<DateTime<Utc>>,
    api_calls: u64,
}

/// Read-only view of the orchestrator state for the health endpoint.
#[derive(Debug, Clone)]
pub struct PollerSnapshot {
    pub last_update: Option<DateTime<Utc>>,
    pub api_calls: u64,
    pub intervals: PollIntervals,
    pub last_run: HashMap<PollCategory, i64>,
}

#[derive(Debug)]
pub struct CategoryError {
    pub home_id: i64,
    pub category: PollCategory,
    pub message: String,
}

/// What one cycle did. Soft failures are explicit here so tests assert on
/// the report rather than on log output.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub skipped_overlap: bool,
    pub skipped_unauthenticated: bool,
    pub homes: usize,
    pub api_calls: u64,
    pub writes: u64,
    pub category_errors: Vec<CategoryError>,
    pub fatal: Option<String>,
}

/// Drives the recurring poll: asks the session for data per due category and
/// home, hands extracted points to the sink, and keeps the run state the
/// health endpoint reports.
pub struct Poller {
    tado: Arc<TadoClient>,
    influx: Arc<InfluxWriter>,
    scheduler: IntervalScheduler,
    run_state: Mutex<RunState>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Poller {
    pub fn new(tado: Arc<TadoClient>, influx: Arc<InfluxWriter>, intervals: PollIntervals) -> Self {
        Self {
            tado,
            influx,
            scheduler: IntervalScheduler::new(intervals),
            run_state: Mutex::new(RunState::default()),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval_at(start + INITIAL_POLL_DELAY, POLL_TICK);
            let mut counter_reset = tokio::time::interval_at(
                start + CALL_COUNTER_RESET_PERIOD,
                CALL_COUNTER_RESET_PERIOD,
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = counter_reset.tick() => {
                        self.run_state.lock().expect("run state lock poisoned").api_calls = 0;
                    }
                }
            }
        });
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        let state = self.run_state.lock().expect("run state lock poisoned");
        PollerSnapshot {
            last_update: state.last_update,
            api_calls: state.api_calls,
            intervals: self.scheduler.intervals().clone(),
            last_run: self.scheduler.last_run_snapshot(),
        }
    }

    /// One polling cycle. Never returns an error: every failure mode is
    /// either isolated per category or recorded on the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            info!("previous poll cycle still running, skipping this tick");
            report.skipped_overlap = true;
            return report;
        };

        if !self.tado.is_authenticated() {
            info!("not authenticated, waiting for login");
            report.skipped_unauthenticated = true;
            return report;
        }

        self.track_call(&mut report);
        let me = match self.tado.get_me().await {
            Ok(me) => me,
            Err(err) => {
                warn!("poll cycle failed: {err:#}");
                let point = Point::new("errors")
                    .tag("type", "polling")
                    .field("message", format!("{err:#}"));
                self.influx.write(point).await;
                report.writes += 1;
                report.fatal = Some(format!("{err:#}"));
                return report;
            }
        };
        if me.homes.is_empty() {
            return report;
        }
        report.homes = me.homes.len();

        // Decide the due categories once, up front, so every home gets a
        // fetch for each of them and lastRun reflects the cycle trigger.
        let now_millis = Utc::now().timestamp_millis();
        let due: Vec<PollCategory> = PollCategory::ALL
            .into_iter()
            .filter(|category| self.scheduler.is_due(*category, now_millis))
            .collect();

        for home in &me.homes {
            info!(home_id = home.id, "polling home");
            for category in &due {
                if let Err(err) = self.poll_category(home.id, *category, &mut report).await {
                    warn!(
                        home_id = home.id,
                        category = category.as_str(),
                        "category poll failed: {err:#}"
                    );
                    report.category_errors.push(CategoryError {
                        home_id: home.id,
                        category: *category,
                        message: format!("{err:#}"),
                    });
                }
            }
        }

        let completed_at = Utc::now();
        self.run_state
            .lock()
            .expect("run state lock poisoned")
            .last_update = Some(completed_at);
        info!(completed_at = %completed_at.to_rfc3339(), "poll cycle completed");
        report
    }

    async fn poll_category(
        &self,
        home_id: i64,
        category: PollCategory,
        report: &mut CycleReport,
    ) -> Result<()> {
        self.track_call(report);
        match category {
            PollCategory::Weather => {
                let weather = self.tado.get_weather(home_id).await?;
                let point = tado_ingest::weather_point(home_id, &weather)?;
                self.influx.write(point).await;
                report.writes += 1;
            }
            PollCategory::Rooms => {
                let rooms = self.tado.get_rooms(home_id).await?;
                for point in tado_ingest::room_points(home_id, &rooms) {
                    self.influx.write(point).await;
                    report.writes += 1;
                }
            }
            PollCategory::HeatPump => {
                let heat_pump = self.tado.get_heat_pump(home_id).await?;
                if let Some(point) = tado_ingest::heat_pump_point(home_id, &heat_pump) {
                    self.influx.write(point).await;
                    report.writes += 1;
                }
            }
        }
        Ok(())
    }

    fn track_call(&self, report: &mut CycleReport) {
        report.api_calls += 1;
        self.run_state
            .lock()
            .expect("run state lock poisoned")
            .api_calls += 1;
    }
}
