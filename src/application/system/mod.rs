use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub mod cancellation;

pub use cancellation::CancellationToken;

use crate::application::bootstrap::{
    PersistenceBootstrap, PersistenceHandle, ServicesBootstrap, ServicesHandle,
};
use crate::application::ml::{CycleReport, MlSignalService};
use crate::config::Config;
use crate::domain::ports::FeatureEngine;
use crate::infrastructure::observability::{Metrics, MetricsReporter};

pub struct Application {
    pub config: Config,
    pub persistence: PersistenceHandle,
    pub services: ServicesHandle,
    reporter: Option<MetricsReporter>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        Self::build_with_engine(config, None).await
    }

    /// Build with an external feature engine wired into the refresh step
    pub async fn build_with_engine(
        config: Config,
        feature_engine: Option<Arc<dyn FeatureEngine>>,
    ) -> Result<Self> {
        info!(
            "Building ML signal service (intervals: {:?}, primary: {})",
            config.ml.intervals, config.ml.primary_interval
        );

        let persistence = PersistenceBootstrap::init(&config.database_url).await?;
        let services = ServicesBootstrap::init(&config, &persistence, feature_engine)?;
        let reporter = config
            .observability
            .metrics_report_enabled
            .then(|| MetricsReporter::new(services.metrics.clone()));

        Ok(Self {
            config,
            persistence,
            services,
            reporter,
        })
    }

    pub fn signal_service(&self) -> &Arc<MlSignalService> {
        &self.services.signal_service
    }

    pub fn metrics(&self) -> &Metrics {
        &self.services.metrics
    }

    /// One full cycle now
    pub async fn run_cycle(&self, include_training: bool, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let report = self
            .services
            .signal_service
            .run_cycle(Utc::now(), include_training, cancel)
            .await;
        self.report(&report, started);
        report
    }

    /// Run until Ctrl-C
    pub async fn start(&self) -> Result<()> {
        let cancel = CancellationToken::new();

        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, cancelling the running cycle.");
                    signal_cancel.cancel();
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                }
            }
        });

        self.run_scheduled(&cancel).await;
        info!("Scheduler stopped.");
        Ok(())
    }

    /// Drive training, inference and resolution on their own cadences.
    ///
    /// Steps run one at a time on this task so two runs never overlap.
    pub async fn run_scheduled(&self, cancel: &CancellationToken) {
        let schedule = &self.config.schedule;
        info!(
            "Scheduler started: inference every {:?}, training every {:?}, resolution every {:?}",
            schedule.inference_every, schedule.training_every, schedule.resolve_every
        );

        let mut training_tick = tokio::time::interval(schedule.training_every);
        let mut inference_tick = tokio::time::interval(schedule.inference_every);
        let mut resolve_tick = tokio::time::interval(schedule.resolve_every);
        for tick in [&mut training_tick, &mut inference_tick, &mut resolve_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let service = &self.services.signal_service;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = training_tick.tick() => {
                    let started = Instant::now();
                    match service.train(Utc::now(), cancel).await {
                        Ok(report) => self.report(&report, started),
                        Err(_) if cancel.is_cancelled() => break,
                        Err(e) => {
                            warn!("Scheduled training failed: {:#}", e);
                            service.metrics().inc_cycle_errors("training");
                        }
                    }
                }
                _ = inference_tick.tick() => {
                    let report = self.run_cycle(false, cancel).await;
                    if report.cancelled {
                        break;
                    }
                    if !report.is_ok() {
                        warn!("Cycle finished with errors: {:?}", report.first_error);
                    }
                }
                _ = resolve_tick.tick() => {
                    let started = Instant::now();
                    match service.resolve(Utc::now(), cancel).await {
                        Ok(report) => self.report(&report, started),
                        Err(_) if cancel.is_cancelled() => break,
                        Err(e) => {
                            warn!("Scheduled resolution failed: {:#}", e);
                            service.metrics().inc_cycle_errors("outcome resolution");
                        }
                    }
                }
            }
        }
    }

    fn report<T: serde::Serialize>(&self, report: &T, started: Instant) {
        if let Some(reporter) = &self.reporter {
            reporter.report(report, started.elapsed());
        }
    }
}
