use crate::error::{RosterSyncError, RosterSyncResult};
use crate::sync::{RosterSyncService, SweepReport};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Periodic sweep over all enabled instances.
pub struct SyncScheduler {
    scheduler: JobScheduler,
    sync_service: Arc<RosterSyncService>,
    last_report: Arc<RwLock<Option<SweepReport>>>
}

impl SyncScheduler {
    pub async fn new(sync_service: Arc<RosterSyncService>) -> RosterSyncResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| RosterSyncError::SchedulerError(e.to_string()))?;

        let last_report = Arc::new(RwLock::new(None));
        let cron_expression = sync_service.config().sync.schedule.clone();

        let service_clone = sync_service.clone();
        let report_clone = last_report.clone();

        let job = Job::new_async(cron_expression.as_str(), move |_uuid, _lock| {
            let service = service_clone.clone();
            let report = report_clone.clone();
            Box::pin(async move {
                info!("Starting scheduled roster sweep");
                match service.sync_all().await {
                    Ok(sweep) => {
                        info!(
                            reconciled = sweep.reconciled.len(),
                            skipped = sweep.skipped.len(),
                            errors = sweep.errors.len(),
                            "Scheduled sweep completed"
                        );
                        let mut guard = report.write().await;
                        *guard = Some(sweep);
                    }
                    Err(e) => {
                        error!(error = %e, "Scheduled sweep failed");
                    }
                }
            })
        })
        .map_err(|e| RosterSyncError::SchedulerError(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| RosterSyncError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            sync_service,
            last_report
        })
    }

    pub async fn start(&self) -> RosterSyncResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| RosterSyncError::SchedulerError(e.to_string()))?;
        info!(
            schedule = %self.sync_service.config().sync.schedule,
            "Roster sync scheduler started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> RosterSyncResult<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| RosterSyncError::SchedulerError(e.to_string()))?;
        info!("Roster sync scheduler stopped");
        Ok(())
    }

    pub async fn run_now(&self) -> RosterSyncResult<SweepReport> {
        let report = self.sync_service.sync_all().await?;
        let mut guard = self.last_report.write().await;
        *guard = Some(report.clone());
        Ok(report)
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }
}
