// Await helpers bridging durable state and bus events
//
// Subscribe first, then read the database: a terminal transition committed
// before the subscription is caught by the read, one committed after is
// caught by the event. No window is lost either way.

use std::time::Duration;

use uuid::Uuid;

use deepr_core::error::{DeeprError, Result};
use deepr_core::EventBus;
use deepr_storage::{CampaignRow, Database, JobRow};

pub async fn await_job_terminal(
    db: &Database,
    bus: &EventBus,
    job_id: Uuid,
    timeout: Duration,
) -> Result<JobRow> {
    let mut events = bus.subscribe(format!("jobs.{}", job_id)).await;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let row = db
            .get_job(job_id)
            .await?
            .ok_or(DeeprError::JobNotFound(job_id))?;
        if row.status().is_terminal() {
            return Ok(row);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(DeeprError::Storage(anyhow::anyhow!(
                    "job {} not terminal after {:?}", job_id, timeout
                )));
            }
            event = events.recv() => {
                if event.is_none() {
                    // Bus gone; degrade to polling
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

pub async fn await_campaign_terminal(
    db: &Database,
    bus: &EventBus,
    campaign_id: Uuid,
    timeout: Duration,
) -> Result<CampaignRow> {
    let mut events = bus.subscribe(format!("campaigns.{}", campaign_id)).await;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let row = db
            .get_campaign(campaign_id)
            .await?
            .ok_or(DeeprError::CampaignNotFound(campaign_id))?;
        if row.status().is_terminal() {
            return Ok(row);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(DeeprError::Storage(anyhow::anyhow!(
                    "campaign {} not terminal after {:?}", campaign_id, timeout
                )));
            }
            event = events.recv() => {
                if event.is_none() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}
