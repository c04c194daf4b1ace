//! DemoEngine: stands in for the graph writer so the task manager can be driven from a shell.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use spool_core::ports::{EngineError, IngestContext, IngestionEngine};
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct EpisodePayload {
    episode_body: String,
    #[serde(default)]
    fail: bool,
}

/// Sleeps through `steps` chunks, reporting progress and honoring cancellation between them.
pub struct DemoEngine {
    steps: u32,
    step: Duration,
}

impl DemoEngine {
    pub fn new(steps: u32, step: Duration) -> Self {
        Self {
            steps: steps.max(1),
            step,
        }
    }
}

#[async_trait]
impl IngestionEngine for DemoEngine {
    async fn ingest(&self, payload: &Value, ctx: &IngestContext) -> Result<Value, EngineError> {
        let episode: EpisodePayload = serde_json::from_value(payload.clone())
            .map_err(|e| EngineError::failed(format!("payload decode: {e}")))?;

        for step in 1..=self.steps {
            ctx.checkpoint()?;
            tokio::select! {
                _ = ctx.cancelled() => return Err(EngineError::Interrupted),
                _ = sleep(self.step) => {}
            }
            if episode.fail && step * 2 >= self.steps {
                return Err(EngineError::failed(format!(
                    "extraction failed for '{}'",
                    episode.episode_body
                )));
            }
            let progress = (step * 100 / self.steps).min(100) as u8;
            ctx.report_progress(progress);
            debug!(task_id = %ctx.task_id(), progress, "step done");
        }

        Ok(json!({
            "episode": episode.episode_body,
            "group_id": ctx.group_id().as_str(),
            "nodes_created": self.steps,
        }))
    }
}
