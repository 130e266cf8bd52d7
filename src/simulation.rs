use std::time::Duration;

use tracing::{info, warn};

use crate::connection::ConnectionHandle;
use crate::flow::failure_result;
use crate::models::{Checkpoint, CheckpointDraft, TransactionResult};
use crate::submitter::SubmitOptions;

pub const DEFAULT_SHIPMENT_ID: &str = "SHIP123";
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyStep {
    pub location: String,
    pub status: String,
    pub document_hash: String,
}

impl JourneyStep {
    fn new(location: &str, status: &str, document_hash: &str) -> Self {
        Self {
            location: location.to_string(),
            status: status.to_string(),
            document_hash: document_hash.to_string(),
        }
    }
}

/// Factory to final warehouse in four checkpoints.
pub fn default_journey() -> Vec<JourneyStep> {
    vec![
        JourneyStep::new("Factory", "created", "QmFakeDocHash123_Factory"),
        JourneyStep::new("Transit Hub", "in-transit", "QmFakeDocHash123_Transit"),
        JourneyStep::new("Border", "in-transit", "QmFakeDocHash123_Border"),
        JourneyStep::new("Final Warehouse", "delivered", "QmFakeDocHash123_Final"),
    ]
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: JourneyStep,
    pub result: TransactionResult,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub shipment_id: String,
    pub outcomes: Vec<StepOutcome>,
    /// `None` when the final history read failed.
    pub history: Option<Vec<Checkpoint>>,
}

impl SimulationReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.success).count()
    }
}

/// Replays a journey against the contract, one confirmed checkpoint at a time.
pub struct Simulation {
    pub shipment_id: String,
    pub steps: Vec<JourneyStep>,
    pub pause: Duration,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            shipment_id: DEFAULT_SHIPMENT_ID.to_string(),
            steps: default_journey(),
            pause: DEFAULT_PAUSE,
        }
    }
}

impl Simulation {
    pub fn new(shipment_id: impl Into<String>) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            ..Self::default()
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// A failed step is recorded and the journey carries on.
    pub async fn run(&self, handle: &ConnectionHandle, options: &SubmitOptions) -> SimulationReport {
        let total = self.steps.len();
        let mut outcomes = Vec::with_capacity(total);

        for (i, step) in self.steps.iter().enumerate() {
            println!("📦 Step {}/{}: {} - {}", i + 1, total, step.location, step.status);

            let draft = CheckpointDraft::new(
                self.shipment_id.as_str(),
                step.location.as_str(),
                step.status.as_str(),
                step.document_hash.as_str(),
            );
            let result = match handle.submit(&draft, options).await {
                Ok(result) => {
                    println!("✅ {}", result.message);
                    for event in &result.events {
                        println!(
                            "🔔 CheckpointAdded: {} at {} ({})",
                            event.shipment, event.location, event.status
                        );
                    }
                    result
                }
                Err(e) => {
                    warn!(step = i + 1, error = %e, "simulation step failed");
                    println!("❌ {}", e);
                    failure_result(&e)
                }
            };
            outcomes.push(StepOutcome {
                step: step.clone(),
                result,
            });

            if i + 1 < total && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        let history = match handle.get_shipment_history(&self.shipment_id).await {
            Ok(history) => Some(history),
            Err(e) => {
                warn!(shipment_id = %self.shipment_id, error = %e, "could not read history after simulation");
                None
            }
        };

        let report = SimulationReport {
            shipment_id: self.shipment_id.clone(),
            outcomes,
            history,
        };
        info!(
            shipment_id = %report.shipment_id,
            succeeded = report.succeeded(),
            steps = total,
            "simulation finished"
        );
        report
    }
}
