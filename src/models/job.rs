use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::user::UserSummary;

/// Status of a simulation job in the async queue.
///
/// Transitions only move forward: `queued -> processing -> completed | failed`,
/// plus `queued -> failed` when a job cannot be handed to the worker.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses a job may be in immediately before entering `self`.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[],
            JobStatus::Processing => &[JobStatus::Queued],
            JobStatus::Completed => &[JobStatus::Processing],
            JobStatus::Failed => &[JobStatus::Queued, JobStatus::Processing],
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

/// Body region the simulation targets.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Region {
    #[default]
    Gluteal,
}

/// Projection level: how strongly the generator alters the input image.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr,
)]
pub enum Scenario {
    #[default]
    #[serde(rename = "projection-level-1")]
    #[strum(serialize = "projection-level-1")]
    ProjectionLevel1,
    #[serde(rename = "projection-level-2")]
    #[strum(serialize = "projection-level-2")]
    ProjectionLevel2,
    #[serde(rename = "projection-level-3")]
    #[strum(serialize = "projection-level-3")]
    ProjectionLevel3,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViewType {
    #[default]
    Rear,
    Side,
}

impl ViewType {
    /// The other camera angle, generated as the second result.
    pub fn complement(self) -> ViewType {
        match self {
            ViewType::Rear => ViewType::Side,
            ViewType::Side => ViewType::Rear,
        }
    }
}

/// One of the two result slots a job can hold.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResultSlot {
    Simulation1,
    Simulation2,
}

/// A simulation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner: UserSummary,
    pub region: Region,
    pub scenario: Scenario,
    pub view_type: ViewType,
    pub status: JobStatus,
    pub message: Option<String>,
    pub original_image_key: String,
    pub simulation1_key: Option<String>,
    pub simulation2_key: Option<String>,
    pub selected_simulation: Option<ResultSlot>,
    pub is_favorite: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn result_key(&self, slot: ResultSlot) -> Option<&str> {
        match slot {
            ResultSlot::Simulation1 => self.simulation1_key.as_deref(),
            ResultSlot::Simulation2 => self.simulation2_key.as_deref(),
        }
    }

    /// Camera angle rendered into a slot: slot 1 holds the requested view,
    /// slot 2 its complement.
    pub fn view_for(&self, slot: ResultSlot) -> ViewType {
        match slot {
            ResultSlot::Simulation1 => self.view_type,
            ResultSlot::Simulation2 => self.view_type.complement(),
        }
    }

    pub fn has_result(&self, slot: ResultSlot) -> bool {
        self.result_key(slot).is_some()
    }
}

/// Fields needed to insert a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub region: Region,
    pub scenario: Scenario,
    pub view_type: ViewType,
    pub message: Option<String>,
    pub original_image_key: String,
}

/// Storage key for a generated view.
pub fn simulation_key(job_id: Uuid, view: ViewType, extension: &str) -> String {
    format!("simulations/{}_{}.{}", job_id, view, extension)
}

/// Storage key for an uploaded original.
pub fn original_key(job_id: Uuid, extension: &str) -> String {
    format!("originals/{}.{}", job_id, extension)
}
