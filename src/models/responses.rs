use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, Region, ResultSlot, Scenario, ViewType};
use crate::models::user::{Gender, User, UserSummary};
use crate::services::auth::{AuthError, MediaUrls};

/// Job as returned by the API and pushed over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub user: UserSummary,
    pub region: Region,
    pub scenario: Scenario,
    pub view_type: ViewType,
    pub status: JobStatus,
    pub message: Option<String>,
    pub original_image_url: Option<String>,
    pub simulation1_url: Option<String>,
    pub simulation2_url: Option<String>,
    pub selected_simulation: Option<ResultSlot>,
    pub selected_url: Option<String>,
    pub is_favorite: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobResponse {
    pub fn build(job: &Job, media: &MediaUrls) -> Result<Self, AuthError> {
        let url = |key: Option<&str>| key.map(|k| media.url_for(k)).transpose();

        let simulation1_url = url(job.simulation1_key.as_deref())?;
        let simulation2_url = url(job.simulation2_key.as_deref())?;
        let selected_url = match job.selected_simulation {
            Some(ResultSlot::Simulation1) => simulation1_url.clone(),
            Some(ResultSlot::Simulation2) => simulation2_url.clone(),
            None => None,
        };

        Ok(Self {
            id: job.id,
            user: job.owner.clone(),
            region: job.region,
            scenario: job.scenario,
            view_type: job.view_type,
            status: job.status,
            message: job.message.clone(),
            original_image_url: url(Some(job.original_image_key.as_str()))?,
            simulation1_url,
            simulation2_url,
            selected_simulation: job.selected_simulation,
            selected_url,
            is_favorite: job.is_favorite,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub count: i64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<JobResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            is_staff: user.is_staff,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: CurrentUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            age: user.age,
            gender: user.gender,
            phone: user.phone.clone(),
            bio: user.bio.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::TokenService;
    use std::sync::Arc;

    fn job(simulation1: Option<&str>, selected: Option<ResultSlot>) -> Job {
        Job {
            id: Uuid::new_v4(),
            owner: UserSummary {
                id: Uuid::new_v4(),
                username: "dana".to_string(),
                email: "dana@example.com".to_string(),
            },
            region: Region::Gluteal,
            scenario: Scenario::ProjectionLevel1,
            view_type: ViewType::Rear,
            status: if simulation1.is_some() { JobStatus::Completed } else { JobStatus::Queued },
            message: Some("subtle".to_string()),
            original_image_key: "originals/x.png".to_string(),
            simulation1_key: simulation1.map(str::to_string),
            simulation2_key: None,
            selected_simulation: selected,
            is_favorite: false,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processing_started_at: None,
            completed_at: None,
        }
    }

    fn media() -> MediaUrls {
        let tokens = Arc::new(TokenService::new(b"secret-for-tests", chrono::Duration::hours(1)));
        MediaUrls::new(tokens, "http://localhost:3000", chrono::Duration::minutes(10))
    }

    #[test]
    fn test_queued_job_has_no_simulation_urls() {
        let response = JobResponse::build(&job(None, None), &media()).unwrap();
        assert!(response.original_image_url.is_some());
        assert!(response.simulation1_url.is_none());
        assert!(response.simulation2_url.is_none());
        assert!(response.selected_url.is_none());
    }

    #[test]
    fn test_selected_url_follows_selection() {
        let response = JobResponse::build(
            &job(Some("simulations/x_rear.png"), Some(ResultSlot::Simulation1)),
            &media(),
        )
        .unwrap();
        let sim1 = response.simulation1_url.clone().unwrap();
        assert!(sim1.starts_with("http://localhost:3000/media/simulations/x_rear.png?token="));
        assert_eq!(response.selected_url, Some(sim1));
    }

    #[test]
    fn test_csrf_field_name() {
        let body = serde_json::to_value(CsrfResponse {
            csrf_token: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(body["csrfToken"], "abc");
    }
}
