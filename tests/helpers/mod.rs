//! Test helper utilities for E2E testing

use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::fixtures::UploadFixture;

/// Response from POST /api/auth/register and /api/auth/login
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: CurrentUser,
}

#[derive(Debug, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
}

/// Job payload from the jobs endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: String,
    pub scenario: String,
    pub view_type: String,
    pub message: Option<String>,
    pub original_image_url: Option<String>,
    pub simulation1_url: Option<String>,
    pub simulation2_url: Option<String>,
    pub selected_simulation: Option<String>,
    pub is_favorite: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobListResponse {
    pub count: i64,
    pub results: Vec<JobResponse>,
}

/// A registered account and its bearer token.
pub struct TestSession {
    pub client: reqwest::Client,
    pub base_url: String,
    pub token: String,
    pub user: CurrentUser,
}

impl TestSession {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token)
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(&self.token)
    }
}

/// Register a fresh account with a unique username.
pub async fn register_user(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<TestSession, Box<dyn std::error::Error>> {
    let suffix = &Uuid::new_v4().simple().to_string()[..10];
    let response = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&serde_json::json!({
            "username": format!("e2e_{suffix}"),
            "email": format!("e2e_{suffix}@example.com"),
            "password": "e2e-password-123",
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Registration failed with status {}: {}", status, error_text).into());
    }

    let auth = response.json::<AuthResponse>().await?;
    Ok(TestSession {
        client: client.clone(),
        base_url: base_url.to_string(),
        token: auth.token,
        user: auth.user,
    })
}

/// Build the multipart form for a fixture.
pub fn upload_form(fixture: &UploadFixture, data: Vec<u8>) -> Result<multipart::Form, reqwest::Error> {
    let mut form = multipart::Form::new()
        .part(
            "image",
            multipart::Part::bytes(data)
                .file_name(fixture.filename())
                .mime_str(fixture.mime)?,
        )
        .text("region", "gluteal")
        .text("scenario", fixture.scenario)
        .text("view_type", fixture.view_type);

    if let Some(message) = fixture.message {
        form = form.text("message", message);
    }
    Ok(form)
}

/// Upload a fixture photo, returning the created job.
pub async fn upload_photo(
    session: &TestSession,
    fixture: &UploadFixture,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let form = upload_form(fixture, fixture.bytes())?;
    let response = session.post("/api/jobs/").multipart(form).send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::CREATED {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<JobResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    session: &TestSession,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = session.get(&format!("/api/jobs/{}/", job_id)).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let job = response.json::<JobResponse>().await?;

        match job.status.as_str() {
            "completed" | "failed" => return Ok(job),
            "queued" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", job.status).into());
            }
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}

/// Wait for the worker to finish a job (with timeout)
pub async fn wait_for_job_completion(
    session: &TestSession,
    job_id: Uuid,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    poll_job_status(session, job_id, 300).await
}

/// Download a signed media URL and return its bytes.
pub async fn fetch_media(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("Media fetch failed with status {}", status).into());
    }
    Ok(response.bytes().await?.to_vec())
}
