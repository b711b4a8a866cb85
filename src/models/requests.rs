use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::job::{JobStatus, ResultSlot};
use crate::models::user::Gender;

/// Maximum length of the free-text job message.
pub const MAX_MESSAGE_LEN: usize = 500;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(length(chars, min = 3, max = 150), custom(username_chars))]
    pub username: String,

    #[garde(email)]
    pub email: String,

    #[garde(length(chars, min = 8, max = 128))]
    pub password: String,

    #[serde(default)]
    #[garde(length(chars, max = 150))]
    pub first_name: String,

    #[serde(default)]
    #[garde(length(chars, max = 150))]
    pub last_name: String,
}

fn username_chars(value: &str, _ctx: &()) -> garde::Result {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+'))
    {
        Ok(())
    } else {
        Err(garde::Error::new(
            "may only contain letters, digits and . _ - @ +",
        ))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[garde(email)]
    pub email: String,

    #[garde(length(min = 1))]
    pub password: String,
}

/// `PATCH /api/profile`. Absent fields are left unchanged; an empty string
/// clears `phone` and `bio`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[garde(length(chars, max = 150))]
    pub first_name: Option<String>,

    #[garde(length(chars, max = 150))]
    pub last_name: Option<String>,

    #[garde(range(min = 1, max = 120))]
    pub age: Option<i32>,

    #[garde(skip)]
    pub gender: Option<Gender>,

    #[garde(length(chars, max = 32))]
    pub phone: Option<String>,

    #[garde(length(chars, max = 1000))]
    pub bio: Option<String>,
}

fn trim_in_place(value: &mut Option<String>) {
    if let Some(text) = value {
        let trimmed = text.trim();
        if trimmed.len() != text.len() {
            *text = trimmed.to_string();
        }
    }
}

impl ProfileUpdateRequest {
    /// Trim text fields so limits apply to what is stored.
    pub fn trimmed(mut self) -> Self {
        trim_in_place(&mut self.first_name);
        trim_in_place(&mut self.last_name);
        trim_in_place(&mut self.phone);
        trim_in_place(&mut self.bio);
        self
    }
}

/// `PATCH /api/jobs/{id}/`. Status, results and ownership are read-only.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct JobUpdateRequest {
    #[garde(length(chars, max = 500))]
    pub message: Option<String>,

    #[garde(skip)]
    pub is_favorite: Option<bool>,
}

impl JobUpdateRequest {
    pub fn trimmed(mut self) -> Self {
        trim_in_place(&mut self.message);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub selected: Option<ResultSlot>,
}

/// Query string accepted by `GET /api/jobs/`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    pub favorites: Option<bool>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub user_id: Option<Uuid>,
}
