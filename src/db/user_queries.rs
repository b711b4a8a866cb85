use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::user::{Gender, NewUser, ProfileChanges, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, is_staff, first_name, last_name, \
     age, gender, phone, bio, created_at, updated_at";

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let gender: Option<String> = row.try_get("gender")?;
    let gender = gender
        .map(|g| g.parse::<Gender>())
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "gender".to_string(),
            source: Box::new(e),
        })?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_staff: row.try_get("is_staff")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        age: row.try_get("age")?,
        gender,
        phone: row.try_get("phone")?,
        bio: row.try_get("bio")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Map a unique-index violation to the field that collided.
fn conflict_field(err: &sqlx::Error) -> Option<&'static str> {
    let db = err.as_database_error()?;
    if !db.is_unique_violation() {
        return None;
    }
    match db.constraint() {
        Some("users_username_key") => Some("username"),
        Some("users_email_key") => Some("email"),
        _ => Some("account"),
    }
}

/// Insert a new account. Usernames and emails are unique case-insensitively.
pub async fn create_user(pool: &PgPool, user: &NewUser) -> Result<User, UserError> {
    let sql = format!(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
    );
    let result = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(user.username.trim())
        .bind(user.email.trim().to_lowercase())
        .bind(&user.password_hash)
        .bind(user.first_name.trim())
        .bind(user.last_name.trim())
        .fetch_one(pool)
        .await;

    match result {
        Ok(row) => Ok(user_from_row(&row)?),
        Err(e) => match conflict_field(&e) {
            Some(field) => Err(UserError::Conflict(field)),
            None => Err(UserError::Database(e)),
        },
    }
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, UserError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
    let row = sqlx::query(&sql)
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(user_from_row).transpose()?)
}

pub async fn find_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, UserError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(user_from_row).transpose()?)
}

/// Apply a partial profile update. `None` keeps the stored value; an empty
/// `phone` or `bio` clears it.
pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    changes: &ProfileChanges,
) -> Result<User, UserError> {
    let sql = format!(
        "UPDATE users SET \
         first_name = COALESCE($2, first_name), \
         last_name = COALESCE($3, last_name), \
         age = COALESCE($4, age), \
         gender = COALESCE($5, gender), \
         phone = CASE WHEN $6::text IS NULL THEN phone ELSE NULLIF(BTRIM($6), '') END, \
         bio = CASE WHEN $7::text IS NULL THEN bio ELSE NULLIF(BTRIM($7), '') END, \
         updated_at = NOW() \
         WHERE id = $1 RETURNING {USER_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(changes.first_name.as_deref().map(str::trim))
        .bind(changes.last_name.as_deref().map(str::trim))
        .bind(changes.age)
        .bind(changes.gender.map(|g| g.to_string()))
        .bind(changes.phone.as_deref())
        .bind(changes.bio.as_deref())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(user_from_row(&row)?),
        None => Err(UserError::NotFound),
    }
}

/// Record a logged-out session token. Expired entries are pruned on the way.
pub async fn revoke_token(
    pool: &PgPool,
    jti: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<(), UserError> {
    sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < NOW()")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO revoked_tokens (jti, user_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(jti)
    .bind(user_id)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn is_token_revoked(pool: &PgPool, jti: Uuid) -> Result<bool, UserError> {
    let revoked: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE jti = $1)")
        .bind(jti)
        .fetch_one(pool)
        .await?;
    Ok(revoked)
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User not found")]
    NotFound,

    #[error("A user with this {0} already exists")]
    Conflict(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        assert_eq!(conflict_field(&sqlx::Error::RowNotFound), None);
        assert_eq!(conflict_field(&sqlx::Error::PoolTimedOut), None);
    }

    #[test]
    fn test_conflict_message_names_field() {
        assert_eq!(
            UserError::Conflict("email").to_string(),
            "A user with this email already exists"
        );
    }
}
