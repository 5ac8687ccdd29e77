//! Database query functions for the `user_preferences` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::UserPreferences;

/// Insert or replace the preferences of a user.
pub async fn upsert_preferences(
    pool: &PgPool,
    user_id: Uuid,
    preferences: &serde_json::Value,
    updated_at: DateTime<Utc>,
) -> Result<UserPreferences> {
    let prefs = sqlx::query_as::<_, UserPreferences>(
        "INSERT INTO user_preferences (user_id, preferences, updated_at) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id) DO UPDATE \
         SET preferences = EXCLUDED.preferences, updated_at = EXCLUDED.updated_at \
         RETURNING *",
    )
    .bind(user_id)
    .bind(preferences)
    .bind(updated_at)
    .fetch_one(pool)
    .await
    .context("failed to upsert user preferences")?;

    Ok(prefs)
}

pub async fn get_preferences(pool: &PgPool, user_id: Uuid) -> Result<Option<UserPreferences>> {
    let prefs =
        sqlx::query_as::<_, UserPreferences>("SELECT * FROM user_preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch user preferences")?;

    Ok(prefs)
}
