//! Database query functions for the `notifications` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewNotification, Notification};

pub async fn insert_notification(pool: &PgPool, new: &NewNotification) -> Result<Notification> {
    let notification = sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications (user_id, kind, title, body, payload, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.user_id)
    .bind(new.kind)
    .bind(&new.title)
    .bind(&new.body)
    .bind(&new.payload)
    .bind(new.created_at)
    .fetch_one(pool)
    .await
    .context("failed to insert notification")?;

    Ok(notification)
}

/// List a user's notifications, newest first.
pub async fn list_notifications_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Notification>> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list notifications")?;

    Ok(notifications)
}
