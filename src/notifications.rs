// src/notifications.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::{error, warn};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Notification, Order, Role};
use crate::notification_hub::{channel_for, EventKind, Publish};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Pushes an event to the channel's live sessions without recording it.
pub fn publish(data: &AppState, channel: String, event: EventKind, payload: serde_json::Value) {
    data.hub.do_send(Publish {
        channel,
        event,
        payload,
    });
}

/// Records a notification for `channel` and pushes the event to its live
/// sessions. The mutation that triggered it has already been committed, so
/// failures here are logged rather than returned.
pub async fn notify(
    data: &AppState,
    channel: String,
    event: EventKind,
    message: String,
    order_id: Option<&str>,
    payload: serde_json::Value,
) {
    let record = Notification {
        id: Uuid::new_v4().to_string(),
        channel: channel.clone(),
        event: event.as_str().to_string(),
        message,
        order_id: order_id.map(str::to_string),
        read: false,
        created_at: Utc::now(),
    };
    if let Err(e) = data.mongodb.notifications().insert_one(&record).await {
        error!("Failed to record {} notification for {}: {}", event.as_str(), channel, e);
    }
    publish(data, channel, event, payload);
}

/// Pushes an order change to both the shop admin and the customer.
pub async fn notify_order(data: &AppState, order: &Order, event: EventKind, message: &str) {
    let payload = match serde_json::to_value(order) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to encode order {} for push: {}", order.id, e);
            return;
        }
    };
    for channel in [
        channel_for(Role::Admin, &order.admin_id),
        channel_for(Role::Customer, &order.customer_id),
    ] {
        notify(
            data,
            channel,
            event,
            message.to_string(),
            Some(&order.id),
            payload.clone(),
        )
        .await;
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

impl NotificationQuery {
    pub fn page_size(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: u64,
}

/// GET /api/notifications
pub async fn list_notifications(
    user: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<NotificationQuery>,
) -> Result<HttpResponse, ApiError> {
    let channel = channel_for(user.role, &user.id);
    let mut filter = doc! { "channel": &channel };
    if query.unread_only {
        filter.insert("read", false);
    }

    let notifications: Vec<Notification> = data
        .mongodb
        .notifications()
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .limit(query.page_size())
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(notifications))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    user: AuthUser,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let channel = channel_for(user.role, &user.id);
    let unread = data
        .mongodb
        .notifications()
        .count_documents(doc! { "channel": channel, "read": false })
        .await?;
    Ok(HttpResponse::Ok().json(UnreadCount { unread }))
}

/// PATCH /api/notifications/{id}/read
pub async fn mark_read(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let notification_id = path.into_inner();
    let channel = channel_for(user.role, &user.id);
    let res = data
        .mongodb
        .notifications()
        .update_one(
            doc! { "_id": &notification_id, "channel": channel },
            doc! { "$set": { "read": true } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::NotFound("Notification"));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// PATCH /api/notifications/read-all
pub async fn mark_all_read(
    user: AuthUser,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let channel = channel_for(user.role, &user.id);
    let res = data
        .mongodb
        .notifications()
        .update_many(
            doc! { "channel": channel, "read": false },
            doc! { "$set": { "read": true } },
        )
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": res.modified_count })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<i64>) -> NotificationQuery {
        NotificationQuery {
            unread_only: false,
            limit,
        }
    }

    #[test]
    fn page_size_is_bounded() {
        assert_eq!(query(None).page_size(), DEFAULT_LIMIT);
        assert_eq!(query(Some(10)).page_size(), 10);
        assert_eq!(query(Some(5_000)).page_size(), MAX_LIMIT);
        assert_eq!(query(Some(-3)).page_size(), 1);
    }
}
