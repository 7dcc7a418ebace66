// src/messages.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::{info, warn};
use mongodb::bson::doc;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Message, Role};
use crate::notification_hub::{channel_for, EventKind};
use crate::notifications::notify;
use crate::shops::load_shop;

const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub shop_id: String,
    /// Required when an admin writes; customers always write as themselves.
    pub customer_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub shop_id: String,
    pub customer_id: Option<String>,
}

/// Resolves the customer side of a shop conversation for the caller.
fn conversation_customer(user: &AuthUser, customer_id: Option<&str>) -> Result<String, ApiError> {
    match user.role {
        Role::Customer => Ok(user.id.clone()),
        Role::Admin => customer_id
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("customer_id is required")),
    }
}

/// Admins may only open conversations with customers who have ordered from
/// the shop.
fn check_known_customer(orders_with_shop: u64) -> Result<(), ApiError> {
    if orders_with_shop == 0 {
        return Err(ApiError::forbidden("Customer has no orders with this shop"));
    }
    Ok(())
}

/// POST /api/messages
pub async fn send_message(
    user: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::bad_request(format!(
            "Message exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    let shop = load_shop(&data, &payload.shop_id).await?;
    if user.role == Role::Admin && shop.admin_id != user.id {
        return Err(ApiError::forbidden("Shop belongs to another admin"));
    }
    let customer_id = conversation_customer(&user, payload.customer_id.as_deref())?;
    if user.role == Role::Admin {
        let orders_with_shop = data
            .mongodb
            .orders()
            .count_documents(doc! { "shop_id": &shop.id, "customer_id": &customer_id })
            .await?;
        check_known_customer(orders_with_shop)?;
    }

    let message = Message {
        id: Uuid::new_v4().to_string(),
        shop_id: shop.id.clone(),
        customer_id: customer_id.clone(),
        sender: user.role,
        content: content.to_string(),
        created_at: Utc::now(),
    };
    data.mongodb.messages().insert_one(&message).await?;
    info!("Message {} sent in shop {} conversation", message.id, shop.id);

    let recipient = match user.role {
        Role::Customer => channel_for(Role::Admin, &shop.admin_id),
        Role::Admin => channel_for(Role::Customer, &customer_id),
    };
    match serde_json::to_value(&message) {
        Ok(payload) => {
            notify(
                &data,
                recipient,
                EventKind::NewMessage,
                format!("New message about {}", shop.name),
                None,
                payload,
            )
            .await
        }
        Err(e) => warn!("Failed to encode message {} for push: {}", message.id, e),
    }

    Ok(HttpResponse::Created().json(message))
}

/// GET /api/messages?shop_id=...&customer_id=...
pub async fn list_messages(
    user: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ConversationQuery>,
) -> Result<HttpResponse, ApiError> {
    let shop = load_shop(&data, &query.shop_id).await?;
    if user.role == Role::Admin && shop.admin_id != user.id {
        return Err(ApiError::forbidden("Shop belongs to another admin"));
    }
    let customer_id = conversation_customer(&user, query.customer_id.as_deref())?;

    let mut messages: Vec<Message> = data
        .mongodb
        .messages()
        .find(doc! { "shop_id": &shop.id, "customer_id": &customer_id })
        .await?
        .try_collect()
        .await?;
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(HttpResponse::Ok().json(messages))
}
