// src/feedback.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{info, warn};
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{is_duplicate_key, ApiError};
use crate::models::{check_feedback_allowed, validate_rating, Feedback, Role};
use crate::notification_hub::{channel_for, EventKind};
use crate::notifications::notify;
use crate::orders::load_visible_order;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
    pub comments: Option<String>,
}

async fn push_feedback(data: &AppState, admin_id: &str, feedback: &Feedback, message: &str) {
    match serde_json::to_value(feedback) {
        Ok(payload) => {
            notify(
                data,
                channel_for(Role::Admin, admin_id),
                EventKind::NewFeedback,
                message.to_string(),
                Some(&feedback.order_id),
                payload,
            )
            .await
        }
        Err(e) => warn!("Failed to encode feedback {} for push: {}", feedback.id, e),
    }
}

/// POST /api/orders/{order_id}/feedback
pub async fn add_feedback(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<FeedbackRequest>,
) -> Result<HttpResponse, ApiError> {
    let customer_id = user.require_customer()?;
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    check_feedback_allowed(&order, customer_id)?;
    validate_rating(payload.rating)?;

    let now = Utc::now();
    let feedback = Feedback {
        id: Uuid::new_v4().to_string(),
        order_id: order.id.clone(),
        shop_id: order.shop_id.clone(),
        customer_id: customer_id.to_string(),
        rating: payload.rating,
        comments: payload.comments.clone(),
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = data.mongodb.feedback().insert_one(&feedback).await {
        if is_duplicate_key(&e) {
            return Err(ApiError::conflict("Feedback already submitted for this order"));
        }
        return Err(e.into());
    }
    info!("Feedback {} left on order {}", feedback.id, order.id);

    push_feedback(
        &data,
        &order.admin_id,
        &feedback,
        &format!("New {}-star feedback", feedback.rating),
    )
    .await;
    Ok(HttpResponse::Created().json(feedback))
}

/// PUT /api/orders/{order_id}/feedback
pub async fn edit_feedback(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<FeedbackRequest>,
) -> Result<HttpResponse, ApiError> {
    let customer_id = user.require_customer()?;
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    check_feedback_allowed(&order, customer_id)?;
    validate_rating(payload.rating)?;

    let filter = doc! { "order_id": &order.id, "customer_id": customer_id };
    let res = data
        .mongodb
        .feedback()
        .update_one(
            filter.clone(),
            doc! { "$set": {
                "rating": payload.rating as i32,
                "comments": payload.comments.clone(),
                "updated_at": to_bson(&Utc::now())?,
            } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::NotFound("Feedback"));
    }

    let feedback = data
        .mongodb
        .feedback()
        .find_one(filter)
        .await?
        .ok_or(ApiError::NotFound("Feedback"))?;
    push_feedback(&data, &order.admin_id, &feedback, "Feedback updated").await;
    Ok(HttpResponse::Ok().json(feedback))
}
