// src/payments.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{check_payment_transition, Order, OrderStatus, PaymentProof, PaymentStatus, Transition};
use crate::notification_hub::EventKind;
use crate::notifications::notify_order;
use crate::orders::{check_expected_version, commit_order_update, load_visible_order};
use crate::shops::load_shop;

/// Tolerance when comparing a submitted amount against the order total.
const AMOUNT_EPSILON: f64 = 0.005;

#[derive(Debug, Deserialize)]
pub struct SubmitPaymentRequest {
    pub method_id: String,
    pub reference: String,
    pub amount: f64,
    pub proof_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewPaymentRequest {
    pub status: PaymentStatus,
    pub expected_version: Option<i64>,
}

pub fn check_submission(order: &Order, req: &SubmitPaymentRequest) -> Result<(), ApiError> {
    if order.order_status == OrderStatus::Cancelled {
        return Err(ApiError::conflict("Order has been cancelled"));
    }
    if order.total_price <= 0.0 {
        return Err(ApiError::conflict("The shop has not set the order total yet"));
    }
    if req.reference.trim().is_empty() {
        return Err(ApiError::bad_request("Payment reference is required"));
    }
    if !req.amount.is_finite() || (req.amount - order.total_price).abs() > AMOUNT_EPSILON {
        return Err(ApiError::bad_request(format!(
            "Amount {:.2} does not match the order total {:.2}",
            req.amount, order.total_price
        )));
    }
    check_payment_transition(order.payment_status, PaymentStatus::ForReview)?;
    Ok(())
}

/// Admins settle payments; `for review` and `cancelled` are reached through
/// the customer's submission and order cancellation instead.
pub fn check_review(order: &Order, target: PaymentStatus) -> Result<Transition, ApiError> {
    if !matches!(target, PaymentStatus::Paid | PaymentStatus::Failed) {
        return Err(ApiError::bad_request(format!(
            "Payment can only be reviewed as paid or failed, not '{}'",
            target
        )));
    }
    if order.order_status == OrderStatus::Cancelled {
        return Err(ApiError::conflict("Order has been cancelled"));
    }
    let transition = check_payment_transition(order.payment_status, target)?;
    if transition == Transition::Advance && target == PaymentStatus::Paid {
        if let Some(proof) = &order.payment {
            if (proof.amount - order.total_price).abs() > AMOUNT_EPSILON {
                return Err(ApiError::conflict(format!(
                    "Proof amount {:.2} no longer matches the order total {:.2}",
                    proof.amount, order.total_price
                )));
            }
        }
    }
    Ok(transition)
}

/// POST /api/orders/{order_id}/payment
pub async fn submit_payment(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SubmitPaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_customer()?;
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    check_submission(&order, &payload)?;

    let shop = load_shop(&data, &order.shop_id).await?;
    if shop.payment_method(&payload.method_id).is_none() {
        return Err(ApiError::bad_request("Shop does not accept this payment method"));
    }

    let resubmission = order.payment_status == PaymentStatus::Failed;
    let now = Utc::now();
    let proof = PaymentProof {
        method_id: payload.method_id.clone(),
        reference: payload.reference.trim().to_string(),
        amount: payload.amount,
        proof_url: payload.proof_url.clone(),
        submitted_at: now,
    };
    let set = doc! {
        "payment": to_bson(&proof)?,
        "payment_status": PaymentStatus::ForReview.as_str(),
        "updated_at": to_bson(&now)?,
    };
    let order = commit_order_update(&data, &order, set).await?;
    info!("Payment proof submitted for order {}", order.id);

    let (event, message) = if resubmission {
        (EventKind::UpdatePaymentStatusProof, "Payment proof resubmitted")
    } else {
        (EventKind::NewPayment, "Payment proof submitted")
    };
    notify_order(&data, &order, event, message).await;
    Ok(HttpResponse::Ok().json(order))
}

/// PATCH /api/orders/{order_id}/payment/status
pub async fn review_payment(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ReviewPaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    check_expected_version(&order, payload.expected_version)?;

    if check_review(&order, payload.status)? == Transition::Unchanged {
        return Ok(HttpResponse::Ok().json(order));
    }

    let set = doc! {
        "payment_status": payload.status.as_str(),
        "updated_at": to_bson(&Utc::now())?,
    };
    let order = commit_order_update(&data, &order, set).await?;
    info!("Payment for order {} marked '{}'", order.id, order.payment_status);

    notify_order(
        &data,
        &order,
        EventKind::UpdatePaymentStatus,
        &format!("Payment marked '{}'", order.payment_status),
    )
    .await;
    Ok(HttpResponse::Ok().json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::pickup_order;

    fn submission(amount: f64) -> SubmitPaymentRequest {
        SubmitPaymentRequest {
            method_id: "gcash".into(),
            reference: "REF-1".into(),
            amount,
            proof_url: None,
        }
    }

    fn priced(status: OrderStatus, payment: PaymentStatus) -> Order {
        let mut order = pickup_order(status, payment);
        order.total_price = 120.0;
        order
    }

    #[test]
    fn submission_requires_matching_amount() {
        let order = priced(OrderStatus::Washing, PaymentStatus::Pending);
        assert!(check_submission(&order, &submission(120.0)).is_ok());
        assert!(check_submission(&order, &submission(100.0)).is_err());
    }

    #[test]
    fn submission_needs_total_and_open_order() {
        let unpriced = pickup_order(OrderStatus::Pending, PaymentStatus::Pending);
        assert!(check_submission(&unpriced, &submission(0.0)).is_err());

        let cancelled = priced(OrderStatus::Cancelled, PaymentStatus::Cancelled);
        assert!(check_submission(&cancelled, &submission(120.0)).is_err());
    }

    #[test]
    fn failed_payment_can_be_resubmitted_but_paid_cannot() {
        let failed = priced(OrderStatus::Washing, PaymentStatus::Failed);
        assert!(check_submission(&failed, &submission(120.0)).is_ok());
        let paid = priced(OrderStatus::Washing, PaymentStatus::Paid);
        assert!(check_submission(&paid, &submission(120.0)).is_err());
    }

    #[test]
    fn review_only_settles() {
        let order = priced(OrderStatus::Folding, PaymentStatus::ForReview);
        assert_eq!(check_review(&order, PaymentStatus::Paid).unwrap(), Transition::Advance);
        assert_eq!(check_review(&order, PaymentStatus::Failed).unwrap(), Transition::Advance);
        assert!(check_review(&order, PaymentStatus::Cancelled).is_err());
        assert!(check_review(&order, PaymentStatus::ForReview).is_err());

        let paid = priced(OrderStatus::Folding, PaymentStatus::Paid);
        assert_eq!(check_review(&paid, PaymentStatus::Paid).unwrap(), Transition::Unchanged);
        assert!(check_review(&paid, PaymentStatus::Failed).is_err());
    }

    fn with_proof(amount: f64) -> Order {
        let mut order = priced(OrderStatus::Folding, PaymentStatus::ForReview);
        order.payment = Some(PaymentProof {
            method_id: "gcash".into(),
            reference: "REF-1".into(),
            amount,
            proof_url: None,
            submitted_at: order.created_at,
        });
        order
    }

    #[test]
    fn proof_for_another_total_cannot_be_marked_paid() {
        let mut order = with_proof(100.0);
        order.total_price = 150.0;
        assert!(matches!(
            check_review(&order, PaymentStatus::Paid),
            Err(ApiError::Conflict(_))
        ));
        // It can still be rejected so the customer resubmits.
        assert_eq!(check_review(&order, PaymentStatus::Failed).unwrap(), Transition::Advance);

        assert_eq!(check_review(&with_proof(120.0), PaymentStatus::Paid).unwrap(), Transition::Advance);
    }

    #[test]
    fn cash_payment_without_proof_can_be_recorded() {
        let order = priced(OrderStatus::Folding, PaymentStatus::Pending);
        assert_eq!(check_review(&order, PaymentStatus::Paid).unwrap(), Transition::Advance);
    }
}
