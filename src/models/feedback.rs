use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::Order;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(rename = "_id")]
    pub id: String,
    /// Unique: one feedback per order.
    pub order_id: String,
    pub shop_id: String,
    pub customer_id: String,
    pub rating: u8,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn validate_rating(rating: u8) -> Result<(), ApiError> {
    if !(1..=5).contains(&rating) {
        return Err(ApiError::bad_request("Rating must be between 1 and 5"));
    }
    Ok(())
}

/// Feedback may be written only by the order's customer, once the order
/// is completed and paid.
pub fn check_feedback_allowed(order: &Order, customer_id: &str) -> Result<(), ApiError> {
    if order.customer_id != customer_id {
        return Err(ApiError::forbidden("Order belongs to another customer"));
    }
    if !order.feedback_allowed() {
        return Err(ApiError::conflict(format!(
            "Feedback requires a completed and paid order (status '{}', payment '{}')",
            order.order_status, order.payment_status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::pickup_order;
    use crate::models::{OrderStatus, PaymentStatus};

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(1).is_ok());
        assert!(validate_rating(5).is_ok());
        assert!(validate_rating(6).is_err());
    }

    #[test]
    fn completed_and_paid_order_accepts_feedback() {
        let order = pickup_order(OrderStatus::Completed, PaymentStatus::Paid);
        assert!(check_feedback_allowed(&order, "cust-1").is_ok());
    }

    #[test]
    fn unpaid_or_unfinished_orders_reject_feedback() {
        let unpaid = pickup_order(OrderStatus::Completed, PaymentStatus::ForReview);
        assert!(matches!(
            check_feedback_allowed(&unpaid, "cust-1"),
            Err(ApiError::Conflict(_))
        ));
        let running = pickup_order(OrderStatus::Washing, PaymentStatus::Paid);
        assert!(check_feedback_allowed(&running, "cust-1").is_err());
    }

    #[test]
    fn other_customers_cannot_leave_feedback() {
        let order = pickup_order(OrderStatus::Completed, PaymentStatus::Paid);
        assert!(matches!(
            check_feedback_allowed(&order, "cust-2"),
            Err(ApiError::Forbidden(_))
        ));
    }
}
