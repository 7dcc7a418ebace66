use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{PriceUnit, Service, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    SelfService,
    PickupDelivery,
}

const PICKUP_DELIVERY_FLOW: &[OrderStatus] = &[
    OrderStatus::Pending,
    OrderStatus::ToBePickedUp,
    OrderStatus::Sorting,
    OrderStatus::Washing,
    OrderStatus::Drying,
    OrderStatus::Folding,
    OrderStatus::ToBeDelivered,
    OrderStatus::Completed,
];

const SELF_SERVICE_FLOW: &[OrderStatus] = &[
    OrderStatus::Pending,
    OrderStatus::Scheduled,
    OrderStatus::InProgress,
    OrderStatus::Completed,
];

impl OrderType {
    /// The forward sequence of statuses for this kind of order.
    pub fn flow(self) -> &'static [OrderStatus] {
        match self {
            OrderType::PickupDelivery => PICKUP_DELIVERY_FLOW,
            OrderType::SelfService => SELF_SERVICE_FLOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "to be picked up")]
    ToBePickedUp,
    #[serde(rename = "sorting")]
    Sorting,
    #[serde(rename = "washing")]
    Washing,
    #[serde(rename = "drying")]
    Drying,
    #[serde(rename = "folding")]
    Folding,
    #[serde(rename = "to be delivered")]
    ToBeDelivered,
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

/// Outcome of an accepted status or payment change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance,
    /// The requested state is already the current one.
    Unchanged,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::ToBePickedUp => "to be picked up",
            OrderStatus::Sorting => "sorting",
            OrderStatus::Washing => "washing",
            OrderStatus::Drying => "drying",
            OrderStatus::Folding => "folding",
            OrderStatus::ToBeDelivered => "to be delivered",
            OrderStatus::Scheduled => "scheduled",
            OrderStatus::InProgress => "in progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn next(self, order_type: OrderType) -> Option<OrderStatus> {
        let flow = order_type.flow();
        let pos = flow.iter().position(|s| *s == self)?;
        flow.get(pos + 1).copied()
    }

    /// Legal moves: the immediate successor, or `cancelled` from any
    /// non-terminal state.
    pub fn can_transition(self, order_type: OrderType, to: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if !order_type.flow().contains(&self) {
            return false;
        }
        to == OrderStatus::Cancelled || self.next(order_type) == Some(to)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn check_transition(
    order_type: OrderType,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<Transition, ApiError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if from.can_transition(order_type, to) {
        Ok(Transition::Advance)
    } else {
        Err(ApiError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "for review")]
    ForReview,
    #[serde(rename = "paid")]
    Paid,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::ForReview => "for review",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, ForReview)
                | (Pending, Paid)
                | (ForReview, Paid)
                | (ForReview, Failed)
                | (Failed, ForReview)
                | (Pending, Cancelled)
                | (ForReview, Cancelled)
                | (Failed, Cancelled)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn check_payment_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<Transition, ApiError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if from.can_transition(to) {
        Ok(Transition::Advance)
    } else {
        Err(ApiError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub method_id: String,
    pub reference: String,
    pub amount: f64,
    pub proof_url: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// A laundry job. This is the only stored copy of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub customer_id: String,
    pub shop_id: String,
    pub admin_id: String,
    pub order_type: OrderType,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub services: Vec<Service>,
    pub total_weight: f64,
    pub total_price: f64,
    pub machine_id: Option<String>,
    pub appointment: Option<Slot>,
    pub pickup_address: Option<String>,
    pub pickup_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub payment: Option<PaymentProof>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn feedback_allowed(&self) -> bool {
        self.order_status == OrderStatus::Completed && self.payment_status == PaymentStatus::Paid
    }
}

/// Flat services are charged once, per-kg services by weight. Rounded to cents.
pub fn price_order(services: &[Service], weight: f64) -> f64 {
    let total: f64 = services
        .iter()
        .map(|s| match s.unit {
            PriceUnit::Flat => s.price,
            PriceUnit::PerKg => s.price * weight,
        })
        .sum();
    (total * 100.0).round() / 100.0
}

pub fn validate_weight(weight: f64) -> Result<(), ApiError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(ApiError::bad_request("Weight must be a non-negative number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn pickup_delivery_moves_forward_one_step_at_a_time() {
        let flow = OrderType::PickupDelivery.flow();
        for pair in flow.windows(2) {
            assert_eq!(
                check_transition(OrderType::PickupDelivery, pair[0], pair[1]).unwrap(),
                Transition::Advance
            );
        }
        assert!(check_transition(OrderType::PickupDelivery, Pending, Washing).is_err());
    }

    #[test]
    fn backward_moves_are_rejected() {
        let err = check_transition(OrderType::PickupDelivery, Drying, Washing).unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert!(check_transition(OrderType::SelfService, InProgress, Scheduled).is_err());
    }

    #[test]
    fn cancel_is_allowed_until_terminal() {
        assert!(Folding.can_transition(OrderType::PickupDelivery, Cancelled));
        assert!(Scheduled.can_transition(OrderType::SelfService, Cancelled));
        assert!(!Completed.can_transition(OrderType::SelfService, Cancelled));
        assert!(check_transition(OrderType::PickupDelivery, Cancelled, Pending).is_err());
    }

    #[test]
    fn statuses_from_the_other_flow_are_rejected() {
        assert!(check_transition(OrderType::SelfService, Pending, ToBePickedUp).is_err());
        assert!(check_transition(OrderType::PickupDelivery, Pending, Scheduled).is_err());
        assert!(!Washing.can_transition(OrderType::SelfService, Cancelled));
    }

    #[test]
    fn repeating_the_current_status_is_a_no_op() {
        assert_eq!(
            check_transition(OrderType::SelfService, InProgress, InProgress).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn statuses_serialize_as_display_strings() {
        assert_eq!(serde_json::to_string(&ToBePickedUp).unwrap(), "\"to be picked up\"");
        assert_eq!(
            serde_json::from_str::<OrderStatus>("\"in progress\"").unwrap(),
            InProgress
        );
        assert_eq!(
            serde_json::to_string(&PaymentStatus::ForReview).unwrap(),
            "\"for review\""
        );
        assert_eq!(
            serde_json::to_string(&OrderType::PickupDelivery).unwrap(),
            "\"pickup-delivery\""
        );
    }

    #[test]
    fn payment_review_flow() {
        use PaymentStatus as P;
        assert!(check_payment_transition(P::Pending, P::ForReview).is_ok());
        assert!(check_payment_transition(P::ForReview, P::Failed).is_ok());
        assert!(check_payment_transition(P::Failed, P::ForReview).is_ok());
        assert!(check_payment_transition(P::Paid, P::Failed).is_err());
        assert!(check_payment_transition(P::Paid, P::Cancelled).is_err());
        assert_eq!(
            check_payment_transition(P::Paid, P::Paid).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn price_combines_flat_and_weight_based_services() {
        let services = vec![
            Service {
                service_id: "wash".into(),
                name: "Wash & fold".into(),
                description: None,
                price: 35.5,
                unit: PriceUnit::PerKg,
            },
            Service {
                service_id: "iron".into(),
                name: "Ironing".into(),
                description: None,
                price: 50.0,
                unit: PriceUnit::Flat,
            },
        ];
        assert_eq!(price_order(&services, 3.0), 156.5);
        assert_eq!(price_order(&services, 0.0), 50.0);
        assert_eq!(price_order(&[], 7.0), 0.0);
    }

    #[test]
    fn weight_must_be_finite_and_non_negative() {
        assert!(validate_weight(2.5).is_ok());
        assert!(validate_weight(-1.0).is_err());
        assert!(validate_weight(f64::NAN).is_err());
    }
}
