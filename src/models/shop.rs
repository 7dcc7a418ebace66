use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::OrderType;

/// A shop is either machine rental or full service; this also fixes
/// which kind of order it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShopType {
    SelfService,
    PickupDelivery,
}

impl ShopType {
    pub fn order_type(self) -> OrderType {
        match self {
            ShopType::SelfService => OrderType::SelfService,
            ShopType::PickupDelivery => OrderType::PickupDelivery,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShopType::SelfService => "self-service",
            ShopType::PickupDelivery => "pickup-delivery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceUnit {
    PerKg,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub service_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub unit: PriceUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub method_id: String,
    /// e.g. "GCash", "Cash"
    pub name: String,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// Times are "HH:MM", 24h clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub day: Weekday,
    pub open: String,
    pub close: String,
}

/// A laundry business. Orders are not embedded; they are queried from the
/// `orders` collection by `shop_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    #[serde(rename = "_id")]
    pub id: String,
    pub admin_id: String,
    pub name: String,
    pub shop_type: ShopType,
    pub address: String,
    pub description: Option<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    pub opening_hours: Vec<OpeningHours>,
    /// Set while a delete is in progress; new orders are refused.
    #[serde(default)]
    pub closing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shop {
    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    pub fn payment_method(&self, method_id: &str) -> Option<&PaymentMethod> {
        self.payment_methods.iter().find(|m| m.method_id == method_id)
    }
}
