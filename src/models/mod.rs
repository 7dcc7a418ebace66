mod feedback;
mod machine;
mod message;
mod notification;
mod order;
mod shop;
mod user;

pub use feedback::*;
pub use machine::*;
pub use message::*;
pub use notification::*;
pub use order::*;
pub use shop::*;
pub use user::*;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use super::*;

    pub fn pickup_order(status: OrderStatus, payment: PaymentStatus) -> Order {
        let created = Utc.with_ymd_and_hms(2030, 1, 2, 8, 0, 0).unwrap();
        Order {
            id: "order-1".into(),
            customer_id: "cust-1".into(),
            shop_id: "shop-1".into(),
            admin_id: "admin-1".into(),
            order_type: OrderType::PickupDelivery,
            order_status: status,
            payment_status: payment,
            services: vec![],
            total_weight: 0.0,
            total_price: 0.0,
            machine_id: None,
            appointment: None,
            pickup_address: Some("12 Mabini St".into()),
            pickup_date: None,
            notes: None,
            payment: None,
            version: 1,
            created_at: created,
            updated_at: created,
        }
    }
}
