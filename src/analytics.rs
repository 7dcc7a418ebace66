// src/analytics.rs

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::{Duration, NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::doc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Feedback, Order, PaymentStatus};
use crate::shops::load_owned_shop;

const TREND_DAYS: i64 = 7;

#[derive(Debug, Serialize, PartialEq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub orders: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ShopAnalytics {
    pub shop_id: String,
    pub total_orders: u32,
    pub orders_by_status: BTreeMap<String, u32>,
    /// Sum of totals over paid orders.
    pub revenue: f64,
    pub pending_payments: u32,
    pub average_rating: Option<f64>,
    pub feedback_count: u32,
    /// Oldest first, ending today.
    pub last_7_days: Vec<DailyCount>,
}

pub fn summarize(shop_id: &str, orders: &[Order], feedback: &[Feedback], today: NaiveDate) -> ShopAnalytics {
    let mut orders_by_status = BTreeMap::new();
    let mut revenue = 0.0;
    let mut pending_payments = 0;
    for order in orders {
        *orders_by_status
            .entry(order.order_status.as_str().to_string())
            .or_insert(0) += 1;
        match order.payment_status {
            PaymentStatus::Paid => revenue += order.total_price,
            PaymentStatus::ForReview => pending_payments += 1,
            _ => {}
        }
    }

    let average_rating = if feedback.is_empty() {
        None
    } else {
        let sum: u32 = feedback.iter().map(|f| f.rating as u32).sum();
        Some(((sum as f64 / feedback.len() as f64) * 10.0).round() / 10.0)
    };

    let last_7_days = (0..TREND_DAYS)
        .rev()
        .map(|back| {
            let date = today - Duration::days(back);
            let count = orders
                .iter()
                .filter(|o| o.created_at.date_naive() == date)
                .count() as u32;
            DailyCount { date, orders: count }
        })
        .collect();

    ShopAnalytics {
        shop_id: shop_id.to_string(),
        total_orders: orders.len() as u32,
        orders_by_status,
        revenue: (revenue * 100.0).round() / 100.0,
        pending_payments,
        average_rating,
        feedback_count: feedback.len() as u32,
        last_7_days,
    }
}

/// GET /api/shops/{shop_id}/analytics
pub async fn shop_analytics(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let orders: Vec<Order> = data
        .mongodb
        .orders()
        .find(doc! { "shop_id": &shop_id })
        .await?
        .try_collect()
        .await?;
    let feedback: Vec<Feedback> = data
        .mongodb
        .feedback()
        .find(doc! { "shop_id": &shop_id })
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(summarize(&shop_id, &orders, &feedback, Utc::now().date_naive())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::pickup_order;
    use crate::models::OrderStatus;
    use chrono::TimeZone;

    fn feedback(rating: u8) -> Feedback {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 8, 0, 0).unwrap();
        Feedback {
            id: format!("f{}", rating),
            order_id: format!("o{}", rating),
            shop_id: "shop-1".into(),
            customer_id: "cust-1".into(),
            rating,
            comments: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn revenue_counts_only_paid_orders() {
        let mut paid = pickup_order(OrderStatus::Completed, PaymentStatus::Paid);
        paid.total_price = 150.25;
        let mut review = pickup_order(OrderStatus::Washing, PaymentStatus::ForReview);
        review.total_price = 99.0;
        let cancelled = pickup_order(OrderStatus::Cancelled, PaymentStatus::Cancelled);

        let today = NaiveDate::from_ymd_opt(2030, 1, 5).unwrap();
        let stats = summarize("shop-1", &[paid, review, cancelled], &[], today);
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.revenue, 150.25);
        assert_eq!(stats.pending_payments, 1);
        assert_eq!(stats.orders_by_status.get("washing"), Some(&1));
        assert_eq!(stats.average_rating, None);
    }

    #[test]
    fn average_rating_rounds_to_one_decimal() {
        let today = NaiveDate::from_ymd_opt(2030, 1, 5).unwrap();
        let stats = summarize("shop-1", &[], &[feedback(5), feedback(4), feedback(4)], today);
        assert_eq!(stats.average_rating, Some(4.3));
        assert_eq!(stats.feedback_count, 3);
    }

    #[test]
    fn daily_trend_covers_a_week_ending_today() {
        // Fixture orders are created on 2030-01-02.
        let orders = vec![
            pickup_order(OrderStatus::Pending, PaymentStatus::Pending),
            pickup_order(OrderStatus::Pending, PaymentStatus::Pending),
        ];
        let today = NaiveDate::from_ymd_opt(2030, 1, 5).unwrap();
        let stats = summarize("shop-1", &orders, &[], today);
        assert_eq!(stats.last_7_days.len(), 7);
        assert_eq!(stats.last_7_days.last().unwrap().date, today);
        let jan2 = stats
            .last_7_days
            .iter()
            .find(|d| d.date == NaiveDate::from_ymd_opt(2030, 1, 2).unwrap())
            .unwrap();
        assert_eq!(jan2.orders, 2);
    }
}
