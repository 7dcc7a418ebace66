// src/shops.rs

use std::sync::OnceLock;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{
    Feedback, OpeningHours, Order, OrderStatus, PaymentMethod, PriceUnit, Service, Shop, ShopType,
};

/* -------------------------------------------------------------------------- */
/* Payloads                                                                   */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct NewService {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub unit: PriceUnit,
}

impl NewService {
    pub fn into_service(self) -> Result<Service, ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::bad_request("Service name is required"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ApiError::bad_request("Service price must be a non-negative number"));
        }
        Ok(Service {
            service_id: Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            description: self.description,
            price: self.price,
            unit: self.unit,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NewPaymentMethod {
    pub name: String,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
}

impl NewPaymentMethod {
    pub fn into_method(self) -> Result<PaymentMethod, ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::bad_request("Payment method name is required"));
        }
        Ok(PaymentMethod {
            method_id: Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            account_name: self.account_name,
            account_number: self.account_number,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateShopRequest {
    pub name: String,
    pub shop_type: ShopType,
    pub address: String,
    pub description: Option<String>,
    #[serde(default)]
    pub services: Vec<NewService>,
    #[serde(default)]
    pub payment_methods: Vec<NewPaymentMethod>,
    #[serde(default)]
    pub opening_hours: Vec<OpeningHours>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateShopRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub opening_hours: Option<Vec<OpeningHours>>,
}

#[derive(Debug, Deserialize)]
pub struct ShopQuery {
    pub shop_type: Option<ShopType>,
    /// Case-insensitive substring match on the shop name.
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShopOrdersQuery {
    pub status: Option<OrderStatus>,
}

fn clock_regex() -> &'static Regex {
    static CLOCK: OnceLock<Regex> = OnceLock::new();
    CLOCK.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("clock pattern is valid"))
}

pub fn validate_opening_hours(hours: &[OpeningHours]) -> Result<(), ApiError> {
    for h in hours {
        if !clock_regex().is_match(&h.open) || !clock_regex().is_match(&h.close) {
            return Err(ApiError::bad_request(format!(
                "Opening hours must be HH:MM (got {}-{})",
                h.open, h.close
            )));
        }
        // Zero-padded HH:MM compares correctly as text.
        if h.open >= h.close {
            return Err(ApiError::bad_request(format!(
                "Opening time {} must be before closing time {}",
                h.open, h.close
            )));
        }
    }
    Ok(())
}

pub fn shop_filter(query: &ShopQuery) -> Document {
    let mut filter = doc! {};
    if let Some(shop_type) = query.shop_type {
        filter.insert("shop_type", shop_type.as_str());
    }
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        filter.insert("name", doc! { "$regex": regex::escape(q), "$options": "i" });
    }
    filter
}

/* -------------------------------------------------------------------------- */
/* Lookups shared with other handlers                                         */
/* -------------------------------------------------------------------------- */

pub async fn load_shop(data: &AppState, shop_id: &str) -> Result<Shop, ApiError> {
    data.mongodb
        .shops()
        .find_one(doc! { "_id": shop_id })
        .await?
        .ok_or(ApiError::NotFound("Shop"))
}

/// Loads a shop and checks that `admin_id` owns it.
pub async fn load_owned_shop(data: &AppState, shop_id: &str, admin_id: &str) -> Result<Shop, ApiError> {
    let shop = load_shop(data, shop_id).await?;
    if shop.admin_id != admin_id {
        return Err(ApiError::forbidden("Shop belongs to another admin"));
    }
    Ok(shop)
}

/* -------------------------------------------------------------------------- */
/* Handlers                                                                   */
/* -------------------------------------------------------------------------- */

/// GET /api/shops
pub async fn list_shops(
    data: web::Data<AppState>,
    query: web::Query<ShopQuery>,
) -> Result<HttpResponse, ApiError> {
    let mut shops: Vec<Shop> = data
        .mongodb
        .shops()
        .find(shop_filter(&query))
        .await?
        .try_collect()
        .await?;
    shops.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(HttpResponse::Ok().json(shops))
}

/// POST /api/shops
pub async fn create_shop(
    user: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateShopRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let payload = payload.into_inner();

    if payload.name.trim().is_empty() {
        return Err(ApiError::bad_request("Shop name is required"));
    }
    validate_opening_hours(&payload.opening_hours)?;

    let services = payload
        .services
        .into_iter()
        .map(NewService::into_service)
        .collect::<Result<Vec<_>, _>>()?;
    let payment_methods = payload
        .payment_methods
        .into_iter()
        .map(NewPaymentMethod::into_method)
        .collect::<Result<Vec<_>, _>>()?;

    let now = Utc::now();
    let shop = Shop {
        id: Uuid::new_v4().to_string(),
        admin_id: admin_id.to_string(),
        name: payload.name.trim().to_string(),
        shop_type: payload.shop_type,
        address: payload.address,
        description: payload.description,
        services,
        payment_methods,
        opening_hours: payload.opening_hours,
        closing: false,
        created_at: now,
        updated_at: now,
    };
    data.mongodb.shops().insert_one(&shop).await?;
    info!("Shop {} created by admin {}", shop.id, admin_id);

    Ok(HttpResponse::Created().json(shop))
}

/// GET /api/shops/{shop_id}
pub async fn get_shop(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let shop = load_shop(&data, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(shop))
}

/// PUT /api/shops/{shop_id}
pub async fn update_shop(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateShopRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let mut update_doc = doc! {};
    if let Some(name) = payload.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(ApiError::bad_request("Shop name cannot be empty"));
        }
        update_doc.insert("name", name);
    }
    if let Some(address) = &payload.address {
        update_doc.insert("address", address);
    }
    if let Some(description) = &payload.description {
        update_doc.insert("description", description);
    }
    if let Some(hours) = &payload.opening_hours {
        validate_opening_hours(hours)?;
        update_doc.insert("opening_hours", to_bson(hours)?);
    }
    if update_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    update_doc.insert("updated_at", to_bson(&Utc::now())?);

    data.mongodb
        .shops()
        .update_one(doc! { "_id": &shop_id }, doc! { "$set": update_doc })
        .await?;

    let shop = load_shop(&data, &shop_id).await?;
    Ok(HttpResponse::Ok().json(shop))
}

/// Orders of the shop that are not completed or cancelled.
pub fn open_orders_filter(shop_id: &str) -> Document {
    doc! {
        "shop_id": shop_id,
        "order_status": { "$nin": [OrderStatus::Completed.as_str(), OrderStatus::Cancelled.as_str()] },
    }
}

/// DELETE /api/shops/{shop_id}
///
/// Refused while the shop still has open orders. The shop is flagged as
/// closing before the check so orders placed from then on are refused; an
/// order whose request loaded the shop before the flag was set can still
/// slip through.
pub async fn delete_shop(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let shops = data.mongodb.shops();
    shops
        .update_one(doc! { "_id": &shop_id }, doc! { "$set": { "closing": true } })
        .await?;

    let open_orders = data
        .mongodb
        .orders()
        .count_documents(open_orders_filter(&shop_id))
        .await?;
    if open_orders > 0 {
        shops
            .update_one(doc! { "_id": &shop_id }, doc! { "$set": { "closing": false } })
            .await?;
        return Err(ApiError::conflict(format!(
            "Shop still has {} open order(s)",
            open_orders
        )));
    }

    shops.delete_one(doc! { "_id": &shop_id }).await?;
    let machines = data
        .mongodb
        .machines()
        .delete_many(doc! { "shop_id": &shop_id })
        .await?;
    info!(
        "Shop {} deleted by admin {} ({} machine(s) removed)",
        shop_id, admin_id, machines.deleted_count
    );
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/shops/{shop_id}/services
pub async fn add_service(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewService>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let service = payload.into_inner().into_service()?;
    data.mongodb
        .shops()
        .update_one(
            doc! { "_id": &shop_id },
            doc! {
                "$push": { "services": to_bson(&service)? },
                "$set": { "updated_at": to_bson(&Utc::now())? },
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(service))
}

/// DELETE /api/shops/{shop_id}/services/{service_id}
pub async fn remove_service(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let (shop_id, service_id) = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let res = data
        .mongodb
        .shops()
        .update_one(
            doc! { "_id": &shop_id },
            doc! { "$pull": { "services": { "service_id": &service_id } } },
        )
        .await?;
    if res.modified_count == 0 {
        return Err(ApiError::NotFound("Service"));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/shops/{shop_id}/payment-methods
pub async fn add_payment_method(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewPaymentMethod>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let method = payload.into_inner().into_method()?;
    data.mongodb
        .shops()
        .update_one(
            doc! { "_id": &shop_id },
            doc! {
                "$push": { "payment_methods": to_bson(&method)? },
                "$set": { "updated_at": to_bson(&Utc::now())? },
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(method))
}

/// DELETE /api/shops/{shop_id}/payment-methods/{method_id}
pub async fn remove_payment_method(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let (shop_id, method_id) = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let res = data
        .mongodb
        .shops()
        .update_one(
            doc! { "_id": &shop_id },
            doc! { "$pull": { "payment_methods": { "method_id": &method_id } } },
        )
        .await?;
    if res.modified_count == 0 {
        return Err(ApiError::NotFound("Payment method"));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/shops/{shop_id}/orders
pub async fn shop_orders(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ShopOrdersQuery>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let mut filter = doc! { "shop_id": &shop_id };
    if let Some(status) = query.status {
        filter.insert("order_status", status.as_str());
    }
    let mut orders: Vec<Order> = data
        .mongodb
        .orders()
        .find(filter)
        .await?
        .try_collect()
        .await?;
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(HttpResponse::Ok().json(orders))
}

/// GET /api/shops/{shop_id}/feedback
pub async fn shop_feedback(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let shop_id = path.into_inner();
    load_shop(&data, &shop_id).await?;

    let mut feedback: Vec<Feedback> = data
        .mongodb
        .feedback()
        .find(doc! { "shop_id": &shop_id })
        .await?
        .try_collect()
        .await?;
    feedback.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(HttpResponse::Ok().json(feedback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Weekday;

    fn hours(open: &str, close: &str) -> OpeningHours {
        OpeningHours {
            day: Weekday::Monday,
            open: open.into(),
            close: close.into(),
        }
    }

    #[test]
    fn opening_hours_must_be_well_formed_and_ordered() {
        assert!(validate_opening_hours(&[hours("08:00", "20:30")]).is_ok());
        assert!(validate_opening_hours(&[hours("8:00", "20:30")]).is_err());
        assert!(validate_opening_hours(&[hours("20:00", "08:00")]).is_err());
        assert!(validate_opening_hours(&[hours("24:00", "25:00")]).is_err());
    }

    #[test]
    fn open_orders_exclude_finished_ones() {
        let filter = open_orders_filter("shop-1");
        assert_eq!(filter.get_str("shop_id").unwrap(), "shop-1");
        let excluded = filter
            .get_document("order_status")
            .unwrap()
            .get_array("$nin")
            .unwrap();
        assert_eq!(excluded.len(), 2);
        assert!(excluded.contains(&"completed".into()));
        assert!(excluded.contains(&"cancelled".into()));
    }

    #[test]
    fn shop_filter_escapes_search_text() {
        let filter = shop_filter(&ShopQuery {
            shop_type: Some(ShopType::SelfService),
            q: Some(" Wash+Go ".into()),
        });
        assert_eq!(
            filter,
            doc! {
                "shop_type": "self-service",
                "name": { "$regex": "Wash\\+Go", "$options": "i" },
            }
        );
        assert!(shop_filter(&ShopQuery { shop_type: None, q: Some("  ".into()) }).is_empty());
    }

    #[test]
    fn new_service_rejects_negative_price() {
        let bad = NewService {
            name: "Dry clean".into(),
            description: None,
            price: -5.0,
            unit: PriceUnit::Flat,
        };
        assert!(bad.into_service().is_err());
    }
}
