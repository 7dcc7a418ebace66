// src/accounts.rs

use actix_web::{web, HttpResponse};
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::doc;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Profile, Shop};

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// GET /api/customers/me
pub async fn get_customer_profile(
    user: AuthUser,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let customer_id = user.require_customer()?;
    let customer = data
        .mongodb
        .customers()
        .find_one(doc! { "_id": customer_id })
        .await?
        .ok_or(ApiError::NotFound("Customer"))?;
    Ok(HttpResponse::Ok().json(Profile::from(customer)))
}

/// PUT /api/customers/me
pub async fn update_customer_profile(
    user: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let customer_id = user.require_customer()?;

    let mut update_doc = doc! {};
    if let Some(name) = payload.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        update_doc.insert("name", name);
    }
    if let Some(phone) = &payload.phone {
        update_doc.insert("phone", phone.trim());
    }
    if let Some(address) = &payload.address {
        update_doc.insert("address", address.trim());
    }
    if update_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }

    let customers = data.mongodb.customers();
    let res = customers
        .update_one(doc! { "_id": customer_id }, doc! { "$set": update_doc })
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::NotFound("Customer"));
    }
    info!("Customer {} updated their profile", customer_id);

    let customer = customers
        .find_one(doc! { "_id": customer_id })
        .await?
        .ok_or(ApiError::NotFound("Customer"))?;
    Ok(HttpResponse::Ok().json(Profile::from(customer)))
}

/// GET /api/admin/me
pub async fn get_admin_profile(
    user: AuthUser,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let admin = data
        .mongodb
        .admins()
        .find_one(doc! { "_id": admin_id })
        .await?
        .ok_or(ApiError::NotFound("Admin"))?;
    Ok(HttpResponse::Ok().json(Profile::from(admin)))
}

/// GET /api/admin/shops
pub async fn get_admin_shops(
    user: AuthUser,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let mut shops: Vec<Shop> = data
        .mongodb
        .shops()
        .find(doc! { "admin_id": admin_id })
        .await?
        .try_collect()
        .await?;
    shops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(HttpResponse::Ok().json(shops))
}
