// src/machines.rs

use std::collections::HashSet;
use std::future::Future;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::{info, warn};
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Appointment, Machine, MachineType, Order, OrderStatus, Role, ShopType};
use crate::notification_hub::{channel_for, EventKind};
use crate::notifications::publish;
use crate::shops::{load_owned_shop, load_shop};

/// Attempts at a conditional booking write before giving up.
const BOOKING_ATTEMPTS: usize = 3;

#[derive(Debug, Deserialize)]
pub struct CreateMachineRequest {
    pub label: String,
    pub machine_type: MachineType,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMachineRequest {
    pub label: Option<String>,
    pub machine_type: Option<MachineType>,
    pub available: Option<bool>,
}

async fn load_machine(data: &AppState, shop_id: &str, machine_id: &str) -> Result<Machine, ApiError> {
    data.mongodb
        .machines()
        .find_one(doc! { "_id": machine_id, "shop_id": shop_id })
        .await?
        .ok_or(ApiError::NotFound("Machine"))
}

/// Channels told about a machine change: the shop admin, plus the customer
/// whose booking changed.
pub fn machine_update_channels(admin_id: &str, customer_id: Option<&str>) -> Vec<String> {
    let mut channels = vec![channel_for(Role::Admin, admin_id)];
    if let Some(customer_id) = customer_id {
        channels.push(channel_for(Role::Customer, customer_id));
    }
    channels
}

/// Sends the machine's new state as `machine-update`. Availability is live
/// state, so nothing is recorded.
fn push_machine_update<T: Serialize>(
    data: &AppState,
    admin_id: &str,
    customer_id: Option<&str>,
    body: &T,
) {
    let payload = match serde_json::to_value(body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to encode machine update: {}", e);
            return;
        }
    };
    for channel in machine_update_channels(admin_id, customer_id) {
        publish(data, channel, EventKind::MachineUpdate, payload.clone());
    }
}

pub fn booking_filter(machine_id: &str, version: i64) -> Document {
    doc! { "_id": machine_id, "version": version }
}

pub fn booking_update(appointment: &Appointment) -> Result<Document, ApiError> {
    Ok(doc! {
        "$push": { "appointments": to_bson(appointment)? },
        "$inc": { "version": 1 },
    })
}

/// Runs `attempt` until it lands a write, at most `BOOKING_ATTEMPTS` times.
/// `Ok(None)` from an attempt means another writer got there first.
async fn with_booking_retries<T, F, Fut>(machine_id: &str, mut attempt: F) -> Result<T, ApiError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Option<T>, ApiError>>,
{
    for n in 1..=BOOKING_ATTEMPTS {
        if let Some(done) = attempt(n).await? {
            return Ok(done);
        }
        warn!("Machine {} changed during write (attempt {})", machine_id, n);
    }
    Err(ApiError::conflict("Machine is busy, please try again"))
}

/// Order ids of appointments whose orders are in `finished`.
pub fn finished_appointments(machine: &Machine, finished: &HashSet<String>) -> Vec<String> {
    machine
        .appointments
        .iter()
        .filter(|a| finished.contains(&a.order_id))
        .map(|a| a.order_id.clone())
        .collect()
}

/// Removes appointments left behind by completed or cancelled orders whose
/// release did not go through. `None` when the machine changed meanwhile.
async fn prune_finished_appointments(
    data: &AppState,
    mut machine: Machine,
) -> Result<Option<Machine>, ApiError> {
    let order_ids: Vec<String> = machine.appointments.iter().map(|a| a.order_id.clone()).collect();
    if order_ids.is_empty() {
        return Ok(Some(machine));
    }
    let finished: Vec<Order> = data
        .mongodb
        .orders()
        .find(doc! {
            "_id": { "$in": order_ids },
            "order_status": { "$in": [OrderStatus::Completed.as_str(), OrderStatus::Cancelled.as_str()] },
        })
        .await?
        .try_collect()
        .await?;
    let finished: HashSet<String> = finished.into_iter().map(|o| o.id).collect();
    let stale = finished_appointments(&machine, &finished);
    if stale.is_empty() {
        return Ok(Some(machine));
    }

    let res = data
        .mongodb
        .machines()
        .update_one(
            booking_filter(&machine.id, machine.version),
            doc! {
                "$pull": { "appointments": { "order_id": { "$in": stale.clone() } } },
                "$inc": { "version": 1 },
            },
        )
        .await?;
    if res.matched_count == 0 {
        return Ok(None);
    }
    warn!(
        "Pruned {} appointment(s) of finished orders from machine {}",
        stale.len(),
        machine.id
    );
    machine.appointments.retain(|a| !stale.contains(&a.order_id));
    machine.version += 1;
    Ok(Some(machine))
}

/// Adds `appointment` to the machine unless it collides with an existing one.
///
/// The write is conditional on the version read, so two customers racing
/// for the same slot cannot both succeed.
pub async fn book_machine(
    data: &AppState,
    shop_id: &str,
    machine_id: &str,
    admin_id: &str,
    appointment: &Appointment,
) -> Result<(), ApiError> {
    let machine = with_booking_retries(machine_id, |_| async move {
        let mut machine = load_machine(data, shop_id, machine_id).await?;
        if machine.conflicting(&appointment.slot).is_some() {
            match prune_finished_appointments(data, machine).await? {
                Some(pruned) => machine = pruned,
                None => return Ok(None),
            }
        }
        machine.can_book(&appointment.slot)?;

        let res = data
            .mongodb
            .machines()
            .update_one(booking_filter(machine_id, machine.version), booking_update(appointment)?)
            .await?;
        if res.matched_count == 0 {
            return Ok(None);
        }
        machine.appointments.push(appointment.clone());
        machine.version += 1;
        Ok(Some(machine))
    })
    .await?;

    info!(
        "Machine {} booked for order {} ({} - {})",
        machine_id, appointment.order_id, appointment.slot.start, appointment.slot.end
    );
    push_machine_update(data, admin_id, Some(&appointment.customer_id), &machine);
    Ok(())
}

/// Drops the order's appointment and frees the machine if that customer
/// was using it.
pub async fn release_machine(
    data: &AppState,
    machine_id: &str,
    admin_id: &str,
    order_id: &str,
    customer_id: &str,
) -> Result<(), ApiError> {
    let machines = data.mongodb.machines();
    machines
        .update_one(
            doc! { "_id": machine_id },
            doc! {
                "$pull": { "appointments": { "order_id": order_id } },
                "$inc": { "version": 1 },
            },
        )
        .await?;
    machines
        .update_one(
            doc! { "_id": machine_id, "current_customer_id": customer_id },
            doc! { "$set": { "current_customer_id": null } },
        )
        .await?;
    info!("Machine {} released from order {}", machine_id, order_id);

    if let Some(machine) = machines.find_one(doc! { "_id": machine_id }).await? {
        push_machine_update(data, admin_id, Some(customer_id), &machine);
    }
    Ok(())
}

/// Records which customer is currently running the machine.
pub async fn occupy_machine(
    data: &AppState,
    machine_id: &str,
    admin_id: &str,
    customer_id: &str,
) -> Result<(), ApiError> {
    let machine = data
        .mongodb
        .machines()
        .find_one_and_update(
            doc! { "_id": machine_id },
            doc! { "$set": { "current_customer_id": customer_id }, "$inc": { "version": 1 } },
        )
        .return_document(ReturnDocument::After)
        .await?;
    if let Some(machine) = machine {
        push_machine_update(data, admin_id, Some(customer_id), &machine);
    }
    Ok(())
}

/// GET /api/shops/{shop_id}/machines
pub async fn list_machines(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let shop_id = path.into_inner();
    load_shop(&data, &shop_id).await?;

    let mut machines: Vec<Machine> = data
        .mongodb
        .machines()
        .find(doc! { "shop_id": &shop_id })
        .await?
        .try_collect()
        .await?;
    machines.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(HttpResponse::Ok().json(machines))
}

/// POST /api/shops/{shop_id}/machines
pub async fn create_machine(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreateMachineRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let shop_id = path.into_inner();
    let shop = load_owned_shop(&data, &shop_id, admin_id).await?;
    if shop.shop_type != ShopType::SelfService {
        return Err(ApiError::bad_request("Only self-service shops have machines"));
    }
    if payload.label.trim().is_empty() {
        return Err(ApiError::bad_request("Machine label is required"));
    }

    let machine = Machine {
        id: Uuid::new_v4().to_string(),
        shop_id,
        label: payload.label.trim().to_string(),
        machine_type: payload.machine_type,
        available: true,
        current_customer_id: None,
        appointments: Vec::new(),
        version: 0,
        created_at: Utc::now(),
    };
    data.mongodb.machines().insert_one(&machine).await?;
    info!("Machine {} added to shop {}", machine.id, machine.shop_id);
    Ok(HttpResponse::Created().json(machine))
}

/// PUT /api/shops/{shop_id}/machines/{machine_id}
pub async fn update_machine(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Json<UpdateMachineRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let (shop_id, machine_id) = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let mut update_doc = doc! {};
    if let Some(label) = payload.label.as_deref().map(str::trim) {
        if label.is_empty() {
            return Err(ApiError::bad_request("Machine label cannot be empty"));
        }
        update_doc.insert("label", label);
    }
    if let Some(machine_type) = payload.machine_type {
        update_doc.insert("machine_type", to_bson(&machine_type)?);
    }
    if let Some(available) = payload.available {
        update_doc.insert("available", available);
    }
    if update_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }

    let res = data
        .mongodb
        .machines()
        .update_one(
            doc! { "_id": &machine_id, "shop_id": &shop_id },
            doc! { "$set": update_doc, "$inc": { "version": 1 } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::NotFound("Machine"));
    }
    let machine = load_machine(&data, &shop_id, &machine_id).await?;
    push_machine_update(&data, admin_id, None, &machine);
    Ok(HttpResponse::Ok().json(machine))
}

/// DELETE /api/shops/{shop_id}/machines/{machine_id}
pub async fn delete_machine(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = user.require_admin()?;
    let (shop_id, machine_id) = path.into_inner();
    load_owned_shop(&data, &shop_id, admin_id).await?;

    let unbooked = doc! {
        "_id": &machine_id,
        "shop_id": &shop_id,
        "appointments": { "$size": 0 },
    };
    let machines = data.mongodb.machines();
    let mut res = machines.delete_one(unbooked.clone()).await?;
    if res.deleted_count == 0 {
        // Either missing or still booked; tell them apart for the caller.
        let machine = load_machine(&data, &shop_id, &machine_id).await?;
        match prune_finished_appointments(&data, machine).await? {
            Some(pruned) if pruned.appointments.is_empty() => {
                res = machines.delete_one(unbooked).await?;
            }
            _ => {}
        }
        if res.deleted_count == 0 {
            return Err(ApiError::conflict("Machine still has appointments"));
        }
    }
    info!("Machine {} removed from shop {}", machine_id, shop_id);
    push_machine_update(
        &data,
        admin_id,
        None,
        &serde_json::json!({ "_id": machine_id, "shop_id": shop_id, "deleted": true }),
    );
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Slot;
    use chrono::{Duration, TimeZone};

    fn appointment(order_id: &str, hour: u32) -> Appointment {
        let start = Utc.with_ymd_and_hms(2030, 5, 4, hour, 0, 0).unwrap();
        Appointment {
            order_id: order_id.into(),
            customer_id: "cust-1".into(),
            slot: Slot { start, end: start + Duration::hours(1) },
        }
    }

    fn machine(appointments: Vec<Appointment>) -> Machine {
        Machine {
            id: "m1".into(),
            shop_id: "shop-1".into(),
            label: "Washer 1".into(),
            machine_type: MachineType::Washer,
            available: true,
            current_customer_id: None,
            appointments,
            version: 3,
            created_at: Utc.with_ymd_and_hms(2030, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn booking_write_is_conditional_on_version() {
        assert_eq!(booking_filter("m1", 3), doc! { "_id": "m1", "version": 3_i64 });

        let update = booking_update(&appointment("order-1", 9)).unwrap();
        let pushed = update.get_document("$push").unwrap().get_document("appointments").unwrap();
        assert_eq!(pushed.get_str("order_id").unwrap(), "order-1");
        assert!(pushed.contains_key("start"));
        assert_eq!(update.get_document("$inc").unwrap().get_i32("version").unwrap(), 1);
    }

    #[actix::test]
    async fn booking_gives_up_after_repeated_races() {
        let mut calls = 0;
        let res: Result<(), ApiError> = with_booking_retries("m1", |_| {
            calls += 1;
            async { Ok(None) }
        })
        .await;
        assert!(matches!(res, Err(ApiError::Conflict(_))));
        assert_eq!(calls, BOOKING_ATTEMPTS);
    }

    #[actix::test]
    async fn booking_succeeds_once_a_write_lands() {
        let res = with_booking_retries("m1", |n| async move {
            Ok(if n == 2 { Some(n) } else { None })
        })
        .await;
        assert_eq!(res.unwrap(), 2);
    }

    #[actix::test]
    async fn booking_stops_on_a_real_collision() {
        let mut calls = 0;
        let res: Result<(), ApiError> = with_booking_retries("m1", |_| {
            calls += 1;
            async { Err(ApiError::conflict("Machine is already booked")) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn machine_changes_reach_admin_and_booking_customer() {
        assert_eq!(
            machine_update_channels("admin-1", Some("cust-1")),
            vec!["admin-admin-1".to_string(), "customer-cust-1".to_string()]
        );
        assert_eq!(machine_update_channels("admin-1", None), vec!["admin-admin-1".to_string()]);
    }

    #[test]
    fn appointments_of_finished_orders_are_found() {
        let m = machine(vec![appointment("done", 9), appointment("live", 11)]);
        let finished: HashSet<String> = ["done".to_string()].into_iter().collect();
        assert_eq!(finished_appointments(&m, &finished), vec!["done".to_string()]);
        assert!(finished_appointments(&m, &HashSet::new()).is_empty());
    }
}
