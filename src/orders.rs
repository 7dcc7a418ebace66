// src/orders.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::{debug, info, warn};
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::machines::{book_machine, occupy_machine, release_machine};
use crate::models::{
    check_transition, price_order, validate_weight, Appointment, Order, OrderStatus, OrderType,
    PaymentStatus, Role, Shop, Slot, Transition,
};
use crate::notification_hub::EventKind;
use crate::notifications::notify_order;
use crate::shops::load_shop;

/* -------------------------------------------------------------------------- */
/* Payloads                                                                   */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub shop_id: String,
    #[serde(default)]
    pub service_ids: Vec<String>,
    pub total_weight: Option<f64>,
    pub notes: Option<String>,
    /// pickup-delivery only
    pub pickup_address: Option<String>,
    pub pickup_date: Option<DateTime<Utc>>,
    /// self-service only
    pub machine_id: Option<String>,
    pub slot: Option<Slot>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    /// When set, the update is refused unless the order is still at this version.
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDetailsRequest {
    pub total_weight: f64,
    pub notes: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<OrderStatus>,
}

/* -------------------------------------------------------------------------- */
/* Pure helpers                                                               */
/* -------------------------------------------------------------------------- */

/// Validates a new order request against the shop and builds the order.
pub fn build_order(
    shop: &Shop,
    customer_id: &str,
    req: CreateOrderRequest,
    now: DateTime<Utc>,
) -> Result<Order, ApiError> {
    if shop.closing {
        return Err(ApiError::conflict("Shop is closing and no longer takes orders"));
    }
    let order_type = shop.shop_type.order_type();

    let services = req
        .service_ids
        .iter()
        .map(|id| {
            shop.service(id)
                .cloned()
                .ok_or_else(|| ApiError::bad_request(format!("Shop does not offer service '{}'", id)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let total_weight = req.total_weight.unwrap_or(0.0);
    validate_weight(total_weight)?;

    let (machine_id, appointment, pickup_address, pickup_date) = match order_type {
        OrderType::PickupDelivery => {
            if services.is_empty() {
                return Err(ApiError::bad_request("Select at least one service"));
            }
            let address = req
                .pickup_address
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .ok_or_else(|| ApiError::bad_request("Pickup address is required"))?;
            if let Some(date) = req.pickup_date {
                if date < now {
                    return Err(ApiError::bad_request("Pickup date must be in the future"));
                }
            }
            (None, None, Some(address), req.pickup_date)
        }
        OrderType::SelfService => {
            let machine_id = req
                .machine_id
                .ok_or_else(|| ApiError::bad_request("Select a machine"))?;
            let slot = req
                .slot
                .ok_or_else(|| ApiError::bad_request("Select a time slot"))?;
            slot.validate(now)?;
            (Some(machine_id), Some(slot), None, None)
        }
    };

    Ok(Order {
        id: Uuid::new_v4().to_string(),
        customer_id: customer_id.to_string(),
        shop_id: shop.id.clone(),
        admin_id: shop.admin_id.clone(),
        order_type,
        order_status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        total_price: price_order(&services, total_weight),
        services,
        total_weight,
        machine_id,
        appointment,
        pickup_address,
        pickup_date,
        notes: req.notes,
        payment: None,
        version: 1,
        created_at: now,
        updated_at: now,
    })
}

/// `$set` fields for moving `order` to `target`. A cancelled order's
/// unsettled payment is cancelled with it.
pub fn status_update_doc(
    order: &Order,
    target: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Document, ApiError> {
    let mut set = doc! {
        "order_status": target.as_str(),
        "updated_at": to_bson(&now)?,
    };
    if target == OrderStatus::Cancelled && order.payment_status != PaymentStatus::Paid {
        set.insert("payment_status", PaymentStatus::Cancelled.as_str());
    }
    Ok(set)
}

/// Weight and price may change only while no payment is settled or awaiting
/// review, so a submitted proof always refers to the current total.
pub fn check_details_editable(order: &Order) -> Result<(), ApiError> {
    if order.order_status.is_terminal() {
        return Err(ApiError::conflict(format!(
            "Order is already '{}'",
            order.order_status
        )));
    }
    match order.payment_status {
        PaymentStatus::Paid => Err(ApiError::conflict("Order has already been paid")),
        PaymentStatus::ForReview => Err(ApiError::conflict(
            "A payment proof is under review; settle it before changing the total",
        )),
        _ => Ok(()),
    }
}

/// Matches the order only at the version it was read.
pub fn versioned_filter(order_id: &str, version: i64) -> Document {
    doc! { "_id": order_id, "version": version }
}

pub fn versioned_update(set: Document) -> Document {
    doc! { "$set": set, "$inc": { "version": 1 } }
}

pub fn stale_write(order_id: &str, read: i64, stored: i64) -> ApiError {
    warn!(
        "Stale write on order {} (read version {}, stored {})",
        order_id, read, stored
    );
    ApiError::conflict(format!(
        "Order was modified concurrently (now at version {})",
        stored
    ))
}

pub fn check_expected_version(order: &Order, expected: Option<i64>) -> Result<(), ApiError> {
    match expected {
        Some(v) if v != order.version => Err(ApiError::conflict(format!(
            "Order was modified (version {} is now {})",
            v, order.version
        ))),
        _ => Ok(()),
    }
}

pub fn can_view(order: &Order, user: &AuthUser) -> bool {
    match user.role {
        Role::Customer => order.customer_id == user.id,
        Role::Admin => order.admin_id == user.id,
    }
}

/* -------------------------------------------------------------------------- */
/* Storage                                                                    */
/* -------------------------------------------------------------------------- */

pub async fn load_order(data: &AppState, order_id: &str) -> Result<Order, ApiError> {
    data.mongodb
        .orders()
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or(ApiError::NotFound("Order"))
}

pub async fn load_visible_order(
    data: &AppState,
    order_id: &str,
    user: &AuthUser,
) -> Result<Order, ApiError> {
    let order = load_order(data, order_id).await?;
    if !can_view(&order, user) {
        // Do not reveal other people's orders.
        return Err(ApiError::NotFound("Order"));
    }
    Ok(order)
}

/// Applies `set` to the order only if nobody changed it since `order` was
/// read, and returns the stored result.
pub async fn commit_order_update(
    data: &AppState,
    order: &Order,
    set: Document,
) -> Result<Order, ApiError> {
    let updated = data
        .mongodb
        .orders()
        .find_one_and_update(versioned_filter(&order.id, order.version), versioned_update(set))
        .return_document(ReturnDocument::After)
        .await?;

    match updated {
        Some(order) => Ok(order),
        None => {
            // Distinguish a deleted order from a concurrent write.
            let current = load_order(data, &order.id).await?;
            Err(stale_write(&order.id, order.version, current.version))
        }
    }
}

/// Validates and commits a status change, then runs its side effects.
pub async fn apply_status(
    data: &AppState,
    order: Order,
    target: OrderStatus,
) -> Result<(Order, Transition), ApiError> {
    let transition = check_transition(order.order_type, order.order_status, target)?;
    if transition == Transition::Unchanged {
        debug!("Order {} already '{}'", order.id, target);
        return Ok((order, transition));
    }

    let set = status_update_doc(&order, target, Utc::now())?;
    let updated = commit_order_update(data, &order, set).await?;
    info!(
        "Order {} moved '{}' -> '{}' (v{})",
        updated.id, order.order_status, updated.order_status, updated.version
    );

    if let Some(machine_id) = &updated.machine_id {
        let machine_result = match target {
            OrderStatus::InProgress => {
                occupy_machine(data, machine_id, &updated.admin_id, &updated.customer_id).await
            }
            OrderStatus::Completed | OrderStatus::Cancelled => {
                release_machine(data, machine_id, &updated.admin_id, &updated.id, &updated.customer_id)
                    .await
            }
            _ => Ok(()),
        };
        if let Err(e) = machine_result {
            // A leftover appointment is pruned by the next booking or delete on the machine.
            warn!("Order {} committed but machine {} not updated: {}", updated.id, machine_id, e);
        }
    }

    Ok((updated, transition))
}

/* -------------------------------------------------------------------------- */
/* Handlers                                                                   */
/* -------------------------------------------------------------------------- */

/// POST /api/orders
pub async fn create_order(
    user: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ApiError> {
    let customer_id = user.require_customer()?;
    let shop = load_shop(&data, &payload.shop_id).await?;
    let order = build_order(&shop, customer_id, payload.into_inner(), Utc::now())?;

    if let (Some(machine_id), Some(slot)) = (&order.machine_id, order.appointment) {
        let appointment = Appointment {
            order_id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            slot,
        };
        book_machine(&data, &order.shop_id, machine_id, &order.admin_id, &appointment).await?;
    }

    if let Err(e) = data.mongodb.orders().insert_one(&order).await {
        if let Some(machine_id) = &order.machine_id {
            if let Err(release_err) =
                release_machine(&data, machine_id, &order.admin_id, &order.id, &order.customer_id).await
            {
                warn!("Could not undo booking for failed order {}: {}", order.id, release_err);
            }
        }
        return Err(e.into());
    }
    info!("Order {} placed by {} at shop {}", order.id, customer_id, order.shop_id);

    notify_order(&data, &order, EventKind::NewOrder, &format!("New order at {}", shop.name)).await;
    Ok(HttpResponse::Created().json(order))
}

/// GET /api/orders
///
/// Customers see their own orders, admins the orders of all their shops.
pub async fn list_orders(
    user: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<OrdersQuery>,
) -> Result<HttpResponse, ApiError> {
    let mut filter = match user.role {
        Role::Customer => doc! { "customer_id": &user.id },
        Role::Admin => doc! { "admin_id": &user.id },
    };
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

/// GET /api/orders/{order_id}
pub async fn get_order(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// PATCH /api/orders/{order_id}/status
pub async fn update_order_status(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    check_expected_version(&order, payload.expected_version)?;

    let (order, transition) = apply_status(&data, order, payload.status).await?;
    if transition == Transition::Advance {
        notify_order(
            &data,
            &order,
            EventKind::UpdateOrderStatus,
            &format!("Order is now '{}'", order.order_status),
        )
        .await;
    }
    Ok(HttpResponse::Ok().json(order))
}

/// PATCH /api/orders/{order_id}/details
///
/// Records the measured weight; the price is recomputed from the order's services.
pub async fn update_order_details(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateDetailsRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    check_expected_version(&order, payload.expected_version)?;
    check_details_editable(&order)?;
    validate_weight(payload.total_weight)?;

    let total_price = price_order(&order.services, payload.total_weight);
    let mut set = doc! {
        "total_weight": payload.total_weight,
        "total_price": total_price,
        "updated_at": to_bson(&Utc::now())?,
    };
    if let Some(notes) = &payload.notes {
        set.insert("notes", notes);
    }

    let order = commit_order_update(&data, &order, set).await?;
    notify_order(
        &data,
        &order,
        EventKind::OrderUpdate,
        &format!("Order total is now {:.2}", order.total_price),
    )
    .await;
    Ok(HttpResponse::Ok().json(order))
}

/// POST /api/orders/{order_id}/cancel
///
/// Customers may cancel only while the order is pending; shop admins until
/// it completes.
pub async fn cancel_order(
    user: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let order = load_visible_order(&data, &path.into_inner(), &user).await?;
    if user.role == Role::Customer
        && !matches!(order.order_status, OrderStatus::Pending | OrderStatus::Cancelled)
    {
        return Err(ApiError::conflict(format!(
            "Order is already '{}'; contact the shop to cancel",
            order.order_status
        )));
    }

    let (order, transition) = apply_status(&data, order, OrderStatus::Cancelled).await?;
    if transition == Transition::Advance {
        let by = match user.role {
            Role::Customer => "customer",
            Role::Admin => "shop",
        };
        notify_order(
            &data,
            &order,
            EventKind::UpdateOrderStatus,
            &format!("Order cancelled by the {}", by),
        )
        .await;
    }
    Ok(HttpResponse::Ok().json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::pickup_order;
    use crate::models::{PriceUnit, Service, ShopType};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).unwrap()
    }

    fn shop(shop_type: ShopType) -> Shop {
        Shop {
            id: "shop-1".into(),
            admin_id: "admin-1".into(),
            name: "Suds".into(),
            shop_type,
            address: "Main St".into(),
            description: None,
            services: vec![Service {
                service_id: "wash".into(),
                name: "Wash".into(),
                description: None,
                price: 40.0,
                unit: PriceUnit::PerKg,
            }],
            payment_methods: vec![],
            opening_hours: vec![],
            closing: false,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            shop_id: "shop-1".into(),
            service_ids: vec!["wash".into()],
            total_weight: Some(2.5),
            notes: None,
            pickup_address: Some(" 4 Rizal Ave ".into()),
            pickup_date: None,
            machine_id: None,
            slot: None,
        }
    }

    #[test]
    fn pickup_order_is_priced_and_pending() {
        let order = build_order(&shop(ShopType::PickupDelivery), "cust-1", request(), now()).unwrap();
        assert_eq!(order.order_type, OrderType::PickupDelivery);
        assert_eq!(order.order_status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.total_price, 100.0);
        assert_eq!(order.pickup_address.as_deref(), Some("4 Rizal Ave"));
        assert_eq!(order.admin_id, "admin-1");
        assert_eq!(order.version, 1);
    }

    #[test]
    fn closing_shop_takes_no_orders() {
        let mut s = shop(ShopType::PickupDelivery);
        s.closing = true;
        assert!(matches!(
            build_order(&s, "cust-1", request(), now()),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn unknown_service_is_rejected() {
        let mut req = request();
        req.service_ids.push("starch".into());
        assert!(build_order(&shop(ShopType::PickupDelivery), "cust-1", req, now()).is_err());
    }

    #[test]
    fn pickup_order_needs_address() {
        let mut req = request();
        req.pickup_address = Some("   ".into());
        assert!(build_order(&shop(ShopType::PickupDelivery), "cust-1", req, now()).is_err());
    }

    #[test]
    fn self_service_order_needs_machine_and_future_slot() {
        let s = shop(ShopType::SelfService);
        let mut req = request();
        req.pickup_address = None;
        assert!(build_order(&s, "cust-1", request(), now()).is_err());

        req.machine_id = Some("m1".into());
        req.slot = Some(Slot {
            start: now() - Duration::hours(1),
            end: now(),
        });
        assert!(build_order(&s, "cust-1", req, now()).is_err());

        let mut req = request();
        req.machine_id = Some("m1".into());
        req.slot = Some(Slot {
            start: now() + Duration::hours(1),
            end: now() + Duration::hours(2),
        });
        let order = build_order(&s, "cust-1", req, now()).unwrap();
        assert_eq!(order.order_type, OrderType::SelfService);
        assert_eq!(order.machine_id.as_deref(), Some("m1"));
        assert!(order.pickup_address.is_none());
    }

    #[test]
    fn cancelling_unpaid_order_cancels_payment() {
        let order = pickup_order(OrderStatus::Sorting, PaymentStatus::ForReview);
        let set = status_update_doc(&order, OrderStatus::Cancelled, now()).unwrap();
        assert_eq!(set.get_str("order_status").unwrap(), "cancelled");
        assert_eq!(set.get_str("payment_status").unwrap(), "cancelled");
    }

    #[test]
    fn cancelling_paid_order_keeps_payment() {
        let order = pickup_order(OrderStatus::Sorting, PaymentStatus::Paid);
        let set = status_update_doc(&order, OrderStatus::Cancelled, now()).unwrap();
        assert!(set.get("payment_status").is_none());
    }

    #[test]
    fn expected_version_guards_stale_clients() {
        let order = pickup_order(OrderStatus::Pending, PaymentStatus::Pending);
        assert!(check_expected_version(&order, None).is_ok());
        assert!(check_expected_version(&order, Some(1)).is_ok());
        assert!(matches!(
            check_expected_version(&order, Some(0)),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn total_is_frozen_while_payment_is_reviewed_or_settled() {
        let open = pickup_order(OrderStatus::Washing, PaymentStatus::Pending);
        assert!(check_details_editable(&open).is_ok());
        let failed = pickup_order(OrderStatus::Washing, PaymentStatus::Failed);
        assert!(check_details_editable(&failed).is_ok());

        for payment in [PaymentStatus::ForReview, PaymentStatus::Paid] {
            let order = pickup_order(OrderStatus::Washing, payment);
            assert!(matches!(check_details_editable(&order), Err(ApiError::Conflict(_))));
        }
        let done = pickup_order(OrderStatus::Completed, PaymentStatus::Pending);
        assert!(matches!(check_details_editable(&done), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn order_writes_are_conditional_on_version() {
        let filter = versioned_filter("order-1", 4);
        assert_eq!(filter, doc! { "_id": "order-1", "version": 4_i64 });

        let update = versioned_update(doc! { "order_status": "washing" });
        assert_eq!(
            update.get_document("$set").unwrap().get_str("order_status").unwrap(),
            "washing"
        );
        assert_eq!(update.get_document("$inc").unwrap().get_i32("version").unwrap(), 1);
    }

    #[test]
    fn lost_race_is_a_conflict() {
        let err = stale_write("order-1", 4, 5);
        assert!(matches!(&err, ApiError::Conflict(msg) if msg.contains("version 5")));
    }

    #[test]
    fn visibility_is_limited_to_parties() {
        let order = pickup_order(OrderStatus::Pending, PaymentStatus::Pending);
        let customer = AuthUser { id: "cust-1".into(), role: Role::Customer };
        let admin = AuthUser { id: "admin-1".into(), role: Role::Admin };
        let stranger = AuthUser { id: "admin-2".into(), role: Role::Admin };
        assert!(can_view(&order, &customer));
        assert!(can_view(&order, &admin));
        assert!(!can_view(&order, &stranger));
    }
}
