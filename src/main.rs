// src/main.rs

use std::io;
use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info};

use laundry_hub::accounts::{
    get_admin_profile, get_admin_shops, get_customer_profile, update_customer_profile,
};
use laundry_hub::analytics::shop_analytics;
use laundry_hub::app_state::AppState;
use laundry_hub::auth::{admin_login, admin_signup, customer_login, customer_signup, Authentication};
use laundry_hub::config::Config;
use laundry_hub::db::MongoDB;
use laundry_hub::feedback::{add_feedback, edit_feedback};
use laundry_hub::machines::{create_machine, delete_machine, list_machines, update_machine};
use laundry_hub::messages::{list_messages, send_message};
use laundry_hub::notification_hub::NotificationHub;
use laundry_hub::notifications::{list_notifications, mark_all_read, mark_read, unread_count};
use laundry_hub::orders::{
    cancel_order, create_order, get_order, list_orders, update_order_details, update_order_status,
};
use laundry_hub::payments::{review_payment, submit_payment};
use laundry_hub::shops::{
    add_payment_method, add_service, create_shop, delete_shop, get_shop, list_shops,
    remove_payment_method, remove_service, shop_feedback, shop_orders, update_shop,
};
use laundry_hub::web_socket_server::ws_index;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;
    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .map_err(|e| {
            error!("Failed to connect to MongoDB: {}", e);
            io::Error::new(io::ErrorKind::Other, e)
        })?;
    mongodb.ensure_indexes().await.map_err(|e| {
        error!("Failed to create indexes: {}", e);
        io::Error::new(io::ErrorKind::Other, e)
    })?;
    let mongodb = Arc::new(mongodb);

    let hub = NotificationHub::new(config.event_backlog).start();

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let bind_addr = config.bind_addr.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication::new(config.jwt_secret.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(AppState {
                hub: hub.clone(),
                mongodb: mongodb.clone(),
                config: config.clone(),
            }))
            .service(
                web::scope("/api")
                    // AUTH
                    .service(
                        web::scope("/auth")
                            .route("/customers/signup", web::post().to(customer_signup))
                            .route("/customers/login", web::post().to(customer_login))
                            .route("/admins/signup", web::post().to(admin_signup))
                            .route("/admins/login", web::post().to(admin_login)),
                    )
                    // ACCOUNTS
                    .service(
                        web::scope("/customers")
                            .route("/me", web::get().to(get_customer_profile))
                            .route("/me", web::put().to(update_customer_profile)),
                    )
                    .service(
                        web::scope("/admin")
                            .route("/me", web::get().to(get_admin_profile))
                            .route("/shops", web::get().to(get_admin_shops)),
                    )
                    // SHOPS
                    .service(
                        web::scope("/shops")
                            .route("", web::get().to(list_shops))
                            .route("", web::post().to(create_shop))
                            .service(
                                web::scope("/{shop_id}")
                                    .route("", web::get().to(get_shop))
                                    .route("", web::put().to(update_shop))
                                    .route("", web::delete().to(delete_shop))
                                    .route("/services", web::post().to(add_service))
                                    .route("/services/{service_id}", web::delete().to(remove_service))
                                    .route("/payment-methods", web::post().to(add_payment_method))
                                    .route(
                                        "/payment-methods/{method_id}",
                                        web::delete().to(remove_payment_method),
                                    )
                                    .route("/machines", web::get().to(list_machines))
                                    .route("/machines", web::post().to(create_machine))
                                    .route("/machines/{machine_id}", web::put().to(update_machine))
                                    .route("/machines/{machine_id}", web::delete().to(delete_machine))
                                    .route("/orders", web::get().to(shop_orders))
                                    .route("/feedback", web::get().to(shop_feedback))
                                    .route("/analytics", web::get().to(shop_analytics)),
                            ),
                    )
                    // ORDERS, PAYMENTS, FEEDBACK
                    .service(
                        web::scope("/orders")
                            .route("", web::post().to(create_order))
                            .route("", web::get().to(list_orders))
                            .route("/{order_id}", web::get().to(get_order))
                            .route("/{order_id}/status", web::patch().to(update_order_status))
                            .route("/{order_id}/details", web::patch().to(update_order_details))
                            .route("/{order_id}/cancel", web::post().to(cancel_order))
                            .route("/{order_id}/payment", web::post().to(submit_payment))
                            .route("/{order_id}/payment/status", web::patch().to(review_payment))
                            .route("/{order_id}/feedback", web::post().to(add_feedback))
                            .route("/{order_id}/feedback", web::put().to(edit_feedback)),
                    )
                    // NOTIFICATIONS
                    .service(
                        web::scope("/notifications")
                            .route("", web::get().to(list_notifications))
                            .route("/unread-count", web::get().to(unread_count))
                            .route("/read-all", web::patch().to(mark_all_read))
                            .route("/{notification_id}/read", web::patch().to(mark_read)),
                    )
                    // MESSAGES
                    .service(
                        web::scope("/messages")
                            .route("", web::post().to(send_message))
                            .route("", web::get().to(list_messages)),
                    ),
            )
            // WEBSOCKET route for real-time
            .service(web::resource("/ws").route(web::get().to(ws_index)))
    })
    .bind(bind_addr)?
    .run()
    .await
}
