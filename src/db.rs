use log::info;
use mongodb::{
    bson::doc,
    options::{ClientOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};

use crate::models::{Admin, Customer, Feedback, Machine, Message, Notification, Order, Shop};

pub const CUSTOMERS: &str = "customers";
pub const ADMINS: &str = "admins";
pub const SHOPS: &str = "shops";
pub const MACHINES: &str = "machines";
pub const ORDERS: &str = "orders";
pub const FEEDBACK: &str = "feedback";
pub const NOTIFICATIONS: &str = "notifications";
pub const MESSAGES: &str = "messages";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    /// Creates the unique indexes the handlers rely on for duplicate detection.
    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.customers()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique()).build())
            .await?;
        self.admins()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique()).build())
            .await?;
        self.feedback()
            .create_index(IndexModel::builder().keys(doc! { "order_id": 1 }).options(unique()).build())
            .await?;
        self.orders()
            .create_index(IndexModel::builder().keys(doc! { "shop_id": 1 }).build())
            .await?;
        self.orders()
            .create_index(IndexModel::builder().keys(doc! { "customer_id": 1 }).build())
            .await?;
        self.notifications()
            .create_index(IndexModel::builder().keys(doc! { "channel": 1, "read": 1 }).build())
            .await?;
        self.notifications()
            .create_index(IndexModel::builder().keys(doc! { "channel": 1, "created_at": -1 }).build())
            .await?;

        info!("MongoDB indexes ensured on '{}'", self.db.name());
        Ok(())
    }

    pub fn customers(&self) -> Collection<Customer> {
        self.db.collection(CUSTOMERS)
    }

    pub fn admins(&self) -> Collection<Admin> {
        self.db.collection(ADMINS)
    }

    pub fn shops(&self) -> Collection<Shop> {
        self.db.collection(SHOPS)
    }

    pub fn machines(&self) -> Collection<Machine> {
        self.db.collection(MACHINES)
    }

    pub fn orders(&self) -> Collection<Order> {
        self.db.collection(ORDERS)
    }

    pub fn feedback(&self) -> Collection<Feedback> {
        self.db.collection(FEEDBACK)
    }

    pub fn notifications(&self) -> Collection<Notification> {
        self.db.collection(NOTIFICATIONS)
    }

    pub fn messages(&self) -> Collection<Message> {
        self.db.collection(MESSAGES)
    }
}
