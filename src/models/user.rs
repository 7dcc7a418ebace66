use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the marketplace an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

/// A customer account, stored in `customers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub hashed_password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A shop-owner account, stored in `admins`. Shops reference it via `admin_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}

/// Account data safe to return to clients.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Customer> for Profile {
    fn from(c: Customer) -> Self {
        Self {
            id: c.id,
            role: Role::Customer,
            name: c.name,
            email: c.email,
            phone: c.phone,
            address: c.address,
            created_at: c.created_at,
        }
    }
}

impl From<Admin> for Profile {
    fn from(a: Admin) -> Self {
        Self {
            id: a.id,
            role: Role::Admin,
            name: a.name,
            email: a.email,
            phone: None,
            address: None,
            created_at: a.created_at,
        }
    }
}
