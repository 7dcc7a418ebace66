// src/auth.rs

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::OnceLock;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures::future::{ok, ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{is_duplicate_key, ApiError};
use crate::models::{Admin, Customer, Profile, Role};

const TOKEN_TTL_HOURS: i64 = 24;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// The caller, as established by a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<&str, ApiError> {
        match self.role {
            Role::Admin => Ok(&self.id),
            Role::Customer => Err(ApiError::forbidden("Admin account required")),
        }
    }

    pub fn require_customer(&self) -> Result<&str, ApiError> {
        match self.role {
            Role::Customer => Ok(&self.id),
            Role::Admin => Err(ApiError::forbidden("Customer account required")),
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string())),
        )
    }
}

pub fn create_jwt(user_id: &str, role: Role, secret: &str) -> Result<String, ApiError> {
    let expiration = Utc::now() + Duration::hours(TOKEN_TTL_HOURS);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(AuthUser {
        id: token_data.claims.sub,
        role: token_data.claims.role,
    })
}

/// Decodes `Authorization: Bearer <token>` into an [`AuthUser`] request
/// extension. Requests without the header pass through; handlers that need
/// a caller reject them through the extractor.
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Rc::new(secret.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let Some(token) = bearer {
            match verify_token(&token, &self.secret) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(e) => {
                    warn!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp: HttpResponse = e.error_response();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

/* -------------------------------------------------------------------------- */
/* Signup / login                                                             */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct SignupInfo {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginInfo {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub profile: Profile,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

pub fn validate_signup(info: &SignupInfo) -> Result<(), ApiError> {
    if info.name.trim().is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if !email_regex().is_match(info.email.trim()) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if info.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// POST /api/auth/customers/signup
pub async fn customer_signup(
    data: web::Data<AppState>,
    info: web::Json<SignupInfo>,
) -> Result<HttpResponse, ApiError> {
    let info = info.into_inner();
    validate_signup(&info)?;

    let customer = Customer {
        id: Uuid::new_v4().to_string(),
        name: info.name.trim().to_string(),
        email: normalize_email(&info.email),
        hashed_password: hash(&info.password, DEFAULT_COST)?,
        phone: info.phone,
        address: info.address,
        created_at: Utc::now(),
    };

    if let Err(e) = data.mongodb.customers().insert_one(&customer).await {
        if is_duplicate_key(&e) {
            return Err(ApiError::conflict("Email is already registered"));
        }
        return Err(e.into());
    }
    info!("Customer registered: {}", customer.id);

    let token = create_jwt(&customer.id, Role::Customer, &data.config.jwt_secret)?;
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        profile: customer.into(),
    }))
}

/// POST /api/auth/customers/login
pub async fn customer_login(
    data: web::Data<AppState>,
    info: web::Json<LoginInfo>,
) -> Result<HttpResponse, ApiError> {
    let customer = data
        .mongodb
        .customers()
        .find_one(doc! { "email": normalize_email(&info.email) })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify(&info.password, &customer.hashed_password).unwrap_or(false) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = create_jwt(&customer.id, Role::Customer, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        profile: customer.into(),
    }))
}

/// POST /api/auth/admins/signup
pub async fn admin_signup(
    data: web::Data<AppState>,
    info: web::Json<SignupInfo>,
) -> Result<HttpResponse, ApiError> {
    let info = info.into_inner();
    validate_signup(&info)?;

    let admin = Admin {
        id: Uuid::new_v4().to_string(),
        name: info.name.trim().to_string(),
        email: normalize_email(&info.email),
        hashed_password: hash(&info.password, DEFAULT_COST)?,
        created_at: Utc::now(),
    };

    if let Err(e) = data.mongodb.admins().insert_one(&admin).await {
        if is_duplicate_key(&e) {
            return Err(ApiError::conflict("Email is already registered"));
        }
        return Err(e.into());
    }
    info!("Admin registered: {}", admin.id);

    let token = create_jwt(&admin.id, Role::Admin, &data.config.jwt_secret)?;
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        profile: admin.into(),
    }))
}

/// POST /api/auth/admins/login
pub async fn admin_login(
    data: web::Data<AppState>,
    info: web::Json<LoginInfo>,
) -> Result<HttpResponse, ApiError> {
    let admin = data
        .mongodb
        .admins()
        .find_one(doc! { "email": normalize_email(&info.email) })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify(&info.password, &admin.hashed_password).unwrap_or(false) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = create_jwt(&admin.id, Role::Admin, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        profile: admin.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{call_and_read_body, call_service, init_service, TestRequest};
    use actix_web::App;

    const SECRET: &str = "test-secret";

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().body(format!("{}:{}", user.role.as_str(), user.id))
    }

    #[test]
    fn token_round_trips_role() {
        let token = create_jwt("admin-7", Role::Admin, SECRET).unwrap();
        let user = verify_token(&token, SECRET).unwrap();
        assert_eq!(user.id, "admin-7");
        assert_eq!(user.role, Role::Admin);
        assert!(user.require_admin().is_ok());
        assert!(user.require_customer().is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_jwt("c1", Role::Customer, "another").unwrap();
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn signup_validation() {
        let mut info = SignupInfo {
            name: "Rosa".into(),
            email: "rosa@example.com".into(),
            password: "longenough".into(),
            phone: None,
            address: None,
        };
        assert!(validate_signup(&info).is_ok());
        info.email = "not-an-email".into();
        assert!(validate_signup(&info).is_err());
        info.email = "rosa@example.com".into();
        info.password = "short".into();
        assert!(validate_signup(&info).is_err());
    }

    #[actix_web::test]
    async fn middleware_attaches_caller() {
        let app = init_service(
            App::new()
                .wrap(Authentication::new(SECRET))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let token = create_jwt("cust-1", Role::Customer, SECRET).unwrap();
        let req = TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let body = call_and_read_body(&app, req).await;
        assert_eq!(body, "customer:cust-1");
    }

    #[actix_web::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let app = init_service(
            App::new()
                .wrap(Authentication::new(SECRET))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let resp = call_service(&app, TestRequest::get().uri("/me").to_request()).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);

        let req = TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, "Bearer garbage"))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
    }
}
