//! JWT-derived identity projection.
//!
//! Unlike a conventional auth-gate, this middleware never rejects a request
//! itself — the gateway does not terminate end-user authentication (§4.4);
//! it only recognizes an already-issued token and projects it into an
//! [`AuthContext`] for the forward engine to enforce `route.auth_required`
//! against and to sign onward. A missing or invalid token simply leaves the
//! request unauthenticated; routes that don't require auth are unaffected.
//!
//! Built as a `Transform`/`Service` pair generalized from "reject on
//! failure" to "project best-effort, let the policy layer decide".

use crate::middleware::identity::AuthContext;
use crate::models::settings::JwtSettings;
use actix_web::{
    body::MessageBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use serde::Deserialize;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

/// Constructs the `AuthTransform` from the gateway's resolved JWT settings.
/// Absent settings means the middleware projects nothing and is effectively
/// a no-op pass-through (every request stays unauthenticated).
#[derive(Clone)]
pub struct AuthTransform {
    settings: Option<Arc<JwtSettings>>,
}

impl AuthTransform {
    pub fn new(settings: Option<Arc<JwtSettings>>) -> Self {
        Self { settings }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthTransform
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service: Rc::new(service),
            settings: self.settings.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
    settings: Option<Arc<JwtSettings>>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let settings = self.settings.clone();

        Box::pin(async move {
            let ctx = settings
                .as_deref()
                .and_then(|settings| extract_token(&req).map(|token| (token, settings)))
                .and_then(|(token, settings)| match validate(&token, settings) {
                    Ok(claims) => {
                        debug!("jwt projected identity for user {}", claims.sub);
                        Some(AuthContext {
                            authenticated: true,
                            user_id: Some(claims.sub),
                            user_role: claims
                                .role
                                .or_else(|| claims.roles.and_then(|r| r.into_iter().next())),
                        })
                    }
                    Err(e) => {
                        warn!("jwt validation failed, continuing unauthenticated: {e}");
                        None
                    }
                })
                .unwrap_or_default();

            req.extensions_mut().insert(ctx);
            service.call(req).await
        })
    }
}

fn extract_token(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get("Authorization")?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn validate(token: &str, settings: &JwtSettings) -> Result<Claims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    if let Some(issuer) = &settings.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(audience) = &settings.audience {
        validation.set_audience(&[audience]);
    }
    let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());
    let data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| e.to_string())?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[derive(serde::Serialize)]
    struct TestClaims {
        sub: String,
        role: String,
        exp: usize,
    }

    async fn reflect_identity(req: actix_web::HttpRequest) -> HttpResponse {
        let ctx = req.extensions().get::<AuthContext>().cloned().unwrap_or_default();
        HttpResponse::Ok().json(serde_json::json!({
            "authenticated": ctx.authenticated,
            "user_id": ctx.user_id,
        }))
    }

    fn jwt_settings() -> Arc<JwtSettings> {
        Arc::new(JwtSettings {
            secret: "test-secret".to_string(),
            issuer: None,
            audience: None,
            required_claims: vec![],
        })
    }

    #[actix_web::test]
    async fn missing_token_stays_unauthenticated() {
        let app = test::init_service(
            App::new()
                .wrap(AuthTransform::new(Some(jwt_settings())))
                .route("/whoami", web::get().to(reflect_identity)),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["authenticated"], false);
    }

    #[actix_web::test]
    async fn valid_token_projects_identity() {
        let settings = jwt_settings();
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = TestClaims {
            sub: "user-1".to_string(),
            role: "admin".to_string(),
            exp: now + 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(settings.secret.as_bytes()),
        )
        .unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthTransform::new(Some(settings)))
                .route("/whoami", web::get().to(reflect_identity)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["user_id"], "user-1");
    }

    #[actix_web::test]
    async fn invalid_token_falls_back_to_unauthenticated() {
        let app = test::init_service(
            App::new()
                .wrap(AuthTransform::new(Some(jwt_settings())))
                .route("/whoami", web::get().to(reflect_identity)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", "Bearer not-a-real-token"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["authenticated"], false);
    }
}
