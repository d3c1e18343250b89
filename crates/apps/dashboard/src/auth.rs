//! Password gate for the two audiences of the dashboard.
//!
//! Clients send `Authorization: Bearer <password>`. The admin password also
//! opens the visitor routes; without a visitor password those are public.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Visitor,
    Admin,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub admin_password: Option<String>,
    pub visitor_password: Option<String>,
}

impl AuthConfig {
    /// Highest role `token` grants, if any.
    pub fn role_for(&self, token: Option<&str>) -> Option<Role> {
        let accepts = |password: &Option<String>| {
            matches!((password, token), (Some(p), Some(t)) if p == t)
        };
        if accepts(&self.admin_password) {
            Some(Role::Admin)
        } else if self.visitor_password.is_none() || accepts(&self.visitor_password) {
            Some(Role::Visitor)
        } else {
            None
        }
    }
}

fn bearer(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn require(role: Role, state: &AppState, request: Request, next: Next) -> Response {
    match state.auth.role_for(bearer(&request)) {
        Some(granted) if granted >= role => next.run(request).await,
        Some(_) => ApiError::forbidden("administrator password required").into_response(),
        None => ApiError::unauthorized("missing or wrong password").into_response(),
    }
}

pub async fn require_visitor(State(state): State<AppState>, request: Request, next: Next) -> Response {
    require(Role::Visitor, &state, request, next).await
}

pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    require(Role::Admin, &state, request, next).await
}
