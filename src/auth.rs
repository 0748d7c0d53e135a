use axum::extract::{FromRequestParts, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::{generate_session_token, SESSION_COOKIE};
use crate::error::ApiError;
use crate::serve::AppState;

/// In-memory teacher login sessions
pub struct TeacherSessions {
    sessions: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl TeacherSessions {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Start a session and return its token. Expired sessions are swept here
    /// so tokens that are never presented again do not pile up.
    pub fn create(&self) -> String {
        let now = Utc::now();
        self.sessions.retain(|_, expires_at| *expires_at > now);
        let token = generate_session_token();
        self.sessions.insert(token.clone(), now + self.ttl);
        token
    }

    /// Check a token, dropping it if it has expired
    pub fn is_valid(&self, token: &str) -> bool {
        let expires_at = match self.sessions.get(token) {
            Some(entry) => *entry,
            None => return false,
        };
        if Utc::now() > expires_at {
            self.sessions.remove(token);
            return false;
        }
        true
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }
}

/// Pull the session token out of the Cookie header
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
}

/// Check whether the request carries a valid teacher session
pub fn is_teacher(state: &AppState, headers: &HeaderMap) -> bool {
    session_token(headers)
        .map(|token| state.sessions.is_valid(&token))
        .unwrap_or(false)
}

/// Extractor guarding teacher-only routes
pub struct Teacher;

impl FromRequestParts<Arc<AppState>> for Teacher {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if is_teacher(state, &parts.headers) {
            Ok(Teacher)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_teacher: Option<bool>,
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(login): Json<LoginRequest>,
) -> Response {
    let username_ok = constant_time_eq(
        login.username.as_bytes(),
        state.config.teacher.username.as_bytes(),
    );
    let password_ok = constant_time_eq(
        login.password.as_bytes(),
        state.teacher_password.as_bytes(),
    );

    if !(username_ok && password_ok) {
        warn!("Rejected login attempt for user '{}'", login.username);
        return Json(LoginResponse {
            success: false,
            is_teacher: None,
        })
        .into_response();
    }

    let token = state.sessions.create();
    info!("Teacher '{}' logged in", login.username);
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        state.sessions.ttl_seconds()
    );
    (
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            success: true,
            is_teacher: Some(true),
        }),
    )
        .into_response()
}

pub async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.revoke(&token);
    }
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    (
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            success: true,
            is_teacher: None,
        }),
    )
        .into_response()
}
