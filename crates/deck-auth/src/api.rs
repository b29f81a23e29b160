//! HTTP endpoint layer.
//!
//! [`AuthApi`] has one method per endpoint and a [`AuthApi::dispatch`]
//! entry point that routes an `http::Request<String>`. It is transport
//! agnostic; a server only has to move requests and responses in and out.
//!
//! | Method | Path | Access |
//! |--------|------|--------|
//! | GET | `/auth/health` | public |
//! | POST | `/auth/start-session` | public |
//! | POST | `/auth/register` | public |
//! | POST | `/auth/login` | public |
//! | POST | `/auth/unlock` | public |
//! | GET | `/auth/whoami` | optional token |
//! | POST | `/auth/refresh` | refresh cookie |
//! | POST | `/auth/logout` | public |
//! | GET | `/auth/users` | admin |
//! | PUT | `/auth/users/{id}/roles` | admin |
//! | DELETE | `/auth/users/{id}` | admin |
//! | GET | `/admin/sessions?cursor=` | admin |
//! | POST | `/admin/sessions/{id}/roles` | admin |
//! | DELETE | `/admin/sessions/{id}` | admin |

use http::header::{CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::Instrument;

use crate::audit::{self, RequestId};
use crate::cookie::{self, CookieWriter, ACCESS_COOKIE, REFRESH_COOKIE, SESSION_COOKIE};
use crate::role::RoleSet;
use crate::service::{AuthService, IssuedSession};
use crate::{AuthError, AuthResult};

/// Request id header, read from requests and echoed on responses.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body of `/auth/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// Body of `/auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `/auth/unlock`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlockRequest {
    pub password: String,
}

/// Body of the role mutation endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<String>,
}

/// An endpoint result.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
    /// `Set-Cookie` header values.
    pub cookies: Vec<String>,
}

impl ApiResponse {
    /// 200 with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            cookies: Vec::new(),
        }
    }

    /// Error response with the error's status and public message.
    pub fn from_error(err: &AuthError) -> Self {
        match err {
            AuthError::StoreUnavailable(detail) | AuthError::Internal(detail) => {
                tracing::error!(error = %err, detail = %detail, "request failed");
            }
            _ => tracing::debug!(error = %err, "request refused"),
        }
        Self {
            status: err.status_code(),
            body: json!({ "detail": err.public_message() }),
            cookies: Vec::new(),
        }
    }

    /// Add a `Set-Cookie` value.
    pub fn with_cookie(mut self, cookie: String) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Convert into an `http` response with a JSON body.
    pub fn into_http(self) -> http::Response<String> {
        let mut builder = http::Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, "application/json");
        for cookie in &self.cookies {
            builder = builder.header(SET_COOKIE, cookie);
        }
        builder.body(self.body.to_string()).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to build response");
            let mut response = http::Response::new(
                json!({ "detail": AuthError::Internal(String::new()).public_message() })
                    .to_string(),
            );
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
    }
}

/// The auth endpoints over an [`AuthService`].
#[derive(Clone)]
pub struct AuthApi {
    service: AuthService,
    cookies: CookieWriter,
}

impl AuthApi {
    /// Create the endpoint layer; cookie attributes come from the
    /// service's configuration.
    pub fn new(service: AuthService) -> Self {
        let cookies = CookieWriter::new(service.config().cookies.clone());
        Self { service, cookies }
    }

    pub fn service(&self) -> &AuthService {
        &self.service
    }

    /// Route a request and render the response.
    pub async fn dispatch(&self, request: http::Request<String>) -> http::Response<String> {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(RequestId::from_string)
            .unwrap_or_else(RequestId::generate);
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path()
        );

        let handled = async {
            let response = self
                .route(request)
                .await
                .unwrap_or_else(|err| ApiResponse::from_error(&err));
            tracing::debug!(status = response.status.as_u16(), "request handled");
            response
        }
        .instrument(span);
        let response = audit::scope(request_id.clone(), handled).await;

        let mut response = response.into_http();
        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    async fn route(&self, request: http::Request<String>) -> AuthResult<ApiResponse> {
        let (parts, body) = request.into_parts();
        let headers = &parts.headers;
        let path = parts.uri.path().trim_matches('/');
        let segments: Vec<&str> = path.split('/').collect();

        match (&parts.method, segments.as_slice()) {
            (&Method::GET, ["auth", "health"]) => Ok(self.health()),
            (&Method::POST, ["auth", "start-session"]) => self.start_session().await,
            (&Method::POST, ["auth", "register"]) => self.register(&parse_body(&body)?).await,
            (&Method::POST, ["auth", "login"]) => self.login(headers, &parse_body(&body)?).await,
            (&Method::POST, ["auth", "unlock"]) => self.unlock(headers, &parse_body(&body)?).await,
            (&Method::GET, ["auth", "whoami"]) => Ok(self.whoami(headers)),
            (&Method::POST, ["auth", "refresh"]) => self.refresh(headers).await,
            (&Method::POST, ["auth", "logout"]) => Ok(self.logout(headers).await),
            (&Method::GET, ["auth", "users"]) => self.list_users(headers).await,
            (&Method::PUT, ["auth", "users", user_id, "roles"]) => {
                self.set_user_roles(headers, user_id, &parse_body(&body)?)
                    .await
            }
            (&Method::DELETE, ["auth", "users", user_id]) => {
                self.deactivate_user(headers, user_id).await
            }
            (&Method::GET, ["admin", "sessions"]) => {
                let cursor = query_param(parts.uri.query(), "cursor");
                self.list_sessions(headers, cursor).await
            }
            (&Method::POST, ["admin", "sessions", session_id, "roles"]) => {
                self.set_session_roles(headers, session_id, &parse_body(&body)?)
                    .await
            }
            (&Method::DELETE, ["admin", "sessions", session_id]) => {
                self.force_logout(headers, session_id).await
            }
            _ => Err(AuthError::NotFound("Route".to_string())),
        }
    }

    /// `GET /auth/health`
    pub fn health(&self) -> ApiResponse {
        ApiResponse::ok(json!({ "status": "ok" }))
    }

    /// `POST /auth/start-session`
    pub async fn start_session(&self) -> AuthResult<ApiResponse> {
        let issued = self.service.start_session().await?;
        let body = json!({
            "message": "Session started",
            "session_id": issued.session.session_id,
            "roles": issued.session.roles,
        });
        Ok(self.with_session_cookies(ApiResponse::ok(body), &issued))
    }

    /// `POST /auth/register`
    pub async fn register(&self, request: &RegisterRequest) -> AuthResult<ApiResponse> {
        let user = self
            .service
            .register(&request.email, &request.password)
            .await?;
        Ok(ApiResponse::ok(json!({
            "message": "User created successfully",
            "user_id": user.id,
            "email": user.email,
        })))
    }

    /// `POST /auth/login`
    pub async fn login(
        &self,
        headers: &HeaderMap,
        request: &LoginRequest,
    ) -> AuthResult<ApiResponse> {
        let current = self.current_session_id(headers);
        let issued = self
            .service
            .login(&request.email, &request.password, current.as_deref())
            .await?;
        let body = json!({
            "message": "Login successful",
            "user": {
                "user_id": issued.session.user_id,
                "email": issued.session.email,
                "roles": issued.session.roles,
            },
        });
        Ok(self.with_session_cookies(ApiResponse::ok(body), &issued))
    }

    /// `POST /auth/unlock`
    pub async fn unlock(
        &self,
        headers: &HeaderMap,
        request: &UnlockRequest,
    ) -> AuthResult<ApiResponse> {
        let current = self.current_session_id(headers);
        let issued = self
            .service
            .unlock(&request.password, current.as_deref())
            .await?;
        let body = json!({
            "message": "Unlocked",
            "session_id": issued.session.session_id,
            "roles": issued.session.roles,
        });
        Ok(self.with_session_cookies(ApiResponse::ok(body), &issued))
    }

    /// `GET /auth/whoami`
    pub fn whoami(&self, headers: &HeaderMap) -> ApiResponse {
        match self.service.guard().resolve_identity(headers) {
            Some(claims) => ApiResponse::ok(json!({
                "user_id": claims.user_id,
                "email": claims.email,
                "roles": claims.roles,
                "authenticated": claims.authenticated,
                "session_id": claims.sid,
            })),
            None => ApiResponse::ok(json!({
                "user_id": null,
                "email": null,
                "roles": RoleSet::guest(),
                "authenticated": false,
                "message": "No active session",
            })),
        }
    }

    /// `POST /auth/refresh`
    pub async fn refresh(&self, headers: &HeaderMap) -> AuthResult<ApiResponse> {
        let token = cookie::parse_cookie(headers, REFRESH_COOKIE);
        let refreshed = self.service.refresh(token.as_deref()).await?;
        let body = json!({
            "message": "Token refreshed successfully",
            "roles": refreshed.session.roles,
            "authenticated": refreshed.session.authenticated,
        });
        Ok(ApiResponse::ok(body).with_cookie(self.cookies.set(
            ACCESS_COOKIE,
            &refreshed.access_token,
            self.service.codec().access_ttl(),
        )))
    }

    /// `POST /auth/logout`
    ///
    /// Clears all token cookies, also when the store could not be reached.
    pub async fn logout(&self, headers: &HeaderMap) -> ApiResponse {
        let session_id = self.current_session_id(headers);
        let response = match self.service.logout(session_id.as_deref()).await {
            Ok(()) => ApiResponse::ok(json!({ "message": "Logged out successfully" })),
            Err(err) => ApiResponse::from_error(&err),
        };
        [ACCESS_COOKIE, REFRESH_COOKIE, SESSION_COOKIE]
            .into_iter()
            .fold(response, |response, name| {
                response.with_cookie(self.cookies.clear(name))
            })
    }

    /// `GET /auth/users`
    pub async fn list_users(&self, headers: &HeaderMap) -> AuthResult<ApiResponse> {
        self.service.guard().require_admin(headers).await?;
        let users = self.service.list_users().await?;
        Ok(ApiResponse::ok(json!({ "users": users })))
    }

    /// `PUT /auth/users/{id}/roles`
    pub async fn set_user_roles(
        &self,
        headers: &HeaderMap,
        user_id: &str,
        request: &RolesRequest,
    ) -> AuthResult<ApiResponse> {
        self.service.guard().require_admin(headers).await?;
        let change = self
            .service
            .set_user_roles(user_id, &RoleSet::of(&request.roles))
            .await?;
        Ok(ApiResponse::ok(json!({
            "message": "User roles updated successfully",
            "user_id": change.user.id,
            "roles": change.user.roles,
            "sessions_affected": change.sessions_affected,
        })))
    }

    /// `DELETE /auth/users/{id}`
    pub async fn deactivate_user(
        &self,
        headers: &HeaderMap,
        user_id: &str,
    ) -> AuthResult<ApiResponse> {
        self.service.guard().require_admin(headers).await?;
        let user = self.service.deactivate_user(user_id).await?;
        Ok(ApiResponse::ok(json!({
            "message": "User deactivated successfully",
            "user_id": user.id,
        })))
    }

    /// `GET /admin/sessions`
    pub async fn list_sessions(
        &self,
        headers: &HeaderMap,
        cursor: Option<&str>,
    ) -> AuthResult<ApiResponse> {
        self.service.guard().require_admin(headers).await?;
        let page = self.service.list_sessions(cursor).await?;
        Ok(ApiResponse::ok(json!({
            "sessions": page.sessions,
            "next_cursor": page.next_cursor,
        })))
    }

    /// `POST /admin/sessions/{id}/roles`
    pub async fn set_session_roles(
        &self,
        headers: &HeaderMap,
        session_id: &str,
        request: &RolesRequest,
    ) -> AuthResult<ApiResponse> {
        self.service.guard().require_admin(headers).await?;
        let session = self
            .service
            .set_session_roles(session_id, &RoleSet::of(&request.roles))
            .await?;
        Ok(ApiResponse::ok(json!({
            "message": format!("Roles updated for session {}", session_id),
            "roles": session.roles,
        })))
    }

    /// `DELETE /admin/sessions/{id}`
    pub async fn force_logout(
        &self,
        headers: &HeaderMap,
        session_id: &str,
    ) -> AuthResult<ApiResponse> {
        self.service.guard().require_admin(headers).await?;
        self.service.force_logout(session_id).await?;
        Ok(ApiResponse::ok(json!({
            "message": format!("Session {} deleted", session_id),
            "session_id": session_id,
            "status": "force_logged_out",
        })))
    }

    /// Session the caller carries: from a verified access token, else a
    /// verified refresh token, else the session cookie.
    fn current_session_id(&self, headers: &HeaderMap) -> Option<String> {
        let codec = self.service.codec();
        codec
            .verify_access(cookie::access_token(headers).as_deref())
            .map(|claims| claims.sid)
            .or_else(|| {
                codec
                    .verify_refresh(cookie::parse_cookie(headers, REFRESH_COOKIE).as_deref())
                    .map(|claims| claims.sid)
            })
            .or_else(|| cookie::parse_cookie(headers, SESSION_COOKIE))
    }

    fn with_session_cookies(&self, response: ApiResponse, issued: &IssuedSession) -> ApiResponse {
        response
            .with_cookie(self.cookies.set(
                ACCESS_COOKIE,
                &issued.access_token,
                self.service.codec().access_ttl(),
            ))
            .with_cookie(self.cookies.set(
                REFRESH_COOKIE,
                &issued.refresh_token,
                self.service.codec().refresh_ttl(),
            ))
            .with_cookie(self.cookies.set(
                SESSION_COOKIE,
                issued.session.session_id.as_str(),
                self.service.sessions().ttl(),
            ))
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> AuthResult<T> {
    serde_json::from_str(body).map_err(|err| {
        tracing::debug!(error = %err, "malformed request body");
        AuthError::InvalidRequest("Invalid request body".to_string())
    })
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}
