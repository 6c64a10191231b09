//! # API REST
//!
//! REST API implementation for the CareGate portal core.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status-code mapping)
//!
//! The handlers are a thin presentation contract over `caregate-core`: they
//! call `authorize`, invoke workflow submit/approve/reject, and render
//! notification state. Failure kinds from the core map onto status codes so
//! callers can message each kind distinctly.

#![warn(rust_2018_idioms)]

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use base64::Engine;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use caregate_core::backend::memory::{
    MemoryDocumentStore, MemoryIdentityProvider, MemoryNotificationSender, MemoryVerificationStore,
};
use caregate_core::backend::DocumentStore;
use caregate_core::realtime::{follow, RequestCache};
use caregate_core::{
    filter_requests, ErrorKind, Notification, Permission, PortalError, RouteGuard, SessionHolder,
    Submission, VerificationRequest, VerificationService,
};
use caregate_types::{NotificationId, RequestId, UserId};

type Verification = VerificationService<
    MemoryVerificationStore,
    MemoryDocumentStore,
    MemoryIdentityProvider,
    MemoryNotificationSender,
>;

/// Application state shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionHolder<MemoryIdentityProvider>>,
    guard: Arc<RouteGuard<MemoryVerificationStore>>,
    verification: Arc<Verification>,
    documents: Arc<MemoryDocumentStore>,
    notifier: Arc<MemoryNotificationSender>,
    /// Realtime-fed view of each subject's latest request; the store's
    /// change feed is merged into it by a background task.
    request_cache: Arc<tokio::sync::Mutex<RequestCache>>,
}

impl AppState {
    /// Wires the full service graph over the in-memory reference backend.
    ///
    /// Subscribes a follower task to the store's change feed, so this must
    /// be called from within the runtime.
    pub fn in_memory() -> Self {
        let identities = Arc::new(MemoryIdentityProvider::new());
        let store = Arc::new(MemoryVerificationStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let notifier = Arc::new(MemoryNotificationSender::new());

        let request_cache = Arc::new(tokio::sync::Mutex::new(RequestCache::new()));
        // Detached on purpose: the follower runs for the process lifetime
        // and stops when the store (and its feed) is dropped.
        let _feed = follow(store.subscribe(), request_cache.clone());

        Self {
            sessions: Arc::new(SessionHolder::new(identities.clone())),
            guard: Arc::new(RouteGuard::new(store.clone())),
            verification: Arc::new(VerificationService::new(
                store,
                documents.clone(),
                identities,
                notifier.clone(),
            )),
            documents,
            notifier,
            request_cache,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        sign_up,
        sign_in,
        sign_out,
        reset_password,
        authorize,
        submit_verification,
        list_verification,
        verification_counts,
        verification_status,
        approve_verification,
        reject_verification,
        list_notifications,
        mark_notification_read,
        mark_all_notifications_read,
    ),
    components(schemas(
        HealthRes,
        SignUpReq,
        SignInReq,
        ResetPasswordReq,
        SessionRes,
        OkRes,
        AuthorizeRes,
        SubmitVerificationReq,
        DecisionReq,
        VerificationRequestRes,
        ListVerificationRes,
        CountsRes,
        NotificationRes,
        NotificationsRes,
    ))
)]
struct ApiDoc;

/// Builds the portal router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/signout", post(sign_out))
        .route("/auth/reset-password", post(reset_password))
        .route("/authorize", get(authorize))
        .route("/verification", post(submit_verification))
        .route("/verification", get(list_verification))
        .route("/verification/counts", get(verification_counts))
        .route("/verification/status/:subject_id", get(verification_status))
        .route("/verification/:id/approve", post(approve_verification))
        .route("/verification/:id/reject", post(reject_verification))
        .route("/notifications/:user_id", get(list_notifications))
        .route(
            "/notifications/:user_id/:id/read",
            post(mark_notification_read),
        )
        .route(
            "/notifications/:user_id/read-all",
            post(mark_all_notifications_read),
        )
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the router until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Maps a core failure kind onto a status code the caller can message on.
fn error_response(err: &PortalError) -> (StatusCode, &'static str) {
    match err.kind() {
        ErrorKind::Auth => (StatusCode::UNAUTHORIZED, "Authentication failed"),
        ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid input"),
        ErrorKind::Storage => (StatusCode::BAD_GATEWAY, "Document storage failed"),
        ErrorKind::State => (StatusCode::CONFLICT, "Request state has changed"),
    }
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct HealthRes {
    ok: bool,
    message: String,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct SignUpReq {
    email: String,
    password: String,
    display_name: String,
    /// Requested role; must be inside the fixed role domain.
    role: String,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct SignInReq {
    email: String,
    password: String,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct ResetPasswordReq {
    email: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct SessionRes {
    user_id: String,
    email: String,
    display_name: String,
    roles: Vec<String>,
    /// Dashboard destination per the sign-in priority order.
    destination: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct OkRes {
    success: bool,
}

#[derive(serde::Deserialize)]
struct AuthorizeQuery {
    permission: Option<String>,
    #[serde(default = "default_path")]
    path: String,
}

fn default_path() -> String {
    "/".into()
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct AuthorizeRes {
    allow: bool,
    redirect_to: Option<String>,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct SubmitVerificationReq {
    subject_id: String,
    subject_name: String,
    license_number: String,
    specialization: String,
    document_name: String,
    /// Credential document content, base64 encoded.
    document_base64: String,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct DecisionReq {
    reviewer_id: String,
    notes: Option<String>,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct VerificationRequestRes {
    id: String,
    subject_id: String,
    subject_name: String,
    license_number: String,
    specialization: String,
    document_url: String,
    status: String,
    reviewer_id: Option<String>,
    reviewer_notes: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct ListVerificationRes {
    requests: Vec<VerificationRequestRes>,
}

#[derive(serde::Deserialize)]
struct ListQuery {
    q: Option<String>,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct CountsRes {
    pending: usize,
    approved: usize,
    rejected: usize,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct NotificationRes {
    id: String,
    title: String,
    message: String,
    category: String,
    created_at: String,
    read: bool,
    link: Option<String>,
    action_label: Option<String>,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct NotificationsRes {
    notifications: Vec<NotificationRes>,
    unread: usize,
}

fn session_response(identity: &caregate_core::Identity, destination: String) -> SessionRes {
    SessionRes {
        user_id: identity.id.to_string(),
        email: identity.email.clone(),
        display_name: identity.display_name.clone(),
        roles: identity
            .roles()
            .iter()
            .map(|role| role.as_str().to_owned())
            .collect(),
        destination,
    }
}

fn request_response(request: &VerificationRequest, documents: &MemoryDocumentStore) -> VerificationRequestRes {
    VerificationRequestRes {
        id: request.id.to_string(),
        subject_id: request.subject.to_string(),
        subject_name: request.subject_name.clone(),
        license_number: request.license_number.as_str().to_owned(),
        specialization: request.specialization.as_str().to_owned(),
        document_url: documents.public_url(&request.document),
        status: request.status.to_string(),
        reviewer_id: request.reviewer.map(|id| id.to_string()),
        reviewer_notes: request.reviewer_notes.clone(),
        created_at: request.created_at.to_rfc3339(),
        updated_at: request.updated_at.to_rfc3339(),
    }
}

fn notification_response(notification: &Notification) -> NotificationRes {
    NotificationRes {
        id: notification.id.to_string(),
        title: notification.title.clone(),
        message: notification.message.clone(),
        category: format!("{:?}", notification.category).to_lowercase(),
        created_at: notification.created_at.to_rfc3339(),
        read: notification.read,
        link: notification.link.clone(),
        action_label: notification.action_label.clone(),
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint used by monitoring and load balancers.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "CareGate REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignUpReq,
    responses(
        (status = 201, description = "Account created and signed in", body = SessionRes),
        (status = 422, description = "Role outside the fixed domain or invalid input"),
        (status = 401, description = "Duplicate registration")
    )
)]
/// Registers an account and opens a session.
///
/// The requested role is validated against the fixed domain before the
/// identity provider is contacted; `doctor` and friends never leave the
/// process.
#[axum::debug_handler]
async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpReq>,
) -> Result<Json<SessionRes>, (StatusCode, &'static str)> {
    match state
        .sessions
        .sign_up(&req.email, &req.password, &req.display_name, &req.role)
        .await
    {
        Ok((identity, destination)) => Ok(Json(session_response(&identity, destination.path()))),
        Err(e) => {
            tracing::error!("Sign-up error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/signin",
    request_body = SignInReq,
    responses(
        (status = 200, description = "Signed in", body = SessionRes),
        (status = 401, description = "Invalid credentials")
    )
)]
#[axum::debug_handler]
async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInReq>,
) -> Result<Json<SessionRes>, (StatusCode, &'static str)> {
    match state.sessions.sign_in(&req.email, &req.password).await {
        Ok((identity, destination)) => Ok(Json(session_response(&identity, destination.path()))),
        Err(e) => {
            tracing::error!("Sign-in error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/signout",
    responses(
        (status = 200, description = "Signed out", body = OkRes)
    )
)]
#[axum::debug_handler]
async fn sign_out(
    State(state): State<AppState>,
) -> Result<Json<OkRes>, (StatusCode, &'static str)> {
    match state.sessions.sign_out().await {
        Ok(()) => Ok(Json(OkRes { success: true })),
        Err(e) => {
            tracing::error!("Sign-out error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordReq,
    responses(
        (status = 200, description = "Reset acknowledged", body = OkRes)
    )
)]
#[axum::debug_handler]
async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordReq>,
) -> Result<Json<OkRes>, (StatusCode, &'static str)> {
    match state.sessions.reset_password(&req.email).await {
        Ok(()) => Ok(Json(OkRes { success: true })),
        Err(e) => {
            tracing::error!("Password reset error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/authorize",
    params(
        ("permission" = Option<String>, Query, description = "Required permission, if any"),
        ("path" = Option<String>, Query, description = "Requested location, preserved for replay")
    ),
    responses(
        (status = 200, description = "Guard decision", body = AuthorizeRes),
        (status = 422, description = "Unknown permission")
    )
)]
/// Runs the route guard for the current session against a requested view.
#[axum::debug_handler]
async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<AuthorizeRes>, (StatusCode, &'static str)> {
    let required = match query.permission.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<Permission>() {
            Ok(permission) => Some(permission),
            Err(e) => {
                tracing::error!("Unknown permission: {:?}", e);
                return Err((StatusCode::UNPROCESSABLE_ENTITY, "Unknown permission"));
            }
        },
    };

    let identity = state.sessions.current();
    match state
        .guard
        .authorize(identity.as_ref(), required, &query.path)
        .await
    {
        Ok(caregate_core::Decision::Allow) => Ok(Json(AuthorizeRes {
            allow: true,
            redirect_to: None,
        })),
        Ok(caregate_core::Decision::Deny { redirect }) => Ok(Json(AuthorizeRes {
            allow: false,
            redirect_to: Some(redirect.path()),
        })),
        Err(e) => {
            tracing::error!("Authorize error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/verification",
    request_body = SubmitVerificationReq,
    responses(
        (status = 201, description = "Request created", body = VerificationRequestRes),
        (status = 422, description = "Missing field or undecodable document"),
        (status = 502, description = "Document storage failed")
    )
)]
/// Submits a credential-verification request.
#[axum::debug_handler]
async fn submit_verification(
    State(state): State<AppState>,
    Json(req): Json<SubmitVerificationReq>,
) -> Result<Json<VerificationRequestRes>, (StatusCode, &'static str)> {
    let subject = parse_user_id(&req.subject_id)?;
    let document = match base64::engine::general_purpose::STANDARD.decode(&req.document_base64) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Invalid document payload: {:?}", e);
            return Err((StatusCode::UNPROCESSABLE_ENTITY, "Invalid document payload"));
        }
    };

    match state
        .verification
        .submit(Submission {
            subject,
            subject_name: req.subject_name,
            license_number: req.license_number,
            specialization: req.specialization,
            document_name: req.document_name,
            document,
        })
        .await
    {
        Ok(request) => Ok(Json(request_response(&request, &state.documents))),
        Err(e) => {
            tracing::error!("Submit verification error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/verification",
    params(
        ("q" = Option<String>, Query, description = "Free-text filter over name, licence and specialization")
    ),
    responses(
        (status = 200, description = "All requests, newest first", body = ListVerificationRes)
    )
)]
#[axum::debug_handler]
async fn list_verification(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListVerificationRes>, (StatusCode, &'static str)> {
    match state.verification.list_all().await {
        Ok(all) => {
            let filtered = filter_requests(&all, query.q.as_deref().unwrap_or(""));
            Ok(Json(ListVerificationRes {
                requests: filtered
                    .into_iter()
                    .map(|request| request_response(request, &state.documents))
                    .collect(),
            }))
        }
        Err(e) => {
            tracing::error!("List verification error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/verification/counts",
    responses(
        (status = 200, description = "Dashboard aggregates", body = CountsRes)
    )
)]
#[axum::debug_handler]
async fn verification_counts(
    State(state): State<AppState>,
) -> Result<Json<CountsRes>, (StatusCode, &'static str)> {
    match state.verification.count_by_status().await {
        Ok(counts) => Ok(Json(CountsRes {
            pending: counts.pending,
            approved: counts.approved,
            rejected: counts.rejected,
        })),
        Err(e) => {
            tracing::error!("Verification counts error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/verification/status/{subject_id}",
    responses(
        (status = 200, description = "Latest request for the subject", body = VerificationRequestRes),
        (status = 404, description = "No request on file"),
        (status = 400, description = "Bad subject id")
    )
)]
/// Latest verification request for a subject, the record authoritative for
/// gating. Served from the realtime-fed cache, falling back to the store
/// for rows created before the feed was subscribed.
#[axum::debug_handler]
async fn verification_status(
    State(state): State<AppState>,
    AxumPath(subject_id): AxumPath<String>,
) -> Result<Json<VerificationRequestRes>, (StatusCode, &'static str)> {
    let subject = parse_user_id(&subject_id)?;

    let cached = state
        .request_cache
        .lock()
        .await
        .latest_for(subject)
        .cloned();
    if let Some(request) = cached {
        return Ok(Json(request_response(&request, &state.documents)));
    }

    match state.verification.latest_for_subject(subject).await {
        Ok(Some(request)) => Ok(Json(request_response(&request, &state.documents))),
        Ok(None) => Err((StatusCode::NOT_FOUND, "No verification request")),
        Err(e) => {
            tracing::error!("Verification status error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/verification/{id}/approve",
    request_body = DecisionReq,
    responses(
        (status = 200, description = "Request approved", body = VerificationRequestRes),
        (status = 409, description = "Request already decided")
    )
)]
/// Approves a pending request, promoting the subject to healthstaff.
#[axum::debug_handler]
async fn approve_verification(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<DecisionReq>,
) -> Result<Json<VerificationRequestRes>, (StatusCode, &'static str)> {
    let id = parse_request_id(&id)?;
    let reviewer = parse_user_id(&req.reviewer_id)?;

    match state.verification.approve(id, reviewer, req.notes).await {
        Ok(request) => Ok(Json(request_response(&request, &state.documents))),
        Err(e) => {
            tracing::error!("Approve verification error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/verification/{id}/reject",
    request_body = DecisionReq,
    responses(
        (status = 200, description = "Request rejected", body = VerificationRequestRes),
        (status = 422, description = "Missing rejection notes"),
        (status = 409, description = "Request already decided")
    )
)]
/// Rejects a pending request; notes are mandatory.
#[axum::debug_handler]
async fn reject_verification(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<DecisionReq>,
) -> Result<Json<VerificationRequestRes>, (StatusCode, &'static str)> {
    let id = parse_request_id(&id)?;
    let reviewer = parse_user_id(&req.reviewer_id)?;
    let notes = req.notes.unwrap_or_default();

    match state.verification.reject(id, reviewer, &notes).await {
        Ok(request) => Ok(Json(request_response(&request, &state.documents))),
        Err(e) => {
            tracing::error!("Reject verification error: {:?}", e);
            Err(error_response(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/notifications/{user_id}",
    responses(
        (status = 200, description = "Notification log, newest first", body = NotificationsRes),
        (status = 400, description = "Bad user id")
    )
)]
#[axum::debug_handler]
async fn list_notifications(
    State(state): State<AppState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<NotificationsRes>, (StatusCode, &'static str)> {
    let user = parse_user_id(&user_id)?;
    let notifications = state.notifier.notifications_for(user).await;
    let unread = state.notifier.unread_count(user).await;
    Ok(Json(NotificationsRes {
        notifications: notifications.iter().map(notification_response).collect(),
        unread,
    }))
}

#[utoipa::path(
    post,
    path = "/notifications/{user_id}/{id}/read",
    responses(
        (status = 200, description = "Marked read (idempotent)", body = OkRes),
        (status = 400, description = "Bad id")
    )
)]
#[axum::debug_handler]
async fn mark_notification_read(
    State(state): State<AppState>,
    AxumPath((user_id, id)): AxumPath<(String, String)>,
) -> Result<Json<OkRes>, (StatusCode, &'static str)> {
    let user = parse_user_id(&user_id)?;
    let id: NotificationId = match id.parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Invalid notification id: {:?}", e);
            return Err((StatusCode::BAD_REQUEST, "Invalid notification id"));
        }
    };

    let changed = state.notifier.mark_read(user, id).await;
    Ok(Json(OkRes { success: changed }))
}

#[utoipa::path(
    post,
    path = "/notifications/{user_id}/read-all",
    responses(
        (status = 200, description = "All marked read", body = OkRes),
        (status = 400, description = "Bad user id")
    )
)]
#[axum::debug_handler]
async fn mark_all_notifications_read(
    State(state): State<AppState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<OkRes>, (StatusCode, &'static str)> {
    let user = parse_user_id(&user_id)?;
    state.notifier.mark_all_read(user).await;
    Ok(Json(OkRes { success: true }))
}

fn parse_user_id(raw: &str) -> Result<UserId, (StatusCode, &'static str)> {
    raw.parse().map_err(|e| {
        tracing::error!("Invalid user id: {:?}", e);
        (StatusCode::BAD_REQUEST, "Invalid user id")
    })
}

fn parse_request_id(raw: &str) -> Result<RequestId, (StatusCode, &'static str)> {
    raw.parse().map_err(|e| {
        tracing::error!("Invalid request id: {:?}", e);
        (StatusCode::BAD_REQUEST, "Invalid request id")
    })
}
