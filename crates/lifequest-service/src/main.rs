use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use lifequest_core::{format_rfc3339, CompletionInput, QuestError};
use lifequest_store_sqlite::QuestApi;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone)]
struct ServiceState {
    api: QuestApi,
    operation_timeout: Duration,
    telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Clone, Serialize)]
struct ReadinessChecks {
    current_schema_version: i64,
    target_schema_version: i64,
    pending_migrations: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    checks: ReadinessChecks,
}

#[derive(Debug, Clone, Serialize)]
struct AvailableMissionsResponse {
    user_id: i64,
    level: u32,
    missions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ProfileResponse {
    user_id: i64,
    life_id: i64,
    xp: i64,
    level_number: u32,
    progress_to_next_level: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CompleteMissionParams {
    user_photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct CompletionResponse {
    message: &'static str,
    new_xp: i64,
    new_level: u32,
    reward: String,
}

#[derive(Debug, Clone, Serialize)]
struct RewardEntry {
    reward_name: String,
    rewarded_at: String,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    not_found_total: AtomicU64,
    already_completed_total: AtomicU64,
    validation_error_total: AtomicU64,
    storage_unavailable_total: AtomicU64,
    internal_error_total: AtomicU64,
    other_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    requests_success_total: u64,
    requests_failure_total: u64,
    timeout_total: u64,
    not_found_total: u64,
    already_completed_total: u64,
    validation_error_total: u64,
    storage_unavailable_total: u64,
    internal_error_total: u64,
    other_error_total: u64,
}

#[derive(Debug, Parser)]
#[command(name = "lifequest-service")]
#[command(about = "HTTP service for the LifeQuest progression backend")]
struct Args {
    #[arg(long, default_value = "./lifequest.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, default_value_t = 2500)]
    operation_timeout_ms: u64,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message.clone(),
                details: self.details,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

impl ServiceState {
    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure { status, code, message: message.into(), details }
    }

    fn invalid_path(&self, rejection: &PathRejection) -> ServiceFailure {
        self.telemetry.record_failure("validation_error", false);
        Self::failure(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
            None,
        )
    }

    fn classify_api_error(
        err: &anyhow::Error,
        default_status: StatusCode,
        default_code: &'static str,
    ) -> ServiceFailure {
        if let Some(quest) = err.downcast_ref::<QuestError>() {
            let message = quest.to_string();
            return match quest {
                QuestError::NotFound(_) => {
                    Self::failure(StatusCode::NOT_FOUND, "not_found", message, None)
                }
                QuestError::AlreadyCompleted { .. } => Self::failure(
                    StatusCode::BAD_REQUEST,
                    "mission_already_completed",
                    message,
                    None,
                ),
                QuestError::Validation(_) => {
                    Self::failure(StatusCode::BAD_REQUEST, "validation_error", message, None)
                }
            };
        }

        let message = err.to_string();
        let diagnostic = format!("{err:#}");
        let normalized = diagnostic.to_ascii_lowercase();

        // A racer that lost the check-and-insert to the uniqueness guard
        // surfaces as a constraint violation, not a typed domain error.
        if normalized.contains("unique constraint failed") {
            return Self::failure(
                StatusCode::BAD_REQUEST,
                "mission_already_completed",
                message,
                None,
            );
        }

        if normalized.contains("schema")
            || normalized.contains("sqlite")
            || normalized.contains("database")
        {
            return Self::failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                message,
                None,
            );
        }

        Self::failure(default_status, default_code, message, None)
    }

    async fn run_blocking<T, F>(
        &self,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(QuestApi) -> anyhow::Result<T> + Send + 'static,
    {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        let api = self.api.clone();
        let handle = tokio::task::spawn_blocking(move || op(api));
        let join_result =
            tokio::time::timeout(self.operation_timeout, handle).await.map_err(|_| {
                self.telemetry.record_failure(default_code, true);
                Self::failure(
                    default_status,
                    default_code,
                    format!(
                        "{operation_label} timed out after {} ms",
                        self.operation_timeout.as_millis()
                    ),
                    Some(json!({ "timeout_ms": self.operation_timeout.as_millis() })),
                )
            })?;

        let op_result = join_result.map_err(|err| {
            self.telemetry.record_failure("internal_error", false);
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        match op_result {
            Ok(value) => {
                self.telemetry.requests_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                let failure = Self::classify_api_error(&err, default_status, default_code);
                self.telemetry.record_failure(failure.code, false);
                Err(failure)
            }
        }
    }
}

impl ServiceTelemetry {
    fn record_failure(&self, code: &str, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        match code {
            "not_found" => {
                self.not_found_total.fetch_add(1, Ordering::Relaxed);
            }
            "mission_already_completed" => {
                self.already_completed_total.fetch_add(1, Ordering::Relaxed);
            }
            "validation_error" => {
                self.validation_error_total.fetch_add(1, Ordering::Relaxed);
            }
            "storage_unavailable" | "schema_unavailable" => {
                self.storage_unavailable_total.fetch_add(1, Ordering::Relaxed);
            }
            "internal_error" => {
                self.internal_error_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.other_error_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            already_completed_total: self.already_completed_total.load(Ordering::Relaxed),
            validation_error_total: self.validation_error_total.load(Ordering::Relaxed),
            storage_unavailable_total: self.storage_unavailable_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
            other_error_total: self.other_error_total.load(Ordering::Relaxed),
        }
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/users/:user_id/available_missions", get(available_missions))
        .route("/users/:user_id/profile", get(profile))
        .route("/users/:user_id/complete_mission/:mission_id", post(complete_mission))
        .route("/users/:user_id/rewards", get(rewards))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let state = ServiceState {
        api: QuestApi::new(args.db),
        operation_timeout: Duration::from_millis(args.operation_timeout_ms),
        telemetry: Arc::new(ServiceTelemetry::default()),
    };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let timeout_ms = u64::try_from(state.operation_timeout.as_millis()).unwrap_or(u64::MAX);
    Json(HealthResponse {
        status: "ok",
        timeout_ms,
        telemetry: state.telemetry.snapshot(),
    })
}

async fn ready(
    State(state): State<ServiceState>,
) -> Result<Json<ReadinessResponse>, ServiceFailure> {
    let schema_status = state
        .run_blocking(
            StatusCode::SERVICE_UNAVAILABLE,
            "schema_unavailable",
            "schema_status",
            |api| api.schema_status(),
        )
        .await?;

    let is_ready = schema_status.pending_versions.is_empty()
        && schema_status.current_version == schema_status.target_version;
    let checks = ReadinessChecks {
        current_schema_version: schema_status.current_version,
        target_schema_version: schema_status.target_version,
        pending_migrations: schema_status.pending_versions.len(),
    };

    if is_ready {
        return Ok(Json(ReadinessResponse { status: "ready", checks }));
    }

    state.telemetry.record_failure("schema_unavailable", false);
    Err(ServiceState::failure(
        StatusCode::SERVICE_UNAVAILABLE,
        "schema_unavailable",
        "database schema is not ready; run the migrate command before serving traffic",
        Some(json!({
            "current_version": schema_status.current_version,
            "target_version": schema_status.target_version,
            "pending_versions": schema_status.pending_versions
        })),
    ))
}

async fn available_missions(
    State(state): State<ServiceState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<AvailableMissionsResponse>, ServiceFailure> {
    let Path(user_id) = user_id.map_err(|rejection| state.invalid_path(&rejection))?;
    let available = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "listing_failed",
            "available_missions",
            move |api| api.available_missions(user_id),
        )
        .await?;

    Ok(Json(AvailableMissionsResponse {
        user_id: available.user_id,
        level: available.level,
        missions: available.missions.into_iter().map(|mission| mission.title).collect(),
    }))
}

async fn profile(
    State(state): State<ServiceState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ProfileResponse>, ServiceFailure> {
    let Path(user_id) = user_id.map_err(|rejection| state.invalid_path(&rejection))?;
    let profile = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "profile_failed",
            "profile",
            move |api| api.profile(user_id),
        )
        .await?;

    Ok(Json(ProfileResponse {
        user_id: profile.user_id,
        life_id: profile.life_id,
        xp: profile.xp,
        level_number: profile.level,
        progress_to_next_level: format!("{}%", profile.progress_percent),
    }))
}

async fn complete_mission(
    State(state): State<ServiceState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
    Query(params): Query<CompleteMissionParams>,
) -> Result<Json<CompletionResponse>, ServiceFailure> {
    let Path((user_id, mission_id)) = ids.map_err(|rejection| state.invalid_path(&rejection))?;
    let input = CompletionInput {
        user_id,
        mission_id,
        user_photo_url: params.user_photo_url,
    };

    let outcome = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "completion_failed",
            "complete_mission",
            move |api| api.complete_mission(&input),
        )
        .await?;

    Ok(Json(CompletionResponse {
        message: "Mission completed! XP updated.",
        new_xp: outcome.new_xp,
        new_level: outcome.new_level,
        reward: outcome.reward.unwrap_or_else(|| "No new reward".to_string()),
    }))
}

async fn rewards(
    State(state): State<ServiceState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<RewardEntry>>, ServiceFailure> {
    let Path(user_id) = user_id.map_err(|rejection| state.invalid_path(&rejection))?;
    let grants = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "rewards_failed",
            "rewards",
            move |api| api.rewards(user_id),
        )
        .await?;

    let mut entries = Vec::with_capacity(grants.len());
    for grant in grants {
        let rewarded_at = format_rfc3339(grant.rewarded_at).map_err(|err| {
            ServiceState::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                err.to_string(),
                None,
            )
        })?;
        entries.push(RewardEntry { reward_name: grant.reward_name, rewarded_at });
    }

    Ok(Json(entries))
}
