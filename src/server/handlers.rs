// HTTP request handlers

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::page;
use super::retrain::RetrainOutcome;
use super::AppState;
use crate::config::RetrainMode;
use crate::feedback::{FeedbackRecord, PreferenceRecord, RatingScale};
use crate::models::SamplingParams;
use crate::training::{Checkpoint, TrainingInputs};

/// Build the application routes. Layers are added by the caller.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index).post(detoxify))
        .route("/rate", post(rate))
        .route("/choose", post(choose))
        .route("/retrain", post(retrain))
        .route("/health", get(health_check))
        .with_state(state)
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(page::render("", &[], &state.page_options(), None))
}

#[derive(Debug, Deserialize)]
pub struct MessageForm {
    #[serde(default)]
    message: String,
}

async fn detoxify(State(state): State<Arc<AppState>>, Form(form): Form<MessageForm>) -> Response {
    let message = form.message.trim().to_string();
    let options = state.page_options();
    if message.is_empty() {
        return Html(page::render("", &[], &options, None)).into_response();
    }

    match generate_candidates(&state, &message).await {
        Ok(candidates) => Html(page::render(&message, &candidates, &options, None)).into_response(),
        Err(e) => {
            tracing::error!("Generation failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(page::render(&message, &[], &options, Some("Generation failed"))),
            )
                .into_response()
        }
    }
}

async fn generate_candidates(state: &AppState, message: &str) -> anyhow::Result<Vec<String>> {
    let generator = Arc::clone(&state.generator);
    let params = SamplingParams::from(&state.config.generation);
    let count = state.config.generation.num_candidates;
    let source = message.to_string();

    tokio::task::spawn_blocking(move || {
        (0..count)
            .map(|i| generator.generate(&source, &params.for_candidate(i)))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?
}

#[derive(Debug, Deserialize)]
pub struct RateForm {
    #[serde(default)]
    message: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    rating: String,
}

async fn rate(State(state): State<Arc<AppState>>, Form(form): Form<RateForm>) -> Response {
    let scale = RatingScale::from(&state.config.curation);
    let rating = match form.rating.trim().parse::<u8>() {
        Ok(rating) if scale.contains(rating) => rating,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Rating must be between {} and {}", scale.floor, scale.ceiling),
            )
                .into_response()
        }
    };
    if form.message.trim().is_empty() || form.response.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing data").into_response();
    }

    let record = FeedbackRecord::new(&form.message, &form.response, rating);
    match state.feedback.append(&record) {
        Ok(total) => {
            tracing::info!(rating, total, "Saved feedback");
            "Thanks for your feedback!".into_response()
        }
        Err(e) => {
            tracing::error!("Failed to save feedback: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save feedback").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChooseRequest {
    #[serde(default)]
    toxic: String,
    #[serde(default)]
    chosen: String,
    #[serde(default)]
    options: Vec<String>,
}

async fn choose(State(state): State<Arc<AppState>>, Json(request): Json<ChooseRequest>) -> Response {
    let toxic = request.toxic.trim();
    let chosen = request.chosen.trim();
    if toxic.is_empty() || chosen.is_empty() || request.options.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Missing data");
    }

    let Some(record) = PreferenceRecord::from_choice(toxic, chosen, &request.options) else {
        return json_error(StatusCode::BAD_REQUEST, "Need at least one rejected option");
    };
    let rejected_count = record.rejected_texts.len();

    match state.preferences.append(&record) {
        Ok(total) => {
            tracing::info!(rejected_count, total, "Saved preference");
            Json(json!({
                "success": true,
                "message": format!("Preference saved! Total preferences: {}", total),
                "chosen": chosen,
                "rejected_count": rejected_count,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to save preference: {:#}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save preference")
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrainRequest {
    #[serde(default)]
    mode: Option<String>,
}

async fn retrain(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: RetrainRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RetrainRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)),
        }
    };
    let mode = match request.mode.as_deref().unwrap_or(&state.config.server.retrain_mode).parse::<RetrainMode>() {
        Ok(mode) => mode,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let Ok(_running) = state.retrain_lock.try_lock() else {
        return json_error(StatusCode::CONFLICT, "Retraining already in progress");
    };

    let config = state.config.clone();
    let inputs = match tokio::task::spawn_blocking(move || TrainingInputs::load(mode, &config)).await {
        Ok(Ok(inputs)) => inputs,
        Ok(Err(e)) => {
            tracing::error!("Failed to load training data: {:#}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));
        }
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let (noun, store_path) = match mode {
        RetrainMode::Ratings => ("feedback examples", &state.config.paths.feedback_store),
        RetrainMode::Preferences => ("preference pairs", &state.config.paths.preference_store),
    };
    if inputs.is_empty() {
        let message = if store_path.exists() {
            format!("No {} to train on", noun)
        } else {
            format!("No {} saved yet", noun)
        };
        return json_error(StatusCode::BAD_REQUEST, message);
    }

    tracing::info!(mode = %mode, count = inputs.len(), "Starting retrain");
    match state.runner.run(mode).await {
        Ok(RetrainOutcome::Succeeded { stdout }) => {
            let generator = Arc::clone(&state.generator);
            match tokio::task::spawn_blocking(move || generator.reload()).await {
                Ok(Ok(())) => Json(json!({
                    "success": true,
                    "message": format!("Retraining complete! Trained on {} {}.", inputs.len(), noun),
                    "output": stdout,
                }))
                .into_response(),
                Ok(Err(e)) => {
                    tracing::error!("Reload after retrain failed: {:#}", e);
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Retraining finished but the model could not be reloaded: {:#}", e),
                    )
                }
                Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        Ok(RetrainOutcome::Failed { stderr, .. }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Retraining failed", "stderr": stderr })),
        )
            .into_response(),
        Ok(RetrainOutcome::TimedOut { after }) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Retraining timeout (exceeded {} seconds)", after.as_secs()),
        ),
        Err(e) => {
            tracing::error!("Retrain could not run: {:#}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// Liveness plus the loaded model and its label map, if the checkpoint has one
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let checkpoint_dir = &state.config.paths.checkpoint_dir;
    let labels = Checkpoint::open(checkpoint_dir.clone())
        .ok()
        .and_then(|checkpoint| checkpoint.label_map().ok().flatten());

    Json(json!({
        "status": "ok",
        "model": state.generator.name(),
        "checkpoint": checkpoint_dir.display().to_string(),
        "labels": labels,
    }))
}
