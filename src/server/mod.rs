// Detoxifier HTTP server
// Candidate generation, feedback collection and retrain triggering

mod handlers;
mod page;
mod retrain;

pub use handlers::{create_router, health_check};
pub use retrain::{ProcessRetrainRunner, RetrainOutcome, RetrainRunner};

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::feedback::{FeedbackStore, PreferenceStore, RatingScale};
use crate::models::TextGenerator;

/// Shared state behind every handler
pub struct AppState {
    config: Config,
    generator: Arc<dyn TextGenerator>,
    feedback: FeedbackStore,
    preferences: PreferenceStore,
    runner: Arc<dyn RetrainRunner>,
    /// Held for the duration of a retrain
    retrain_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(
        config: Config,
        generator: Arc<dyn TextGenerator>,
        runner: Arc<dyn RetrainRunner>,
    ) -> Result<Self> {
        let feedback = FeedbackStore::open(&config.paths.feedback_store)
            .context("Failed to open feedback store")?;
        let preferences = PreferenceStore::open(&config.paths.preference_store)
            .context("Failed to open preference store")?;

        Ok(Self {
            config,
            generator,
            feedback,
            preferences,
            runner,
            retrain_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn page_options(&self) -> page::PageOptions<'_> {
        page::PageOptions {
            marker: &self.config.preference.unfixable_marker,
            scale: RatingScale::from(&self.config.curation),
        }
    }
}

pub struct DetoxServer {
    state: Arc<AppState>,
}

impl DetoxServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Routes with the body limit and request tracing applied
    pub fn router(&self) -> Router {
        let body_limit = self.state.config.server.body_limit_bytes;
        create_router(Arc::clone(&self.state))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP server
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.state.config.server.bind_address))?;

        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        tracing::info!("Detoxifier listening on http://{}", addr);
        axum::serve(listener, app).await.context("Server error")?;
        Ok(())
    }
}
