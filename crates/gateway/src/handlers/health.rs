//! Liveness and readiness probes
//!
//! Readiness covers what a chat turn needs: the conversation database, the
//! vector store and the index storage root.

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use docchat_common::{
    errors::{AppError, Result},
    VERSION,
};
use docchat_index::FULLSTORE_INDEX_ID;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub dependencies: Dependencies,
}

#[derive(Serialize)]
pub struct Dependencies {
    pub database: DependencyStatus,
    pub vector_store: DependencyStatus,
    pub index_storage: DependencyStatus,
}

impl Dependencies {
    fn all_up(&self) -> bool {
        self.database.up && self.vector_store.up && self.index_storage.up
    }
}

#[derive(Serialize)]
pub struct DependencyStatus {
    pub up: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn probe(check: impl Future<Output = Result<()>>) -> DependencyStatus {
    let start = Instant::now();
    let result = check.await;
    DependencyStatus {
        up: result.is_ok(),
        latency_ms: start.elapsed().as_millis() as u64,
        error: result.err().map(|e| e.to_string()),
    }
}

pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "healthy",
        version: VERSION,
    })
}

/// 503 until every dependency answers
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let persist_dir = state.config.persist_dir();

    let (database, vector_store, index_storage) = tokio::join!(
        probe(state.db.ping()),
        probe(async {
            state.vector_store.count(FULLSTORE_INDEX_ID).await?;
            Ok(())
        }),
        probe(async {
            if state.objects.exists(persist_dir).await? {
                Ok(())
            } else {
                Err(AppError::Storage {
                    message: format!("index storage root '{}' does not exist", persist_dir),
                })
            }
        }),
    );

    let dependencies = Dependencies {
        database,
        vector_store,
        index_storage,
    };
    let ready = dependencies.all_up();
    if !ready {
        tracing::warn!("Readiness check failed");
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(Readiness { ready, dependencies }))
}
