//! HTTP entry point: `POST /transfer` and `GET /health`.

use crate::application::engine::TransferEngine;
use crate::domain::wallet::Address;
use crate::error::{LedgerError, Result};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_address: String,
    pub to_address: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error on its way out as an HTTP response with an `{"error": ...}` body.
pub enum ApiError {
    Ledger(LedgerError),
    /// The request body was not a well-formed transfer request.
    MalformedBody(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::MalformedBody(rejection.body_text())
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidAmount(_)
        | LedgerError::InvalidAddress(_)
        | LedgerError::NegativeBalance { .. } => StatusCode::BAD_REQUEST,
        LedgerError::WalletNotFound(_) | LedgerError::SelfTransferWalletMissing(_) => {
            StatusCode::NOT_FOUND
        }
        LedgerError::InsufficientFunds { .. } => StatusCode::CONFLICT,
        LedgerError::BalanceOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::StoreUnavailable(_) | LedgerError::Store { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LedgerError::Config(_) | LedgerError::Csv(_) | LedgerError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::Ledger(err) => {
                if !err.is_rejection() {
                    warn!(error = %err, "transfer failed");
                }
                (ledger_status(&err), err.to_string())
            }
            Self::MalformedBody(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub fn router(engine: Arc<TransferEngine>) -> Router {
    Router::new()
        .route("/transfer", post(transfer))
        .route("/health", get(health))
        .with_state(engine)
}

async fn transfer(
    State(engine): State<Arc<TransferEngine>>,
    payload: std::result::Result<Json<TransferRequest>, JsonRejection>,
) -> std::result::Result<Json<TransferResponse>, ApiError> {
    let Json(req) = payload?;
    // The only place raw request strings become addresses.
    let from = Address::new(&req.from_address)?;
    let to = Address::new(&req.to_address)?;

    let balance = engine.transfer(&from, &to, req.amount).await?;
    Ok(Json(TransferResponse {
        balance: balance.value(),
    }))
}

async fn health(State(engine): State<Arc<TransferEngine>>) -> std::result::Result<&'static str, ApiError> {
    engine.store().ping().await?;
    Ok("ok")
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, engine: Arc<TransferEngine>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "listening for transfer requests");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves once `signal` fires. If the signal handler could not be
/// installed, never resolves, so the server keeps running until killed.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutting down"),
        Err(e) => {
            warn!(error = %e, "failed to listen for shutdown signal, graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
}
