//! Belle Web Server
//!
//! Read-only HTTP API exposing a guild's hunt context to the web front end,
//! with tower middleware for CORS and tracing.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    routing::get,
};
use belle_core::GuildId;
use belle_reconciler::{ChatPlatform, Guild};
use belle_runtime::{SerializedHuntContext, find_context};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;

pub use error::{AppError, ErrorResponse};

/// Origins the hosted front ends are served from.
pub const DEFAULT_CORS_ORIGINS: [&str; 4] = [
    "https://localhost:9000",
    "http://localhost:9000",
    "https://purple-smoke-08a64b310.1.azurestaticapps.net",
    "https://belle-puzzles.com",
];

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:3000")
    pub bind_address: SocketAddr,
    /// Origins allowed to call the API.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<dyn ChatPlatform>,
}

/// Create a new router with middleware.
///
/// # Errors
///
/// Returns an error if a configured origin is not a valid header value.
pub fn create_router(state: AppState, config: &ServerConfig) -> Result<Router, Error> {
    info!(origins = ?config.cors_origins, "Creating router");

    let origins = config
        .cors_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let router = Router::new()
        .route("/liveness", get(liveness))
        .route("/guilds/{guild_id}/puzzlehunt", get(puzzlehunt))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    Ok(router)
}

/// Serve `router` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn serve(
    router: Router,
    address: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %address, "Belle API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Probe endpoint for the hosting platform.
async fn liveness() -> StatusCode {
    StatusCode::OK
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

/// Whether the token's owner is a member of `guild`. Tokens the platform
/// rejects count as not a member.
async fn is_member(platform: &dyn ChatPlatform, guild: &dyn Guild, token: &str) -> error::Result<bool> {
    let user = match platform.resolve_bearer(token).await {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(false),
        Err(err) => {
            warn!(error = %err, "Failed to resolve bearer token");
            return Ok(false);
        }
    };
    Ok(guild.member_roles(&user).await?.is_some())
}

/// GET /guilds/{guild_id}/puzzlehunt - hunt context of a guild, for its
/// members.
async fn puzzlehunt(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    headers: HeaderMap,
) -> error::Result<Json<SerializedHuntContext>> {
    let token = bearer_token(&headers).ok_or(AppError::MissingBearer)?;
    let guild = state
        .platform
        .guild(&GuildId::new(guild_id))
        .await?
        .ok_or(AppError::UnknownGuild)?;

    let (lookup, authorized) = futures::join!(
        find_context(guild.as_ref(), state.platform.bot_user_id()),
        is_member(state.platform.as_ref(), guild.as_ref(), token),
    );
    if !authorized? {
        return Err(AppError::Unauthorized);
    }
    let found = lookup?.into_found().ok_or(AppError::NoHunt)?;
    Ok(Json(found.context))
}

/// Web server errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] ::axum::http::header::InvalidHeaderValue),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
