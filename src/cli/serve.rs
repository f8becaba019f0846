//! HTTP server command handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use color_eyre::Result;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};

use crate::config::Config;
use crate::context::Context;
use crate::mcp::McpServer;

use super::App;

/// Authentication middleware state.
#[derive(Clone)]
struct AuthState {
    api_key: Option<Arc<str>>,
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Compares in time independent of where the first mismatch is.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Rejects requests without the configured bearer token.
async fn auth_middleware(State(state): State<AuthState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };

    let token = bearer_token(&req).map(|t| tokens_match(t, expected));
    match token {
        Some(true) => next.run(req).await,
        Some(false) => {
            tracing::warn!(path = %req.uri().path(), "Rejected request with wrong API key");
            StatusCode::UNAUTHORIZED.into_response()
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Router serving MCP over streamable HTTP behind the auth layer.
fn router(ctx: Context, api_key: Option<String>) -> Router {
    let auth_state = AuthState {
        api_key: api_key.map(Arc::from),
    };

    let service = StreamableHttpService::new(
        move || Ok(McpServer::new(ctx.clone())),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .fallback_service(service)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
}

impl App {
    /// Run the MCP server with HTTP transport.
    pub async fn run_serve(&self, config: Config, host: &str, port: u16) -> Result<()> {
        tracing::info!("Starting ollama-memory HTTP server");

        if config.server.api_key.is_some() {
            tracing::info!("API key authentication enabled");
        } else {
            tracing::warn!("No API key configured - server is unprotected!");
        }

        let api_key = config.server.api_key.clone();
        let ctx = Context::from_config(config).await?;
        let app = router(ctx, api_key);

        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| color_eyre::eyre::eyre!("Invalid address {}:{}: {}", host, port, e))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to bind to {}: {}", addr, e))?;

        tracing::info!("ollama-memory HTTP server listening on http://{}", addr);

        axum::serve(listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            color_eyre::eyre::eyre!("HTTP server error: {}", e)
        })?;

        tracing::info!("HTTP server shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(auth: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/mcp");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&request(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&request(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request(None)), None);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3creT", "s3cret"));
        assert!(!tokens_match("s3cre", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }
}
