use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::error::McpError;
use super::protocol::{McpRequest, McpResponse, MessageType, Params};
use crate::db::Database;

/// A method the dispatcher can call
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: Params) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, params: Params) -> Result<Value> {
        (self)(params).await
    }
}

/// Routes MCP requests to registered handlers
#[derive(Default)]
pub struct McpServer {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl McpServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server with `query_database`, `execute_sql` and `get_schema` bound
    /// to `db`
    pub fn with_database(db: Database) -> Self {
        let mut server = Self::new();

        let conn = db.clone();
        server.register_handler("query_database", move |params: Params| {
            query_database(conn.clone(), params)
        });
        let conn = db.clone();
        server.register_handler("execute_sql", move |params: Params| {
            execute_sql(conn.clone(), params)
        });
        server.register_handler("get_schema", move |params: Params| {
            get_schema(db.clone(), params)
        });

        server
    }

    pub fn register_handler(&mut self, method: impl Into<String>, handler: impl Handler + 'static) {
        let method = method.into();
        tracing::info!(method = %method, "Registered handler");
        self.handlers.insert(method, Arc::new(handler));
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Handle one raw request body
    pub async fn dispatch(&self, body: &str) -> (StatusCode, McpResponse) {
        let request = match serde_json::from_str::<McpRequest>(body) {
            Ok(request) if request.message_type == MessageType::Request => request,
            Ok(_) => return invalid_request(),
            Err(e) => {
                tracing::warn!("Rejected request: {}", e);
                return invalid_request();
            }
        };

        let Some(handler) = self.handlers.get(&request.method) else {
            let err = McpError::MethodNotFound(request.method);
            return (err.status(), McpResponse::failure(request.id, err.to_string()));
        };

        match handler.call(request.params).await {
            Ok(result) => (StatusCode::OK, McpResponse::success(request.id, result)),
            Err(e) => {
                tracing::error!(method = %request.method, "Error executing method: {}", e);
                let err = McpError::HandlerFailed(e.to_string());
                (err.status(), McpResponse::failure(request.id, err.to_string()))
            }
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/mcp", post(handle_mcp))
            .route("/health", get(health))
            .with_state(Arc::new(self))
    }

    /// Bind `host:port` and serve until ctrl-c
    pub async fn serve(self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(methods = ?self.methods(), "MCP server listening on http://{addr}/mcp");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down MCP server");
            })
            .await?;

        Ok(())
    }
}

fn invalid_request() -> (StatusCode, McpResponse) {
    let err = McpError::InvalidRequest;
    (err.status(), McpResponse::protocol_error(err.to_string()))
}

async fn handle_mcp(
    State(server): State<Arc<McpServer>>,
    body: String,
) -> (StatusCode, Json<McpResponse>) {
    let (status, response) = server.dispatch(&body).await;
    (status, Json(response))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

fn required_str(params: &Params, key: &str, label: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{} parameter is required", label))
}

fn db_failure(operation: &str, e: anyhow::Error) -> Value {
    tracing::error!("{} error: {}", operation, e);
    json!({"success": false, "error": e.to_string()})
}

async fn query_database(db: Database, params: Params) -> Result<Value> {
    let query = required_str(&params, "query", "Query")?;
    let rows = tokio::task::spawn_blocking(move || db.query(&query)).await?;

    Ok(match rows {
        Ok(rows) => json!({"success": true, "row_count": rows.len(), "data": rows}),
        Err(e) => db_failure("Database query", e),
    })
}

async fn execute_sql(db: Database, params: Params) -> Result<Value> {
    let sql = required_str(&params, "sql", "SQL")?;
    let affected = tokio::task::spawn_blocking(move || db.execute(&sql)).await?;

    Ok(match affected {
        Ok(affected) => json!({"success": true, "rows_affected": affected}),
        Err(e) => db_failure("SQL execution", e),
    })
}

async fn get_schema(db: Database, params: Params) -> Result<Value> {
    let schema = params
        .get("schema")
        .and_then(Value::as_str)
        .map(str::to_string);
    let tables = tokio::task::spawn_blocking(move || db.tables(schema.as_deref())).await?;

    Ok(match tables {
        Ok(tables) => json!({"success": true, "count": tables.len(), "tables": tables}),
        Err(e) => db_failure("Schema query", e),
    })
}
