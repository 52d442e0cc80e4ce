//! The backing-store process
//!
//! A small local HTTP server that owns the schema file on disk. It
//! serves the current document, persists saves, reports health, and
//! resolves a finish signal that the owning process awaits before
//! shutting down.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),
}

/// Serves the schema editing API over HTTP and persists the schema file.
pub struct SchemaServer {
    schema_file: Arc<PathBuf>,
    finished_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
}

impl SchemaServer {
    pub fn new(schema_file: PathBuf) -> Self {
        let (finished_tx, finished_rx) = watch::channel(false);
        Self {
            schema_file: Arc::new(schema_file),
            finished_tx,
            finished_rx,
        }
    }

    /// Bind to `addr` and return the bound address plus the serve
    /// future. The future completes after a finish request has been
    /// acknowledged and in-flight requests have drained.
    pub fn bind(
        &self,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, impl std::future::Future<Output = ()>), ServerError> {
        let schema_file = Arc::clone(&self.schema_file);
        let finished_tx = self.finished_tx.clone();
        let mut finished_rx = self.finished_rx.clone();

        let with_file = warp::any().map(move || Arc::clone(&schema_file));

        let get_schema = warp::path!("api" / "schema")
            .and(warp::get())
            .and(with_file.clone())
            .and_then(handle_get_schema);

        let save_schema = warp::path!("api" / "schema")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_file.clone())
            .and_then(handle_save_schema);

        let finish = warp::path!("api" / "finish")
            .and(warp::post())
            .and(warp::any().map(move || finished_tx.clone()))
            .and_then(handle_finish);

        let health = warp::path!("api" / "health")
            .and(warp::get())
            .and(with_file)
            .and_then(handle_health);

        let routes = get_schema.or(save_schema).or(finish).or(health);

        let (bound, serving) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                while !*finished_rx.borrow() {
                    if finished_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        log::info!("backing store listening at http://{bound}");
        Ok((bound, serving))
    }

    /// Bind and serve until finished.
    pub async fn run(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let (_, serving) = self.bind(addr)?;
        serving.await;
        Ok(())
    }

    /// Completes once a finish request has been received.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

fn json_reply(body: &Value, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

async fn handle_get_schema(
    schema_file: Arc<PathBuf>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    match tokio::fs::read_to_string(&*schema_file).await {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(data) => Ok(json_reply(
                &json!({ "status": "success", "type": "schema_update", "data": data }),
                StatusCode::OK,
            )),
            Err(e) => {
                log::error!("error reading schema: {e}");
                Ok(json_reply(
                    &json!({ "status": "error", "message": e.to_string() }),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ))
            }
        },
        Err(_) => {
            log::error!("schema file not found: {}", schema_file.display());
            Ok(json_reply(
                &json!({
                    "status": "error",
                    "message": format!("Schema file not found: {}", schema_file.display()),
                }),
                StatusCode::NOT_FOUND,
            ))
        }
    }
}

async fn handle_save_schema(
    body: Value,
    schema_file: Arc<PathBuf>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    let pretty = match serde_json::to_string_pretty(&body) {
        Ok(pretty) => pretty,
        Err(e) => {
            return Ok(json_reply(
                &json!({ "status": "error", "message": e.to_string() }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    };

    match tokio::fs::write(&*schema_file, pretty).await {
        Ok(()) => {
            log::info!("schema saved to {}", schema_file.display());
            Ok(json_reply(
                &json!({ "status": "success", "message": "Schema saved successfully" }),
                StatusCode::OK,
            ))
        }
        Err(e) => {
            log::error!("error saving schema: {e}");
            Ok(json_reply(
                &json!({ "status": "error", "message": e.to_string() }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

async fn handle_finish(
    finished_tx: watch::Sender<bool>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    let _ = finished_tx.send(true);
    Ok(json_reply(
        &json!({ "status": "success", "message": "Finished successfully" }),
        StatusCode::OK,
    ))
}

async fn handle_health(
    schema_file: Arc<PathBuf>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    Ok(json_reply(
        &json!({
            "status": "healthy",
            "schema_file": schema_file.display().to_string(),
            "schema_exists": schema_file.exists(),
        }),
        StatusCode::OK,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{to_wire, Property, PropertyType, SchemaDocument, Section};

    fn seed_file(dir: &tempfile::TempDir) -> PathBuf {
        let mut section = Section::new("General");
        section
            .properties
            .insert("name".to_string(), Property::new(PropertyType::String));
        let mut doc = SchemaDocument::new();
        doc.sections.insert("general".to_string(), section);

        let path = dir.path().join("pipeline_schema.json");
        std::fs::write(
            &path,
            serde_json::to_string_pretty(&to_wire(&doc)).unwrap(),
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_get_save_health_finish_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_file(&dir);

        let server = SchemaServer::new(path.clone());
        let (addr, serving) = server.bind(([127, 0, 0, 1], 0).into()).unwrap();
        let handle = tokio::spawn(serving);

        let client = reqwest::Client::new();
        let base = format!("http://{addr}");

        // health
        let health: Value = client
            .get(format!("{base}/api/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["schema_exists"], true);

        // get
        let reply: Value = client
            .get(format!("{base}/api/schema"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["status"], "success");
        assert!(reply["data"]["$defs"]["general"].is_object());

        // save a changed document
        let mut changed = reply["data"].clone();
        changed["title"] = Value::from("Edited");
        let reply: Value = client
            .post(format!("{base}/api/schema"))
            .json(&changed)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["status"], "success");

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["title"], "Edited");

        // finish shuts the server down
        let reply: Value = client
            .post(format!("{base}/api/finish"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["status"], "success");

        server.wait_finished().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_with_missing_file_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let server = SchemaServer::new(dir.path().join("absent.json"));
        let (addr, serving) = server.bind(([127, 0, 0, 1], 0).into()).unwrap();
        let handle = tokio::spawn(serving);

        let reply = reqwest::get(format!("http://{addr}/api/schema"))
            .await
            .unwrap();
        assert_eq!(reply.status().as_u16(), 404);
        let body: Value = reply.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("not found"));

        handle.abort();
    }
}
