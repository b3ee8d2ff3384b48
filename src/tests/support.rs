use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::accounts;
use crate::config::{AppConfig, SecurityConfig};
use crate::matching::{MatchTask, MatchWorker};
use crate::state::AppState;
use crate::store::images::{content_hash, new_storage_key, ImageStore};
use crate::types::{ImageUpload, Item, ItemDraft, Location, RegisterRequest, User};
use crate::{db, routes};

pub const ADMIN_SECRET: &str = "test-admin-secret";
pub const PASSWORD: &str = "hunter2-but-longer";

/// A unique login name derived from a display name.
pub fn username_for(name: &str) -> String {
    let stem: String = name.to_ascii_lowercase().chars().filter(|c| c.is_ascii_alphanumeric()).take(16).collect();
    format!("{}-{}", stem, &Uuid::new_v4().simple().to_string()[..8])
}

/// Image store kept in memory, with an adjustable artificial latency.
#[derive(Clone, Default)]
pub struct MemoryImageStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    delay: Arc<Mutex<Duration>>,
}

impl MemoryImageStore {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put(&self, bytes: &[u8], extension: Option<&str>) -> anyhow::Result<ImageUpload> {
        self.pause().await;
        let key = new_storage_key(extension);
        self.blobs.lock().unwrap().insert(key.clone(), bytes.to_vec());
        Ok(ImageUpload { storage_key: key, content_hash: content_hash(bytes) })
    }

    async fn get(&self, storage_key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.pause().await;
        Ok(self.blobs.lock().unwrap().get(storage_key).cloned())
    }

    async fn delete(&self, storage_key: &str) -> anyhow::Result<()> {
        self.pause().await;
        self.blobs.lock().unwrap().remove(storage_key);
        Ok(())
    }
}

/// A fully wired application on a throwaway database file.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub worker: MatchWorker,
    pub images: MemoryImageStore,
    pub match_rx: mpsc::Receiver<MatchTask>,
    _db_file: NamedTempFile,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.max_connections = 4;
    cfg.storage.image_timeout_ms = 200;
    cfg.storage.retry_attempts = 2;
    cfg.storage.retry_backoff_ms = 5;
    cfg.security = Some(SecurityConfig {
        enable_hsts: Some(false),
        hsts_max_age: None,
        hsts_include_subdomains: None,
        csp: None,
        admin_secret: Some(ADMIN_SECRET.to_string()),
    });
    cfg
}

pub async fn test_app() -> TestApp {
    test_app_with(test_config()).await
}

pub async fn test_app_with(mut config: AppConfig) -> TestApp {
    let db_file = NamedTempFile::new().unwrap();
    config.database.url = format!("sqlite:{}", db_file.path().display());
    let pool = db::connect(&config.database.url, config.database.max_connections).await.unwrap();
    db::init_db(&pool).await.unwrap();

    let images = MemoryImageStore::default();
    let matching = config.matching.clone();
    let (state, match_rx) = AppState::new(pool.clone(), config, Arc::new(images.clone()));
    let worker = MatchWorker::new(pool, &matching, state.match_queue.clone(), state.metrics.clone());
    let router = routes::router(state.clone());
    TestApp { state, router, worker, images, match_rx, _db_file: db_file }
}

impl TestApp {
    pub async fn user(&self, name: &str) -> (User, String) {
        let resp = accounts::register(
            &self.state.db,
            self.state.config.security.as_ref(),
            RegisterRequest {
                username: username_for(name),
                password: PASSWORD.to_string(),
                display_name: name.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (resp.user, resp.token)
    }

    pub async fn admin(&self) -> (User, String) {
        let resp = accounts::register(
            &self.state.db,
            self.state.config.security.as_ref(),
            RegisterRequest {
                username: username_for("desk"),
                password: PASSWORD.to_string(),
                display_name: "Front desk".to_string(),
                contact: None,
                admin_secret: Some(ADMIN_SECRET.to_string()),
            },
        )
        .await
        .unwrap();
        (resp.user, resp.token)
    }

    pub async fn create(&self, owner: &User, draft: ItemDraft) -> Item {
        self.state.catalog.create_item(owner, draft).await.unwrap()
    }

    /// Empties the match queue without running passes.
    pub fn drain_queue(&mut self) -> Vec<Uuid> {
        let mut ids = Vec::new();
        while let Ok(task) = self.match_rx.try_recv() {
            self.state.metrics.task_dequeued();
            ids.push(task.item_id);
        }
        ids
    }

    /// Sends a request through the router and returns status and JSON body
    /// (`Value::Null` for empty bodies).
    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }
}

pub fn draft(kind: &str, category: &str, title: &str, description: &str, location: Location) -> ItemDraft {
    ItemDraft {
        kind: Some(kind.to_string()),
        category: Some(category.to_string()),
        title: title.to_string(),
        description: description.to_string(),
        location: Some(location),
        contact: None,
        images: Vec::new(),
    }
}

/// Field names of a validation error, panicking on anything else.
pub fn invalid_fields(err: crate::error::AppError) -> Vec<String> {
    match err {
        crate::error::AppError::Validation { fields } => fields.into_iter().map(|f| f.field).collect(),
        other => panic!("expected validation error, got {:?}", other),
    }
}
