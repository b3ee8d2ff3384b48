use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::index::SearchIndex;
use crate::matching::MatchQueue;
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::store::images::ImageStore;
use crate::types::User;

/// Bearer tokens resolved recently. Users never change after registration.
const TOKEN_CACHE_SIZE: usize = 4096;

pub type TokenCache = Arc<Mutex<LruCache<String, User>>>;

/// The shared application state.
///
/// Cloned into every handler and middleware; all fields are cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// Per-endpoint limits on top of the global per-IP limit.
    pub rate_limiter: EndpointRateLimiter,
    pub catalog: Catalog,
    pub match_queue: MatchQueue,
    pub token_cache: TokenCache,
}

impl AppState {
    /// Builds the state and returns the receiving end of the match queue,
    /// which the caller hands to a [`crate::matching::MatchWorker`].
    pub fn new(
        db: sqlx::SqlitePool,
        config: AppConfig,
        images: Arc<dyn ImageStore>,
    ) -> (Self, tokio::sync::mpsc::Receiver<crate::matching::MatchTask>) {
        let metrics = Metrics::new();
        let (match_queue, rx) = MatchQueue::bounded(config.matching.queue_capacity, metrics.clone());
        let index = SearchIndex::new(&config.search);
        let catalog = Catalog::new(db.clone(), &config, index, images, match_queue.clone(), metrics.clone());

        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("POST /users", 20, 60),   // registrations per minute
            ("POST /users/login", 30, 60), // login attempts per minute
            ("POST /items", 60, 60),   // new reports per minute
            ("GET /items", 600, 60),   // searches per minute
            ("POST /images", 60, 60),  // uploads per minute
        ]);

        let cache_size = NonZeroUsize::new(TOKEN_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        let state = Self {
            db,
            config: Arc::new(config),
            metrics,
            rate_limiter,
            catalog,
            match_queue,
            token_cache: Arc::new(Mutex::new(LruCache::new(cache_size))),
        };
        (state, rx)
    }
}
