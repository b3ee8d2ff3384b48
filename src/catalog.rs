//! Item catalog: the only writer of item records.
//!
//! Every write validates its input in full, runs under the per-item lock,
//! checks the stored version and updates the search index inside the same
//! transaction. Matching work is handed to the queue only after commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult, FieldErrors, OptionExt};
use crate::index::filter::{SearchFilter, SearchRequest};
use crate::index::SearchIndex;
use crate::matching::{self, MatchQueue, RankedMatch};
use crate::metrics::Metrics;
use crate::store::images::{
    content_hash, content_type_for, extension_for, is_valid_content_hash, is_valid_storage_key, ImageStore,
};
use crate::store::retry::{with_retry, with_timeout, RetryPolicy};
use crate::store::{self, items, matches};
use crate::types::{
    Category, ImageRef, ImageUpload, Item, ItemDraft, ItemKind, ItemPage, ItemPatch, ItemStatus, ItemSummary,
    Location, StatusChangeRequest, User,
};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 5000;
pub const MAX_PLACE_CHARS: usize = 200;
pub const MAX_CONTACT_CHARS: usize = 200;
pub const MAX_IMAGES: usize = 10;

/// Lock entries are pruned once the map grows past this.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per item id.
#[derive(Clone, Default)]
struct ItemLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl ItemLocks {
    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            if map.len() > LOCK_PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(id).or_default().clone()
        };
        entry.lock_owned().await
    }
}

fn required_text(errors: &mut FieldErrors, field: &str, value: &str, max: usize) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.push(field, "must not be empty");
    } else if value.chars().count() > max {
        errors.push(field, format!("must be at most {} characters", max));
    }
    value.to_string()
}

fn optional_text(errors: &mut FieldErrors, field: &str, value: Option<&str>, max: usize) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    if value.chars().count() > max {
        errors.push(field, format!("must be at most {} characters", max));
    }
    Some(value.to_string())
}

fn validate_location(errors: &mut FieldErrors, location: Option<&Location>) -> Location {
    let Some(loc) = location else {
        errors.push("location", "coordinates or a place name are required");
        return Location::default();
    };
    let place = optional_text(errors, "location.place", loc.place.as_deref(), MAX_PLACE_CHARS);
    match (loc.latitude, loc.longitude) {
        (Some(lat), Some(lon)) => {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                errors.push("location.latitude", "must be between -90 and 90");
            }
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                errors.push("location.longitude", "must be between -180 and 180");
            }
        }
        (None, None) if place.is_some() => {}
        (None, None) => errors.push("location", "coordinates or a place name are required"),
        _ => errors.push("location", "latitude and longitude must be given together"),
    }
    Location { latitude: loc.latitude, longitude: loc.longitude, place }
}

fn parse_category(errors: &mut FieldErrors, raw: &str) -> Category {
    raw.parse().unwrap_or_else(|e: String| {
        errors.push("category", e);
        Category::Other
    })
}

fn validate_images(errors: &mut FieldErrors, images: &[ImageUpload]) {
    if images.len() > MAX_IMAGES {
        errors.push("images", format!("at most {} images per item", MAX_IMAGES));
    }
    let mut seen = HashSet::new();
    for (i, img) in images.iter().enumerate() {
        if !is_valid_storage_key(&img.storage_key) {
            errors.push(&format!("images[{}].storage_key", i), "invalid storage key");
        }
        let hash = img.content_hash.to_ascii_lowercase();
        if !is_valid_content_hash(&hash) {
            errors.push(&format!("images[{}].content_hash", i), "must be a hex SHA-256 digest");
        } else if !seen.insert(hash) {
            errors.push(&format!("images[{}].content_hash", i), "duplicate image");
        }
    }
}

#[derive(Clone)]
pub struct Catalog {
    db: SqlitePool,
    index: SearchIndex,
    images: Arc<dyn ImageStore>,
    queue: MatchQueue,
    metrics: Metrics,
    retry: RetryPolicy,
    image_timeout: Duration,
    max_image_bytes: usize,
    locks: ItemLocks,
}

impl Catalog {
    pub fn new(
        db: SqlitePool,
        config: &AppConfig,
        index: SearchIndex,
        images: Arc<dyn ImageStore>,
        queue: MatchQueue,
        metrics: Metrics,
    ) -> Self {
        Self {
            db,
            index,
            images,
            queue,
            metrics,
            retry: RetryPolicy::from_config(&config.storage),
            image_timeout: Duration::from_millis(config.storage.image_timeout_ms),
            max_image_bytes: config.storage.max_image_bytes,
            locks: ItemLocks::default(),
        }
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Stores raw image bytes and returns the reference to attach to an item.
    /// An image `content_type` is kept as the key's extension.
    pub async fn upload_image(&self, bytes: &[u8], content_type: Option<&str>) -> AppResult<ImageUpload> {
        if bytes.is_empty() {
            return Err(AppError::invalid("image", "must not be empty"));
        }
        if bytes.len() > self.max_image_bytes {
            return Err(AppError::invalid("image", format!("must be at most {} bytes", self.max_image_bytes)));
        }
        let extension = content_type.and_then(extension_for);
        let upload = with_retry(&self.retry, "image upload", move || {
            with_timeout(self.image_timeout, "image upload", self.images.put(bytes, extension))
        })
        .await?;
        self.metrics.inc_images_uploaded();
        Ok(upload)
    }

    /// Image bytes and the content type they are served with.
    pub async fn fetch_image(&self, storage_key: &str) -> AppResult<(Vec<u8>, String)> {
        if !is_valid_storage_key(storage_key) {
            return Err(AppError::NotFound("Image not found".to_string()));
        }
        let bytes = self.read_image(storage_key).await?.ok_or_not_found("Image")?;
        Ok((bytes, content_type_for(storage_key)))
    }

    async fn read_image(&self, storage_key: &str) -> AppResult<Option<Vec<u8>>> {
        with_retry(&self.retry, "image read", move || {
            with_timeout(self.image_timeout, "image read", self.images.get(storage_key))
        })
        .await
    }

    /// Checks every referenced blob against the store and returns the content
    /// hashes computed from the stored bytes. Unknown keys, hashes that do not
    /// match and keys already attached to an item are field errors; an
    /// unreachable store rejects the whole write.
    async fn verify_images(&self, errors: &mut FieldErrors, images: &[ImageUpload]) -> AppResult<Vec<String>> {
        let mut hashes = Vec::with_capacity(images.len());
        for (i, img) in images.iter().enumerate() {
            match self.read_image(&img.storage_key).await? {
                Some(bytes) => {
                    let actual = content_hash(&bytes);
                    if !actual.eq_ignore_ascii_case(&img.content_hash) {
                        errors.push(&format!("images[{}].content_hash", i), "does not match the stored image");
                    }
                    hashes.push(actual);
                }
                None => {
                    errors.push(&format!("images[{}].storage_key", i), "no uploaded image with this key");
                    hashes.push(String::new());
                }
            }
        }

        let keys: Vec<&str> = images.iter().map(|img| img.storage_key.as_str()).collect();
        let mut conn = self.db.acquire().await?;
        let attached = items::attached_image_keys(&mut conn, &keys).await?;
        for (i, key) in keys.iter().enumerate() {
            if attached.iter().any(|a| a == key) {
                errors.push(&format!("images[{}].storage_key", i), "is already attached to an item");
            }
        }
        Ok(hashes)
    }

    pub async fn create_item(&self, owner: &User, draft: ItemDraft) -> AppResult<Item> {
        let mut errors = FieldErrors::new();
        let kind = match draft.kind.as_deref() {
            Some(raw) => raw.parse::<ItemKind>().map_err(|e| errors.push("kind", e)).ok(),
            None => {
                errors.push("kind", "is required");
                None
            }
        };
        let category = match draft.category.as_deref() {
            Some(raw) => parse_category(&mut errors, raw),
            None => {
                errors.push("category", "is required");
                Category::Other
            }
        };
        let title = required_text(&mut errors, "title", &draft.title, MAX_TITLE_CHARS);
        let description = required_text(&mut errors, "description", &draft.description, MAX_DESCRIPTION_CHARS);
        let location = validate_location(&mut errors, draft.location.as_ref());
        let contact = optional_text(&mut errors, "contact", draft.contact.as_deref(), MAX_CONTACT_CHARS);
        validate_images(&mut errors, &draft.images);
        let hashes = if errors.is_empty() { self.verify_images(&mut errors, &draft.images).await? } else { Vec::new() };
        errors.into_result()?;
        let kind = kind.ok_or_else(|| AppError::invalid("kind", "is required"))?;

        let now = store::now();
        let id = Uuid::new_v4();
        let images: Vec<ImageRef> = draft
            .images
            .iter()
            .zip(hashes)
            .enumerate()
            .map(|(i, (img, hash))| ImageRef {
                storage_key: img.storage_key.clone(),
                item_id: id,
                content_hash: hash,
                position: i as i64,
                uploaded_at: now,
            })
            .collect();
        let item = Item {
            id,
            kind,
            category,
            title,
            description,
            location,
            contact,
            status: ItemStatus::Open,
            matched_with: None,
            owner_id: owner.id,
            images,
            reported_at: now,
            updated_at: now,
            version: 1,
        };

        let mut tx = self.db.begin().await?;
        items::insert_item(&mut tx, &item).await?;
        items::insert_images(&mut tx, &item.images).await?;
        self.index.upsert(&mut tx, &item).await?;
        tx.commit().await?;

        self.metrics.inc_items_created();
        tracing::info!(item_id = %item.id, kind = %item.kind, category = %item.category, "item created");
        self.queue.enqueue(item.id);
        Ok(item)
    }

    pub async fn get_item(&self, id: Uuid) -> AppResult<Item> {
        let mut conn = self.db.acquire().await?;
        items::fetch_item(&mut conn, id).await?.ok_or_not_found("Item")
    }

    pub async fn update_item(&self, actor: &User, id: Uuid, patch: ItemPatch) -> AppResult<Item> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.db.begin().await?;
        let mut item = items::fetch_item(&mut tx, id).await?.ok_or_not_found("Item")?;
        if !actor.may_modify(&item) {
            return Err(AppError::Forbidden("only the owner may edit this item".to_string()));
        }

        let mut errors = FieldErrors::new();
        if item.status == ItemStatus::Closed {
            errors.push("status", "closed items cannot be edited");
        }
        if let Some(raw) = patch.category.as_deref() {
            item.category = parse_category(&mut errors, raw);
        }
        if let Some(title) = patch.title.as_deref() {
            item.title = required_text(&mut errors, "title", title, MAX_TITLE_CHARS);
        }
        if let Some(description) = patch.description.as_deref() {
            item.description = required_text(&mut errors, "description", description, MAX_DESCRIPTION_CHARS);
        }
        if let Some(location) = patch.location.as_ref() {
            item.location = validate_location(&mut errors, Some(location));
        }
        if let Some(contact) = patch.contact.as_deref() {
            item.contact = optional_text(&mut errors, "contact", Some(contact), MAX_CONTACT_CHARS);
        }
        errors.into_result()?;

        let expected = item.version;
        item.updated_at = store::now();
        if !items::update_fields(&mut tx, &item, expected).await? {
            return Err(AppError::Conflict(format!("item {} was modified concurrently", id)));
        }
        item.version = expected + 1;
        self.index.upsert(&mut tx, &item).await?;
        tx.commit().await?;

        self.metrics.inc_items_updated();
        tracing::info!(item_id = %id, version = item.version, "item updated");
        if item.status.is_matchable() {
            self.queue.enqueue(id);
        }
        Ok(item)
    }

    pub async fn transition_status(&self, actor: &User, id: Uuid, req: StatusChangeRequest) -> AppResult<Item> {
        let target: ItemStatus = req.target_status.parse().map_err(|e: String| AppError::invalid("target_status", e))?;

        let _guard = self.locks.lock(id).await;
        let mut tx = self.db.begin().await?;
        let mut item = items::fetch_item(&mut tx, id).await?.ok_or_not_found("Item")?;
        if !actor.may_modify(&item) {
            return Err(AppError::Forbidden("only the owner may change the status of this item".to_string()));
        }
        if !item.status.can_transition_to(target) {
            return Err(AppError::InvalidTransition { from: item.status, to: target });
        }

        let matched_with = if target == ItemStatus::Matched {
            let counterpart_id = req
                .counterpart_id
                .ok_or_else(|| AppError::invalid("counterpart_id", "required when entering matched"))?;
            let counterpart = items::fetch_item(&mut tx, counterpart_id)
                .await?
                .ok_or_else(|| AppError::invalid("counterpart_id", "no item with this id"))?;
            if counterpart.kind != item.kind.opposite() {
                return Err(AppError::invalid(
                    "counterpart_id",
                    format!("counterpart must be a {} item", item.kind.opposite()),
                ));
            }
            Some(counterpart_id)
        } else {
            if req.counterpart_id.is_some() {
                return Err(AppError::invalid("counterpart_id", "only allowed when entering matched"));
            }
            item.matched_with
        };

        let expected = item.version;
        let now = store::now();
        if !items::update_status(&mut tx, id, target, matched_with, now, expected).await? {
            return Err(AppError::Conflict(format!("item {} was modified concurrently", id)));
        }
        let from = item.status;
        item.status = target;
        item.matched_with = matched_with;
        item.updated_at = now;
        item.version = expected + 1;
        self.index.upsert(&mut tx, &item).await?;
        let staled = if target.invalidates_matches() { matches::mark_stale(&mut tx, id).await? } else { 0 };
        tx.commit().await?;

        self.metrics.inc_status_transitions();
        tracing::info!(item_id = %id, %from, to = %target, staled, "item status changed");
        Ok(item)
    }

    /// Removes an item with its images. Candidates stay, flagged stale.
    pub async fn delete_item(&self, actor: &User, id: Uuid) -> AppResult<()> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.db.begin().await?;
        let item = items::fetch_item(&mut tx, id).await?.ok_or_not_found("Item")?;
        if !actor.may_modify(&item) {
            return Err(AppError::Forbidden("only the owner may delete this item".to_string()));
        }
        self.index.remove(&mut tx, id).await?;
        let staled = matches::mark_stale(&mut tx, id).await?;
        items::delete_item(&mut tx, id).await?;
        tx.commit().await?;

        for image in &item.images {
            let key = image.storage_key.as_str();
            if let Err(e) = with_timeout(self.image_timeout, "image delete", self.images.delete(key)).await {
                tracing::warn!(item_id = %id, storage_key = key, "failed to delete image blob: {}", e);
            }
        }

        self.metrics.inc_items_deleted();
        tracing::info!(item_id = %id, images = item.images.len(), staled, "item deleted");
        Ok(())
    }

    /// Runs a search and resolves the hits to summaries.
    pub async fn search(&self, req: &SearchRequest) -> AppResult<ItemPage> {
        let mut conn = self.db.acquire().await?;
        let page = self.index.query(&mut conn, req).await?;
        let ids: Vec<Uuid> = page.hits.iter().map(|h| h.item_id).collect();
        let found = items::fetch_items(&mut conn, &ids).await?;
        self.metrics.inc_searches();

        let items = page
            .hits
            .iter()
            .filter_map(|hit| {
                found.iter().find(|i| i.id == hit.item_id).map(|i| ItemSummary::from_item(i, hit.distance_km))
            })
            .collect();
        Ok(ItemPage { items, next_page_token: page.next_page_token })
    }

    /// The caller's own items in every status, newest first.
    pub async fn list_owner_items(
        &self,
        owner: &User,
        page_token: Option<String>,
        limit: Option<u32>,
    ) -> AppResult<ItemPage> {
        let req = SearchRequest::new(vec![
            SearchFilter::Owner(owner.id),
            SearchFilter::Status(vec![ItemStatus::Open, ItemStatus::Matched, ItemStatus::Claimed, ItemStatus::Closed]),
        ])
        .with_page(page_token, limit);
        self.search(&req).await
    }

    pub async fn matches_for(&self, id: Uuid) -> AppResult<Vec<RankedMatch>> {
        let mut conn = self.db.acquire().await?;
        matching::matches_for(&mut conn, id).await
    }

    /// Flags an item for matching and queues a pass. Returns whether the task
    /// was queued right away; otherwise the sweep will pick it up.
    pub async fn refresh_matches(&self, actor: &User, id: Uuid) -> AppResult<bool> {
        let item = self.get_item(id).await?;
        if !actor.may_modify(&item) {
            return Err(AppError::Forbidden("only the owner may refresh matches".to_string()));
        }
        if !item.status.is_matchable() {
            return Err(AppError::invalid("status", format!("{} items do not take part in matching", item.status)));
        }
        let mut conn = self.db.acquire().await?;
        items::mark_match_pending(&mut conn, id).await?;
        Ok(self.queue.enqueue(id))
    }
}
