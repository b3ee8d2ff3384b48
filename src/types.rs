use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a report describes something lost or something found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Lost,
    Found,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Lost => "lost",
            ItemKind::Found => "found",
        }
    }

    /// The kind a report has to be matched against.
    pub fn opposite(self) -> Self {
        match self {
            ItemKind::Lost => ItemKind::Found,
            ItemKind::Found => ItemKind::Lost,
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lost" => Ok(ItemKind::Lost),
            "found" => Ok(ItemKind::Found),
            other => Err(format!("unknown kind '{}', expected lost or found", other)),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Electronics,
    Documents,
    Pets,
    Keys,
    Wallets,
    Clothing,
    Jewelry,
    Bags,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Electronics,
        Category::Documents,
        Category::Pets,
        Category::Keys,
        Category::Wallets,
        Category::Clothing,
        Category::Jewelry,
        Category::Bags,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Electronics => "electronics",
            Category::Documents => "documents",
            Category::Pets => "pets",
            Category::Keys => "keys",
            Category::Wallets => "wallets",
            Category::Clothing => "clothing",
            Category::Jewelry => "jewelry",
            Category::Bags => "bags",
            Category::Other => "other",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown category '{}'", s.trim()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an item.
///
/// ```text
/// open ──► matched ──► claimed ──► closed
///   │         │                      ▲
///   └─────────┴──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Open,
    Matched,
    Claimed,
    Closed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Open => "open",
            ItemStatus::Matched => "matched",
            ItemStatus::Claimed => "claimed",
            ItemStatus::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, target: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, target),
            (Open, Matched) | (Open, Closed) | (Matched, Claimed) | (Matched, Closed) | (Claimed, Closed)
        )
    }

    /// Statuses whose match candidates are no longer actionable.
    pub fn invalidates_matches(self) -> bool {
        matches!(self, ItemStatus::Claimed | ItemStatus::Closed)
    }

    /// Statuses that still take part in matching.
    pub fn is_matchable(self) -> bool {
        matches!(self, ItemStatus::Open | ItemStatus::Matched)
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(ItemStatus::Open),
            "matched" => Ok(ItemStatus::Matched),
            "claimed" => Ok(ItemStatus::Claimed),
            "closed" => Ok(ItemStatus::Closed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point on the earth in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Where an item was lost or found: coordinates, a place name, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub place: Option<String>,
}

impl Location {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self { latitude: Some(latitude), longitude: Some(longitude), place: None }
    }

    pub fn named(place: impl Into<String>) -> Self {
        Self { latitude: None, longitude: None, place: Some(place.into()) }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }

    pub fn place_name(&self) -> Option<&str> {
        self.place.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// A reference to an uploaded image, owned by exactly one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub storage_key: String,
    pub item_id: Uuid,
    pub content_hash: String,
    pub position: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Image reference as submitted by a client when creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpload {
    pub storage_key: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub kind: ItemKind,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub location: Location,
    pub contact: Option<String>,
    pub status: ItemStatus,
    pub matched_with: Option<Uuid>,
    pub owner_id: Uuid,
    pub images: Vec<ImageRef>,
    pub reported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// Unvalidated input for a new report. Validation happens in the catalog so
/// every offending field is reported at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDraft {
    pub kind: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: Option<Location>,
    pub contact: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageUpload>,
}

/// Editable subset of an item. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    pub category: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<Location>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub target_status: String,
    #[serde(default)]
    pub counterpart_id: Option<Uuid>,
}

/// Compact listing row returned by searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: Uuid,
    pub kind: ItemKind,
    pub category: Category,
    pub title: String,
    pub status: ItemStatus,
    pub location: Location,
    pub reported_at: DateTime<Utc>,
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl ItemSummary {
    pub fn from_item(item: &Item, distance_km: Option<f64>) -> Self {
        Self {
            id: item.id,
            kind: item.kind,
            category: item.category,
            title: item.title.clone(),
            status: item.status,
            location: item.location.clone(),
            reported_at: item.reported_at,
            thumbnail: item.images.first().map(|i| i.storage_key.clone()),
            distance_km,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<ItemSummary>,
    pub next_page_token: Option<String>,
}

/// A scored pairing of one lost and one found item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub lost_id: Uuid,
    pub found_id: Uuid,
    pub score: f64,
    pub generated_at: DateTime<Utc>,
    pub stale: bool,
}

impl MatchCandidate {
    /// The item on the other side of the pair from `item_id`.
    pub fn counterpart_of(&self, item_id: Uuid) -> Uuid {
        if self.lost_id == item_id {
            self.found_id
        } else {
            self.lost_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Login name, unique and lowercase.
    pub username: String,
    pub display_name: String,
    pub contact: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Owners may modify their own items; admins may modify any.
    pub fn may_modify(&self, item: &Item) -> bool {
        self.is_admin() || item.owner_id == self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub contact: Option<String>,
    /// Grants the admin role when it equals `security.admin_secret`.
    #[serde(default)]
    pub admin_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Returned by registration, login and password changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}
