//! Search filters, validated once at the boundary.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::text::tokenize;
use crate::error::{AppResult, FieldErrors};
use crate::types::{Category, Coordinate, ItemKind, ItemStatus};

/// Upper bound for `radius_km` on a search.
pub const MAX_RADIUS_KM: f64 = 500.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchFilter {
    Kind(ItemKind),
    Categories(BTreeSet<Category>),
    Status(Vec<ItemStatus>),
    ReportedBetween { from: DateTime<Utc>, to: DateTime<Utc> },
    Near { center: Coordinate, radius_km: f64 },
    /// Every term must prefix-match a keyword of the item.
    Text(Vec<String>),
    Owner(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Distance,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Distance => "distance",
        }
    }
}

/// A validated query against the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub filters: Vec<SearchFilter>,
    pub sort: SortOrder,
    pub page_token: Option<String>,
    pub limit: Option<u32>,
}

impl SearchRequest {
    pub fn new(filters: Vec<SearchFilter>) -> Self {
        Self { filters, ..Default::default() }
    }

    pub fn sorted_by(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, page_token: Option<String>, limit: Option<u32>) -> Self {
        self.page_token = page_token;
        self.limit = limit;
        self
    }

    pub fn near(&self) -> Option<(Coordinate, f64)> {
        self.filters.iter().find_map(|f| match f {
            SearchFilter::Near { center, radius_km } => Some((*center, *radius_km)),
            _ => None,
        })
    }

    pub fn has_status_filter(&self) -> bool {
        self.filters.iter().any(|f| matches!(f, SearchFilter::Status(_)))
    }

    /// Checks combinations that only make sense together.
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        if self.sort == SortOrder::Distance && self.near().is_none() {
            errors.push("sort", "distance sort requires lat, lon and radius_km");
        }
        for f in &self.filters {
            match f {
                SearchFilter::Near { center, radius_km } => {
                    if !center.is_valid() {
                        errors.push("lat", "coordinates out of range");
                    }
                    if !radius_km.is_finite() || *radius_km <= 0.0 || *radius_km > MAX_RADIUS_KM {
                        errors.push("radius_km", format!("must be in (0, {}]", MAX_RADIUS_KM));
                    }
                }
                SearchFilter::ReportedBetween { from, to } if from > to => {
                    errors.push("date_from", "must not be after date_to");
                }
                SearchFilter::Text(terms) if terms.is_empty() => {
                    errors.push("q", "must contain at least one word of two or more characters");
                }
                SearchFilter::Categories(set) if set.is_empty() => {
                    errors.push("category", "must name at least one category");
                }
                SearchFilter::Status(set) if set.is_empty() => {
                    errors.push("status", "must name at least one status");
                }
                _ => {}
            }
        }
        errors.into_result()
    }
}

/// Query string accepted by `GET /items`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub kind: Option<String>,
    /// Comma separated list.
    pub category: Option<String>,
    /// Comma separated list.
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub page_token: Option<String>,
    pub limit: Option<u32>,
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts RFC 3339 timestamps or plain dates. A plain `date_to` covers the whole day.
fn parse_instant(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day { date.and_hms_milli_opt(23, 59, 59, 999)? } else { date.and_hms_opt(0, 0, 0)? };
    Some(time.and_utc())
}

impl TryFrom<SearchParams> for SearchRequest {
    type Error = crate::error::AppError;

    fn try_from(p: SearchParams) -> AppResult<Self> {
        let mut errors = FieldErrors::new();
        let mut filters = Vec::new();

        if let Some(kind) = p.kind.as_deref().filter(|k| !k.trim().is_empty()) {
            match kind.parse::<ItemKind>() {
                Ok(k) => filters.push(SearchFilter::Kind(k)),
                Err(e) => errors.push("kind", e),
            }
        }

        if let Some(raw) = p.category.as_deref() {
            let mut set = BTreeSet::new();
            for c in split_list(raw) {
                match c.parse::<Category>() {
                    Ok(c) => {
                        set.insert(c);
                    }
                    Err(e) => errors.push("category", e),
                }
            }
            if !set.is_empty() {
                filters.push(SearchFilter::Categories(set));
            }
        }

        if let Some(raw) = p.status.as_deref() {
            let mut statuses = Vec::new();
            for s in split_list(raw) {
                match s.parse::<ItemStatus>() {
                    Ok(s) if !statuses.contains(&s) => statuses.push(s),
                    Ok(_) => {}
                    Err(e) => errors.push("status", e),
                }
            }
            if !statuses.is_empty() {
                filters.push(SearchFilter::Status(statuses));
            }
        }

        let from = p.date_from.as_deref().map(|raw| (raw, parse_instant(raw, false)));
        let to = p.date_to.as_deref().map(|raw| (raw, parse_instant(raw, true)));
        if let Some((raw, None)) = from {
            errors.push("date_from", format!("'{}' is not a date or RFC 3339 timestamp", raw));
        }
        if let Some((raw, None)) = to {
            errors.push("date_to", format!("'{}' is not a date or RFC 3339 timestamp", raw));
        }
        let from = from.and_then(|(_, ts)| ts);
        let to = to.and_then(|(_, ts)| ts);
        if from.is_some() || to.is_some() {
            filters.push(SearchFilter::ReportedBetween {
                from: from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                to: to.unwrap_or(DateTime::<Utc>::MAX_UTC),
            });
        }

        match (p.lat, p.lon, p.radius_km) {
            (Some(lat), Some(lon), Some(radius_km)) => {
                filters.push(SearchFilter::Near { center: Coordinate::new(lat, lon), radius_km });
            }
            (None, None, None) => {}
            _ => errors.push("radius_km", "lat, lon and radius_km must be given together"),
        }

        if let Some(q) = p.q.as_deref().filter(|q| !q.trim().is_empty()) {
            filters.push(SearchFilter::Text(tokenize(q).into_iter().collect()));
        }

        let sort = match p.sort.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            None => SortOrder::Newest,
            Some(s) if s.is_empty() || s == "newest" => SortOrder::Newest,
            Some(s) if s == "distance" => SortOrder::Distance,
            Some(other) => {
                errors.push("sort", format!("unknown sort '{}', expected newest or distance", other));
                SortOrder::Newest
            }
        };

        if p.limit == Some(0) {
            errors.push("limit", "must be at least 1");
        }

        errors.into_result()?;
        let req = SearchRequest { filters, sort, page_token: p.page_token, limit: p.limit };
        req.validate()?;
        Ok(req)
    }
}
