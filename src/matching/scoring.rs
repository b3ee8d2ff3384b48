//! Similarity scoring between a lost and a found report.

use crate::config::MatchingConfig;
use crate::geo::haversine_km;
use crate::index::text::{item_terms, jaccard};
use crate::types::Item;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("item {0} has non-finite coordinates")]
    NonFiniteCoordinate(uuid::Uuid),
    #[error("items {0} and {1} are of the same kind")]
    SameKind(uuid::Uuid, uuid::Uuid),
}

/// Component weights, normalised to sum to one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub category: f64,
    pub text: f64,
    pub location: f64,
}

impl Weights {
    pub fn normalized(category: f64, text: f64, location: f64) -> Self {
        let sum = category + text + location;
        if !(sum.is_finite() && sum > 0.0) {
            return Self { category: 1.0 / 3.0, text: 1.0 / 3.0, location: 1.0 / 3.0 };
        }
        Self { category: category / sum, text: text / sum, location: location / sum }
    }
}

/// Per-component values behind a score, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub category: f64,
    pub text: f64,
    pub proximity: f64,
    pub distance_km: Option<f64>,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct Scorer {
    weights: Weights,
    min_score: f64,
    radius_km: f64,
    decay_km: f64,
}

impl Scorer {
    pub fn from_config(cfg: &MatchingConfig) -> Self {
        Self {
            weights: Weights::normalized(cfg.category_weight, cfg.text_weight, cfg.location_weight),
            min_score: cfg.min_score,
            radius_km: cfg.radius_km,
            decay_km: cfg.distance_decay_km.max(f64::EPSILON),
        }
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    pub fn qualifies(&self, score: f64) -> bool {
        score >= self.min_score
    }

    /// Scores a pair. `Ok(None)` means the pair is outside the search radius.
    pub fn score(&self, a: &Item, b: &Item) -> Result<Option<ScoreBreakdown>, ScoreError> {
        if a.kind == b.kind {
            return Err(ScoreError::SameKind(a.id, b.id));
        }
        let ca = a.location.coordinate();
        let cb = b.location.coordinate();
        for (item, c) in [(a, ca), (b, cb)] {
            if let Some(c) = c {
                if !c.latitude.is_finite() || !c.longitude.is_finite() {
                    return Err(ScoreError::NonFiniteCoordinate(item.id));
                }
            }
        }

        let (proximity, distance_km) = match (ca, cb) {
            (Some(ca), Some(cb)) => {
                let d = haversine_km(&ca, &cb);
                if d > self.radius_km {
                    return Ok(None);
                }
                ((-d / self.decay_km).exp(), Some(d))
            }
            _ => match (a.location.place_name(), b.location.place_name()) {
                (Some(pa), Some(pb)) if pa.to_lowercase() == pb.to_lowercase() => (1.0, None),
                _ => (0.0, None),
            },
        };

        if a.category != b.category {
            return Ok(Some(ScoreBreakdown { category: 0.0, text: 0.0, proximity, distance_km, total: 0.0 }));
        }

        let text = jaccard(&item_terms(&a.title, &a.description), &item_terms(&b.title, &b.description));
        let w = self.weights;
        let total = (w.category + w.text * text + w.location * proximity).clamp(0.0, 1.0);
        Ok(Some(ScoreBreakdown { category: 1.0, text, proximity, distance_km, total }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, ItemKind, ItemStatus, Location};
    use chrono::Utc;
    use uuid::Uuid;

    fn cfg() -> MatchingConfig {
        crate::config::AppConfig::default().matching
    }

    fn item(kind: ItemKind, category: Category, title: &str, location: Location) -> Item {
        let now = Utc::now();
        Item {
            id: Uuid::new_v4(),
            kind,
            category,
            title: title.to_string(),
            description: String::new(),
            location,
            contact: None,
            status: ItemStatus::Open,
            matched_with: None,
            owner_id: Uuid::new_v4(),
            images: Vec::new(),
            reported_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn weights_are_normalised() {
        let w = Weights::normalized(3.0, 3.0, 4.0);
        assert!((w.category + w.text + w.location - 1.0).abs() < 1e-12);
        assert!((w.location - 0.4).abs() < 1e-12);
        let fallback = Weights::normalized(0.0, 0.0, 0.0);
        assert!((fallback.text - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn nearby_documents_score_above_threshold() {
        let s = Scorer::from_config(&cfg());
        let found = item(ItemKind::Found, Category::Documents, "Passport", Location::at(40.0, -73.0));
        let lost = item(ItemKind::Lost, Category::Documents, "Lost passport", Location::at(40.001, -73.001));
        let b = s.score(&found, &lost).unwrap().unwrap();
        assert!(b.distance_km.unwrap() < 0.2);
        assert!(s.qualifies(b.total), "score {:?}", b);
        assert!(b.total <= 1.0);
    }

    #[test]
    fn category_mismatch_scores_zero() {
        let s = Scorer::from_config(&cfg());
        let a = item(ItemKind::Found, Category::Keys, "keys", Location::at(40.0, -73.0));
        let b = item(ItemKind::Lost, Category::Pets, "keys", Location::at(40.0, -73.0));
        assert_eq!(s.score(&a, &b).unwrap().unwrap().total, 0.0);
    }

    #[test]
    fn outside_radius_is_excluded() {
        let s = Scorer::from_config(&cfg());
        let a = item(ItemKind::Found, Category::Keys, "keys", Location::at(40.0, -73.0));
        let b = item(ItemKind::Lost, Category::Keys, "keys", Location::at(41.0, -73.0));
        assert_eq!(s.score(&a, &b).unwrap(), None);
    }

    #[test]
    fn equal_place_names_count_as_close() {
        let s = Scorer::from_config(&cfg());
        let a = item(ItemKind::Found, Category::Bags, "blue backpack", Location::named("Central Station"));
        let b = item(ItemKind::Lost, Category::Bags, "backpack", Location::named("central station"));
        let r = s.score(&a, &b).unwrap().unwrap();
        assert_eq!(r.proximity, 1.0);
        assert!(s.qualifies(r.total));
    }

    #[test]
    fn rejects_bad_pairs() {
        let s = Scorer::from_config(&cfg());
        let a = item(ItemKind::Found, Category::Keys, "keys", Location::at(f64::NAN, 1.0));
        let b = item(ItemKind::Lost, Category::Keys, "keys", Location::at(1.0, 1.0));
        assert!(matches!(s.score(&a, &b), Err(ScoreError::NonFiniteCoordinate(_))));
        let c = item(ItemKind::Lost, Category::Keys, "keys", Location::at(1.0, 1.0));
        assert!(matches!(s.score(&b, &c), Err(ScoreError::SameKind(_, _))));
    }
}
