//! Opaque page tokens.
//!
//! A token encodes the sort key and id of the last row a client has seen, so
//! the next page starts strictly after it. Inserts between two requests can
//! therefore never shift rows across a page boundary the way offsets do.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::filter::SortOrder;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "s", rename_all = "snake_case")]
pub enum PageCursor {
    Newest {
        #[serde(rename = "t")]
        reported_at_ms: i64,
        id: Uuid,
    },
    Distance {
        #[serde(rename = "d", with = "f64_bits")]
        distance_km: f64,
        id: Uuid,
    },
}

/// Distances travel as their IEEE-754 bit pattern. A decimal float can come
/// back one ULP off, which would repeat the last row of a page.
mod f64_bits {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl PageCursor {
    pub fn sort(&self) -> SortOrder {
        match self {
            PageCursor::Newest { .. } => SortOrder::Newest,
            PageCursor::Distance { .. } => SortOrder::Distance,
        }
    }

    pub fn encode(&self) -> String {
        // serializing a plain enum of numbers and a uuid cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a token issued for `sort`. Anything else is a validation error.
    pub fn decode(token: &str, sort: SortOrder) -> AppResult<Self> {
        let bad = || AppError::invalid("page_token", "malformed page token");
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| bad())?;
        let cursor: PageCursor = serde_json::from_slice(&bytes).map_err(|_| bad())?;
        if cursor.sort() != sort {
            return Err(AppError::invalid(
                "page_token",
                format!("page token was issued for {} sort", cursor.sort().as_str()),
            ));
        }
        if let PageCursor::Distance { distance_km, .. } = cursor {
            if !distance_km.is_finite() {
                return Err(bad());
            }
        }
        Ok(cursor)
    }
}
