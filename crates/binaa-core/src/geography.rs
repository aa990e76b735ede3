//! # Geography
//!
//! The administrative hierarchy used for location-based access control.
//!
//! ```text
//!   Governorate (Sana'a)
//!       └── District (Shu'ub)
//!             └── SubDistrict
//!                   └── Neighborhood
//! ```
//!
//! A user's [`GeographicAssignment`]s name roots in this tree. Expanding the
//! roots to every active descendant gives the user's [`GeographicScope`].
//! The scope is derived per request and never persisted.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Hierarchy Level
// =============================================================================

/// A level of the administrative hierarchy, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GeoLevel {
    Governorate,
    District,
    SubDistrict,
    Neighborhood,
}

impl GeoLevel {
    /// All levels, outermost first.
    pub const ALL: [GeoLevel; 4] = [
        GeoLevel::Governorate,
        GeoLevel::District,
        GeoLevel::SubDistrict,
        GeoLevel::Neighborhood,
    ];

    /// Column holding this level's identifier on synchronized tables and
    /// on assignments.
    pub const fn column(&self) -> &'static str {
        match self {
            GeoLevel::Governorate => "governorate_id",
            GeoLevel::District => "district_id",
            GeoLevel::SubDistrict => "sub_district_id",
            GeoLevel::Neighborhood => "neighborhood_id",
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::Governorate => "governorate",
            GeoLevel::District => "district",
            GeoLevel::SubDistrict => "sub_district",
            GeoLevel::Neighborhood => "neighborhood",
        }
    }
}

impl std::fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Assignment
// =============================================================================

/// Grants a user access to a subtree of the hierarchy.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GeographicAssignment {
    pub id: String,
    pub user_id: String,
    pub governorate_id: Option<String>,
    pub district_id: Option<String>,
    pub sub_district_id: Option<String>,
    pub neighborhood_id: Option<String>,

    /// Free-form label ("primary", "temporary", ...).
    pub assignment_type: String,

    #[ts(as = "String")]
    pub start_date: DateTime<Utc>,

    /// Open-ended when `None`.
    #[ts(as = "Option<String>")]
    pub end_date: Option<DateTime<Utc>>,

    pub is_active: bool,
}

impl GeographicAssignment {
    /// Active, started, and not yet ended at `now`.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && self.end_date.map_or(true, |end| end > now)
    }

    /// The most specific non-empty location on the assignment.
    ///
    /// Returns `None` when the assignment names no location at all.
    pub fn root(&self) -> Option<(GeoLevel, &str)> {
        GeoLevel::ALL.iter().rev().find_map(|level| {
            let value = match level {
                GeoLevel::Governorate => &self.governorate_id,
                GeoLevel::District => &self.district_id,
                GeoLevel::SubDistrict => &self.sub_district_id,
                GeoLevel::Neighborhood => &self.neighborhood_id,
            };
            value
                .as_deref()
                .filter(|id| !id.trim().is_empty())
                .map(|id| (*level, id))
        })
    }
}

// =============================================================================
// Scope
// =============================================================================

/// The full set of location identifiers a user may see, per level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographicScope {
    pub governorates: BTreeSet<String>,
    pub districts: BTreeSet<String>,
    pub sub_districts: BTreeSet<String>,
    pub neighborhoods: BTreeSet<String>,
}

impl GeographicScope {
    /// Zero access.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds an identifier at a level. Duplicates are ignored.
    pub fn insert(&mut self, level: GeoLevel, id: impl Into<String>) -> bool {
        self.set_mut(level).insert(id.into())
    }

    pub fn contains(&self, level: GeoLevel, id: &str) -> bool {
        self.ids(level).contains(id)
    }

    pub fn ids(&self, level: GeoLevel) -> &BTreeSet<String> {
        match level {
            GeoLevel::Governorate => &self.governorates,
            GeoLevel::District => &self.districts,
            GeoLevel::SubDistrict => &self.sub_districts,
            GeoLevel::Neighborhood => &self.neighborhoods,
        }
    }

    fn set_mut(&mut self, level: GeoLevel) -> &mut BTreeSet<String> {
        match level {
            GeoLevel::Governorate => &mut self.governorates,
            GeoLevel::District => &mut self.districts,
            GeoLevel::SubDistrict => &mut self.sub_districts,
            GeoLevel::Neighborhood => &mut self.neighborhoods,
        }
    }

    /// Unions another scope into this one.
    pub fn merge(&mut self, other: GeographicScope) {
        self.governorates.extend(other.governorates);
        self.districts.extend(other.districts);
        self.sub_districts.extend(other.sub_districts);
        self.neighborhoods.extend(other.neighborhoods);
    }

    pub fn is_empty(&self) -> bool {
        GeoLevel::ALL.iter().all(|level| self.ids(*level).is_empty())
    }

    /// Number of identifiers across all levels.
    pub fn len(&self) -> usize {
        GeoLevel::ALL.iter().map(|level| self.ids(*level).len()).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
