//! # Geography Repository
//!
//! The administrative hierarchy and user assignments.
//!
//! ## Descendant Queries
//! ```text
//! root = Governorate G
//!   districts      : districts d                                 WHERE d.governorate_id = G
//!   sub_districts  : sub_districts s JOIN districts d            WHERE d.governorate_id = G
//!   neighborhoods  : neighborhoods n JOIN sub_districts s
//!                                    JOIN districts d            WHERE d.governorate_id = G
//! ```
//! Every entity along the path must be active: an inactive district hides
//! its whole subtree.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{db_timestamp, opt_timestamp};
use binaa_core::{GeoLevel, GeographicAssignment, GeographicScope};

const ASSIGNMENT_COLUMNS: &str = "id, user_id, governorate_id, district_id, sub_district_id, \
     neighborhood_id, assignment_type, start_date, end_date, is_active";

fn level_table(level: GeoLevel) -> &'static str {
    match level {
        GeoLevel::Governorate => "governorates",
        GeoLevel::District => "districts",
        GeoLevel::SubDistrict => "sub_districts",
        GeoLevel::Neighborhood => "neighborhoods",
    }
}

/// Parent column of a level's table. Governorates have none.
fn parent_column(level: GeoLevel) -> Option<&'static str> {
    match level {
        GeoLevel::Governorate => None,
        GeoLevel::District => Some("governorate_id"),
        GeoLevel::SubDistrict => Some("district_id"),
        GeoLevel::Neighborhood => Some("sub_district_id"),
    }
}

/// Active descendants of a root at each deeper level.
///
/// `(level, sql)` pairs; every query binds the root id as `?1`.
fn descendant_queries(root: GeoLevel) -> Vec<(GeoLevel, &'static str)> {
    match root {
        GeoLevel::Governorate => vec![
            (
                GeoLevel::District,
                "SELECT d.id FROM districts d \
                 WHERE d.governorate_id = ?1 AND d.is_active = 1",
            ),
            (
                GeoLevel::SubDistrict,
                "SELECT s.id FROM sub_districts s \
                 JOIN districts d ON s.district_id = d.id \
                 WHERE d.governorate_id = ?1 AND d.is_active = 1 AND s.is_active = 1",
            ),
            (
                GeoLevel::Neighborhood,
                "SELECT n.id FROM neighborhoods n \
                 JOIN sub_districts s ON n.sub_district_id = s.id \
                 JOIN districts d ON s.district_id = d.id \
                 WHERE d.governorate_id = ?1 AND d.is_active = 1 \
                   AND s.is_active = 1 AND n.is_active = 1",
            ),
        ],
        GeoLevel::District => vec![
            (
                GeoLevel::SubDistrict,
                "SELECT s.id FROM sub_districts s \
                 WHERE s.district_id = ?1 AND s.is_active = 1",
            ),
            (
                GeoLevel::Neighborhood,
                "SELECT n.id FROM neighborhoods n \
                 JOIN sub_districts s ON n.sub_district_id = s.id \
                 WHERE s.district_id = ?1 AND s.is_active = 1 AND n.is_active = 1",
            ),
        ],
        GeoLevel::SubDistrict => vec![(
            GeoLevel::Neighborhood,
            "SELECT n.id FROM neighborhoods n \
             WHERE n.sub_district_id = ?1 AND n.is_active = 1",
        )],
        GeoLevel::Neighborhood => Vec::new(),
    }
}

/// Repository for hierarchy and assignment operations.
#[derive(Debug, Clone)]
pub struct GeographyRepository {
    pool: SqlitePool,
}

impl GeographyRepository {
    /// Creates a new GeographyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        GeographyRepository { pool }
    }

    /// Inserts a hierarchy entity. `parent_id` is ignored for governorates.
    pub async fn insert_entity(
        &self,
        level: GeoLevel,
        id: &str,
        parent_id: Option<&str>,
        name: &str,
    ) -> DbResult<()> {
        let table = level_table(level);
        match parent_column(level) {
            Some(parent) => {
                let sql = format!("INSERT INTO {table} (id, {parent}, name) VALUES (?1, ?2, ?3)");
                sqlx::query(&sql)
                    .bind(id)
                    .bind(parent_id)
                    .bind(name)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                let sql = format!("INSERT INTO {table} (id, name) VALUES (?1, ?2)");
                sqlx::query(&sql)
                    .bind(id)
                    .bind(name)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Activates or deactivates a hierarchy entity.
    pub async fn set_entity_active(&self, level: GeoLevel, id: &str, active: bool) -> DbResult<bool> {
        let sql = format!("UPDATE {} SET is_active = ?2 WHERE id = ?1", level_table(level));
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Active flag of an entity, `None` when it doesn't exist.
    pub async fn entity_is_active(&self, level: GeoLevel, id: &str) -> DbResult<Option<bool>> {
        let sql = format!("SELECT is_active FROM {} WHERE id = ?1", level_table(level));
        let active: Option<bool> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(active)
    }

    /// Active descendants of `root`, plus the root itself.
    ///
    /// The caller is responsible for checking the root is active.
    pub async fn subtree(&self, root: GeoLevel, root_id: &str) -> DbResult<GeographicScope> {
        let mut scope = GeographicScope::empty();
        scope.insert(root, root_id);

        for (level, sql) in descendant_queries(root) {
            let ids: Vec<String> = sqlx::query_scalar(sql)
                .bind(root_id)
                .fetch_all(&self.pool)
                .await?;
            for id in ids {
                scope.insert(level, id);
            }
        }

        debug!(
            root = root.as_str(),
            root_id,
            size = scope.len(),
            "Expanded hierarchy subtree"
        );
        Ok(scope)
    }

    /// Inserts a user assignment.
    pub async fn insert_assignment(&self, assignment: &GeographicAssignment) -> DbResult<()> {
        let sql = format!(
            "INSERT INTO user_geographic_assignments ({ASSIGNMENT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        );
        sqlx::query(&sql)
            .bind(&assignment.id)
            .bind(&assignment.user_id)
            .bind(&assignment.governorate_id)
            .bind(&assignment.district_id)
            .bind(&assignment.sub_district_id)
            .bind(&assignment.neighborhood_id)
            .bind(&assignment.assignment_type)
            .bind(db_timestamp(&assignment.start_date))
            .bind(opt_timestamp(assignment.end_date.as_ref()))
            .bind(assignment.is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// A user's assignments flagged active.
    ///
    /// The validity window is checked by the caller with
    /// [`GeographicAssignment::is_effective_at`].
    pub async fn active_assignments(&self, user_id: &str) -> DbResult<Vec<GeographicAssignment>> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_geographic_assignments \
             WHERE user_id = ?1 AND is_active = 1 ORDER BY start_date ASC, id ASC"
        );
        let assignments = sqlx::query_as::<_, GeographicAssignment>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(assignments)
    }

    /// Number of entities at a level. Used by the seed binary.
    pub async fn count(&self, level: GeoLevel) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", level_table(level));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
