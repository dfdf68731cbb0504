use crate::{
    error::StoreError,
    models::{AssetKind, ExerciseRow, ProfileRow},
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Repository Trait
///
/// Defines the read-only contract this service holds against the CRUD data
/// layer. The contract is: return current truth or a distinguishable fault,
/// never a silently stale or swallowed result, because entitlement state
/// (subscription, active flag) can change at any time and is evaluated
/// fresh per request.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetches the caller's canonical profile row (role, active flag,
    /// subscription expiry). None means no such profile exists.
    async fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRow>, StoreError>;

    /// Fetches the set of level ids assigned to a profile.
    async fn get_profile_levels(&self, profile_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Fetches one exercise descriptor (visibility + chapter linkage).
    async fn get_exercise(&self, id: Uuid) -> Result<Option<ExerciseRow>, StoreError>;

    /// Fetches the level ids an exercise inherits through its
    /// chapter -> subject -> subject_levels chain. A subject may be linked
    /// to multiple levels, so the result is a set, not a scalar.
    async fn get_exercise_levels(&self, exercise_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Resolves an asset designator (kind + index within kind) to its object
    /// key in the storage bucket. None means the exercise has no such
    /// attachment.
    async fn get_asset_key(
        &self,
        exercise_id: Uuid,
        kind: AssetKind,
        index: i32,
    ) -> Result<Option<String>, StoreError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the
/// PostgreSQL database owned by the content-management subsystem.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRow>, StoreError> {
        let profile = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, email, role, is_active, subscription_expires_at
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn get_profile_levels(&self, profile_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let levels = sqlx::query_scalar::<_, Uuid>(
            "SELECT level_id FROM profile_levels WHERE profile_id = $1",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    async fn get_exercise(&self, id: Uuid) -> Result<Option<ExerciseRow>, StoreError> {
        let exercise = sqlx::query_as::<_, ExerciseRow>(
            "SELECT id, chapter_id, visibility FROM exercises WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exercise)
    }

    /// get_exercise_levels
    ///
    /// Walks the many-to-many chain: an exercise belongs to a chapter, the
    /// chapter to a subject, and the subject may be linked to several levels
    /// via `subject_levels`.
    async fn get_exercise_levels(&self, exercise_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let levels = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT sl.level_id
            FROM exercises e
            JOIN chapters c ON e.chapter_id = c.id
            JOIN subject_levels sl ON c.subject_id = sl.subject_id
            WHERE e.id = $1
            "#,
        )
        .bind(exercise_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    async fn get_asset_key(
        &self,
        exercise_id: Uuid,
        kind: AssetKind,
        index: i32,
    ) -> Result<Option<String>, StoreError> {
        let key = sqlx::query_scalar::<_, String>(
            r#"
            SELECT object_key
            FROM exercise_assets
            WHERE exercise_id = $1 AND kind = $2 AND idx = $3
            "#,
        )
        .bind(exercise_id)
        .bind(kind.as_str())
        .bind(index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }
}
