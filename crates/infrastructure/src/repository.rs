use chrono::{DateTime, Utc};
use domain::{
    EngagementCounts, GroupId, Post, PostId, PostRepository, RepositoryError, RepositoryFuture,
    UserId,
};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

const POST_COLUMNS: &str =
    "id, user_id, group_id, content, image_urls, is_pinned, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PostRecord {
    id: Uuid,
    user_id: Uuid,
    group_id: Option<Uuid>,
    content: Option<String>,
    image_urls: Option<Json<Vec<String>>>,
    is_pinned: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PostRecord> for Post {
    fn from(value: PostRecord) -> Self {
        Post {
            id: PostId::from(value.id),
            author_id: UserId::from(value.user_id),
            group_id: value.group_id.map(GroupId::from),
            content: value.content,
            image_urls: value.image_urls.map(|urls| urls.0).unwrap_or_default(),
            is_pinned: value.is_pinned,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CountsRecord {
    likes: i64,
    comments: i64,
    views: i64,
}

/// 基于 PostgreSQL 的帖子只读仓储
#[derive(Clone)]
pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PostRepository for PgPostRepository {
    fn find_by_id(&self, id: PostId) -> RepositoryFuture<Option<Post>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE id = $1 AND deleted_at IS NULL"
            );
            let record = sqlx::query_as::<_, PostRecord>(&sql)
                .bind(Uuid::from(id))
                .fetch_optional(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Ok(record.map(Post::from))
        })
    }

    fn find_by_ids(&self, ids: Vec<PostId>) -> RepositoryFuture<Vec<Post>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let ids: Vec<Uuid> = ids.into_iter().map(Uuid::from).collect();
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE id = ANY($1) AND group_id IS NULL AND deleted_at IS NULL"
            );
            let records = sqlx::query_as::<_, PostRecord>(&sql)
                .bind(&ids)
                .fetch_all(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Ok(records.into_iter().map(Post::from).collect())
        })
    }

    fn list_rankable(&self) -> RepositoryFuture<Vec<Post>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE group_id IS NULL AND deleted_at IS NULL"
            );
            let records = sqlx::query_as::<_, PostRecord>(&sql)
                .fetch_all(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Ok(records.into_iter().map(Post::from).collect())
        })
    }

    fn engagement_counts(&self, id: PostId) -> RepositoryFuture<EngagementCounts> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, CountsRecord>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM likes WHERE target_type = 'post' AND target_id = $1) AS likes,
                    (SELECT COUNT(*) FROM comments WHERE post_id = $1 AND deleted_at IS NULL) AS comments,
                    (SELECT COUNT(*) FROM post_views WHERE post_id = $1) AS views
                "#,
            )
            .bind(Uuid::from(id))
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(EngagementCounts::new(
                record.likes,
                record.comments,
                record.views,
            ))
        })
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
