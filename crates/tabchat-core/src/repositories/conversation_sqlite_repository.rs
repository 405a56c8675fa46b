use std::path::{Path, PathBuf};

use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{RepositoryError, RepositoryResult};
use super::record_store::{BoxFuture, RecordStore};
use crate::models::{
    Conversation, ConversationRecord, Message, MessageRecord, NewConversation, Part, Role,
    now_millis,
};

/// Migrations applied in order. Each entry is (version, sql).
/// To add a new migration: append a tuple with the next version number and its SQL.
/// Never edit or remove existing entries; existing databases depend on them.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS conversations (
        id          TEXT    PRIMARY KEY,
        title       TEXT    NOT NULL DEFAULT '',
        origin_url  TEXT    NOT NULL DEFAULT '',
        created_at  INTEGER NOT NULL DEFAULT 0,
        updated_at  INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_updated_at
        ON conversations (updated_at DESC);
    CREATE TABLE IF NOT EXISTS messages (
        id              TEXT    PRIMARY KEY,
        conversation_id TEXT    NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        sequence_index  INTEGER NOT NULL,
        role            TEXT    NOT NULL,
        parts           TEXT    NOT NULL DEFAULT '[]',
        timestamp       INTEGER NOT NULL DEFAULT 0,
        context_refs    TEXT,
        UNIQUE (conversation_id, sequence_index)
    )",
)];

/// SQLite-backed record store.
///
/// Uses WAL journal mode so one context can read while another writes.
/// `SqlitePool` is internally reference-counted and cheap to clone.
#[derive(Clone)]
pub struct ConversationSqliteRepository {
    pool: SqlitePool,
}

impl ConversationSqliteRepository {
    /// Open (or create) the database at the platform-specific config path.
    pub async fn new() -> RepositoryResult<Self> {
        let db_path = Self::db_path()?;
        Self::open(&db_path).await
    }

    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> RepositoryResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        info!(path = %path.display(), "Opened SQLite conversation database");

        Ok(Self { pool })
    }

    /// Private in-memory database, alive as long as this repository.
    pub async fn in_memory() -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        // Every connection to :memory: is its own database, so pin exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create the schema_version table if absent, then apply any pending migrations.
    async fn run_migrations(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Seed version 0 if the table is empty (fresh database).
        sqlx::query("INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)")
            .execute(pool)
            .await?;

        let current: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(pool)
            .await?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                // sqlx doesn't support multiple statements in a single query call,
                // so split on ';' and execute each statement individually.
                for statement in sql.split(';') {
                    let trimmed = statement.trim();
                    if !trimmed.is_empty() {
                        sqlx::query(trimmed).execute(pool).await?;
                    }
                }
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    fn db_path() -> RepositoryResult<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Cannot find config directory".into(),
            })
            .map(|p| p.join("tabchat").join("conversations.db"))
    }
}

fn conversation_from_row(row: &SqliteRow) -> ConversationRecord {
    ConversationRecord {
        id: row.get("id"),
        title: row.get("title"),
        origin_url: row.get("origin_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> RepositoryResult<MessageRecord> {
    let role: String = row.get("role");
    let role = Role::parse(&role).ok_or_else(|| RepositoryError::InvalidData {
        message: format!("Unknown message role '{}'", role),
    })?;
    let parts: String = row.get("parts");
    let parts: Vec<Part> = serde_json::from_str(&parts)?;
    let context_refs: Option<String> = row.get("context_refs");
    let context_refs = context_refs
        .map(|json| serde_json::from_str::<Vec<i64>>(&json))
        .transpose()?;

    Ok(MessageRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sequence_index: row.get("sequence_index"),
        role,
        parts,
        timestamp: row.get("timestamp"),
        context_refs,
    })
}

async fn fetch_message_records(
    pool: &SqlitePool,
    id: &str,
) -> RepositoryResult<Vec<MessageRecord>> {
    let rows = sqlx::query(
        "SELECT id, conversation_id, sequence_index, role, parts, timestamp, context_refs
         FROM messages
         WHERE conversation_id = ?
         ORDER BY sequence_index ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(message_from_row).collect()
}

/// Insert one message row inside an open transaction.
async fn insert_message(
    conn: &mut sqlx::SqliteConnection,
    record: &MessageRecord,
) -> RepositoryResult<()> {
    let parts = serde_json::to_string(&record.parts)?;
    let context_refs = record
        .context_refs
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO messages
            (id, conversation_id, sequence_index, role, parts, timestamp, context_refs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&record.id)
    .bind(&record.conversation_id)
    .bind(record.sequence_index)
    .bind(record.role.as_str())
    .bind(parts)
    .bind(record.timestamp)
    .bind(context_refs)
    .execute(conn)
    .await?;

    Ok(())
}

/// Bump `updated_at` (never below `created_at`); NotFound if the row is gone.
async fn touch_conversation(
    conn: &mut sqlx::SqliteConnection,
    id: &str,
) -> RepositoryResult<()> {
    let result = sqlx::query("UPDATE conversations SET updated_at = MAX(created_at, ?) WHERE id = ?")
        .bind(now_millis())
        .bind(id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::not_found(id));
    }
    Ok(())
}

impl RecordStore for ConversationSqliteRepository {
    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationRecord>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, title, origin_url, created_at, updated_at
                 FROM conversations
                 ORDER BY updated_at DESC",
            )
            .fetch_all(&pool)
            .await?;

            Ok(rows.iter().map(conversation_from_row).collect())
        })
    }

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Conversation>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, title, origin_url, created_at, updated_at
                 FROM conversations
                 WHERE id = ?",
            )
            .bind(&id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found(&id))?;

            let record = conversation_from_row(&row);
            let messages = fetch_message_records(&pool, &id)
                .await?
                .into_iter()
                .map(MessageRecord::into_message)
                .collect();

            Ok(Conversation::from_parts(record, messages))
        })
    }

    fn load_message_records(
        &self,
        id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        Box::pin(async move { fetch_message_records(&pool, &id).await })
    }

    fn create_conversation(
        &self,
        meta: NewConversation,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            let now = now_millis();

            sqlx::query(
                "INSERT INTO conversations (id, title, origin_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
            )
            .bind(&id)
            .bind(&meta.title)
            .bind(&meta.origin_url)
            .bind(now)
            .execute(&pool)
            .await?;

            debug!(conv_id = %id, "Inserted conversation");
            Ok(id)
        })
    }

    fn rename_conversation(
        &self,
        id: &str,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        let title = title.to_string();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE conversations SET title = ?, updated_at = MAX(created_at, ?) WHERE id = ?",
            )
            .bind(&title)
            .bind(now_millis())
            .bind(&id)
            .execute(&pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::not_found(&id));
            }
            Ok(())
        })
    }

    fn replace_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        Box::pin(async move {
            // Dropping `tx` on an early return rolls everything back.
            let mut tx = pool.begin().await?;

            touch_conversation(&mut tx, &id).await?;

            sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;

            for (index, message) in messages.iter().enumerate() {
                let record = MessageRecord::from_message(&id, index as i64, message);
                insert_message(&mut tx, &record).await?;
            }

            tx.commit().await?;

            debug!(conv_id = %id, count = messages.len(), "Replaced messages");
            Ok(())
        })
    }

    fn append_message(
        &self,
        id: &str,
        message: Message,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        Box::pin(async move {
            let mut tx = pool.begin().await?;

            touch_conversation(&mut tx, &id).await?;

            let next_index: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(sequence_index) + 1, 0) FROM messages WHERE conversation_id = ?",
            )
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;

            let record = MessageRecord::from_message(&id, next_index, &message);
            insert_message(&mut tx, &record).await?;

            tx.commit().await?;

            Ok(record.id)
        })
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        Box::pin(async move {
            let mut tx = pool.begin().await?;

            sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;

            let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::not_found(&id));
            }

            tx.commit().await?;
            Ok(())
        })
    }

    fn delete_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<String>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await?;

            let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM conversations")
                .fetch_all(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM messages").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM conversations")
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            info!(count = ids.len(), "Deleted all conversations");
            Ok(ids)
        })
    }
}
