//! Bubble content repository

use super::{decode_json, decode_json_opt, encode_json, encode_json_opt};
use crate::db::{Backend, DynDatabasePool};
use crate::models::{BubbleContentInput, BubbleNode, BubbleType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// Bubble content repository trait
#[async_trait]
pub trait BubbleNodeRepository: Send + Sync {
    /// Insert content for a node that has none yet
    async fn create(&self, session_id: i64, input: &BubbleContentInput) -> Result<BubbleNode>;

    /// Insert or replace the content stored for `(session_id, input.node_id)`
    async fn upsert(&self, session_id: i64, input: &BubbleContentInput) -> Result<BubbleNode>;

    /// Content of one node
    async fn get(&self, session_id: i64, node_id: &str) -> Result<Option<BubbleNode>>;

    /// All content rows of a session, in insertion order
    async fn list_by_session(&self, session_id: i64) -> Result<Vec<BubbleNode>>;

    async fn count_by_session(&self, session_id: i64) -> Result<i64>;

    /// Remove every content row of a session, returning how many went
    async fn delete_by_session(&self, session_id: i64) -> Result<u64>;
}

/// SQLx-based bubble content repository implementation
pub struct SqlxBubbleNodeRepository {
    pool: DynDatabasePool,
}

impl SqlxBubbleNodeRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BubbleNodeRepository> {
        Arc::new(Self::new(pool))
    }
}

const NODE_COLUMNS: &str = "id, node_id, session_id, node_type, title, content_md, code_template, \
     test_cases, expected_output, hints, tutor_prompt, success_message, failure_message, \
     coin_reward, bonus_conditions, created_at, updated_at";

const INSERT_NODE: &str = r#"
    INSERT INTO bubble_nodes (node_id, session_id, node_type, title, content_md, code_template,
                              test_cases, expected_output, hints, tutor_prompt, success_message,
                              failure_message, coin_reward, bonus_conditions, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPSERT_NODE_SQLITE: &str = r#"
    INSERT INTO bubble_nodes (node_id, session_id, node_type, title, content_md, code_template,
                              test_cases, expected_output, hints, tutor_prompt, success_message,
                              failure_message, coin_reward, bonus_conditions, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (session_id, node_id) DO UPDATE SET
        node_type = excluded.node_type,
        title = excluded.title,
        content_md = excluded.content_md,
        code_template = excluded.code_template,
        test_cases = excluded.test_cases,
        expected_output = excluded.expected_output,
        hints = excluded.hints,
        tutor_prompt = excluded.tutor_prompt,
        success_message = excluded.success_message,
        failure_message = excluded.failure_message,
        coin_reward = excluded.coin_reward,
        bonus_conditions = excluded.bonus_conditions,
        updated_at = excluded.created_at
"#;

const UPSERT_NODE_MYSQL: &str = r#"
    INSERT INTO bubble_nodes (node_id, session_id, node_type, title, content_md, code_template,
                              test_cases, expected_output, hints, tutor_prompt, success_message,
                              failure_message, coin_reward, bonus_conditions, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        node_type = VALUES(node_type),
        title = VALUES(title),
        content_md = VALUES(content_md),
        code_template = VALUES(code_template),
        test_cases = VALUES(test_cases),
        expected_output = VALUES(expected_output),
        hints = VALUES(hints),
        tutor_prompt = VALUES(tutor_prompt),
        success_message = VALUES(success_message),
        failure_message = VALUES(failure_message),
        coin_reward = VALUES(coin_reward),
        bonus_conditions = VALUES(bonus_conditions),
        updated_at = VALUES(created_at)
"#;

/// Column values shared by insert and upsert
struct NodeValues {
    node_type: String,
    test_cases: Option<String>,
    hints: String,
    bonus_conditions: Option<String>,
}

impl NodeValues {
    fn encode(input: &BubbleContentInput) -> Result<Self> {
        let hints = input.hints.clone().unwrap_or_default();
        Ok(Self {
            node_type: input.node_type.to_string(),
            test_cases: encode_json_opt(input.test_cases.as_ref())?,
            hints: encode_json(&hints)?,
            bonus_conditions: encode_json_opt(input.bonus_conditions.as_ref())?,
        })
    }
}

impl SqlxBubbleNodeRepository {
    async fn write(&self, sql_sqlite: &str, sql_mysql: &str, session_id: i64, input: &BubbleContentInput) -> Result<()> {
        let values = NodeValues::encode(input)?;
        let now = Utc::now();

        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql_sqlite)
                .bind(&input.node_id)
                .bind(session_id)
                .bind(&values.node_type)
                .bind(&input.title)
                .bind(&input.content_md)
                .bind(&input.code_template)
                .bind(&values.test_cases)
                .bind(&input.expected_output)
                .bind(&values.hints)
                .bind(&input.tutor_prompt)
                .bind(&input.success_message)
                .bind(&input.failure_message)
                .bind(input.coin_reward)
                .bind(&values.bonus_conditions)
                .bind(now)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql_mysql)
                .bind(&input.node_id)
                .bind(session_id)
                .bind(&values.node_type)
                .bind(&input.title)
                .bind(&input.content_md)
                .bind(&input.code_template)
                .bind(&values.test_cases)
                .bind(&input.expected_output)
                .bind(&values.hints)
                .bind(&input.tutor_prompt)
                .bind(&input.success_message)
                .bind(&input.failure_message)
                .bind(input.coin_reward)
                .bind(&values.bonus_conditions)
                .bind(now)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .with_context(|| format!("Failed to write bubble content for node {}", input.node_id))
    }

    async fn fetch_written(&self, session_id: i64, node_id: &str) -> Result<BubbleNode> {
        self.get(session_id, node_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Bubble content for node {} vanished after write", node_id))
    }
}

#[async_trait]
impl BubbleNodeRepository for SqlxBubbleNodeRepository {
    async fn create(&self, session_id: i64, input: &BubbleContentInput) -> Result<BubbleNode> {
        self.write(INSERT_NODE, INSERT_NODE, session_id, input).await?;
        self.fetch_written(session_id, &input.node_id).await
    }

    async fn upsert(&self, session_id: i64, input: &BubbleContentInput) -> Result<BubbleNode> {
        self.write(UPSERT_NODE_SQLITE, UPSERT_NODE_MYSQL, session_id, input)
            .await?;
        self.fetch_written(session_id, &input.node_id).await
    }

    async fn get(&self, session_id: i64, node_id: &str) -> Result<Option<BubbleNode>> {
        let sql = format!(
            "SELECT {} FROM bubble_nodes WHERE session_id = ? AND node_id = ?",
            NODE_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(session_id)
                .bind(node_id)
                .fetch_optional(p)
                .await
                .context("Failed to get bubble content")?
                .as_ref()
                .map(row_to_node_sqlite)
                .transpose(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(session_id)
                .bind(node_id)
                .fetch_optional(p)
                .await
                .context("Failed to get bubble content")?
                .as_ref()
                .map(row_to_node_mysql)
                .transpose(),
        }
    }

    async fn list_by_session(&self, session_id: i64) -> Result<Vec<BubbleNode>> {
        let sql = format!(
            "SELECT {} FROM bubble_nodes WHERE session_id = ? ORDER BY id",
            NODE_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(session_id)
                .fetch_all(p)
                .await
                .context("Failed to list bubble content")?
                .iter()
                .map(row_to_node_sqlite)
                .collect(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(session_id)
                .fetch_all(p)
                .await
                .context("Failed to list bubble content")?
                .iter()
                .map(row_to_node_mysql)
                .collect(),
        }
    }

    async fn count_by_session(&self, session_id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM bubble_nodes WHERE session_id = ?";
        let (count,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(sql).bind(session_id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_as(sql).bind(session_id).fetch_one(p).await,
        }
        .context("Failed to count bubble content")?;
        Ok(count)
    }

    async fn delete_by_session(&self, session_id: i64) -> Result<u64> {
        let sql = "DELETE FROM bubble_nodes WHERE session_id = ?";
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql)
                .bind(session_id)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
            Backend::Mysql(p) => sqlx::query(sql)
                .bind(session_id)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete bubble content")
    }
}

fn row_to_node_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<BubbleNode> {
    let node_type: String = row.get("node_type");
    let hints: String = row.get("hints");

    Ok(BubbleNode {
        id: row.get("id"),
        node_id: row.get("node_id"),
        session_id: row.get("session_id"),
        node_type: BubbleType::from_str(&node_type)?,
        title: row.get("title"),
        content_md: row.get("content_md"),
        code_template: row.get("code_template"),
        test_cases: decode_json_opt(row.get("test_cases"), "test_cases")?,
        expected_output: row.get("expected_output"),
        hints: decode_json(&hints, "hints")?,
        tutor_prompt: row.get("tutor_prompt"),
        success_message: row.get("success_message"),
        failure_message: row.get("failure_message"),
        coin_reward: row.get("coin_reward"),
        bonus_conditions: decode_json_opt(row.get("bonus_conditions"), "bonus_conditions")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_node_mysql(row: &sqlx::mysql::MySqlRow) -> Result<BubbleNode> {
    let node_type: String = row.get("node_type");
    let hints: String = row.get("hints");

    Ok(BubbleNode {
        id: row.get("id"),
        node_id: row.get("node_id"),
        session_id: row.get("session_id"),
        node_type: BubbleType::from_str(&node_type)?,
        title: row.get("title"),
        content_md: row.get("content_md"),
        code_template: row.get("code_template"),
        test_cases: decode_json_opt(row.get("test_cases"), "test_cases")?,
        expected_output: row.get("expected_output"),
        hints: decode_json(&hints, "hints")?,
        tutor_prompt: row.get("tutor_prompt"),
        success_message: row.get("success_message"),
        failure_message: row.get("failure_message"),
        coin_reward: row.get("coin_reward"),
        bonus_conditions: decode_json_opt(row.get("bonus_conditions"), "bonus_conditions")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_course, seed_session, seed_user, setup_pool};
    use crate::models::UserRole;

    async fn setup() -> (SqlxBubbleNodeRepository, i64) {
        let pool = setup_pool().await;
        let instructor = seed_user(&pool, "instructor", UserRole::Instructor).await;
        let course = seed_course(&pool, instructor.id).await;
        let session = seed_session(&pool, course.id).await;
        (SqlxBubbleNodeRepository::new(pool), session.id)
    }

    #[tokio::test]
    async fn test_create_placeholder() {
        let (repo, session_id) = setup().await;

        let node = repo
            .create(session_id, &BubbleContentInput::placeholder("a", BubbleType::Task, "Loop", 15))
            .await
            .unwrap();

        assert_eq!(node.node_id, "a");
        assert_eq!(node.node_type, BubbleType::Task);
        assert_eq!(node.coin_reward, 15);
        assert!(node.hints.is_empty());
        assert!(node.test_cases.is_none());
        assert!(node.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let (repo, session_id) = setup().await;
        let input = BubbleContentInput::placeholder("a", BubbleType::Concept, "A", 10);

        repo.create(session_id, &input).await.unwrap();
        assert!(repo.create(session_id, &input).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_replaces_content() {
        let (repo, session_id) = setup().await;
        repo.create(session_id, &BubbleContentInput::placeholder("a", BubbleType::Concept, "A", 10))
            .await
            .unwrap();

        let mut input = BubbleContentInput::placeholder("a", BubbleType::Quiz, "Quiz A", 20);
        input.hints = Some(vec!["first".to_string(), "second".to_string()]);
        input.test_cases = Some(serde_json::json!([{"input": "1", "output": "2"}]));
        let node = repo.upsert(session_id, &input).await.unwrap();

        assert_eq!(node.node_type, BubbleType::Quiz);
        assert_eq!(node.title, "Quiz A");
        assert_eq!(node.hints, vec!["first", "second"]);
        assert_eq!(node.test_cases.unwrap()[0]["output"], "2");
        assert!(node.updated_at.is_some());
        assert_eq!(repo.count_by_session(session_id).await.unwrap(), 1);

        // Upsert of an unknown node inserts it
        repo.upsert(session_id, &BubbleContentInput::placeholder("b", BubbleType::Demo, "B", 5))
            .await
            .unwrap();
        assert_eq!(repo.count_by_session(session_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_and_delete_by_session() {
        let (repo, session_id) = setup().await;
        for id in ["x", "y", "z"] {
            repo.create(session_id, &BubbleContentInput::placeholder(id, BubbleType::Concept, id, 10))
                .await
                .unwrap();
        }

        let nodes = repo.list_by_session(session_id).await.unwrap();
        let ids: Vec<_> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);

        assert_eq!(repo.delete_by_session(session_id).await.unwrap(), 3);
        assert!(repo.get(session_id, "x").await.unwrap().is_none());
    }
}
