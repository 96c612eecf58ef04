//! SQLite 文档存储
//!
//! 每条记录以 JSON 存在 body 列，过滤用到的字段另存为带索引的列。
//! rusqlite 为同步 API，调用都放进 spawn_blocking。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::de::DeserializeOwned;
use tokio::task;

use crate::core::session::Session;
use crate::memory::store::{
    DocumentStore, EpisodeFilter, FactFilter, SessionFilter, StoreError, StrategyFilter,
};
use crate::memory::types::{Episode, Fact, Strategy};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    topic TEXT NOT NULL,
    status TEXT NOT NULL,
    parent_id TEXT,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_id);

CREATE TABLE IF NOT EXISTS episodes (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    success INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_episodes_session ON episodes(session_id);
CREATE INDEX IF NOT EXISTS idx_episodes_timestamp ON episodes(timestamp);

CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    confidence REAL NOT NULL,
    relevance REAL NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_facts_category ON facts(category);

CREATE TABLE IF NOT EXISTS strategies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    success_rate REAL NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
"#;

/// 固定宽度的 RFC3339，保证按字符串排序即按时间排序
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 动态 WHERE 子句
#[derive(Default)]
struct Where {
    clauses: Vec<&'static str>,
    params: Vec<SqlValue>,
}

impl Where {
    fn push(&mut self, clause: &'static str, value: SqlValue) {
        self.clauses.push(clause);
        self.params.push(value);
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn limit_sql(limit: Option<usize>) -> String {
    limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default()
}

fn map_insert_error(err: rusqlite::Error, kind: &'static str, id: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate {
                kind,
                id: id.to_string(),
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

fn query_bodies<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for body in rows {
        out.push(serde_json::from_str(&body?)?);
    }
    Ok(out)
}

fn query_one<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let body: Option<String> = conn
        .query_row(sql, params![key], |row| row.get(0))
        .optional()?;
    body.map(|b| serde_json::from_str(&b))
        .transpose()
        .map_err(StoreError::from)
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize, StoreError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(n as usize)
}

pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("sqlite document store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let body = serde_json::to_string(session)?;
        let id = session.id.clone();
        let topic = session.topic.clone();
        let status = session.status.as_str();
        let parent = session.parent_id.clone();
        let created = ts(session.created_at);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, topic, status, parent_id, created_at, body) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![&id, &topic, status, &parent, &created, &body],
            )
            .map_err(|e| map_insert_error(e, "session", &id))?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| query_one(conn, "SELECT body FROM sessions WHERE id = ?1", &id))
            .await
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        let body = serde_json::to_string(session)?;
        let id = session.id.clone();
        let status = session.status.as_str();
        self.run(move |conn| {
            let n = conn.execute(
                "UPDATE sessions SET status = ?1, body = ?2 WHERE id = ?3",
                params![status, &body, &id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    kind: "session",
                    id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let mut w = Where::default();
        if let Some(status) = filter.status {
            w.push("status = ?", SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(topic) = &filter.topic {
            w.push("topic = ?", SqlValue::Text(topic.clone()));
        }
        if let Some(parent) = &filter.parent_id {
            w.push("parent_id = ?", SqlValue::Text(parent.clone()));
        }
        if let Some(after) = filter.created_after {
            w.push("created_at >= ?", SqlValue::Text(ts(after)));
        }
        if let Some(before) = filter.created_before {
            w.push("created_at <= ?", SqlValue::Text(ts(before)));
        }
        let sql = format!(
            "SELECT body FROM sessions{} ORDER BY created_at DESC{}",
            w.sql(),
            limit_sql(filter.limit)
        );
        self.run(move |conn| query_bodies(conn, &sql, &w.params))
            .await
    }

    async fn create_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let body = serde_json::to_string(episode)?;
        let id = episode.id.clone();
        let session_id = episode.session_id.clone();
        let topic = episode.topic.clone();
        let success = episode.success;
        let timestamp = ts(episode.timestamp);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO episodes (id, session_id, topic, success, timestamp, body) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![&id, &session_id, &topic, success, &timestamp, &body],
            )
            .map_err(|e| map_insert_error(e, "episode", &id))?;
            Ok(())
        })
        .await
    }

    async fn get_episode(&self, id: &str) -> Result<Option<Episode>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| query_one(conn, "SELECT body FROM episodes WHERE id = ?1", &id))
            .await
    }

    async fn list_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, StoreError> {
        let mut w = Where::default();
        if let Some(session_id) = &filter.session_id {
            w.push("session_id = ?", SqlValue::Text(session_id.clone()));
        }
        if let Some(topic) = &filter.topic {
            w.push("topic = ?", SqlValue::Text(topic.clone()));
        }
        if let Some(since) = filter.since {
            w.push("timestamp >= ?", SqlValue::Text(ts(since)));
        }
        if let Some(until) = filter.until {
            w.push("timestamp <= ?", SqlValue::Text(ts(until)));
        }
        if let Some(success) = filter.success {
            w.push("success = ?", SqlValue::Integer(success as i64));
        }
        let sql = format!(
            "SELECT body FROM episodes{} ORDER BY timestamp DESC{}",
            w.sql(),
            limit_sql(filter.limit)
        );
        self.run(move |conn| query_bodies(conn, &sql, &w.params))
            .await
    }

    async fn create_fact(&self, fact: &Fact) -> Result<(), StoreError> {
        let body = serde_json::to_string(fact)?;
        let id = fact.id.clone();
        let category = fact.category.clone();
        let (confidence, relevance) = (fact.confidence, fact.relevance);
        let created = ts(fact.created_at);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO facts (id, category, confidence, relevance, created_at, body) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![&id, &category, confidence, relevance, &created, &body],
            )
            .map_err(|e| map_insert_error(e, "fact", &id))?;
            Ok(())
        })
        .await
    }

    async fn get_fact(&self, id: &str) -> Result<Option<Fact>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| query_one(conn, "SELECT body FROM facts WHERE id = ?1", &id))
            .await
    }

    async fn update_fact(&self, fact: &Fact) -> Result<(), StoreError> {
        let body = serde_json::to_string(fact)?;
        let id = fact.id.clone();
        let category = fact.category.clone();
        let (confidence, relevance) = (fact.confidence, fact.relevance);
        self.run(move |conn| {
            let n = conn.execute(
                "UPDATE facts SET category = ?1, confidence = ?2, relevance = ?3, body = ?4 WHERE id = ?5",
                params![&category, confidence, relevance, &body, &id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound { kind: "fact", id });
            }
            Ok(())
        })
        .await
    }

    async fn list_facts(&self, filter: &FactFilter) -> Result<Vec<Fact>, StoreError> {
        let mut w = Where::default();
        if let Some(category) = &filter.category {
            w.push("category = ?", SqlValue::Text(category.clone()));
        }
        if let Some(min) = filter.min_confidence {
            w.push("confidence >= ?", SqlValue::Real(min));
        }
        if let Some(min) = filter.min_relevance {
            w.push("relevance >= ?", SqlValue::Real(min));
        }
        // tags 在 JSON body 里，只能取出后再过滤
        let sql_limit = if filter.tags.is_empty() {
            limit_sql(filter.limit)
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT body FROM facts{} ORDER BY created_at DESC{}",
            w.sql(),
            sql_limit
        );
        let facts: Vec<Fact> = self
            .run(move |conn| query_bodies(conn, &sql, &w.params))
            .await?;
        let mut facts: Vec<Fact> = facts.into_iter().filter(|f| filter.matches(f)).collect();
        if let Some(n) = filter.limit {
            facts.truncate(n);
        }
        Ok(facts)
    }

    async fn create_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let body = serde_json::to_string(strategy)?;
        let id = strategy.id.clone();
        let name = strategy.strategy_name.clone();
        let success_rate = strategy.success_rate;
        let created = ts(strategy.created_at);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO strategies (id, name, success_rate, created_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![&id, &name, success_rate, &created, &body],
            )
            .map_err(|e| map_insert_error(e, "strategy", &name))?;
            Ok(())
        })
        .await
    }

    async fn get_strategy(&self, id: &str) -> Result<Option<Strategy>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| query_one(conn, "SELECT body FROM strategies WHERE id = ?1", &id))
            .await
    }

    async fn get_strategy_by_name(&self, name: &str) -> Result<Option<Strategy>, StoreError> {
        let name = name.to_string();
        self.run(move |conn| {
            query_one(conn, "SELECT body FROM strategies WHERE name = ?1", &name)
        })
        .await
    }

    async fn update_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let body = serde_json::to_string(strategy)?;
        let id = strategy.id.clone();
        let success_rate = strategy.success_rate;
        self.run(move |conn| {
            let n = conn.execute(
                "UPDATE strategies SET success_rate = ?1, body = ?2 WHERE id = ?3",
                params![success_rate, &body, &id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    kind: "strategy",
                    id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn list_strategies(&self, filter: &StrategyFilter) -> Result<Vec<Strategy>, StoreError> {
        let mut w = Where::default();
        if let Some(min) = filter.min_success_rate {
            w.push("success_rate >= ?", SqlValue::Real(min));
        }
        let sql = format!(
            "SELECT body FROM strategies{} ORDER BY created_at DESC{}",
            w.sql(),
            limit_sql(filter.limit)
        );
        self.run(move |conn| query_bodies(conn, &sql, &w.params))
            .await
    }

    async fn count_episodes(&self) -> Result<usize, StoreError> {
        self.run(|conn| count_rows(conn, "episodes")).await
    }

    async fn count_facts(&self) -> Result<usize, StoreError> {
        self.run(|conn| count_rows(conn, "facts")).await
    }

    async fn count_strategies(&self) -> Result<usize, StoreError> {
        self.run(|conn| count_rows(conn, "strategies")).await
    }
}
