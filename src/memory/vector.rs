//! 向量索引：按命名空间（episodes / facts / strategies）保存记录 id 对应的嵌入
//!
//! 只存向量与少量过滤元数据；记录本体在 DocumentStore，以相同 id 关联。

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::error::{AgentError, AgentResult};
use crate::llm::cosine_similarity;

pub const EPISODES_NAMESPACE: &str = "episodes";
pub const FACTS_NAMESPACE: &str = "facts";
pub const STRATEGIES_NAMESPACE: &str = "strategies";

pub type Metadata = HashMap<String, Value>;

/// 检索参数：filter 为元数据等值过滤，min_score 为归一化分数下限
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub limit: usize,
    pub filter: Option<Metadata>,
    pub min_score: Option<f32>,
}

impl VectorQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            filter: None,
            min_score: None,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }
}

/// 检索结果；score 已归一化到 [0, 1]
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
    pub document: String,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: Metadata,
        document: &str,
    ) -> AgentResult<()>;

    /// 结果按 score 降序
    async fn search_by_vector(
        &self,
        namespace: &str,
        vector: &[f32],
        query: &VectorQuery,
    ) -> AgentResult<Vec<VectorMatch>>;

    async fn delete(&self, namespace: &str, id: &str) -> AgentResult<bool>;

    async fn count(&self, namespace: &str) -> AgentResult<usize>;
}

struct Entry {
    vector: Vec<f32>,
    metadata: Metadata,
    document: String,
}

/// 内存向量索引（暴力余弦检索）
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, Entry>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 余弦相似度 [-1, 1] 映射到 [0, 1]
pub fn normalize_score(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    filter.map_or(true, |f| {
        f.iter().all(|(k, v)| metadata.get(k).map_or(false, |m| m == v))
    })
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: Metadata,
        document: &str,
    ) -> AgentResult<()> {
        if vector.is_empty() {
            return Err(AgentError::VectorIndex("Empty embedding".to_string()));
        }
        let mut namespaces = self.namespaces.write().await;
        let table = namespaces.entry(namespace.to_string()).or_default();
        if let Some(existing) = table.values().find(|e| e.dim() != vector.len()) {
            return Err(AgentError::VectorIndex(format!(
                "dimension mismatch in {}: expected {}, got {}",
                namespace,
                existing.dim(),
                vector.len()
            )));
        }
        table.insert(
            id.to_string(),
            Entry {
                vector,
                metadata,
                document: document.to_string(),
            },
        );
        Ok(())
    }

    async fn search_by_vector(
        &self,
        namespace: &str,
        vector: &[f32],
        query: &VectorQuery,
    ) -> AgentResult<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(table) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &String, &Entry)> = table
            .iter()
            .filter(|(_, e)| e.vector.len() == vector.len())
            .filter(|(_, e)| matches_filter(&e.metadata, query.filter.as_ref()))
            .map(|(id, e)| (normalize_score(cosine_similarity(vector, &e.vector)), id, e))
            .filter(|(score, _, _)| query.min_score.map_or(true, |m| *score >= m))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });

        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(score, id, e)| VectorMatch {
                id: id.clone(),
                score,
                metadata: e.metadata.clone(),
                document: e.document.clone(),
            })
            .collect())
    }

    async fn delete(&self, namespace: &str, id: &str) -> AgentResult<bool> {
        let mut namespaces = self.namespaces.write().await;
        Ok(namespaces
            .get_mut(namespace)
            .map_or(false, |t| t.remove(id).is_some()))
    }

    async fn count(&self, namespace: &str) -> AgentResult<usize> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, |t| t.len()))
    }
}

impl Entry {
    fn dim(&self) -> usize {
        self.vector.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(topic: &str) -> Metadata {
        let mut m = HashMap::new();
        m.insert("topic".to_string(), json!(topic));
        m
    }

    #[tokio::test]
    async fn test_search_orders_by_score() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("facts", "a", vec![1.0, 0.0], meta("x"), "a")
            .await
            .unwrap();
        index
            .upsert("facts", "b", vec![0.6, 0.8], meta("x"), "b")
            .await
            .unwrap();
        index
            .upsert("facts", "c", vec![-1.0, 0.0], meta("x"), "c")
            .await
            .unwrap();

        let hits = index
            .search_by_vector("facts", &[1.0, 0.0], &VectorQuery::new(10))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_filter_and_min_score() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("episodes", "a", vec![1.0, 0.0], meta("rust"), "")
            .await
            .unwrap();
        index
            .upsert("episodes", "b", vec![1.0, 0.1], meta("go"), "")
            .await
            .unwrap();

        let q = VectorQuery::new(10).with_filter("topic", "go");
        let hits = index
            .search_by_vector("episodes", &[1.0, 0.0], &q)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");

        let q = VectorQuery::new(10).with_min_score(Some(0.9999));
        let hits = index
            .search_by_vector("episodes", &[0.0, 1.0], &q)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_isolated_and_delete() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("facts", "a", vec![1.0], Metadata::new(), "")
            .await
            .unwrap();
        assert_eq!(index.count("facts").await.unwrap(), 1);
        assert_eq!(index.count("episodes").await.unwrap(), 0);
        assert!(index.delete("facts", "a").await.unwrap());
        assert!(!index.delete("facts", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("facts", "a", vec![1.0, 0.0], Metadata::new(), "")
            .await
            .unwrap();
        let err = index
            .upsert("facts", "b", vec![1.0], Metadata::new(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::VectorIndex(_)));
    }
}
