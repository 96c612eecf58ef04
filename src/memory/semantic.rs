//! 语义记忆：从文本抽取事实、去重合并、按置信度/新近度/访问频次构建知识上下文
//!
//! fact 以 id 为键存放；合并产生新 fact，related_facts 记录来源 id。
//! 原记录保留在文档库中，但从向量索引移除，之后的检索与合并都不再看到它们。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::core::error::{AgentError, AgentResult};
use crate::llm::{
    cosine_similarity, parse_list, schema_hint, CompletionOptions, CompletionService,
    EmbeddingKind, EmbeddingService, ParsedOutput, Validate,
};
use crate::memory::scoring::{decayed_relevance, fact_score};
use crate::memory::store::{DocumentStore, FactFilter};
use crate::memory::token_budget::greedy_fill;
use crate::memory::types::{dedup_preserving, Fact, FactInput};
use crate::memory::vector::{Metadata, VectorIndex, VectorQuery, FACTS_NAMESPACE};
use crate::memory::Message;

const MAX_CONTEXT_CANDIDATES: usize = 50;

const EXTRACT_SYSTEM: &str = "You extract atomic, verifiable facts from research material. \
Reply with a JSON array only.";

#[derive(Debug, Clone)]
pub struct FactSearchOptions {
    pub limit: usize,
    pub category: Option<String>,
    pub min_confidence: Option<f64>,
    pub min_relevance: Option<f64>,
    pub min_score: Option<f32>,
}

impl Default for FactSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            category: None,
            min_confidence: None,
            min_relevance: None,
            min_score: None,
        }
    }
}

impl FactSearchOptions {
    fn has_post_filter(&self) -> bool {
        self.min_confidence.is_some() || self.min_relevance.is_some()
    }

    fn accepts(&self, fact: &Fact) -> bool {
        self.min_confidence.map_or(true, |m| fact.confidence >= m)
            && self.min_relevance.map_or(true, |m| fact.relevance >= m)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeContext {
    pub facts: Vec<Fact>,
    pub text: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FactConsolidation {
    pub merged_pairs: Vec<(String, String)>,
    pub new_fact_ids: Vec<String>,
}

/// 合并两条事实时 LLM 的输出
#[derive(Debug, Deserialize)]
struct MergedContent {
    content: String,
}

impl Validate for MergedContent {
    fn validate(mut self) -> Result<Self, String> {
        self.content = self.content.validate()?;
        Ok(self)
    }
}

fn render_fact(fact: &Fact) -> String {
    format!("- {} (confidence {:.2})", fact.content, fact.confidence)
}

/// 已被合并进其他事实的来源 id
pub(crate) fn superseded_ids(facts: &[Fact]) -> HashSet<String> {
    facts
        .iter()
        .flat_map(|f| f.related_facts.iter().cloned())
        .collect()
}

/// 按类别分组渲染，类别顺序取首次出现顺序
fn render_grouped(facts: &[Fact]) -> String {
    let categories = dedup_preserving(facts.iter().map(|f| f.category.clone()));
    let mut s = String::new();
    for category in categories {
        s.push_str(&format!("### {}\n", category));
        for f in facts.iter().filter(|f| f.category == category) {
            s.push_str(&render_fact(f));
            s.push('\n');
        }
    }
    s.trim_end().to_string()
}

pub struct SemanticManager {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    llm: Arc<dyn CompletionService>,
    candidate_limit: usize,
}

impl SemanticManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        llm: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            llm,
            candidate_limit: MAX_CONTEXT_CANDIDATES,
        }
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.clamp(1, MAX_CONTEXT_CANDIDATES);
        self
    }

    /// 从文本抽取事实；服务或解析失败时返回空列表
    pub async fn extract_facts(&self, text: &str, source: &str) -> Vec<FactInput> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let prompt = format!(
            "Extract the key facts from the text below. Each item must follow this JSON schema:\n{}\n\n\
             Return a JSON array of items.\n\nText:\n{}",
            schema_hint::<FactInput>(),
            text
        );
        let options = CompletionOptions::new()
            .with_system(EXTRACT_SYSTEM)
            .with_temperature(0.1);
        let response = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "fact extraction unavailable");
                return Vec::new();
            }
        };
        match parse_list::<FactInput>(response.text(), "facts") {
            ParsedOutput::Ok(items) => items
                .into_iter()
                .map(|f| f.with_source(source))
                .collect(),
            ParsedOutput::ParseError(e) => {
                tracing::warn!(error = %e, "fact extraction returned malformed output");
                Vec::new()
            }
        }
    }

    fn new_fact(input: FactInput) -> Fact {
        let now = Utc::now();
        Fact {
            id: uuid::Uuid::new_v4().to_string(),
            content: input.content,
            category: input.category,
            subcategory: input.subcategory,
            source: input.source,
            confidence: input.confidence.clamp(0.0, 1.0),
            relevance: input.relevance.unwrap_or(1.0).clamp(0.0, 1.0),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            last_modified: now,
            tags: input.tags,
            related_facts: input.related_facts,
        }
    }

    fn metadata(fact: &Fact) -> Metadata {
        let mut m = Metadata::new();
        m.insert("category".to_string(), json!(fact.category));
        m.insert("confidence".to_string(), json!(fact.confidence));
        m
    }

    pub async fn store_fact(&self, input: FactInput) -> AgentResult<Fact> {
        let fact = Self::new_fact(input);
        self.store.create_fact(&fact).await?;

        let indexed = async {
            let vector = self
                .embedder
                .embed(&fact.content, EmbeddingKind::Document)
                .await
                .map_err(|e| AgentError::Embedding(e.to_string()))?;
            self.index
                .upsert(FACTS_NAMESPACE, &fact.id, vector, Self::metadata(&fact), &fact.content)
                .await
        };
        if let Err(e) = indexed.await {
            tracing::warn!(fact_id = %fact.id, error = %e, "fact stored without embedding");
        }
        Ok(fact)
    }

    /// 批量写入：先写全部文档，再一次批量嵌入
    pub async fn store_facts(&self, inputs: Vec<FactInput>) -> AgentResult<Vec<Fact>> {
        let mut facts = Vec::with_capacity(inputs.len());
        for input in inputs {
            let fact = Self::new_fact(input);
            self.store.create_fact(&fact).await?;
            facts.push(fact);
        }
        if facts.is_empty() {
            return Ok(facts);
        }

        self.index_facts(&facts).await;
        tracing::debug!(count = facts.len(), "facts stored");
        Ok(facts)
    }

    /// 一次批量嵌入后逐条写入索引；返回写入成功的条数
    async fn index_facts(&self, facts: &[Fact]) -> usize {
        let contents: Vec<String> = facts.iter().map(|f| f.content.clone()).collect();
        let vectors = match self
            .embedder
            .embed_batch(&contents, EmbeddingKind::Document)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(count = facts.len(), error = %e, "facts stored without embeddings");
                return 0;
            }
        };
        let mut indexed = 0;
        for (fact, vector) in facts.iter().zip(vectors) {
            match self
                .index
                .upsert(FACTS_NAMESPACE, &fact.id, vector, Self::metadata(fact), &fact.content)
                .await
            {
                Ok(()) => indexed += 1,
                Err(e) => tracing::warn!(fact_id = %fact.id, error = %e, "fact index write failed"),
            }
        }
        indexed
    }

    /// 用文档库重建向量索引；已被合并的来源事实不再写入
    pub async fn reindex(&self) -> AgentResult<usize> {
        let facts = self.store.list_facts(&FactFilter::default()).await?;
        let superseded = superseded_ids(&facts);
        let live: Vec<Fact> = facts
            .into_iter()
            .filter(|f| !superseded.contains(&f.id))
            .collect();
        if live.is_empty() {
            return Ok(0);
        }
        Ok(self.index_facts(&live).await)
    }

    pub async fn get(&self, id: &str) -> AgentResult<Option<Fact>> {
        Ok(self.store.get_fact(id).await?)
    }

    /// 最近写入的事实（新的在前）
    pub async fn list(&self, limit: usize) -> AgentResult<Vec<Fact>> {
        let filter = FactFilter {
            limit: Some(limit),
            ..FactFilter::default()
        };
        Ok(self.store.list_facts(&filter).await?)
    }

    /// 访问计数 +1；尽力而为，返回成功更新的条数
    pub async fn record_access(&self, ids: &[String]) -> usize {
        let now = Utc::now();
        let mut updated = 0;
        for id in ids {
            let result = async {
                if let Some(mut fact) = self.store.get_fact(id).await? {
                    fact.access_count += 1;
                    fact.last_accessed = now;
                    self.store.update_fact(&fact).await?;
                    return Ok::<bool, AgentError>(true);
                }
                Ok(false)
            };
            match result.await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(fact_id = %id, error = %e, "record access failed"),
            }
        }
        updated
    }

    pub async fn search(&self, query: &str, opts: &FactSearchOptions) -> AgentResult<Vec<(Fact, f32)>> {
        let vector = self
            .embedder
            .embed(query, EmbeddingKind::Query)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;

        // 有内存后置过滤时多取一倍
        let fetch = if opts.has_post_filter() {
            opts.limit * 2
        } else {
            opts.limit
        };
        let mut vq = VectorQuery::new(fetch).with_min_score(opts.min_score);
        if let Some(category) = &opts.category {
            vq = vq.with_filter("category", category.as_str());
        }
        let matches = self
            .index
            .search_by_vector(FACTS_NAMESPACE, &vector, &vq)
            .await?;

        let mut out = Vec::new();
        for m in matches {
            if let Some(fact) = self.store.get_fact(&m.id).await? {
                if opts.accepts(&fact) {
                    out.push((fact, m.score));
                }
            }
        }
        out.truncate(opts.limit);
        Ok(out)
    }

    pub async fn build_knowledge_context(
        &self,
        query: &str,
        max_tokens: usize,
        opts: &FactSearchOptions,
    ) -> AgentResult<KnowledgeContext> {
        let search = FactSearchOptions {
            limit: self.candidate_limit,
            ..opts.clone()
        };
        let hits = self.search(query, &search).await?;
        let total = hits.len();
        let now = Utc::now();

        let mut scored: Vec<(f64, Fact)> = hits
            .into_iter()
            .map(|(f, _)| (fact_score(f.confidence, f.age_days(now), f.access_count), f))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let selection = greedy_fill(
            scored.into_iter().map(|(_, f)| f).collect(),
            max_tokens,
            render_grouped,
        );
        tracing::debug!(
            candidates = total,
            selected = selection.selected.len(),
            tokens = selection.used_tokens,
            "knowledge context built"
        );

        let ids: Vec<String> = selection.selected.iter().map(|f| f.id.clone()).collect();
        self.record_access(&ids).await;

        Ok(KnowledgeContext {
            text: selection.text,
            facts: selection.selected,
            estimated_tokens: selection.used_tokens,
            truncated: selection.truncated,
        })
    }

    /// 同类别中与 fact 的余弦相似度不低于 threshold 的事实（不含自身），按相似度降序
    pub async fn find_similar_facts(
        &self,
        fact: &Fact,
        threshold: f32,
    ) -> AgentResult<Vec<(Fact, f32)>> {
        let target = self
            .embedder
            .embed(&fact.content, EmbeddingKind::Document)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;

        let vq = VectorQuery::new(self.candidate_limit)
            .with_filter("category", fact.category.as_str());
        let matches = self
            .index
            .search_by_vector(FACTS_NAMESPACE, &target, &vq)
            .await?;

        let mut candidates = Vec::new();
        for m in matches {
            if m.id == fact.id {
                continue;
            }
            if let Some(c) = self.store.get_fact(&m.id).await? {
                candidates.push(c);
            }
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&contents, EmbeddingKind::Document)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;

        let mut similar: Vec<(Fact, f32)> = candidates
            .into_iter()
            .zip(vectors)
            .map(|(c, v)| {
                let sim = cosine_similarity(&target, &v);
                (c, sim)
            })
            .filter(|(_, sim)| *sim >= threshold)
            .collect();
        similar.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(similar)
    }

    /// 合并两条事实为一条新事实；LLM 不可用时保留置信度较高的内容。
    /// 两条都必须已在文档库中，否则返回 UnknownFact
    pub async fn merge_facts(&self, a: &Fact, b: &Fact) -> AgentResult<Fact> {
        for f in [a, b] {
            if self.store.get_fact(&f.id).await?.is_none() {
                return Err(AgentError::UnknownFact(f.id.clone()));
            }
        }
        let prompt = format!(
            "Merge these two overlapping facts into one precise statement.\n\
             Fact A: {}\nFact B: {}\n\nReply with JSON: {{\"content\": \"...\"}}",
            a.content, b.content
        );
        let options = CompletionOptions::new().with_temperature(0.1);
        let merged = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(resp) => resp.parse::<MergedContent>().ok().map(|m| m.content),
            Err(e) => {
                tracing::warn!(error = %e, "fact merge falling back to higher confidence content");
                None
            }
        };
        let content = merged.unwrap_or_else(|| {
            if b.confidence > a.confidence {
                b.content.clone()
            } else {
                a.content.clone()
            }
        });

        let mut related = a.related_facts.clone();
        related.extend(b.related_facts.iter().cloned());
        related.push(a.id.clone());
        related.push(b.id.clone());

        let input = FactInput {
            content,
            category: a.category.clone(),
            subcategory: a.subcategory.clone().or_else(|| b.subcategory.clone()),
            confidence: a.confidence.max(b.confidence),
            tags: dedup_preserving(a.tags.iter().chain(b.tags.iter()).cloned()),
            source: dedup_preserving(
                [a.source.clone(), b.source.clone()]
                    .into_iter()
                    .filter(|s| !s.is_empty()),
            )
            .join("; "),
            related_facts: dedup_preserving(related),
            relevance: Some(a.relevance.max(b.relevance)),
        };
        let fact = self.store_fact(input).await?;
        for id in [&a.id, &b.id] {
            if let Err(e) = self.index.delete(FACTS_NAMESPACE, id).await {
                tracing::warn!(fact_id = %id, error = %e, "merged fact still indexed");
            }
        }
        tracing::info!(merged = %fact.id, from_a = %a.id, from_b = %b.id, "facts merged");
        Ok(fact)
    }

    /// 单轮贪心去重：每条未处理的事实与其最相似的未处理事实合并。
    /// 已被合并过的事实（出现在其他事实的 related_facts 中）不再参与
    pub async fn consolidate_facts(&self, threshold: f32) -> AgentResult<FactConsolidation> {
        let facts = self.store.list_facts(&FactFilter::default()).await?;
        let mut processed = superseded_ids(&facts);
        let mut report = FactConsolidation::default();

        for fact in &facts {
            if processed.contains(&fact.id) {
                continue;
            }
            let similar = match self.find_similar_facts(fact, threshold).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(fact_id = %fact.id, error = %e, "similarity lookup failed");
                    continue;
                }
            };
            let Some((other, _)) = similar
                .into_iter()
                .find(|(o, _)| !processed.contains(&o.id))
            else {
                continue;
            };
            let merged = self.merge_facts(fact, &other).await?;
            processed.insert(fact.id.clone());
            processed.insert(other.id.clone());
            processed.insert(merged.id.clone());
            report
                .merged_pairs
                .push((fact.id.clone(), other.id.clone()));
            report.new_fact_ids.push(merged.id);
        }
        Ok(report)
    }

    /// 相关度随未访问时长衰减，访问次数给予加成；返回被改写的条数
    pub async fn update_fact_relevance(&self, now: DateTime<Utc>) -> AgentResult<usize> {
        let facts = self.store.list_facts(&FactFilter::default()).await?;
        let mut changed = 0;
        for mut fact in facts {
            let next = decayed_relevance(
                fact.relevance,
                fact.days_since_access(now),
                fact.access_count,
            );
            if (next - fact.relevance).abs() > f64::EPSILON {
                fact.relevance = next;
                fact.last_modified = now;
                self.store.update_fact(&fact).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub async fn count(&self) -> AgentResult<usize> {
        Ok(self.store.count_facts().await?)
    }

    pub async fn probe(&self) -> AgentResult<()> {
        self.store.count_facts().await?;
        self.index.count(FACTS_NAMESPACE).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockCompletion, MockEmbedder};
    use crate::memory::store::InMemoryDocumentStore;
    use crate::memory::token_budget::TokenEstimator;
    use crate::memory::vector::InMemoryVectorIndex;

    fn manager(
        llm: MockCompletion,
        embedder: Arc<MockEmbedder>,
    ) -> (SemanticManager, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let m = SemanticManager::new(
            store.clone(),
            Arc::new(InMemoryVectorIndex::new()),
            embedder,
            Arc::new(llm),
        );
        (m, store)
    }

    #[tokio::test]
    async fn test_extract_facts_validates() {
        let reply = r#"Here you go:
```json
[{"content": "Rust 1.0 was released in 2015", "category": "History", "confidence": 1.7},
 {"content": "   "},
 {"content": "Cargo is the build tool", "tags": ["Tooling"]}]
```"#;
        let (m, _) = manager(
            MockCompletion::with_responses([reply]),
            Arc::new(MockEmbedder::new()),
        );
        let facts = m.extract_facts("some article", "https://example.org").await;
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].category, "history");
        assert_eq!(facts[0].confidence, 1.0);
        assert_eq!(facts[0].source, "https://example.org");
        assert_eq!(facts[1].category, "general");
    }

    #[tokio::test]
    async fn test_extract_facts_failure_is_empty() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        assert!(m.extract_facts("text", "src").await.is_empty());

        let (m, _) = manager(
            MockCompletion::with_responses(["no json here"]),
            Arc::new(MockEmbedder::new()),
        );
        assert!(m.extract_facts("text", "src").await.is_empty());
    }

    #[tokio::test]
    async fn test_store_facts_survives_embedding_failure() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::failing()));
        let facts = m
            .store_facts(vec![FactInput::new("a", "x"), FactInput::new("b", "x")])
            .await
            .unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(m.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_post_filters() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        m.store_facts(vec![
            FactInput::new("tokio is an async runtime", "rust").with_confidence(0.9),
            FactInput::new("tokio has a work stealing scheduler", "rust").with_confidence(0.3),
            FactInput::new("tokio tasks are cheap", "go").with_confidence(0.9),
        ])
        .await
        .unwrap();

        let opts = FactSearchOptions {
            category: Some("rust".into()),
            min_confidence: Some(0.5),
            ..Default::default()
        };
        let hits = m.search("tokio", &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "tokio is an async runtime");
    }

    #[tokio::test]
    async fn test_find_similar_threshold() {
        let embedder = Arc::new(MockEmbedder::new());
        embedder.pin("fact a", vec![1.0, 0.0]);
        embedder.pin("fact b", vec![0.92, (1.0f32 - 0.92 * 0.92).sqrt()]);
        embedder.pin("fact c", vec![0.80, 0.60]);
        let (m, _) = manager(MockCompletion::failing(), embedder);

        let a = m.store_fact(FactInput::new("fact a", "general")).await.unwrap();
        let b = m.store_fact(FactInput::new("fact b", "general")).await.unwrap();
        m.store_fact(FactInput::new("fact c", "general")).await.unwrap();

        let similar = m.find_similar_facts(&a, 0.85).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.id, b.id);
        assert!((similar[0].1 - 0.92).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_merge_unions_tags_and_lineage() {
        let (m, _) = manager(
            MockCompletion::with_responses([r#"{"content": "Rust is memory safe without GC"}"#]),
            Arc::new(MockEmbedder::new()),
        );
        let a = m
            .store_fact(
                FactInput::new("Rust is memory safe", "rust")
                    .with_confidence(0.6)
                    .with_tags(["safety", "rust"]),
            )
            .await
            .unwrap();
        let b = m
            .store_fact(
                FactInput::new("Rust has no garbage collector", "rust")
                    .with_confidence(0.9)
                    .with_tags(["rust", "gc"]),
            )
            .await
            .unwrap();

        let merged = m.merge_facts(&a, &b).await.unwrap();
        assert_eq!(merged.content, "Rust is memory safe without GC");
        assert_eq!(merged.tags, vec!["safety", "rust", "gc"]);
        assert_eq!(merged.confidence, 0.9);
        assert!(merged.related_facts.contains(&a.id));
        assert!(merged.related_facts.contains(&b.id));
        assert!(m.get(&a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_merge_fallback_keeps_confident_content() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        let a = m
            .store_fact(FactInput::new("weak claim", "x").with_confidence(0.2))
            .await
            .unwrap();
        let b = m
            .store_fact(FactInput::new("strong claim", "x").with_confidence(0.8))
            .await
            .unwrap();
        let merged = m.merge_facts(&a, &b).await.unwrap();
        assert_eq!(merged.content, "strong claim");
    }

    #[tokio::test]
    async fn test_consolidate_facts_pairs_once() {
        let embedder = Arc::new(MockEmbedder::new());
        embedder.pin("alpha one", vec![1.0, 0.0]);
        embedder.pin("alpha two", vec![0.99, 0.141]);
        embedder.pin("beta", vec![0.0, 1.0]);
        let (m, _) = manager(MockCompletion::failing(), embedder);
        m.store_fact(FactInput::new("alpha one", "g")).await.unwrap();
        m.store_fact(FactInput::new("alpha two", "g")).await.unwrap();
        m.store_fact(FactInput::new("beta", "g")).await.unwrap();

        let report = m.consolidate_facts(0.9).await.unwrap();
        assert_eq!(report.merged_pairs.len(), 1);
        assert_eq!(report.new_fact_ids.len(), 1);
        assert_eq!(m.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_consolidate_facts_is_idempotent() {
        let embedder = Arc::new(MockEmbedder::new());
        embedder.pin("alpha one", vec![1.0, 0.0]);
        embedder.pin("alpha two", vec![0.99, 0.141]);
        let (m, _) = manager(MockCompletion::failing(), embedder);
        m.store_fact(FactInput::new("alpha one", "g")).await.unwrap();
        m.store_fact(FactInput::new("alpha two", "g").with_confidence(0.9))
            .await
            .unwrap();

        let first = m.consolidate_facts(0.9).await.unwrap();
        assert_eq!(first.merged_pairs.len(), 1);
        assert_eq!(m.count().await.unwrap(), 3);

        for _ in 0..2 {
            let again = m.consolidate_facts(0.9).await.unwrap();
            assert!(again.merged_pairs.is_empty());
            assert_eq!(m.count().await.unwrap(), 3);
        }

        // 只剩合并后的事实可被检索
        let hits = m.search("alpha two", &FactSearchOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, first.new_fact_ids[0]);
    }

    #[tokio::test]
    async fn test_merge_unknown_fact() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        let a = m.store_fact(FactInput::new("kept", "x")).await.unwrap();
        let mut ghost = a.clone();
        ghost.id = "missing".to_string();
        let err = m.merge_facts(&a, &ghost).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownFact(ref id) if id == "missing"));
        assert!(err.is_precondition());
        assert_eq!(m.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_relevance_decays_stale_facts() {
        let (m, store) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        let fact = m.store_fact(FactInput::new("stale", "x")).await.unwrap();
        let mut stale = fact.clone();
        stale.last_accessed = Utc::now() - chrono::Duration::days(60);
        store.update_fact(&stale).await.unwrap();

        let changed = m.update_fact_relevance(Utc::now()).await.unwrap();
        assert_eq!(changed, 1);
        let after = m.get(&fact.id).await.unwrap().unwrap();
        assert!(after.relevance < 0.4);
        assert!(after.relevance >= 0.0);
    }

    #[tokio::test]
    async fn test_knowledge_context_records_access() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        m.store_facts(vec![
            FactInput::new("sqlite uses a b-tree", "storage"),
            FactInput::new("sqlite supports wal mode", "storage"),
        ])
        .await
        .unwrap();
        let ctx = m
            .build_knowledge_context("sqlite", 1000, &FactSearchOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.facts.len(), 2);
        assert!(ctx.text.starts_with("### storage"));
        let again = m.get(&ctx.facts[0].id).await.unwrap().unwrap();
        assert_eq!(again.access_count, 1);
    }

    #[tokio::test]
    async fn test_knowledge_context_text_fits_budget() {
        let (m, _) = manager(MockCompletion::failing(), Arc::new(MockEmbedder::new()));
        let inputs: Vec<FactInput> = (0..10)
            .map(|i| FactInput::new(format!("fact {i}"), format!("category-{i}")))
            .collect();
        m.store_facts(inputs).await.unwrap();

        let ctx = m
            .build_knowledge_context("fact", 40, &FactSearchOptions::default())
            .await
            .unwrap();
        assert!(ctx.truncated);
        assert!(!ctx.facts.is_empty());
        assert!(TokenEstimator::estimate(&ctx.text) <= 40);
        assert_eq!(ctx.estimated_tokens, TokenEstimator::estimate(&ctx.text));
        assert_eq!(ctx.text.matches("### ").count(), ctx.facts.len());
    }
}
