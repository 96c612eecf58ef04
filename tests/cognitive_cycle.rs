//! 认知循环集成测试：会话 → 推理 → 观察 → 经验写入 → 记忆上下文 → 反思

use std::sync::Arc;

use scout::config::{MemorySection, ReflectionSection};
use scout::core::state::{ActionType, Goal, Outcome};
use scout::llm::{MockCompletion, MockEmbedder};
use scout::memory::{
    ContextOptions, EpisodeInput, EpisodeSearchOptions, InMemoryDocumentStore, InMemoryVectorIndex,
    MemorySystem, SqliteDocumentStore,
};
use scout::react::ReasoningEngine;
use scout::reflection::{adjustments, ReflectionEngine, ReflectionPolicy, TriggerReason};
use serde_json::json;

fn research_llm() -> Arc<MockCompletion> {
    Arc::new(MockCompletion::from_fn(|messages| {
        let prompt = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let reply = if prompt.contains("Extract the key facts") {
            json!({"facts": [
                {"content": "tokio uses a work-stealing scheduler", "category": "runtime", "confidence": 0.9}
            ]})
        } else if prompt.contains("Propose 2 to") {
            json!({"options": [
                {"action": "search for runtime benchmarks", "rationale": "need numbers",
                 "estimatedCost": 2, "confidence": 0.8},
                {"action": "synthesize an answer", "estimatedCost": 6, "confidence": 0.3}
            ]})
        } else if prompt.contains("teaches about the goal") {
            json!({"learnings": ["benchmarks are scattered across blogs"]})
        } else if prompt.contains("knowledge gaps that block") {
            json!({"gaps": ["latency under load"]})
        } else if prompt.contains("alternative research strategies") {
            json!({"alternatives": ["read official documentation"]})
        } else {
            json!({
                "learnings": ["search engines rate-limit quickly"],
                "adjustments": ["space out searches"],
                "nextFocus": "latency under load",
                "shouldReplan": false
            })
        };
        Ok(reply.to_string())
    }))
}

fn memory_system(llm: Arc<MockCompletion>) -> Arc<MemorySystem> {
    Arc::new(MemorySystem::new(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(MockEmbedder::new()),
        llm,
        MemorySection::default(),
    ))
}

#[tokio::test]
async fn test_full_cognitive_cycle() {
    let llm = research_llm();
    let memory = memory_system(llm.clone());
    let reasoning = ReasoningEngine::new(llm.clone()).with_memory(memory.clone());
    let reflection = ReflectionEngine::new(memory.clone(), llm.clone());
    let mut policy = ReflectionPolicy::from_config(&ReflectionSection::default());

    let session = memory
        .sessions()
        .create_session("async runtimes", Goal::new("compare rust async runtimes"), None)
        .await
        .unwrap();
    let mut state = session.state.clone();

    let mut triggered = None;
    for (i, succeed) in [true, false, false].into_iter().enumerate() {
        let result = reasoning.reason(&state).await;
        assert!(!result.used_fallback);
        assert_eq!(result.action.action_type, ActionType::Search);
        assert_eq!(result.action.parameters["query"], "compare rust async runtimes");

        let action = result.action.clone();
        let outcome = if succeed {
            Outcome::success(&action.id, json!("https://tokio.rs is the most used runtime"))
        } else {
            Outcome::failure(&action.id, "rate limited")
        };
        state.record_iteration(action.clone(), outcome.clone());
        if succeed {
            state.progress.sources_gathered += 1;
        }

        let observation = reasoning.observe(&state, &action, &outcome).await;
        assert!(observation.should_continue || !succeed);
        for learning in &observation.learnings {
            state.working_memory.add_finding(learning.clone());
        }

        let mut input = EpisodeInput::new(&session.id, "async runtimes", format!("iteration {}", i + 1));
        input.success = succeed;
        input.actions = vec![action];
        input.outcomes = vec![outcome];
        input.findings = observation.learnings.clone();
        let stored = memory.store_experience(&session.id, input).await.unwrap();
        assert!(!stored.should_reflect);

        memory.sessions().save_state(&session.id, state.clone()).await.unwrap();
        triggered = policy.should_reflect(&state);
    }

    // 最后两次失败
    assert_eq!(triggered, Some(TriggerReason::RepeatedFailures));
    assert!(reasoning.should_replan(&state));

    let context = memory
        .build_context("rust async runtime scheduler", &ContextOptions::from_config(memory.config()))
        .await;
    assert!(context.degraded.is_empty());
    assert!(!context.episodic.episodes.is_empty());
    assert!(context
        .semantic
        .facts
        .iter()
        .any(|f| f.content.contains("work-stealing")));

    assert!(reflection.can_reflect(&session.id, &state).await.unwrap());
    let r = reflection.reflect(&session.id, &mut state).await.unwrap();
    policy.mark_reflected(r.iteration_number);
    assert!(!r.degraded);
    assert_eq!(r.iteration_number, 3);
    assert_eq!(r.knowledge_gaps, vec!["latency under load"]);
    assert_eq!(r.next_focus, "latency under load");
    assert_eq!(memory.actions_since_reflection(&session.id), 0);

    // 1/3 成功 → change，行为调整要求重新规划
    let adj = adjustments(&r);
    assert!(adj.replan);
    assert!(adj.notes.iter().any(|n| n.contains("read official documentation")));
    assert!(adj.apply(&mut state.plan));
    assert_eq!(
        state.plan.next_pending().map(|s| s.description.as_str()),
        Some("latency under load")
    );
    let next = reasoning.reason(&state).await;
    assert!(next.context.render().contains("next: latency under load"));

    let saved = memory.sessions().get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(saved.state.reflections.len(), 1);
    assert_eq!(saved.state.iteration_count, 3);

    memory.sessions().complete(&session.id).await.unwrap();
    assert!(memory
        .store_experience(&session.id, EpisodeInput::new("", "late", "after completion"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_degraded_services_keep_agent_running() {
    let embedder = Arc::new(MockEmbedder::failing());
    let memory = Arc::new(MemorySystem::new(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(InMemoryVectorIndex::new()),
        embedder,
        Arc::new(MockCompletion::failing()),
        MemorySection::default(),
    ));
    let session = memory
        .sessions()
        .create_session("t", Goal::new("find facts"), None)
        .await
        .unwrap();

    let stored = memory
        .store_experience(&session.id, EpisodeInput::new("", "t", "searched with embeddings down"))
        .await
        .unwrap();
    assert!(stored.facts.is_empty());
    let recent = memory.episodic().recent(Some(&session.id), 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, stored.episode.id);

    let reasoning = ReasoningEngine::new(Arc::new(MockCompletion::failing())).with_memory(memory.clone());
    let mut state = session.state.clone();
    state.progress.sources_gathered = 10;
    let result = reasoning.reason(&state).await;
    assert!(result.used_fallback);
    assert_eq!(result.action.action_type, ActionType::Fetch);
}

#[tokio::test]
async fn test_sqlite_backed_sessions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scout.db");

    let session_id = {
        let store = SqliteDocumentStore::open(&path).unwrap();
        let memory = MemorySystem::new(
            Arc::new(store),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(MockEmbedder::new()),
            Arc::new(MockCompletion::failing()),
            MemorySection::default(),
        );
        let session = memory
            .sessions()
            .create_session("persisted", Goal::new("g"), None)
            .await
            .unwrap();
        memory
            .store_experience(&session.id, EpisodeInput::new("", "persisted", "first step"))
            .await
            .unwrap();
        session.id
    };

    let store = SqliteDocumentStore::open(&path).unwrap();
    let memory = MemorySystem::new(
        Arc::new(store),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(MockEmbedder::new()),
        Arc::new(MockCompletion::failing()),
        MemorySection::default(),
    );
    let session = memory.sessions().require_active(&session_id).await.unwrap();
    assert_eq!(session.topic, "persisted");
    assert_eq!(memory.stats().await.unwrap().episodes, 1);

    let options = EpisodeSearchOptions::default();
    assert!(memory
        .episodic()
        .search_similar("first step", &options)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(memory.rebuild_index().await.unwrap().episodes, 1);
    let hits = memory
        .episodic()
        .search_similar("first step", &options)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.session_id, session_id);
}
