//! 反思引擎：回顾近期经验，评估进度与策略，综合出学习要点和调整建议
//!
//! 前置条件（会话活跃、经验量足够）不满足时返回错误；
//! 知识缺口、替代策略、综合三处 LLM 调用失败时各自降级，反思本身仍然产出。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::ReflectionSection;
use crate::core::error::{AgentError, AgentResult};
use crate::core::session::Session;
use crate::core::state::AgentState;
use crate::llm::{parse_list, schema_hint, CompletionOptions, CompletionService, ParsedOutput, Validate};
use crate::memory::tokenizer::recurring_keywords;
use crate::memory::types::{dedup_preserving, Episode, Fact, Strategy};
use crate::memory::{Message, MemorySystem};
use crate::reflection::types::{
    PatternAnalysis, ProgressAssessment, Recommendation, Reflection, StrategyEvaluation,
};

const EPISODE_WINDOW: usize = 10;
const STRATEGY_WINDOW: usize = 10;
const FACT_WINDOW: usize = 20;
const PAIR_WINDOW: usize = 10;
const MIN_TOPIC_OCCURRENCES: usize = 2;
const RELIABLE_RATE: f64 = 0.7;
const STRUGGLING_RATE: f64 = 0.4;
const ON_TRACK_CONFIDENCE: f64 = 0.6;
const DEGRADED_LEARNING: &str =
    "Reflection synthesis was unavailable; keep the current plan and re-check progress next cycle.";

const REFLECT_SYSTEM: &str = "You are the reflective component of a research agent. \
Be concrete and brief. Reply with JSON only.";

/// 综合阶段 LLM 的输出
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SynthesisOutput {
    /// 从近期经验中得到的可复用结论
    #[serde(default)]
    learnings: Vec<String>,
    #[serde(default)]
    adjustments: Vec<String>,
    #[serde(default)]
    next_focus: String,
    #[serde(default)]
    should_replan: bool,
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    dedup_preserving(
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    )
}

impl Validate for SynthesisOutput {
    fn validate(mut self) -> Result<Self, String> {
        self.learnings = clean_list(self.learnings);
        if self.learnings.is_empty() {
            return Err("no learnings".to_string());
        }
        self.adjustments = clean_list(self.adjustments);
        self.next_focus = self.next_focus.trim().to_string();
        Ok(self)
    }
}

/// 主题关键词与策略成功率的模式统计
pub fn analyze_patterns(episodes: &[Episode], strategies: &[Strategy], facts: &[Fact]) -> PatternAnalysis {
    let topic_patterns = recurring_keywords(
        episodes.iter().map(|e| e.topic.as_str()),
        MIN_TOPIC_OCCURRENCES,
    );
    let reliable_strategies = strategies
        .iter()
        .filter(|s| s.times_used > 0 && s.success_rate >= RELIABLE_RATE)
        .map(|s| s.strategy_name.clone())
        .collect();
    let struggling_strategies = strategies
        .iter()
        .filter(|s| s.times_used > 0 && s.success_rate < STRUGGLING_RATE)
        .map(|s| s.strategy_name.clone())
        .collect();
    PatternAnalysis {
        topic_patterns,
        reliable_strategies,
        struggling_strategies,
        episode_count: episodes.len(),
        fact_count: facts.len(),
    }
}

/// 进度评估：confidence > 0.6 且近期成功多于失败即视为正常推进
pub fn assess_progress(state: &AgentState, started_at: DateTime<Utc>, now: DateTime<Utc>) -> ProgressAssessment {
    let outcomes = state.working_memory.last_outcomes(PAIR_WINDOW);
    let successes = outcomes.iter().filter(|o| o.success).count();
    let failures = outcomes.len() - successes;
    let progress = &state.progress;

    let is_on_track = progress.confidence > ON_TRACK_CONFIDENCE && successes > failures;

    let elapsed_minutes = ((now - started_at).num_milliseconds().max(0) as f64) / 60_000.0;
    let progress_rate = if elapsed_minutes > 0.0 {
        progress.steps_completed as f64 / elapsed_minutes
    } else {
        0.0
    };

    let remaining = progress.remaining_steps();
    let estimated_completion = if progress.steps_total > 0 && remaining == 0 {
        Some(now)
    } else if progress_rate > 0.0 && remaining > 0 {
        // 超出可表示的时间范围时不给出预估
        let millis = remaining as f64 / progress_rate * 60_000.0;
        if millis.is_finite() && millis < i64::MAX as f64 {
            chrono::Duration::try_milliseconds(millis as i64)
                .and_then(|eta| now.checked_add_signed(eta))
        } else {
            None
        }
    } else {
        None
    };

    let blockers = dedup_preserving(
        outcomes
            .iter()
            .filter_map(|o| o.error.as_ref())
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    );

    let mut achievements = Vec::new();
    if progress.sources_gathered > 0 {
        achievements.push(format!("{} sources gathered", progress.sources_gathered));
    }
    if progress.facts_extracted > 0 {
        achievements.push(format!("{} facts extracted", progress.facts_extracted));
    }
    if progress.steps_completed > 0 {
        achievements.push(format!(
            "{}/{} plan steps completed",
            progress.steps_completed, progress.steps_total
        ));
    }
    let findings = &state.working_memory.key_findings;
    achievements.extend(findings.iter().rev().take(5).rev().cloned());

    ProgressAssessment {
        is_on_track,
        progress_rate,
        estimated_completion,
        blockers,
        achievements,
    }
}

/// 近期 action/outcome 的成功比例；没有记录时为 0.5
pub fn strategy_effectiveness(state: &AgentState) -> f64 {
    let pairs = state.working_memory.last_pairs(PAIR_WINDOW);
    if pairs.is_empty() {
        return 0.5;
    }
    let ok = pairs.iter().filter(|(_, o)| o.success).count();
    ok as f64 / pairs.len() as f64
}

/// 按工具统计成功率，归纳强项与弱项
fn tool_strengths(state: &AgentState, analysis: &PatternAnalysis) -> (Vec<String>, Vec<String>) {
    let mut per_tool: Vec<(String, usize, usize)> = Vec::new();
    for (action, outcome) in state.working_memory.last_pairs(PAIR_WINDOW) {
        match per_tool.iter_mut().find(|(t, _, _)| *t == action.tool) {
            Some(entry) => {
                entry.2 += 1;
                if outcome.success {
                    entry.1 += 1;
                }
            }
            None => per_tool.push((action.tool.clone(), outcome.success as usize, 1)),
        }
    }

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    for (tool, ok, total) in per_tool {
        let rate = ok as f64 / total as f64;
        if rate >= RELIABLE_RATE {
            strengths.push(format!("{} reliable ({}/{})", tool, ok, total));
        } else if rate < STRUGGLING_RATE {
            weaknesses.push(format!("{} failing ({}/{})", tool, ok, total));
        }
    }
    for name in &analysis.reliable_strategies {
        strengths.push(format!("strategy {} has a strong track record", name));
    }
    for name in &analysis.struggling_strategies {
        weaknesses.push(format!("strategy {} rarely succeeds", name));
    }
    (strengths, weaknesses)
}

fn summarize_actions(state: &AgentState) -> String {
    let pairs = state.working_memory.last_pairs(PAIR_WINDOW);
    if pairs.is_empty() {
        return "no actions yet".to_string();
    }
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for (a, _) in &pairs {
        let kind = a.action_type.as_str();
        match counts.iter_mut().find(|(k, _)| *k == kind) {
            Some(c) => c.1 += 1,
            None => counts.push((kind, 1)),
        }
    }
    let parts: Vec<String> = counts.iter().map(|(k, n)| format!("{} x{}", k, n)).collect();
    format!("{} actions: {}", pairs.len(), parts.join(", "))
}

fn summarize_outcomes(state: &AgentState) -> String {
    let outcomes = state.working_memory.last_outcomes(PAIR_WINDOW);
    let ok = outcomes.iter().filter(|o| o.success).count();
    format!("{} succeeded, {} failed", ok, outcomes.len() - ok)
}

pub struct ReflectionEngine {
    memory: Arc<MemorySystem>,
    llm: Arc<dyn CompletionService>,
    config: ReflectionSection,
}

impl ReflectionEngine {
    pub fn new(memory: Arc<MemorySystem>, llm: Arc<dyn CompletionService>) -> Self {
        Self::from_config(memory, llm, &ReflectionSection::default())
    }

    pub fn from_config(
        memory: Arc<MemorySystem>,
        llm: Arc<dyn CompletionService>,
        config: &ReflectionSection,
    ) -> Self {
        Self {
            memory,
            llm,
            config: config.clone(),
        }
    }

    /// 会话活跃，且 episode 数或近期行动数达到门槛
    pub async fn can_reflect(&self, session_id: &str, state: &AgentState) -> AgentResult<bool> {
        match self.memory.sessions().get_session(session_id).await? {
            Some(s) if s.is_active() => {}
            _ => return Ok(false),
        }
        let episodes = self
            .memory
            .episodic()
            .recent(Some(session_id), self.config.min_episodes.max(1))
            .await?
            .len();
        let actions = state.working_memory.recent_actions.len();
        Ok(episodes >= self.config.min_episodes || actions >= self.config.min_actions)
    }

    /// 执行一次反思：结果写入 state.reflections 与会话日志，并清零记忆系统的行动计数
    pub async fn reflect(&self, session_id: &str, state: &mut AgentState) -> AgentResult<Reflection> {
        let session = self.memory.sessions().require_active(session_id).await?;

        let episodes = self
            .memory
            .episodic()
            .recent(Some(session_id), EPISODE_WINDOW)
            .await?;
        let actions = state.working_memory.recent_actions.len();
        if episodes.len() < self.config.min_episodes && actions < self.config.min_actions {
            return Err(AgentError::InsufficientExperience {
                episodes: episodes.len(),
                actions,
            });
        }

        let strategies = self
            .memory
            .procedural()
            .list(STRATEGY_WINDOW)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "strategies unavailable for reflection");
                Vec::new()
            });
        let facts = self
            .memory
            .semantic()
            .list(FACT_WINDOW)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "facts unavailable for reflection");
                Vec::new()
            });
        let analysis = analyze_patterns(&episodes, &strategies, &facts);

        let knowledge_gaps = self.knowledge_gaps(state, &facts).await;
        let now = Utc::now();
        let progress_assessment = assess_progress(state, session.created_at, now);
        let strategy_evaluation = self.evaluate_strategy(state, &analysis).await;

        let mut reflection = Reflection {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            iteration_number: state.iteration_count,
            timestamp: now,
            action_summary: summarize_actions(state),
            outcome_summary: summarize_outcomes(state),
            progress_assessment,
            strategy_evaluation,
            learnings: Vec::new(),
            should_replan: false,
            adjustments: Vec::new(),
            next_focus: String::new(),
            knowledge_gaps,
            degraded: false,
        };
        self.synthesize(&session, state, &analysis, &mut reflection).await;

        self.memory
            .sessions()
            .append_reflection(session_id, reflection.clone())
            .await?;
        state.reflections.push(reflection.clone());
        self.memory.mark_reflected(session_id);

        tracing::info!(
            session_id = %session_id,
            iteration = reflection.iteration_number,
            effectiveness = reflection.strategy_evaluation.effectiveness,
            should_replan = reflection.should_replan,
            degraded = reflection.degraded,
            "reflection recorded"
        );
        Ok(reflection)
    }

    /// 工作记忆中的未决问题 ∪ LLM 建议的缺口
    async fn knowledge_gaps(&self, state: &AgentState, facts: &[Fact]) -> Vec<String> {
        let mut gaps = state.working_memory.open_questions.clone();
        let known = facts
            .iter()
            .map(|f| format!("- {}", f.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Research goal: {}\n\nKnown facts:\n{}\n\nOpen questions:\n{}\n\n\
             List up to 5 knowledge gaps that block the goal. Reply with JSON: {{\"gaps\": [\"...\"]}}",
            state.goal.description,
            if known.is_empty() { "(none)".to_string() } else { known },
            gaps.join("\n")
        );
        let options = CompletionOptions::new().with_system(REFLECT_SYSTEM);
        match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(resp) => match parse_list::<String>(resp.text(), "gaps") {
                ParsedOutput::Ok(extra) => gaps.extend(extra),
                ParsedOutput::ParseError(e) => {
                    tracing::warn!(error = %e, "knowledge gap suggestions malformed")
                }
            },
            Err(e) => tracing::warn!(error = %e, "knowledge gap suggestions unavailable"),
        }
        clean_list(gaps)
    }

    async fn evaluate_strategy(&self, state: &AgentState, analysis: &PatternAnalysis) -> StrategyEvaluation {
        let effectiveness = strategy_effectiveness(state);
        let recommendation = Recommendation::from_effectiveness(effectiveness);
        let (strengths, weaknesses) = tool_strengths(state, analysis);

        let prompt = format!(
            "Research goal: {}\nCurrent approach effectiveness: {:.2} ({})\nWeaknesses:\n{}\n\n\
             Suggest up to 3 alternative research strategies. Reply with JSON: {{\"alternatives\": [\"...\"]}}",
            state.goal.description,
            effectiveness,
            recommendation.as_str(),
            weaknesses.join("\n")
        );
        let options = CompletionOptions::new().with_system(REFLECT_SYSTEM);
        let alternative_strategies = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(resp) => parse_list::<String>(resp.text(), "alternatives")
                .ok()
                .map(clean_list)
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "alternative strategies unavailable");
                Vec::new()
            }
        };

        StrategyEvaluation {
            effectiveness,
            strengths,
            weaknesses,
            alternative_strategies,
            recommendation,
        }
    }

    /// 综合：LLM 给出 learnings / adjustments / nextFocus / shouldReplan；失败时降级
    async fn synthesize(
        &self,
        session: &Session,
        state: &AgentState,
        analysis: &PatternAnalysis,
        reflection: &mut Reflection,
    ) {
        let topics: Vec<String> = analysis
            .topic_patterns
            .iter()
            .map(|(w, n)| format!("{} ({})", w, n))
            .collect();
        let prompt = format!(
            "Topic: {}\nGoal: {}\nPhase: {}\nConfidence: {:.2}\n\
             Actions: {}\nOutcomes: {}\nOn track: {}\nBlockers: {}\n\
             Strategy effectiveness: {:.2} (recommendation: {})\nRecurring topics: {}\n\
             Knowledge gaps: {}\nRecent findings:\n{}\n\n\
             Reply with JSON matching this schema:\n{}",
            session.topic,
            state.goal.description,
            state.progress.phase,
            state.progress.confidence,
            reflection.action_summary,
            reflection.outcome_summary,
            reflection.progress_assessment.is_on_track,
            reflection.progress_assessment.blockers.join("; "),
            reflection.strategy_evaluation.effectiveness,
            reflection.strategy_evaluation.recommendation.as_str(),
            topics.join(", "),
            reflection.knowledge_gaps.join("; "),
            state.working_memory.key_findings.join("\n"),
            schema_hint::<SynthesisOutput>()
        );
        let options = CompletionOptions::new().with_system(REFLECT_SYSTEM);
        let parsed = match self.llm.complete(&[Message::user(prompt)], &options).await {
            Ok(resp) => resp.parse::<SynthesisOutput>(),
            Err(e) => ParsedOutput::ParseError(e.to_string()),
        };

        match parsed {
            ParsedOutput::Ok(out) => {
                reflection.learnings = out.learnings;
                reflection.adjustments = out.adjustments;
                reflection.should_replan = out.should_replan;
                reflection.next_focus = out.next_focus;
            }
            ParsedOutput::ParseError(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "reflection synthesis degraded");
                reflection.learnings = vec![DEGRADED_LEARNING.to_string()];
                reflection.adjustments = Vec::new();
                reflection.should_replan = false;
                reflection.degraded = true;
            }
        }
        if reflection.next_focus.is_empty() {
            reflection.next_focus = reflection
                .knowledge_gaps
                .first()
                .cloned()
                .unwrap_or_else(|| state.goal.description.clone());
        }
    }

    /// 记忆量达到合并阈值
    pub async fn should_consolidate(&self) -> AgentResult<bool> {
        let stats = self.memory.stats().await?;
        Ok(stats.episodes >= self.config.consolidate_episode_threshold
            || stats.facts >= self.config.consolidate_fact_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySection;
    use crate::core::state::{Action, ActionType, Goal, Outcome};
    use crate::llm::{MockCompletion, MockEmbedder};
    use crate::memory::{EpisodeInput, InMemoryDocumentStore, InMemoryVectorIndex};
    use serde_json::json;

    fn memory() -> Arc<MemorySystem> {
        Arc::new(MemorySystem::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(MockEmbedder::new()),
            Arc::new(MockCompletion::failing()),
            MemorySection {
                extract_facts: false,
                ..MemorySection::default()
            },
        ))
    }

    fn record(state: &mut AgentState, action_type: ActionType, ok: bool) {
        let a = Action::new(action_type, json!({}), "test");
        let o = if ok {
            Outcome::success(&a.id, json!("done"))
        } else {
            Outcome::failure(&a.id, "timeout")
        };
        state.record_iteration(a, o);
    }

    fn scripted_llm() -> Arc<MockCompletion> {
        Arc::new(MockCompletion::from_fn(|messages| {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if prompt.contains("knowledge gaps that block") {
                Ok(r#"{"gaps": ["benchmark methodology"]}"#.to_string())
            } else if prompt.contains("alternative research strategies") {
                Ok(r#"{"alternatives": ["read vendor docs"]}"#.to_string())
            } else {
                Ok(r#"{"learnings": ["search results are thin"], "adjustments": ["fetch sources"],
                      "nextFocus": "collect benchmarks", "shouldReplan": true}"#
                    .to_string())
            }
        }))
    }

    #[test]
    fn test_effectiveness_defaults_to_half() {
        let state = AgentState::new(Goal::new("g"));
        assert_eq!(strategy_effectiveness(&state), 0.5);
        assert_eq!(
            Recommendation::from_effectiveness(strategy_effectiveness(&state)),
            Recommendation::Adjust
        );
    }

    #[test]
    fn test_assess_progress_on_track() {
        let mut state = AgentState::new(Goal::new("g"));
        state.progress.confidence = 0.8;
        state.progress.steps_total = 4;
        state.progress.steps_completed = 2;
        record(&mut state, ActionType::Search, true);
        record(&mut state, ActionType::Fetch, true);
        record(&mut state, ActionType::Fetch, false);

        let now = Utc::now();
        let a = assess_progress(&state, now - chrono::Duration::minutes(10), now);
        assert!(a.is_on_track);
        assert!((a.progress_rate - 0.2).abs() < 1e-6);
        let eta = a.estimated_completion.unwrap();
        assert!((eta - now).num_minutes() >= 9);
        assert_eq!(a.blockers, vec!["timeout"]);
    }

    #[test]
    fn test_assess_progress_unrepresentable_eta_is_none() {
        let mut state = AgentState::new(Goal::new("g"));
        state.progress.steps_total = u32::MAX;
        state.progress.steps_completed = 1;
        let now = Utc::now();
        let a = assess_progress(&state, DateTime::<Utc>::MIN_UTC, now);
        assert!(a.progress_rate > 0.0);
        assert_eq!(a.estimated_completion, None);
    }

    #[test]
    fn test_assess_progress_low_confidence_not_on_track() {
        let mut state = AgentState::new(Goal::new("g"));
        state.progress.confidence = 0.5;
        record(&mut state, ActionType::Search, true);
        let now = Utc::now();
        assert!(!assess_progress(&state, now, now).is_on_track);
    }

    #[test]
    fn test_topic_patterns_need_two_occurrences() {
        let mk = |topic: &str| Episode {
            id: topic.to_string(),
            session_id: "s".into(),
            timestamp: Utc::now(),
            topic: topic.to_string(),
            actions: vec![],
            outcomes: vec![],
            findings: vec![],
            duration_ms: 0,
            success: true,
            summary: String::new(),
            tags: vec![],
            feedback: None,
        };
        let episodes = vec![mk("rust async runtimes"), mk("rust web frameworks"), mk("databases")];
        let analysis = analyze_patterns(&episodes, &[], &[]);
        assert_eq!(analysis.topic_patterns, vec![("rust".to_string(), 2)]);
        assert_eq!(analysis.episode_count, 3);
    }

    #[tokio::test]
    async fn test_reflect_requires_experience() {
        let mem = memory();
        let engine = ReflectionEngine::new(mem.clone(), scripted_llm());
        let session = mem
            .sessions()
            .create_session("t", Goal::new("g"), None)
            .await
            .unwrap();
        let mut state = session.state.clone();
        assert!(!engine.can_reflect(&session.id, &state).await.unwrap());
        let err = engine.reflect(&session.id, &mut state).await.unwrap_err();
        assert!(matches!(err, AgentError::InsufficientExperience { .. }));

        let err = engine.reflect("missing", &mut state).await.unwrap_err();
        assert!(matches!(err, AgentError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn test_reflect_full_cycle() {
        let mem = memory();
        let engine = ReflectionEngine::new(mem.clone(), scripted_llm());
        let session = mem
            .sessions()
            .create_session("rust runtimes", Goal::new("compare async runtimes"), None)
            .await
            .unwrap();
        let mut state = session.state.clone();
        state.working_memory.add_question("which runtime is fastest?");
        for ok in [true, false, false] {
            record(&mut state, ActionType::Search, ok);
        }
        mem.store_experience(&session.id, EpisodeInput::new("", "rust runtimes", "searched"))
            .await
            .unwrap();
        assert!(engine.can_reflect(&session.id, &state).await.unwrap());

        let r = engine.reflect(&session.id, &mut state).await.unwrap();
        assert!(!r.degraded);
        assert!(r.should_replan);
        assert_eq!(r.learnings, vec!["search results are thin"]);
        assert_eq!(r.next_focus, "collect benchmarks");
        assert_eq!(
            r.knowledge_gaps,
            vec!["which runtime is fastest?", "benchmark methodology"]
        );
        assert_eq!(r.strategy_evaluation.recommendation, Recommendation::Change);
        assert_eq!(r.strategy_evaluation.alternative_strategies, vec!["read vendor docs"]);
        assert_eq!(r.iteration_number, 3);
        assert_eq!(state.reflections.len(), 1);
        assert_eq!(mem.actions_since_reflection(&session.id), 0);

        let stored = mem.sessions().get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.state.reflections.len(), 1);
    }

    #[tokio::test]
    async fn test_reflect_degrades_when_llm_down() {
        let mem = memory();
        let engine = ReflectionEngine::new(mem.clone(), Arc::new(MockCompletion::failing()));
        let session = mem
            .sessions()
            .create_session("t", Goal::new("g"), None)
            .await
            .unwrap();
        let mut state = session.state.clone();
        state.working_memory.add_question("open question");
        for _ in 0..3 {
            record(&mut state, ActionType::Fetch, true);
        }

        let r = engine.reflect(&session.id, &mut state).await.unwrap();
        assert!(r.degraded);
        assert!(!r.should_replan);
        assert_eq!(r.learnings.len(), 1);
        assert_eq!(r.knowledge_gaps, vec!["open question"]);
        assert!(r.strategy_evaluation.alternative_strategies.is_empty());
        assert_eq!(r.strategy_evaluation.recommendation, Recommendation::Continue);
        assert_eq!(r.next_focus, "open question");
    }

    #[tokio::test]
    async fn test_should_consolidate_thresholds() {
        let mem = memory();
        let config = ReflectionSection {
            consolidate_episode_threshold: 1,
            ..ReflectionSection::default()
        };
        let engine = ReflectionEngine::from_config(mem.clone(), scripted_llm(), &config);
        assert!(!engine.should_consolidate().await.unwrap());
        let s = mem
            .sessions()
            .create_session("t", Goal::new("g"), None)
            .await
            .unwrap();
        mem.store_experience(&s.id, EpisodeInput::new("", "t", "x"))
            .await
            .unwrap();
        assert!(engine.should_consolidate().await.unwrap());
    }
}
