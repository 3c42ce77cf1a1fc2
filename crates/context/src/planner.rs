//! Sub-Question Planner - decomposes a query across per-document tools
//!
//! Provides:
//! - Decomposition of a user question into tool-routed sub-questions
//! - Concurrent dispatch with results restored to plan order
//! - Citation-carrying question/answer pairs
//! - Synthesis of the final answer from those pairs

use crate::events::EventSink;
use crate::prompts::decompose_prompt;
use crate::synthesizer::ResponseSynthesizer;
use crate::tools::QueryEngineTool;
use docchat_common::errors::{AppError, PlanningError, Result};
use docchat_common::llm::{ChatMessage, ChatRequest, LlmClient, ToolSpec};
use docchat_common::metrics::record_sub_questions;
use docchat_common::models::{QuestionAnswerPair, SubProcessMetadata, SubProcessSource};
use futures::future::join_all;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

/// Name under which the planner is offered to the chat agent
pub const PLANNER_TOOL_NAME: &str = "qualitative_question_engine";

const PLANNER_TOOL_DESCRIPTION: &str =
    "user can ask questions about the events they have selected";

/// One step of a decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub sub_question: String,
    pub tool_name: String,
}

/// Final answer plus the pairs it was synthesized from
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerResponse {
    pub response: String,
    /// In decomposition order
    pub pairs: Vec<QuestionAnswerPair>,
}

#[derive(Clone)]
pub struct SubQuestionPlanner {
    tools: Vec<QueryEngineTool>,
    llm: Arc<dyn LlmClient>,
    synthesizer: ResponseSynthesizer,
}

impl SubQuestionPlanner {
    pub fn new(
        tools: Vec<QueryEngineTool>,
        llm: Arc<dyn LlmClient>,
        synthesizer: ResponseSynthesizer,
    ) -> Self {
        Self {
            tools,
            llm,
            synthesizer,
        }
    }

    pub fn tools(&self) -> &[QueryEngineTool] {
        &self.tools
    }

    /// Function-calling declaration of the planner
    pub fn tool_spec() -> ToolSpec {
        ToolSpec {
            name: PLANNER_TOOL_NAME.to_string(),
            description: PLANNER_TOOL_DESCRIPTION.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "The question to answer from the selected documents"
                    }
                },
                "required": ["input"]
            }),
        }
    }

    /// Decompose, dispatch, collect and synthesize.
    ///
    /// Fails only when decomposition fails; failing sub-questions are dropped.
    #[instrument(skip(self, query, sink), fields(tools = self.tools.len()))]
    pub async fn query(&self, query: &str, sink: &EventSink) -> Result<PlannerResponse> {
        let plan = self.decompose(query).await?;
        info!(sub_questions = plan.len(), "Query decomposed");

        let pairs = self.dispatch(&plan, sink).await;
        let response = self.synthesizer.synthesize(query, &pairs).await?;

        Ok(PlannerResponse { response, pairs })
    }

    /// One temperature-0 LLM call producing the sub-question plan
    pub async fn decompose(&self, query: &str) -> Result<Vec<SubQuestion>> {
        let request = ChatRequest::new(vec![ChatMessage::user(decompose_prompt(
            &self.tools,
            query,
        ))])
        .with_temperature(0.0);

        let response = self.llm.chat(request).await.map_err(|e| PlanningError::Llm {
            message: e.to_string(),
        })?;
        let output = response.content.unwrap_or_default();

        parse_sub_questions(&output).map_err(AppError::from)
    }

    /// Run every sub-question concurrently; results keep plan order
    async fn dispatch(&self, plan: &[SubQuestion], sink: &EventSink) -> Vec<QuestionAnswerPair> {
        let runs = plan.iter().map(|sq| self.answer_one(sq, sink));
        let pairs: Vec<QuestionAnswerPair> = join_all(runs).await.into_iter().flatten().collect();

        record_sub_questions(pairs.len(), plan.len() - pairs.len());
        pairs
    }

    async fn answer_one(&self, sq: &SubQuestion, sink: &EventSink) -> Option<QuestionAnswerPair> {
        let Some(tool) = self.tools.iter().find(|t| t.name == sq.tool_name) else {
            warn!(tool = %sq.tool_name, "Sub-question routed to unknown tool, skipping");
            return None;
        };

        debug!(tool = %tool.name, question = %sq.sub_question, "Dispatching sub-question");
        match tool.engine.query(&sq.sub_question).await {
            Ok(answer) => {
                let pair = QuestionAnswerPair::from_sub_question(
                    sq.sub_question.clone(),
                    Some(answer.response),
                    &answer.source_nodes,
                );
                sink.sub_process(
                    SubProcessSource::SubQuestion,
                    SubProcessMetadata::with_sub_question(pair.clone()),
                );
                Some(pair)
            }
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "Sub-question failed, dropping it");
                None
            }
        }
    }
}

/// Captures the body of a ```json fenced block
static FENCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok());

/// Parse a plan given as a bare or fenced JSON array
pub fn parse_sub_questions(output: &str) -> std::result::Result<Vec<SubQuestion>, PlanningError> {
    let body = FENCE_RE
        .as_ref()
        .and_then(|re| re.captures(output))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(output)
        .trim();

    let json = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(PlanningError::Parse {
                message: "no JSON array in decomposition output".into(),
            })
        }
    };

    serde_json::from_str(json).map_err(|e| PlanningError::Parse {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docchat_common::errors::AppError;
    use docchat_common::llm::{ChatResponse, ScriptedLlm};
    use docchat_common::models::{Citation, SubProcessStatus};
    use docchat_common::nodes::{NodeMetadata, NodeWithScore, TextNode};
    use docchat_common::EMPTY_RESPONSE;
    use docchat_index::{QueryEngine, QueryResponse};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Engine answering after a fixed delay with one passage per call
    struct DelayedEngine {
        delay_ms: u64,
        doc_id: Uuid,
        passages: bool,
        fail: bool,
    }

    #[async_trait]
    impl QueryEngine for DelayedEngine {
        async fn retrieve(&self, _query: &str) -> Result<Vec<NodeWithScore>> {
            if !self.passages {
                return Ok(vec![]);
            }
            Ok(vec![NodeWithScore {
                node: TextNode::new(
                    "The ferry budget doubled.",
                    NodeMetadata::for_document(self.doc_id, Some("7".into())),
                ),
                score: Some(0.9),
            }])
        }

        async fn query(&self, query: &str) -> Result<QueryResponse> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            if self.fail {
                return Err(AppError::LlmError {
                    message: "boom".into(),
                });
            }
            let source_nodes = self.retrieve(query).await?;
            Ok(QueryResponse {
                response: format!("answer to {}", query),
                source_nodes,
            })
        }
    }

    fn tool(name: &str, delay_ms: u64, passages: bool, fail: bool) -> QueryEngineTool {
        QueryEngineTool {
            name: name.into(),
            description: format!("{} description", name),
            engine: Arc::new(DelayedEngine {
                delay_ms,
                doc_id: Uuid::new_v4(),
                passages,
                fail,
            }),
        }
    }

    /// Decomposes into `plan`, echoes synthesis prompts back
    fn planning_llm(plan: &'static str) -> ScriptedLlm {
        ScriptedLlm::new(move |req| {
            let prompt = &req.messages[0].content;
            if prompt.contains("sub_question") {
                Ok(ChatResponse::text(plan))
            } else {
                Ok(ChatResponse::text(format!("SYNTH:{}", prompt)))
            }
        })
    }

    #[test]
    fn test_parse_fenced_and_bare_plans() {
        let bare = r#"[{"sub_question": "Q1", "tool_name": "a.pdf"}]"#;
        assert_eq!(parse_sub_questions(bare).unwrap()[0].sub_question, "Q1");

        let fenced = "Here you go:\n```json\n[{\"sub_question\": \"Q2\", \"tool_name\": \"b.pdf\"}]\n```";
        assert_eq!(parse_sub_questions(fenced).unwrap()[0].tool_name, "b.pdf");

        // The fenced block wins over brackets in the surrounding prose
        assert!(FENCE_RE.is_some());
        let noisy = "Plan [draft]:\n```json\n[{\"sub_question\": \"Q3\", \"tool_name\": \"c.pdf\"}]\n```\nSee [1].";
        assert_eq!(parse_sub_questions(noisy).unwrap()[0].sub_question, "Q3");

        assert!(matches!(
            parse_sub_questions("I cannot help with that."),
            Err(PlanningError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_results_keep_plan_order_under_reordered_completion() {
        let llm = planning_llm(
            r#"[{"sub_question": "Q1", "tool_name": "slow"},
                {"sub_question": "Q2", "tool_name": "medium"},
                {"sub_question": "Q3", "tool_name": "fast"}]"#,
        );
        let tools = vec![
            tool("slow", 60, true, false),
            tool("medium", 30, true, false),
            tool("fast", 1, true, false),
        ];
        let planner = SubQuestionPlanner::new(
            tools,
            Arc::new(llm.clone()),
            ResponseSynthesizer::new(Arc::new(llm.clone()), vec![]),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Uuid::new_v4(), tx);
        let result = planner.query("Compare the budgets", &sink).await.unwrap();

        let questions: Vec<&str> = result.pairs.iter().map(|p| p.question.as_str()).collect();
        assert_eq!(questions, vec!["Q1", "Q2", "Q3"]);

        let synth_prompt = &result.response;
        let (p1, p2, p3) = (
            synth_prompt.find("Sub question: Q1").unwrap(),
            synth_prompt.find("Sub question: Q2").unwrap(),
            synth_prompt.find("Sub question: Q3").unwrap(),
        );
        assert!(p1 < p2 && p2 < p3);

        // Events arrive in completion order
        drop(sink);
        let mut emitted = Vec::new();
        while let Some(crate::events::TurnEvent::SubProcess(sp)) = rx.recv().await {
            assert_eq!(sp.source, SubProcessSource::SubQuestion);
            assert_eq!(sp.status, SubProcessStatus::Finished);
            emitted.push(sp.metadata_map.unwrap().sub_question.unwrap().question);
        }
        assert_eq!(emitted, vec!["Q3", "Q2", "Q1"]);
    }

    #[tokio::test]
    async fn test_zero_passages_yield_no_citations() {
        let llm = planning_llm(r#"[{"sub_question": "Q1", "tool_name": "empty"}]"#);
        let planner = SubQuestionPlanner::new(
            vec![tool("empty", 1, false, false)],
            Arc::new(llm.clone()),
            ResponseSynthesizer::new(Arc::new(llm), vec![]),
        );

        let result = planner.query("anything", &EventSink::disabled()).await.unwrap();
        assert_eq!(result.pairs.len(), 1);
        assert!(result.pairs[0].citations.is_none());
    }

    #[tokio::test]
    async fn test_citations_resolved_from_passages() {
        let llm = planning_llm(r#"[{"sub_question": "Q1", "tool_name": "doc"}]"#);
        let planner = SubQuestionPlanner::new(
            vec![tool("doc", 1, true, false)],
            Arc::new(llm.clone()),
            ResponseSynthesizer::new(Arc::new(llm), vec![]),
        );

        let result = planner.query("budget?", &EventSink::disabled()).await.unwrap();
        let citations: &Vec<Citation> = result.pairs[0].citations.as_ref().unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].page_number, 7);
    }

    #[tokio::test]
    async fn test_unknown_tools_and_failures_are_dropped() {
        let llm = planning_llm(
            r#"[{"sub_question": "Q1", "tool_name": "missing"},
                {"sub_question": "Q2", "tool_name": "broken"},
                {"sub_question": "Q3", "tool_name": "ok"}]"#,
        );
        let planner = SubQuestionPlanner::new(
            vec![tool("broken", 1, true, true), tool("ok", 1, true, false)],
            Arc::new(llm.clone()),
            ResponseSynthesizer::new(Arc::new(llm), vec![]),
        );

        let result = planner.query("q", &EventSink::disabled()).await.unwrap();
        assert_eq!(result.pairs.len(), 1);
        assert_eq!(result.pairs[0].question, "Q3");
    }

    #[tokio::test]
    async fn test_decomposition_failure_fails_query() {
        let llm = ScriptedLlm::new(|_| {
            Err(AppError::LlmError {
                message: "rate limited".into(),
            })
        });
        let planner = SubQuestionPlanner::new(
            vec![tool("doc", 1, true, false)],
            Arc::new(llm.clone()),
            ResponseSynthesizer::new(Arc::new(llm), vec![]),
        );

        let err = planner.query("q", &EventSink::disabled()).await.unwrap_err();
        assert!(matches!(err, AppError::Planning(PlanningError::Llm { .. })));

        let garbled = ScriptedLlm::fixed("not json at all");
        let planner = SubQuestionPlanner::new(
            vec![],
            Arc::new(garbled.clone()),
            ResponseSynthesizer::new(Arc::new(garbled), vec![]),
        );
        let err = planner.query("q", &EventSink::disabled()).await.unwrap_err();
        assert!(matches!(err, AppError::Planning(PlanningError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_empty_plan_gives_empty_response() {
        let llm = planning_llm("[]");
        let planner = SubQuestionPlanner::new(
            vec![tool("doc", 1, true, false)],
            Arc::new(llm.clone()),
            ResponseSynthesizer::new(Arc::new(llm.clone()), vec![]),
        );

        let result = planner.query("hello", &EventSink::disabled()).await.unwrap();
        assert_eq!(result.response, EMPTY_RESPONSE);
        assert!(result.pairs.is_empty());
        assert_eq!(llm.call_count(), 1);
    }
}
