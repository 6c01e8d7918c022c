//! Response formatter: prose → typed component tree.
//!
//! With a TOC: one level-1 title heading, then each section structured in
//! parallel by a small LLM bound to the component tools; tool calls map to
//! typed components, headings get post-processed (bold-prefixed headings
//! demote to paragraphs, numbering prefixes fix the level). Without a TOC
//! the plain summary runs through the markdown fallback converter. The
//! parallel markdown string lands in `answer`/`formatted_response`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use crate::components::{
    components_to_markdown, markdown::parse_markdown, ChartDataset, Component, TableHeader,
};
use crate::error::AgentError;
use crate::llm::{strip_code_fences, AgentLlm, LlmClient, ToolCall, ToolSpec};
use crate::message::Message;
use crate::prompts::{NO_DATA_MESSAGE, SECTION_FORMAT_INSTRUCTIONS};
use crate::state::{AgentState, ProcessingStatus, TocSection};

use super::{finish, usage_from_state, Agent};

static LEVEL3_NUMBERING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.?\s*").expect("level3 regex"));
static LEVEL2_NUMBERING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.?\s*\S").expect("level2 regex"));

/// Minimum chart points before the formatter emits a price line chart.
const MIN_CHART_LABELS: usize = 5;

/// Builds the fixed component-tool declarations offered to the section LLM.
pub fn component_tool_specs() -> Vec<ToolSpec> {
    let spec = |name: &str, description: &str, schema: Value| ToolSpec {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema,
    };
    vec![
        spec(
            "create_heading",
            "섹션 제목 컴포넌트",
            json!({"type": "object", "properties": {"level": {"type": "integer"}, "content": {"type": "string"}}, "required": ["level", "content"]}),
        ),
        spec(
            "create_paragraph",
            "텍스트 단락 컴포넌트",
            json!({"type": "object", "properties": {"content": {"type": "string"}}, "required": ["content"]}),
        ),
        spec(
            "create_list",
            "목록 컴포넌트",
            json!({"type": "object", "properties": {"ordered": {"type": "boolean"}, "items": {"type": "array", "items": {"type": "string"}}}, "required": ["ordered", "items"]}),
        ),
        spec(
            "create_table",
            "표 컴포넌트",
            json!({"type": "object", "properties": {"title": {"type": "string"}, "headers": {"type": "array"}, "rows": {"type": "array"}}, "required": ["headers", "rows"]}),
        ),
        spec(
            "create_bar_chart",
            "막대 차트 컴포넌트",
            json!({"type": "object", "properties": {"title": {"type": "string"}, "labels": {"type": "array"}, "datasets": {"type": "array"}}, "required": ["labels", "datasets"]}),
        ),
        spec(
            "create_line_chart",
            "선 차트 컴포넌트",
            json!({"type": "object", "properties": {"title": {"type": "string"}, "labels": {"type": "array"}, "datasets": {"type": "array"}}, "required": ["labels", "datasets"]}),
        ),
        spec(
            "create_code_block",
            "코드 블록 컴포넌트",
            json!({"type": "object", "properties": {"language": {"type": "string"}, "content": {"type": "string"}}, "required": ["content"]}),
        ),
        spec(
            "create_image",
            "이미지 컴포넌트",
            json!({"type": "object", "properties": {"url": {"type": "string"}, "alt": {"type": "string"}, "caption": {"type": "string"}}, "required": ["url", "alt"]}),
        ),
    ]
}

/// Heading post-processing: bold-prefixed content demotes to a paragraph;
/// numbering prefixes override the level (`1.` → 2, `1.1` → 3); leading
/// `#` markers are stripped.
fn postprocess_heading(level: u8, content: &str) -> Component {
    let content = content.trim_start_matches('#').trim().to_string();
    if content.starts_with("**") {
        return Component::Paragraph { content };
    }
    let level = if LEVEL3_NUMBERING.is_match(&content) {
        3
    } else if LEVEL2_NUMBERING.is_match(&content) && content.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        2
    } else {
        level
    };
    Component::heading(level, content)
}

/// Maps one tool call to a component. Unknown tools and malformed argument
/// payloads are dropped.
fn tool_call_to_component(call: &ToolCall) -> Option<Component> {
    let args: Value = serde_json::from_str(&call.arguments).ok()?;
    let text = |key: &str| args.get(key).and_then(|v| v.as_str()).map(String::from);
    match call.name.as_str() {
        "create_heading" => {
            // Some models send the level as a float.
            let level = args
                .get("level")
                .and_then(|v| v.as_f64())
                .map(|l| l as u8)
                .unwrap_or(4);
            Some(postprocess_heading(level, &text("content")?))
        }
        "create_paragraph" => Some(Component::Paragraph {
            content: text("content")?,
        }),
        "create_list" => Some(Component::List {
            ordered: args.get("ordered").and_then(|v| v.as_bool()).unwrap_or(false),
            items: args
                .get("items")?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        }),
        "create_table" => Some(Component::Table {
            title: text("title").unwrap_or_default(),
            headers: serde_json::from_value::<Vec<TableHeader>>(args.get("headers")?.clone())
                .ok()?,
            rows: args.get("rows")?.as_array()?.clone(),
        }),
        "create_bar_chart" | "create_line_chart" => {
            let title = text("title").unwrap_or_default();
            let labels = args
                .get("labels")?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
            let datasets =
                serde_json::from_value::<Vec<ChartDataset>>(args.get("datasets")?.clone()).ok()?;
            Some(if call.name == "create_bar_chart" {
                Component::BarChart {
                    title,
                    labels,
                    datasets,
                }
            } else {
                Component::LineChart {
                    title,
                    labels,
                    datasets,
                }
            })
        }
        "create_code_block" => Some(Component::CodeBlock {
            language: text("language"),
            content: text("content")?,
        }),
        "create_image" => Some(Component::Image {
            url: text("url")?,
            alt: text("alt").unwrap_or_default(),
            caption: text("caption"),
        }),
        _ => None,
    }
}

/// Converts prose into the typed component tree.
pub struct ResponseFormatter {
    agent_llm: Arc<AgentLlm>,
    /// Tools-bound client for the section pass; falls back to the agent's
    /// plain model (text path) when absent.
    section_client: Option<Arc<dyn LlmClient>>,
}

impl ResponseFormatter {
    pub fn new(agent_llm: Arc<AgentLlm>) -> Self {
        Self {
            agent_llm,
            section_client: None,
        }
    }

    /// Installs a client with the component tools bound (e.g.
    /// `ChatOpenAi::from_config(..).with_tools(component_tool_specs())`).
    pub fn with_section_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.section_client = Some(client);
        self
    }

    /// Structures one section: tool calls → components; plain text → a
    /// fence-stripped paragraph. A missing section heading is synthesized
    /// from the TOC title.
    async fn process_section(
        &self,
        section: &TocSection,
        content: &str,
        usage: &crate::token_usage::UsageContext,
    ) -> Vec<Component> {
        let messages = [
            Message::system(SECTION_FORMAT_INSTRUCTIONS),
            Message::user(format!("섹션 제목: {}\n\n섹션 내용:\n{}", section.title, content)),
        ];
        let response = match &self.section_client {
            Some(client) => client.invoke(&messages).await.map_err(AgentError::from),
            None => self
                .agent_llm
                .invoke_with_fallback(&messages, usage)
                .await
                .map_err(AgentError::from),
        };

        let mut components = match response {
            Ok(response) if !response.tool_calls.is_empty() => response
                .tool_calls
                .iter()
                .filter_map(tool_call_to_component)
                .collect::<Vec<_>>(),
            Ok(response) => {
                let stripped = strip_code_fences(&response.content);
                if stripped.is_empty() {
                    vec![Component::paragraph(content.to_string())]
                } else {
                    vec![Component::paragraph(stripped)]
                }
            }
            Err(e) => {
                warn!(section = %section.title, error = %e, "section formatting failed");
                vec![Component::paragraph(content.to_string())]
            }
        };

        let has_heading = components
            .iter()
            .any(|c| matches!(c, Component::Heading { .. }));
        if !has_heading {
            components.insert(0, Component::heading(2, section.title.clone()));
        }
        components
    }

    /// Price line chart + narrative from the technical analyzer, when its
    /// chart series is substantial enough.
    fn technical_components(state: &AgentState) -> Vec<Component> {
        let Some(result) = state.agent_results.get("technical_analyzer") else {
            return Vec::new();
        };
        if !matches!(result.status, ProcessingStatus::Completed) {
            return Vec::new();
        }
        let chart = &result.data["chart"];
        let labels: Vec<String> = chart["dates"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if labels.len() < MIN_CHART_LABELS {
            return Vec::new();
        }
        let data: Vec<Value> = chart["close"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut components = vec![Component::LineChart {
            title: "주가 추이".to_string(),
            labels,
            datasets: vec![ChartDataset {
                label: "종가".to_string(),
                data,
            }],
        }];
        if let Some(summary) = result.data["summary"].as_str() {
            if !summary.is_empty() {
                components.push(Component::paragraph(summary.to_string()));
            }
        }
        components
    }
}

#[async_trait]
impl Agent for ResponseFormatter {
    fn name(&self) -> &str {
        "response_formatter"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        let summary = state
            .summary
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_DATA_MESSAGE.to_string());
        let usage = usage_from_state(&state);

        let mut components: Vec<Component> = Vec::new();
        match state.final_report_toc.clone() {
            Some(toc) if !toc.sections.is_empty() => {
                let title = if toc.title.is_empty() {
                    match state.effective_stock_name() {
                        Some(name) => format!("{} 분석 보고서", name),
                        None => "분석 보고서".to_string(),
                    }
                } else {
                    toc.title.clone()
                };
                components.push(Component::heading(1, title));

                let section_futures = toc.sections.iter().map(|section| {
                    let content = state
                        .summary_by_section
                        .get(&section.title)
                        .cloned()
                        .unwrap_or_else(|| summary.clone());
                    let usage = usage.clone();
                    async move { self.process_section(section, &content, &usage).await }
                });
                for section_components in join_all(section_futures).await {
                    components.extend(section_components);
                }
            }
            _ => {
                components.extend(parse_markdown(&summary));
            }
        }

        components.extend(Self::technical_components(&state));
        if components.is_empty() {
            components.push(Component::paragraph(NO_DATA_MESSAGE.to_string()));
        }

        let answer = components_to_markdown(&components);
        state.components = components;
        state.answer = Some(answer.clone());
        state.formatted_response = Some(answer);
        let component_count = state.components.len();
        finish(
            &mut state,
            "response_formatter",
            ProcessingStatus::Completed,
            json!({"component_count": component_count}),
            None,
            started_at,
            &model_name,
            &provider,
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::finish as finish_result;
    use crate::agents::test_support::{analyzed_state, mock_agent_llm};
    use crate::llm::{LlmResponse, MockLlm};
    use crate::state::ReportToc;

    fn toc(sections: Vec<(&str, &str)>) -> ReportToc {
        ReportToc {
            title: "삼성전자 분석 보고서".to_string(),
            sections: sections
                .into_iter()
                .map(|(id, title)| TocSection {
                    section_id: id.to_string(),
                    title: title.to_string(),
                    subsections: vec![],
                })
                .collect(),
        }
    }

    /// **Scenario**: heading post-processing — bold demotes, numbering sets
    /// the level, leading # marks strip.
    #[test]
    fn heading_postprocessing_rules() {
        assert!(matches!(
            postprocess_heading(2, "**굵은 제목**"),
            Component::Paragraph { .. }
        ));
        match postprocess_heading(4, "1. 개요") {
            Component::Heading { level, .. } => assert_eq!(level, 2),
            other => panic!("expected heading, got {:?}", other),
        }
        match postprocess_heading(2, "1.2 세부 항목") {
            Component::Heading { level, .. } => assert_eq!(level, 3),
            other => panic!("expected heading, got {:?}", other),
        }
        match postprocess_heading(2, "## 마크다운 제목") {
            Component::Heading { level, content } => {
                assert_eq!(level, 2);
                assert_eq!(content, "마크다운 제목");
            }
            other => panic!("expected heading, got {:?}", other),
        }
    }

    /// **Scenario**: tool calls map to typed components; float levels are
    /// coerced; unknown tools drop.
    #[test]
    fn tool_calls_map_to_components() {
        let call = |name: &str, args: Value| ToolCall {
            name: name.to_string(),
            arguments: args.to_string(),
            id: None,
        };
        assert!(matches!(
            tool_call_to_component(&call("create_heading", json!({"level": 2.0, "content": "3. 전망"}))),
            Some(Component::Heading { level: 2, .. })
        ));
        assert!(matches!(
            tool_call_to_component(&call("create_list", json!({"ordered": true, "items": ["a", "b"]}))),
            Some(Component::List { ordered: true, .. })
        ));
        assert!(tool_call_to_component(&call("create_magic", json!({}))).is_none());
        assert!(tool_call_to_component(&call("create_paragraph", json!({"no_content": 1}))).is_none());
    }

    /// **Scenario**: structured section formatting — two sections produce two
    /// level-2 headings in TOC order, each followed by at least one body
    /// component.
    #[tokio::test]
    async fn sections_format_in_toc_order() {
        let mut state = analyzed_state("삼성전자 종합 분석");
        state.summary = Some("전체 요약".to_string());
        state
            .summary_by_section
            .insert("1. 개요".to_string(), "매출 100억 달성".to_string());
        state
            .summary_by_section
            .insert("2. 전망".to_string(), "내년 성장 지속 전망".to_string());
        state.final_report_toc = Some(toc(vec![("s1", "1. 개요"), ("s2", "2. 전망")]));

        // Section LLM answers with a paragraph tool call each time.
        let section_llm = Arc::new(MockLlm::with_responses(
            (0..2)
                .map(|_| {
                    Ok(LlmResponse {
                        tool_calls: vec![ToolCall {
                            name: "create_paragraph".to_string(),
                            arguments: json!({"content": "본문 단락"}).to_string(),
                            id: None,
                        }],
                        ..Default::default()
                    })
                })
                .collect(),
        ));
        let formatter = ResponseFormatter::new(mock_agent_llm("response_formatter", ""))
            .with_section_client(section_llm);
        let state = formatter.process(state).await.unwrap();

        let headings: Vec<(u8, String)> = state
            .components
            .iter()
            .filter_map(|c| match c {
                Component::Heading { level, content } => Some((*level, content.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(headings[0].0, 1);
        assert_eq!(headings[1], (2, "1. 개요".to_string()));
        assert_eq!(headings[2], (2, "2. 전망".to_string()));

        // Each section heading is followed by at least one body component.
        let idx1 = state
            .components
            .iter()
            .position(|c| matches!(c, Component::Heading { content, .. } if content == "1. 개요"))
            .unwrap();
        assert!(matches!(
            state.components[idx1 + 1],
            Component::Paragraph { .. } | Component::List { .. } | Component::Table { .. }
        ));
        assert!(state.answer.as_ref().unwrap().contains("# 삼성전자 분석 보고서"));
    }

    /// **Scenario**: no TOC → markdown fallback conversion of the summary.
    #[tokio::test]
    async fn fallback_parses_summary_markdown() {
        let mut state = analyzed_state("질문");
        state.summary = Some("## 요약\n\n- 포인트 하나\n- 포인트 둘".to_string());
        let formatter = ResponseFormatter::new(mock_agent_llm("response_formatter", ""));
        let state = formatter.process(state).await.unwrap();
        assert!(matches!(state.components[0], Component::Heading { level: 2, .. }));
        assert!(matches!(state.components[1], Component::List { .. }));
        assert!(state.formatted_response.is_some());
    }

    /// **Scenario**: completed technical analysis adds a line chart with ≥5
    /// labels and the narrative paragraph.
    #[tokio::test]
    async fn technical_chart_appended() {
        let mut state = analyzed_state("삼성전자 기술적 분석 해줘");
        state.summary = Some("기술적 분석 결과".to_string());
        finish_result(
            &mut state,
            "technical_analyzer",
            ProcessingStatus::Completed,
            json!({
                "chart": {
                    "dates": ["1", "2", "3", "4", "5", "6"],
                    "close": [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                },
                "summary": "상승 추세",
            }),
            None,
            Utc::now(),
            "m",
            "mock",
        );
        let formatter = ResponseFormatter::new(mock_agent_llm("response_formatter", ""));
        let state = formatter.process(state).await.unwrap();

        let chart = state.components.iter().find_map(|c| match c {
            Component::LineChart { labels, .. } => Some(labels.len()),
            _ => None,
        });
        assert!(chart.unwrap() >= 5);
        assert!(state
            .components
            .iter()
            .any(|c| matches!(c, Component::Paragraph { content } if content == "상승 추세")));
    }

    /// **Scenario**: empty summary yields the fixed no-data paragraph.
    #[tokio::test]
    async fn empty_summary_yields_no_data_paragraph() {
        let formatter = ResponseFormatter::new(mock_agent_llm("response_formatter", ""));
        let state = formatter.process(analyzed_state("질문")).await.unwrap();
        assert!(state
            .answer
            .as_ref()
            .unwrap()
            .contains("현재 요청에 대한 정보를 찾을 수 없습니다"));
    }
}
