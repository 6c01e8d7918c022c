//! Technical analyzer: candles + supply/demand → indicators, patterns,
//! signals, sentiment, and an LLM narrative.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::warn;

use crate::datasvc::StockDataService;
use crate::error::AgentError;
use crate::llm::AgentLlm;
use crate::message::Message;
use crate::prompts::TECHNICAL_SUMMARY_SYSTEM;
use crate::state::{AgentState, ProcessingStatus};
use crate::technical::{
    calculate_indicators,
    patterns::analyze_chart_patterns,
    signals::{analyze_market_sentiment, generate_trading_signals},
};

use super::{finish, usage_from_state, Agent};

/// Days of supply/demand history pulled alongside the chart.
const SUPPLY_DEMAND_DAYS: i64 = 30;
/// Chart points included in the result for the renderer's line chart.
const CHART_POINTS: usize = 120;

/// Runs the full technical analysis for the target stock.
pub struct TechnicalAnalyzer {
    agent_llm: Arc<AgentLlm>,
    service: Arc<dyn StockDataService>,
}

impl TechnicalAnalyzer {
    pub fn new(agent_llm: Arc<AgentLlm>, service: Arc<dyn StockDataService>) -> Self {
        Self { agent_llm, service }
    }
}

#[async_trait]
impl Agent for TechnicalAnalyzer {
    fn name(&self) -> &str {
        "technical_analyzer"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        if !state.analysis().data_requirements.technical_analysis_needed {
            finish(
                &mut state,
                "technical_analyzer",
                ProcessingStatus::CompletedNoData,
                json!({"skipped": true}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }
        let Some(stock_code) = state.effective_stock_code() else {
            state.add_error(
                self.name(),
                "기술적 분석에 필요한 종목코드가 없습니다.",
                "processing_error",
                json!({}),
            );
            finish(
                &mut state,
                "technical_analyzer",
                ProcessingStatus::CompletedNoData,
                json!({"reason": "no stock code"}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        };

        let end_date = Utc::now().date_naive();
        let start_date = end_date - Duration::days(SUPPLY_DEMAND_DAYS);
        let start_date_str = start_date.format("%Y%m%d").to_string();
        let end_date_str = end_date.format("%Y%m%d").to_string();
        let (chart, supply_demand, indices) = tokio::join!(
            self.service.get_chart(&stock_code, "1y", "1d"),
            self.service.get_supply_demand(&stock_code, &start_date_str, &end_date_str),
            self.service.get_market_indices()
        );

        let frame = match chart {
            Ok(frame) if !frame.is_empty() => frame,
            Ok(_) => {
                finish(
                    &mut state,
                    "technical_analyzer",
                    ProcessingStatus::CompletedNoData,
                    json!({"reason": "empty chart"}),
                    None,
                    started_at,
                    &model_name,
                    &provider,
                );
                return Ok(state);
            }
            Err(e) => {
                state.add_error(
                    self.name(),
                    format!("차트 데이터 조회 실패: {}", e),
                    "processing_error",
                    json!({"stock_code": stock_code}),
                );
                finish(
                    &mut state,
                    "technical_analyzer",
                    ProcessingStatus::Failed,
                    json!({}),
                    Some(e.to_string()),
                    started_at,
                    &model_name,
                    &provider,
                );
                return Ok(state);
            }
        };
        let supply_demand = supply_demand.unwrap_or_else(|e| {
            warn!(error = %e, "supply/demand fetch failed");
            Vec::new()
        });
        let market_indices = indices.unwrap_or_else(|e| {
            warn!(error = %e, "market indices fetch failed");
            json!(null)
        });

        let indicators = calculate_indicators(&frame);
        let chart_patterns = analyze_chart_patterns(&frame);
        let trading_signals = generate_trading_signals(&frame, &indicators);
        let sentiment = analyze_market_sentiment(&frame, &supply_demand);

        // Tail of the series for the renderer's line chart.
        let tail = frame.len().saturating_sub(CHART_POINTS);
        let chart_dates: Vec<String> = frame.dates[tail..].to_vec();
        let chart_close: Vec<Option<f64>> = frame.close[tail..]
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect();

        let summary_input = json!({
            "indicators": indicators,
            "patterns": chart_patterns,
            "signals": trading_signals,
            "sentiment": sentiment,
        });
        let usage = usage_from_state(&state);
        let summary = match self
            .agent_llm
            .invoke_with_fallback(
                &[
                    Message::system(TECHNICAL_SUMMARY_SYSTEM),
                    Message::user(format!(
                        "종목: {}\n분석 데이터: {}",
                        stock_code, summary_input
                    )),
                ],
                &usage,
            )
            .await
        {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "technical summary failed");
                String::new()
            }
        };

        let data = json!({
            "indicators": indicators,
            "patterns": chart_patterns,
            "signals": trading_signals,
            "sentiment": sentiment,
            "market_indices": market_indices,
            "summary": summary,
            "chart": {"dates": chart_dates, "close": chart_close},
        });
        finish(
            &mut state,
            "technical_analyzer",
            ProcessingStatus::Completed,
            data,
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
    use crate::agents::test_support::{analyzed_state, mock_agent_llm};
    use crate::datasvc::test_support::MockStockDataService;

    fn analyzer(service: MockStockDataService) -> TechnicalAnalyzer {
        TechnicalAnalyzer::new(
            mock_agent_llm("technical_analyzer", "상승 추세가 이어지고 있습니다."),
            Arc::new(service),
        )
    }

    /// **Scenario**: a year of candles produces indicators, signals, chart
    /// series and a narrative; everything serializes JSON-safe.
    #[tokio::test]
    async fn full_analysis_over_year_of_candles() {
        let state = analyzer(MockStockDataService::year_of_candles())
            .process(analyzed_state("삼성전자 기술적 분석 해줘"))
            .await
            .unwrap();

        assert_eq!(
            state.processing_status["technical_analyzer"],
            ProcessingStatus::Completed
        );
        let data = &state.agent_results["technical_analyzer"].data;
        assert!(data["indicators"]["sma_20"].is_number());
        assert!(data["signals"]["overall_signal"].is_string());
        assert!(data["chart"]["dates"].as_array().unwrap().len() >= 5);
        assert_eq!(data["summary"], "상승 추세가 이어지고 있습니다.");
        // Whole payload must be representable as a JSON string (no NaN).
        assert!(serde_json::to_string(data).is_ok());
    }

    /// **Scenario**: chart fetch failure fails the agent but records the
    /// error instead of propagating.
    #[tokio::test]
    async fn chart_failure_is_recorded() {
        let state = analyzer(MockStockDataService {
            candles: 0,
            fail_chart: true,
        })
        .process(analyzed_state("기술적 분석"))
        .await
        .unwrap();
        assert_eq!(
            state.processing_status["technical_analyzer"],
            ProcessingStatus::Failed
        );
        assert_eq!(state.errors.len(), 1);
    }

    /// **Scenario**: missing stock code degrades to completed_no_data.
    #[tokio::test]
    async fn missing_stock_code_is_no_data() {
        let mut state = analyzed_state("기술적 분석");
        state.stock_code = None;
        state.question_analysis.as_mut().unwrap().entities.stock_code = None;
        let state = analyzer(MockStockDataService::year_of_candles())
            .process(state)
            .await
            .unwrap();
        assert_eq!(
            state.processing_status["technical_analyzer"],
            ProcessingStatus::CompletedNoData
        );
    }
}
