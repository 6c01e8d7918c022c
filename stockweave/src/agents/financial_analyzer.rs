//! Financial analyzer: reads the statement repository for the target stock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::error::AgentError;
use crate::financial::{rows_to_hits, FinancialReportRepository, UnitPolicy};
use crate::state::{AgentState, ProcessingStatus};

use super::{finish, Agent};

/// Key this agent owns under `retrieved_data`.
pub const FINANCIAL_SOURCE_KEY: &str = "financial_data";

/// Turns persisted statement rows into financial-row evidence.
pub struct FinancialAnalyzer {
    repository: Arc<dyn FinancialReportRepository>,
    unit_policy: UnitPolicy,
}

impl FinancialAnalyzer {
    pub fn new(repository: Arc<dyn FinancialReportRepository>) -> Self {
        Self {
            repository,
            unit_policy: UnitPolicy::Auto,
        }
    }

    pub fn with_unit_policy(mut self, policy: UnitPolicy) -> Self {
        self.unit_policy = policy;
        self
    }
}

#[async_trait]
impl Agent for FinancialAnalyzer {
    fn name(&self) -> &str {
        "financial_analyzer"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);

        let no_data = |state: &mut AgentState, reason: &str| {
            state
                .retrieved_data
                .insert(FINANCIAL_SOURCE_KEY.to_string(), Vec::new());
            finish(
                state,
                "financial_analyzer",
                ProcessingStatus::CompletedNoData,
                json!({"reason": reason}),
                None,
                started_at,
                "",
                "",
            );
        };

        if !state.analysis().data_requirements.financial_needed {
            no_data(&mut state, "skipped");
            return Ok(state);
        }
        let Some(stock_code) = state.effective_stock_code() else {
            no_data(&mut state, "no stock code");
            return Ok(state);
        };

        let report = match self.repository.get_by_code(&stock_code).await {
            Ok(Some(report)) => report,
            Ok(None) => {
                no_data(&mut state, "no report");
                return Ok(state);
            }
            Err(e) => {
                state.add_error(
                    self.name(),
                    format!("재무 데이터 조회 오류: {}", e),
                    "resource_error",
                    json!({"stock_code": stock_code}),
                );
                state
                    .retrieved_data
                    .insert(FINANCIAL_SOURCE_KEY.to_string(), Vec::new());
                finish(
                    &mut state,
                    "financial_analyzer",
                    ProcessingStatus::Error,
                    json!({}),
                    Some(e.to_string()),
                    started_at,
                    "",
                    "",
                );
                return Ok(state);
            }
        };

        let rows = self
            .repository
            .statements_for_report(report.id)
            .await
            .unwrap_or_default();
        if rows.is_empty() {
            no_data(&mut state, "empty statements");
            return Ok(state);
        }

        let hits = rows_to_hits(&stock_code, &rows, self.unit_policy);
        let data = json!({
            "report_name": report.report_name,
            "row_count": hits.len(),
        });
        state
            .retrieved_data
            .insert(FINANCIAL_SOURCE_KEY.to_string(), hits);
        finish(
            &mut state,
            "financial_analyzer",
            ProcessingStatus::Completed,
            data,
            None,
            started_at,
            "",
            "",
        );
        Ok(state)
    }
}
