//! User-facing status messages for agent transitions.
//!
//! The monitor translates internal agent names into Korean progress text;
//! unknown agents get a generic template.

/// Which edge of an agent run a message describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessagePhase {
    Start,
    Complete,
}

/// User-facing message for one agent + phase.
pub fn agent_message(agent: &str, phase: MessagePhase) -> String {
    let pair = match agent {
        "session_manager" => ("세션 초기화 중...", "세션 초기화 완료"),
        "orchestrator" => ("질문 분석 전략 수립 중...", "분석 계획 수립 완료"),
        "question_analyzer" => ("질문 의도 파악 중...", "질문 분석 완료"),
        "telegram_retriever" => ("내부 데이터 정보 검색 중...", "내부 데이터 검색 완료"),
        "report_analyzer" => ("기업 보고서 분석 중...", "기업 보고서 분석 완료"),
        "financial_analyzer" => ("재무 데이터 분석 중...", "재무 분석 완료"),
        "technical_analyzer" => ("기술적 지표 분석 중...", "기술적 분석 완료"),
        "industry_analyzer" => ("산업 및 경쟁사 분석 중...", "산업 분석 완료"),
        "confidential_analyzer" => ("비공개 정보 분석 중...", "비공개 정보 분석 완료"),
        "knowledge_integrator" => ("수집된 정보 통합 중...", "정보 통합 완료"),
        "summarizer" => ("결과 요약 생성 중...", "요약 생성 완료"),
        "response_formatter" => ("답변 형식 최적화 중...", "답변 형식화 완료"),
        "fallback_manager" => ("대체 정보 탐색 중...", "대체 정보 탐색 완료"),
        "parallel_search" => ("다중 데이터 소스 검색 시작...", "데이터 검색 완료"),
        "context_response" => ("이전 대화 맥락 고려 중...", "대화 맥락 분석 완료"),
        other => {
            return match phase {
                MessagePhase::Start => {
                    format!("{} 에이전트가 데이터 분석을 시작합니다.", other)
                }
                MessagePhase::Complete => {
                    format!("{} 에이전트의 데이터 분석이 완료되었습니다.", other)
                }
            }
        }
    };
    match phase {
        MessagePhase::Start => pair.0.to_string(),
        MessagePhase::Complete => pair.1.to_string(),
    }
}
