//! Financial-statement repository: read interface the core consumes.
//!
//! The PDF ingestion collaborator writes reports and per-statement rows;
//! the core only reads via [`FinancialReportRepository`]. Statement rows
//! are keyed by `(company, item_code, year_month)`. Display units are a
//! configurable [`UnitPolicy`], not a contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::SourceHit;
use crate::store::StoreError;

/// Statement kinds persisted per report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
    EquityChange,
    Summary,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::IncomeStatement => "income_statement",
            StatementKind::CashFlow => "cash_flow",
            StatementKind::EquityChange => "equity_change",
            StatementKind::Summary => "summary",
        }
    }
}

/// One financial report (a filing/PDF a statement set came from).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinancialReport {
    pub id: Uuid,
    pub stock_code: String,
    pub report_name: String,
    pub created_at: DateTime<Utc>,
}

/// One statement row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatementRow {
    pub report_id: Uuid,
    pub kind: StatementKind,
    pub item_code: String,
    pub item_name: String,
    /// YYYYMM.
    pub year_month: String,
    pub value: f64,
}

/// Display-unit policy for statement values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitPolicy {
    Won,
    ThousandWon,
    MillionWon,
    HundredMillionWon,
    /// Pick by the magnitude of the largest absolute value in the table.
    Auto,
}

impl UnitPolicy {
    /// Resolves Auto against the table's max absolute value.
    pub fn resolve(&self, max_abs: f64) -> UnitPolicy {
        match self {
            UnitPolicy::Auto => {
                if max_abs >= 1e12 {
                    UnitPolicy::HundredMillionWon
                } else if max_abs >= 1e9 {
                    UnitPolicy::MillionWon
                } else if max_abs >= 1e6 {
                    UnitPolicy::ThousandWon
                } else {
                    UnitPolicy::Won
                }
            }
            fixed => *fixed,
        }
    }

    pub fn divisor(&self) -> f64 {
        match self {
            UnitPolicy::Won => 1.0,
            UnitPolicy::ThousandWon => 1e3,
            UnitPolicy::MillionWon => 1e6,
            UnitPolicy::HundredMillionWon => 1e8,
            UnitPolicy::Auto => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnitPolicy::Won => "원",
            UnitPolicy::ThousandWon => "천원",
            UnitPolicy::MillionWon => "백만원",
            UnitPolicy::HundredMillionWon => "억원",
            UnitPolicy::Auto => "원",
        }
    }
}

/// Read/write seam over the financial tables.
#[async_trait]
pub trait FinancialReportRepository: Send + Sync {
    /// Latest report for a stock, when any.
    async fn get_by_code(&self, stock_code: &str) -> Result<Option<FinancialReport>, StoreError>;

    /// Existing report for (stock, name), or a newly created one.
    async fn get_or_create_financial_report(
        &self,
        stock_code: &str,
        report_name: &str,
    ) -> Result<FinancialReport, StoreError>;

    /// Persists statement rows of one kind for a report.
    async fn save_statements(
        &self,
        report_id: Uuid,
        kind: StatementKind,
        rows: Vec<StatementRow>,
    ) -> Result<(), StoreError>;

    /// All rows of one report, all kinds.
    async fn statements_for_report(
        &self,
        report_id: Uuid,
    ) -> Result<Vec<StatementRow>, StoreError>;
}

/// Converts statement rows to [`SourceHit::FinancialRow`] evidence under a
/// unit policy.
pub fn rows_to_hits(stock_code: &str, rows: &[StatementRow], policy: UnitPolicy) -> Vec<SourceHit> {
    let max_abs = rows
        .iter()
        .map(|r| r.value.abs())
        .fold(0.0f64, f64::max);
    let unit = policy.resolve(max_abs);
    rows.iter()
        .map(|row| SourceHit::FinancialRow {
            company: stock_code.to_string(),
            item_code: row.item_code.clone(),
            item_name: row.item_name.clone(),
            year_month: row.year_month.clone(),
            value: row.value / unit.divisor(),
            unit: unit.label().to_string(),
        })
        .collect()
}

/// SQLite-backed [`FinancialReportRepository`].
pub struct SqliteFinancialStore {
    db_path: std::path::PathBuf,
}

impl SqliteFinancialStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS financial_reports (
                id TEXT PRIMARY KEY,
                stock_code TEXT NOT NULL,
                report_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(stock_code, report_name)
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS financial_statements (
                report_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                item_code TEXT NOT NULL,
                item_name TEXT NOT NULL,
                year_month TEXT NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (report_id, kind, item_code, year_month)
            )
            "#,
            [],
        )?;
        Ok(Self { db_path })
    }
}

fn row_to_report(
    id: String,
    stock_code: String,
    report_name: String,
    created_at: String,
) -> FinancialReport {
    FinancialReport {
        id: id.parse().unwrap_or_else(|_| Uuid::nil()),
        stock_code,
        report_name,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[async_trait]
impl FinancialReportRepository for SqliteFinancialStore {
    async fn get_by_code(&self, stock_code: &str) -> Result<Option<FinancialReport>, StoreError> {
        let db_path = self.db_path.clone();
        let stock_code = stock_code.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let result = conn.query_row(
                "SELECT id, stock_code, report_name, created_at FROM financial_reports \
                 WHERE stock_code = ?1 ORDER BY created_at DESC LIMIT 1",
                params![stock_code],
                |row| {
                    Ok(row_to_report(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            );
            match result {
                Ok(report) => Ok(Some(report)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(StoreError::from(e)),
            }
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn get_or_create_financial_report(
        &self,
        stock_code: &str,
        report_name: &str,
    ) -> Result<FinancialReport, StoreError> {
        let db_path = self.db_path.clone();
        let stock_code = stock_code.to_string();
        let report_name = report_name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let existing = conn.query_row(
                "SELECT id, stock_code, report_name, created_at FROM financial_reports \
                 WHERE stock_code = ?1 AND report_name = ?2",
                params![stock_code, report_name],
                |row| {
                    Ok(row_to_report(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            );
            match existing {
                Ok(report) => return Ok(report),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(StoreError::from(e)),
            }
            let report = FinancialReport {
                id: Uuid::new_v4(),
                stock_code: stock_code.clone(),
                report_name: report_name.clone(),
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO financial_reports (id, stock_code, report_name, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    report.id.to_string(),
                    report.stock_code,
                    report.report_name,
                    report.created_at.to_rfc3339(),
                ],
            )?;
            Ok(report)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn save_statements(
        &self,
        report_id: Uuid,
        kind: StatementKind,
        rows: Vec<StatementRow>,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = rusqlite::Connection::open(&db_path)?;
            let tx = conn.transaction()?;
            for row in &rows {
                tx.execute(
                    "INSERT OR REPLACE INTO financial_statements \
                     (report_id, kind, item_code, item_name, year_month, value) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        report_id.to_string(),
                        kind.as_str(),
                        row.item_code,
                        row.item_name,
                        row.year_month,
                        row.value,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn statements_for_report(
        &self,
        report_id: Uuid,
    ) -> Result<Vec<StatementRow>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT kind, item_code, item_name, year_month, value \
                 FROM financial_statements WHERE report_id = ?1 ORDER BY year_month",
            )?;
            let rows = stmt.query_map(params![report_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (kind, item_code, item_name, year_month, value) = row?;
                let kind = match kind.as_str() {
                    "balance_sheet" => StatementKind::BalanceSheet,
                    "income_statement" => StatementKind::IncomeStatement,
                    "cash_flow" => StatementKind::CashFlow,
                    "equity_change" => StatementKind::EquityChange,
                    _ => StatementKind::Summary,
                };
                out.push(StatementRow {
                    report_id,
                    kind,
                    item_code,
                    item_name,
                    year_month,
                    value,
                });
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: get_or_create is idempotent; statements round-trip.
    #[tokio::test]
    async fn report_and_statements_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteFinancialStore::new(dir.path().join("fin.db")).unwrap();

        let report = store
            .get_or_create_financial_report("005930", "2024 사업보고서")
            .await
            .unwrap();
        let again = store
            .get_or_create_financial_report("005930", "2024 사업보고서")
            .await
            .unwrap();
        assert_eq!(report.id, again.id);

        store
            .save_statements(
                report.id,
                StatementKind::IncomeStatement,
                vec![StatementRow {
                    report_id: report.id,
                    kind: StatementKind::IncomeStatement,
                    item_code: "ifrs-full_Revenue".to_string(),
                    item_name: "매출액".to_string(),
                    year_month: "202412".to_string(),
                    value: 3.009e14,
                }],
            )
            .await
            .unwrap();

        let rows = store.statements_for_report(report.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_name, "매출액");

        let latest = store.get_by_code("005930").await.unwrap().unwrap();
        assert_eq!(latest.id, report.id);
        assert!(store.get_by_code("999999").await.unwrap().is_none());
    }

    /// **Scenario**: auto unit policy picks 억원 for trillion-scale tables
    /// and divides values accordingly.
    #[test]
    fn auto_unit_policy() {
        let rows = vec![StatementRow {
            report_id: Uuid::nil(),
            kind: StatementKind::IncomeStatement,
            item_code: "rev".to_string(),
            item_name: "매출액".to_string(),
            year_month: "202412".to_string(),
            value: 3.0e14,
        }];
        let hits = rows_to_hits("005930", &rows, UnitPolicy::Auto);
        match &hits[0] {
            SourceHit::FinancialRow { value, unit, .. } => {
                assert_eq!(unit, "억원");
                assert!((value - 3.0e6).abs() < 1.0);
            }
            other => panic!("expected financial row, got {:?}", other),
        }
    }
}
