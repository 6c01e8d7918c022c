//! Typed component tree emitted by the response formatter.
//!
//! The UI renders this tree; the core only owns its contract. Components
//! serialize with a `type` tag matching the renderer's expectations and can
//! be flattened back to markdown for the text-only `answer` field.

pub mod markdown;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One table column: stable key + display label.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableHeader {
    pub key: String,
    pub label: String,
}

/// One chart dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChartDataset {
    pub label: String,
    pub data: Vec<Value>,
}

/// A node of the response component tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    /// level 1: document title, 2: numbered section, 3: subsection,
    /// 4: un-numbered sub-heading.
    Heading { level: u8, content: String },
    Paragraph { content: String },
    List { ordered: bool, items: Vec<String> },
    Table {
        title: String,
        headers: Vec<TableHeader>,
        rows: Vec<Value>,
    },
    BarChart {
        title: String,
        labels: Vec<String>,
        datasets: Vec<ChartDataset>,
    },
    LineChart {
        title: String,
        labels: Vec<String>,
        datasets: Vec<ChartDataset>,
    },
    CodeBlock {
        language: Option<String>,
        content: String,
    },
    Image {
        url: String,
        alt: String,
        caption: Option<String>,
    },
}

impl Component {
    pub fn heading(level: u8, content: impl Into<String>) -> Self {
        Component::Heading {
            level: level.clamp(1, 6),
            content: content.into(),
        }
    }

    pub fn paragraph(content: impl Into<String>) -> Self {
        Component::Paragraph {
            content: content.into(),
        }
    }

    /// Flattens one component to markdown (the `answer` field mirrors the
    /// component tree as plain text).
    pub fn to_markdown(&self) -> String {
        match self {
            Component::Heading { level, content } => {
                format!("{} {}", "#".repeat(*level as usize), content)
            }
            Component::Paragraph { content } => content.clone(),
            Component::List { ordered, items } => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    if *ordered {
                        format!("{}. {}", i + 1, item)
                    } else {
                        format!("- {}", item)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Component::Table { title, headers, rows } => {
                let mut out = String::new();
                if !title.is_empty() {
                    out.push_str(title);
                    out.push('\n');
                }
                let labels: Vec<&str> = headers.iter().map(|h| h.label.as_str()).collect();
                out.push_str(&format!("| {} |\n", labels.join(" | ")));
                out.push_str(&format!(
                    "|{}|\n",
                    headers.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
                ));
                for row in rows {
                    let cells: Vec<String> = headers
                        .iter()
                        .map(|h| {
                            row.get(&h.key)
                                .map(|v| match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .unwrap_or_default()
                        })
                        .collect();
                    out.push_str(&format!("| {} |\n", cells.join(" | ")));
                }
                out.trim_end().to_string()
            }
            Component::BarChart { title, labels, .. }
            | Component::LineChart { title, labels, .. } => {
                format!("{} ({})", title, labels.join(", "))
            }
            Component::CodeBlock { language, content } => format!(
                "```{}\n{}\n```",
                language.as_deref().unwrap_or(""),
                content
            ),
            Component::Image { url, alt, caption } => {
                let mut out = format!("![{}]({})", alt, url);
                if let Some(caption) = caption {
                    out.push_str(&format!("\n{}", caption));
                }
                out
            }
        }
    }
}

/// Flattens a component list to one markdown string.
pub fn components_to_markdown(components: &[Component]) -> String {
    components
        .iter()
        .map(Component::to_markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: components tag their type for the renderer.
    #[test]
    fn component_serializes_with_type_tag() {
        let heading = Component::heading(2, "1. 개요");
        let value = serde_json::to_value(&heading).unwrap();
        assert_eq!(value["type"], "heading");
        assert_eq!(value["level"], 2);

        let chart = Component::LineChart {
            title: "주가 추이".to_string(),
            labels: vec!["1월".to_string(), "2월".to_string()],
            datasets: vec![ChartDataset {
                label: "종가".to_string(),
                data: vec![json!(70000), json!(72000)],
            }],
        };
        assert_eq!(serde_json::to_value(&chart).unwrap()["type"], "line_chart");
    }

    /// **Scenario**: markdown flattening of a table keeps headers and rows.
    #[test]
    fn table_to_markdown() {
        let table = Component::Table {
            title: "분기 실적".to_string(),
            headers: vec![
                TableHeader {
                    key: "quarter".to_string(),
                    label: "분기".to_string(),
                },
                TableHeader {
                    key: "revenue".to_string(),
                    label: "매출".to_string(),
                },
            ],
            rows: vec![json!({"quarter": "1Q24", "revenue": 71.9})],
        };
        let md = table.to_markdown();
        assert!(md.contains("| 분기 | 매출 |"));
        assert!(md.contains("| 1Q24 | 71.9 |"));
    }

    /// **Scenario**: heading level is clamped to 1..=6.
    #[test]
    fn heading_level_clamped() {
        match Component::heading(9, "깊은 제목") {
            Component::Heading { level, .. } => assert_eq!(level, 6),
            _ => unreachable!(),
        }
    }
}
