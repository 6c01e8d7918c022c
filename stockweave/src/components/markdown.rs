//! Regex-driven markdown → component converter.
//!
//! Fallback path of the response formatter: when no TOC is available the
//! plain summary is parsed line-by-line into headings, lists, fenced code,
//! pipe tables and paragraphs. Numeric-looking table cells are coerced so
//! the renderer can chart them; a preceding table-ish paragraph (표/데이터/
//! 재무) is adopted as the table title.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{Component, TableHeader};

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("heading regex"));
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*]\s+(.+)$").expect("bullet regex"));
static ORDERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s+(.+)$").expect("ordered regex"));
static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(\w*)\s*$").expect("fence regex"));

/// Words that mark a preceding paragraph as a table caption.
const TABLE_TITLE_MARKERS: &[&str] = &["표", "데이터", "재무"];

fn parse_cell(cell: &str) -> Value {
    let cleaned = cell.replace(',', "");
    if let Ok(int) = cleaned.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = cleaned.parse::<f64>() {
        return Value::from(float);
    }
    Value::from(cell.to_string())
}

fn split_row(line: &str) -> Vec<String> {
    let trimmed = line.trim().trim_start_matches('|').trim_end_matches('|');
    trimmed.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_row(line: &str) -> bool {
    split_row(line).iter().all(|cell| {
        !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':' | ' '))
    }) && line.contains('-')
}

fn parse_table(lines: &[String], title: String) -> Option<Component> {
    if lines.len() < 2 || !is_separator_row(&lines[1]) {
        return None;
    }
    let header_cells = split_row(&lines[0]);
    let headers: Vec<TableHeader> = header_cells
        .iter()
        .enumerate()
        .map(|(i, label)| TableHeader {
            key: format!("col{}", i),
            label: label.clone(),
        })
        .collect();

    let mut rows = Vec::new();
    for line in &lines[2..] {
        let cells = split_row(line);
        if cells.len() != headers.len() {
            continue;
        }
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(cells) {
            row.insert(header.key.clone(), parse_cell(&cell));
        }
        rows.push(Value::Object(row));
    }

    Some(Component::Table {
        title,
        headers,
        rows,
    })
}

/// Parses markdown into the component tree.
pub fn parse_markdown(markdown: &str) -> Vec<Component> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut components: Vec<Component> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            components.push(Component::Heading {
                level: caps[1].len() as u8,
                content: caps[2].trim().to_string(),
            });
            i += 1;
            continue;
        }

        if let Some(caps) = FENCE.captures(line) {
            let language = if caps[1].is_empty() {
                None
            } else {
                Some(caps[1].to_string())
            };
            let mut body = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                body.push(lines[i].to_string());
                i += 1;
            }
            i += 1; // closing fence
            components.push(Component::CodeBlock {
                language,
                content: body.join("\n"),
            });
            continue;
        }

        if line.starts_with('|') && line[1..].contains('|') {
            let mut table_lines = Vec::new();
            while i < lines.len() && lines[i].trim().starts_with('|') {
                table_lines.push(lines[i].trim().to_string());
                i += 1;
            }
            // A table-ish paragraph right before becomes the title.
            let mut title = String::new();
            if let Some(Component::Paragraph { content }) = components.last() {
                if TABLE_TITLE_MARKERS.iter().any(|m| content.contains(m)) {
                    title = content.clone();
                    components.pop();
                }
            }
            match parse_table(&table_lines, title) {
                Some(table) => components.push(table),
                None => {
                    for raw in table_lines {
                        components.push(Component::paragraph(raw));
                    }
                }
            }
            continue;
        }

        if BULLET.is_match(line) || ORDERED.is_match(line) {
            let ordered = ORDERED.is_match(line);
            let pattern: &Regex = if ordered { &ORDERED } else { &BULLET };
            let mut items = Vec::new();
            while i < lines.len() {
                let current = lines[i].trim();
                match pattern.captures(current) {
                    Some(caps) => {
                        items.push(caps[1].trim().to_string());
                        i += 1;
                    }
                    None => break,
                }
            }
            components.push(Component::List { ordered, items });
            continue;
        }

        // Paragraph: consume until a blank line or structural marker.
        let mut paragraph = vec![line.to_string()];
        i += 1;
        while i < lines.len() {
            let current = lines[i].trim();
            if current.is_empty()
                || HEADING.is_match(current)
                || FENCE.is_match(current)
                || BULLET.is_match(current)
                || ORDERED.is_match(current)
                || current.starts_with('|')
            {
                break;
            }
            paragraph.push(current.to_string());
            i += 1;
        }
        components.push(Component::paragraph(paragraph.join(" ")));
    }

    components
}
