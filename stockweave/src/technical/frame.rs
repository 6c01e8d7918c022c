//! Schema-encoded tabular payloads from the technical-data service.
//!
//! Wire shape: `{data: {schema: {fields: [..]}, data: [[..], ..]}}` — one
//! field-name list plus row-major values. A `timestamp` field is renamed to
//! `date`; missing values are permitted and preserved (NaN in the candle
//! frame, null in generic records).

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Malformed payload from the data service.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("schema missing required field: {0}")]
    MissingField(String),

    #[error("empty frame")]
    Empty,
}

/// `{schema, data}` block of a service payload.
#[derive(Clone, Debug, Deserialize)]
pub struct FramePayload {
    pub schema: FrameSchema,
    pub data: Vec<Vec<Value>>,
}

/// Field-name list of one frame.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameSchema {
    pub fields: Vec<String>,
}

impl FramePayload {
    /// Column index by name, with `timestamp` answering for `date`.
    fn field_index(&self, name: &str) -> Option<usize> {
        self.schema.fields.iter().position(|f| {
            f == name || (name == "date" && f == "timestamp")
        })
    }

    /// Converts the row-major payload into generic records (field → value),
    /// renaming `timestamp` to `date`. Rows shorter than the schema keep
    /// their missing fields absent.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.data
            .iter()
            .map(|row| {
                let mut record = serde_json::Map::new();
                for (i, field) in self.schema.fields.iter().enumerate() {
                    let key = if field == "timestamp" { "date" } else { field };
                    if let Some(value) = row.get(i) {
                        record.insert(key.to_string(), value.clone());
                    }
                }
                record
            })
            .collect()
    }
}

/// Daily candle series, oldest first. Missing numeric values are NaN.
#[derive(Clone, Debug, Default)]
pub struct CandleFrame {
    pub dates: Vec<String>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl CandleFrame {
    /// Parses a chart payload. Requires date/open/high/low/close/volume
    /// columns (the date may arrive as `timestamp`); rows sort ascending by
    /// date.
    pub fn from_payload(payload: &FramePayload) -> Result<Self, FrameError> {
        if payload.data.is_empty() {
            return Err(FrameError::Empty);
        }
        let idx = |name: &str| {
            payload
                .field_index(name)
                .ok_or_else(|| FrameError::MissingField(name.to_string()))
        };
        let (date_i, open_i, high_i, low_i, close_i, volume_i) = (
            idx("date")?,
            idx("open")?,
            idx("high")?,
            idx("low")?,
            idx("close")?,
            idx("volume")?,
        );

        let num = |row: &[Value], i: usize| -> f64 {
            row.get(i)
                .and_then(|v| v.as_f64())
                .unwrap_or(f64::NAN)
        };

        let mut rows: Vec<(String, f64, f64, f64, f64, f64)> = payload
            .data
            .iter()
            .map(|row| {
                let date = row
                    .get(date_i)
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                (
                    date,
                    num(row, open_i),
                    num(row, high_i),
                    num(row, low_i),
                    num(row, close_i),
                    num(row, volume_i),
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut frame = CandleFrame::default();
        for (date, open, high, low, close, volume) in rows {
            frame.dates.push(date);
            frame.open.push(open);
            frame.high.push(high);
            frame.low.push(low);
            frame.close.push(close);
            frame.volume.push(volume);
        }
        Ok(frame)
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Last close, when present and finite.
    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied().filter(|v| v.is_finite())
    }
}
