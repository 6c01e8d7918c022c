//! Hit scoring: time decay, importance, dedup hashing, time-range synthesis.
//!
//! All functions are pure given their inputs so re-scoring is deterministic
//! (rerank order is only ever re-weighted, never re-shuffled by chance).

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Hits are timestamped in KST; naive timestamps are interpreted at this
/// offset.
pub const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Rerank score weight in the final score.
pub const RERANK_WEIGHT: f64 = 0.65;
/// Time weight share in the final score.
pub const TIME_WEIGHT: f64 = 0.35;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static MONEYISH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+(?:,[0-9]+)*(?:\.[0-9]+)?%?원?").expect("money regex"));
static RECENT_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"최근\s*(\d+)\s*일").expect("days regex"));
static RECENT_MONTHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"최근\s*(\d+)\s*개월").expect("months regex"));
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(20\d{2})년").expect("year regex"));
static QUARTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)분기").expect("quarter regex"));

/// Keywords weighted in message importance.
const IMPORTANT_KEYWORDS: &[&str] = &[
    "실적", "공시", "매출", "영업이익", "순이익", "계약", "특허", "인수", "합병", "M&A",
    "상한가", "하한가", "급등", "급락", "목표가", "투자의견", "리포트",
];

/// KST fixed offset.
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("valid offset")
}

/// Time-decay weight for a hit: 1.0 under a day old, then 0.9 / 0.8 / 0.6
/// within 7 / 14 / 30 days, else 0.4.
pub fn time_weight(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now.signed_duration_since(created_at);
    if age < Duration::days(1) {
        1.0
    } else if age < Duration::days(7) {
        0.9
    } else if age < Duration::days(14) {
        0.8
    } else if age < Duration::days(30) {
        0.6
    } else {
        0.4
    }
}

/// Final score: 0.65·rerank + 0.35·time_weight.
pub fn final_score(rerank_score: f64, time_weight: f64) -> f64 {
    rerank_score * RERANK_WEIGHT + time_weight * TIME_WEIGHT
}

/// Min-max normalizes scores into [0, 1] within the result set. A flat set
/// normalizes against a range of 1.0 (everything keeps its offset from min).
pub fn normalize_scores(scores: &mut [f64]) {
    let Some(max) = scores.iter().cloned().fold(None::<f64>, |acc, s| {
        Some(acc.map_or(s, |a| a.max(s)))
    }) else {
        return;
    };
    let min = scores.iter().cloned().fold(max, f64::min);
    let range = if max > min { max - min } else { 1.0 };
    for score in scores.iter_mut() {
        *score = (*score - min) / range;
    }
}

/// Parses a message timestamp from metadata: ISO-8601 (naive = KST), unix
/// seconds, or unix milliseconds. Unparseable values fall back to `now`.
pub fn parse_message_timestamp(value: &serde_json::Value, now: DateTime<Utc>) -> DateTime<Utc> {
    match value {
        serde_json::Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return dt.with_timezone(&Utc);
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return kst()
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now);
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return kst()
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now);
            }
            if let Ok(ts) = s.parse::<f64>() {
                return Utc
                    .timestamp_opt(ts as i64, 0)
                    .single()
                    .unwrap_or(now);
            }
            now
        }
        serde_json::Value::Number(n) => {
            let raw = n.as_f64().unwrap_or(0.0);
            // Millisecond timestamps are 13 digits; seconds are 10.
            let secs = if raw > 1e12 { raw / 1000.0 } else { raw };
            Utc.timestamp_opt(secs as i64, 0).single().unwrap_or(now)
        }
        _ => now,
    }
}

/// Normalizes content for dedup: whitespace collapsed, lowercased, first
/// 200 chars.
pub fn normalize_content(content: &str) -> String {
    let collapsed = WHITESPACE.replace_all(content, " ");
    let lowered = collapsed.trim().to_lowercase();
    lowered.chars().take(200).collect()
}

/// SHA-256 hex digest of the normalized content (content-dedup key).
pub fn content_hash(content: &str) -> String {
    let normalized = normalize_content(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Heuristic importance of a message, 0..1: numbers/amounts (0.4), key
/// financial terms (0.2 each, capped 0.4), reasonable length (0.2).
pub fn message_importance(message: &str) -> f64 {
    let mut score = 0.0;
    if MONEYISH.is_match(message) {
        score += 0.4;
    }
    let keyword_count = IMPORTANT_KEYWORDS
        .iter()
        .filter(|k| message.contains(**k))
        .count();
    if keyword_count > 0 {
        score += (keyword_count as f64 * 0.2).min(0.4);
    }
    let len = message.chars().count();
    if (50..=500).contains(&len) {
        score += 0.2;
    } else if (20..50).contains(&len) || (501..=1000).contains(&len) {
        score += 0.1;
    }
    score
}

/// Inclusive YYYYMMDD date range synthesized from a time-ish phrase:
/// "최근 N일", "최근 N개월", "20XX년", "N분기" (current year).
pub fn synthesize_time_range(phrase: &str, today: NaiveDate) -> Option<(String, String)> {
    let fmt = |d: NaiveDate| d.format("%Y%m%d").to_string();

    if let Some(caps) = RECENT_DAYS.captures(phrase) {
        let days: i64 = caps[1].parse().ok()?;
        let start = today - Duration::days(days);
        return Some((fmt(start), fmt(today)));
    }
    if let Some(caps) = RECENT_MONTHS.captures(phrase) {
        let months: u32 = caps[1].parse().ok()?;
        let (year, month) = if today.month() > months {
            (today.year(), today.month() - months)
        } else {
            (today.year() - 1, today.month() + 12 - months)
        };
        let start = NaiveDate::from_ymd_opt(year, month, today.day().min(28))?;
        return Some((fmt(start), fmt(today)));
    }
    if let Some(caps) = YEAR.captures(phrase) {
        let year = &caps[1];
        return Some((format!("{}0101", year), format!("{}1231", year)));
    }
    if let Some(caps) = QUARTER.captures(phrase) {
        let quarter: u32 = caps[1].parse().ok()?;
        if !(1..=4).contains(&quarter) {
            return None;
        }
        let year = today.year();
        let ranges = [
            ("0101", "0331"),
            ("0401", "0630"),
            ("0701", "0930"),
            ("1001", "1231"),
        ];
        let (start, end) = ranges[(quarter - 1) as usize];
        return Some((format!("{}{}", year, start), format!("{}{}", year, end)));
    }
    None
}

/// Picks the first keyword carrying a time expression and synthesizes its
/// date range (report retrieval time filter).
pub fn time_range_from_keywords(keywords: &[String], today: NaiveDate) -> Option<(String, String)> {
    keywords
        .iter()
        .filter(|kw| ["년", "분기", "월", "일", "최근"].iter().any(|t| kw.contains(t)))
        .find_map(|kw| synthesize_time_range(kw, today))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    /// **Scenario**: time-weight table — ages 0h, 12h, 3d, 10d, 20d, 60d map
    /// to 1.0, 1.0, 0.9, 0.8, 0.6, 0.4.
    #[test]
    fn time_weight_table() {
        let now = at("2024-06-15T12:00:00Z");
        let cases = [
            (0i64, 1.0),
            (12, 1.0),
            (3 * 24, 0.9),
            (10 * 24, 0.8),
            (20 * 24, 0.6),
            (60 * 24, 0.4),
        ];
        for (hours, expected) in cases {
            let created = now - Duration::hours(hours);
            assert_eq!(
                time_weight(created, now),
                expected,
                "age {} hours",
                hours
            );
        }
    }

    /// **Scenario**: final score formula holds: 0.65·rerank + 0.35·time.
    #[test]
    fn final_score_formula() {
        let score = final_score(0.8, 0.9);
        assert!((score - (0.8 * 0.65 + 0.9 * 0.35)).abs() < 1e-12);
    }

    /// **Scenario**: two contents sharing a 200-char normalized prefix hash
    /// identically; different contents do not.
    #[test]
    fn dedup_hash_on_200_char_prefix() {
        let base = "삼성전자  실적   발표\n".repeat(30);
        let a = format!("{}추가 문장 A", base);
        let b = format!("{}완전히 다른 꼬리 B", base);
        // Normalized prefixes equal within the first 200 chars.
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash("짧은 내용 1"), content_hash("짧은 내용 2"));
    }

    /// **Scenario**: whitespace and case differences do not defeat the hash.
    #[test]
    fn dedup_hash_normalizes() {
        assert_eq!(
            content_hash("Samsung  Electronics\t실적"),
            content_hash("samsung electronics 실적")
        );
    }

    /// **Scenario**: normalization maps scores into [0,1] with min at 0 and
    /// max at 1; a flat set keeps zeros.
    #[test]
    fn normalize_scores_minmax() {
        let mut scores = vec![0.2, 0.5, 0.8];
        normalize_scores(&mut scores);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[2], 1.0);

        let mut flat = vec![0.7, 0.7];
        normalize_scores(&mut flat);
        assert_eq!(flat, vec![0.0, 0.0]);
    }

    /// **Scenario**: importance rewards amounts, keywords and length.
    #[test]
    fn message_importance_components() {
        assert_eq!(message_importance(""), 0.0);
        let rich = "삼성전자 3분기 실적 발표: 매출 79조원, 영업이익 10.9조원으로 시장 기대치를 상회";
        let score = message_importance(rich);
        assert!(score >= 0.9, "rich message should be important: {}", score);
        assert!(message_importance("ㅎㅇ") < 0.2);
    }

    /// **Scenario**: time-range synthesis for 최근 N일 / 최근 N개월 / year /
    /// quarter phrases.
    #[test]
    fn time_range_patterns() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(
            synthesize_time_range("최근 30일 동향", today).unwrap(),
            ("20240516".to_string(), "20240615".to_string())
        );
        assert_eq!(
            synthesize_time_range("최근 3개월", today).unwrap(),
            ("20240315".to_string(), "20240615".to_string())
        );
        assert_eq!(
            synthesize_time_range("2023년 실적", today).unwrap(),
            ("20230101".to_string(), "20231231".to_string())
        );
        assert_eq!(
            synthesize_time_range("2분기 전망", today).unwrap(),
            ("20240401".to_string(), "20240630".to_string())
        );
        assert!(synthesize_time_range("그냥 질문", today).is_none());
    }

    /// **Scenario**: months wrapping a year boundary land in the prior year.
    #[test]
    fn time_range_month_wrap() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        let (start, end) = synthesize_time_range("최근 6개월", today).unwrap();
        assert_eq!(start, "20230810");
        assert_eq!(end, "20240210");
    }

    /// **Scenario**: keyword scan picks the first time-ish keyword.
    #[test]
    fn time_range_from_keyword_list() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let keywords = vec!["실적".to_string(), "최근 7일".to_string()];
        assert_eq!(
            time_range_from_keywords(&keywords, today).unwrap().0,
            "20240608"
        );
        assert!(time_range_from_keywords(&["실적".to_string()], today).is_none());
    }

    /// **Scenario**: timestamps parse from ISO (naive = KST), unix seconds
    /// and unix millis.
    #[test]
    fn parse_timestamp_formats() {
        let now = at("2024-06-15T00:00:00Z");
        let iso = parse_message_timestamp(&serde_json::json!("2024-06-14T09:00:00"), now);
        assert_eq!(iso, at("2024-06-14T00:00:00Z"));

        let seconds = parse_message_timestamp(&serde_json::json!(1718323200), now);
        assert_eq!(seconds.timestamp(), 1_718_323_200);

        let millis = parse_message_timestamp(&serde_json::json!(1_718_323_200_000i64), now);
        assert_eq!(millis.timestamp(), 1_718_323_200);

        let junk = parse_message_timestamp(&serde_json::json!(["x"]), now);
        assert_eq!(junk, now);
    }
}
