//! Value normalization.
//!
//! Turns whatever JSON an agent produced for a field into a [`NormalizedValue`]
//! that can be compared across agents. [`normalize`] is total: input that cannot
//! be read as the declared [`DataType`] becomes [`NormalizedValue::Absent`]
//! instead of an error.
//!
//! Normalizing the JSON form of a normalized value gives back the same value:
//! `normalize(&normalize(x, t).to_json(), t) == normalize(x, t)`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::domain::DataType;

/// Date layouts tried in order after trimming trailing dots.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y. %m. %d",
    "%Y년 %m월 %d일",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%m/%d/%Y",
    "%d.%m.%Y",
];

const LIST_DELIMITERS: &[char] = &[',', ';', '|', '\n'];

const TRUE_WORDS: &[&str] = &["true", "yes", "y", "t", "1", "예", "참"];
const FALSE_WORDS: &[&str] = &["false", "no", "n", "f", "0", "아니오", "아니요", "거짓"];

/// Placeholder strings agents emit when a field is missing.
const NULL_SENTINELS: &[&str] = &["", "null", "none", "n/a", "na", "-"];

/// Largest magnitude rendered back to JSON as an integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Free text: trimmed display form plus a case-folded comparison key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextValue {
    display: String,
    folded: String,
}

impl TextValue {
    fn parse(raw: &str) -> Option<Self> {
        let display = raw.trim();
        if is_null_sentinel(display) {
            return None;
        }
        Some(Self {
            display: display.to_string(),
            folded: fold(display),
        })
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }
}

/// Unordered set of text items keyed by their case-folded form.
///
/// The first spelling seen for a key is kept for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListValue {
    items: BTreeMap<String, String>,
}

impl ListValue {
    fn from_items<I: IntoIterator<Item = String>>(raw_items: I) -> Option<Self> {
        let mut items = BTreeMap::new();
        for raw in raw_items {
            if let Some(text) = TextValue::parse(&raw) {
                items.entry(text.folded).or_insert(text.display);
            }
        }
        (!items.is_empty()).then_some(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Display spellings, ordered by comparison key.
    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.items.values().map(String::as_str)
    }

    /// |A ∩ B| / |A ∪ B| over comparison keys.
    pub fn jaccard(&self, other: &ListValue) -> f64 {
        let a: BTreeSet<&String> = self.items.keys().collect();
        let b: BTreeSet<&String> = other.items.keys().collect();
        let union = a.union(&b).count();
        if union == 0 {
            return 1.0;
        }
        a.intersection(&b).count() as f64 / union as f64
    }
}

/// A present, canonical field value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(TextValue),
    Number(f64),
    Date(NaiveDate),
    Boolean(bool),
    List(ListValue),
}

impl TypedValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::Text(_) => DataType::Text,
            TypedValue::Number(_) => DataType::Number,
            TypedValue::Date(_) => DataType::Date,
            TypedValue::Boolean(_) => DataType::Boolean,
            TypedValue::List(_) => DataType::List,
        }
    }

    /// Canonical JSON form: display text, number, ISO date string, bool, or
    /// an array of display items.
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Text(text) => Value::String(text.display.clone()),
            TypedValue::Number(n) => number_to_json(*n),
            TypedValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            TypedValue::Boolean(b) => Value::Bool(*b),
            TypedValue::List(list) => {
                Value::Array(list.items().map(|s| Value::String(s.to_string())).collect())
            }
        }
    }

    /// Single-line rendering for tables and CSV cells.
    pub fn display(&self) -> String {
        match self {
            TypedValue::Text(text) => text.display.clone(),
            TypedValue::Number(_) => self.to_json().to_string(),
            TypedValue::Date(date) => date.format("%Y-%m-%d").to_string(),
            TypedValue::Boolean(b) => b.to_string(),
            TypedValue::List(list) => list.items().collect::<Vec<_>>().join("; "),
        }
    }
}

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Result of normalizing one agent's answer for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    /// The agent omitted the field or produced something unreadable.
    Absent,
    Present(TypedValue),
}

impl NormalizedValue {
    pub fn is_present(&self) -> bool {
        matches!(self, NormalizedValue::Present(_))
    }

    pub fn value(&self) -> Option<&TypedValue> {
        match self {
            NormalizedValue::Present(value) => Some(value),
            NormalizedValue::Absent => None,
        }
    }

    pub fn into_value(self) -> Option<TypedValue> {
        match self {
            NormalizedValue::Present(value) => Some(value),
            NormalizedValue::Absent => None,
        }
    }

    pub fn to_json(&self) -> Value {
        self.value().map(TypedValue::to_json).unwrap_or(Value::Null)
    }
}

impl From<Option<TypedValue>> for NormalizedValue {
    fn from(value: Option<TypedValue>) -> Self {
        value.map_or(NormalizedValue::Absent, NormalizedValue::Present)
    }
}

/// Tolerances applied by [`values_match`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchTolerance {
    /// Numbers match when `|a-b| <= relative * max(|a|, |b|)`.
    pub relative: f64,
    /// Numbers also match when `|a-b| < absolute`. The bound is exclusive:
    /// with `absolute = 1.0`, reported totals of 100 and 101 stay distinct
    /// answers while 100 and 100.5 merge. Revenue fields configured with a
    /// unit tolerance rely on this to keep one-unit disagreements visible.
    pub absolute: f64,
    /// Lists match when their Jaccard similarity reaches this value.
    pub list_jaccard: f64,
}

impl Default for MatchTolerance {
    fn default() -> Self {
        Self {
            relative: 1e-6,
            absolute: 0.0,
            list_jaccard: 0.8,
        }
    }
}

/// Normalize `raw` as `data_type`.
///
/// A `{"value": .., "source": ..}` envelope is unwrapped first; `null`, empty
/// strings and placeholder words such as `"N/A"` are absent for every type.
pub fn normalize(raw: &Value, data_type: DataType) -> NormalizedValue {
    if let Value::Object(map) = raw {
        return match map.get("value") {
            Some(inner) => normalize(inner, data_type),
            None => NormalizedValue::Absent,
        };
    }
    if raw.is_null() {
        return NormalizedValue::Absent;
    }

    let value = match data_type {
        DataType::Text => normalize_text(raw),
        DataType::Number => normalize_number(raw),
        DataType::Date => normalize_date(raw),
        DataType::Boolean => normalize_boolean(raw),
        DataType::List => normalize_list(raw),
    };
    value.into()
}

/// Equality-for-scoring between two typed values. Values of different types
/// never match.
pub fn values_match(a: &TypedValue, b: &TypedValue, tolerance: &MatchTolerance) -> bool {
    match (a, b) {
        (TypedValue::Text(x), TypedValue::Text(y)) => x.folded == y.folded,
        (TypedValue::Number(x), TypedValue::Number(y)) => numbers_match(*x, *y, tolerance),
        (TypedValue::Date(x), TypedValue::Date(y)) => x == y,
        (TypedValue::Boolean(x), TypedValue::Boolean(y)) => x == y,
        (TypedValue::List(x), TypedValue::List(y)) => x.jaccard(y) >= tolerance.list_jaccard,
        _ => false,
    }
}

fn numbers_match(a: f64, b: f64, tolerance: &MatchTolerance) -> bool {
    let diff = (a - b).abs();
    if diff == 0.0 {
        return true;
    }
    diff < tolerance.absolute || diff <= tolerance.relative * a.abs().max(b.abs())
}

fn is_null_sentinel(s: &str) -> bool {
    let lowered = s.trim().to_lowercase();
    NULL_SENTINELS.contains(&lowered.as_str())
}

fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn scalar_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn normalize_text(raw: &Value) -> Option<TypedValue> {
    let text = match raw {
        Value::Array(_) => {
            let mut items = Vec::new();
            collect_list_items(raw, false, &mut items);
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| TextValue::parse(item))
                .map(|t| t.display)
                .collect();
            parts.join(", ")
        }
        other => scalar_text(other)?,
    };
    TextValue::parse(&text).map(TypedValue::Text)
}

fn number_literal() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[-+]?(?:\d+(?:\.\d+)?|\.\d+)(?:[eE][-+]?\d+)?")
            .expect("number literal pattern is valid")
    })
}

/// Parse the single numeric literal in `s`, ignoring `,` separators and any
/// surrounding currency or unit words. `(1,234)` reads as `-1234`.
fn parse_number_text(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if is_null_sentinel(trimmed) {
        return None;
    }
    let unified = trimmed.replace('\u{2212}', "-");
    let (body, negate) = match unified
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (inner.to_string(), true),
        None => (unified.clone(), false),
    };
    let cleaned: String = body.chars().filter(|c| *c != ',').collect();

    let mut literals = number_literal().find_iter(&cleaned);
    let literal = literals.next()?;
    if literals.next().is_some() {
        return None;
    }
    let n: f64 = literal.as_str().parse().ok()?;
    if !n.is_finite() {
        return None;
    }
    Some(if negate { -n.abs() } else { n })
}

fn normalize_number(raw: &Value) -> Option<TypedValue> {
    let n = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_number_text(s)?,
        _ => return None,
    };
    n.is_finite().then_some(TypedValue::Number(n))
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    if let Some(date) = parse_compact_date(trimmed) {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(timestamp.date_naive());
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

/// `YYYYMMDD` with exactly eight digits.
fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn normalize_date(raw: &Value) -> Option<TypedValue> {
    let date = match raw {
        Value::String(s) => parse_date_text(s)?,
        Value::Number(n) => parse_compact_date(&n.as_u64()?.to_string())?,
        _ => return None,
    };
    Some(TypedValue::Date(date))
}

fn normalize_boolean(raw: &Value) -> Option<TypedValue> {
    let b = match raw {
        Value::Bool(b) => *b,
        Value::Number(n) => match n.as_f64()? {
            x if x == 1.0 => true,
            x if x == 0.0 => false,
            _ => return None,
        },
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if TRUE_WORDS.contains(&lowered.as_str()) {
                true
            } else if FALSE_WORDS.contains(&lowered.as_str()) {
                false
            } else {
                return None;
            }
        }
        _ => return None,
    };
    Some(TypedValue::Boolean(b))
}

/// Flatten `value` into raw item strings. Only a top-level string is split on
/// delimiters; strings nested in arrays are kept whole.
fn collect_list_items(value: &Value, top_level: bool, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) if top_level => {
            out.extend(s.split(LIST_DELIMITERS).map(str::to_string));
        }
        Value::Array(items) => {
            for item in items {
                collect_list_items(item, false, out);
            }
        }
        Value::Object(map) => {
            if let Some(inner) = map.get("value") {
                collect_list_items(inner, top_level, out);
            }
        }
        scalar => out.extend(scalar_text(scalar)),
    }
}

fn normalize_list(raw: &Value) -> Option<TypedValue> {
    let mut items = Vec::new();
    collect_list_items(raw, true, &mut items);
    ListValue::from_items(items).map(TypedValue::List)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn present(raw: Value, data_type: DataType) -> TypedValue {
        normalize(&raw, data_type)
            .into_value()
            .unwrap_or_else(|| panic!("{raw} should normalize as {data_type}"))
    }

    #[test]
    fn test_text_trims_and_folds_but_keeps_display() {
        let value = present(json!("  ACME  Holdings "), DataType::Text);
        match &value {
            TypedValue::Text(text) => {
                assert_eq!(text.display(), "ACME  Holdings");
                assert_eq!(text.folded(), "acme holdings");
            }
            other => panic!("expected text, got {other:?}"),
        }
        let other = present(json!("acme holdings"), DataType::Text);
        assert!(values_match(&value, &other, &MatchTolerance::default()));
    }

    #[test]
    fn test_null_sentinels_are_absent_for_every_type() {
        for data_type in DataType::ALL {
            for raw in [json!(null), json!(""), json!("  "), json!("N/A"), json!("null")] {
                assert_eq!(
                    normalize(&raw, data_type),
                    NormalizedValue::Absent,
                    "{raw} as {data_type}"
                );
            }
        }
    }

    #[test]
    fn test_value_source_envelope_is_unwrapped() {
        let value = present(json!({"value": "1,200", "source": "p.3"}), DataType::Number);
        assert_eq!(value, TypedValue::Number(1200.0));
        assert_eq!(
            normalize(&json!({"source": "p.3"}), DataType::Number),
            NormalizedValue::Absent
        );
    }

    #[test]
    fn test_number_tolerates_separators_and_units() {
        assert_eq!(present(json!(1234.5), DataType::Number), TypedValue::Number(1234.5));
        assert_eq!(present(json!("1,234,567"), DataType::Number), TypedValue::Number(1_234_567.0));
        assert_eq!(present(json!("$ 1,200.50"), DataType::Number), TypedValue::Number(1200.5));
        assert_eq!(present(json!("1,200억원"), DataType::Number), TypedValue::Number(1200.0));
        assert_eq!(present(json!("12.5%"), DataType::Number), TypedValue::Number(12.5));
        assert_eq!(present(json!("(3,000)"), DataType::Number), TypedValue::Number(-3000.0));
        assert_eq!(present(json!("-42 USD"), DataType::Number), TypedValue::Number(-42.0));
    }

    #[test]
    fn test_number_rejects_ambiguous_or_missing_literals() {
        for raw in [json!("about a hundred"), json!("2023 revenue 100"), json!(true), json!([1])] {
            assert_eq!(normalize(&raw, DataType::Number), NormalizedValue::Absent, "{raw}");
        }
    }

    #[test]
    fn test_date_formats() {
        let expected = TypedValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        for raw in [
            "2024-03-15",
            "2024/03/15",
            "2024.03.15",
            "2024. 3. 15.",
            "2024년 3월 15일",
            "20240315",
            "March 15, 2024",
            "Mar 15, 2024",
            "15 March 2024",
            "03/15/2024",
            "15.03.2024",
            "2024-03-15T09:30:00Z",
            "2024-03-15T09:30:00",
        ] {
            assert_eq!(present(json!(raw), DataType::Date), expected, "{raw}");
        }
        assert_eq!(present(json!(20240315), DataType::Date), expected);
        assert_eq!(normalize(&json!("2024-02-30"), DataType::Date), NormalizedValue::Absent);
        assert_eq!(normalize(&json!("next quarter"), DataType::Date), NormalizedValue::Absent);
    }

    #[test]
    fn test_boolean_word_families() {
        for raw in [json!(true), json!("yes"), json!("Y"), json!("TRUE"), json!(1), json!("예")] {
            assert_eq!(present(raw.clone(), DataType::Boolean), TypedValue::Boolean(true), "{raw}");
        }
        for raw in [json!(false), json!("no"), json!("N"), json!("False"), json!(0), json!("아니오")] {
            assert_eq!(present(raw.clone(), DataType::Boolean), TypedValue::Boolean(false), "{raw}");
        }
        assert_eq!(normalize(&json!("maybe"), DataType::Boolean), NormalizedValue::Absent);
        assert_eq!(normalize(&json!(2), DataType::Boolean), NormalizedValue::Absent);
    }

    #[test]
    fn test_list_collapses_duplicates_and_flattens() {
        let from_string = present(json!("Seoul, Busan; seoul | Incheon"), DataType::List);
        let from_array = present(json!(["incheon", ["Busan"], "SEOUL", null]), DataType::List);
        match (&from_string, &from_array) {
            (TypedValue::List(a), TypedValue::List(b)) => {
                assert_eq!(a.len(), 3);
                assert_eq!(b.len(), 3);
                assert_eq!(a.jaccard(b), 1.0);
            }
            other => panic!("expected lists, got {other:?}"),
        }
        assert_eq!(normalize(&json!([]), DataType::List), NormalizedValue::Absent);
        assert_eq!(normalize(&json!(", ;"), DataType::List), NormalizedValue::Absent);
    }

    #[test]
    fn test_list_match_uses_jaccard_threshold() {
        let tolerance = MatchTolerance::default();
        let five = present(json!(["a", "b", "c", "d", "e"]), DataType::List);
        let four = present(json!(["a", "b", "c", "d"]), DataType::List);
        let three = present(json!(["a", "b", "c"]), DataType::List);
        assert!(values_match(&five, &four, &tolerance));
        assert!(!values_match(&five, &three, &tolerance));
    }

    #[test]
    fn test_number_tolerances() {
        let strict = MatchTolerance {
            relative: 0.0,
            absolute: 0.0,
            ..MatchTolerance::default()
        };
        let within_one = MatchTolerance {
            relative: 0.0,
            absolute: 1.0,
            ..MatchTolerance::default()
        };
        let n = |x: f64| TypedValue::Number(x);

        assert!(values_match(&n(100.0), &n(100.0), &strict));
        assert!(!values_match(&n(100.0), &n(100.5), &strict));
        assert!(values_match(&n(100.0), &n(100.5), &within_one));
        // absolute bound is exclusive
        assert!(!values_match(&n(100.0), &n(101.0), &within_one));
        // default relative tolerance absorbs float noise
        assert!(values_match(&n(0.1 + 0.2), &n(0.3), &MatchTolerance::default()));
        assert!(values_match(&n(1_000_000.0), &n(1_000_000.5), &MatchTolerance::default()));
        assert!(!values_match(&n(1_000_000.0), &n(1_000_002.0), &MatchTolerance::default()));
    }

    #[test]
    fn test_unit_absolute_tolerance_keeps_adjacent_integers_apart() {
        let unit = MatchTolerance {
            relative: 0.0,
            absolute: 1.0,
            ..MatchTolerance::default()
        };
        let n = |x: f64| TypedValue::Number(x);

        assert!(values_match(&n(1_200.0), &n(1_200.999), &unit));
        assert!(!values_match(&n(1_200.0), &n(1_201.0), &unit));
        assert!(!values_match(&n(1_201.0), &n(1_200.0), &unit));
        assert!(!values_match(&n(-5.0), &n(-4.0), &unit));
    }

    #[test]
    fn test_values_of_different_types_never_match() {
        let text = present(json!("100"), DataType::Text);
        let number = present(json!(100), DataType::Number);
        assert!(!values_match(&text, &number, &MatchTolerance::default()));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples: Vec<(Value, DataType)> = vec![
            (json!("  Mixed Case  Name "), DataType::Text),
            (json!(["a", "b"]), DataType::Text),
            (json!(42), DataType::Text),
            (json!("₩ 1,234,000"), DataType::Number),
            (json!(0.125), DataType::Number),
            (json!("(7.5)"), DataType::Number),
            (json!(1e21), DataType::Number),
            (json!("2024년 12월 1일"), DataType::Date),
            (json!("Jan 5, 2023"), DataType::Date),
            (json!("Y"), DataType::Boolean),
            (json!(0), DataType::Boolean),
            (json!("x, Y, y ,z"), DataType::List),
            (json!(["a, b", ["c"]]), DataType::List),
            (json!("garbage"), DataType::Date),
            (json!(null), DataType::List),
        ];
        for (raw, data_type) in samples {
            let once = normalize(&raw, data_type);
            let twice = normalize(&once.to_json(), data_type);
            assert_eq!(once, twice, "{raw} as {data_type}");
        }
    }

    #[test]
    fn test_to_json_renders_canonical_forms() {
        assert_eq!(present(json!("1,000"), DataType::Number).to_json(), json!(1000));
        assert_eq!(present(json!("2024/1/2"), DataType::Date).to_json(), json!("2024-01-02"));
        assert_eq!(
            present(json!("b, A"), DataType::List).to_json(),
            json!(["A", "b"])
        );
        assert_eq!(present(json!("b, A"), DataType::List).display(), "A; b");
    }
}
