//! Custom-field types and the coercion of spreadsheet cells into wire values.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Declared type of a tracker custom field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    ShortText,
    Email,
    Url,
    Phone,
    Number,
    Currency,
    Rating,
    Checkbox,
    Date,
    DropDown,
    Labels,
    Users,
    Location,
}

impl FieldType {
    /// Map the tracker's type name onto a field type. Unknown names are text.
    pub fn from_api_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "short_text" => FieldType::ShortText,
            "email" => FieldType::Email,
            "url" => FieldType::Url,
            "phone" => FieldType::Phone,
            "number" => FieldType::Number,
            "currency" => FieldType::Currency,
            "emoji" | "rating" => FieldType::Rating,
            "checkbox" => FieldType::Checkbox,
            "date" => FieldType::Date,
            "drop_down" | "dropdown" => FieldType::DropDown,
            "labels" => FieldType::Labels,
            "users" => FieldType::Users,
            "location" => FieldType::Location,
            _ => FieldType::Text,
        }
    }
}

/// Custom field metadata as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl CustomField {
    pub fn field_type(&self) -> FieldType {
        FieldType::from_api_name(&self.type_name)
    }
}

/// A coerced field value, ready to be sent as `{"value": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    List(Vec<String>),
    UserList(Vec<String>),
    Location(String),
}

impl FieldValue {
    /// JSON representation expected by the field-write endpoint.
    pub fn to_wire(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| json!(0)),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Date(ms) => json!(ms),
            FieldValue::List(items) => json!(items),
            FieldValue::UserList(users) => {
                let add: Vec<Value> = users
                    .iter()
                    .map(|u| match u.parse::<i64>() {
                        Ok(id) => json!(id),
                        Err(_) => json!(u),
                    })
                    .collect();
                json!({ "add": add, "rem": [] })
            }
            FieldValue::Location(address) => json!({ "formatted_address": address }),
        }
    }

    /// Render the value back as a spreadsheet cell.
    pub fn as_cell(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Location(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Date(ms) => ms.to_string(),
            FieldValue::List(items) | FieldValue::UserList(items) => items.join(","),
        }
    }
}

/// A cell that cannot be represented as the declared field type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("cannot interpret {0:?} as a date")]
    InvalidDate(String),
}

/// Tokens accepted as `true` for checkbox fields (compared case-insensitively).
pub const TRUTHY_TOKENS: &[&str] = &["true", "1", "yes", "y", "si", "sí", "x", "on", "checked"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const LOCAL_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

/// Coerce a raw cell into the wire value for `field_type`.
pub fn coerce(raw: &str, field_type: FieldType) -> Result<FieldValue, ValueError> {
    let trimmed = raw.trim();
    let value = match field_type {
        FieldType::Text
        | FieldType::ShortText
        | FieldType::Email
        | FieldType::Url
        | FieldType::Phone
        | FieldType::DropDown => FieldValue::Text(trimmed.to_string()),
        FieldType::Number | FieldType::Currency | FieldType::Rating => {
            FieldValue::Number(parse_number(trimmed))
        }
        FieldType::Checkbox => FieldValue::Bool(parse_bool(trimmed)),
        FieldType::Date => FieldValue::Date(parse_date(trimmed)?),
        FieldType::Labels => FieldValue::List(split_list(trimmed)),
        FieldType::Users => FieldValue::UserList(split_list(trimmed)),
        FieldType::Location => FieldValue::Location(trimmed.to_string()),
    };
    Ok(value)
}

/// Parse a number, accepting comma decimals. Unparseable input is zero.
pub fn parse_number(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£' | '%'))
        .collect();
    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        cleaned.replace(',', ".")
    };
    match normalized.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

pub fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    TRUTHY_TOKENS.contains(&lowered.as_str())
}

/// Parse a date into epoch milliseconds, trying each known format in order.
pub fn parse_date(raw: &str) -> Result<i64, ValueError> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(midnight_millis(date));
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    for format in LOCAL_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(midnight_millis(date));
        }
    }
    raw.parse::<i64>()
        .map_err(|_| ValueError::InvalidDate(raw.to_string()))
}

fn midnight_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn text_types_pass_through() {
        assert_eq!(
            coerce("  hello ", FieldType::Text).unwrap(),
            FieldValue::Text("hello".into())
        );
        assert_eq!(
            coerce("opt-uuid-1", FieldType::DropDown).unwrap(),
            FieldValue::Text("opt-uuid-1".into())
        );
    }

    #[test]
    fn numbers_fall_back_to_zero() {
        assert_eq!(parse_number("42"), 42.0);
        assert_eq!(parse_number("3,5"), 3.5);
        assert_eq!(parse_number("1,234.50"), 1234.5);
        assert_eq!(parse_number("$ 10"), 10.0);
        assert_eq!(parse_number("abc"), 0.0);
        assert_eq!(parse_number("inf"), 0.0);
        assert_eq!(parse_number(""), 0.0);
    }

    #[test]
    fn checkbox_vocabulary() {
        for token in ["true", "TRUE", "1", "yes", "Y", "si", "Sí", "x", "on", "checked"] {
            assert!(parse_bool(token), "{token} should be truthy");
        }
        for token in ["false", "0", "no", "", "nope", "off"] {
            assert!(!parse_bool(token), "{token} should be falsy");
        }
    }

    #[test]
    fn dates_try_formats_in_order() {
        assert_eq!(parse_date("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(parse_date("1970-01-01 00:00:01").unwrap(), 1_000);
        assert_eq!(parse_date("1970-01-01T00:01:00").unwrap(), 60_000);
        assert_eq!(parse_date("1970-01-01T01:00:00+01:00").unwrap(), 0);
        // day-first wins over month-first
        assert_eq!(
            parse_date("02/01/1970").unwrap(),
            parse_date("1970-01-02").unwrap()
        );
        assert_eq!(
            parse_date("12/31/1970").unwrap(),
            parse_date("1970-12-31").unwrap()
        );
        assert_eq!(parse_date("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(
            parse_date("next tuesday"),
            Err(ValueError::InvalidDate("next tuesday".into()))
        );
    }

    #[test]
    fn lists_split_on_commas() {
        assert_eq!(
            coerce("a, b,,c ", FieldType::Labels).unwrap(),
            FieldValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn wire_shapes() {
        assert_eq!(FieldValue::Bool(true).to_wire(), json!(true));
        assert_eq!(FieldValue::Number(2.5).to_wire(), json!(2.5));
        assert_eq!(FieldValue::Date(5).to_wire(), json!(5));
        assert_eq!(
            FieldValue::UserList(vec!["12".into(), "ana".into()]).to_wire(),
            json!({ "add": [12, "ana"], "rem": [] })
        );
        assert_eq!(
            FieldValue::Location("Main St 1".into()).to_wire(),
            json!({ "formatted_address": "Main St 1" })
        );
    }

    #[test]
    fn unknown_api_types_are_text() {
        assert_eq!(FieldType::from_api_name("formula"), FieldType::Text);
        assert_eq!(FieldType::from_api_name("emoji"), FieldType::Rating);
        assert_eq!(FieldType::from_api_name("drop_down"), FieldType::DropDown);
    }

    proptest! {
        #[test]
        fn bool_coercion_is_idempotent(raw in ".{0,12}") {
            let once = coerce(&raw, FieldType::Checkbox).unwrap();
            let twice = coerce(&once.as_cell(), FieldType::Checkbox).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn number_coercion_is_idempotent(raw in "[-0-9.,$ ]{0,16}") {
            let once = coerce(&raw, FieldType::Number).unwrap();
            let twice = coerce(&once.as_cell(), FieldType::Number).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn finite_numbers_survive_rendering(n in -1.0e12f64..1.0e12f64) {
            let value = coerce(&n.to_string(), FieldType::Number).unwrap();
            prop_assert_eq!(value, FieldValue::Number(n));
        }
    }
}
