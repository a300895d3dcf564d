//! Conversion of column-mapped spreadsheet rows into storage records.
//!
//! Rows arrive as JSON objects keyed by the mapped column names. A schema of
//! [`FieldSpec`]s types the known columns; unknown scalar columns pass through.

use chrono::{DateTime, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{FieldValue, Record};

/// A parsed row after column mapping.
pub type RawRow = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    /// Normalised to `YYYY-MM-DD`.
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}': '{value}' is not a number")]
    InvalidNumber { field: String, value: String },

    #[error("field '{field}': '{value}' is not a recognised date")]
    InvalidDate { field: String, value: String },

    #[error("field '{field}' holds a list or object, expected a scalar")]
    NonScalar { field: String },
}

/// Accepted text date layouts, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d", "%d-%m-%Y"];

/// Converts raw rows to records under a field schema.
#[derive(Debug, Clone)]
pub struct RowConverter {
    schema: Vec<FieldSpec>,
}

impl Default for RowConverter {
    fn default() -> Self {
        Self::new(cargo_schema())
    }
}

impl RowConverter {
    pub fn new(schema: Vec<FieldSpec>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &[FieldSpec] {
        &self.schema
    }

    /// Convert one row. The record id is taken from an `id` column when
    /// present, otherwise a fresh UUID.
    pub fn convert(&self, row: &RawRow) -> Result<Record, ConversionError> {
        let id = match row.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let mut record = Record::new(id);

        for (name, value) in row {
            if name == "id" || self.spec(name).is_some() {
                continue;
            }
            record.fields.insert(name.clone(), passthrough(name, value)?);
        }

        for spec in &self.schema {
            let raw = row.get(&spec.name).unwrap_or(&Value::Null);
            let value = match spec.kind {
                FieldKind::Text => passthrough(&spec.name, raw).map(|v| match v {
                    FieldValue::Number(n) => FieldValue::Text(n.to_string()),
                    other => other,
                })?,
                FieldKind::Number => to_number(&spec.name, raw)?,
                FieldKind::Date => to_date(&spec.name, raw)?,
            };
            if spec.required && value.is_empty() {
                return Err(ConversionError::MissingField {
                    field: spec.name.clone(),
                });
            }
            record.fields.insert(spec.name.clone(), value);
        }

        Ok(record)
    }

    fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.schema.iter().find(|s| s.name == name)
    }
}

/// Schema for cargo/mail manifest imports.
pub fn cargo_schema() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("orig_oe", FieldKind::Text),
        FieldSpec::new("dest_oe", FieldKind::Text),
        FieldSpec::new("inb_flight_no", FieldKind::Text),
        FieldSpec::new("outb_flight_no", FieldKind::Text),
        FieldSpec::new("inb_flight_date", FieldKind::Date),
        FieldSpec::new("outb_flight_date", FieldKind::Date),
        FieldSpec::new("mail_cat", FieldKind::Text),
        FieldSpec::new("mail_class", FieldKind::Text),
        FieldSpec::new("total_kg", FieldKind::Number).required(),
        FieldSpec::new("invoice", FieldKind::Text),
    ]
}

fn passthrough(field: &str, value: &Value) -> Result<FieldValue, ConversionError> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
        Value::Number(n) => Ok(n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null)),
        Value::String(s) => {
            let s = s.trim();
            Ok(if s.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(s.to_string())
            })
        }
        Value::Array(_) | Value::Object(_) => Err(ConversionError::NonScalar {
            field: field.to_string(),
        }),
    }
}

fn to_number(field: &str, value: &Value) -> Result<FieldValue, ConversionError> {
    let invalid = |v: &str| ConversionError::InvalidNumber {
        field: field.to_string(),
        value: v.to_string(),
    };
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Number(n) => n.as_f64().map(FieldValue::Number).ok_or_else(|| invalid(&n.to_string())),
        Value::String(s) => {
            let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            if compact.is_empty() {
                return Ok(FieldValue::Null);
            }
            let cleaned = strip_thousands(&compact).ok_or_else(|| invalid(s))?;
            match cleaned.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(FieldValue::Number(n)),
                _ => Err(invalid(s)),
            }
        }
        Value::Bool(b) => Err(invalid(&b.to_string())),
        Value::Array(_) | Value::Object(_) => Err(ConversionError::NonScalar {
            field: field.to_string(),
        }),
    }
}

/// Drop thousands separators. Commas are only accepted between groups of
/// three digits in the integer part, so `"1,5"` is rejected, not read as 15.
fn strip_thousands(s: &str) -> Option<String> {
    let (int, frac) = match s.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (s, None),
    };
    if frac.is_some_and(|f| f.contains(',')) {
        return None;
    }
    if int.contains(',') {
        let mut groups = int.trim_start_matches(['-', '+']).split(',');
        let lead = groups.next().unwrap_or_default();
        if !(1..=3).contains(&lead.len()) || !groups.all(|g| g.len() == 3) {
            return None;
        }
    }
    Some(s.replace(',', ""))
}

fn to_date(field: &str, value: &Value) -> Result<FieldValue, ConversionError> {
    let invalid = |v: String| ConversionError::InvalidDate {
        field: field.to_string(),
        value: v,
    };
    let date = match value {
        Value::Null => return Ok(FieldValue::Null),
        Value::Number(n) => n.as_f64().and_then(from_serial).ok_or_else(|| invalid(n.to_string()))?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(FieldValue::Null);
            }
            parse_date(s).ok_or_else(|| invalid(s.to_string()))?
        }
        Value::Bool(b) => return Err(invalid(b.to_string())),
        Value::Array(_) | Value::Object(_) => {
            return Err(ConversionError::NonScalar {
                field: field.to_string(),
            });
        }
    };
    Ok(FieldValue::Text(date.format("%Y-%m-%d").to_string()))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| s.parse::<f64>().ok().and_then(from_serial))
}

/// Spreadsheet serial day number (1900 date system, day 1 = 1900-01-01).
///
/// The 1900 system counts a 29 February 1900 that never existed as day 60,
/// so that serial is rejected and earlier serials are offset by one day.
fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let day = serial.floor() as i64;
    let epoch = match day {
        ..=59 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        60 => return None,
        _ => NaiveDate::from_ymd_opt(1899, 12, 30)?,
    };
    epoch.checked_add_signed(Duration::days(day))
}
