#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Datetime parse formats, tried in order. Date-only formats imply midnight.
pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Canonical render/export format for datetime values.
pub const DATETIME_CANONICAL: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Boolean,
    Text,
    #[serde(rename = "datetime")]
    DateTime,
}

impl DataType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::DateTime => "datetime",
        }
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, TypeError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "i64" => Ok(Self::Integer),
            "float" | "number" | "f64" => Ok(Self::Float),
            "boolean" | "bool" => Ok(Self::Boolean),
            "text" | "string" | "str" | "category" | "categorical" => Ok(Self::Text),
            "datetime" | "date" | "timestamp" => Ok(Self::DateTime),
            other => Err(TypeError::UnknownType {
                name: other.to_string(),
            }),
        }
    }
}

/// A single cell: one of five typed domains, or the `Missing` sentinel.
///
/// `Missing` is never a domain value. Stored floats are always finite; a
/// non-finite float is normalized to `Missing` before it reaches a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// The declared type this value inhabits, `None` for `Missing`.
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Missing => None,
            Self::Int(_) => Some(DataType::Integer),
            Self::Float(_) => Some(DataType::Float),
            Self::Bool(_) => Some(DataType::Boolean),
            Self::Text(_) => Some(DataType::Text),
            Self::DateTime(_) => Some(DataType::DateTime),
        }
    }

    /// Whether this value may live in a column of the given declared type.
    /// `Missing` fits every column.
    #[must_use]
    pub fn fits(&self, dtype: DataType) -> bool {
        self.data_type().is_none_or(|t| t == dtype)
    }

    /// Numeric view for statistics: integers widen, floats pass through.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Maps non-finite floats to `Missing`; every other value passes through.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Float(v) if !v.is_finite() => Self::Missing,
            other => other,
        }
    }

    /// Canonical string form: base-10 integers, `Display` floats,
    /// `true`/`false`, datetimes as [`DATETIME_CANONICAL`], `Missing` as the
    /// empty string. Shared by Text coercion and CSV export.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Text(v) => v.clone(),
            Self::DateTime(v) => v.format(DATETIME_CANONICAL).to_string(),
        }
    }
}

// Operation intake and history records carry values as plain JSON scalars
// (null, bool, number, string), so serde is implemented by hand instead of
// derived with a variant tag. Datetimes serialize through their canonical
// string form and come back as Text; the column boundary re-parses them.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Missing => serializer.serialize_unit(),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::DateTime(v) => {
                serializer.serialize_str(&v.format(DATETIME_CANONICAL).to_string())
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a boolean, a number, or a string")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        if let Ok(as_int) = i64::try_from(v) {
            Ok(Value::Int(as_int))
        } else {
            Ok(Value::Float(v as f64))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v).normalized())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Missing)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Missing)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unsupported data type `{name}`")]
    UnknownType { name: String },
    #[error("cannot represent `{value}` as {target}")]
    NotRepresentable { value: String, target: DataType },
    #[error("missing is not a usable {target} value")]
    MissingValue { target: DataType },
}

/// Truthy/falsy spellings recognized by Boolean coercion, compared after
/// trimming and ASCII lowercasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanWords {
    truthy: Vec<String>,
    falsy: Vec<String>,
}

impl BooleanWords {
    #[must_use]
    pub fn new<T, F>(truthy: T, falsy: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let lower = |words: Vec<String>| -> Vec<String> {
            words.into_iter().map(|w| w.to_ascii_lowercase()).collect()
        };
        Self {
            truthy: lower(truthy.into_iter().map(Into::into).collect()),
            falsy: lower(falsy.into_iter().map(Into::into).collect()),
        }
    }

    #[must_use]
    pub fn classify(&self, raw: &str) -> Option<bool> {
        let needle = raw.trim().to_ascii_lowercase();
        if self.truthy.iter().any(|w| *w == needle) {
            Some(true)
        } else if self.falsy.iter().any(|w| *w == needle) {
            Some(false)
        } else {
            None
        }
    }
}

impl Default for BooleanWords {
    fn default() -> Self {
        Self::new(
            ["true", "t", "yes", "y", "1"],
            ["false", "f", "no", "n", "0"],
        )
    }
}

/// Session-level coercion configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoerceOptions {
    pub boolean_words: BooleanWords,
}

/// Lenient per-value cast: anything that does not convert cleanly becomes
/// `Missing`. Never fails; whole-column coercion therefore never fails on
/// cell content.
#[must_use]
pub fn coerce_value(value: &Value, target: DataType, options: &CoerceOptions) -> Value {
    if value.is_missing() {
        return Value::Missing;
    }
    convert_strict(value, target, options).unwrap_or(Value::Missing)
}

/// Strict cast: succeeds only when the value converts losslessly into the
/// target type. Validates fill constants; the lenient path wraps it.
pub fn convert_strict(
    value: &Value,
    target: DataType,
    options: &CoerceOptions,
) -> Result<Value, TypeError> {
    let lossy = || TypeError::NotRepresentable {
        value: value.render(),
        target,
    };
    match (value, target) {
        (Value::Missing, _) => Err(TypeError::MissingValue { target }),

        (Value::Int(v), DataType::Integer) => Ok(Value::Int(*v)),
        (Value::Float(v), DataType::Integer) => {
            if v.is_finite() && v.fract() == 0.0 {
                let as_int = *v as i64;
                if as_int as f64 == *v {
                    return Ok(Value::Int(as_int));
                }
            }
            Err(lossy())
        }
        (Value::Bool(v), DataType::Integer) => Ok(Value::Int(i64::from(*v))),
        (Value::Text(s), DataType::Integer) => {
            s.trim().parse::<i64>().map(Value::Int).map_err(|_| lossy())
        }
        (Value::DateTime(v), DataType::Integer) => Ok(Value::Int(v.and_utc().timestamp())),

        (Value::Int(v), DataType::Float) => Ok(Value::Float(*v as f64)),
        (Value::Float(v), DataType::Float) => {
            if v.is_finite() {
                Ok(Value::Float(*v))
            } else {
                Err(lossy())
            }
        }
        (Value::Bool(v), DataType::Float) => Ok(Value::Float(if *v { 1.0 } else { 0.0 })),
        (Value::Text(s), DataType::Float) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Value::Float(v)),
            _ => Err(lossy()),
        },
        (Value::DateTime(v), DataType::Float) => Ok(Value::Float(epoch_seconds(v))),

        (Value::Bool(v), DataType::Boolean) => Ok(Value::Bool(*v)),
        (Value::Int(v), DataType::Boolean) => match v {
            1 => Ok(Value::Bool(true)),
            0 => Ok(Value::Bool(false)),
            _ => Err(lossy()),
        },
        (Value::Float(v), DataType::Boolean) => {
            if *v == 1.0 {
                Ok(Value::Bool(true))
            } else if *v == 0.0 {
                Ok(Value::Bool(false))
            } else {
                Err(lossy())
            }
        }
        (Value::Text(s), DataType::Boolean) => {
            options.boolean_words.classify(s).map(Value::Bool).ok_or_else(lossy)
        }
        (Value::DateTime(_), DataType::Boolean) => Err(lossy()),

        (_, DataType::Text) => Ok(Value::Text(value.render())),

        (Value::DateTime(v), DataType::DateTime) => Ok(Value::DateTime(*v)),
        (Value::Text(s), DataType::DateTime) => {
            parse_datetime(s.trim()).map(Value::DateTime).ok_or_else(lossy)
        }
        (Value::Int(v), DataType::DateTime) => chrono::DateTime::from_timestamp(*v, 0)
            .map(|dt| Value::DateTime(dt.naive_utc()))
            .ok_or_else(lossy),
        (Value::Float(v), DataType::DateTime) => {
            datetime_from_epoch(*v).map(Value::DateTime).ok_or_else(lossy)
        }
        (Value::Bool(_), DataType::DateTime) => Err(lossy()),
    }
}

/// Tries every supported format in order; date-only formats parse to
/// midnight.
#[must_use]
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Epoch seconds with fractional nanoseconds, the numeric view of a
/// datetime.
#[must_use]
pub fn epoch_seconds(dt: &NaiveDateTime) -> f64 {
    let utc = dt.and_utc();
    utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) / 1e9
}

#[must_use]
pub fn datetime_from_epoch(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let mut secs = whole as i64;
    let mut nanos = ((seconds - whole) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs = secs.checked_add(1)?;
        nanos = 0;
    }
    chrono::DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

/// Infers the narrowest declared type for a column of raw text cells.
/// Priority: Integer, Float, Boolean (strict `true`/`false`), DateTime,
/// then Text. Cells empty after trimming are skipped; a column with no
/// usable cell infers Text.
#[must_use]
pub fn infer_type<'a, I>(cells: I) -> DataType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = false;
    let mut int_ok = true;
    let mut float_ok = true;
    let mut bool_ok = true;
    let mut datetime_ok = true;
    for raw in cells {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        seen = true;
        int_ok = int_ok && trimmed.parse::<i64>().is_ok();
        float_ok = float_ok && trimmed.parse::<f64>().is_ok_and(f64::is_finite);
        bool_ok = bool_ok && matches!(trimmed, "true" | "false");
        datetime_ok = datetime_ok && parse_datetime(trimmed).is_some();
        if !(int_ok || float_ok || bool_ok || datetime_ok) {
            return DataType::Text;
        }
    }
    if !seen {
        return DataType::Text;
    }
    if int_ok {
        DataType::Integer
    } else if float_ok {
        DataType::Float
    } else if bool_ok {
        DataType::Boolean
    } else if datetime_ok {
        DataType::DateTime
    } else {
        DataType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(raw: &str) -> NaiveDateTime {
        parse_datetime(raw).expect("test datetime should parse")
    }

    #[test]
    fn data_type_parses_common_aliases() {
        for (raw, expected) in [
            ("integer", DataType::Integer),
            ("Int", DataType::Integer),
            ("float", DataType::Float),
            ("NUMBER", DataType::Float),
            ("bool", DataType::Boolean),
            ("string", DataType::Text),
            ("category", DataType::Text),
            ("datetime", DataType::DateTime),
            (" date ", DataType::DateTime),
        ] {
            assert_eq!(raw.parse::<DataType>().expect(raw), expected);
        }
    }

    #[test]
    fn data_type_rejects_unknown_names() {
        let err = "uuid".parse::<DataType>().expect_err("uuid is not a type");
        assert_eq!(
            err,
            TypeError::UnknownType {
                name: "uuid".to_string()
            }
        );
    }

    #[test]
    fn lenient_coercion_turns_unparseable_text_missing() {
        let options = CoerceOptions::default();
        assert_eq!(
            coerce_value(&Value::Text("42".into()), DataType::Integer, &options),
            Value::Int(42)
        );
        assert_eq!(
            coerce_value(&Value::Text(" 3.5 ".into()), DataType::Float, &options),
            Value::Float(3.5)
        );
        assert_eq!(
            coerce_value(&Value::Text("forty".into()), DataType::Integer, &options),
            Value::Missing
        );
        assert_eq!(
            coerce_value(&Value::Text("3.9".into()), DataType::Integer, &options),
            Value::Missing
        );
    }

    #[test]
    fn lenient_float_to_integer_requires_whole_numbers() {
        let options = CoerceOptions::default();
        assert_eq!(
            coerce_value(&Value::Float(3.0), DataType::Integer, &options),
            Value::Int(3)
        );
        assert_eq!(
            coerce_value(&Value::Float(3.5), DataType::Integer, &options),
            Value::Missing
        );
    }

    #[test]
    fn missing_survives_every_target() {
        let options = CoerceOptions::default();
        for target in [
            DataType::Integer,
            DataType::Float,
            DataType::Boolean,
            DataType::Text,
            DataType::DateTime,
        ] {
            assert_eq!(coerce_value(&Value::Missing, target, &options), Value::Missing);
        }
    }

    #[test]
    fn boolean_lexicon_is_case_insensitive_and_configurable() {
        let options = CoerceOptions::default();
        assert_eq!(
            coerce_value(&Value::Text("YES".into()), DataType::Boolean, &options),
            Value::Bool(true)
        );
        assert_eq!(
            coerce_value(&Value::Text(" n ".into()), DataType::Boolean, &options),
            Value::Bool(false)
        );
        assert_eq!(
            coerce_value(&Value::Text("si".into()), DataType::Boolean, &options),
            Value::Missing
        );

        let spanish = CoerceOptions {
            boolean_words: BooleanWords::new(["si"], ["no"]),
        };
        assert_eq!(
            coerce_value(&Value::Text("Si".into()), DataType::Boolean, &spanish),
            Value::Bool(true)
        );
    }

    #[test]
    fn coercion_is_idempotent() {
        let options = CoerceOptions::default();
        let samples = [
            Value::Missing,
            Value::Int(7),
            Value::Float(2.5),
            Value::Bool(true),
            Value::Text("yes".into()),
            Value::Text("not a number".into()),
            Value::DateTime(dt("2024-03-05 10:30:00")),
        ];
        for target in [
            DataType::Integer,
            DataType::Float,
            DataType::Boolean,
            DataType::Text,
            DataType::DateTime,
        ] {
            for value in &samples {
                let once = coerce_value(value, target, &options);
                let twice = coerce_value(&once, target, &options);
                assert_eq!(once, twice, "coercing {value:?} to {target} twice");
            }
        }
    }

    #[test]
    fn datetime_parsing_accepts_supported_formats() {
        for raw in [
            "2024-03-05T10:30:00",
            "2024-03-05 10:30:00",
            "2024-03-05 10:30",
            "03/05/2024 10:30:00",
        ] {
            let parsed = parse_datetime(raw).expect(raw);
            assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-03-05");
        }
        let midnight = parse_datetime("2024-03-05").expect("date only");
        assert_eq!(midnight.format(DATETIME_CANONICAL).to_string(), "2024-03-05 00:00:00");
        assert!(parse_datetime("March 5th").is_none());
    }

    #[test]
    fn datetime_round_trips_through_epoch_seconds() {
        let original = dt("2024-03-05 10:30:00");
        let seconds = epoch_seconds(&original);
        let back = datetime_from_epoch(seconds).expect("epoch in range");
        assert_eq!(back, original);
        assert!(datetime_from_epoch(f64::NAN).is_none());
    }

    #[test]
    fn strict_conversion_rejects_lossy_fills() {
        let options = CoerceOptions::default();
        let err = convert_strict(&Value::Float(2.5), DataType::Integer, &options)
            .expect_err("2.5 is not an integer");
        assert!(matches!(err, TypeError::NotRepresentable { .. }));
        assert!(convert_strict(&Value::Text("oops".into()), DataType::Float, &options).is_err());
        assert!(matches!(
            convert_strict(&Value::Missing, DataType::Float, &options),
            Err(TypeError::MissingValue { .. })
        ));
        assert_eq!(
            convert_strict(&Value::Int(5), DataType::Float, &options).expect("int widens"),
            Value::Float(5.0)
        );
    }

    #[test]
    fn render_uses_canonical_forms() {
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(Value::Float(3.5).render(), "3.5");
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Text("plain".into()).render(), "plain");
        assert_eq!(Value::DateTime(dt("2024-03-05 10:30:00")).render(), "2024-03-05 10:30:00");
        assert_eq!(Value::Missing.render(), "");
    }

    #[test]
    fn non_finite_floats_normalize_to_missing() {
        assert_eq!(Value::Float(f64::NAN).normalized(), Value::Missing);
        assert_eq!(Value::Float(f64::INFINITY).normalized(), Value::Missing);
        assert_eq!(Value::Float(1.25).normalized(), Value::Float(1.25));
    }

    #[test]
    fn inference_prefers_the_narrowest_type() {
        assert_eq!(infer_type(["1", "2", ""]), DataType::Integer);
        assert_eq!(infer_type(["1", "2.5"]), DataType::Float);
        assert_eq!(infer_type(["true", "false"]), DataType::Boolean);
        assert_eq!(infer_type(["2024-01-01", "2024-02-01 08:00:00"]), DataType::DateTime);
        assert_eq!(infer_type(["1", "apple"]), DataType::Text);
        assert_eq!(infer_type(["", "  "]), DataType::Text);
        assert_eq!(infer_type([]), DataType::Text);
    }

    #[test]
    fn values_serialize_as_plain_json_scalars() {
        assert_eq!(serde_json::to_string(&Value::Int(5)).expect("int"), "5");
        assert_eq!(serde_json::to_string(&Value::Float(2.5)).expect("float"), "2.5");
        assert_eq!(serde_json::to_string(&Value::Bool(true)).expect("bool"), "true");
        assert_eq!(serde_json::to_string(&Value::Missing).expect("missing"), "null");
        assert_eq!(
            serde_json::to_string(&Value::DateTime(dt("2024-03-05 10:30:00"))).expect("datetime"),
            "\"2024-03-05 10:30:00\""
        );

        assert_eq!(serde_json::from_str::<Value>("5").expect("int"), Value::Int(5));
        assert_eq!(serde_json::from_str::<Value>("2.5").expect("float"), Value::Float(2.5));
        assert_eq!(serde_json::from_str::<Value>("null").expect("null"), Value::Missing);
        assert_eq!(
            serde_json::from_str::<Value>("\"hi\"").expect("text"),
            Value::Text("hi".into())
        );
    }
}
