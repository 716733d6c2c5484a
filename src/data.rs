use std::{fmt, str::FromStr};

use anyhow::{Context, Result, anyhow, bail, ensure};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

const VARCHAR_MAX_LENGTH: u32 = 10_485_760;

/// Column data types understood by job configurations and the type detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Float,
    Date,
    DateTime,
    Text,
    Varchar(u32),
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Text => "text",
            DataType::Varchar(_) => "varchar",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "integer", "float", "date", "datetime", "text", "varchar(N)",
        ]
    }

    /// Configuration token, e.g. `varchar(20)`.
    pub fn token(&self) -> String {
        match self {
            DataType::Varchar(len) => format!("varchar({len})"),
            other => other.as_str().to_string(),
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DataType::Text | DataType::Varchar(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => Ok(DataType::Integer),
            "float" | "double" => Ok(DataType::Float),
            "date" => Ok(DataType::Date),
            "datetime" | "timestamp" => Ok(DataType::DateTime),
            "text" | "string" => Ok(DataType::Text),
            other if other.starts_with("varchar") => parse_varchar(other),
            _ => Err(anyhow!(
                "Unknown data type '{value}'. Supported types: {}",
                DataType::variants().join(", ")
            )),
        }
    }
}

fn parse_varchar(token: &str) -> Result<DataType> {
    let inner = token
        .strip_prefix("varchar")
        .map(str::trim)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| anyhow!("varchar must declare a length, e.g. varchar(20)"))?;
    let length: u32 = inner
        .trim()
        .parse()
        .with_context(|| format!("Parsing varchar length '{inner}'"))?;
    ensure!(length > 0, "varchar length must be positive");
    ensure!(
        length <= VARCHAR_MAX_LENGTH,
        "varchar length must be <= {VARCHAR_MAX_LENGTH}"
    );
    Ok(DataType::Varchar(length))
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.token())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        DataType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// A typed, non-null cell value. Nulls are carried as `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses a raw cell. Empty input is null regardless of type.
pub fn parse_typed_value(value: &str, ty: &DataType) -> Result<Option<Value>> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        DataType::Text => Value::String(value.to_string()),
        DataType::Varchar(limit) => {
            let length = value.chars().count();
            if length > *limit as usize {
                bail!("'{value}' is {length} characters, longer than varchar({limit})");
            }
            Value::String(value.to_string())
        }
        DataType::Integer => {
            let parsed: i64 = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Value::Integer(parsed)
        }
        DataType::Float => {
            let parsed: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as float"))?;
            Value::Float(parsed)
        }
        DataType::Date => Value::Date(parse_naive_date(value.trim())?),
        DataType::DateTime => Value::DateTime(parse_naive_datetime(value.trim())?),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_parses_aliases_and_varchar() {
        assert_eq!("INT".parse::<DataType>().unwrap(), DataType::Integer);
        assert_eq!("double".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("timestamp".parse::<DataType>().unwrap(), DataType::DateTime);
        assert_eq!("string".parse::<DataType>().unwrap(), DataType::Text);
        assert_eq!(
            "varchar(20)".parse::<DataType>().unwrap(),
            DataType::Varchar(20)
        );
        assert_eq!(
            "VARCHAR (8)".parse::<DataType>().unwrap(),
            DataType::Varchar(8)
        );
        assert!("varchar".parse::<DataType>().is_err());
        assert!("varchar(0)".parse::<DataType>().is_err());
        assert!("blob".parse::<DataType>().is_err());
    }

    #[test]
    fn data_type_token_round_trips_through_display() {
        for ty in [
            DataType::Integer,
            DataType::Float,
            DataType::Date,
            DataType::DateTime,
            DataType::Text,
            DataType::Varchar(12),
        ] {
            assert_eq!(ty.to_string().parse::<DataType>().unwrap(), ty);
        }
    }

    #[test]
    fn parse_naive_date_supports_multiple_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06").unwrap(), expected);
        assert_eq!(parse_naive_date("2024/05/06").unwrap(), expected);
        assert_eq!(parse_naive_date("06-05-2024").unwrap(), expected);
        assert!(parse_naive_date("20240506").is_err());
    }

    #[test]
    fn parse_naive_datetime_supports_iso_and_space_separators() {
        let expected =
            NaiveDateTime::parse_from_str("2024-05-06 14:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            parse_naive_datetime("2024-05-06T14:30:00").unwrap(),
            expected
        );
        assert_eq!(parse_naive_datetime("2024-05-06 14:30").unwrap(), expected);
    }

    #[test]
    fn parse_typed_value_handles_empty_and_invalid_inputs() {
        assert_eq!(parse_typed_value("", &DataType::Integer).unwrap(), None);
        assert_eq!(parse_typed_value("", &DataType::Text).unwrap(), None);
        assert_eq!(
            parse_typed_value("42", &DataType::Integer).unwrap(),
            Some(Value::Integer(42))
        );
        assert!(parse_typed_value("4.2", &DataType::Integer).is_err());
        assert!(parse_typed_value("abcdef", &DataType::Varchar(3)).is_err());
    }

    #[test]
    fn dates_normalise_to_iso_display() {
        let parsed = parse_typed_value("2024/01/15", &DataType::Date)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.as_display(), "2024-01-15");
        let parsed = parse_typed_value("2024-01-15T08:00:00", &DataType::DateTime)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_string(), "2024-01-15 08:00:00");
    }
}
