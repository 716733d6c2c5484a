use crate::{
    data::{DataType, parse_naive_date, parse_naive_datetime},
    rows::RawRow,
};

const VARCHAR_DETECTION_LIMIT: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedColumn {
    pub data_type: DataType,
    pub nullable: bool,
}

impl DetectedColumn {
    pub fn text() -> Self {
        Self {
            data_type: DataType::Text,
            nullable: true,
        }
    }
}

/// Source columns in header order with their detected type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedColumns {
    columns: Vec<(String, DetectedColumn)>,
}

impl DetectedColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every header as nullable text; used when no sampling is wanted.
    pub fn untyped(headers: &[String]) -> Self {
        headers
            .iter()
            .map(|name| (name.clone(), DetectedColumn::text()))
            .collect()
    }

    pub fn push(&mut self, name: impl Into<String>, column: DetectedColumn) {
        self.columns.push((name.into(), column));
    }

    pub fn get(&self, name: &str) -> Option<&DetectedColumn> {
        self.columns
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, column)| column)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DetectedColumn)> {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, DetectedColumn)> for DetectedColumns {
    fn from_iter<I: IntoIterator<Item = (String, DetectedColumn)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

pub trait TypeDetector {
    fn detect(&self, headers: &[String], rows: &[RawRow]) -> DetectedColumns;
}

/// Candidate elimination over the first `sample_rows` rows (0 scans all).
#[derive(Debug, Clone, Copy)]
pub struct SampleTypeDetector {
    pub sample_rows: usize,
}

impl Default for SampleTypeDetector {
    fn default() -> Self {
        Self { sample_rows: 0 }
    }
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_integer: bool,
    possible_float: bool,
    possible_date: bool,
    possible_datetime: bool,
    max_length: usize,
    seen_value: bool,
    seen_null: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_integer: true,
            possible_float: true,
            possible_date: true,
            possible_datetime: true,
            max_length: 0,
            seen_value: false,
            seen_null: false,
        }
    }

    fn observe(&mut self, raw: Option<&str>) {
        let value = match raw.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => {
                self.seen_null = true;
                return;
            }
        };
        self.seen_value = true;
        self.max_length = self.max_length.max(value.chars().count());
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && value.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_date && parse_naive_date(value).is_err() {
            self.possible_date = false;
        }
        if self.possible_datetime && parse_naive_datetime(value).is_err() {
            self.possible_datetime = false;
        }
    }

    fn decide(&self) -> DetectedColumn {
        let data_type = if !self.seen_value {
            DataType::Text
        } else if self.possible_integer {
            DataType::Integer
        } else if self.possible_float {
            DataType::Float
        } else if self.possible_date {
            DataType::Date
        } else if self.possible_datetime {
            DataType::DateTime
        } else if self.max_length <= VARCHAR_DETECTION_LIMIT {
            DataType::Varchar(self.max_length as u32)
        } else {
            DataType::Text
        };
        DetectedColumn {
            data_type,
            nullable: self.seen_null || !self.seen_value,
        }
    }
}

impl TypeDetector for SampleTypeDetector {
    fn detect(&self, headers: &[String], rows: &[RawRow]) -> DetectedColumns {
        let mut candidates = vec![TypeCandidate::new(); headers.len()];
        let limit = if self.sample_rows == 0 {
            rows.len()
        } else {
            self.sample_rows.min(rows.len())
        };
        for row in &rows[..limit] {
            for (idx, candidate) in candidates.iter_mut().enumerate() {
                candidate.observe(row.get(idx).and_then(|cell| cell.as_deref()));
            }
        }
        headers
            .iter()
            .zip(candidates.iter())
            .map(|(name, candidate)| (name.clone(), candidate.decide()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> RawRow {
        cells
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn detects_numeric_date_and_text_columns() {
        let rows = vec![
            row(&["1", "1.5", "2024-01-15", "2024-01-15 10:00:00", "alpha"]),
            row(&["2", "3", "2024-01-16", "2024-01-16T11:30:00", "beta"]),
        ];
        let detected = SampleTypeDetector::default().detect(
            &headers(&["id", "amount", "day", "seen_at", "label"]),
            &rows,
        );
        assert_eq!(detected.get("id").unwrap().data_type, DataType::Integer);
        assert_eq!(detected.get("amount").unwrap().data_type, DataType::Float);
        assert_eq!(detected.get("day").unwrap().data_type, DataType::Date);
        assert_eq!(
            detected.get("seen_at").unwrap().data_type,
            DataType::DateTime
        );
        assert_eq!(
            detected.get("label").unwrap().data_type,
            DataType::Varchar(5)
        );
        assert!(!detected.get("id").unwrap().nullable);
    }

    #[test]
    fn empty_cells_mark_columns_nullable() {
        let rows = vec![row(&["1", ""]), row(&["", ""])];
        let detected = SampleTypeDetector::default().detect(&headers(&["a", "b"]), &rows);
        let a = detected.get("a").unwrap();
        assert_eq!(a.data_type, DataType::Integer);
        assert!(a.nullable);
        assert_eq!(*detected.get("b").unwrap(), DetectedColumn::text());
    }

    #[test]
    fn sampling_limits_rows_considered() {
        let rows = vec![row(&["1"]), row(&["x"])];
        let sampled = SampleTypeDetector { sample_rows: 1 }.detect(&headers(&["mixed"]), &rows);
        assert_eq!(
            sampled.get("mixed").unwrap().data_type,
            DataType::Integer
        );
        let full = SampleTypeDetector::default().detect(&headers(&["mixed"]), &rows);
        assert_eq!(full.get("mixed").unwrap().data_type, DataType::Varchar(1));
    }

    #[test]
    fn long_values_fall_back_to_text() {
        let long = "x".repeat(300);
        let rows = vec![row(&[long.as_str()])];
        let detected = SampleTypeDetector::default().detect(&headers(&["notes"]), &rows);
        assert_eq!(detected.get("notes").unwrap().data_type, DataType::Text);
    }

    #[test]
    fn detected_columns_preserve_header_order() {
        let detected = DetectedColumns::untyped(&headers(&["b", "a", "c"]));
        assert_eq!(detected.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert!(detected.contains("a"));
        assert_eq!(detected.len(), 3);
    }
}
