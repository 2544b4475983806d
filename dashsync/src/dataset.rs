use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::{coerce_number, coerce_text};
use crate::DashError;

/// One CSV row keyed by (trimmed) column name.
pub type RawRecord = HashMap<String, String>;

#[derive(Clone, Debug, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Categorical,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Candidate source columns, tried in order. Empty means `[name]`.
    #[serde(default)]
    pub columns: Vec<String>,
    pub kind: FieldKind,
    /// A required field that is missing or does not coerce drops the row;
    /// an optional one becomes `null`, as does an optional field whose
    /// column is absent from the header.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn categorical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            kind: FieldKind::Categorical,
            required: true,
            allowed: None,
        }
    }

    pub fn numeric(name: &str) -> Self {
        Self {
            kind: FieldKind::Numeric,
            ..Self::categorical(name)
        }
    }

    pub fn from_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn allow(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    fn candidates(&self) -> Vec<&str> {
        if self.columns.is_empty() {
            vec![self.name.as_str()]
        } else {
            self.columns.iter().map(String::as_str).collect()
        }
    }


    fn allows(&self, value: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|a| a == value))
    }
}

/// Derives a display field from a categorical code, e.g. `energy` -> `Energy`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LabelSpec {
    pub field: String,
    pub target: String,
    pub map: BTreeMap<String, String>,
}

/// Turns wide numeric columns into long rows: one row per non-null field,
/// with the field name under `key` and its number under `value`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FoldSpec {
    pub fields: Vec<String>,
    pub key: String,
    pub value: String,
}

impl FoldSpec {
    fn apply(&self, rows: Vec<CleanedRow>) -> Vec<CleanedRow> {
        let mut out = Vec::with_capacity(rows.len());
        for CleanedRow(mut base) in rows {
            let measures: Vec<(&String, Option<Value>)> =
                self.fields.iter().map(|f| (f, base.remove(f))).collect();
            for (field, value) in measures {
                let Some(value) = value.filter(|v| !v.is_null()) else {
                    continue;
                };
                let mut row = base.clone();
                row.insert(self.key.clone(), Value::String(field.clone()));
                row.insert(self.value.clone(), value);
                out.push(CleanedRow(row));
            }
        }
        out
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DatasetSchema {
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub labels: Vec<LabelSpec>,
    #[serde(default)]
    pub fold: Option<FoldSpec>,
}

impl DatasetSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` ends up as a text value in every cleaned row.
    pub fn is_categorical(&self, name: &str) -> bool {
        let folded = |name: &str| {
            self.fold
                .as_ref()
                .is_some_and(|f| f.fields.iter().any(|x| x == name))
        };
        if folded(name) {
            return false;
        }
        self.field(name)
            .is_some_and(|f| f.kind == FieldKind::Categorical && f.required)
            || self.labels.iter().any(|l| l.target == name)
            || self.fold.as_ref().is_some_and(|f| f.key == name)
    }
}

/// A validated record. Numeric fields hold a finite number or `null`,
/// categorical fields a trimmed non-empty string.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CleanedRow(Map<String, Value>);

impl CleanedRow {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CleanReport {
    pub raw_rows: usize,
    pub cleaned_rows: usize,
    /// Rows dropped, keyed by the first field that failed.
    pub dropped: BTreeMap<String, usize>,
    /// Schema field -> resolved CSV column.
    pub columns: BTreeMap<String, Option<String>>,
    /// Row count after the schema's fold, when it has one.
    #[serde(default)]
    pub folded_rows: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub rows: Vec<CleanedRow>,
    pub report: CleanReport,
}

/// Parse delimited text with a header row.
///
/// A data row that repeats the header is treated as malformed input.
pub fn parse_csv(text: &str) -> Result<RawTable, DashError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DashError::DatasetLoad(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DashError::DatasetLoad(e.to_string()))?;
        if repeats_header(&headers, &record) {
            return Err(DashError::DatasetLoad(format!(
                "data row {} repeats the header row",
                idx + 1
            )));
        }
        let row: RawRecord = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        records.push(row);
    }
    Ok(RawTable { headers, records })
}

fn repeats_header(headers: &[String], record: &csv::StringRecord) -> bool {
    let mut matched = 0usize;
    for (header, cell) in headers.iter().zip(record.iter()) {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        if !cell.eq_ignore_ascii_case(header) {
            return false;
        }
        matched += 1;
    }
    matched >= headers.len().min(2) && matched > 0
}

fn resolve_column(headers: &[String], candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        if let Some(h) = headers.iter().find(|h| h.eq_ignore_ascii_case(candidate)) {
            return Some(h.clone());
        }
    }
    for candidate in candidates {
        let needle = candidate.to_ascii_lowercase();
        if let Some(h) = headers
            .iter()
            .find(|h| h.to_ascii_lowercase().contains(&needle))
        {
            return Some(h.clone());
        }
    }
    None
}

/// Clean raw records against `schema`.
pub fn clean(table: &RawTable, schema: &DatasetSchema) -> Result<Dataset, DashError> {
    if table.records.is_empty() {
        return Err(DashError::NoUsableRows);
    }

    let mut columns = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let candidates = field.candidates();
        let column = resolve_column(&table.headers, &candidates);
        if column.is_none() && field.required {
            return Err(DashError::DatasetLoad(format!(
                "no column for field '{}' (tried: {})",
                field.name,
                candidates.join(", ")
            )));
        }
        columns.push(column);
    }

    let mut rows = Vec::with_capacity(table.records.len());
    let mut dropped: BTreeMap<String, usize> = BTreeMap::new();

    'records: for record in &table.records {
        let mut row = Map::new();
        for (field, column) in schema.fields.iter().zip(&columns) {
            let raw = column
                .as_ref()
                .and_then(|c| record.get(c))
                .map(String::as_str);
            let value = match field.kind {
                FieldKind::Numeric => match coerce_number(raw) {
                    Some(v) => Value::from(v),
                    None if field.required => {
                        *dropped.entry(field.name.clone()).or_default() += 1;
                        continue 'records;
                    }
                    None => Value::Null,
                },
                FieldKind::Categorical => match coerce_text(raw) {
                    Some(text) if field.allows(&text) => Value::String(text),
                    None if !field.required => Value::Null,
                    _ => {
                        *dropped.entry(field.name.clone()).or_default() += 1;
                        continue 'records;
                    }
                },
            };
            row.insert(field.name.clone(), value);
        }
        for label in &schema.labels {
            if let Some(code) = row.get(&label.field).and_then(Value::as_str) {
                let display = label
                    .map
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| code.to_string());
                row.insert(label.target.clone(), Value::String(display));
            }
        }
        rows.push(CleanedRow(row));
    }

    if rows.is_empty() {
        return Err(DashError::NoUsableRows);
    }

    let cleaned_rows = rows.len();
    let mut folded_rows = None;
    if let Some(fold) = &schema.fold {
        rows = fold.apply(rows);
        folded_rows = Some(rows.len());
    }

    let report = CleanReport {
        raw_rows: table.records.len(),
        cleaned_rows,
        dropped,
        columns: schema
            .fields
            .iter()
            .map(|f| f.name.clone())
            .zip(columns)
            .collect(),
        folded_rows,
    };
    Ok(Dataset { rows, report })
}

pub fn load_dataset(text: &str, schema: &DatasetSchema) -> Result<Dataset, DashError> {
    let table = parse_csv(text)?;
    clean(&table, schema)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DomainOrder {
    #[default]
    Lexical,
    /// Numeric ascending; values that are not numbers come last.
    Numeric,
    /// Listed order; unlisted values come last.
    Fixed(Vec<String>),
}

impl DomainOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            DomainOrder::Lexical => a.cmp(b),
            DomainOrder::Numeric => {
                let key = |s: &str| coerce_number(s).map(OrderedFloat);
                match (key(a), key(b)) {
                    (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => a.cmp(b),
                }
            }
            DomainOrder::Fixed(order) => {
                let rank = |s: &str| order.iter().position(|o| o == s).unwrap_or(order.len());
                rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
            }
        }
    }
}

/// Distinct values of `field`, restricted to `valid` when given, in `order`.
pub fn domain(
    rows: &[CleanedRow],
    field: &str,
    valid: Option<&[String]>,
    order: &DomainOrder,
) -> Vec<String> {
    let distinct: BTreeSet<&str> = rows.iter().filter_map(|r| r.text(field)).collect();
    let mut values: Vec<String> = distinct
        .into_iter()
        .filter(|v| valid.map_or(true, |valid| valid.iter().any(|x| x == v)))
        .map(str::to_string)
        .collect();
    values.sort_by(|a, b| order.compare(a, b));
    values
}
