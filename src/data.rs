//! Caller-supplied data for one replay call.
//!
//! Data objects are built either directly from typed values or from JSON. The JSON constructors
//! validate the shape of every entry up front and report all problems at once, so a malformed
//! input never reaches the XML writer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::{DataCategory, DataProblem, MalformedData};

pub const HEADER_SECTION: &str = "#header";
pub const FOOTER_SECTION: &str = "#footer";

/// A scalar value substituted for a variable.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    /// Renders as the empty string. Only accepted in table rows.
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Null => Ok(()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Number(v.into())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl FieldValue {
    fn from_json(v: &Value, allow_null: bool) -> Result<Self, String> {
        match v {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Number(n.clone())),
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Null if allow_null => Ok(FieldValue::Null),
            other => Err(format!("bad type: {}", json_type(other))),
        }
    }
}

pub type RowData = BTreeMap<String, FieldValue>;

/// Fields, tables and images for one section.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectionData {
    pub fields: BTreeMap<String, FieldValue>,
    pub tables: BTreeMap<String, Vec<RowData>>,
    pub images: BTreeMap<String, PathBuf>,
}

impl SectionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<RowData>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    pub fn with_image(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.images.insert(name.into(), path.into());
        self
    }

    /// Builds section data from `{ "fields": {..}, "tables": {..}, "images": {..} }`.
    /// Missing keys are empty.
    pub fn from_json(value: &Value) -> Result<Self, MalformedData> {
        let mut problems = Vec::new();
        let data = Self::collect_json(value, "", &mut problems);
        if problems.is_empty() {
            Ok(data)
        } else {
            Err(MalformedData { problems })
        }
    }

    fn collect_json(value: &Value, scope: &str, problems: &mut Vec<DataProblem>) -> Self {
        let mut out = SectionData::default();
        let Some(obj) = value.as_object() else {
            problems.push(DataProblem {
                category: DataCategory::Sections,
                name: scope_name(scope, "section"),
                message: format!("expected an object, not {}", json_type(value)),
            });
            return out;
        };

        if let Some(fields) = container(obj, "fields", DataCategory::Fields, scope, problems) {
            for (name, v) in fields {
                match FieldValue::from_json(v, false) {
                    Ok(fv) => {
                        out.fields.insert(name.clone(), fv);
                    }
                    Err(message) => problems.push(DataProblem {
                        category: DataCategory::Fields,
                        name: scope_name(scope, name),
                        message,
                    }),
                }
            }
        }

        if let Some(tables) = container(obj, "tables", DataCategory::Tables, scope, problems) {
            for (name, rows) in tables {
                let Some(rows) = rows.as_array() else {
                    problems.push(DataProblem {
                        category: DataCategory::Tables,
                        name: scope_name(scope, name),
                        message: "expected list of row objects".to_string(),
                    });
                    continue;
                };
                let mut bad_rows: Vec<String> = Vec::new();
                let mut parsed: Vec<RowData> = Vec::with_capacity(rows.len());
                for (i, row) in rows.iter().enumerate() {
                    let Some(row) = row.as_object() else {
                        bad_rows.push(i.to_string());
                        continue;
                    };
                    let mut row_data = RowData::new();
                    for (field, v) in row {
                        match FieldValue::from_json(v, true) {
                            Ok(fv) => {
                                row_data.insert(field.clone(), fv);
                            }
                            Err(_) => bad_rows.push(format!("{i}.{field}")),
                        }
                    }
                    parsed.push(row_data);
                }
                if bad_rows.is_empty() {
                    out.tables.insert(name.clone(), parsed);
                } else {
                    problems.push(DataProblem {
                        category: DataCategory::Tables,
                        name: scope_name(scope, name),
                        message: format!("bad types for rows: {}", bad_rows.join(",")),
                    });
                }
            }
        }

        if let Some(images) = container(obj, "images", DataCategory::Images, scope, problems) {
            for (name, v) in images {
                match v.as_str() {
                    Some(path) => {
                        out.images.insert(name.clone(), PathBuf::from(path));
                    }
                    None => problems.push(DataProblem {
                        category: DataCategory::Images,
                        name: scope_name(scope, name),
                        message: format!("filename is not a string: {}", json_type(v)),
                    }),
                }
            }
        }
        out
    }
}

fn container<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    category: DataCategory,
    scope: &str,
    problems: &mut Vec<DataProblem>,
) -> Option<&'a Map<String, Value>> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m),
        Some(other) => {
            problems.push(DataProblem {
                category,
                name: scope_name(scope, key),
                message: format!("expected an object, not {}", json_type(other)),
            });
            None
        }
    }
}

fn scope_name(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}/{name}")
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Data for a single-section report plus its header and footer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportData {
    pub main: SectionData,
    pub header: SectionData,
    pub footer: SectionData,
}

impl ReportData {
    pub fn new(main: SectionData) -> Self {
        Self {
            main,
            ..Self::default()
        }
    }

    /// Parses report JSON. Without `header` / `footer` keys and with `header_footer_from_main`
    /// set, the header and footer reuse the main data.
    pub fn from_json(value: &Value, header_footer_from_main: bool) -> Result<Self, MalformedData> {
        let mut problems = Vec::new();
        let main = SectionData::collect_json(value, "", &mut problems);
        let fallback = if header_footer_from_main {
            main.clone()
        } else {
            SectionData::default()
        };
        let header = match value.get("header") {
            Some(v) => SectionData::collect_json(v, "header", &mut problems),
            None => fallback.clone(),
        };
        let footer = match value.get("footer") {
            Some(v) => SectionData::collect_json(v, "footer", &mut problems),
            None => fallback,
        };
        if !problems.is_empty() {
            return Err(MalformedData { problems });
        }
        Ok(Self {
            main,
            header,
            footer,
        })
    }
}

/// Data for a multi-section book: sections are rendered in this order and may repeat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookData {
    pub sections: Vec<(String, SectionData)>,
    pub header: SectionData,
    pub footer: SectionData,
}

impl BookData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section(&mut self, name: impl Into<String>, data: SectionData) -> &mut Self {
        self.sections.push((name.into(), data));
        self
    }

    /// Accepts `{ "sections": [..], "header": {..}, "footer": {..} }` or the legacy list form
    /// `[{ "name": .., "fields": .., .. }]` where `#header` / `#footer` address the page styles.
    pub fn from_json(value: &Value) -> Result<Self, MalformedData> {
        let mut problems = Vec::new();
        let mut book = BookData::default();
        let entries: &[Value] = match value {
            Value::Array(list) => list.as_slice(),
            Value::Object(obj) => {
                if let Some(v) = obj.get("header") {
                    book.header = SectionData::collect_json(v, HEADER_SECTION, &mut problems);
                }
                if let Some(v) = obj.get("footer") {
                    book.footer = SectionData::collect_json(v, FOOTER_SECTION, &mut problems);
                }
                match obj.get("sections") {
                    Some(Value::Array(list)) => list.as_slice(),
                    None => &[],
                    Some(other) => {
                        return Err(MalformedData::single(
                            DataCategory::Sections,
                            "sections",
                            format!("expected a list, not {}", json_type(other)),
                        ))
                    }
                }
            }
            other => {
                return Err(MalformedData::single(
                    DataCategory::Sections,
                    "book",
                    format!("expected a list or an object, not {}", json_type(other)),
                ))
            }
        };

        for (i, entry) in entries.iter().enumerate() {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                problems.push(DataProblem {
                    category: DataCategory::Sections,
                    name: i.to_string(),
                    message: "expected an object with a string \"name\"".to_string(),
                });
                continue;
            };
            let data = SectionData::collect_json(entry, name, &mut problems);
            match name {
                HEADER_SECTION => book.header = data,
                FOOTER_SECTION => book.footer = data,
                _ => book.sections.push((name.to_string(), data)),
            }
        }

        if !problems.is_empty() {
            return Err(MalformedData { problems });
        }
        Ok(book)
    }
}

/// Data for one render call, matching the template kind.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentData {
    Report(ReportData),
    Book(BookData),
}

impl DocumentData {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentData::Report(_) => "report",
            DocumentData::Book(_) => "book",
        }
    }

    pub fn header(&self) -> &SectionData {
        match self {
            DocumentData::Report(r) => &r.header,
            DocumentData::Book(b) => &b.header,
        }
    }

    pub fn footer(&self) -> &SectionData {
        match self {
            DocumentData::Report(r) => &r.footer,
            DocumentData::Book(b) => &b.footer,
        }
    }
}

impl From<ReportData> for DocumentData {
    fn from(v: ReportData) -> Self {
        DocumentData::Report(v)
    }
}

impl From<BookData> for DocumentData {
    fn from(v: BookData) -> Self {
        DocumentData::Book(v)
    }
}
