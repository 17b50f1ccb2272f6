use std::path::{Path, PathBuf};

use log::debug;
use quick_xml::escape::{escape, partial_escape};

use crate::data::{DocumentData, FieldValue, RowData, SectionData};
use crate::error::{DataError, SectionFailure};
use crate::odt::xml::unescape_lossy;

pub const PICTURES_DIR: &str = "Pictures";
pub const MAIN_SECTION: &str = "MAIN";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    Book,
    Report,
    Styles,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::Book => "book",
            TemplateKind::Report => "report",
            TemplateKind::Styles => "styles",
        }
    }
}

/// The capture target refused an item in its current role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Refused;

/// Anything the template visitor can capture into.
pub trait CaptureTarget {
    fn append_literal(&mut self, text: &str);

    fn append_variable(&mut self, _name: &str) -> Result<(), Refused> {
        Err(Refused)
    }

    fn append_image(&mut self, _name: &str, _default_path: &str) -> Result<(), Refused> {
        Err(Refused)
    }

    fn append_table(&mut self, _name: &str, _table: Table) -> Result<(), Refused> {
        Err(Refused)
    }
}

impl CaptureTarget for String {
    fn append_literal(&mut self, text: &str) {
        self.push_str(text);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SectionElement {
    Text(String),
    Variable(String),
    Table { name: String, table: Table },
    /// `default_path` is the raw (still escaped) `xlink:href` value.
    Image { name: String, default_path: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableFragment {
    Text(String),
    /// Resolved against the enclosing section's fields.
    Variable(String),
    Image { name: String, default_path: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RowElement {
    Text(String),
    Variable(String),
}

/// A top-level content region with its own field/table/image namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    pub identifier: String,
    pub elements: Vec<SectionElement>,
}

impl Section {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            elements: Vec::new(),
        }
    }

    pub fn write(
        &self,
        out: &mut Vec<u8>,
        data: &SectionData,
        images: &mut ImageStage,
    ) -> Result<(), DataError> {
        for el in &self.elements {
            match el {
                SectionElement::Text(text) => out.extend_from_slice(text.as_bytes()),
                SectionElement::Variable(name) => {
                    let value = self.field(data, name)?;
                    write_text_value(out, value);
                }
                SectionElement::Table { name, table } => {
                    let rows = data.tables.get(name).ok_or_else(|| DataError::MissingTable {
                        table: name.clone(),
                        section: self.identifier.clone(),
                    })?;
                    table.write(out, rows, self, data, images)?;
                }
                SectionElement::Image { name, default_path } => {
                    write_image_path(out, name, default_path, data, images)?;
                }
            }
        }
        Ok(())
    }

    fn field<'a>(&self, data: &'a SectionData, name: &str) -> Result<&'a FieldValue, DataError> {
        data.fields.get(name).ok_or_else(|| DataError::MissingField {
            field: name.to_string(),
            section: self.identifier.clone(),
        })
    }

    /// Every variable name this section needs, tables as `table.field`.
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        for el in &self.elements {
            match el {
                SectionElement::Variable(name) => out.push(name.clone()),
                SectionElement::Table { name, table } => {
                    out.extend(table.section_variables());
                    out.extend(table.row.variables().map(|f| format!("{name}.{f}")));
                }
                SectionElement::Text(_) | SectionElement::Image { .. } => {}
            }
        }
        out
    }

    pub fn images(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for el in &self.elements {
            match el {
                SectionElement::Image { name, default_path } => {
                    out.push((name.clone(), unescape_lossy(default_path)))
                }
                SectionElement::Table { table, .. } => {
                    for frag in table.before.iter().chain(&table.after) {
                        if let TableFragment::Image { name, default_path } = frag {
                            out.push((name.clone(), unescape_lossy(default_path)));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

impl CaptureTarget for Section {
    fn append_literal(&mut self, text: &str) {
        if let Some(SectionElement::Text(last)) = self.elements.last_mut() {
            last.push_str(text);
        } else {
            self.elements.push(SectionElement::Text(text.to_string()));
        }
    }

    fn append_variable(&mut self, name: &str) -> Result<(), Refused> {
        self.elements.push(SectionElement::Variable(name.to_string()));
        Ok(())
    }

    fn append_image(&mut self, name: &str, default_path: &str) -> Result<(), Refused> {
        self.elements.push(SectionElement::Image {
            name: name.to_string(),
            default_path: default_path.to_string(),
        });
        Ok(())
    }

    fn append_table(&mut self, name: &str, table: Table) -> Result<(), Refused> {
        self.elements.push(SectionElement::Table {
            name: name.to_string(),
            table,
        });
        Ok(())
    }
}

/// A captured table: markup before the repeating row, the row itself, markup after it.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub identifier: String,
    pub before: Vec<TableFragment>,
    pub row: Row,
    pub after: Vec<TableFragment>,
}

impl Table {
    pub fn write(
        &self,
        out: &mut Vec<u8>,
        rows: &[RowData],
        section: &Section,
        data: &SectionData,
        images: &mut ImageStage,
    ) -> Result<(), DataError> {
        self.write_fragments(out, &self.before, section, data, images)?;
        for (i, fields) in rows.iter().enumerate() {
            self.row.write(out, fields, i)?;
        }
        self.write_fragments(out, &self.after, section, data, images)
    }

    fn write_fragments(
        &self,
        out: &mut Vec<u8>,
        fragments: &[TableFragment],
        section: &Section,
        data: &SectionData,
        images: &mut ImageStage,
    ) -> Result<(), DataError> {
        for frag in fragments {
            match frag {
                TableFragment::Text(text) => out.extend_from_slice(text.as_bytes()),
                TableFragment::Variable(name) => {
                    let value = section.field(data, name)?;
                    write_text_value(out, value);
                }
                TableFragment::Image { name, default_path } => {
                    write_image_path(out, name, default_path, data, images)?;
                }
            }
        }
        Ok(())
    }

    fn section_variables(&self) -> impl Iterator<Item = String> + '_ {
        self.before.iter().chain(&self.after).filter_map(|f| match f {
            TableFragment::Variable(name) => Some(name.clone()),
            _ => None,
        })
    }
}

/// The repeating unit of a table.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub table: String,
    pub elements: Vec<RowElement>,
}

impl Row {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            elements: Vec::new(),
        }
    }

    pub fn write(&self, out: &mut Vec<u8>, fields: &RowData, row: usize) -> Result<(), DataError> {
        for el in &self.elements {
            match el {
                RowElement::Text(text) => out.extend_from_slice(text.as_bytes()),
                RowElement::Variable(name) => {
                    let value = fields.get(name).ok_or_else(|| DataError::MissingRowField {
                        field: name.clone(),
                        table: self.table.clone(),
                        row,
                    })?;
                    write_text_value(out, value);
                }
            }
        }
        Ok(())
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> + '_ {
        self.elements.iter().filter_map(|el| match el {
            RowElement::Variable(name) => Some(name.as_str()),
            RowElement::Text(_) => None,
        })
    }
}

impl CaptureTarget for Row {
    fn append_literal(&mut self, text: &str) {
        if let Some(RowElement::Text(last)) = self.elements.last_mut() {
            last.push_str(text);
        } else {
            self.elements.push(RowElement::Text(text.to_string()));
        }
    }

    fn append_variable(&mut self, name: &str) -> Result<(), Refused> {
        self.elements.push(RowElement::Variable(name.to_string()));
        Ok(())
    }
}

fn write_text_value(out: &mut Vec<u8>, value: &FieldValue) {
    let raw = value.to_string();
    out.extend_from_slice(partial_escape(raw.as_str()).as_bytes());
}

fn write_image_path(
    out: &mut Vec<u8>,
    name: &str,
    default_path: &str,
    data: &SectionData,
    images: &mut ImageStage,
) -> Result<(), DataError> {
    match data.images.get(name) {
        Some(source) => {
            let archive_path = images.stage(name, source)?;
            out.extend_from_slice(escape(archive_path.as_str()).as_bytes());
        }
        None => out.extend_from_slice(default_path.as_bytes()),
    }
    Ok(())
}

/// An image file scheduled for inclusion in the output archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedImage {
    pub source: PathBuf,
    pub archive_path: String,
}

/// Images collected during one render call.
#[derive(Clone, Debug, Default)]
pub struct ImageStage {
    staged: Vec<StagedImage>,
}

impl ImageStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `source` for `Pictures/<basename>` and returns that archive path.
    pub fn stage(&mut self, image: &str, source: &Path) -> Result<String, DataError> {
        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DataError::BadImagePath {
                image: image.to_string(),
                path: source.display().to_string(),
            })?;
        let archive_path = format!("{PICTURES_DIR}/{basename}");
        if let Some(existing) = self.staged.iter().find(|s| s.archive_path == archive_path) {
            if existing.source != source {
                return Err(DataError::ImageConflict {
                    archive_path,
                    first: existing.source.display().to_string(),
                    second: source.display().to_string(),
                });
            }
            return Ok(archive_path);
        }
        debug!("staged image {image:?} from {} as {archive_path}", source.display());
        self.staged.push(StagedImage {
            source: source.to_path_buf(),
            archive_path: archive_path.clone(),
        });
        Ok(archive_path)
    }

    pub fn staged(&self) -> &[StagedImage] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateBody {
    /// Sections in document order, keyed by heading text.
    Book(Vec<(String, Section)>),
    Report(Section),
    Styles {
        header: Option<Section>,
        footer: Option<Section>,
    },
}

/// The reusable template for one XML part. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct XmlTemplate {
    pub identifier: String,
    pub before: String,
    pub body: TemplateBody,
    pub after: String,
}

impl XmlTemplate {
    pub fn kind(&self) -> TemplateKind {
        match self.body {
            TemplateBody::Book(_) => TemplateKind::Book,
            TemplateBody::Report(_) => TemplateKind::Report,
            TemplateBody::Styles { .. } => TemplateKind::Styles,
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        match &self.body {
            TemplateBody::Book(sections) => sections.iter().find(|(n, _)| n == name).map(|(_, s)| s),
            TemplateBody::Report(main) => (name == MAIN_SECTION).then_some(main),
            TemplateBody::Styles { header, footer } => match name {
                "header" => header.as_ref(),
                "footer" => footer.as_ref(),
                _ => None,
            },
        }
    }

    /// `(section name, section)` pairs in document order.
    pub fn sections(&self) -> Vec<(&str, &Section)> {
        match &self.body {
            TemplateBody::Book(sections) => sections.iter().map(|(n, s)| (n.as_str(), s)).collect(),
            TemplateBody::Report(main) => vec![(MAIN_SECTION, main)],
            TemplateBody::Styles { header, footer } => {
                let mut out = Vec::new();
                if let Some(h) = header {
                    out.push(("header", h));
                }
                if let Some(f) = footer {
                    out.push(("footer", f));
                }
                out
            }
        }
    }

    pub fn write(
        &self,
        out: &mut Vec<u8>,
        data: &DocumentData,
        images: &mut ImageStage,
    ) -> Result<(), DataError> {
        out.extend_from_slice(self.before.as_bytes());
        match (&self.body, data) {
            (TemplateBody::Report(main), DocumentData::Report(report)) => {
                main.write(out, &report.main, images)?;
            }
            (TemplateBody::Book(sections), DocumentData::Book(book)) => {
                write_book(out, sections, &book.sections, images)?;
            }
            (TemplateBody::Styles { header, footer }, data) => {
                if let Some(h) = header {
                    h.write(out, data.header(), images)?;
                }
                if let Some(f) = footer {
                    f.write(out, data.footer(), images)?;
                }
            }
            (_, data) => {
                return Err(DataError::WrongDataKind {
                    expected: self.kind().as_str(),
                    found: data.kind(),
                    template: self.identifier.clone(),
                })
            }
        }
        out.extend_from_slice(self.after.as_bytes());
        Ok(())
    }
}

fn write_book(
    out: &mut Vec<u8>,
    sections: &[(String, Section)],
    data: &[(String, SectionData)],
    images: &mut ImageStage,
) -> Result<(), DataError> {
    let lookup = |name: &str| sections.iter().find(|(n, _)| n == name).map(|(_, s)| s);

    let mut unknown_sections: Vec<String> = data
        .iter()
        .filter(|(name, _)| lookup(name).is_none())
        .map(|(name, _)| name.clone())
        .collect();
    unknown_sections.sort();
    unknown_sections.dedup();

    let mut failures = Vec::new();
    for (index, (name, section_data)) in data.iter().enumerate() {
        let Some(section) = lookup(name) else {
            continue;
        };
        if let Err(error) = section.write(out, section_data, images) {
            failures.push(SectionFailure {
                index,
                name: name.clone(),
                error,
            });
        }
    }

    if unknown_sections.is_empty() && failures.is_empty() {
        Ok(())
    } else {
        Err(DataError::Book {
            unknown_sections,
            failures,
        })
    }
}
