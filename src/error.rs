use std::fmt;

use thiserror::Error;

/// The template document does not follow the expected markup grammar.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unexpected variable {name:?}: state={state}, table={table:?}, template={template:?}")]
    UnexpectedVariable {
        name: String,
        state: &'static str,
        table: Option<String>,
        template: String,
    },

    #[error("variable-set without a name in template {template:?}")]
    UnnamedVariable { template: String },

    #[error("data table {table:?} found in state {state} (expected a section) in template {template:?}")]
    MisplacedTable {
        table: String,
        state: &'static str,
        template: String,
    },

    #[error("table row found in state {state} (expected an open table) in template {template:?}")]
    MisplacedRow {
        state: &'static str,
        template: String,
    },

    #[error("image found in state {state} (expected a section or table) in template {template:?}")]
    MisplacedImage {
        state: &'static str,
        template: String,
    },

    #[error("image in template {template:?} is missing {what}")]
    IncompleteImage {
        what: &'static str,
        template: String,
    },

    #[error("section start {element} found in state {state} in template {template:?}")]
    MisplacedSection {
        element: String,
        state: &'static str,
        template: String,
    },

    #[error("unknown section type {element} in template {template:?}")]
    UnknownSectionElement { element: String, template: String },

    #[error("duplicate section name {name:?} in template {template:?}")]
    DuplicateSection { name: String, template: String },

    #[error("main section declared twice in template {template:?}")]
    DuplicateMainSection { template: String },

    #[error("template {template:?} has no main section")]
    MissingMainSection { template: String },

    #[error("cannot find {element} in {template:?}")]
    MissingElement { element: String, template: String },

    #[error("multiple {element} elements in {template:?}")]
    MultipleElements { element: String, template: String },
}

/// Data supplied at replay time does not satisfy the template.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no value for field {field:?} in section {section:?}")]
    MissingField { field: String, section: String },

    #[error("no data for table {table:?} in section {section:?}")]
    MissingTable { table: String, section: String },

    #[error("no value for field {field:?} in table {table:?}[row={row}]")]
    MissingRowField {
        field: String,
        table: String,
        row: usize,
    },

    #[error("image {image:?} has no file name in {path:?}")]
    BadImagePath { image: String, path: String },

    #[error("images {first:?} and {second:?} would both be stored as {archive_path:?}")]
    ImageConflict {
        archive_path: String,
        first: String,
        second: String,
    },

    #[error("expected {expected} data for template {template:?}, got {found} data")]
    WrongDataKind {
        expected: &'static str,
        found: &'static str,
        template: String,
    },

    #[error("{}", book_summary(.unknown_sections, .failures))]
    Book {
        unknown_sections: Vec<String>,
        failures: Vec<SectionFailure>,
    },
}

/// One section of a book that failed to render.
#[derive(Debug)]
pub struct SectionFailure {
    pub index: usize,
    pub name: String,
    pub error: DataError,
}

fn book_summary<'a>(unknown_sections: &'a [String], failures: &'a [SectionFailure]) -> BookSummary<'a> {
    BookSummary {
        unknown_sections,
        failures,
    }
}

struct BookSummary<'a> {
    unknown_sections: &'a [String],
    failures: &'a [SectionFailure],
}

impl fmt::Display for BookSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = Vec::new();
        if !self.unknown_sections.is_empty() {
            lines.push(format!(
                "the following sections are in the data but not the template: {:?}",
                self.unknown_sections
            ));
        }
        for fail in self.failures {
            lines.push(format!(
                "section {} ({:?}): {}",
                fail.index, fail.name, fail.error
            ));
        }
        f.write_str(&lines.join("\n"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataCategory {
    Fields,
    Tables,
    Images,
    Sections,
}

impl DataCategory {
    fn label(self) -> &'static str {
        match self {
            DataCategory::Fields => "fields",
            DataCategory::Tables => "tables",
            DataCategory::Images => "images",
            DataCategory::Sections => "sections",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataProblem {
    pub category: DataCategory,
    pub name: String,
    pub message: String,
}

/// Input data has the wrong shape. Raised while building data objects, before any XML work.
#[derive(Debug, Error)]
pub struct MalformedData {
    pub problems: Vec<DataProblem>,
}

impl MalformedData {
    pub fn single(category: DataCategory, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            problems: vec![DataProblem {
                category,
                name: name.into(),
                message: message.into(),
            }],
        }
    }
}

impl fmt::Display for MalformedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for category in [
            DataCategory::Fields,
            DataCategory::Tables,
            DataCategory::Images,
            DataCategory::Sections,
        ] {
            let mut group = self.problems.iter().filter(|p| p.category == category).peekable();
            if group.peek().is_none() {
                continue;
            }
            writeln!(f, "errors in {}:", category.label())?;
            for p in group {
                writeln!(f, "    {}: {}", p.name, p.message)?;
            }
        }
        Ok(())
    }
}
