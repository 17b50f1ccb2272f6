//! Mail-merge templating for OpenDocument text files.
//!
//! A template ODT is read once into an [`odt::OdtTemplate`]: its `content.xml` and `styles.xml`
//! are split into literal XML and named holes (variables, repeating table rows, images). The
//! template can then be rendered any number of times against [`data::DocumentData`].

pub mod config;
pub mod data;
pub mod error;
pub mod odt;
pub mod progress;
pub mod template;

pub use data::{BookData, DocumentData, FieldValue, ReportData, SectionData};
pub use error::{DataError, MalformedData, TemplateError};
pub use odt::OdtTemplate;
