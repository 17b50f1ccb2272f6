pub mod classify;
pub mod model;
pub mod structure;
pub mod visitor;

pub use model::{ImageStage, Section, TemplateKind, XmlTemplate};
pub use visitor::read_template;
