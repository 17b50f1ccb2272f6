//! Single-pass template extraction.
//!
//! The visitor walks a parsed part depth-first and serializes every node into whichever
//! capture target is active. The active target is owned by [`Capture`], so a `Row` can only be
//! open inside a `Table`, a `Table` only inside a `Section`, and so on. Variable-set elements,
//! data tables, their last rows and images switch targets or become holes in the template.

use std::mem;

use log::{debug, trace};

use crate::error::TemplateError;
use crate::odt::xml::{
    write_end_tag, write_leaf, write_start_tag, Element, NodeId, NodeKind, XmlDocument, DRAW_NS,
    OFFICE_NS, STYLE_NS, TABLE_NS, TEXT_NS, XLINK_NS,
};
use crate::template::classify::{classify_tables, table_field, TableClasses};
use crate::template::model::{
    CaptureTarget, Refused, Row, Section, Table, TableFragment, TemplateBody, TemplateKind,
    XmlTemplate, MAIN_SECTION,
};

const STANDARD_MASTER_PAGE: &str = "Standard";

/// Builds the template for one part. `identifier` names the part in error messages,
/// e.g. `report.odt#content.xml`.
pub fn read_template(
    doc: &XmlDocument,
    identifier: &str,
    kind: TemplateKind,
) -> Result<XmlTemplate, TemplateError> {
    let classes = classify_tables(doc);
    debug!(
        "{identifier}: {} data table(s) out of {} node(s)",
        classes.tables.len(),
        doc.len()
    );
    let report_start = match kind {
        TemplateKind::Report => report_section_start(doc),
        _ => None,
    };
    let mut visitor = TemplateVisitor {
        doc,
        classes,
        kind,
        report_start,
        identifier: identifier.to_string(),
        before: String::new(),
        after: String::new(),
        body: BodyBuilder::new(kind),
        capture: Capture::Before,
    };
    visitor.visit(XmlDocument::ROOT)?;
    visitor.finish()
}

/// The first `text:variable-decls`, else the first element inside `office:text`.
fn report_section_start(doc: &XmlDocument) -> Option<NodeId> {
    if let Some(decls) = doc
        .elements_named(XmlDocument::ROOT, TEXT_NS, "variable-decls")
        .first()
    {
        return Some(*decls);
    }
    let office_text = *doc.elements_named(XmlDocument::ROOT, OFFICE_NS, "text").first()?;
    doc.children(office_text)
        .iter()
        .copied()
        .find(|c| doc.element(*c).is_some())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SectionSlot {
    Named(String),
    Main,
    Header,
    Footer,
}

struct OpenSection {
    slot: SectionSlot,
    section: Section,
    parent: Option<NodeId>,
}

struct TableCapture {
    name: String,
    identifier: String,
    before: Vec<TableFragment>,
    row: Option<Row>,
    after: Vec<TableFragment>,
}

impl TableCapture {
    fn fragments(&mut self) -> &mut Vec<TableFragment> {
        if self.row.is_some() {
            &mut self.after
        } else {
            &mut self.before
        }
    }

    fn finish(self, template: &str) -> Result<Table, TemplateError> {
        let row = self.row.ok_or_else(|| TemplateError::MissingElement {
            element: format!("repeating row of table {:?}", self.name),
            template: template.to_string(),
        })?;
        Ok(Table {
            identifier: self.identifier,
            before: self.before,
            row,
            after: self.after,
        })
    }
}

impl CaptureTarget for TableCapture {
    fn append_literal(&mut self, text: &str) {
        let frags = self.fragments();
        if let Some(TableFragment::Text(last)) = frags.last_mut() {
            last.push_str(text);
        } else {
            frags.push(TableFragment::Text(text.to_string()));
        }
    }

    fn append_variable(&mut self, name: &str) -> Result<(), Refused> {
        self.fragments().push(TableFragment::Variable(name.to_string()));
        Ok(())
    }

    fn append_image(&mut self, name: &str, default_path: &str) -> Result<(), Refused> {
        self.fragments().push(TableFragment::Image {
            name: name.to_string(),
            default_path: default_path.to_string(),
        });
        Ok(())
    }
}

enum Capture {
    /// Template text before the first section.
    Before,
    /// Template text after the sections ended.
    After,
    Section(OpenSection),
    Table(OpenSection, TableCapture),
    Row(OpenSection, TableCapture, Row),
}

impl Capture {
    fn state(&self) -> &'static str {
        match self {
            Capture::Before | Capture::After => "TEMPLATE",
            Capture::Section(_) => "SECTION",
            Capture::Table(..) => "TABLE",
            Capture::Row(..) => "ROW",
        }
    }

    fn table_name(&self) -> Option<String> {
        match self {
            Capture::Table(_, t) | Capture::Row(_, t, _) => Some(t.name.clone()),
            _ => None,
        }
    }
}

enum BodyBuilder {
    Book(Vec<(String, Section)>),
    Report(Option<Section>),
    Styles {
        header: Option<Section>,
        footer: Option<Section>,
    },
}

impl BodyBuilder {
    fn new(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Book => BodyBuilder::Book(Vec::new()),
            TemplateKind::Report => BodyBuilder::Report(None),
            TemplateKind::Styles => BodyBuilder::Styles {
                header: None,
                footer: None,
            },
        }
    }
}

struct TemplateVisitor<'a> {
    doc: &'a XmlDocument,
    classes: TableClasses,
    kind: TemplateKind,
    report_start: Option<NodeId>,
    identifier: String,
    before: String,
    after: String,
    body: BodyBuilder,
    capture: Capture,
}

impl TemplateVisitor<'_> {
    fn target(&mut self) -> &mut dyn CaptureTarget {
        match &mut self.capture {
            Capture::Before => &mut self.before,
            Capture::After => &mut self.after,
            Capture::Section(open) => &mut open.section,
            Capture::Table(_, table) => table,
            Capture::Row(_, _, row) => row,
        }
    }

    fn literal(&mut self, text: &str) {
        self.target().append_literal(text);
    }

    fn literal_bytes(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        self.literal(&text);
    }

    fn visit(&mut self, id: NodeId) -> Result<(), TemplateError> {
        let doc = self.doc;
        match &doc.node(id).kind {
            NodeKind::Element(el) => self.visit_element(id, el),
            NodeKind::Document => self.visit_children(id),
            NodeKind::Text(raw) => {
                self.literal(raw);
                Ok(())
            }
            other => {
                let mut buf = Vec::new();
                write_leaf(&mut buf, other);
                self.literal_bytes(&buf);
                Ok(())
            }
        }
    }

    fn visit_children(&mut self, id: NodeId) -> Result<(), TemplateError> {
        let doc = self.doc;
        for c in doc.children(id) {
            self.visit(*c)?;
        }
        if matches!(&self.capture, Capture::Section(open) if open.parent == Some(id)) {
            self.end_sections()?;
        }
        Ok(())
    }

    fn visit_element(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        if self.is_section_start(id, el) {
            self.visit_section_start(id, el)
        } else if el.is(TEXT_NS, "variable-set") {
            self.visit_variable_set(el)
        } else if el.is(TABLE_NS, "table") && self.classes.is_data_table(id) {
            self.visit_table(id, el)
        } else if el.is(TABLE_NS, "table-row") && self.classes.is_last_row(id) {
            self.visit_last_row(id, el)
        } else if el.is(DRAW_NS, "image") {
            self.visit_image(id, el)
        } else {
            self.write_element(id, el)
        }
    }

    /// Serializes `el` literally, visiting its children in between.
    fn write_element(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        let mut buf = Vec::new();
        let closed = write_start_tag(&mut buf, el, !self.doc.children(id).is_empty());
        self.literal_bytes(&buf);
        if closed {
            return Ok(());
        }
        self.close_element(id, el)
    }

    /// Visits the children of an opened element and writes its end tag.
    fn close_element(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        self.visit_children(id)?;
        let mut buf = Vec::new();
        write_end_tag(&mut buf, el);
        self.literal_bytes(&buf);
        Ok(())
    }

    fn is_section_start(&self, id: NodeId, el: &Element) -> bool {
        match self.kind {
            TemplateKind::Book => {
                el.is(TEXT_NS, "h")
                    && el.attr_value(TEXT_NS, "outline-level").as_deref() == Some("1")
            }
            TemplateKind::Report => self.report_start == Some(id),
            TemplateKind::Styles => self
                .doc
                .parent(id)
                .and_then(|p| self.doc.element(p))
                .is_some_and(|p| {
                    p.is(STYLE_NS, "master-page")
                        && p.attr_value(STYLE_NS, "name").as_deref() == Some(STANDARD_MASTER_PAGE)
                }),
        }
    }

    fn section_slot(&self, id: NodeId, el: &Element) -> Result<(SectionSlot, String), TemplateError> {
        match self.kind {
            TemplateKind::Book => {
                let name = self.doc.direct_text(id);
                Ok((SectionSlot::Named(name.clone()), name))
            }
            TemplateKind::Report => Ok((SectionSlot::Main, MAIN_SECTION.to_string())),
            TemplateKind::Styles => {
                if el.is(STYLE_NS, "header") {
                    Ok((SectionSlot::Header, "header".to_string()))
                } else if el.is(STYLE_NS, "footer") {
                    Ok((SectionSlot::Footer, "footer".to_string()))
                } else {
                    Err(TemplateError::UnknownSectionElement {
                        element: el.name.clone(),
                        template: self.identifier.clone(),
                    })
                }
            }
        }
    }

    fn visit_section_start(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        let parent = self.doc.parent(id);
        match mem::replace(&mut self.capture, Capture::Before) {
            Capture::Before => {}
            Capture::Section(open) if open.parent == parent => self.register(open)?,
            other => {
                return Err(TemplateError::MisplacedSection {
                    element: el.name.clone(),
                    state: if matches!(other, Capture::Section(_)) {
                        "SECTION (different container)"
                    } else {
                        other.state()
                    },
                    template: self.identifier.clone(),
                })
            }
        }
        let (slot, label) = self.section_slot(id, el)?;
        self.check_unique(&slot)?;
        let section = Section::new(format!("{}#{label}", self.identifier));
        trace!("TEMPLATE -> SECTION {}", section.identifier);
        self.capture = Capture::Section(OpenSection {
            slot,
            section,
            parent,
        });
        self.write_element(id, el)
    }

    fn check_unique(&self, slot: &SectionSlot) -> Result<(), TemplateError> {
        let template = self.identifier.clone();
        match (&self.body, slot) {
            (BodyBuilder::Book(sections), SectionSlot::Named(name)) => {
                if sections.iter().any(|(n, _)| n == name) {
                    return Err(TemplateError::DuplicateSection {
                        name: name.clone(),
                        template,
                    });
                }
            }
            (BodyBuilder::Report(Some(_)), SectionSlot::Main) => {
                return Err(TemplateError::DuplicateMainSection { template })
            }
            (BodyBuilder::Styles { header: Some(_), .. }, SectionSlot::Header) => {
                return Err(TemplateError::DuplicateSection {
                    name: "header".to_string(),
                    template,
                })
            }
            (BodyBuilder::Styles { footer: Some(_), .. }, SectionSlot::Footer) => {
                return Err(TemplateError::DuplicateSection {
                    name: "footer".to_string(),
                    template,
                })
            }
            _ => {}
        }
        Ok(())
    }

    fn register(&mut self, open: OpenSection) -> Result<(), TemplateError> {
        self.check_unique(&open.slot)?;
        debug!(
            "captured section {} ({} element(s))",
            open.section.identifier,
            open.section.elements.len()
        );
        match (&mut self.body, open.slot) {
            (BodyBuilder::Book(sections), SectionSlot::Named(name)) => {
                sections.push((name, open.section))
            }
            (BodyBuilder::Report(main), SectionSlot::Main) => *main = Some(open.section),
            (BodyBuilder::Styles { header, .. }, SectionSlot::Header) => {
                *header = Some(open.section)
            }
            (BodyBuilder::Styles { footer, .. }, SectionSlot::Footer) => {
                *footer = Some(open.section)
            }
            (_, slot) => {
                return Err(TemplateError::UnknownSectionElement {
                    element: format!("{slot:?}"),
                    template: self.identifier.clone(),
                })
            }
        }
        Ok(())
    }

    fn end_sections(&mut self) -> Result<(), TemplateError> {
        if let Capture::Section(open) = mem::replace(&mut self.capture, Capture::After) {
            trace!("SECTION -> TEMPLATE after {}", open.section.identifier);
            self.register(open)?;
        }
        Ok(())
    }

    fn visit_variable_set(&mut self, el: &Element) -> Result<(), TemplateError> {
        let name = el
            .attr_value(TEXT_NS, "name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TemplateError::UnnamedVariable {
                template: self.identifier.clone(),
            })?;
        let dotted = name.contains('.');
        let accepted = match &mut self.capture {
            Capture::Section(open) if !dotted => open.section.append_variable(&name),
            Capture::Table(_, table) if !dotted || table_field(&name, &table.name).is_some() => {
                table.append_variable(&name)
            }
            Capture::Row(_, table, row) => match table_field(&name, &table.name) {
                Some(field) => row.append_variable(field),
                None => Err(Refused),
            },
            _ => Err(Refused),
        };
        accepted.map_err(|_| TemplateError::UnexpectedVariable {
            name: name.clone(),
            state: self.capture.state(),
            table: self.capture.table_name(),
            template: self.identifier.clone(),
        })
    }

    fn visit_table(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        let name = el.attr_value(TABLE_NS, "name").unwrap_or_default();
        let open = match mem::replace(&mut self.capture, Capture::Before) {
            Capture::Section(open) => open,
            other => {
                return Err(TemplateError::MisplacedTable {
                    table: name,
                    state: other.state(),
                    template: self.identifier.clone(),
                })
            }
        };
        let table = TableCapture {
            identifier: format!("{}/{name}", open.section.identifier),
            name: name.clone(),
            before: Vec::new(),
            row: None,
            after: Vec::new(),
        };
        trace!("SECTION -> TABLE {}", table.identifier);
        self.capture = Capture::Table(open, table);
        self.write_element(id, el)?;

        match mem::replace(&mut self.capture, Capture::Before) {
            Capture::Table(mut open, table) => {
                let table = table.finish(&self.identifier)?;
                debug!("captured table {}", table.identifier);
                open.section
                    .append_table(&name, table)
                    .map_err(|_| TemplateError::MisplacedTable {
                        table: name.clone(),
                        state: "SECTION",
                        template: self.identifier.clone(),
                    })?;
                self.capture = Capture::Section(open);
                Ok(())
            }
            other => Err(TemplateError::MisplacedTable {
                table: name,
                state: other.state(),
                template: self.identifier.clone(),
            }),
        }
    }

    fn visit_last_row(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        let (open, table) = match mem::replace(&mut self.capture, Capture::Before) {
            Capture::Table(open, table) if table.row.is_none() => (open, table),
            other => {
                return Err(TemplateError::MisplacedRow {
                    state: other.state(),
                    template: self.identifier.clone(),
                })
            }
        };
        trace!("TABLE -> ROW {}", table.identifier);
        let row = Row::new(table.identifier.clone());
        self.capture = Capture::Row(open, table, row);
        self.write_element(id, el)?;

        match mem::replace(&mut self.capture, Capture::Before) {
            Capture::Row(open, mut table, row) => {
                table.row = Some(row);
                self.capture = Capture::Table(open, table);
                Ok(())
            }
            other => Err(TemplateError::MisplacedRow {
                state: other.state(),
                template: self.identifier.clone(),
            }),
        }
    }

    fn visit_image(&mut self, id: NodeId, el: &Element) -> Result<(), TemplateError> {
        if !matches!(self.capture, Capture::Section(_) | Capture::Table(..)) {
            return Err(TemplateError::MisplacedImage {
                state: self.capture.state(),
                template: self.identifier.clone(),
            });
        }
        let incomplete = |what: &'static str| TemplateError::IncompleteImage {
            what,
            template: self.identifier.clone(),
        };
        let frame = self
            .doc
            .parent(id)
            .and_then(|p| self.doc.element(p))
            .filter(|p| p.is(DRAW_NS, "frame"))
            .ok_or_else(|| incomplete("a draw:frame parent"))?;
        let image_name = frame
            .attr_value(DRAW_NS, "name")
            .ok_or_else(|| incomplete("draw:name on its frame"))?;
        let mut buf = Vec::new();
        let closed = write_start_tag(&mut buf, el, !self.doc.children(id).is_empty());
        // Inline images (office:binary-data) have no link to replace.
        let Some(span) = el.attr_value_span(XLINK_NS, "href") else {
            debug!("image {image_name:?} has no xlink:href, kept as is");
            self.literal_bytes(&buf);
            return if closed { Ok(()) } else { self.close_element(id, el) };
        };
        let default_path = &el.raw[span.clone()];
        trace!("IMAGE {image_name:?} (default {default_path:?})");

        // The raw tag starts after `<`.
        let (start, end) = (span.start + 1, span.end + 1);
        self.literal_bytes(&buf[..start]);
        let state = self.capture.state();
        self.target()
            .append_image(&image_name, default_path)
            .map_err(|_| TemplateError::MisplacedImage {
                state,
                template: self.identifier.clone(),
            })?;
        self.literal_bytes(&buf[end..]);
        if closed {
            return Ok(());
        }
        self.close_element(id, el)
    }

    fn finish(mut self) -> Result<XmlTemplate, TemplateError> {
        match mem::replace(&mut self.capture, Capture::After) {
            Capture::Section(open) => self.register(open)?,
            Capture::Before | Capture::After => {}
            other => {
                return Err(TemplateError::MisplacedTable {
                    table: other.table_name().unwrap_or_default(),
                    state: other.state(),
                    template: self.identifier.clone(),
                })
            }
        }
        let body = match self.body {
            BodyBuilder::Book(sections) => TemplateBody::Book(sections),
            BodyBuilder::Report(Some(main)) => TemplateBody::Report(main),
            BodyBuilder::Report(None) => {
                return Err(TemplateError::MissingMainSection {
                    template: self.identifier,
                })
            }
            BodyBuilder::Styles { header, footer } => TemplateBody::Styles { header, footer },
        };
        Ok(XmlTemplate {
            identifier: self.identifier,
            before: self.before,
            body,
            after: self.after,
        })
    }
}
