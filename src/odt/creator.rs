//! Adds template fields and tables to a plain ODT document.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::odt::package::{OdtPackage, CONTENT_XML};
use crate::odt::xml::{NodeId, XmlDocument, OFFICE_NS, TABLE_NS, TEXT_NS};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Shown before the placeholder; defaults to the name.
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<FieldSpec>,
}

impl FieldSpec {
    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

impl TemplateSpec {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read template spec: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse template spec json: {}", path.display()))
    }
}

/// Qualified names for the prefixes the document actually binds.
struct Names {
    text: String,
    table: String,
    office: String,
}

impl Names {
    fn of(doc: &XmlDocument) -> Self {
        let prefix = |ns: &str, fallback: &str| doc.prefix_for(ns).unwrap_or_else(|| fallback.to_string());
        Self {
            text: prefix(TEXT_NS, "text"),
            table: prefix(TABLE_NS, "table"),
            office: prefix(OFFICE_NS, "office"),
        }
    }

    fn text(&self, local: &str) -> String {
        format!("{}:{local}", self.text)
    }

    fn table(&self, local: &str) -> String {
        format!("{}:{local}", self.table)
    }

    fn office(&self, local: &str) -> String {
        format!("{}:{local}", self.office)
    }
}

/// Appends the fields and tables of `spec` to a parsed `content.xml`.
pub fn add_template_fields(doc: &mut XmlDocument, spec: &TemplateSpec) -> Result<(), TemplateError> {
    let template = doc.name.clone();
    let office_text = one_element(doc, OFFICE_NS, "text", &template)?;
    let names = Names::of(doc);
    let decls = variable_decls(doc, office_text, &names, &template)?;

    let value_type = names.office("value-type");

    for field in &spec.fields {
        let p = doc.append_element(
            office_text,
            &names.text("p"),
            Some(TEXT_NS),
            &[(names.text("style-name").as_str(), "Standard")],
        );
        doc.append_text(p, &format!("{}: ", field.label()));
        append_variable(doc, p, decls, &names, &field.name);
    }

    for table in &spec.tables {
        debug!("creating table {:?} with {} column(s)", table.name, table.columns.len());
        let caption = doc.append_element(office_text, &names.text("p"), Some(TEXT_NS), &[]);
        doc.append_text(caption, &format!("{}:", table.name));

        let t = doc.append_element(
            office_text,
            &names.table("table"),
            Some(TABLE_NS),
            &[(names.table("name").as_str(), table.name.as_str())],
        );
        let count = table.columns.len().to_string();
        doc.append_element(
            t,
            &names.table("table-column"),
            Some(TABLE_NS),
            &[(names.table("number-columns-repeated").as_str(), count.as_str())],
        );
        doc.append_element(office_text, &names.text("p"), Some(TEXT_NS), &[]);

        let label_row = doc.append_element(t, &names.table("table-row"), Some(TABLE_NS), &[]);
        let value_row = doc.append_element(t, &names.table("table-row"), Some(TABLE_NS), &[]);
        for column in &table.columns {
            let cell = doc.append_element(
                label_row,
                &names.table("table-cell"),
                Some(TABLE_NS),
                &[(value_type.as_str(), "string")],
            );
            let p = doc.append_element(cell, &names.text("p"), Some(TEXT_NS), &[]);
            doc.append_text(p, column.label());

            let cell = doc.append_element(
                value_row,
                &names.table("table-cell"),
                Some(TABLE_NS),
                &[(value_type.as_str(), "string")],
            );
            let p = doc.append_element(cell, &names.text("p"), Some(TEXT_NS), &[]);
            append_variable(doc, p, decls, &names, &format!("{}.{}", table.name, column.name));
        }
    }
    Ok(())
}

fn append_variable(doc: &mut XmlDocument, parent: NodeId, decls: NodeId, names: &Names, name: &str) {
    let value_type = names.office("value-type");
    let text_name = names.text("name");
    let v = doc.append_element(
        parent,
        &names.text("variable-set"),
        Some(TEXT_NS),
        &[(text_name.as_str(), name), (value_type.as_str(), "string")],
    );
    doc.append_text(v, name);
    doc.append_element(
        decls,
        &names.text("variable-decl"),
        Some(TEXT_NS),
        &[(value_type.as_str(), "string"), (text_name.as_str(), name)],
    );
}

fn one_element(doc: &XmlDocument, ns: &str, local: &str, template: &str) -> Result<NodeId, TemplateError> {
    let found = doc.elements_named(XmlDocument::ROOT, ns, local);
    match found.as_slice() {
        [one] => Ok(*one),
        [] => Err(TemplateError::MissingElement {
            element: local_label(ns, local),
            template: template.to_string(),
        }),
        _ => Err(TemplateError::MultipleElements {
            element: local_label(ns, local),
            template: template.to_string(),
        }),
    }
}

fn local_label(ns: &str, local: &str) -> String {
    if ns == OFFICE_NS {
        format!("office:{local}")
    } else if ns == TEXT_NS {
        format!("text:{local}")
    } else {
        format!("{{{ns}}}{local}")
    }
}

/// The existing `text:variable-decls`, or a new one as the first child of `office:text`.
fn variable_decls(
    doc: &mut XmlDocument,
    office_text: NodeId,
    names: &Names,
    template: &str,
) -> Result<NodeId, TemplateError> {
    let found = doc.elements_named(XmlDocument::ROOT, TEXT_NS, "variable-decls");
    match found.as_slice() {
        [one] => Ok(*one),
        [] => Ok(doc.insert_element(office_text, 0, &names.text("variable-decls"), Some(TEXT_NS), &[])),
        _ => Err(TemplateError::MultipleElements {
            element: "text:variable-decls".to_string(),
            template: template.to_string(),
        }),
    }
}

/// Reads `input`, adds the template fields, writes `output`. Other members are copied as-is.
pub fn create_template(input: &Path, output: &Path, spec: &TemplateSpec) -> anyhow::Result<()> {
    let package = OdtPackage::read(input)?;
    let identifier = format!("{}#{CONTENT_XML}", file_label(input));
    let mut doc = XmlDocument::parse(&identifier, package.part(CONTENT_XML)?)?;
    add_template_fields(&mut doc, spec)?;

    let mut replacements = HashMap::new();
    replacements.insert(CONTENT_XML.to_string(), doc.to_bytes());
    package.write_with_replacements(output, &replacements, &[])
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{read_template, TemplateKind};

    const CONTENT: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" "#,
        r#"xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" "#,
        r#"xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0">"#,
        r#"<office:body><office:text><text:p>Dear customer,</text:p></office:text></office:body>"#,
        r#"</office:document-content>"#
    );

    fn spec() -> TemplateSpec {
        serde_json::from_str(
            r#"{
                "fields": [{ "name": "customer_name", "label": "Customer" }],
                "tables": [{ "name": "items", "columns": [
                    { "name": "sku", "label": "SKU" },
                    { "name": "qty" }
                ]}]
            }"#,
        )
        .expect("spec json")
    }

    #[test]
    fn created_template_reads_back_as_report() {
        let mut doc = XmlDocument::parse("c.odt#content.xml", CONTENT.as_bytes()).expect("parse");
        add_template_fields(&mut doc, &spec()).expect("create");
        let xml = doc.to_bytes();
        let text = String::from_utf8(xml.clone()).expect("utf8");
        assert!(text.contains("<office:text><text:variable-decls><text:variable-decl"));
        assert!(text.contains(r#"<text:p text:style-name="Standard">Customer: <text:variable-set text:name="customer_name" office:value-type="string">customer_name</text:variable-set></text:p>"#));
        assert!(text.contains(r#"<table:table-column table:number-columns-repeated="2"/>"#));
        assert!(text.contains("<text:p>qty</text:p>"));

        let reparsed = XmlDocument::parse("c.odt#content.xml", &xml).expect("reparse");
        let template = read_template(&reparsed, "c.odt#content.xml", TemplateKind::Report).expect("template");
        let main = template.section("MAIN").expect("main");
        assert_eq!(main.variables(), vec!["customer_name", "items.sku", "items.qty"]);
    }

    #[test]
    fn missing_office_text_is_an_error() {
        let xml = r#"<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0"/>"#;
        let mut doc = XmlDocument::parse("c.xml", xml.as_bytes()).expect("parse");
        let err = add_template_fields(&mut doc, &spec()).expect_err("no office:text");
        assert!(matches!(err, TemplateError::MissingElement { .. }));
    }

    #[test]
    fn reuses_existing_decls() {
        let xml = CONTENT.replace(
            "<office:text>",
            "<office:text><text:variable-decls><text:variable-decl office:value-type=\"string\" text:name=\"old\"/></text:variable-decls>",
        );
        let mut doc = XmlDocument::parse("c.xml", xml.as_bytes()).expect("parse");
        add_template_fields(&mut doc, &TemplateSpec {
            fields: vec![FieldSpec { name: "new".to_string(), label: None }],
            tables: Vec::new(),
        })
        .expect("create");
        let text = String::from_utf8(doc.to_bytes()).expect("utf8");
        assert_eq!(text.matches("<text:variable-decls>").count(), 1);
        assert!(text.contains(r#"text:name="old"/><text:variable-decl office:value-type="string" text:name="new"/></text:variable-decls>"#));
        assert!(text.contains("new: <text:variable-set"));
    }
}
