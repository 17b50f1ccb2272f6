use std::collections::HashSet;

use crate::odt::xml::{NodeId, XmlDocument, TABLE_NS, TEXT_NS};

/// Data tables (repeatable) and their final rows, by arena index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableClasses {
    pub tables: HashSet<NodeId>,
    pub last_rows: HashSet<NodeId>,
}

impl TableClasses {
    pub fn is_data_table(&self, id: NodeId) -> bool {
        self.tables.contains(&id)
    }

    pub fn is_last_row(&self, id: NodeId) -> bool {
        self.last_rows.contains(&id)
    }
}

/// Marks every `table:table` whose last own row declares `<tableName>.<field>` variables.
pub fn classify_tables(doc: &XmlDocument) -> TableClasses {
    let mut out = TableClasses::default();
    for table in doc.elements_named(XmlDocument::ROOT, TABLE_NS, "table") {
        let Some(name) = doc
            .element(table)
            .and_then(|el| el.attr_value(TABLE_NS, "name"))
        else {
            continue;
        };
        let Some(last_row) = doc
            .elements_named(table, TABLE_NS, "table-row")
            .into_iter()
            .rev()
            .find(|row| enclosing_table(doc, *row) == Some(table))
        else {
            continue;
        };
        let has_table_vars = doc
            .elements_named(last_row, TEXT_NS, "variable-set")
            .into_iter()
            .filter_map(|v| doc.element(v).and_then(|el| el.attr_value(TEXT_NS, "name")))
            .any(|var| table_field(&var, &name).is_some());
        if has_table_vars {
            out.tables.insert(table);
            out.last_rows.insert(last_row);
        }
    }
    out
}

fn enclosing_table(doc: &XmlDocument, id: NodeId) -> Option<NodeId> {
    let mut cur = doc.parent(id);
    while let Some(p) = cur {
        if doc.is_element(p, TABLE_NS, "table") {
            return Some(p);
        }
        cur = doc.parent(p);
    }
    None
}

/// The field part of `<table>.<field>`. Table names may contain dots themselves.
pub fn table_field<'a>(name: &'a str, table: &str) -> Option<&'a str> {
    name.strip_prefix(table)?.strip_prefix('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = r#"xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0""#;

    fn parse(body: &str) -> XmlDocument {
        let xml = format!("<doc {NS}>{body}</doc>");
        XmlDocument::parse("content.xml", xml.as_bytes()).expect("parse")
    }

    fn var(name: &str) -> String {
        format!(r#"<text:p><text:variable-set text:name="{name}">x</text:variable-set></text:p>"#)
    }

    #[test]
    fn marks_table_whose_last_row_has_prefixed_vars() {
        let body = format!(
            r#"<table:table table:name="items"><table:table-header-rows><table:table-row><table:table-cell/></table:table-row></table:table-header-rows><table:table-row><table:table-cell>{}</table:table-cell></table:table-row></table:table>"#,
            var("items.sku")
        );
        let doc = parse(&body);
        let classes = classify_tables(&doc);
        assert_eq!(classes.tables.len(), 1);
        assert_eq!(classes.last_rows.len(), 1);
        let row = *classes.last_rows.iter().next().expect("row");
        assert!(doc.is_element(row, TABLE_NS, "table-row"));
        assert_eq!(classify_tables(&doc), classes);
    }

    #[test]
    fn ignores_decorative_tables() {
        let body = format!(
            r#"<table:table table:name="deco"><table:table-row><table:table-cell>{}</table:table-cell></table:table-row></table:table><table:table table:name="other"><table:table-row><table:table-cell>{}</table:table-cell></table:table-row><table:table-row/></table:table>"#,
            var("customer_name"),
            var("other.x")
        );
        let classes = classify_tables(&parse(&body));
        assert!(classes.tables.is_empty());
        assert!(classes.last_rows.is_empty());
    }

    #[test]
    fn nested_table_rows_do_not_count() {
        let body = format!(
            r#"<table:table table:name="outer"><table:table-row><table:table-cell>{}</table:table-cell></table:table-row><table:table-row><table:table-cell><table:table table:name="inner"><table:table-row><table:table-cell>{}</table:table-cell></table:table-row></table:table></table:table-cell></table:table-row></table:table>"#,
            var("outer.a"),
            var("inner.b")
        );
        let doc = parse(&body);
        let classes = classify_tables(&doc);
        let names: Vec<String> = classes
            .tables
            .iter()
            .filter_map(|t| doc.element(*t).and_then(|el| el.attr_value(TABLE_NS, "name")))
            .collect();
        assert_eq!(names, vec!["inner".to_string()]);
    }

    #[test]
    fn strips_table_prefix() {
        assert_eq!(table_field("items.sku", "items"), Some("sku"));
        assert_eq!(table_field("q1.items.sku", "q1.items"), Some("sku"));
        assert_eq!(table_field("q1.items.sku", "q1"), Some("items.sku"));
        assert_eq!(table_field("itemsx.sku", "items"), None);
        assert_eq!(table_field("customer_name", "items"), None);
    }

    #[test]
    fn marks_table_with_dotted_name() {
        let body = format!(
            r#"<table:table table:name="q1.items"><table:table-row><table:table-cell>{}</table:table-cell></table:table-row></table:table>"#,
            var("q1.items.sku")
        );
        let classes = classify_tables(&parse(&body));
        assert_eq!(classes.tables.len(), 1);
    }
}
