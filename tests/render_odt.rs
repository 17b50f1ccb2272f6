use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;

use pretty_assertions::assert_eq;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use odt_mill::data::{BookData, DocumentData, FieldValue, ReportData, SectionData};
use odt_mill::error::DataError;
use odt_mill::odt::creator::{create_template, FieldSpec, TableSpec, TemplateSpec};
use odt_mill::odt::package::{CONTENT_XML, MANIFEST_XML, STYLES_XML};
use odt_mill::odt::xml::{unescape_lossy, NodeId, NodeKind, XmlDocument, TEXT_NS};
use odt_mill::odt::{verify_package_roundtrip, OdtPackage, OdtTemplate};
use odt_mill::template::structure::PartKind;
use odt_mill::template::TemplateKind;

const NS: &str = concat!(
    r#"xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" "#,
    r#"xmlns:style="urn:oasis:names:tc:opendocument:xmlns:style:1.0" "#,
    r#"xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" "#,
    r#"xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" "#,
    r#"xmlns:draw="urn:oasis:names:tc:opendocument:xmlns:drawing:1.0" "#,
    r#"xmlns:xlink="http://www.w3.org/1999/xlink""#
);

const MANIFEST: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    "\n",
    r#"<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0" manifest:version="1.2">"#,
    "\n ",
    r#"<manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.oasis.opendocument.text"/>"#,
    "\n ",
    r#"<manifest:file-entry manifest:full-path="content.xml" manifest:media-type="text/xml"/>"#,
    "\n",
    r#"</manifest:manifest>"#
);

fn var(name: &str) -> String {
    format!(r#"<text:variable-set text:name="{name}" office:value-type="string">{name}</text:variable-set>"#)
}

fn content_xml(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<office:document-content {NS} office:version=\"1.2\"><office:body><office:text>{body}</office:text></office:body></office:document-content>"
    )
}

fn styles_xml() -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<office:document-styles {}><office:master-styles>",
            r#"<style:master-page style:name="Standard" style:page-layout-name="pm1">"#,
            "<style:header><text:p>{}</text:p></style:header>",
            "</style:master-page></office:master-styles></office:document-styles>"
        ),
        NS,
        var("company")
    )
}

fn report_body() -> String {
    format!(
        concat!(
            r#"<text:variable-decls><text:variable-decl office:value-type="string" text:name="customer_name"/></text:variable-decls>"#,
            r#"<text:p text:style-name="P1">Customer: {}</text:p>"#,
            r#"<text:p><draw:frame draw:name="logo" svg:width="1cm" xmlns:svg="urn:oasis:names:tc:opendocument:xmlns:svg-compatible:1.0">"#,
            r#"<draw:image xlink:href="Pictures/default.png" xlink:type="simple"/></draw:frame></text:p>"#,
            r#"<table:table table:name="items"><table:table-column table:number-columns-repeated="2"/>"#,
            r#"<table:table-row><table:table-cell><text:p>SKU</text:p></table:table-cell><table:table-cell><text:p>Qty</text:p></table:table-cell></table:table-row>"#,
            r#"<table:table-row><table:table-cell><text:p>{}</text:p></table:table-cell><table:table-cell><text:p>{}</text:p></table:table-cell></table:table-row>"#,
            r#"</table:table><text:p/>"#
        ),
        var("customer_name"),
        var("items.sku"),
        var("items.qty")
    )
}

fn build_odt(content: &str, styles: Option<&str>) -> Vec<u8> {
    let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zout.start_file("mimetype", stored).expect("mimetype");
    zout.write_all(b"application/vnd.oasis.opendocument.text")
        .expect("mimetype");
    zout.start_file(CONTENT_XML, deflated).expect("content");
    zout.write_all(content.as_bytes()).expect("content");
    if let Some(styles) = styles {
        zout.start_file(STYLES_XML, deflated).expect("styles");
        zout.write_all(styles.as_bytes()).expect("styles");
    }
    zout.start_file("Pictures/default.png", stored).expect("picture");
    zout.write_all(b"default-png").expect("picture");
    zout.start_file(MANIFEST_XML, deflated).expect("manifest");
    zout.write_all(MANIFEST.as_bytes()).expect("manifest");
    zout.finish().expect("finish").into_inner()
}

fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).expect("write file");
}

fn part(pkg: &OdtPackage, name: &str) -> String {
    String::from_utf8(pkg.part(name).expect("part").to_vec()).expect("utf8")
}

#[test]
fn report_renders_fields_rows_images_and_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template_path = dir.path().join("invoice.odt");
    write_file(
        &template_path,
        &build_odt(&content_xml(&report_body()), Some(&styles_xml())),
    );
    let image_path = dir.path().join("acme.png");
    write_file(&image_path, b"acme-png");

    let template = OdtTemplate::read_report(&template_path).expect("read template");
    let data: serde_json::Value = serde_json::json!({
        "fields": { "customer_name": "Acme & Sons", "company": "Mill Ltd" },
        "tables": { "items": [ { "sku": "A1", "qty": 2 }, { "sku": "B2", "qty": 5 } ] },
        "images": { "logo": image_path.display().to_string() }
    });
    let data: DocumentData = ReportData::from_json(&data, true).expect("data").into();
    let out_path = dir.path().join("out").join("invoice_filled.odt");
    template.write(&out_path, &data).expect("render");

    let out = OdtPackage::read(&out_path).expect("read output");
    let names: Vec<&str> = out.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "mimetype",
            CONTENT_XML,
            STYLES_XML,
            "Pictures/default.png",
            MANIFEST_XML,
            "Pictures/acme.png"
        ]
    );
    assert_eq!(out.entries[0].compression, CompressionMethod::Stored);

    let content = part(&out, CONTENT_XML);
    assert_eq!(content.matches("Acme &amp; Sons").count(), 1);
    assert!(content.contains("<text:p>A1</text:p></table:table-cell><table:table-cell><text:p>2</text:p>"));
    assert!(content.contains("<text:p>B2</text:p></table:table-cell><table:table-cell><text:p>5</text:p>"));
    assert!(content.contains(r#"<draw:image xlink:href="Pictures/acme.png" xlink:type="simple"/>"#));
    assert!(!content.contains("text:variable-set"));

    let styles = part(&out, STYLES_XML);
    assert!(styles.contains("<style:header><text:p>Mill Ltd</text:p></style:header>"));

    let manifest = part(&out, MANIFEST_XML);
    assert_eq!(
        manifest,
        MANIFEST.replace(
            "\n <manifest:file-entry manifest:full-path=\"/\"",
            "\n <manifest:file-entry manifest:media-type=\"image/png\" manifest:full-path=\"Pictures/acme.png\"/><manifest:file-entry manifest:full-path=\"/\""
        )
    );
    assert_eq!(out.part("Pictures/acme.png").expect("image"), b"acme-png");
    assert_eq!(out.part("Pictures/default.png").expect("image"), b"default-png");
}

#[test]
fn image_with_existing_archive_path_replaces_member() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template_path = dir.path().join("t.odt");
    write_file(&template_path, &build_odt(&content_xml(&report_body()), None));
    let image_dir = dir.path().join("img");
    std::fs::create_dir_all(&image_dir).expect("mkdir");
    let image_path = image_dir.join("default.png");
    write_file(&image_path, b"replacement");

    let template = OdtTemplate::read_report(&template_path).expect("read template");
    let data = SectionData::new()
        .with_field("customer_name", "Acme")
        .with_table("items", Vec::new())
        .with_image("logo", &image_path);
    let bytes = template
        .write_to(Cursor::new(Vec::new()), &ReportData::new(data).into())
        .expect("render")
        .into_inner();

    let out = OdtPackage::from_bytes(&bytes).expect("read output");
    assert_eq!(out.entries.len(), 4);
    assert_eq!(out.part("Pictures/default.png").expect("image"), b"replacement");
    assert_eq!(part(&out, MANIFEST_XML), MANIFEST);
    // Header row stays, no data rows.
    assert_eq!(part(&out, CONTENT_XML).matches("<table:table-row>").count(), 1);
}

#[test]
fn report_missing_field_fails_with_section_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template_path = dir.path().join("t.odt");
    write_file(&template_path, &build_odt(&content_xml(&report_body()), None));
    let template = OdtTemplate::read_report(&template_path).expect("read template");

    let data = ReportData::new(SectionData::new().with_table("items", Vec::new()));
    let err = template
        .write(&dir.path().join("out.odt"), &data.into())
        .expect_err("missing field");
    let data_err = err.downcast_ref::<DataError>().expect("data error");
    match data_err {
        DataError::MissingField { field, section } => {
            assert_eq!(field, "customer_name");
            assert_eq!(section, "t.odt#content.xml#MAIN");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn book_renders_sections_in_data_order() {
    let body = format!(
        concat!(
            r#"<text:p>Title page</text:p>"#,
            r#"<text:h text:outline-level="1">Intro</text:h><text:p>{}</text:p>"#,
            r#"<text:h text:outline-level="1">Summary</text:h><text:p>Total: {}</text:p>"#
        ),
        var("author"),
        var("total")
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let template_path = dir.path().join("book.odt");
    write_file(&template_path, &build_odt(&content_xml(&body), Some(&styles_xml())));
    let template = OdtTemplate::read_book(&template_path).expect("read template");

    let json = serde_json::json!({
        "sections": [
            { "name": "Summary", "fields": { "total": 3 } },
            { "name": "Intro", "fields": { "author": "Ann" } },
            { "name": "Intro", "fields": { "author": "Bob" } }
        ],
        "header": { "fields": { "company": "Books Inc" } }
    });
    let book = BookData::from_json(&json).expect("data");
    let bytes = template
        .write_to(Cursor::new(Vec::new()), &book.into())
        .expect("render")
        .into_inner();
    let out = OdtPackage::from_bytes(&bytes).expect("read output");
    let content = part(&out, CONTENT_XML);
    let summary = content.find("Total: 3").expect("summary");
    let ann = content.find("<text:p>Ann</text:p>").expect("ann");
    let bob = content.find("<text:p>Bob</text:p>").expect("bob");
    assert!(summary < ann && ann < bob);
    assert!(content.contains("<office:text><text:p>Title page</text:p>"));
    assert!(part(&out, STYLES_XML).contains("Books Inc"));

    let mut unknown = BookData::new();
    unknown.add_section("Conclusion", SectionData::new());
    let err = template
        .write_to(Cursor::new(Vec::new()), &unknown.into())
        .expect_err("unknown section");
    assert!(format!("{err:#}").contains("Conclusion"));
}

#[test]
fn structure_lists_content_and_styles_variables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template_path = dir.path().join("t.odt");
    write_file(
        &template_path,
        &build_odt(&content_xml(&report_body()), Some(&styles_xml())),
    );
    let template = OdtTemplate::read_report(&template_path).expect("read template");
    let structure = template.structure();
    let vars: Vec<(PartKind, &str)> = structure
        .variables
        .iter()
        .map(|e| (e.part, e.variable.as_str()))
        .collect();
    assert_eq!(
        vars,
        vec![
            (PartKind::Content, "customer_name"),
            (PartKind::Content, "items.sku"),
            (PartKind::Content, "items.qty"),
            (PartKind::Styles, "company"),
        ]
    );
    assert_eq!(structure.images.len(), 1);
    assert_eq!(structure.images[0].default_path, "Pictures/default.png");
}

/// Elements, attributes and merged text runs, with `text:variable-set` wrappers dissolved.
fn flatten(doc: &XmlDocument, id: NodeId, out: &mut Vec<String>) {
    for c in doc.children(id) {
        match &doc.node(*c).kind {
            NodeKind::Element(el) if el.is(TEXT_NS, "variable-set") => flatten(doc, *c, out),
            NodeKind::Element(el) => {
                out.push(format!("<{}", el.name));
                for a in &el.attrs {
                    out.push(format!("@{}={}", a.name, a.value()));
                }
                flatten(doc, *c, out);
                out.push(format!("</{}", el.name));
            }
            NodeKind::Text(raw) => match out.last_mut() {
                Some(last) if last.starts_with('#') => last.push_str(&unescape_lossy(raw)),
                _ => out.push(format!("#{}", unescape_lossy(raw))),
            },
            other => out.push(format!("{other:?}")),
        }
    }
}

fn flat_tree(xml: &[u8]) -> Vec<String> {
    let doc = XmlDocument::parse(CONTENT_XML, xml).expect("parse");
    let mut out = Vec::new();
    flatten(&doc, XmlDocument::ROOT, &mut out);
    out
}

#[test]
fn rendering_variable_names_reproduces_the_source_tree() {
    let source = content_xml(&report_body());
    let pkg = OdtPackage::from_bytes(&build_odt(&source, None)).expect("read");
    let template = OdtTemplate::from_package("t.odt", pkg, TemplateKind::Report).expect("template");

    let data = SectionData::new()
        .with_field("customer_name", "customer_name")
        .with_table(
            "items",
            vec![[("sku", "items.sku"), ("qty", "items.qty")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), FieldValue::from(v)))
                .collect()],
        );
    let out = template
        .write_to(Cursor::new(Vec::new()), &ReportData::new(data).into())
        .expect("render")
        .into_inner();
    let out = OdtPackage::from_bytes(&out).expect("reread");
    let rendered = out.part(CONTENT_XML).expect("content");

    assert_eq!(flat_tree(rendered), flat_tree(source.as_bytes()));
    let mut unwrapped = source.clone();
    for name in ["customer_name", "items.sku", "items.qty"] {
        unwrapped = unwrapped.replace(&var(name), name);
    }
    assert_eq!(String::from_utf8(rendered.to_vec()).expect("utf8"), unwrapped);
}

#[test]
fn unmodified_parts_round_trip_byte_identical() {
    let odt = build_odt(&content_xml(&report_body()), Some(&styles_xml()));
    let pkg = OdtPackage::from_bytes(&odt).expect("read");
    let digests = verify_package_roundtrip(&pkg).expect("roundtrip");
    assert_eq!(digests.len(), 2);

    let copy = pkg
        .write_to(Cursor::new(Vec::new()), &HashMap::new(), &[])
        .expect("write")
        .into_inner();
    let copy = OdtPackage::from_bytes(&copy).expect("reread");
    assert_eq!(part(&copy, CONTENT_XML), content_xml(&report_body()));
}

#[test]
fn created_template_renders() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plain = dir.path().join("plain.odt");
    write_file(
        &plain,
        &build_odt(&content_xml("<text:p>Hello</text:p>"), None),
    );
    let created = dir.path().join("created.odt");
    let spec = TemplateSpec {
        fields: vec![FieldSpec {
            name: "name".to_string(),
            label: Some("Name".to_string()),
        }],
        tables: vec![TableSpec {
            name: "lines".to_string(),
            columns: vec![FieldSpec {
                name: "text".to_string(),
                label: None,
            }],
        }],
    };
    create_template(&plain, &created, &spec).expect("create");

    let template = OdtTemplate::read_report(&created).expect("read created");
    let json = serde_json::json!({
        "fields": { "name": "Zoe" },
        "tables": { "lines": [ { "text": "one" }, { "text": "two" } ] }
    });
    let data = ReportData::from_json(&json, true).expect("data");
    let bytes = template
        .write_to(Cursor::new(Vec::new()), &data.into())
        .expect("render")
        .into_inner();
    let content = part(&OdtPackage::from_bytes(&bytes).expect("read"), CONTENT_XML);
    assert!(content.contains("<text:p>Hello</text:p>"));
    assert!(content.contains("Name: Zoe</text:p>"));
    assert!(content.contains("<text:p>one</text:p>"));
    assert!(content.contains("<text:p>two</text:p>"));
}
