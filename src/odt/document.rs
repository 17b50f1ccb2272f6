use std::collections::HashMap;
use std::io::{Seek, Write};
use std::path::Path;

use anyhow::Context;
use log::{debug, info};

use crate::data::DocumentData;
use crate::odt::creator::file_label;
use crate::odt::manifest::add_file_entries;
use crate::odt::package::{NewEntry, OdtPackage, CONTENT_XML, MANIFEST_XML, STYLES_XML};
use crate::odt::xml::XmlDocument;
use crate::template::structure::{PartKind, StructureJson};
use crate::template::{read_template, ImageStage, TemplateKind, XmlTemplate};

pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/png";

/// A template ODT: the source package plus the templates built from its XML parts.
///
/// Built once, rendered any number of times. Rendering never mutates the template.
#[derive(Clone, Debug)]
pub struct OdtTemplate {
    pub name: String,
    package: OdtPackage,
    content: XmlTemplate,
    styles: Option<XmlTemplate>,
    image_media_type: String,
}

impl OdtTemplate {
    pub fn read_report(path: &Path) -> anyhow::Result<Self> {
        Self::read(path, TemplateKind::Report)
    }

    pub fn read_book(path: &Path) -> anyhow::Result<Self> {
        Self::read(path, TemplateKind::Book)
    }

    pub fn read(path: &Path, kind: TemplateKind) -> anyhow::Result<Self> {
        let package = OdtPackage::read(path)?;
        Self::from_package(&file_label(path), package, kind)
            .with_context(|| format!("read template: {}", path.display()))
    }

    /// `kind` selects how `content.xml` is split: `Report` or `Book`.
    pub fn from_package(name: &str, package: OdtPackage, kind: TemplateKind) -> anyhow::Result<Self> {
        anyhow::ensure!(
            kind != TemplateKind::Styles,
            "content.xml cannot be read as a styles template"
        );
        let content_id = format!("{name}#{CONTENT_XML}");
        let doc = XmlDocument::parse(&content_id, package.part(CONTENT_XML)?)?;
        let content = read_template(&doc, &content_id, kind)?;
        info!(
            "{content_id}: {} {} section(s)",
            content.sections().len(),
            kind.as_str()
        );

        let styles = match package.entry(STYLES_XML) {
            Some(entry) => {
                let styles_id = format!("{name}#{STYLES_XML}");
                let doc = XmlDocument::parse(&styles_id, &entry.data)?;
                let styles = read_template(&doc, &styles_id, TemplateKind::Styles)?;
                debug!("{styles_id}: {} section(s)", styles.sections().len());
                Some(styles)
            }
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            package,
            content,
            styles,
            image_media_type: DEFAULT_IMAGE_MEDIA_TYPE.to_string(),
        })
    }

    pub fn with_image_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.image_media_type = media_type.into();
        self
    }

    pub fn kind(&self) -> TemplateKind {
        self.content.kind()
    }

    pub fn content(&self) -> &XmlTemplate {
        &self.content
    }

    pub fn styles(&self) -> Option<&XmlTemplate> {
        self.styles.as_ref()
    }

    /// Renders `data` into a new ODT at `output`.
    pub fn write(&self, output: &Path, data: &DocumentData) -> anyhow::Result<()> {
        let (replacements, added) = self.render_parts(data)?;
        self.package
            .write_with_replacements(output, &replacements, &added)
            .with_context(|| format!("write odt: {}", output.display()))
    }

    /// Same as [`OdtTemplate::write`] but into any seekable writer.
    pub fn write_to<W: Write + Seek>(&self, writer: W, data: &DocumentData) -> anyhow::Result<W> {
        let (replacements, added) = self.render_parts(data)?;
        self.package.write_to(writer, &replacements, &added)
    }

    fn render_parts(
        &self,
        data: &DocumentData,
    ) -> anyhow::Result<(HashMap<String, Vec<u8>>, Vec<NewEntry>)> {
        let mut images = ImageStage::new();
        let mut replacements = HashMap::new();

        let mut content = Vec::new();
        self.content.write(&mut content, data, &mut images)?;
        replacements.insert(CONTENT_XML.to_string(), content);

        if let Some(styles) = &self.styles {
            let mut out = Vec::new();
            styles.write(&mut out, data, &mut images)?;
            replacements.insert(STYLES_XML.to_string(), out);
        }

        let mut added = Vec::new();
        for staged in images.staged() {
            let bytes = std::fs::read(&staged.source)
                .with_context(|| format!("read image: {}", staged.source.display()))?;
            if self.package.contains(&staged.archive_path) {
                debug!("replacing {} in {}", staged.archive_path, self.name);
                replacements.insert(staged.archive_path.clone(), bytes);
            } else {
                added.push(NewEntry {
                    name: staged.archive_path.clone(),
                    data: bytes,
                });
            }
        }

        if !added.is_empty() {
            let paths: Vec<String> = added.iter().map(|e| e.name.clone()).collect();
            let manifest = add_file_entries(
                self.package.part(MANIFEST_XML)?,
                &paths,
                &self.image_media_type,
            )
            .context("patch manifest")?;
            replacements.insert(MANIFEST_XML.to_string(), manifest);
        }
        Ok((replacements, added))
    }

    /// Every variable and image the template needs, grouped by part and section.
    pub fn structure(&self) -> StructureJson {
        let mut out = StructureJson::new(self.name.clone(), self.kind().as_str());
        out.add_part(PartKind::Content, &self.content);
        if let Some(styles) = &self.styles {
            out.add_part(PartKind::Styles, styles);
        }
        out
    }
}

/// Parses and re-serializes `content.xml` and `styles.xml` without templating, failing if any
/// byte changes. Returns `(part, sha256)` pairs.
pub fn verify_package_roundtrip(package: &OdtPackage) -> anyhow::Result<Vec<(String, String)>> {
    let mut digests = Vec::new();
    for name in [CONTENT_XML, STYLES_XML] {
        if let Some(entry) = package.entry(name) {
            let digest = crate::odt::xml::verify_roundtrip(name, &entry.data)?;
            digests.push((name.to_string(), digest));
        }
    }
    Ok(digests)
}
