use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::template::model::XmlTemplate;

/// Which package part a template came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Content,
    Styles,
}

/// One variable the template needs at replay time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureEntry {
    pub part: PartKind,
    pub section: String,
    pub variable: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub part: PartKind,
    pub section: String,
    pub image: String,
    pub default_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureJson {
    pub version: u32,
    pub template: String,
    pub kind: String,
    pub variables: Vec<StructureEntry>,
    pub images: Vec<ImageEntry>,
}

impl StructureJson {
    pub fn new(template: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            version: 1,
            template: template.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Appends every variable and image of `template`, sections in document order.
    pub fn add_part(&mut self, part: PartKind, template: &XmlTemplate) {
        for (section, body) in template.sections() {
            self.variables
                .extend(body.variables().into_iter().map(|variable| StructureEntry {
                    part,
                    section: section.to_string(),
                    variable,
                }));
            self.images
                .extend(body.images().into_iter().map(|(image, default_path)| ImageEntry {
                    part,
                    section: section.to_string(),
                    image,
                    default_path,
                }));
        }
    }

    pub fn to_json(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("serialize structure json")
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("write structure json: {}", path.display()))
    }
}
