use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::LevelFilter;
use serde::Deserialize;

use crate::odt::document::DEFAULT_IMAGE_MEDIA_TYPE;
use crate::template::TemplateKind;

pub const CONFIG_FILENAME: &str = "odt-mill.toml";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RenderSection {
    /// How `content.xml` is split: "report" (one main section) or "book" (level-1 headings).
    #[serde(default)]
    pub mode: Option<String>,

    /// Manifest media type for images added to the output archive.
    #[serde(default)]
    pub image_media_type: Option<String>,

    /// Report data without explicit `header` / `footer` objects reuses the main data for them.
    #[serde(default)]
    pub header_footer_from_main: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LoggingSection {
    /// off | error | warn | info | debug | trace
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Report,
    Book,
}

impl RenderMode {
    pub fn parse(s: Option<&str>) -> anyhow::Result<Self> {
        match s.unwrap_or("report").trim().to_ascii_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "book" => Ok(Self::Book),
            other => Err(anyhow!("unknown render mode {other:?} (expected report or book)")),
        }
    }

    pub fn template_kind(self) -> TemplateKind {
        match self {
            Self::Report => TemplateKind::Report,
            Self::Book => TemplateKind::Book,
        }
    }
}

impl AppConfig {
    pub fn mode(&self) -> anyhow::Result<RenderMode> {
        RenderMode::parse(self.render.mode.as_deref())
    }

    pub fn image_media_type(&self) -> &str {
        self.render
            .image_media_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE)
    }

    pub fn header_footer_from_main(&self) -> bool {
        self.render.header_footer_from_main.unwrap_or(true)
    }

    pub fn log_level(&self) -> anyhow::Result<LevelFilter> {
        let level = self.logging.level.as_deref().unwrap_or("info").trim();
        level
            .parse::<LevelFilter>()
            .map_err(|_| anyhow!("unknown log level {level:?}"))
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    cfg.mode()?;
    cfg.log_level()?;
    Ok(cfg)
}

pub const DEFAULT_CONFIG_TOML: &str = r#"[render]
# "report": the whole body is one section, starting at text:variable-decls.
# "book": every level-1 heading starts a named section.
mode = "report"
image_media_type = "image/png"
header_footer_from_main = true

[logging]
# off | error | warn | info | debug | trace
level = "info"
"#;

/// Writes the default config into `dir`. An existing file is kept unless `force` is set.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Err(anyhow!(
            "config already exists: {} (use --force to overwrite)",
            cfg_path.display()
        ));
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
