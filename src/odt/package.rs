use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTENT_XML: &str = "content.xml";
pub const STYLES_XML: &str = "styles.xml";
pub const MANIFEST_XML: &str = "META-INF/manifest.xml";

/// An ODT zip container held in memory, member order preserved.
#[derive(Clone, Debug, Default)]
pub struct OdtPackage {
    pub entries: Vec<OdtEntry>,
}

#[derive(Clone, Debug)]
pub struct OdtEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

/// A member that does not exist in the source archive yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl OdtPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open odt: {}", path.display()))?;
        Self::from_reader(f).with_context(|| format!("read odt: {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).context("read zip")?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {}", file.name()))?;
            entries.push(OdtEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, name: &str) -> Option<&OdtEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn part(&self, name: &str) -> anyhow::Result<&[u8]> {
        self.entry(name)
            .map(|e| e.data.as_slice())
            .ok_or_else(|| anyhow!("missing {name} in odt package"))
    }

    /// Copies every member, swapping in `replacements` by name, then appends `added`.
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
        added: &[NewEntry],
    ) -> anyhow::Result<W> {
        let mut zout = ZipWriter::new(writer);
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        for ent in added {
            let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zout.start_file(&ent.name, opts)
                .with_context(|| format!("start zip file: {}", ent.name))?;
            zout.write_all(&ent.data)
                .with_context(|| format!("write zip file: {}", ent.name))?;
        }
        zout.finish().context("finish zip")
    }

    pub fn write_with_replacements(
        &self,
        output_path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
        added: &[NewEntry],
    ) -> anyhow::Result<()> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir: {}", parent.display()))?;
        }
        let f = File::create(output_path)
            .with_context(|| format!("create output odt: {}", output_path.display()))?;
        self.write_to(f, replacements, added)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zout.start_file("mimetype", stored).expect("start");
        zout.write_all(b"application/vnd.oasis.opendocument.text")
            .expect("write");
        zout.add_directory("Pictures/", stored).expect("dir");
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zout.start_file(CONTENT_XML, deflated).expect("start");
        zout.write_all(b"<a/>").expect("write");
        zout.finish().expect("finish").into_inner()
    }

    #[test]
    fn rewrites_members_in_order() {
        let pkg = OdtPackage::from_bytes(&sample()).expect("read");
        assert_eq!(pkg.part(CONTENT_XML).expect("content"), b"<a/>");
        assert!(pkg.part(STYLES_XML).is_err());

        let mut repl = HashMap::new();
        repl.insert(CONTENT_XML.to_string(), b"<b/>".to_vec());
        let added = vec![NewEntry {
            name: "Pictures/x.png".to_string(),
            data: vec![1, 2, 3],
        }];
        let out = pkg
            .write_to(Cursor::new(Vec::new()), &repl, &added)
            .expect("write")
            .into_inner();

        let copy = OdtPackage::from_bytes(&out).expect("reread");
        let names: Vec<&str> = copy.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["mimetype", "Pictures/", CONTENT_XML, "Pictures/x.png"]);
        assert_eq!(copy.entries[0].compression, CompressionMethod::Stored);
        assert!(copy.entries[1].is_dir);
        assert_eq!(copy.part(CONTENT_XML).expect("content"), b"<b/>");
        assert_eq!(copy.part("Pictures/x.png").expect("image"), &[1, 2, 3]);
    }
}
