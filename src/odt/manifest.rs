use anyhow::anyhow;
use once_cell::sync::Lazy;
use quick_xml::escape::escape;
use regex::Regex;

static FILE_ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:([A-Za-z_][\w.-]*):)?file-entry[\s/>]").expect("file-entry regex")
});
static MANIFEST_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"</(?:([A-Za-z_][\w.-]*):)?manifest\s*>").expect("manifest end regex")
});

/// Inserts one `file-entry` per path before the first existing entry. Existing entries are
/// left byte-for-byte untouched.
pub fn add_file_entries(
    manifest: &[u8],
    paths: &[String],
    media_type: &str,
) -> anyhow::Result<Vec<u8>> {
    if paths.is_empty() {
        return Ok(manifest.to_vec());
    }
    let text = std::str::from_utf8(manifest).map_err(|e| anyhow!("manifest is not utf-8: {e}"))?;
    let caps = FILE_ENTRY_RE
        .captures(text)
        .or_else(|| MANIFEST_END_RE.captures(text))
        .ok_or_else(|| anyhow!("manifest has no file-entry or closing manifest element"))?;
    let at = caps.get(0).map(|m| m.start()).unwrap_or_default();
    let prefix = caps
        .get(1)
        .map(|p| format!("{}:", p.as_str()))
        .unwrap_or_default();

    let mut inserted = String::new();
    for path in paths {
        inserted.push_str(&format!(
            r#"<{prefix}file-entry {prefix}media-type="{}" {prefix}full-path="{}"/>"#,
            escape(media_type),
            escape(path.as_str())
        ));
    }
    let mut out = String::with_capacity(text.len() + inserted.len());
    out.push_str(&text[..at]);
    out.push_str(&inserted);
    out.push_str(&text[at..]);
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        "\n",
        r#"<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0" manifest:version="1.2">"#,
        "\n ",
        r#"<manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.oasis.opendocument.text"/>"#,
        "\n",
        r#"</manifest:manifest>"#
    );

    #[test]
    fn inserts_before_first_entry() {
        let out = add_file_entries(
            MANIFEST.as_bytes(),
            &["Pictures/a.png".to_string(), "Pictures/b.png".to_string()],
            "image/png",
        )
        .expect("patch");
        let out = String::from_utf8(out).expect("utf8");
        let expected = MANIFEST.replace(
            "\n <manifest:file-entry manifest:full-path=\"/\"",
            concat!(
                "\n ",
                r#"<manifest:file-entry manifest:media-type="image/png" manifest:full-path="Pictures/a.png"/>"#,
                r#"<manifest:file-entry manifest:media-type="image/png" manifest:full-path="Pictures/b.png"/>"#,
                r#"<manifest:file-entry manifest:full-path="/""#
            ),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn unchanged_without_paths() {
        let out = add_file_entries(MANIFEST.as_bytes(), &[], "image/png").expect("patch");
        assert_eq!(out, MANIFEST.as_bytes());
    }

    #[test]
    fn falls_back_to_closing_tag() {
        let manifest = r#"<m:manifest xmlns:m="urn:x"></m:manifest>"#;
        let out = add_file_entries(manifest.as_bytes(), &["Pictures/a&b.png".to_string()], "image/png")
            .expect("patch");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            r#"<m:manifest xmlns:m="urn:x"><m:file-entry m:media-type="image/png" m:full-path="Pictures/a&amp;b.png"/></m:manifest>"#
        );
    }
}
