use anyhow::{anyhow, Context};
use quick_xml::escape::unescape;
use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

pub const TEXT_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:text:1.0";
pub const DRAW_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:drawing:1.0";
pub const TABLE_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:table:1.0";
pub const STYLE_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:style:1.0";
pub const OFFICE_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:office:1.0";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Index of a node in [`XmlDocument`]'s arena. Assigned in document order while parsing.
pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub local: String,
    pub ns: Option<String>,
    /// Raw (still escaped) value as it appeared in the source.
    pub raw_value: String,
}

impl Attribute {
    pub fn value(&self) -> String {
        unescape_lossy(&self.raw_value)
    }
}

#[derive(Clone, Debug)]
pub struct Element {
    pub name: String,
    pub prefix: Option<String>,
    pub local: String,
    pub ns: Option<String>,
    pub attrs: Vec<Attribute>,
    /// Start tag between `<` and `>` (or `/>`), exactly as in the source.
    pub raw: String,
    /// End tag between `</` and `>`, including any trailing whitespace.
    pub raw_end: String,
    pub self_closing: bool,
}

impl Element {
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns.as_deref() == Some(ns)
    }

    pub fn attr(&self, ns: &str, local: &str) -> Option<&Attribute> {
        self.attrs
            .iter()
            .find(|a| a.local == local && a.ns.as_deref() == Some(ns))
    }

    pub fn attr_value(&self, ns: &str, local: &str) -> Option<String> {
        self.attr(ns, local).map(Attribute::value)
    }

    /// Byte range of the attribute's raw value inside [`Element::raw`], quotes excluded.
    pub fn attr_value_span(&self, ns: &str, local: &str) -> Option<Range<usize>> {
        let key = &self.attr(ns, local)?.name;
        raw_attr_spans(&self.raw)
            .find(|(k, _)| *k == key.as_str())
            .map(|(_, span)| span)
    }
}

/// Walks `name k1="v1" k2='v2'` yielding each key with the span of its value.
fn raw_attr_spans(raw: &str) -> impl Iterator<Item = (&str, Range<usize>)> {
    let bytes = raw.as_bytes();
    let mut pos = bytes
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    std::iter::from_fn(move || {
        let skip_ws = |mut i: usize| {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            i
        };
        let key_start = skip_ws(pos);
        let mut i = key_start;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_end = i;
        i = skip_ws(i);
        if key_start == key_end || bytes.get(i) != Some(&b'=') {
            return None;
        }
        i = skip_ws(i + 1);
        let quote = *bytes.get(i).filter(|q| **q == b'"' || **q == b'\'')?;
        let value_start = i + 1;
        let value_len = bytes[value_start..].iter().position(|b| *b == quote)?;
        pos = value_start + value_len + 1;
        Some((&raw[key_start..key_end], value_start..value_start + value_len))
    })
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Document,
    /// Declaration between `<?` and `?>`, starting with `xml`.
    Decl(String),
    Element(Element),
    /// Raw (still escaped) character data.
    Text(String),
    CData(String),
    Comment(String),
    PI(String),
    DocType(String),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

/// One XML part of a package, fully materialized as an arena of nodes.
#[derive(Clone, Debug)]
pub struct XmlDocument {
    pub name: String,
    nodes: Vec<Node>,
}

impl XmlDocument {
    pub const ROOT: NodeId = 0;

    pub fn parse(name: &str, xml_bytes: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Reader::from_reader(xml_bytes);
        let config = reader.config_mut();
        config.trim_text(false);
        // End tags are checked below, against the untrimmed source text.
        config.trim_markup_names_in_closing_tags = false;
        config.check_end_names = false;

        let mut doc = XmlDocument {
            name: name.to_string(),
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
        };
        let mut open: Vec<NodeId> = vec![Self::ROOT];
        let mut scopes = NsScopes::default();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let ev = reader
                .read_event_into(&mut buf)
                .with_context(|| format!("read xml event in {name}"))?;
            let parent = *open.last().unwrap_or(&Self::ROOT);
            match ev {
                Event::Eof => break,
                Event::Decl(d) => {
                    doc.push(parent, NodeKind::Decl(bytes_to_string(&*d)));
                }
                Event::Start(s) => {
                    let el = scopes.open_element(&s, false)?;
                    let id = doc.push(parent, NodeKind::Element(el));
                    open.push(id);
                }
                Event::Empty(s) => {
                    let el = scopes.open_element(&s, true)?;
                    scopes.close();
                    doc.push(parent, NodeKind::Element(el));
                }
                Event::End(e) => {
                    let raw_end = bytes_to_string(&*e);
                    let end_name = raw_end.trim_end();
                    let Some(id) = open.pop().filter(|id| *id != Self::ROOT) else {
                        return Err(anyhow!("unbalanced end tag </{end_name}> in {name}"));
                    };
                    scopes.close();
                    if let NodeKind::Element(el) = &mut doc.nodes[id].kind {
                        if el.name != end_name {
                            return Err(anyhow!(
                                "mismatched end tag in {name}: expected </{}>, found </{end_name}>",
                                el.name
                            ));
                        }
                        el.raw_end = raw_end;
                    }
                }
                Event::Text(t) => {
                    doc.push(parent, NodeKind::Text(bytes_to_string(t.into_inner())));
                }
                Event::CData(t) => {
                    doc.push(parent, NodeKind::CData(bytes_to_string(t.into_inner())));
                }
                Event::Comment(t) => {
                    doc.push(parent, NodeKind::Comment(bytes_to_string(t.into_inner())));
                }
                Event::PI(t) => {
                    doc.push(parent, NodeKind::PI(bytes_to_string(&*t)));
                }
                Event::DocType(t) => {
                    doc.push(parent, NodeKind::DocType(bytes_to_string(t.into_inner())));
                }
            }
        }
        if open.len() > 1 {
            return Err(anyhow!("unclosed elements at end of {name}"));
        }
        Ok(doc)
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId, ns: &str, local: &str) -> bool {
        self.element(id).is_some_and(|el| el.is(ns, local))
    }

    /// All nodes below `id` (excluding `id`) in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.nodes[cur].children.iter().rev().copied());
        }
        out
    }

    pub fn elements_named(&self, id: NodeId, ns: &str, local: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|d| self.is_element(*d, ns, local))
            .collect()
    }

    /// Concatenation of the direct text children of `id`, unescaped.
    pub fn direct_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for c in self.children(id) {
            match &self.nodes[*c].kind {
                NodeKind::Text(raw) => out.push_str(&unescape_lossy(raw)),
                NodeKind::CData(text) => out.push_str(text),
                _ => {}
            }
        }
        out
    }

    /// The prefix bound to `ns` on the root element, if any.
    pub fn prefix_for(&self, ns: &str) -> Option<String> {
        let root = self
            .children(Self::ROOT)
            .iter()
            .find_map(|c| self.element(*c))?;
        root.attrs.iter().find_map(|a| {
            (a.raw_value == ns)
                .then(|| a.name.strip_prefix("xmlns:").map(str::to_string))
                .flatten()
        })
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        name: &str,
        ns: Option<&str>,
        attrs: &[(&str, &str)],
    ) -> NodeId {
        let id = self.nodes.len();
        self.push(parent, NodeKind::Element(new_element(name, ns, attrs)));
        id
    }

    pub fn insert_element(
        &mut self,
        parent: NodeId,
        index: usize,
        name: &str,
        ns: Option<&str>,
        attrs: &[(&str, &str)],
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind: NodeKind::Element(new_element(name, ns, attrs)),
        });
        let children = &mut self.nodes[parent].children;
        let index = index.min(children.len());
        children.insert(index, id);
        id
    }

    /// Appends character data; `text` is escaped here.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let raw = quick_xml::escape::partial_escape(text).into_owned();
        self.push(parent, NodeKind::Text(raw))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for c in self.children(Self::ROOT) {
            write_node(&mut out, self, *c);
        }
        out
    }
}

fn new_element(name: &str, ns: Option<&str>, attrs: &[(&str, &str)]) -> Element {
    let (prefix, local) = split_qname(name);
    let attrs: Vec<Attribute> = attrs
        .iter()
        .map(|(k, v)| {
            let (_, local) = split_qname(k);
            Attribute {
                name: k.to_string(),
                local: local.to_string(),
                ns: None,
                raw_value: quick_xml::escape::escape(*v).into_owned(),
            }
        })
        .collect();
    let mut raw = name.to_string();
    for a in &attrs {
        raw.push_str(&format!(" {}=\"{}\"", a.name, a.raw_value));
    }
    Element {
        name: name.to_string(),
        prefix: prefix.map(str::to_string),
        local: local.to_string(),
        ns: ns.map(str::to_string),
        attrs,
        raw,
        raw_end: name.to_string(),
        self_closing: true,
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, name),
    }
}

/// Prefix → namespace bindings in effect for the currently open elements.
#[derive(Default)]
struct NsScopes {
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NsScopes {
    fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NS.to_string());
        }
        self.frames
            .iter()
            .rev()
            .flat_map(|f| f.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    fn open_element(&mut self, s: &BytesStart<'_>, self_closing: bool) -> anyhow::Result<Element> {
        let mut raw_attrs: Vec<(String, String)> = Vec::new();
        let mut frame: Vec<(Option<String>, String)> = Vec::new();
        for a in s.attributes().with_checks(false) {
            let a = a.context("attr")?;
            let key = bytes_to_string(a.key.as_ref());
            // Keep raw (already-escaped) attribute bytes so values round-trip untouched.
            let val = bytes_to_string(a.value.as_ref());
            if key == "xmlns" {
                frame.push((None, unescape_lossy(&val)));
            } else if let Some(p) = key.strip_prefix("xmlns:") {
                frame.push((Some(p.to_string()), unescape_lossy(&val)));
            }
            raw_attrs.push((key, val));
        }
        self.frames.push(frame);

        let name = bytes_to_string(s.name().as_ref());
        let (prefix, local) = split_qname(&name);
        let ns = self.resolve(prefix);
        let attrs = raw_attrs
            .into_iter()
            .map(|(key, raw_value)| {
                let (prefix, local) = split_qname(&key);
                // Unprefixed attributes are in no namespace.
                let ns = match prefix {
                    Some("xmlns") => None,
                    Some(p) => self.resolve(Some(p)),
                    None => None,
                };
                Attribute {
                    local: local.to_string(),
                    name: key.clone(),
                    ns,
                    raw_value,
                }
            })
            .collect();
        Ok(Element {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            raw: bytes_to_string(&**s),
            raw_end: name.clone(),
            name,
            ns,
            attrs,
            self_closing,
        })
    }

    fn close(&mut self) {
        let _ = self.frames.pop();
    }
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

pub fn unescape_lossy(raw: &str) -> String {
    unescape(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Writes the start tag as it appeared in the source. Returns whether it was self-closed.
pub fn write_start_tag(out: &mut Vec<u8>, el: &Element, has_children: bool) -> bool {
    out.extend_from_slice(b"<");
    out.extend_from_slice(el.raw.as_bytes());
    if el.self_closing && !has_children {
        out.extend_from_slice(b"/>");
        true
    } else {
        out.extend_from_slice(b">");
        false
    }
}

pub fn write_end_tag(out: &mut Vec<u8>, el: &Element) {
    out.extend_from_slice(b"</");
    out.extend_from_slice(el.raw_end.as_bytes());
    out.extend_from_slice(b">");
}

/// Serializes a non-element node verbatim.
pub fn write_leaf(out: &mut Vec<u8>, kind: &NodeKind) {
    match kind {
        NodeKind::Document | NodeKind::Element(_) => {}
        NodeKind::Decl(raw) | NodeKind::PI(raw) => {
            out.extend_from_slice(b"<?");
            out.extend_from_slice(raw.as_bytes());
            out.extend_from_slice(b"?>");
        }
        NodeKind::Text(raw) => out.extend_from_slice(raw.as_bytes()),
        NodeKind::CData(text) => {
            out.extend_from_slice(b"<![CDATA[");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"]]>");
        }
        NodeKind::Comment(text) => {
            out.extend_from_slice(b"<!--");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"-->");
        }
        NodeKind::DocType(text) => {
            out.extend_from_slice(b"<!DOCTYPE ");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b">");
        }
    }
}

pub fn write_node(out: &mut Vec<u8>, doc: &XmlDocument, id: NodeId) {
    let node = doc.node(id);
    match &node.kind {
        NodeKind::Element(el) => {
            if write_start_tag(out, el, !node.children.is_empty()) {
                return;
            }
            for c in &node.children {
                write_node(out, doc, *c);
            }
            write_end_tag(out, el);
        }
        NodeKind::Document => {
            for c in &node.children {
                write_node(out, doc, *c);
            }
        }
        other => write_leaf(out, other),
    }
}

pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Re-serializes `xml_bytes` and fails if the output differs from the input.
pub fn verify_roundtrip(name: &str, xml_bytes: &[u8]) -> anyhow::Result<String> {
    let doc = XmlDocument::parse(name, xml_bytes)?;
    let out = doc.to_bytes();
    let (before, after) = (digest_hex(xml_bytes), digest_hex(&out));
    if before != after {
        return Err(anyhow!(
            "serializer changed {name} (baseline={before} current={after})"
        ));
    }
    Ok(after)
}
