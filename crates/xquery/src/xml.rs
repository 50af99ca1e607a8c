//! XML text to [`Fragment`] trees, using the quick-xml pull reader.

use crate::consts::{XML_URI, XMLNS_URI};
use crate::model::{NodeKind, QName};
use crate::runtime::{Error, ErrorCode};
use crate::tree::{Document, Fragment};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Drop text nodes that consist only of whitespace.
    pub strip_whitespace: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strip_whitespace: true,
        }
    }
}

/// Parse a complete document and load it into a fresh tree.
pub fn parse_document(
    text: &str,
    uri: Option<String>,
    persistent: bool,
    options: ParseOptions,
) -> Result<Arc<Document>, Error> {
    let fragment = parse_fragment(text, options)?;
    Ok(Document::from_fragment(&fragment, uri, persistent))
}

struct OpenElement {
    fragment: Fragment,
    bindings: HashMap<Option<String>, String>,
}

struct TreeBuilder {
    stack: Vec<OpenElement>,
    top: Vec<Fragment>,
    pending_text: String,
    options: ParseOptions,
}

impl TreeBuilder {
    fn lookup(&self, prefix: Option<&str>) -> Option<String> {
        let key = prefix.map(str::to_string);
        for open in self.stack.iter().rev() {
            if let Some(uri) = open.bindings.get(&key) {
                return Some(uri.clone());
            }
        }
        match prefix {
            Some("xml") => Some(XML_URI.to_string()),
            _ => None,
        }
    }

    fn push_child(&mut self, child: Fragment) {
        match self.stack.last_mut() {
            Some(open) => open.fragment.children.push(child),
            None => self.top.push(child),
        }
    }

    fn flush_text(&mut self) {
        if self.pending_text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending_text);
        if self.stack.is_empty() {
            return;
        }
        if self.options.strip_whitespace && text.chars().all(char::is_whitespace) {
            return;
        }
        self.push_child(Fragment::text(text));
    }

    fn open(&mut self, start: &BytesStart<'_>) -> Result<(), Error> {
        self.flush_text();
        let raw_name = utf8(start.name().as_ref())?.to_string();
        let mut bindings = HashMap::new();
        let mut raw_attrs: Vec<(String, String)> = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| malformed(e.to_string()))?;
            let key = utf8(attr.key.as_ref())?.to_string();
            let value = unescape(utf8(&attr.value)?)
                .map_err(|e| malformed(e.to_string()))?
                .into_owned();
            if key == "xmlns" {
                bindings.insert(None, value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                bindings.insert(Some(prefix.to_string()), value);
            } else {
                raw_attrs.push((key, value));
            }
        }
        self.stack.push(OpenElement {
            fragment: Fragment::element(QName::local("")),
            bindings,
        });
        let name = self.resolve(&raw_name, true)?;
        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            attributes.push(Fragment::attribute(self.resolve(&key, false)?, value));
        }
        if let Some(open) = self.stack.last_mut() {
            let mut ns: Vec<(Option<String>, String)> = open
                .bindings
                .iter()
                .map(|(p, u)| (p.clone(), u.clone()))
                .collect();
            ns.sort();
            open.fragment = Fragment::element(name).with_attributes(attributes);
            open.fragment.namespaces = ns;
        }
        Ok(())
    }

    fn resolve(&self, raw: &str, is_element: bool) -> Result<QName, Error> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.lookup(Some(prefix)).ok_or_else(|| {
                    malformed(format!("namespace prefix '{prefix}' is not declared"))
                })?;
                if uri == XMLNS_URI {
                    return Err(malformed("the xmlns namespace cannot be used for names"));
                }
                Ok(QName::new(Some(prefix.to_string()), local, Some(uri)))
            }
            None if is_element => Ok(QName::new(None, raw, self.lookup(None).filter(|u| !u.is_empty()))),
            None => Ok(QName::local(raw)),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        self.flush_text();
        let open = self
            .stack
            .pop()
            .ok_or_else(|| malformed("unexpected end tag"))?;
        self.push_child(open.fragment);
        Ok(())
    }
}

/// Parse XML text into a document fragment.
pub fn parse_fragment(text: &str, options: ParseOptions) -> Result<Fragment, Error> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = true;
    let mut builder = TreeBuilder {
        stack: Vec::new(),
        top: Vec::new(),
        pending_text: String::new(),
        options,
    };
    loop {
        let event = reader.read_event().map_err(|e| {
            malformed(format!("{e} at byte {}", reader.error_position()))
        })?;
        match event {
            Event::Start(start) => builder.open(&start)?,
            Event::Empty(start) => {
                builder.open(&start)?;
                builder.close()?;
            }
            Event::End(_) => builder.close()?,
            Event::Text(t) => {
                let raw = utf8(&t)?;
                let text = unescape(raw).map_err(|e| malformed(e.to_string()))?;
                builder.pending_text.push_str(&text);
            }
            Event::GeneralRef(r) => {
                let entity = format!("&{};", utf8(&r)?);
                let text = unescape(&entity).map_err(|e| malformed(e.to_string()))?;
                builder.pending_text.push_str(&text);
            }
            Event::CData(c) => builder.pending_text.push_str(utf8(&c)?),
            Event::Comment(c) => {
                builder.flush_text();
                builder.push_child(Fragment::comment(utf8(&c)?));
            }
            Event::PI(pi) => {
                builder.flush_text();
                let target = utf8(pi.target())?.to_string();
                let content = utf8(pi.content())?.trim_start().to_string();
                builder.push_child(Fragment::processing_instruction(target, content));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !builder.stack.is_empty() {
        return Err(malformed("unexpected end of input: unclosed element"));
    }
    let roots = builder
        .top
        .iter()
        .filter(|f| f.kind == NodeKind::Element)
        .count();
    if roots != 1 {
        return Err(malformed(format!(
            "a document needs exactly one root element, found {roots}"
        )));
    }
    Ok(Fragment::document(builder.top))
}

fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::from_code(ErrorCode::FODC0006, format!("malformed XML: {}", msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_prefixes_and_default_namespace() {
        let frag = parse_fragment(
            r#"<a xmlns="urn:a" xmlns:x="urn:x"><x:b x:id="1" plain="2"/></a>"#,
            ParseOptions::default(),
        )
        .unwrap();
        let a = &frag.children[0];
        assert_eq!(a.name.as_ref().unwrap().ns_uri.as_deref(), Some("urn:a"));
        let b = &a.children[0];
        assert_eq!(b.name.as_ref().unwrap().ns_uri.as_deref(), Some("urn:x"));
        assert_eq!(b.attributes[0].name.as_ref().unwrap().ns_uri.as_deref(), Some("urn:x"));
        assert_eq!(b.attributes[1].name.as_ref().unwrap().ns_uri, None);
    }

    #[test]
    fn merges_entities_and_cdata_into_one_text_node() {
        let frag = parse_fragment("<a>x &amp; <![CDATA[<y>]]>&#65;</a>", ParseOptions::default())
            .unwrap();
        let a = &frag.children[0];
        assert_eq!(a.children.len(), 1);
        assert_eq!(a.children[0].value, "x & <y>A");
    }

    #[test]
    fn strips_whitespace_only_text() {
        let frag = parse_fragment("<a>\n  <b/>\n</a>", ParseOptions::default()).unwrap();
        assert_eq!(frag.children[0].children.len(), 1);
        let kept = parse_fragment(
            "<a>\n  <b/>\n</a>",
            ParseOptions {
                strip_whitespace: false,
            },
        )
        .unwrap();
        assert_eq!(kept.children[0].children.len(), 3);
    }

    #[test]
    fn rejects_unclosed_elements() {
        let err = parse_fragment("<a><b></a>", ParseOptions::default()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FODC0006);
    }
}
