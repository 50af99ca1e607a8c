//! Result serialization: nodes through the quick-xml writer, atomics by string value.

use crate::model::{NodeKind, QName, XdmNode, ns_eq};
use crate::runtime::{Error, ErrorCode};
use crate::tree::Node;
use crate::xdm::XdmItem;
use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Xml,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationOptions {
    pub method: OutputMethod,
    pub indent: bool,
    pub indent_width: usize,
    pub omit_xml_declaration: bool,
}

impl Default for SerializationOptions {
    fn default() -> Self {
        Self {
            method: OutputMethod::Xml,
            indent: true,
            indent_width: 4,
            omit_xml_declaration: true,
        }
    }
}

impl SerializationOptions {
    /// Apply a `key=value` list such as `method=xml indent=no`.
    pub fn apply(&mut self, params: &str) -> Result<(), Error> {
        for pair in params.split_whitespace() {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::from_code(ErrorCode::SEPM0016, format!("bad serialization parameter '{pair}'"))
            })?;
            let flag = || match value {
                "yes" | "true" => Ok(true),
                "no" | "false" => Ok(false),
                other => Err(Error::from_code(
                    ErrorCode::SEPM0016,
                    format!("'{other}' is not a valid value for {key}"),
                )),
            };
            match key {
                "method" => {
                    self.method = match value {
                        "xml" | "html" | "xhtml" => OutputMethod::Xml,
                        "text" => OutputMethod::Text,
                        other => {
                            return Err(Error::from_code(
                                ErrorCode::SEPM0016,
                                format!("unsupported output method '{other}'"),
                            ));
                        }
                    }
                }
                "indent" => self.indent = flag()?,
                "omit-xml-declaration" => self.omit_xml_declaration = flag()?,
                "indent-spaces" => {
                    self.indent_width = value.parse().map_err(|_| {
                        Error::from_code(ErrorCode::SEPM0016, "indent-spaces must be a number")
                    })?;
                }
                _ => tracing::debug!(parameter = key, "ignoring unknown serialization parameter"),
            }
        }
        Ok(())
    }
}

/// Serialize a whole result sequence.
pub fn serialize_sequence(
    items: &[XdmItem<Node>],
    options: &SerializationOptions,
) -> Result<String, Error> {
    let mut out = String::new();
    let mut prev_atomic = false;
    for (i, item) in items.iter().enumerate() {
        match item {
            XdmItem::Atomic(a) => {
                if prev_atomic {
                    out.push(' ');
                } else if i > 0 && options.indent {
                    out.push('\n');
                }
                out.push_str(&a.string_value());
                prev_atomic = true;
            }
            XdmItem::Node(n) => {
                if i > 0 && options.indent {
                    out.push('\n');
                }
                out.push_str(&serialize_node(n, options)?);
                prev_atomic = false;
            }
        }
    }
    Ok(out)
}

/// Serialize one item.
pub fn serialize_item(item: &XdmItem<Node>, options: &SerializationOptions) -> Result<String, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(a.string_value()),
        XdmItem::Node(n) => serialize_node(n, options),
    }
}

pub fn serialize_node(node: &Node, options: &SerializationOptions) -> Result<String, Error> {
    if options.method == OutputMethod::Text {
        return Ok(node.string_value());
    }
    match node.kind() {
        NodeKind::Attribute | NodeKind::Namespace => return Ok(node.string_value()),
        NodeKind::Text => return Ok(partial_escape(&node.string_value()).into_owned()),
        _ => {}
    }
    let mut ser = XmlSerializer {
        writer: Writer::new(Vec::new()),
        options,
        scopes: Vec::new(),
    };
    if node.kind() == NodeKind::Document && !options.omit_xml_declaration {
        ser.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        ser.newline(0)?;
    }
    ser.write_node(node, 0)?;
    String::from_utf8(ser.writer.into_inner()).map_err(write_failed)
}

struct XmlSerializer<'o> {
    writer: Writer<Vec<u8>>,
    options: &'o SerializationOptions,
    scopes: Vec<Vec<(Option<String>, String)>>,
}

impl XmlSerializer<'_> {
    fn emit(&mut self, event: Event<'_>) -> Result<(), Error> {
        self.writer.write_event(event).map_err(write_failed)
    }

    fn newline(&mut self, depth: usize) -> Result<(), Error> {
        let pad = format!("\n{}", " ".repeat(depth * self.options.indent_width));
        self.emit(Event::Text(BytesText::from_escaped(pad)))
    }

    fn bound(&self, prefix: &Option<String>) -> Option<&str> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, uri)) = scope.iter().find(|(p, _)| p == prefix) {
                return Some(uri);
            }
        }
        None
    }

    fn require(&self, decls: &mut Vec<(Option<String>, String)>, name: &QName, is_attr: bool) {
        let uri = name.ns_uri.clone().unwrap_or_default();
        if name.prefix.is_none()
            && (is_attr || (uri.is_empty() && self.bound(&None).is_none_or(str::is_empty)))
        {
            return;
        }
        let prefix = name.prefix.clone();
        if prefix.as_deref() == Some("xml") {
            return;
        }
        if decls.iter().any(|(p, _)| *p == prefix) {
            return;
        }
        if !ns_eq(self.bound(&prefix), Some(&uri)) {
            decls.push((prefix, uri));
        }
    }

    fn write_node(&mut self, node: &Node, depth: usize) -> Result<(), Error> {
        match node.kind() {
            NodeKind::Document => {
                let children = node.children();
                for (i, child) in children.iter().enumerate() {
                    if i > 0 && self.options.indent {
                        self.newline(depth)?;
                    }
                    self.write_node(child, depth)?;
                }
                Ok(())
            }
            NodeKind::Element => self.write_element(node, depth),
            NodeKind::Text => {
                let text = node.string_value();
                self.emit(Event::Text(BytesText::from_escaped(partial_escape(&text))))
            }
            NodeKind::Comment => {
                let text = node.string_value();
                self.emit(Event::Comment(BytesText::from_escaped(text)))
            }
            NodeKind::ProcessingInstruction => {
                let target = node.name().map(|n| n.local).unwrap_or_default();
                let content = node.string_value();
                let body = if content.is_empty() {
                    target
                } else {
                    format!("{target} {content}")
                };
                self.emit(Event::PI(BytesPI::new(body)))
            }
            NodeKind::Attribute | NodeKind::Namespace => {
                let text = node.string_value();
                self.emit(Event::Text(BytesText::from_escaped(partial_escape(&text))))
            }
        }
    }

    fn write_element(&mut self, node: &Node, depth: usize) -> Result<(), Error> {
        let Some(name) = node.name() else {
            return Err(write_failed("element without a name"));
        };
        let mut decls: Vec<(Option<String>, String)> = Vec::new();
        for ns in node.namespaces() {
            let prefix = ns.name().map(|q| q.local).filter(|p| !p.is_empty());
            let uri = ns.string_value();
            if !ns_eq(self.bound(&prefix), Some(&uri)) {
                decls.push((prefix, uri));
            }
        }
        self.require(&mut decls, &name, false);
        let attributes = node.attributes();
        for attr in &attributes {
            if let Some(n) = attr.name() {
                self.require(&mut decls, &n, true);
            }
        }
        let tag = name.to_string();
        let mut start = BytesStart::new(tag.as_str());
        for (prefix, uri) in &decls {
            let key = match prefix {
                Some(p) => format!("xmlns:{p}"),
                None => "xmlns".to_string(),
            };
            start.push_attribute((key.as_str(), uri.as_str()));
        }
        for attr in &attributes {
            if let Some(n) = attr.name() {
                let key = n.to_string();
                let value = attr.string_value();
                start.push_attribute((key.as_str(), value.as_str()));
            }
        }
        let children = node.children();
        if children.is_empty() {
            return self.emit(Event::Empty(start));
        }
        self.scopes.push(decls);
        self.emit(Event::Start(start))?;
        let element_only = self.options.indent
            && children
                .iter()
                .all(|c| c.kind() != NodeKind::Text || c.string_value().trim().is_empty());
        for child in &children {
            if element_only {
                if child.kind() == NodeKind::Text {
                    continue;
                }
                self.newline(depth + 1)?;
            }
            self.write_node(child, depth + 1)?;
        }
        if element_only {
            self.newline(depth)?;
        }
        self.emit(Event::End(BytesEnd::new(tag.as_str())))?;
        self.scopes.pop();
        Ok(())
    }
}

fn write_failed(e: impl std::fmt::Display) -> Error {
    Error::from_code(ErrorCode::SENR0001, format!("serialization failed: {e}"))
}
