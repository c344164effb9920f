//! A minimal, namespace-aware XML tree
//!
//! `quick-xml`'s event reader has no built-in tree or XPath-like lookup API.
//! The SOAP responses this crate parses are resolved against namespace
//! *URIs*, not the literal prefixes a given controller firmware happens to
//! write on the wire. So instead of re-parsing per lookup, the whole
//! response is parsed once into this small persistent tree, with every
//! element's namespace already resolved, and walked with plain Rust
//! afterwards.

use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader;
use std::collections::HashMap;

use crate::error::{IhcError, IhcResult};

/// One XML element, with its namespace already resolved against the scope
/// it was parsed in.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub ns_uri: Option<String>,
    pub local_name: String,
    /// Attribute local name -> (namespace URI, value)
    pub attrs: Vec<(Option<String>, String, String)>,
    /// Direct text content (concatenation of text nodes that are immediate
    /// children, not nested inside a child element)
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// First direct child with the given local name, in any (or no)
    /// namespace.
    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name == local_name)
    }

    /// First direct child with the given local name in the given namespace.
    pub fn child_ns(&self, ns_uri: &str, local_name: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|c| c.local_name == local_name && c.ns_uri.as_deref() == Some(ns_uri))
    }

    /// All direct children with the given local name.
    pub fn children_named<'a, 'b>(&'a self, local_name: &'b str) -> impl Iterator<Item = &'a XmlElement> + use<'a, 'b> {
        self.children.iter().filter(move |c| c.local_name == local_name)
    }

    /// Walk a path of local names through descendants (depth-first, one
    /// child per step) regardless of namespace.
    pub fn find_path(&self, path: &[&str]) -> Option<&XmlElement> {
        let mut node = self;
        for name in path {
            node = node.child(name)?;
        }
        Some(node)
    }

    /// Value of an attribute by local name, in any namespace.
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(_, name, _)| name == local_name)
            .map(|(_, _, v)| v.as_str())
    }

    /// Value of an attribute by local name in a specific namespace.
    pub fn attr_ns(&self, ns_uri: &str, local_name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(ns, name, _)| name == local_name && ns.as_deref() == Some(ns_uri))
            .map(|(_, _, v)| v.as_str())
    }

    pub fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

#[derive(Clone, Default)]
struct Scope {
    /// prefix (empty string for default namespace) -> URI
    bindings: HashMap<String, String>,
}

/// Parse an XML document into a single root [`XmlElement`].
pub fn parse(xml: &str) -> IhcResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(XmlElement, Scope)> = Vec::new();
    let mut scopes: Vec<Scope> = vec![Scope::default()];
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let parent_scope = scopes.last().cloned().unwrap_or_default();
                let scope = build_scope(&e, parent_scope);
                let (ns_uri, local_name) = resolve_name(e.name(), &scope);
                let attrs = resolve_attrs(&e, &scope)?;
                let element = XmlElement {
                    ns_uri,
                    local_name,
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                };
                scopes.push(scope.clone());
                stack.push((element, scope));
            }
            Event::Empty(e) => {
                let parent_scope = scopes.last().cloned().unwrap_or_default();
                let scope = build_scope(&e, parent_scope);
                let (ns_uri, local_name) = resolve_name(e.name(), &scope);
                let attrs = resolve_attrs(&e, &scope)?;
                let element = XmlElement {
                    ns_uri,
                    local_name,
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                };
                attach(&mut stack, &mut root, element);
            }
            Event::Text(t) => {
                if let Some((top, _)) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let Some((top, _)) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(_) => {
                scopes.pop();
                if let Some((element, _)) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| IhcError::Xml("empty XML document".to_string()))
}

fn attach(stack: &mut [(XmlElement, Scope)], root: &mut Option<XmlElement>, element: XmlElement) {
    if let Some((parent, _)) = stack.last_mut() {
        parent.children.push(element);
    } else {
        *root = Some(element);
    }
}

fn build_scope(e: &quick_xml::events::BytesStart, mut scope: Scope) -> Scope {
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        if key == b"xmlns" {
            scope
                .bindings
                .insert(String::new(), String::from_utf8_lossy(&attr.value).into_owned());
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            scope.bindings.insert(
                String::from_utf8_lossy(prefix).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            );
        }
    }
    scope
}

fn resolve_name(name: QName, scope: &Scope) -> (Option<String>, String) {
    let raw = name.as_ref();
    match raw.iter().position(|&b| b == b':') {
        Some(pos) => {
            let prefix = String::from_utf8_lossy(&raw[..pos]).into_owned();
            let local = String::from_utf8_lossy(&raw[pos + 1..]).into_owned();
            (scope.bindings.get(&prefix).cloned(), local)
        }
        None => {
            let local = String::from_utf8_lossy(raw).into_owned();
            (scope.bindings.get("").cloned(), local)
        }
    }
}

fn resolve_attrs(
    e: &quick_xml::events::BytesStart,
    scope: &Scope,
) -> IhcResult<Vec<(Option<String>, String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| IhcError::Xml(err.to_string()))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let raw = attr.key.as_ref();
        let (ns, local) = match raw.iter().position(|&b| b == b':') {
            Some(pos) => {
                let prefix = String::from_utf8_lossy(&raw[..pos]).into_owned();
                let local = String::from_utf8_lossy(&raw[pos + 1..]).into_owned();
                (scope.bindings.get(&prefix).cloned(), local)
            }
            None => (None, String::from_utf8_lossy(raw).into_owned()),
        };
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        out.push((ns, local, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_namespaced_elements_by_uri_not_prefix() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
            <s:Body><foo:Thing xmlns:foo="utcs">hi</foo:Thing></s:Body>
        </s:Envelope>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.local_name, "Envelope");
        let body = root.child("Body").unwrap();
        let thing = body.child("Thing").unwrap();
        assert_eq!(thing.ns_uri.as_deref(), Some("utcs"));
        assert_eq!(thing.text_trimmed(), "hi");
    }

    #[test]
    fn two_prefixes_same_uri_both_resolve() {
        let xml = r#"<root xmlns:ns2="utcs.values" xmlns:ns3="utcs.values">
            <ns2:a>1</ns2:a><ns3:b>2</ns3:b>
        </root>"#;
        let root = parse(xml).unwrap();
        let a = root.child("a").unwrap();
        let b = root.child("b").unwrap();
        assert_eq!(a.ns_uri.as_deref(), Some("utcs.values"));
        assert_eq!(b.ns_uri.as_deref(), Some("utcs.values"));
    }

    #[test]
    fn reads_xsi_type_attribute() {
        let xml = r#"<value xmlns:i="http://www.w3.org/2001/XMLSchema-instance"
            xmlns:a="utcs.values" i:type="a:WSBooleanValue"><a:value>true</a:value></value>"#;
        let root = parse(xml).unwrap();
        let xsi_type = root
            .attr_ns("http://www.w3.org/2001/XMLSchema-instance", "type")
            .unwrap();
        assert_eq!(xsi_type, "a:WSBooleanValue");
    }
}
