//! WebDAV XML codec.
//!
//! Parses PROPFIND / PROPPATCH / LOCK request bodies and renders the
//! response documents: 207 Multi-Status with propstat groups,
//! lockdiscovery, and plain per-href status entries. The `DAV:`
//! namespace always gets the `D` prefix; foreign namespaces get `ns0`,
//! `ns1`, ... in declaration order.

use http::StatusCode;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use quick_xml::Writer;

use crate::errors::{DavError, DavResult};
use crate::locks::{DavLock, LockScope};
use crate::props::DeadProp;

pub(crate) const NS_DAV: &str = "DAV:";

pub(crate) const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";
pub(crate) const MULTISTATUS_OPEN: &str = "<D:multistatus xmlns:D=\"DAV:\">";
pub(crate) const MULTISTATUS_CLOSE: &str = "</D:multistatus>";

/// Name of one requested property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropName {
    pub namespace: String,
    pub name: String,
}

/// Parsed PROPFIND request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropfindRequest {
    AllProp,
    PropName,
    Props(Vec<PropName>),
}

/// One `<set>` or `<remove>` operation, in document order.
#[derive(Debug, Clone)]
pub struct PropPatchOp {
    pub remove: bool,
    pub prop: DeadProp,
}

/// Parsed LOCK request body.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub scope: LockScope,
    pub owner: Option<String>,
}

fn ns_of(r: &ResolveResult) -> String {
    match r {
        ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.0).into_owned(),
        _ => String::new(),
    }
}

fn local_of(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().into_inner()).into_owned()
}

/// Parse a PROPFIND body. An empty or malformed body is treated as
/// `<allprop/>`.
pub fn parse_propfind(body: &[u8]) -> PropfindRequest {
    if body.is_empty() {
        return PropfindRequest::AllProp;
    }
    parse_propfind_inner(body).unwrap_or(PropfindRequest::AllProp)
}

fn parse_propfind_inner(body: &[u8]) -> Result<PropfindRequest, quick_xml::Error> {
    let mut reader = NsReader::from_reader(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut prop_depth = None;
    let mut kind = None;
    let mut props = Vec::new();

    loop {
        match reader.read_resolved_event_into(&mut buf)? {
            (ns, Event::Start(e)) => {
                let local = local_of(&e);
                let nsuri = ns_of(&ns);
                if nsuri == NS_DAV && depth == 1 {
                    match local.as_str() {
                        "allprop" => kind = Some(PropfindRequest::AllProp),
                        "propname" => kind = Some(PropfindRequest::PropName),
                        "prop" => {
                            kind = Some(PropfindRequest::Props(Vec::new()));
                            prop_depth = Some(depth);
                        }
                        _ => {}
                    }
                } else if prop_depth.map(|pd| depth == pd + 1).unwrap_or(false) {
                    props.push(PropName {
                        namespace: nsuri,
                        name: local,
                    });
                }
                depth += 1;
            }
            (ns, Event::Empty(e)) => {
                let local = local_of(&e);
                let nsuri = ns_of(&ns);
                if nsuri == NS_DAV && depth == 1 {
                    match local.as_str() {
                        "allprop" => kind = Some(PropfindRequest::AllProp),
                        "propname" => kind = Some(PropfindRequest::PropName),
                        _ => {}
                    }
                } else if prop_depth.map(|pd| depth == pd + 1).unwrap_or(false) {
                    props.push(PropName {
                        namespace: nsuri,
                        name: local,
                    });
                }
            }
            (_, Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if prop_depth == Some(depth) {
                    prop_depth = None;
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
        buf.clear();
    }

    match kind {
        Some(PropfindRequest::Props(_)) => Ok(PropfindRequest::Props(props)),
        Some(k) => Ok(k),
        None => Ok(PropfindRequest::AllProp),
    }
}

/// Parse a PROPPATCH `<propertyupdate>` body into its operations, in
/// document order.
pub fn parse_propertyupdate(body: &[u8]) -> DavResult<Vec<PropPatchOp>> {
    if body.is_empty() {
        return Err(DavError::Status(StatusCode::BAD_REQUEST));
    }
    match parse_propertyupdate_inner(body) {
        Ok(Some(ops)) => Ok(ops),
        _ => Err(DavError::XmlParse),
    }
}

fn parse_propertyupdate_inner(
    body: &[u8],
) -> Result<Option<Vec<PropPatchOp>>, quick_xml::Error> {
    let mut reader = NsReader::from_reader(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut ops = Vec::new();
    let mut saw_root = false;
    let mut mode: Option<bool> = None; // Some(true) = remove
    let mut in_prop = false;
    let mut current: Option<(String, String, String)> = None; // ns, name, value
    let mut prop_el_depth = 0usize;

    loop {
        match reader.read_resolved_event_into(&mut buf)? {
            (ns, Event::Start(e)) => {
                let local = local_of(&e);
                let nsuri = ns_of(&ns);
                if current.is_some() {
                    // nested markup inside a value: only its text matters
                    prop_el_depth += 1;
                } else if nsuri == NS_DAV && local == "propertyupdate" {
                    saw_root = true;
                } else if nsuri == NS_DAV && local == "set" {
                    mode = Some(false);
                } else if nsuri == NS_DAV && local == "remove" {
                    mode = Some(true);
                } else if nsuri == NS_DAV && local == "prop" && mode.is_some() {
                    in_prop = true;
                } else if in_prop {
                    current = Some((nsuri, local, String::new()));
                    prop_el_depth = 0;
                }
            }
            (ns, Event::Empty(e)) => {
                let local = local_of(&e);
                let nsuri = ns_of(&ns);
                if in_prop && current.is_none() {
                    if let Some(remove) = mode {
                        ops.push(PropPatchOp {
                            remove,
                            prop: DeadProp {
                                namespace: nsuri,
                                name: local,
                                value: String::new(),
                            },
                        });
                    }
                }
            }
            (_, Event::Text(t)) => {
                if let Some((_, _, value)) = current.as_mut() {
                    value.push_str(&t.unescape()?);
                }
            }
            (_, Event::End(_)) => {
                if let Some((nsuri, local, value)) = current.take() {
                    if prop_el_depth > 0 {
                        prop_el_depth -= 1;
                        current = Some((nsuri, local, value));
                    } else if let Some(remove) = mode {
                        ops.push(PropPatchOp {
                            remove,
                            prop: DeadProp {
                                namespace: nsuri,
                                name: local,
                                value,
                            },
                        });
                    }
                } else if in_prop {
                    in_prop = false;
                } else {
                    mode = None;
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Ok(None);
    }
    Ok(Some(ops))
}

/// Parse a LOCK `<lockinfo>` body. Scope defaults to exclusive, type to
/// write; the owner is the inner text (or the `<href>` inner text).
pub fn parse_lockinfo(body: &[u8]) -> DavResult<LockRequest> {
    match parse_lockinfo_inner(body) {
        Ok(Some(req)) => Ok(req),
        _ => Err(DavError::XmlParse),
    }
}

fn parse_lockinfo_inner(body: &[u8]) -> Result<Option<LockRequest>, quick_xml::Error> {
    let mut reader = NsReader::from_reader(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut saw_root = false;
    let mut scope = LockScope::Exclusive;
    let mut in_owner = false;
    let mut owner_text = String::new();

    loop {
        match reader.read_resolved_event_into(&mut buf)? {
            (ns, Event::Start(e)) | (ns, Event::Empty(e)) => {
                let local = local_of(&e);
                if ns_of(&ns) == NS_DAV {
                    match local.as_str() {
                        "lockinfo" => saw_root = true,
                        "exclusive" => scope = LockScope::Exclusive,
                        "shared" => scope = LockScope::Shared,
                        "owner" => in_owner = true,
                        _ => {}
                    }
                }
            }
            (_, Event::Text(t)) => {
                if in_owner {
                    owner_text.push_str(&t.unescape()?);
                }
            }
            (ns, Event::End(e)) => {
                let local = String::from_utf8_lossy(e.local_name().into_inner()).into_owned();
                if ns_of(&ns) == NS_DAV && local == "owner" {
                    in_owner = false;
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Ok(None);
    }
    let owner_text = owner_text.trim().to_string();
    Ok(Some(LockRequest {
        scope,
        owner: if owner_text.is_empty() {
            None
        } else {
            Some(owner_text)
        },
    }))
}

// ---------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------

// Small wrapper over the quick-xml writer; writes into memory, which
// cannot fail.
pub(crate) struct XmlBuf {
    w: Writer<Vec<u8>>,
}

impl XmlBuf {
    pub(crate) fn new() -> XmlBuf {
        XmlBuf {
            w: Writer::new(Vec::new()),
        }
    }

    pub(crate) fn start(&mut self, name: &str) {
        let _ = self.w.write_event(Event::Start(BytesStart::new(name)));
    }

    pub(crate) fn start_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) {
        let mut el = BytesStart::new(name);
        for (k, v) in attrs {
            el.push_attribute((*k, *v));
        }
        let _ = self.w.write_event(Event::Start(el));
    }

    pub(crate) fn empty(&mut self, name: &str) {
        let _ = self.w.write_event(Event::Empty(BytesStart::new(name)));
    }

    pub(crate) fn empty_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) {
        let mut el = BytesStart::new(name);
        for (k, v) in attrs {
            el.push_attribute((*k, *v));
        }
        let _ = self.w.write_event(Event::Empty(el));
    }

    pub(crate) fn text(&mut self, t: &str) {
        let _ = self.w.write_event(Event::Text(BytesText::new(t)));
    }

    pub(crate) fn end(&mut self, name: &str) {
        let _ = self.w.write_event(Event::End(BytesEnd::new(name)));
    }

    pub(crate) fn text_el(&mut self, name: &str, t: &str) {
        self.start(name);
        self.text(t);
        self.end(name);
    }

    pub(crate) fn into_string(self) -> String {
        String::from_utf8(self.w.into_inner()).unwrap_or_default()
    }
}

/// Assigns `ns0`, `ns1`, ... prefixes to foreign namespaces in the order
/// they are first seen within one response document.
#[derive(Default)]
pub(crate) struct NsMap {
    uris: Vec<String>,
}

impl NsMap {
    pub(crate) fn new() -> NsMap {
        NsMap::default()
    }

    pub(crate) fn prefix_for(&mut self, ns: &str) -> String {
        if let Some(i) = self.uris.iter().position(|u| u == ns) {
            return format!("ns{}", i);
        }
        self.uris.push(ns.to_string());
        format!("ns{}", self.uris.len() - 1)
    }
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

/// `<D:response>` carrying only a status, for Multi-Status entries
/// produced by partial failures.
pub(crate) fn status_response(
    href: &str,
    status: StatusCode,
    description: Option<&str>,
) -> String {
    let mut x = XmlBuf::new();
    x.start("D:response");
    x.text_el("D:href", href);
    x.text_el("D:status", &status_line(status));
    if let Some(d) = description {
        x.text_el("D:responsedescription", d);
    }
    x.end("D:response");
    x.into_string()
}

/// Content of one rendered property element.
pub(crate) enum PropContent {
    Empty,
    Text(String),
    ResourceTypeCollection,
    LockDiscovery(Vec<DavLock>, String),
    SupportedLock { enabled: bool },
}

pub(crate) struct RenderedProp {
    pub namespace: String,
    pub name: String,
    pub content: PropContent,
}

pub(crate) struct PropstatGroup {
    pub status: StatusCode,
    pub props: Vec<RenderedProp>,
}

fn write_prop(x: &mut XmlBuf, ns_map: &mut NsMap, prop: &RenderedProp) {
    let (qname, decl) = if prop.namespace == NS_DAV {
        (format!("D:{}", prop.name), None)
    } else if prop.namespace.is_empty() {
        (prop.name.clone(), None)
    } else {
        let pfx = ns_map.prefix_for(&prop.namespace);
        (
            format!("{}:{}", pfx, prop.name),
            Some((format!("xmlns:{}", pfx), prop.namespace.clone())),
        )
    };
    let attrs: Vec<(&str, &str)> = match &decl {
        Some((k, v)) => vec![(k.as_str(), v.as_str())],
        None => Vec::new(),
    };

    match &prop.content {
        PropContent::Empty => x.empty_attrs(&qname, &attrs),
        PropContent::Text(t) => {
            x.start_attrs(&qname, &attrs);
            x.text(t);
            x.end(&qname);
        }
        PropContent::ResourceTypeCollection => {
            x.start_attrs(&qname, &attrs);
            x.empty("D:collection");
            x.end(&qname);
        }
        PropContent::LockDiscovery(locks, root_href) => {
            x.start_attrs(&qname, &attrs);
            for lock in locks {
                write_activelock(x, lock, root_href);
            }
            x.end(&qname);
        }
        PropContent::SupportedLock { enabled } => {
            x.start_attrs(&qname, &attrs);
            if *enabled {
                for scope in ["D:exclusive", "D:shared"] {
                    x.start("D:lockentry");
                    x.start("D:lockscope");
                    x.empty(scope);
                    x.end("D:lockscope");
                    x.start("D:locktype");
                    x.empty("D:write");
                    x.end("D:locktype");
                    x.end("D:lockentry");
                }
            }
            x.end(&qname);
        }
    }
}

fn write_activelock(x: &mut XmlBuf, lock: &DavLock, root_href: &str) {
    x.start("D:activelock");
    x.start("D:locktype");
    x.empty("D:write");
    x.end("D:locktype");
    x.start("D:lockscope");
    x.empty(match lock.scope {
        LockScope::Exclusive => "D:exclusive",
        LockScope::Shared => "D:shared",
    });
    x.end("D:lockscope");
    x.text_el("D:depth", if lock.deep { "infinity" } else { "0" });
    if let Some(owner) = &lock.owner {
        x.text_el("D:owner", owner);
    }
    let timeout = match lock.remaining_secs() {
        Some(secs) => format!("Second-{}", secs),
        None => "Infinite".to_string(),
    };
    x.text_el("D:timeout", &timeout);
    x.start("D:locktoken");
    x.text_el("D:href", &lock.token);
    x.end("D:locktoken");
    x.start("D:lockroot");
    x.text_el("D:href", root_href);
    x.end("D:lockroot");
    x.end("D:activelock");
}

/// `<D:response>` with one `<D:propstat>` per status group.
pub(crate) fn propstat_response(
    href: &str,
    groups: &[PropstatGroup],
    ns_map: &mut NsMap,
) -> String {
    let mut x = XmlBuf::new();
    x.start("D:response");
    x.text_el("D:href", href);
    for group in groups {
        if group.props.is_empty() {
            continue;
        }
        x.start("D:propstat");
        x.start("D:prop");
        for prop in &group.props {
            write_prop(&mut x, ns_map, prop);
        }
        x.end("D:prop");
        x.text_el("D:status", &status_line(group.status));
        x.end("D:propstat");
    }
    x.end("D:response");
    x.into_string()
}

/// LOCK response body: `<D:prop><D:lockdiscovery>...` for one lock.
pub(crate) fn lock_response_body(lock: &DavLock, root_href: &str) -> String {
    let mut x = XmlBuf::new();
    x.start_attrs("D:prop", &[("xmlns:D", NS_DAV)]);
    x.start("D:lockdiscovery");
    write_activelock(&mut x, lock, root_href);
    x.end("D:lockdiscovery");
    x.end("D:prop");
    format!("{}{}", XML_DECL, x.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propfind_empty_body_is_allprop() {
        assert_eq!(parse_propfind(b""), PropfindRequest::AllProp);
    }

    #[test]
    fn propfind_malformed_is_allprop() {
        assert_eq!(parse_propfind(b"<not-even-xml"), PropfindRequest::AllProp);
    }

    #[test]
    fn propfind_allprop() {
        let body = br#"<?xml version="1.0"?>
            <D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;
        assert_eq!(parse_propfind(body), PropfindRequest::AllProp);
    }

    #[test]
    fn propfind_propname() {
        let body = br#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert_eq!(parse_propfind(body), PropfindRequest::PropName);
    }

    #[test]
    fn propfind_prop_list() {
        let body = br#"<D:propfind xmlns:D="DAV:" xmlns:x="urn:example">
            <D:prop><D:getetag/><x:color/></D:prop></D:propfind>"#;
        match parse_propfind(body) {
            PropfindRequest::Props(props) => {
                assert_eq!(props.len(), 2);
                assert_eq!(props[0].namespace, "DAV:");
                assert_eq!(props[0].name, "getetag");
                assert_eq!(props[1].namespace, "urn:example");
                assert_eq!(props[1].name, "color");
            }
            other => panic!("expected prop list, got {:?}", other),
        }
    }

    #[test]
    fn propertyupdate_set_and_remove_in_order() {
        let body = br#"<D:propertyupdate xmlns:D="DAV:" xmlns:x="urn:example">
            <D:set><D:prop><x:color>red</x:color></D:prop></D:set>
            <D:remove><D:prop><x:speed/></D:prop></D:remove>
            <D:set><D:prop><x:size>4</x:size></D:prop></D:set>
            </D:propertyupdate>"#;
        let ops = parse_propertyupdate(body).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(!ops[0].remove);
        assert_eq!(ops[0].prop.name, "color");
        assert_eq!(ops[0].prop.value, "red");
        assert!(ops[1].remove);
        assert_eq!(ops[1].prop.name, "speed");
        assert!(!ops[2].remove);
        assert_eq!(ops[2].prop.value, "4");
    }

    #[test]
    fn propertyupdate_preserves_escaped_text() {
        let body = br#"<D:propertyupdate xmlns:D="DAV:" xmlns:x="urn:example">
            <D:set><D:prop><x:note>a &amp; b &lt;ok&gt;</x:note></D:prop></D:set>
            </D:propertyupdate>"#;
        let ops = parse_propertyupdate(body).unwrap();
        assert_eq!(ops[0].prop.value, "a & b <ok>");
    }

    #[test]
    fn propertyupdate_rejects_empty_and_garbage() {
        assert!(parse_propertyupdate(b"").is_err());
        assert!(parse_propertyupdate(b"<wrongroot/>").is_err());
    }

    #[test]
    fn lockinfo_defaults() {
        let body = br#"<D:lockinfo xmlns:D="DAV:">
            <D:locktype><D:write/></D:locktype></D:lockinfo>"#;
        let req = parse_lockinfo(body).unwrap();
        assert_eq!(req.scope, LockScope::Exclusive);
        assert!(req.owner.is_none());
    }

    #[test]
    fn lockinfo_shared_with_owner_href() {
        let body = br#"<D:lockinfo xmlns:D="DAV:">
            <D:lockscope><D:shared/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
            <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
            </D:lockinfo>"#;
        let req = parse_lockinfo(body).unwrap();
        assert_eq!(req.scope, LockScope::Shared);
        assert_eq!(req.owner.as_deref(), Some("mailto:alice@example.com"));
    }

    #[test]
    fn lockinfo_garbage_rejected() {
        assert!(parse_lockinfo(b"<oops").is_err());
        assert!(parse_lockinfo(b"<x/>").is_err());
    }

    #[test]
    fn status_response_shape() {
        let xml = status_response("/dav/x", StatusCode::FORBIDDEN, Some("boom"));
        assert!(xml.contains("<D:href>/dav/x</D:href>"));
        assert!(xml.contains("<D:status>HTTP/1.1 403 Forbidden</D:status>"));
        assert!(xml.contains("<D:responsedescription>boom</D:responsedescription>"));
    }

    #[test]
    fn text_is_escaped_on_emission() {
        let mut ns = NsMap::new();
        let xml = propstat_response(
            "/dav/a",
            &[PropstatGroup {
                status: StatusCode::OK,
                props: vec![RenderedProp {
                    namespace: "urn:example".to_string(),
                    name: "note".to_string(),
                    content: PropContent::Text("a & b <ok>".to_string()),
                }],
            }],
            &mut ns,
        );
        assert!(xml.contains("a &amp; b &lt;ok&gt;"));
    }

    #[test]
    fn foreign_namespaces_get_sequential_prefixes() {
        let mut ns = NsMap::new();
        let xml = propstat_response(
            "/dav/a",
            &[PropstatGroup {
                status: StatusCode::OK,
                props: vec![
                    RenderedProp {
                        namespace: "urn:one".to_string(),
                        name: "p".to_string(),
                        content: PropContent::Empty,
                    },
                    RenderedProp {
                        namespace: "urn:two".to_string(),
                        name: "q".to_string(),
                        content: PropContent::Empty,
                    },
                    RenderedProp {
                        namespace: "urn:one".to_string(),
                        name: "r".to_string(),
                        content: PropContent::Empty,
                    },
                ],
            }],
            &mut ns,
        );
        assert!(xml.contains(r#"<ns0:p xmlns:ns0="urn:one"/>"#));
        assert!(xml.contains(r#"<ns1:q xmlns:ns1="urn:two"/>"#));
        assert!(xml.contains(r#"<ns0:r xmlns:ns0="urn:one"/>"#));
    }

    #[test]
    fn resourcetype_collection_rendering() {
        let mut ns = NsMap::new();
        let xml = propstat_response(
            "/dav/dir/",
            &[PropstatGroup {
                status: StatusCode::OK,
                props: vec![RenderedProp {
                    namespace: NS_DAV.to_string(),
                    name: "resourcetype".to_string(),
                    content: PropContent::ResourceTypeCollection,
                }],
            }],
            &mut ns,
        );
        assert!(xml.contains("<D:resourcetype><D:collection/></D:resourcetype>"));
    }

    #[test]
    fn lock_response_shape() {
        let lock = DavLock::new(
            "/f.txt",
            LockScope::Exclusive,
            Some("alice".to_string()),
            None,
            false,
        );
        let xml = lock_response_body(&lock, "/dav/f.txt");
        assert!(xml.contains("<D:lockdiscovery>"));
        assert!(xml.contains("<D:exclusive/>"));
        assert!(xml.contains("<D:depth>0</D:depth>"));
        assert!(xml.contains("<D:timeout>Infinite</D:timeout>"));
        assert!(xml.contains(&format!("<D:href>{}</D:href>", lock.token)));
        assert!(xml.contains("<D:lockroot><D:href>/dav/f.txt</D:href></D:lockroot>"));
    }
}
