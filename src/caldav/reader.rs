//! Flat-sequence multistatus parsing.
//!
//! A 207 body is materialized as an ordered `Vec<XmlNode>` rather than a DOM.
//! Every query below is a linear scan over that sequence: backward to find
//! the href owning a property, forward to collect the props of a 200-OK
//! propstat block. Namespace resolution happens once, at the parse boundary,
//! so the scans only ever compare [`Tag`] values.

use quick_xml::NsReader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;

use crate::caldav::types::ReportEntry;

pub const NS_DAV: &str = "DAV:";
pub const NS_CALDAV: &str = "urn:ietf:params:xml:ns:caldav";
pub const NS_CALSERVER: &str = "http://calendarserver.org/ns/";
pub const NS_APPLE_ICAL: &str = "http://apple.com/ns/ical/";

/// How an element appears in the flat sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Element with child elements: opening marker.
    Open,
    /// Leaf element, optionally carrying text.
    Complete,
    /// Closing marker paired with an earlier [`NodeKind::Open`].
    Close,
}

/// Recognized property kinds, resolved from namespace + local name.
///
/// Local names match case-insensitively; anything unrecognized is kept as
/// [`Tag::Other`] so the flat sequence stays complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Multistatus,
    Response,
    Propstat,
    Prop,
    Href,
    Status,
    Resourcetype,
    Collection,
    Calendar,
    Principal,
    Displayname,
    Getetag,
    CalendarData,
    CalendarHomeSet,
    CurrentUserPrincipal,
    PrincipalUrl,
    Owner,
    Getctag,
    CalendarColor,
    CalendarOrder,
    Email,
    Other(String),
}

fn resolve_tag(namespace: Option<&[u8]>, local: &[u8]) -> Tag {
    let local_lower = local.to_ascii_lowercase();
    match local_lower.as_slice() {
        b"multistatus" => Tag::Multistatus,
        b"response" => Tag::Response,
        b"propstat" => Tag::Propstat,
        b"prop" => Tag::Prop,
        b"href" => Tag::Href,
        b"status" => Tag::Status,
        b"resourcetype" => Tag::Resourcetype,
        b"collection" => Tag::Collection,
        b"calendar" => Tag::Calendar,
        b"principal" => Tag::Principal,
        b"displayname" => Tag::Displayname,
        b"getetag" => Tag::Getetag,
        b"calendar-data" => Tag::CalendarData,
        b"calendar-home-set" => Tag::CalendarHomeSet,
        b"current-user-principal" => Tag::CurrentUserPrincipal,
        b"principal-url" => Tag::PrincipalUrl,
        b"owner" => Tag::Owner,
        b"getctag" => Tag::Getctag,
        b"calendar-color" => Tag::CalendarColor,
        b"calendar-order" => Tag::CalendarOrder,
        b"email" | b"email-address" => Tag::Email,
        _ => {
            let ns = namespace
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .unwrap_or_default();
            Tag::Other(format!("{ns}:{}", String::from_utf8_lossy(&local_lower)))
        }
    }
}

/// One entry of the flat node sequence.
#[derive(Debug, Clone)]
pub struct XmlNode {
    pub tag: Tag,
    pub kind: NodeKind,
    /// Nesting depth, root element at 1.
    pub level: usize,
    /// Character data for [`NodeKind::Complete`] leaves; whitespace-only
    /// content is dropped, everything else is kept verbatim so that
    /// calendar-data survives byte-for-byte.
    pub text: Option<String>,
}

struct PendingElement {
    tag: Tag,
    level: usize,
    text: String,
    opened: bool,
}

/// Ordered, flattened view of a 207 multistatus body.
pub struct MultistatusReader {
    nodes: Vec<XmlNode>,
}

impl MultistatusReader {
    /// Parse a response body into the flat sequence.
    ///
    /// Malformed XML never fails the call: parsing stops at the first error,
    /// a warning is emitted, and queries run over whatever was materialized
    /// up to that point.
    pub fn parse(body: &[u8]) -> Self {
        let mut reader = NsReader::from_reader(body);
        reader.config_mut().trim_text(false);

        let mut nodes = Vec::new();
        let mut stack: Vec<PendingElement> = Vec::new();
        let mut buf = Vec::with_capacity(8 * 1024);

        loop {
            match reader.read_resolved_event_into(&mut buf) {
                Ok((ns, Event::Start(e))) => {
                    let tag = resolve_tag(ns_bytes(&ns), e.local_name().as_ref());
                    flush_open(&mut nodes, &mut stack);
                    let level = stack.len() + 1;
                    stack.push(PendingElement {
                        tag,
                        level,
                        text: String::new(),
                        opened: false,
                    });
                }
                Ok((ns, Event::Empty(e))) => {
                    let tag = resolve_tag(ns_bytes(&ns), e.local_name().as_ref());
                    flush_open(&mut nodes, &mut stack);
                    nodes.push(XmlNode {
                        tag,
                        kind: NodeKind::Complete,
                        level: stack.len() + 1,
                        text: None,
                    });
                }
                Ok((_, Event::Text(e))) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&decode_text(e.as_ref()));
                    }
                }
                Ok((_, Event::CData(e))) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok((_, Event::End(_))) => {
                    if let Some(pending) = stack.pop() {
                        if pending.opened {
                            nodes.push(XmlNode {
                                tag: pending.tag,
                                kind: NodeKind::Close,
                                level: pending.level,
                                text: None,
                            });
                        } else {
                            let text = if pending.text.trim().is_empty() {
                                None
                            } else {
                                Some(pending.text)
                            };
                            nodes.push(XmlNode {
                                tag: pending.tag,
                                kind: NodeKind::Complete,
                                level: pending.level,
                                text,
                            });
                        }
                    }
                }
                Ok((_, Event::Eof)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "malformed multistatus body; keeping nodes parsed so far");
                    break;
                }
            }
            buf.clear();
        }

        Self { nodes }
    }

    pub fn nodes(&self) -> &[XmlNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of Open/Complete occurrences of `tag`.
    pub fn count(&self, tag: &Tag) -> usize {
        self.occurrences(tag).count()
    }

    /// Text of the `occurrence`-th appearance of `tag`, if it carries any.
    pub fn occurrence_text(&self, tag: &Tag, occurrence: usize) -> Option<String> {
        let idx = self.occurrences(tag).nth(occurrence)?;
        self.nodes[idx].text.clone()
    }

    /// Href nested directly inside the first matching occurrence of `tag`,
    /// e.g. the principal URL inside `current-user-principal`.
    pub fn first_href_inside(&self, tag: &Tag) -> Option<String> {
        for idx in self.occurrences(tag) {
            if let Some(next) = self.nodes.get(idx + 1)
                && next.tag == Tag::Href
                && let Some(text) = next.text.as_deref()
            {
                return Some(decode_href(text));
            }
        }
        None
    }

    /// Every href nested anywhere inside occurrences of `tag`, in order.
    pub fn hrefs_inside(&self, tag: &Tag) -> Vec<String> {
        let mut out = Vec::new();
        let mut idx = 0;
        while idx < self.nodes.len() {
            let node = &self.nodes[idx];
            if node.tag == *tag && node.kind == NodeKind::Open {
                idx += 1;
                while idx < self.nodes.len() {
                    let inner = &self.nodes[idx];
                    if inner.tag == *tag && inner.kind == NodeKind::Close {
                        break;
                    }
                    if inner.tag == Tag::Href
                        && let Some(text) = inner.text.as_deref()
                    {
                        out.push(decode_href(text));
                    }
                    idx += 1;
                }
            }
            idx += 1;
        }
        out
    }

    /// Resource href owning the `occurrence`-th appearance of `tag`.
    ///
    /// Scans backward from the property; a status node that is not
    /// "HTTP/1.1 200 OK" on the way aborts the lookup, so a property inside a
    /// failed propstat block is never attributed to its response href.
    pub fn href_for_prop(&self, tag: &Tag, occurrence: usize) -> Option<String> {
        let idx = self.occurrences(tag).nth(occurrence)?;
        for node in self.nodes[..idx].iter().rev() {
            match &node.tag {
                Tag::Href => return node.text.as_deref().map(decode_href),
                Tag::Status => {
                    if !status_is_ok(node.text.as_deref()) {
                        return None;
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Like [`href_for_prop`](Self::href_for_prop) but for markers nested
    /// inside `resourcetype` (calendar, principal): first hop back to the
    /// enclosing resourcetype, then to the nearest preceding href. The same
    /// status-abort applies, so a marker inside a failed propstat block is
    /// never attributed.
    pub fn href_for_resourcetype(&self, tag: &Tag, occurrence: usize) -> Option<String> {
        let idx = self.occurrences(tag).nth(occurrence)?;
        let mut seen_resourcetype = false;
        for node in self.nodes[..idx].iter().rev() {
            match &node.tag {
                Tag::Resourcetype => seen_resourcetype = true,
                Tag::Href if seen_resourcetype => {
                    return node.text.as_deref().map(decode_href);
                }
                Tag::Status => {
                    if !status_is_ok(node.text.as_deref()) {
                        return None;
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Property nodes of the first propstat block with a 200-OK status,
    /// scanning forward from the href node at `href_index`. Blocks whose
    /// status is not OK contribute nothing.
    pub fn ok_props(&self, href_index: usize) -> Vec<XmlNode> {
        let Some(anchor) = self.nodes.get(href_index) else {
            return Vec::new();
        };
        let level = anchor.level;
        let mut candidate: Option<Vec<XmlNode>> = None;
        let mut status_ok = false;

        for node in &self.nodes[href_index + 1..] {
            if node.level < level {
                break;
            }
            match (&node.tag, node.kind) {
                (Tag::Propstat, NodeKind::Open) => {
                    candidate = Some(Vec::new());
                    status_ok = false;
                }
                (Tag::Propstat, NodeKind::Close) => {
                    if status_ok && let Some(props) = candidate.take() {
                        return props;
                    }
                    candidate = None;
                }
                (Tag::Status, _) => {
                    status_ok = status_is_ok(node.text.as_deref());
                }
                _ => {
                    if let Some(props) = candidate.as_mut() {
                        props.push(node.clone());
                    }
                }
            }
        }
        Vec::new()
    }

    /// Indices and decoded values of every href leaf, in document order.
    pub fn href_nodes(&self) -> impl Iterator<Item = (usize, String)> + '_ {
        self.nodes.iter().enumerate().filter_map(|(idx, node)| {
            if node.tag == Tag::Href && node.kind != NodeKind::Close {
                node.text.as_deref().map(|t| (idx, decode_href(t)))
            } else {
                None
            }
        })
    }

    /// Per-response `{href, etag, data}` entries of a REPORT result, in
    /// server order.
    pub fn report_entries(&self) -> Vec<ReportEntry> {
        let mut entries = Vec::new();
        let mut current: Option<ReportEntry> = None;

        for node in &self.nodes {
            match (&node.tag, node.kind) {
                (Tag::Response, NodeKind::Open) => {
                    current = Some(ReportEntry::default());
                }
                (Tag::Response, NodeKind::Close) => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                (Tag::Href, _) => {
                    if let (Some(entry), Some(text)) = (current.as_mut(), node.text.as_deref()) {
                        entry.href = basename(&decode_href(text));
                    }
                }
                (Tag::Getetag, _) => {
                    if let (Some(entry), Some(text)) = (current.as_mut(), node.text.as_deref()) {
                        entry.etag = Some(strip_etag_quotes(text).to_string());
                    }
                }
                (Tag::CalendarData, _) => {
                    if let (Some(entry), Some(text)) = (current.as_mut(), node.text.as_deref()) {
                        entry.data = Some(text.to_string());
                    }
                }
                _ => {}
            }
        }
        entries
    }

    /// Status line of the first propstat block that did not come back 200 OK,
    /// for surfacing PROPPATCH rejections.
    pub fn failed_propstat_status(&self) -> Option<String> {
        let mut inside = 0usize;
        for node in &self.nodes {
            match (&node.tag, node.kind) {
                (Tag::Propstat, NodeKind::Open) => inside += 1,
                (Tag::Propstat, NodeKind::Close) => inside = inside.saturating_sub(1),
                (Tag::Status, _) if inside > 0 => {
                    if !status_is_ok(node.text.as_deref()) {
                        return Some(node.text.clone().unwrap_or_default());
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn occurrences<'a>(&'a self, tag: &'a Tag) -> impl Iterator<Item = usize> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.kind != NodeKind::Close && node.tag == *tag)
            .map(|(idx, _)| idx)
    }
}

fn flush_open(nodes: &mut Vec<XmlNode>, stack: &mut [PendingElement]) {
    if let Some(parent) = stack.last_mut()
        && !parent.opened
    {
        nodes.push(XmlNode {
            tag: parent.tag.clone(),
            kind: NodeKind::Open,
            level: parent.level,
            text: None,
        });
        parent.opened = true;
    }
}

fn ns_bytes<'n>(ns: &ResolveResult<'n>) -> Option<&'n [u8]> {
    match ns {
        ResolveResult::Bound(namespace) => Some(namespace.0),
        _ => None,
    }
}

fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => unescape(text)
            .map(|cow| cow.into_owned())
            .unwrap_or_else(|_| text.to_string()),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

fn status_is_ok(text: Option<&str>) -> bool {
    text.is_some_and(|t| t.trim().ends_with("200 OK"))
}

fn decode_href(raw: &str) -> String {
    let trimmed = raw.trim();
    urlencoding::decode(trimmed)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| trimmed.to_string())
}

fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

pub(crate) fn strip_etag_quotes(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}
