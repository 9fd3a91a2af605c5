//! Request body rendering for PROPFIND and REPORT.

use crate::caldav::types::PropSpec;

pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// PROPFIND body requesting `props`. Properties outside `DAV:` are rendered
/// with an inline `xmlns` so no prefix bookkeeping is needed.
pub fn propfind_body(props: &[PropSpec]) -> String {
    let mut body =
        String::from(r#"<?xml version="1.0" encoding="utf-8" ?><propfind xmlns="DAV:"><prop>"#);
    for prop in props {
        match prop.namespace {
            None => {
                body.push('<');
                body.push_str(prop.name);
                body.push_str("/>");
            }
            Some(ns) => {
                body.push('<');
                body.push_str(prop.name);
                body.push_str(" xmlns=\"");
                body.push_str(ns);
                body.push_str("\"/>");
            }
        }
    }
    body.push_str("</prop></propfind>");
    body
}

/// calendar-query REPORT body around a comp-filter fragment. The requested
/// props are always calendar-data plus getetag, in that order.
pub fn calendar_query_body(filter_fragment: &str) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="utf-8" ?><C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><D:prop><C:calendar-data/><D:getetag/></D:prop><C:filter>"#,
    );
    body.push_str(filter_fragment);
    body.push_str("</C:filter></C:calendar-query>");
    body
}

/// calendar-multiget REPORT body for a set of hrefs. Empty hrefs are skipped;
/// `None` when nothing remains to ask for.
pub fn calendar_multiget_body<I, S>(hrefs: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut href_xml = String::new();
    for href in hrefs {
        let href = href.as_ref();
        if href.is_empty() {
            continue;
        }
        href_xml.push_str("<href>");
        href_xml.push_str(&encode_href(href));
        href_xml.push_str("</href>");
    }
    if href_xml.is_empty() {
        return None;
    }

    let mut body = String::from(
        r#"<?xml version="1.0" encoding="utf-8" ?><C:calendar-multiget xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><prop><getetag/><C:calendar-data/></prop>"#,
    );
    body.push_str(&href_xml);
    body.push_str("</C:calendar-multiget>");
    Some(body)
}

/// Percent-encode an href for a request body, keeping path separators intact.
pub(crate) fn encode_href(href: &str) -> String {
    urlencoding::encode(href).replace("%2F", "/")
}
