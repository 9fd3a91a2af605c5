use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode, Uri, header};
use std::collections::HashSet;
use std::time::Duration;

use crate::caldav::reader::{
    MultistatusReader, NS_APPLE_ICAL, NS_CALDAV, NS_CALSERVER, Tag, strip_etag_quotes,
};
use crate::caldav::types::{
    Calendar, Depth, PrincipalMatch, PropSpec, ReportEntry, rgba_to_rgb,
};
use crate::caldav::xml;
use crate::common::http::{DavRequest, DavResponse, DavTransport, HyperTransport};
use crate::error::{Error, RawExchange, Result, TransportError};

const CALENDAR_PROPS: [PropSpec; 5] = [
    PropSpec::dav("resourcetype"),
    PropSpec::dav("displayname"),
    PropSpec::ns(NS_CALSERVER, "getctag"),
    PropSpec::ns(NS_APPLE_ICAL, "calendar-color"),
    PropSpec::ns(NS_APPLE_ICAL, "calendar-order"),
];

/// CalDAV protocol client built on **hyper 1.x** + **rustls**.
///
/// Speaks the WebDAV verbs (OPTIONS, PROPFIND, REPORT, PROPPATCH) plus plain
/// GET/PUT/DELETE with etag preconditions, and walks the discovery chain
/// entry URL → principal → calendar-home-set → calendars.
///
/// One request is in flight at a time; every method takes `&mut self` and the
/// raw bytes of the most recent exchange are kept for diagnostics.
pub struct CalDavClient<T: DavTransport = HyperTransport> {
    base: Uri,
    transport: T,
    auth_header: Option<header::HeaderValue>,
    principal_url: Option<String>,
    calendar_home_set: Vec<String>,
    calendar_url: Option<String>,
    last_exchange: Option<RawExchange>,
}

impl CalDavClient<HyperTransport> {
    /// Create a client from a **base URL** (entry point or collection) and
    /// optional **Basic** credentials, with the default 10s request timeout.
    pub fn new(
        base_url: &str,
        basic_user: Option<&str>,
        basic_pass: Option<&str>,
    ) -> Result<Self> {
        Self::with_timeout(base_url, basic_user, basic_pass, Duration::from_secs(10))
    }

    pub fn with_timeout(
        base_url: &str,
        basic_user: Option<&str>,
        basic_pass: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Self::with_transport(
            HyperTransport::new(request_timeout),
            base_url,
            basic_user,
            basic_pass,
        )
    }
}

impl<T: DavTransport> CalDavClient<T> {
    /// Create a client over an arbitrary transport. This is how tests inject
    /// a scripted mock.
    pub fn with_transport(
        transport: T,
        base_url: &str,
        basic_user: Option<&str>,
        basic_pass: Option<&str>,
    ) -> Result<Self> {
        let base: Uri = base_url
            .parse()
            .map_err(|_| Error::InvalidUrl(base_url.to_string()))?;
        let auth_header = if let (Some(u), Some(p)) = (basic_user, basic_pass) {
            let token = format!("{u}:{p}");
            let val = format!("Basic {}", B64.encode(token));
            Some(header::HeaderValue::from_str(&val).map_err(|_| Error::InvalidCredentials)?)
        } else {
            None
        };

        Ok(Self {
            base,
            transport,
            auth_header,
            principal_url: None,
            calendar_home_set: Vec::new(),
            calendar_url: None,
            last_exchange: None,
        })
    }

    /// Raw bytes of the most recent request/response pair, if any round trip
    /// has completed or failed since construction.
    pub fn last_exchange(&self) -> Option<&RawExchange> {
        self.last_exchange.as_ref()
    }

    pub fn principal_url(&self) -> Option<&str> {
        self.principal_url.as_deref()
    }

    pub fn calendar_home_set(&self) -> &[String] {
        &self.calendar_home_set
    }

    /// Make `url` the target collection for queries and writes. A trailing
    /// slash is appended when missing so member hrefs concatenate cleanly.
    pub fn set_calendar(&mut self, url: &str) {
        let mut url = url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        self.calendar_url = Some(url);
    }

    /// Currently selected calendar collection, loud when none is selected.
    pub fn calendar_url(&self) -> Result<&str> {
        self.calendar_url
            .as_deref()
            .ok_or(Error::NoCalendarSelected)
    }

    pub fn build_uri(&self, path: &str) -> Result<Uri> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.parse().map_err(|_| Error::InvalidUrl(path.to_string()));
        }

        let mut parts = self.base.clone().into_parts();
        let existing_path = parts
            .path_and_query
            .as_ref()
            .map(|pq| pq.path())
            .unwrap_or("/");

        let mut combined = if path.is_empty() {
            existing_path.to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            let mut base = existing_path.trim_end_matches('/').to_string();
            base.push('/');
            base.push_str(path);
            base
        };

        if combined.is_empty() {
            combined.push('/');
        }

        parts.path_and_query = Some(
            combined
                .parse()
                .map_err(|_| Error::InvalidUrl(combined.clone()))?,
        );
        Uri::from_parts(parts).map_err(|_| Error::InvalidUrl(path.to_string()))
    }

    // ----------- one round trip -----------

    async fn send(
        &mut self,
        method: Method,
        path: &str,
        mut headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<DavResponse> {
        let uri = self.build_uri(path)?;
        if let Some(auth) = &self.auth_header {
            headers.insert(header::AUTHORIZATION, auth.clone());
        }
        if body.is_some() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/xml; charset=utf-8"),
            );
        }
        let body = body.unwrap_or_default();

        let mut exchange = RawExchange {
            method: method.to_string(),
            url: uri.to_string(),
            request_headers: format_headers(&headers),
            request_body: String::from_utf8_lossy(&body).into_owned(),
            ..RawExchange::default()
        };

        tracing::debug!(method = %method, url = %uri, "sending request");
        let request = DavRequest {
            method,
            uri,
            headers,
            body,
        };
        match self.transport.execute(request).await {
            Ok(response) => {
                exchange.status = Some(response.status.as_u16());
                exchange.response_headers = format_headers(&response.headers);
                exchange.response_body = String::from_utf8_lossy(&response.body).into_owned();
                tracing::debug!(status = response.status.as_u16(), "received response");
                self.last_exchange = Some(exchange);
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(error = %err, "transport failure");
                self.last_exchange = Some(exchange);
                Err(Error::Connection(err))
            }
        }
    }

    pub(crate) fn protocol_error(&self, status: u16) -> Error {
        Error::Protocol {
            status,
            exchange: Box::new(self.last_exchange.clone().unwrap_or_default()),
        }
    }

    fn check_status(&self, response: &DavResponse, expected: &[u16]) -> Result<()> {
        let code = response.status.as_u16();
        if code == 401 {
            return Err(Error::Authentication);
        }
        if expected.contains(&code) {
            return Ok(());
        }
        Err(self.protocol_error(code))
    }

    // ----------- verbs -----------

    pub async fn options(&mut self, path: &str) -> Result<DavResponse> {
        self.send(Method::OPTIONS, path, HeaderMap::new(), None).await
    }

    pub async fn propfind(
        &mut self,
        path: &str,
        props: &[PropSpec],
        depth: Depth,
    ) -> Result<MultistatusReader> {
        let mut headers = HeaderMap::new();
        headers.insert("Depth", header::HeaderValue::from_static(depth.as_str()));
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/xml"),
        );
        let body = xml::propfind_body(props);
        let response = self
            .send(dav_method(b"PROPFIND")?, path, headers, Some(Bytes::from(body)))
            .await?;
        self.check_status(&response, &[207])?;
        Ok(MultistatusReader::parse(&response.body))
    }

    pub async fn report(
        &mut self,
        path: &str,
        depth: Option<Depth>,
        xml_body: String,
    ) -> Result<DavResponse> {
        let mut headers = HeaderMap::new();
        if let Some(depth) = depth {
            headers.insert("Depth", header::HeaderValue::from_static(depth.as_str()));
        }
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/xml"),
        );
        self.send(dav_method(b"REPORT")?, path, headers, Some(Bytes::from(xml_body)))
            .await
    }

    /// PROPPATCH with a caller-supplied `propertyupdate` body. A 2xx with a
    /// propstat rejection inside still fails, carrying the propstat status.
    pub async fn proppatch(&mut self, path: &str, xml_body: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/xml"),
        );
        let response = self
            .send(
                dav_method(b"PROPPATCH")?,
                path,
                headers,
                Some(Bytes::from(xml_body.to_string())),
            )
            .await?;
        match response.status.as_u16() {
            207 => {
                let report = MultistatusReader::parse(&response.body);
                match report.failed_propstat_status() {
                    Some(status) => Err(Error::PropertyUpdateRejected { status }),
                    None => Ok(()),
                }
            }
            200 => Ok(()),
            401 => Err(Error::Authentication),
            code => Err(self.protocol_error(code)),
        }
    }

    // ----------- capability probing -----------

    /// OPTIONS against the entry URL; true when the DAV header advertises the
    /// `calendar-access` compliance class.
    pub async fn is_valid_caldav_server(&mut self) -> Result<bool> {
        let response = self.options("").await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication);
        }
        Ok(dav_tokens(&response.headers)
            .iter()
            .any(|token| token == "calendar-access"))
    }

    /// HTTP methods the entry URL advertises in its Allow header.
    pub async fn supported_methods(&mut self) -> Result<Vec<String>> {
        let response = self.options("").await?;
        self.check_status(&response, &[200, 204])?;
        Ok(response
            .headers
            .get_all(header::ALLOW)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect())
    }

    // ----------- discovery -----------

    /// Resolve the principal URL for the authenticated user.
    ///
    /// A href typed `principal` in the resourcetype wins; otherwise the first
    /// of current-user-principal, principal-URL, owner that yields one.
    pub async fn find_principal(&mut self) -> Result<Option<String>> {
        let props = [
            PropSpec::dav("resourcetype"),
            PropSpec::dav("current-user-principal"),
            PropSpec::dav("owner"),
            PropSpec::dav("principal-URL"),
            PropSpec::ns(NS_CALDAV, "calendar-home-set"),
        ];
        let report = self.propfind("", &props, Depth::One).await?;
        let principal = report
            .href_for_resourcetype(&Tag::Principal, 0)
            .or_else(|| report.first_href_inside(&Tag::CurrentUserPrincipal))
            .or_else(|| report.first_href_inside(&Tag::PrincipalUrl))
            .or_else(|| report.first_href_inside(&Tag::Owner));
        if let Some(url) = &principal {
            tracing::debug!(principal = %url, "resolved principal URL");
        }
        self.principal_url = principal.clone();
        Ok(principal)
    }

    /// Resolve the calendar-home-set. First attempt asks the entry URL; when
    /// that yields nothing the principal URL is asked once. Both failing
    /// leaves the home set empty rather than erroring.
    pub async fn find_calendar_home(&mut self) -> Result<Vec<String>> {
        let props = [PropSpec::ns(NS_CALDAV, "calendar-home-set")];
        let report = self.propfind("", &props, Depth::Zero).await?;
        let mut homes = report.hrefs_inside(&Tag::CalendarHomeSet);

        if homes.is_empty() {
            if self.principal_url.is_none() {
                self.find_principal().await?;
            }
            if let Some(principal) = self.principal_url.clone() {
                let report = self.propfind(&principal, &props, Depth::Zero).await?;
                homes = report.hrefs_inside(&Tag::CalendarHomeSet);
            }
        }

        self.calendar_home_set = homes.clone();
        Ok(homes)
    }

    /// List the calendar collections under the first calendar home.
    ///
    /// Runs discovery as needed. Only hrefs whose resourcetype carries the
    /// `calendar` marker inside a 200-OK propstat are materialized.
    pub async fn find_calendars(&mut self) -> Result<Vec<Calendar>> {
        if self.calendar_home_set.is_empty() {
            self.find_calendar_home().await?;
        }
        let Some(home) = self.calendar_home_set.first().cloned() else {
            tracing::warn!("no calendar-home-set resolved; nothing to enumerate");
            return Ok(Vec::new());
        };
        let report = self.propfind(&home, &CALENDAR_PROPS, Depth::One).await?;
        Ok(parse_calendar_info(&report))
    }

    /// Depth-0 PROPFIND of one collection, e.g. to re-read its ctag.
    pub async fn calendar_details(&mut self, url: &str) -> Result<Option<Calendar>> {
        let report = self.propfind(url, &CALENDAR_PROPS, Depth::Zero).await?;
        Ok(parse_calendar_info(&report).into_iter().next())
    }

    /// `(href, etag)` for every member of a collection, Depth 1.
    pub async fn collection_etags(&mut self, url: &str) -> Result<Vec<(String, String)>> {
        let report = self
            .propfind(url, &[PropSpec::dav("getetag")], Depth::One)
            .await?;
        let mut etags = Vec::new();
        for occurrence in 0..report.count(&Tag::Getetag) {
            if let Some(href) = report.href_for_prop(&Tag::Getetag, occurrence)
                && let Some(value) = report.occurrence_text(&Tag::Getetag, occurrence)
            {
                etags.push((href, strip_etag_quotes(&value).to_string()));
            }
        }
        Ok(etags)
    }

    // ----------- calendar REPORTs -----------

    /// calendar-query REPORT against the selected calendar.
    pub async fn calendar_query(&mut self, filter_fragment: &str) -> Result<Vec<ReportEntry>> {
        let url = self.calendar_url()?.to_string();
        let body = xml::calendar_query_body(filter_fragment);
        let response = self.report(&url, Some(Depth::One), body).await?;
        self.check_status(&response, &[207])?;
        Ok(MultistatusReader::parse(&response.body).report_entries())
    }

    /// calendar-multiget REPORT for specific hrefs against the selected
    /// calendar. An empty href set short-circuits to an empty result.
    pub async fn calendar_multiget<I, S>(&mut self, hrefs: I) -> Result<Vec<ReportEntry>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let url = self.calendar_url()?.to_string();
        let Some(body) = xml::calendar_multiget_body(hrefs) else {
            return Ok(Vec::new());
        };
        let response = self.report(&url, Some(Depth::One), body).await?;
        self.check_status(&response, &[207])?;
        Ok(MultistatusReader::parse(&response.body).report_entries())
    }

    /// principal-property-search REPORT with a caller-supplied body; yields
    /// href + displayname + email per matching principal.
    pub async fn principal_property_search(
        &mut self,
        path: &str,
        xml_body: &str,
    ) -> Result<Vec<PrincipalMatch>> {
        let response = self.report(path, None, xml_body.to_string()).await?;
        self.check_status(&response, &[200, 207])?;
        let report = MultistatusReader::parse(&response.body);
        let mut matches = Vec::new();
        for (idx, href) in report.href_nodes() {
            let mut item = PrincipalMatch {
                href: Some(href),
                ..PrincipalMatch::default()
            };
            for prop in report.ok_props(idx) {
                match prop.tag {
                    Tag::Displayname => {
                        item.display_name = prop.text.map(|t| t.trim().to_string());
                    }
                    Tag::Email => {
                        item.email = prop.text.map(|t| t.trim().to_string());
                    }
                    _ => {}
                }
            }
            matches.push(item);
        }
        Ok(matches)
    }

    // ----------- resource operations -----------

    /// GET one resource. `None` on 404; otherwise `(data, etag)` where the
    /// etag comes from the response header, completed by a HEAD when absent.
    pub async fn get_entry_by_href(
        &mut self,
        href: &str,
    ) -> Result<Option<(String, Option<String>)>> {
        let response = self.send(Method::GET, href, HeaderMap::new(), None).await?;
        match response.status.as_u16() {
            404 => Ok(None),
            401 => Err(Error::Authentication),
            200 => {
                let data = String::from_utf8_lossy(&response.body).into_owned();
                let etag = self.resolve_etag(&response.headers, href).await?;
                Ok(Some((data, etag)))
            }
            code => Err(self.protocol_error(code)),
        }
    }

    /// PUT a resource. With `etag` the write carries If-Match and a server
    /// 412 maps to [`Error::StalePrecondition`]. Returns the response status
    /// plus the resulting etag (header, completed by HEAD when absent).
    pub async fn put_resource(
        &mut self,
        href: &str,
        ical: &str,
        etag: Option<&str>,
    ) -> Result<(u16, Option<String>)> {
        let mut headers = HeaderMap::new();
        if let Some(etag) = etag {
            headers.insert(header::IF_MATCH, if_match_value(etag)?);
        }
        let response = self.put(href, ical, headers).await?;
        let status = response.status.as_u16();
        match status {
            401 => Err(Error::Authentication),
            412 => Err(Error::StalePrecondition {
                href: href.to_string(),
            }),
            200..=299 => {
                let etag = self.resolve_etag(&response.headers, href).await?;
                Ok((status, etag))
            }
            _ => Ok((status, None)),
        }
    }

    /// PUT that must create. `If-None-Match: *` makes a conforming server
    /// refuse to overwrite an existing resource, so a 412 here means the
    /// target already exists.
    pub async fn put_if_absent(
        &mut self,
        href: &str,
        ical: &str,
    ) -> Result<(u16, Option<String>)> {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, header::HeaderValue::from_static("*"));
        let response = self.put(href, ical, headers).await?;
        let status = response.status.as_u16();
        match status {
            401 => Err(Error::Authentication),
            412 => Err(Error::AlreadyExists {
                href: href.to_string(),
            }),
            200..=299 => {
                let etag = self.resolve_etag(&response.headers, href).await?;
                Ok((status, etag))
            }
            _ => Ok((status, None)),
        }
    }

    async fn put(
        &mut self,
        href: &str,
        ical: &str,
        mut headers: HeaderMap,
    ) -> Result<DavResponse> {
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/calendar; encoding=\"utf-8\""),
        );
        self.send(Method::PUT, href, headers, Some(Bytes::from(ical.to_string())))
            .await
    }

    /// DELETE a resource, with If-Match when `etag` is supplied.
    pub async fn delete_resource(&mut self, href: &str, etag: Option<&str>) -> Result<u16> {
        let mut headers = HeaderMap::new();
        if let Some(etag) = etag {
            headers.insert(header::IF_MATCH, if_match_value(etag)?);
        }
        let response = self.send(Method::DELETE, href, headers, None).await?;
        match response.status.as_u16() {
            401 => Err(Error::Authentication),
            412 => Err(Error::StalePrecondition {
                href: href.to_string(),
            }),
            code => Ok(code),
        }
    }

    /// Etag from the headers of a just-completed exchange; some servers omit
    /// it, in which case a HEAD completes the data. The extra round trip must
    /// not clobber the diagnostic snapshot of the primary exchange.
    async fn resolve_etag(
        &mut self,
        headers: &HeaderMap,
        href: &str,
    ) -> Result<Option<String>> {
        if let Some(etag) = etag_from_headers(headers) {
            return Ok(Some(etag));
        }
        let saved = self.last_exchange.take();
        let outcome = self.send(Method::HEAD, href, HeaderMap::new(), None).await;
        self.last_exchange = saved;
        let response = outcome?;
        Ok(etag_from_headers(&response.headers))
    }
}

impl<T: DavTransport> std::fmt::Debug for CalDavClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalDavClient")
            .field("base", &self.base)
            .field("principal_url", &self.principal_url)
            .field("calendar_home_set", &self.calendar_home_set)
            .field("calendar_url", &self.calendar_url)
            .finish_non_exhaustive()
    }
}

fn parse_calendar_info(report: &MultistatusReader) -> Vec<Calendar> {
    let mut calendar_urls = HashSet::new();
    for occurrence in 0..report.count(&Tag::Calendar) {
        if let Some(href) = report.href_for_resourcetype(&Tag::Calendar, occurrence) {
            calendar_urls.insert(href);
        }
    }

    let mut calendars = Vec::new();
    for (idx, href) in report.href_nodes() {
        if !calendar_urls.contains(&href) {
            continue;
        }
        let mut calendar = Calendar::new(href);
        for prop in report.ok_props(idx) {
            let Some(text) = prop.text else { continue };
            let text = text.trim();
            match prop.tag {
                Tag::Getctag => calendar.ctag = Some(text.to_string()),
                Tag::Displayname => calendar.display_name = Some(text.to_string()),
                Tag::CalendarColor => calendar.color = Some(rgba_to_rgb(text)),
                Tag::CalendarOrder => calendar.order = Some(text.to_string()),
                _ => {}
            }
        }
        calendars.push(calendar);
    }
    calendars
}

fn dav_method(name: &'static [u8]) -> Result<Method> {
    Method::from_bytes(name).map_err(|err| {
        Error::Connection(TransportError::InvalidRequest(hyper::http::Error::from(err)))
    })
}

/// One `name: value` line per header, for the diagnostic snapshot. The
/// Authorization value carries credentials and is never recorded.
fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        if name == header::AUTHORIZATION {
            out.push_str("<redacted>");
        } else {
            out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        }
        out.push('\n');
    }
    out
}

fn dav_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("DAV")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split([',', ' ']))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn etag_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(|value| strip_etag_quotes(value).to_string())
}

fn if_match_value(etag: &str) -> Result<header::HeaderValue> {
    let quoted = format!("\"{}\"", strip_etag_quotes(etag));
    header::HeaderValue::from_str(&quoted).map_err(|_| Error::InvalidEtag {
        etag: etag.to_string(),
    })
}
