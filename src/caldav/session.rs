//! High-level session over the protocol client.
//!
//! The session front-loads the capability check at connect time and keeps
//! the create/change/delete workflows honest: every write is preceded by an
//! existence check, and changes and etag-carrying deletes compare a freshly
//! read etag before touching the server.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::caldav::client::CalDavClient;
use crate::caldav::filter::{self, ComponentKind, Filter};
use crate::caldav::reader::strip_etag_quotes;
use crate::caldav::types::{Calendar, CalendarResource};
use crate::common::http::{DavTransport, HyperTransport};
use crate::error::{Error, RawExchange, Result};

static UID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^UID:(.*?)\r?$").expect("Invalid UID regex"));

/// Connected CalDAV session bound to one server.
pub struct CalDavSession<T: DavTransport = HyperTransport> {
    client: CalDavClient<T>,
}

impl CalDavSession<HyperTransport> {
    /// Connect to a CalDAV server with the default 10s request timeout.
    ///
    /// Fails with [`Error::Authentication`] on a 401, [`Error::Connection`]
    /// when the server is unreachable, and [`Error::NotCalDav`] when the
    /// OPTIONS response does not advertise `calendar-access`.
    pub async fn connect(
        url: &str,
        basic_user: Option<&str>,
        basic_pass: Option<&str>,
    ) -> Result<Self> {
        Self::connect_with(
            HyperTransport::new(Duration::from_secs(10)),
            url,
            basic_user,
            basic_pass,
        )
        .await
    }
}

impl<T: DavTransport> CalDavSession<T> {
    /// Connect over an arbitrary transport; tests use this with a scripted
    /// mock.
    pub async fn connect_with(
        transport: T,
        url: &str,
        basic_user: Option<&str>,
        basic_pass: Option<&str>,
    ) -> Result<Self> {
        let mut client = CalDavClient::with_transport(transport, url, basic_user, basic_pass)?;
        if !client.is_valid_caldav_server().await? {
            return Err(Error::NotCalDav);
        }
        Ok(Self { client })
    }

    /// Enumerate the calendars of the authenticated user, running principal
    /// and home-set discovery as needed.
    pub async fn find_calendars(&mut self) -> Result<Vec<Calendar>> {
        self.client.find_calendars().await
    }

    /// Make `calendar` the target of subsequent queries and writes.
    pub fn select_calendar(&mut self, calendar: &Calendar) {
        self.client.set_calendar(&calendar.url);
    }

    /// The underlying protocol client, for operations the facade does not
    /// wrap (PROPPATCH, collection etags, principal searches).
    pub fn client(&mut self) -> &mut CalDavClient<T> {
        &mut self.client
    }

    /// Raw bytes of the most recent request/response pair.
    pub fn last_exchange(&self) -> Option<&RawExchange> {
        self.client.last_exchange()
    }

    // ----------- writes -----------

    /// Create a new resource from raw iCalendar data.
    ///
    /// The first `UID:` line names the target (`<uid>.ics` under the selected
    /// calendar). The target must not exist yet: a pre-flight GET finding it,
    /// or the server answering the PUT with 204 instead of 201, both fail
    /// with [`Error::AlreadyExists`].
    pub async fn create(&mut self, ical: &str) -> Result<CalendarResource> {
        let uid = extract_uid(ical).ok_or(Error::MissingUid)?;
        let href = format!("{}{uid}.ics", self.client.calendar_url()?);

        if self.client.get_entry_by_href(&href).await?.is_some() {
            return Err(Error::AlreadyExists { href });
        }

        let (status, etag) = self.client.put_resource(&href, ical, None).await?;
        match status {
            201 => Ok(CalendarResource {
                href,
                data: ical.to_string(),
                etag,
            }),
            204 => Err(Error::AlreadyExists { href }),
            code => Err(self.client.protocol_error(code)),
        }
    }

    /// Overwrite an existing resource, guarded by the etag it was read at.
    ///
    /// The current server-side etag is fetched first; a mismatch fails with
    /// [`Error::StalePrecondition`] before anything is written, and the PUT
    /// itself still carries If-Match for the window in between.
    pub async fn change(
        &mut self,
        href: &str,
        new_data: &str,
        etag: &str,
    ) -> Result<CalendarResource> {
        self.client.calendar_url()?;
        let Some((_, current)) = self.client.get_entry_by_href(href).await? else {
            return Err(Error::NotFound {
                href: href.to_string(),
            });
        };
        if current.as_deref() != Some(strip_etag_quotes(etag)) {
            return Err(Error::StalePrecondition {
                href: href.to_string(),
            });
        }

        let (status, new_etag) = self.client.put_resource(href, new_data, Some(etag)).await?;
        match status {
            200 | 204 => Ok(CalendarResource {
                href: href.to_string(),
                data: new_data.to_string(),
                etag: new_etag,
            }),
            code => Err(self.client.protocol_error(code)),
        }
    }

    /// Delete a resource. With `etag` the same freshness check as
    /// [`change`](Self::change) applies; without it the delete is
    /// unconditional (last writer wins).
    pub async fn delete(&mut self, href: &str, etag: Option<&str>) -> Result<()> {
        self.client.calendar_url()?;
        let Some((_, current)) = self.client.get_entry_by_href(href).await? else {
            return Err(Error::NotFound {
                href: href.to_string(),
            });
        };
        if let Some(expected) = etag
            && current.as_deref() != Some(strip_etag_quotes(expected))
        {
            return Err(Error::StalePrecondition {
                href: href.to_string(),
            });
        }

        let status = self.client.delete_resource(href, etag).await?;
        match status {
            200 | 204 => Ok(()),
            code => Err(self.client.protocol_error(code)),
        }
    }

    // ----------- queries -----------

    /// All events of the selected calendar, optionally limited to those
    /// overlapping `[start, end]` (`yyyymmddThhmmssZ`, either bound open).
    pub async fn get_events(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<CalendarResource>> {
        let mut filter = Filter::new(ComponentKind::Event);
        if start.is_some() || end.is_some() {
            filter = filter.must_overlap_timerange(start, end)?;
        }
        self.run_report(&filter.to_xml()).await
    }

    /// Todos of the selected calendar. `completed`/`cancelled` filter on the
    /// STATUS property three ways each: require, exclude, or don't care.
    pub async fn get_todos(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
        completed: Option<bool>,
        cancelled: Option<bool>,
    ) -> Result<Vec<CalendarResource>> {
        let mut filter = Filter::new(ComponentKind::Todo);
        if let Some(completed) = completed {
            filter = filter.must_match_substring("STATUS", "COMPLETED", !completed);
        }
        if let Some(cancelled) = cancelled {
            filter = filter.must_match_substring("STATUS", "CANCELLED", !cancelled);
        }
        if start.is_some() || end.is_some() {
            filter = filter.must_overlap_timerange(start, end)?;
        }
        self.run_report(&filter.to_xml()).await
    }

    /// calendar-query with a caller-built [`Filter`].
    pub async fn get_custom_report(&mut self, filter: &Filter) -> Result<Vec<CalendarResource>> {
        self.run_report(&filter.to_xml()).await
    }

    /// Look up a single resource by its UID property, byte-exact.
    pub async fn get_resource_by_uid(&mut self, uid: &str) -> Result<Option<CalendarResource>> {
        let mut found = self.run_report(&filter::uid_filter(uid)).await?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.remove(0)))
        }
    }

    /// Fetch one resource by href; `None` when the server says 404.
    pub async fn get_resource_by_href(&mut self, href: &str) -> Result<Option<CalendarResource>> {
        match self.client.get_entry_by_href(href).await? {
            Some((data, etag)) => Ok(Some(CalendarResource {
                href: href.to_string(),
                data,
                etag,
            })),
            None => Ok(None),
        }
    }

    async fn run_report(&mut self, filter_fragment: &str) -> Result<Vec<CalendarResource>> {
        let base = self.client.calendar_url()?.to_string();
        let entries = self.client.calendar_query(filter_fragment).await?;
        Ok(entries
            .into_iter()
            .map(|entry| CalendarResource {
                href: format!("{base}{}", entry.href),
                data: entry.data.unwrap_or_default(),
                etag: entry.etag,
            })
            .collect())
    }
}

impl<T: DavTransport> std::fmt::Debug for CalDavSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalDavSession")
            .field("client", &self.client)
            .finish()
    }
}

fn extract_uid(ical: &str) -> Option<String> {
    UID_RE
        .captures(ical)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|uid| !uid.is_empty())
}
