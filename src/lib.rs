//! CalDAV client library for Rust.
//!
//! A straightforward, sequential CalDAV client built on hyper 1.x, rustls and
//! quick-xml. It walks the standard discovery chain (principal →
//! calendar-home-set → calendars), runs calendar-query and calendar-multiget
//! REPORTs, and keeps writes honest with etag preconditions.
//!
//! Two levels of API:
//!
//! - [`CalDavSession`] — connect, pick a calendar, then create/change/delete
//!   resources and run queries. The session enforces the etag discipline:
//!   a change or conditional delete re-reads the server-side etag first and
//!   refuses to proceed on a mismatch.
//! - [`CalDavClient`] — the raw protocol verbs (OPTIONS, PROPFIND, REPORT,
//!   PROPPATCH, GET/PUT/DELETE) plus the multistatus reader, for callers that
//!   need more control.
//!
//! # Example
//!
//! ```no_run
//! use simple_caldav::{CalDavSession, Error};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut session = CalDavSession::connect(
//!         "https://cal.example.com/dav/",
//!         Some("user01"),
//!         Some("secret"),
//!     )
//!     .await?;
//!
//!     let calendars = session.find_calendars().await?;
//!     let calendar = calendars.first().ok_or(Error::NoCalendarSelected)?;
//!     session.select_calendar(calendar);
//!
//!     let created = session
//!         .create(
//!             "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:standup-1\r\nSUMMARY:Standup\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
//!         )
//!         .await?;
//!     println!("created {} (etag {:?})", created.href, created.etag);
//!
//!     let events = session
//!         .get_events(Some("20260101T000000Z"), Some("20261231T235959Z"))
//!         .await?;
//!     for event in &events {
//!         println!("{}: {} bytes", event.href, event.data.len());
//!     }
//!
//!     session.delete(&created.href, created.etag.as_deref()).await?;
//!     Ok(())
//! }
//! ```
//!
//! Queries are expressed with the [`Filter`] builder:
//!
//! ```
//! use simple_caldav::{ComponentKind, Filter};
//!
//! # fn main() -> Result<(), simple_caldav::Error> {
//! let filter = Filter::new(ComponentKind::Todo)
//!     .must_match_substring("STATUS", "CANCELLED", true)
//!     .must_overlap_timerange(Some("20260101T000000Z"), None)?;
//! let fragment = filter.to_xml();
//! # assert!(fragment.contains("VTODO"));
//! # Ok(())
//! # }
//! ```
pub mod caldav;
pub mod common;
pub mod error;

pub use caldav::client::CalDavClient;
pub use caldav::filter::{ComponentKind, Filter};
pub use caldav::reader::{MultistatusReader, NodeKind, Tag, XmlNode};
pub use caldav::session::CalDavSession;
pub use caldav::types::{
    Calendar, CalendarResource, Depth, PrincipalMatch, PropSpec, ReportEntry,
};
pub use common::http::{DavRequest, DavResponse, DavTransport, HyperTransport};
pub use error::{Error, RawExchange, Result, TransportError};
