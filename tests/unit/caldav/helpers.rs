use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hyper::{HeaderMap, StatusCode, header};
use simple_caldav::{DavRequest, DavResponse, DavTransport, TransportError};

/// Transport that replays a scripted list of responses and records every
/// request it saw. Clones share the same script and recording.
#[derive(Clone)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<DavResponse>>>,
    requests: Arc<Mutex<Vec<DavRequest>>>,
}

impl MockTransport {
    pub fn new(responses: Vec<DavResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn recorded(&self) -> Vec<DavRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl DavTransport for MockTransport {
    async fn execute(&self, request: DavRequest) -> Result<DavResponse, TransportError> {
        self.requests.lock().expect("requests lock").push(request);
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or(TransportError::Timeout)
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &str) -> DavResponse {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        header_map.append(
            name.parse::<header::HeaderName>().expect("header name"),
            value.parse().expect("header value"),
        );
    }
    DavResponse {
        status: StatusCode::from_u16(status).expect("status code"),
        headers: header_map,
        body: Bytes::from(body.to_string()),
    }
}

/// OPTIONS response of a server that advertises CalDAV.
pub fn caldav_options() -> DavResponse {
    response(
        200,
        &[
            ("DAV", "1, 2, calendar-access"),
            ("Allow", "OPTIONS, GET, PUT, DELETE, PROPFIND, REPORT"),
        ],
        "",
    )
}

/// Depth-1 PROPFIND response listing one plain collection and one calendar.
pub const CALENDAR_LIST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"
    xmlns:CS="http://calendarserver.org/ns/" xmlns:A="http://apple.com/ns/ical/">
  <D:response>
    <D:href>/cal.php/calendars/user/</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype><D:collection/></D:resourcetype>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal.php/calendars/user/work/</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype><D:collection/><C:calendar/></D:resourcetype>
        <D:displayname>Work</D:displayname>
        <CS:getctag>ctag-1</CS:getctag>
        <A:calendar-color>#ff0000ff</A:calendar-color>
        <A:calendar-order>2</A:calendar-order>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>
"#;

/// REPORT response carrying two events with etags and data.
pub const EVENT_REPORT: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<D:multistatus xmlns:D=\"DAV:\" xmlns:C=\"urn:ietf:params:xml:ns:caldav\">\
<D:response>\
<D:href>/cal.php/calendars/user/work/first.ics</D:href>\
<D:propstat><D:prop>\
<D:getetag>\"etag-first\"</D:getetag>\
<C:calendar-data>BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:first\nEND:VEVENT\nEND:VCALENDAR\n</C:calendar-data>\
</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>\
</D:response>\
<D:response>\
<D:href>/cal.php/calendars/user/work/second%20meeting.ics</D:href>\
<D:propstat><D:prop>\
<D:getetag>\"etag-second\"</D:getetag>\
<C:calendar-data>BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:second\nEND:VEVENT\nEND:VCALENDAR\n</C:calendar-data>\
</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>\
</D:response>\
</D:multistatus>";
