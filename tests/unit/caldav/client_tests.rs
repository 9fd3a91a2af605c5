use simple_caldav::{CalDavClient, Depth, Error, PropSpec};

use super::helpers::{CALENDAR_LIST, EVENT_REPORT, MockTransport, caldav_options, response};

fn client(transport: MockTransport) -> CalDavClient<MockTransport> {
    CalDavClient::with_transport(
        transport,
        "https://cal.example.com/cal.php/",
        Some("user"),
        Some("secret"),
    )
    .expect("client construction")
}

#[tokio::test]
async fn options_parses_dav_compliance_classes() {
    let transport = MockTransport::new(vec![caldav_options()]);
    let mut client = client(transport.clone());

    assert!(client.is_valid_caldav_server().await.expect("options"));

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].method.as_str(), "OPTIONS");
    let auth = recorded[0]
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .expect("auth header");
    assert!(auth.starts_with("Basic "));
}

#[tokio::test]
async fn exchange_renders_headers_with_credentials_redacted() {
    let transport = MockTransport::new(vec![caldav_options()]);
    let mut client = client(transport);
    client.is_valid_caldav_server().await.expect("options");

    let exchange = client.last_exchange().expect("exchange");
    assert!(exchange.request_headers.contains("authorization: <redacted>"));
    assert!(!exchange.request_headers.contains("Basic "));
    assert!(exchange.response_headers.contains("dav: 1, 2, calendar-access"));
}

#[test]
fn debug_output_omits_credentials() {
    let transport = MockTransport::new(vec![]);
    let client = client(transport);
    let rendered = format!("{client:?}");
    assert!(rendered.contains("CalDavClient"));
    assert!(!rendered.contains("secret"));
}

#[tokio::test]
async fn missing_calendar_access_token_is_not_caldav() {
    let transport = MockTransport::new(vec![response(200, &[("DAV", "1, 2")], "")]);
    let mut client = client(transport);
    assert!(!client.is_valid_caldav_server().await.expect("options"));
}

#[tokio::test]
async fn unauthorized_options_maps_to_authentication_error() {
    let transport = MockTransport::new(vec![response(401, &[], "")]);
    let mut client = client(transport);
    let err = client.is_valid_caldav_server().await.unwrap_err();
    assert!(matches!(err, Error::Authentication));
}

#[tokio::test]
async fn supported_methods_come_from_the_allow_header() {
    let transport = MockTransport::new(vec![caldav_options()]);
    let mut client = client(transport);
    let methods = client.supported_methods().await.expect("options");
    assert!(methods.iter().any(|m| m == "PROPFIND"));
    assert!(methods.iter().any(|m| m == "REPORT"));
}

#[tokio::test]
async fn propfind_sends_depth_and_body() {
    let transport = MockTransport::new(vec![response(207, &[], CALENDAR_LIST)]);
    let mut client = client(transport.clone());

    let reader = client
        .propfind("", &[PropSpec::dav("resourcetype")], Depth::One)
        .await
        .expect("propfind");
    assert!(!reader.is_empty());

    let recorded = transport.recorded();
    assert_eq!(recorded[0].method.as_str(), "PROPFIND");
    assert_eq!(
        recorded[0].headers.get("depth").and_then(|v| v.to_str().ok()),
        Some("1")
    );
    let body = String::from_utf8_lossy(&recorded[0].body).into_owned();
    assert!(body.contains("<resourcetype/>"));
}

#[tokio::test]
async fn discovery_falls_back_to_the_principal_url() {
    let empty_home = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/cal.php/</D:href><D:propstat><D:prop/><D:status>HTTP/1.1 404 Not Found</D:status></D:propstat></D:response></D:multistatus>"#;
    let principal = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/cal.php/</D:href><D:propstat><D:prop><D:current-user-principal><D:href>/cal.php/principals/user/</D:href></D:current-user-principal></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response></D:multistatus>"#;
    let home = r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><D:response><D:href>/cal.php/principals/user/</D:href><D:propstat><D:prop><C:calendar-home-set><D:href>/cal.php/calendars/user/</D:href></C:calendar-home-set></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response></D:multistatus>"#;

    let transport = MockTransport::new(vec![
        response(207, &[], empty_home),
        response(207, &[], principal),
        response(207, &[], home),
        response(207, &[], CALENDAR_LIST),
    ]);
    let mut client = client(transport.clone());

    let calendars = client.find_calendars().await.expect("discovery");
    assert_eq!(calendars.len(), 1);

    let calendar = &calendars[0];
    assert_eq!(calendar.url, "/cal.php/calendars/user/work/");
    assert_eq!(calendar.id.as_deref(), Some("work"));
    assert_eq!(calendar.display_name.as_deref(), Some("Work"));
    assert_eq!(calendar.ctag.as_deref(), Some("ctag-1"));
    assert_eq!(calendar.color.as_deref(), Some("#ff0000"));
    assert_eq!(calendar.order.as_deref(), Some("2"));

    assert_eq!(client.principal_url(), Some("/cal.php/principals/user/"));
    assert_eq!(client.calendar_home_set(), ["/cal.php/calendars/user/"]);

    // Depth 0 on the entry, Depth 1 principal hunt, Depth 0 on the
    // principal, Depth 1 calendar listing.
    let depths: Vec<_> = transport
        .recorded()
        .iter()
        .map(|req| {
            req.headers
                .get("depth")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        })
        .collect();
    assert_eq!(depths, ["0", "1", "0", "1"]);
}

#[tokio::test]
async fn discovery_uses_home_from_the_entry_url_when_present() {
    let home = r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><D:response><D:href>/cal.php/</D:href><D:propstat><D:prop><C:calendar-home-set><D:href>/cal.php/calendars/user/</D:href></C:calendar-home-set></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response></D:multistatus>"#;
    let transport = MockTransport::new(vec![
        response(207, &[], home),
        response(207, &[], CALENDAR_LIST),
    ]);
    let mut client = client(transport.clone());

    let calendars = client.find_calendars().await.expect("discovery");
    assert_eq!(calendars.len(), 1);
    assert_eq!(transport.recorded().len(), 2);
}

#[tokio::test]
async fn calendar_details_is_idempotent_across_identical_responses() {
    let transport = MockTransport::new(vec![
        response(207, &[], CALENDAR_LIST),
        response(207, &[], CALENDAR_LIST),
    ]);
    let mut client = client(transport);

    let first = client
        .calendar_details("/cal.php/calendars/user/work/")
        .await
        .expect("details")
        .expect("calendar");
    let second = client
        .calendar_details("/cal.php/calendars/user/work/")
        .await
        .expect("details")
        .expect("calendar");

    assert_eq!(first.ctag, second.ctag);
    assert_eq!(first.url, second.url);
    assert_eq!(first.display_name, second.display_name);
}

#[tokio::test]
async fn collection_etags_pair_hrefs_with_stripped_etags() {
    let body = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/cal.php/calendars/user/work/a.ics</D:href><D:propstat><D:prop><D:getetag>"e-a"</D:getetag></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response><D:response><D:href>/cal.php/calendars/user/work/b.ics</D:href><D:propstat><D:prop><D:getetag>"e-b"</D:getetag></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response></D:multistatus>"#;
    let transport = MockTransport::new(vec![response(207, &[], body)]);
    let mut client = client(transport);

    let etags = client
        .collection_etags("/cal.php/calendars/user/work/")
        .await
        .expect("etags");
    assert_eq!(
        etags,
        vec![
            (
                "/cal.php/calendars/user/work/a.ics".to_string(),
                "e-a".to_string()
            ),
            (
                "/cal.php/calendars/user/work/b.ics".to_string(),
                "e-b".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn calendar_query_requires_a_selected_calendar() {
    let transport = MockTransport::new(vec![]);
    let mut client = client(transport);
    let err = client
        .calendar_query("<C:comp-filter name=\"VCALENDAR\"/>")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoCalendarSelected));
}

#[tokio::test]
async fn calendar_query_sends_report_and_parses_entries() {
    let transport = MockTransport::new(vec![response(207, &[], EVENT_REPORT)]);
    let mut client = client(transport.clone());
    client.set_calendar("/cal.php/calendars/user/work/");

    let entries = client
        .calendar_query("<C:comp-filter name=\"VCALENDAR\"/>")
        .await
        .expect("query");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].href, "first.ics");

    let recorded = transport.recorded();
    assert_eq!(recorded[0].method.as_str(), "REPORT");
    assert_eq!(
        recorded[0].uri.path(),
        "/cal.php/calendars/user/work/"
    );
    let body = String::from_utf8_lossy(&recorded[0].body).into_owned();
    assert!(body.contains("<C:calendar-data/><D:getetag/>"));
}

#[tokio::test]
async fn empty_multiget_short_circuits_without_a_request() {
    let transport = MockTransport::new(vec![]);
    let mut client = client(transport.clone());
    client.set_calendar("/cal.php/calendars/user/work/");

    let entries = client
        .calendar_multiget(Vec::<String>::new())
        .await
        .expect("multiget");
    assert!(entries.is_empty());
    assert!(transport.recorded().is_empty());
}

#[tokio::test]
async fn multiget_encodes_hrefs_in_the_body() {
    let transport = MockTransport::new(vec![response(207, &[], EVENT_REPORT)]);
    let mut client = client(transport.clone());
    client.set_calendar("/cal.php/calendars/user/work/");

    client
        .calendar_multiget(["/cal.php/calendars/user/work/second meeting.ics"])
        .await
        .expect("multiget");

    let body = String::from_utf8_lossy(&transport.recorded()[0].body).into_owned();
    assert!(body.contains(
        "<href>/cal.php/calendars/user/work/second%20meeting.ics</href>"
    ));
}

#[tokio::test]
async fn proppatch_surfaces_propstat_rejection() {
    let body = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/cal.php/calendars/user/work/</D:href><D:propstat><D:prop><D:displayname/></D:prop><D:status>HTTP/1.1 403 Forbidden</D:status></D:propstat></D:response></D:multistatus>"#;
    let transport = MockTransport::new(vec![response(207, &[], body)]);
    let mut client = client(transport);

    let err = client
        .proppatch("/cal.php/calendars/user/work/", "<propertyupdate/>")
        .await
        .unwrap_err();
    match err {
        Error::PropertyUpdateRejected { status } => {
            assert_eq!(status, "HTTP/1.1 403 Forbidden");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn proppatch_with_all_ok_propstats_succeeds() {
    let body = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/cal.php/calendars/user/work/</D:href><D:propstat><D:prop><D:displayname/></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response></D:multistatus>"#;
    let transport = MockTransport::new(vec![response(207, &[], body)]);
    let mut client = client(transport);
    client
        .proppatch("/cal.php/calendars/user/work/", "<propertyupdate/>")
        .await
        .expect("proppatch");
}

#[tokio::test]
async fn principal_property_search_maps_each_response() {
    let body = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/principals/user01/</D:href><D:propstat><D:prop><D:displayname>User One</D:displayname><D:email>one@example.com</D:email></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response></D:multistatus>"#;
    let transport = MockTransport::new(vec![response(207, &[], body)]);
    let mut client = client(transport);

    let matches = client
        .principal_property_search("/principals/", "<principal-property-search/>")
        .await
        .expect("search");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].href.as_deref(), Some("/principals/user01/"));
    assert_eq!(matches[0].display_name.as_deref(), Some("User One"));
    assert_eq!(matches[0].email.as_deref(), Some("one@example.com"));
}

#[tokio::test]
async fn get_entry_completes_a_missing_etag_with_a_head_request() {
    let transport = MockTransport::new(vec![
        response(200, &[], "BEGIN:VCALENDAR\nEND:VCALENDAR\n"),
        response(200, &[("ETag", "\"from-head\"")], ""),
    ]);
    let mut client = client(transport.clone());

    let (data, etag) = client
        .get_entry_by_href("/cal.php/calendars/user/work/a.ics")
        .await
        .expect("get")
        .expect("entry");
    assert!(data.starts_with("BEGIN:VCALENDAR"));
    assert_eq!(etag.as_deref(), Some("from-head"));

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1].method.as_str(), "HEAD");

    // The diagnostic snapshot still describes the GET, not the HEAD.
    let exchange = client.last_exchange().expect("exchange");
    assert_eq!(exchange.method, "GET");
}

#[tokio::test]
async fn put_with_stale_etag_maps_412() {
    let transport = MockTransport::new(vec![response(412, &[], "")]);
    let mut client = client(transport.clone());

    let err = client
        .put_resource(
            "/cal.php/calendars/user/work/a.ics",
            "BEGIN:VCALENDAR\nEND:VCALENDAR\n",
            Some("old"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StalePrecondition { .. }));

    let recorded = transport.recorded();
    assert_eq!(
        recorded[0]
            .headers
            .get("if-match")
            .and_then(|v| v.to_str().ok()),
        Some("\"old\"")
    );
    assert_eq!(
        recorded[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/calendar; encoding=\"utf-8\"")
    );
}

#[tokio::test]
async fn put_if_absent_guards_with_if_none_match() {
    let transport = MockTransport::new(vec![response(201, &[("ETag", "\"v1\"")], "")]);
    let mut client = client(transport.clone());

    let (status, etag) = client
        .put_if_absent(
            "/cal.php/calendars/user/work/a.ics",
            "BEGIN:VCALENDAR\nEND:VCALENDAR\n",
        )
        .await
        .expect("put");
    assert_eq!(status, 201);
    assert_eq!(etag.as_deref(), Some("v1"));

    let recorded = transport.recorded();
    assert_eq!(
        recorded[0]
            .headers
            .get("if-none-match")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn put_if_absent_maps_412_to_already_exists() {
    let transport = MockTransport::new(vec![response(412, &[], "")]);
    let mut client = client(transport);

    let err = client
        .put_if_absent(
            "/cal.php/calendars/user/work/a.ics",
            "BEGIN:VCALENDAR\nEND:VCALENDAR\n",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}

#[tokio::test]
async fn unexpected_status_carries_the_raw_exchange() {
    let transport = MockTransport::new(vec![response(500, &[], "boom")]);
    let mut client = client(transport);
    client.set_calendar("/cal.php/calendars/user/work/");

    let err = client
        .calendar_query("<C:comp-filter name=\"VCALENDAR\"/>")
        .await
        .unwrap_err();
    match err {
        Error::Protocol { status, exchange } => {
            assert_eq!(status, 500);
            assert_eq!(exchange.status, Some(500));
            assert!(exchange.response_body.contains("boom"));
            let rendered = format!("{exchange}");
            assert!(rendered.contains("REPORT"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
