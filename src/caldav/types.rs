/// WebDAV Depth header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// One property requested in a PROPFIND body.
///
/// Properties outside the `DAV:` namespace carry their namespace inline.
#[derive(Debug, Clone, Copy)]
pub struct PropSpec {
    pub namespace: Option<&'static str>,
    pub name: &'static str,
}

impl PropSpec {
    pub const fn dav(name: &'static str) -> Self {
        Self {
            namespace: None,
            name,
        }
    }

    pub const fn ns(namespace: &'static str, name: &'static str) -> Self {
        Self {
            namespace: Some(namespace),
            name,
        }
    }
}

/// Snapshot of one calendar collection discovered on the server.
///
/// The struct is plain data; re-running discovery replaces it rather than
/// mutating it in place.
#[derive(Debug, Clone)]
pub struct Calendar {
    /// Collection URL as reported by the server (URL-decoded).
    pub url: String,
    /// Second-to-last path segment of the URL, the conventional calendar id.
    pub id: Option<String>,
    pub display_name: Option<String>,
    /// Collection-level change tag; changes whenever any member changes.
    pub ctag: Option<String>,
    /// `#rrggbb` where the server supplied `#rrggbbaa`; other shapes pass
    /// through unchanged.
    pub color: Option<String>,
    pub order: Option<String>,
}

impl Calendar {
    pub(crate) fn new(url: String) -> Self {
        let id = calendar_id_from_url(&url);
        Self {
            url,
            id,
            display_name: None,
            ctag: None,
            color: None,
            order: None,
        }
    }
}

/// An event, todo or journal resource together with the etag it was read at.
///
/// `(href, data, etag)` is the optimistic-concurrency unit: `change` and
/// `delete` compare the held etag against the server before touching anything.
#[derive(Debug, Clone)]
pub struct CalendarResource {
    pub href: String,
    pub data: String,
    pub etag: Option<String>,
}

/// One response entry of a calendar-query or calendar-multiget REPORT.
#[derive(Debug, Clone, Default)]
pub struct ReportEntry {
    /// Last path segment of the response href (URL-decoded).
    pub href: String,
    /// Etag with surrounding quotes stripped.
    pub etag: Option<String>,
    /// Raw calendar-data payload, whitespace preserved.
    pub data: Option<String>,
}

/// One match of a principal-property-search REPORT.
#[derive(Debug, Clone, Default)]
pub struct PrincipalMatch {
    pub href: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Calendar ids are conventionally the second-to-last path segment,
/// e.g. `work` in `/cal.php/calendars/user/work/`.
pub(crate) fn calendar_id_from_url(url: &str) -> Option<String> {
    let pieces: Vec<&str> = url.split('/').collect();
    if pieces.len() < 2 {
        return None;
    }
    let id = pieces[pieces.len() - 2];
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Servers following the Apple calendar-color convention report `#rrggbbaa`;
/// strip the alpha channel. The rule is deliberately length-based: anything
/// that is not exactly nine bytes passes through untouched, and callers may
/// rely on that.
pub(crate) fn rgba_to_rgb(color: &str) -> String {
    if color.len() == 9 && color.is_char_boundary(7) {
        color[..7].to_string()
    } else {
        color.to_string()
    }
}
