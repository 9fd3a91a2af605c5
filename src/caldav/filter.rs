//! Declarative calendar-query filters.
//!
//! A [`Filter`] accumulates property conditions and at most one time range,
//! then renders the nested comp-filter fragment a calendar-query REPORT
//! expects. Conditions are rendered in insertion order with the time range
//! last, which keeps the output stable for servers that care about element
//! order.

use std::sync::LazyLock;

use regex::Regex;

use crate::caldav::xml::escape_xml;
use crate::error::{Error, Result};

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}T\d{6}Z$").expect("Invalid timestamp regex"));

/// Reject anything that is not `yyyymmddThhmmssZ` (GMT).
pub(crate) fn validate_timestamp(value: &str) -> Result<()> {
    if TIMESTAMP_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidTimestamp {
            value: value.to_string(),
        })
    }
}

/// iCalendar component the filter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Event,
    Todo,
    Journal,
    FreeBusy,
    Alarm,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Event => "VEVENT",
            ComponentKind::Todo => "VTODO",
            ComponentKind::Journal => "VJOURNAL",
            ComponentKind::FreeBusy => "VFREEBUSY",
            ComponentKind::Alarm => "VALARM",
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Include {
        prop: String,
        not_defined: bool,
    },
    MatchSubstring {
        prop: String,
        substring: String,
        negate: bool,
    },
    TimeRange {
        start: Option<String>,
        end: Option<String>,
    },
}

/// Consuming builder for the comp-filter fragment of a calendar-query.
///
/// At most one time range makes sense per filter; adding a second is a
/// caller error and the server will reject the resulting query.
#[derive(Debug, Clone)]
pub struct Filter {
    component: ComponentKind,
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new(component: ComponentKind) -> Self {
        Self {
            component,
            conditions: Vec::new(),
        }
    }

    /// Require the property to be present on matching components.
    pub fn must_include(mut self, prop: &str) -> Self {
        self.conditions.push(Condition::Include {
            prop: prop.to_string(),
            not_defined: false,
        });
        self
    }

    /// Require the property to be absent on matching components.
    pub fn must_include_not_defined(mut self, prop: &str) -> Self {
        self.conditions.push(Condition::Include {
            prop: prop.to_string(),
            not_defined: true,
        });
        self
    }

    /// Require a substring match on the property value, or with `negate` the
    /// absence of that substring.
    pub fn must_match_substring(mut self, prop: &str, substring: &str, negate: bool) -> Self {
        self.conditions.push(Condition::MatchSubstring {
            prop: prop.to_string(),
            substring: substring.to_string(),
            negate,
        });
        self
    }

    /// Require the component to overlap `[start, end]`. Either bound may be
    /// open; both timestamps must be `yyyymmddThhmmssZ`.
    pub fn must_overlap_timerange(
        mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self> {
        if let Some(start) = start {
            validate_timestamp(start)?;
        }
        if let Some(end) = end {
            validate_timestamp(end)?;
        }
        self.conditions.push(Condition::TimeRange {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        });
        Ok(self)
    }

    /// Render the fragment that goes inside `<C:filter>`.
    pub fn to_xml(&self) -> String {
        let mut xml = format!(
            "<C:comp-filter name=\"VCALENDAR\"><C:comp-filter name=\"{}\">",
            self.component.as_str()
        );
        for condition in &self.conditions {
            if !matches!(condition, Condition::TimeRange { .. }) {
                render_condition(&mut xml, condition);
            }
        }
        for condition in &self.conditions {
            if matches!(condition, Condition::TimeRange { .. }) {
                self.render_time_range(&mut xml, condition);
            }
        }
        xml.push_str("</C:comp-filter></C:comp-filter>");
        xml
    }

    fn render_time_range(&self, xml: &mut String, condition: &Condition) {
        let Condition::TimeRange { start, end } = condition else {
            return;
        };
        // VTODO servers only honor ranges applied to the embedded alarm.
        let wrap_alarm = self.component == ComponentKind::Todo;
        if wrap_alarm {
            xml.push_str("<C:comp-filter name=\"VALARM\">");
        }
        xml.push_str("<C:time-range");
        if let Some(start) = start {
            xml.push_str(" start=\"");
            xml.push_str(start);
            xml.push('"');
        }
        if let Some(end) = end {
            xml.push_str(" end=\"");
            xml.push_str(end);
            xml.push('"');
        }
        xml.push_str("/>");
        if wrap_alarm {
            xml.push_str("</C:comp-filter>");
        }
    }
}

fn render_condition(xml: &mut String, condition: &Condition) {
    match condition {
        Condition::Include { prop, not_defined } => {
            if *not_defined {
                xml.push_str("<C:prop-filter name=\"");
                xml.push_str(&escape_xml(prop));
                xml.push_str("\"><C:is-not-defined/></C:prop-filter>");
            } else {
                xml.push_str("<C:prop-filter name=\"");
                xml.push_str(&escape_xml(prop));
                xml.push_str("\"/>");
            }
        }
        Condition::MatchSubstring {
            prop,
            substring,
            negate,
        } => {
            xml.push_str("<C:prop-filter name=\"");
            xml.push_str(&escape_xml(prop));
            xml.push_str("\"><C:text-match");
            if *negate {
                xml.push_str(" negate-condition=\"yes\"");
            }
            xml.push('>');
            xml.push_str(&escape_xml(substring));
            xml.push_str("</C:text-match></C:prop-filter>");
        }
        Condition::TimeRange { .. } => {}
    }
}

/// Fragment matching a single resource by its UID property, byte-exact.
pub(crate) fn uid_filter(uid: &str) -> String {
    format!(
        "<C:comp-filter name=\"VCALENDAR\"><C:comp-filter name=\"VEVENT\"><C:prop-filter name=\"UID\"><C:text-match icollation=\"i;octet\">{}</C:text-match></C:prop-filter></C:comp-filter></C:comp-filter>",
        escape_xml(uid)
    )
}
