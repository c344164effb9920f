//! Typed runtime values
//!
//! The controller tags every value with an XSI type attribute of the form
//! `ns:WS<Kind>Value`; the local part of that tag picks which child element
//! holds the scalar. The wire-tag → variant mapping lives in one dispatch
//! table (`decode`) so the whole polymorphic-decode concern is testable in
//! one place.

use crate::error::{IhcError, IhcResult};
use crate::xml::XmlElement;

const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// A resource handle assigned by the controller to a named input, output,
/// variable or timer in the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub i32);

impl From<i32> for ResourceId {
    fn from(id: i32) -> Self {
        ResourceId(id)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A time-of-day value with no associated date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

/// A calendar date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

/// A calendar date. `year == 0` on the wire means "current year", and is
/// resolved to a concrete year at decode time (see [`decode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

/// A tagged union over every runtime value kind the controller exposes.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Bool(bool),
    Int(i32),
    /// Rounded to two decimal places on decode.
    Float(f64),
    EnumName(String),
    TimerMilliseconds(i64),
    TimeOfDay(TimeOfDay),
    DateTime(DateTime),
    Date(Date),
    /// An XSI type the table below doesn't recognize: its raw text,
    /// verbatim.
    Raw(String),
}

impl ResourceValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResourceValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ResourceValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ResourceValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn child_text<'a>(el: &'a XmlElement, local_name: &str) -> IhcResult<&'a str> {
    el.child(local_name)
        .map(|c| c.text_trimmed())
        .ok_or_else(|| IhcError::Protocol(format!("missing <{}> child", local_name)))
}

fn parse_u8(text: &str, field: &str) -> IhcResult<u8> {
    text.parse()
        .map_err(|_| IhcError::Protocol(format!("invalid {} value: {}", field, text)))
}

fn parse_i32(text: &str, field: &str) -> IhcResult<i32> {
    text.parse()
        .map_err(|_| IhcError::Protocol(format!("invalid {} value: {}", field, text)))
}

/// Decode a `<value i:type="a:WS...Value">...</value>` element.
///
/// `current_year` supplies the year used when the controller sends
/// `year == 0` for a [`Date`] (meaning "current year"); tests inject a
/// fixed value for determinism, production callers pass the real clock.
pub fn decode(value_el: &XmlElement, current_year: impl Fn() -> i32) -> IhcResult<Option<ResourceValue>> {
    let Some(xsi_type) = value_el.attr_ns(XSI_NS, "type") else {
        return Ok(None);
    };
    let tag = xsi_type.rsplit(':').next().unwrap_or(xsi_type);

    let value = match tag {
        "WSBooleanValue" => ResourceValue::Bool(child_text(value_el, "value")? == "true"),
        "WSIntegerValue" => ResourceValue::Int(parse_i32(child_text(value_el, "integer")?, "integer")?),
        "WSFloatingPointValue" => {
            let text = child_text(value_el, "floatingPointValue")?;
            let raw: f64 = text
                .parse()
                .map_err(|_| IhcError::Protocol(format!("invalid floatingPointValue: {}", text)))?;
            ResourceValue::Float(round2(raw))
        }
        "WSEnumValue" => ResourceValue::EnumName(child_text(value_el, "enumName")?.to_string()),
        "WSTimerValue" => {
            let text = child_text(value_el, "milliseconds")?;
            let millis: i64 = text
                .parse()
                .map_err(|_| IhcError::Protocol(format!("invalid milliseconds: {}", text)))?;
            ResourceValue::TimerMilliseconds(millis)
        }
        "WSTimeValue" => ResourceValue::TimeOfDay(TimeOfDay {
            hours: parse_u8(child_text(value_el, "hours")?, "hours")?,
            minutes: parse_u8(child_text(value_el, "minutes")?, "minutes")?,
            seconds: parse_u8(child_text(value_el, "seconds")?, "seconds")?,
        }),
        "WSDateTimeValue" => ResourceValue::DateTime(DateTime {
            year: parse_i32(child_text(value_el, "year")?, "year")?,
            month: parse_u8(child_text(value_el, "monthWithJanuaryAsOne")?, "month")?,
            day: parse_u8(child_text(value_el, "day")?, "day")?,
            hours: parse_u8(child_text(value_el, "hours")?, "hours")?,
            minutes: parse_u8(child_text(value_el, "minutes")?, "minutes")?,
            seconds: parse_u8(child_text(value_el, "seconds")?, "seconds")?,
        }),
        "WSDateValue" => {
            let mut year = parse_i32(child_text(value_el, "year")?, "year")?;
            if year == 0 {
                year = current_year();
            }
            ResourceValue::Date(Date {
                year,
                month: parse_u8(child_text(value_el, "month")?, "month")?,
                day: parse_u8(child_text(value_el, "day")?, "day")?,
            })
        }
        _ => ResourceValue::Raw(value_el.text_trimmed().to_string()),
    };
    Ok(Some(value))
}

fn system_year() -> i32 {
    // Days since the epoch, converted via the civil-from-days algorithm,
    // avoids pulling in a full calendar crate for one field.
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86_400);
    civil_year_from_days(days)
}

/// Howard Hinnant's `civil_from_days`, year component only.
fn civil_year_from_days(z: i64) -> i32 {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }) as i32
}

/// Decode against the real system clock.
pub fn decode_now(value_el: &XmlElement) -> IhcResult<Option<ResourceValue>> {
    decode(value_el, system_year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse;

    fn value_element(inner: &str) -> XmlElement {
        // `inner` supplies the rest of the opening tag (attributes + `>`)
        // plus the element's content, e.g. ` i:type="a:WSBooleanValue">true`.
        let xml = format!(r#"<value xmlns:i="{}" xmlns:a="utcs.values"{}</value>"#, XSI_NS, inner);
        parse(&xml).unwrap()
    }

    #[test]
    fn decodes_bool() {
        let el = value_element(r#" i:type="a:WSBooleanValue"><a:value>true</a:value>"#);
        let v = decode(&el, || 2024).unwrap().unwrap();
        assert_eq!(v, ResourceValue::Bool(true));
    }

    #[test]
    fn decodes_int() {
        let el = value_element(r#" i:type="a:WSIntegerValue"><a:integer>42</a:integer>"#);
        assert_eq!(decode(&el, || 2024).unwrap().unwrap(), ResourceValue::Int(42));
    }

    #[test]
    fn decodes_float_rounded_to_two_decimals() {
        let el = value_element(
            r#" i:type="a:WSFloatingPointValue"><a:floatingPointValue>3.14159</a:floatingPointValue>"#,
        );
        assert_eq!(decode(&el, || 2024).unwrap().unwrap(), ResourceValue::Float(3.14));
    }

    #[test]
    fn decodes_enum() {
        let el = value_element(r#" i:type="a:WSEnumValue"><a:enumName>high</a:enumName>"#);
        assert_eq!(
            decode(&el, || 2024).unwrap().unwrap(),
            ResourceValue::EnumName("high".to_string())
        );
    }

    #[test]
    fn decodes_timer_milliseconds() {
        let el = value_element(r#" i:type="a:WSTimerValue"><a:milliseconds>1500</a:milliseconds>"#);
        assert_eq!(
            decode(&el, || 2024).unwrap().unwrap(),
            ResourceValue::TimerMilliseconds(1500)
        );
    }

    #[test]
    fn decodes_time_of_day() {
        let el = value_element(
            r#" i:type="a:WSTimeValue"><a:hours>7</a:hours><a:minutes>30</a:minutes><a:seconds>0</a:seconds>"#,
        );
        assert_eq!(
            decode(&el, || 2024).unwrap().unwrap(),
            ResourceValue::TimeOfDay(TimeOfDay { hours: 7, minutes: 30, seconds: 0 })
        );
    }

    #[test]
    fn decodes_date_with_explicit_year() {
        let el = value_element(
            r#" i:type="a:WSDateValue"><a:year>2023</a:year><a:month>12</a:month><a:day>25</a:day>"#,
        );
        assert_eq!(
            decode(&el, || 2024).unwrap().unwrap(),
            ResourceValue::Date(Date { year: 2023, month: 12, day: 25 })
        );
    }

    #[test]
    fn decodes_date_with_zero_year_as_current_year() {
        let el = value_element(
            r#" i:type="a:WSDateValue"><a:year>0</a:year><a:month>1</a:month><a:day>1</a:day>"#,
        );
        assert_eq!(
            decode(&el, || 2024).unwrap().unwrap(),
            ResourceValue::Date(Date { year: 2024, month: 1, day: 1 })
        );
    }

    #[test]
    fn unknown_xsi_type_returns_raw_text() {
        let el = value_element(r#" i:type="a:WSSomeFutureValue">unparsed-text"#);
        assert_eq!(
            decode(&el, || 2024).unwrap().unwrap(),
            ResourceValue::Raw("unparsed-text".to_string())
        );
    }

    #[test]
    fn missing_xsi_type_is_absent() {
        let el = value_element(">");
        assert_eq!(decode(&el, || 2024).unwrap(), None);
    }

    #[test]
    fn civil_year_matches_known_date() {
        // 2024-01-01 00:00:00 UTC = 1704067200
        assert_eq!(civil_year_from_days(1704067200 / 86400), 2024);
    }
}
