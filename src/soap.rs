//! Typed SOAP operations
//!
//! Each method here pairs one fixed `(service_path, action, body template)`
//! tuple with the response shape that operation returns. The envelope
//! itself and the namespace-aware element lookup are handled by
//! [`crate::envelope`]/[`crate::transport`]; this module only knows how to
//! build request bodies and read the one or two elements each response
//! carries. Request bodies follow the exact wire shape the controller's
//! SOAP API uses for `authenticate`, `setResourceValue`,
//! `enableRuntimeValueNotifications` and `waitForResourceValueChanges`;
//! operations with no directly observed wire trace (`getState`,
//! project-info/segment retrieval, `getSystemInfo`, array-valued get/set)
//! follow the same `<operation1>`-request/`<operation2>`-response naming
//! convention the directly observed operations establish.

use std::collections::HashMap;

use crate::error::{IhcError, IhcResult};
use crate::transport::Session;
use crate::value::{self, ResourceId, ResourceValue};
use crate::xml::XmlElement;

const UTCS_NS: &str = "utcs";
const UTCS_VALUES_NS: &str = "utcs.values";
const AUTH_SERVICE: &str = "/ws/AuthenticationService";
const CONTROLLER_SERVICE: &str = "/ws/ControllerService";
const RESOURCE_SERVICE: &str = "/ws/ResourceInteractionService";
const CONFIG_SERVICE: &str = "/ws/ConfigurationService";

/// The controller's ready-state string.
pub const IHCSTATE_READY: &str = "text.ctrl.state.ready";

/// `major`/`minor` project revision, threaded through every segment call of
/// the segmented project retrieval path so the controller can refuse a
/// cross-project mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectInfo {
    pub major: u32,
    pub minor: u32,
}

/// Fixed-key response of `getSystemInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemInfo {
    pub version: String,
    pub serial_number: String,
    pub production_date: String,
    pub brand: String,
    pub datetime: String,
    pub uptime: String,
    pub realtime_clock_battery_low: bool,
    pub application_is_without_viewer: bool,
    pub sw_date: String,
    pub hw_revision: String,
}

/// Wraps a [`Session`] and exposes the controller's fixed operation set.
pub struct SoapClient {
    session: Session,
}

impl SoapClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // -- AuthenticationService -------------------------------------------

    pub async fn authenticate(&self, username: &str, password: &str) -> IhcResult<bool> {
        let body = format!(
            r#"<authenticate1 xmlns="{UTCS_NS}" xmlns:i="http://www.w3.org/2001/XMLSchema-instance"><password>{password}</password><username>{username}</username><application>treeview</application></authenticate1>"#,
            password = escape(password),
            username = escape(username),
        );
        let response = self.session.soap_action(AUTH_SERVICE, "authenticate", &body).await?;
        let ok = response
            .child("loginWasSuccessful")
            .map(|c| c.text_trimmed() == "true")
            .unwrap_or(false);
        Ok(ok)
    }

    // -- ControllerService -------------------------------------------------

    pub async fn get_state(&self) -> IhcResult<String> {
        let body = r#"<getState1 xmlns="utcs"/>"#.to_string();
        let response = self.session.soap_action(CONTROLLER_SERVICE, "getState", &body).await?;
        Ok(response
            .child("getStateResult")
            .map(|c| c.text_trimmed().to_string())
            .unwrap_or_default())
    }

    pub async fn wait_for_controller_state_change(&self, expected_state: &str, wait_secs: u32) -> IhcResult<String> {
        let body = format!(
            r#"<waitForControllerStateChange1 xmlns="{UTCS_NS}"><state>{expected_state}</state><waitForStateChangeTimeout>{wait_secs}</waitForStateChangeTimeout></waitForControllerStateChange1>"#,
            expected_state = escape(expected_state),
        );
        let response = self
            .session
            .soap_action(CONTROLLER_SERVICE, "waitForControllerStateChange", &body)
            .await?;
        Ok(response
            .child("waitForControllerStateChangeResult")
            .map(|c| c.text_trimmed().to_string())
            .unwrap_or_default())
    }

    /// Single-shot project retrieval: base64 of a gzip-wrapped deflate
    /// stream, decompressed to ISO-8859-1 bytes.
    pub async fn get_project(&self) -> IhcResult<Vec<u8>> {
        let body = r#"<getIHCProject1 xmlns="utcs"/>"#.to_string();
        let response = self.session.soap_action(CONTROLLER_SERVICE, "getIHCProject", &body).await?;
        let base64_text = response
            .child("data")
            .map(|c| c.text_trimmed())
            .ok_or_else(|| IhcError::Protocol("getIHCProject response missing data".to_string()))?;
        decompress_project(base64_text)
    }

    pub async fn get_project_info(&self) -> IhcResult<ProjectInfo> {
        let body = r#"<getProjectInfo1 xmlns="utcs"/>"#.to_string();
        let response = self.session.soap_action(CONTROLLER_SERVICE, "getProjectInfo", &body).await?;
        let major = child_u32(&response, "projectMajorRevision")?;
        let minor = child_u32(&response, "projectMinorRevision")?;
        Ok(ProjectInfo { major, minor })
    }

    pub async fn get_project_number_of_segments(&self, major: u32, minor: u32) -> IhcResult<u32> {
        let body = format!(
            r#"<getIHCProjectNumberOfSegments1 xmlns="{UTCS_NS}"><majorVersion>{major}</majorVersion><minorVersion>{minor}</minorVersion></getIHCProjectNumberOfSegments1>"#
        );
        let response = self
            .session
            .soap_action(CONTROLLER_SERVICE, "getIHCProjectNumberOfSegments", &body)
            .await?;
        child_u32(&response, "getIHCProjectNumberOfSegmentsResult")
    }

    pub async fn get_project_segment(&self, index: u32, major: u32, minor: u32) -> IhcResult<Vec<u8>> {
        let body = format!(
            r#"<getIHCProjectSegment1 xmlns="{UTCS_NS}"><index>{index}</index><majorVersion>{major}</majorVersion><minorVersion>{minor}</minorVersion></getIHCProjectSegment1>"#
        );
        let response = self.session.soap_action(CONTROLLER_SERVICE, "getIHCProjectSegment", &body).await?;
        let base64_text = response
            .child("data")
            .map(|c| c.text_trimmed())
            .ok_or_else(|| IhcError::Protocol("getIHCProjectSegment response missing data".to_string()))?;
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, base64_text)
            .map_err(|e| IhcError::Decompress(format!("invalid base64 segment: {e}")))
    }

    /// Drives the full segmented protocol: info -> count -> iterate ->
    /// concat -> decompress once. The major/minor pair threads through
    /// every segment call.
    pub async fn get_project_segmented(&self) -> IhcResult<Vec<u8>> {
        let info = self.get_project_info().await?;
        let segment_count = self.get_project_number_of_segments(info.major, info.minor).await?;
        let mut compressed = Vec::new();
        for index in 0..segment_count {
            let segment = self.get_project_segment(index, info.major, info.minor).await?;
            compressed.extend_from_slice(&segment);
        }
        decompress_bytes(&compressed)
    }

    // -- ConfigurationService -----------------------------------------------

    pub async fn get_system_info(&self) -> IhcResult<SystemInfo> {
        let body = r#"<getSystemInfo1 xmlns="utcs"/>"#.to_string();
        let response = self.session.soap_action(CONFIG_SERVICE, "getSystemInfo", &body).await?;
        Ok(SystemInfo {
            version: child_text(&response, "version"),
            serial_number: child_text(&response, "serialNumber"),
            production_date: child_text(&response, "productionDate"),
            brand: child_text(&response, "brand"),
            datetime: child_text(&response, "datetime"),
            uptime: child_text(&response, "uptime"),
            realtime_clock_battery_low: child_text(&response, "realTimeClockBatteryLow") == "true",
            application_is_without_viewer: child_text(&response, "applicationIsWithoutViewer") == "true",
            sw_date: child_text(&response, "swDate"),
            hw_revision: child_text(&response, "hwRevision"),
        })
    }

    pub async fn get_user_log(&self) -> IhcResult<String> {
        let body = r#"<getUserLog1 xmlns="utcs"/>"#.to_string();
        let response = self.session.soap_action(CONFIG_SERVICE, "getUserLog", &body).await?;
        Ok(response.text_trimmed().to_string())
    }

    pub async fn clear_user_log(&self) -> IhcResult<bool> {
        let body = r#"<clearUserLog1 xmlns="utcs"/>"#.to_string();
        let response = self.session.soap_action(CONFIG_SERVICE, "clearUserLog", &body).await?;
        Ok(response.text_trimmed() == "true")
    }

    // -- ResourceInteractionService ------------------------------------------

    pub async fn get_resource_value(&self, id: ResourceId) -> IhcResult<Option<ResourceValue>> {
        let body = format!(r#"<getRuntimeValue1 xmlns="{UTCS_NS}">{id}</getRuntimeValue1>"#);
        let response = self.session.soap_action(RESOURCE_SERVICE, "getResourceValue", &body).await?;
        match response.child("value") {
            Some(value_el) => value::decode_now(value_el),
            None => Ok(None),
        }
    }

    pub async fn get_resource_values(&self, ids: &[ResourceId]) -> IhcResult<HashMap<ResourceId, ResourceValue>> {
        let items: String = ids.iter().map(|id| format!("<a:arrayItem>{id}</a:arrayItem>")).collect();
        let body = format!(
            r#"<getRuntimeValues1 xmlns="{UTCS_NS}" xmlns:a="http://www.w3.org/2001/XMLSchema">{items}</getRuntimeValues1>"#
        );
        let response = self.session.soap_action(RESOURCE_SERVICE, "getResourceValues", &body).await?;
        let mut out = HashMap::new();
        for item in response.children_named("arrayItem") {
            let Some(id) = item.child("resourceID").and_then(|c| c.text_trimmed().parse::<i32>().ok()) else {
                continue;
            };
            if let Some(value_el) = item.child("value") {
                if let Some(value) = value::decode_now(value_el)? {
                    out.insert(ResourceId(id), value);
                }
            }
        }
        Ok(out)
    }

    pub async fn set_resource_value_bool(&self, id: ResourceId, value: bool) -> IhcResult<bool> {
        self.set_resource_value(id, &format!(r#"i:type="a:WSBooleanValue" xmlns:a="{UTCS_VALUES_NS}"><a:value>{value}</a:value>"#))
            .await
    }

    pub async fn set_resource_value_int(&self, id: ResourceId, value: i32) -> IhcResult<bool> {
        self.set_resource_value(id, &format!(r#"i:type="a:WSIntegerValue" xmlns:a="{UTCS_VALUES_NS}"><a:integer>{value}</a:integer>"#))
            .await
    }

    pub async fn set_resource_value_float(&self, id: ResourceId, value: f64) -> IhcResult<bool> {
        self.set_resource_value(
            id,
            &format!(r#"i:type="a:WSFloatingPointValue" xmlns:a="{UTCS_VALUES_NS}"><a:floatingPointValue>{value}</a:floatingPointValue>"#),
        )
        .await
    }

    pub async fn set_resource_value_enum(&self, id: ResourceId, enum_name: &str) -> IhcResult<bool> {
        self.set_resource_value(
            id,
            &format!(r#"i:type="a:WSEnumValue" xmlns:a="{UTCS_VALUES_NS}"><a:enumName>{}</a:enumName>"#, escape(enum_name)),
        )
        .await
    }

    pub async fn set_resource_value_timer(&self, id: ResourceId, milliseconds: i64) -> IhcResult<bool> {
        self.set_resource_value(
            id,
            &format!(r#"i:type="a:WSTimerValue" xmlns:a="{UTCS_VALUES_NS}"><a:milliseconds>{milliseconds}</a:milliseconds>"#),
        )
        .await
    }

    pub async fn set_resource_value_time(&self, id: ResourceId, hours: u8, minutes: u8, seconds: u8) -> IhcResult<bool> {
        self.set_resource_value(
            id,
            &format!(
                r#"i:type="a:WSTimeValue" xmlns:a="{UTCS_VALUES_NS}"><a:hours>{hours}</a:hours><a:minutes>{minutes}</a:minutes><a:seconds>{seconds}</a:seconds>"#
            ),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_resource_value_datetime(
        &self,
        id: ResourceId,
        year: i32,
        month: u8,
        day: u8,
        hours: u8,
        minutes: u8,
        seconds: u8,
    ) -> IhcResult<bool> {
        self.set_resource_value(
            id,
            &format!(
                r#"i:type="a:WSDateTimeValue" xmlns:a="{UTCS_VALUES_NS}"><a:year>{year}</a:year><a:monthWithJanuaryAsOne>{month}</a:monthWithJanuaryAsOne><a:day>{day}</a:day><a:hours>{hours}</a:hours><a:minutes>{minutes}</a:minutes><a:seconds>{seconds}</a:seconds>"#
            ),
        )
        .await
    }

    pub async fn set_resource_value_date(&self, id: ResourceId, year: i32, month: u8, day: u8) -> IhcResult<bool> {
        self.set_resource_value(
            id,
            &format!(r#"i:type="a:WSDateValue" xmlns:a="{UTCS_VALUES_NS}"><a:year>{year}</a:year><a:month>{month}</a:month><a:day>{day}</a:day>"#),
        )
        .await
    }

    async fn set_resource_value(&self, id: ResourceId, value_inner: &str) -> IhcResult<bool> {
        let body = format!(
            r#"<setResourceValue1 xmlns="{UTCS_NS}" xmlns:i="http://www.w3.org/2001/XMLSchema-instance"><value {value_inner}</value><typeString/><resourceID>{id}</resourceID><isValueRuntime>true</isValueRuntime></setResourceValue1>"#
        );
        let response = self.session.soap_action(RESOURCE_SERVICE, "setResourceValue", &body).await?;
        Ok(response.text_trimmed() == "true")
    }

    /// One `setResourceValues` POST carrying `items` as a single array.
    /// Returns whether every write succeeded.
    pub async fn set_resource_values(&self, items: &[(ResourceId, ResourceValue)]) -> IhcResult<bool> {
        let array_items: String = items
            .iter()
            .map(|(id, value)| {
                format!(
                    r#"<a:arrayItem><resourceID>{id}</resourceID><value {}</value><isValueRuntime>true</isValueRuntime></a:arrayItem>"#,
                    value_inner_for(value)
                )
            })
            .collect();
        let body = format!(
            r#"<setResourceValues1 xmlns="{UTCS_NS}" xmlns:a="http://www.w3.org/2001/XMLSchema" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">{array_items}</setResourceValues1>"#
        );
        let response = self.session.soap_action(RESOURCE_SERVICE, "setResourceValues", &body).await?;
        Ok(response.text_trimmed() == "true")
    }

    /// Pulses a boolean resource in one round trip: a single
    /// `setResourceValues` array with two items, `true` then `false`.
    pub async fn cycle_bool_value(&self, id: ResourceId) -> IhcResult<bool> {
        self.set_resource_values(&[(id, ResourceValue::Bool(true)), (id, ResourceValue::Bool(false))])
            .await
    }

    pub async fn enable_runtime_value_notifications(&self, ids: &[ResourceId]) -> IhcResult<bool> {
        let items: String = ids.iter().map(|id| format!("<a:arrayItem>{id}</a:arrayItem>")).collect();
        let body = format!(
            r#"<enableRuntimeValueNotifications1 xmlns="{UTCS_NS}" xmlns:a="http://www.w3.org/2001/XMLSchema" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">{items}</enableRuntimeValueNotifications1>"#
        );
        let response = self
            .session
            .soap_action(RESOURCE_SERVICE, "enableRuntimeValueNotifications", &body)
            .await?;
        let _ = response;
        Ok(true)
    }

    /// Long-polls up to `wait_secs`, returning insertion-ordered
    /// `(id, value)` pairs (the "change list" surface). Callers wanting
    /// the deduped-map surface can call `.into_iter().collect()`-style
    /// folding, or use [`as_map`] on the result.
    pub async fn wait_for_resource_value_changes(&self, wait_secs: u32) -> IhcResult<Vec<(ResourceId, ResourceValue)>> {
        let body = format!(r#"<waitForResourceValueChanges1 xmlns="{UTCS_NS}">{wait_secs}</waitForResourceValueChanges1>"#);
        let response = self
            .session
            .soap_action(RESOURCE_SERVICE, "waitForResourceValueChanges", &body)
            .await?;
        let mut changes = Vec::new();
        for item in response.children_named("arrayItem") {
            let Some(id) = item.child("resourceID").and_then(|c| c.text_trimmed().parse::<i32>().ok()) else {
                continue;
            };
            if let Some(value_el) = item.child("value") {
                if let Some(value) = value::decode_now(value_el)? {
                    changes.push((ResourceId(id), value));
                }
            }
        }
        Ok(changes)
    }
}

/// Deduped-map adapter over the change-list surface: last value per id
/// wins.
pub fn as_map(changes: &[(ResourceId, ResourceValue)]) -> HashMap<ResourceId, ResourceValue> {
    changes.iter().cloned().collect()
}

fn value_inner_for(value: &ResourceValue) -> String {
    match value {
        ResourceValue::Bool(v) => format!(r#"i:type="a:WSBooleanValue" xmlns:a="{UTCS_VALUES_NS}"><a:value>{v}</a:value>"#),
        ResourceValue::Int(v) => format!(r#"i:type="a:WSIntegerValue" xmlns:a="{UTCS_VALUES_NS}"><a:integer>{v}</a:integer>"#),
        ResourceValue::Float(v) => format!(
            r#"i:type="a:WSFloatingPointValue" xmlns:a="{UTCS_VALUES_NS}"><a:floatingPointValue>{v}</a:floatingPointValue>"#
        ),
        ResourceValue::EnumName(v) => format!(r#"i:type="a:WSEnumValue" xmlns:a="{UTCS_VALUES_NS}"><a:enumName>{}</a:enumName>"#, escape(v)),
        ResourceValue::TimerMilliseconds(v) => {
            format!(r#"i:type="a:WSTimerValue" xmlns:a="{UTCS_VALUES_NS}"><a:milliseconds>{v}</a:milliseconds>"#)
        }
        ResourceValue::TimeOfDay(t) => format!(
            r#"i:type="a:WSTimeValue" xmlns:a="{UTCS_VALUES_NS}"><a:hours>{}</a:hours><a:minutes>{}</a:minutes><a:seconds>{}</a:seconds>"#,
            t.hours, t.minutes, t.seconds
        ),
        ResourceValue::DateTime(d) => format!(
            r#"i:type="a:WSDateTimeValue" xmlns:a="{UTCS_VALUES_NS}"><a:year>{}</a:year><a:monthWithJanuaryAsOne>{}</a:monthWithJanuaryAsOne><a:day>{}</a:day><a:hours>{}</a:hours><a:minutes>{}</a:minutes><a:seconds>{}</a:seconds>"#,
            d.year, d.month, d.day, d.hours, d.minutes, d.seconds
        ),
        ResourceValue::Date(d) => format!(
            r#"i:type="a:WSDateValue" xmlns:a="{UTCS_VALUES_NS}"><a:year>{}</a:year><a:month>{}</a:month><a:day>{}</a:day>"#,
            d.year, d.month, d.day
        ),
        ResourceValue::Raw(text) => text.clone(),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn child_text(el: &XmlElement, local_name: &str) -> String {
    el.child(local_name).map(|c| c.text_trimmed().to_string()).unwrap_or_default()
}

fn child_u32(el: &XmlElement, local_name: &str) -> IhcResult<u32> {
    child_text(el, local_name)
        .parse()
        .map_err(|_| IhcError::Protocol(format!("missing or invalid <{local_name}>")))
}

/// base64 -> zlib decompress (window 16+MAX_WBITS, i.e. gzip-wrapped) ->
/// ISO-8859-1 decode, re-encoded as UTF-8 bytes.
fn decompress_project(base64_text: &str) -> IhcResult<Vec<u8>> {
    let compressed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, base64_text)
        .map_err(|e| IhcError::Decompress(format!("invalid base64 project data: {e}")))?;
    decompress_bytes(&compressed)
}

fn decompress_bytes(compressed: &[u8]) -> IhcResult<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(compressed);
    let mut latin1 = Vec::new();
    decoder
        .read_to_end(&mut latin1)
        .map_err(|e| IhcError::Decompress(format!("failed to inflate project data: {e}")))?;
    // ISO-8859-1 maps every byte directly onto the Unicode code point of
    // the same value, so `decode_latin1` (unlike the WHATWG `windows-1252`
    // label encoding_rs otherwise exposes for "iso-8859-1") is exact here.
    let text = encoding_rs::mem::decode_latin1(&latin1);
    Ok(text.into_owned().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip_base64(text: &str) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, compressed)
    }

    #[test]
    fn decompress_project_round_trips_ascii_text() {
        let encoded = gzip_base64("HELLO");
        let decoded = decompress_project(&encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "HELLO");
    }

    #[test]
    fn decompress_project_rejects_garbage_base64() {
        let err = decompress_project("not valid base64!!").unwrap_err();
        assert!(matches!(err, IhcError::Decompress(_)));
    }

    #[test]
    fn cycle_bool_value_body_is_true_then_false() {
        let items = [(ResourceId(9), ResourceValue::Bool(true)), (ResourceId(9), ResourceValue::Bool(false))];
        let rendered: Vec<String> = items.iter().map(|(_, v)| value_inner_for(v)).collect();
        assert!(rendered[0].contains("<a:value>true</a:value>"));
        assert!(rendered[1].contains("<a:value>false</a:value>"));
    }

    #[test]
    fn as_map_keeps_last_value_per_id() {
        let changes = vec![
            (ResourceId(7), ResourceValue::Bool(true)),
            (ResourceId(7), ResourceValue::Bool(false)),
        ];
        let map = as_map(&changes);
        assert_eq!(map.get(&ResourceId(7)), Some(&ResourceValue::Bool(false)));
    }

    #[test]
    fn escape_handles_xml_metacharacters() {
        assert_eq!(escape("a&b<c>d"), "a&amp;b&lt;c&gt;d");
    }
}
