//! SOAP envelope framing
//!
//! The controller speaks a single, fixed SOAP 1.1 envelope shape;
//! there is no content negotiation and no SOAP 1.2 variant to support, so
//! this module is a straight `wrap`/`parse_body` pair rather than a
//! generic multi-version envelope builder.

use crate::error::{IhcError, IhcResult};
use crate::xml::{self, XmlElement};

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Wrap `body` (already-serialized XML for the operation) in the fixed
/// envelope every request uses.
pub fn wrap(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:xsd="{XSD_NS}" xmlns:xsi="{XSI_NS}"><s:Body>{body}</s:Body></s:Envelope>"#
    )
}

/// Parse a response envelope and return the first child of `<s:Body>`,
/// the operation's response element, still namespace-resolved against the
/// `ns1`/`ns2`/`ns3` = `utcs`/`utcs.values` scheme (ns2 and ns3 share one
/// URI; resolution is by URI, not literal prefix, so both collapse onto
/// the same lookup regardless of which prefix a given firmware revision
/// happens to emit).
pub fn parse_body(xml_text: &str) -> IhcResult<XmlElement> {
    let root = xml::parse(xml_text)?;
    check_for_fault(&root)?;
    let body = root
        .child_ns(SOAP_ENV_NS, "Body")
        .ok_or_else(|| IhcError::Protocol("response has no SOAP Body".to_string()))?;
    body.children
        .first()
        .cloned()
        .ok_or_else(|| IhcError::Protocol("SOAP Body has no response element".to_string()))
}

fn check_for_fault(root: &XmlElement) -> IhcResult<()> {
    let Some(body) = root.child_ns(SOAP_ENV_NS, "Body") else {
        return Ok(());
    };
    let Some(fault) = body.child("Fault") else {
        return Ok(());
    };
    let code = fault
        .child("faultcode")
        .map(|c| c.text_trimmed().to_string())
        .unwrap_or_default();
    let message = fault
        .child("faultstring")
        .map(|c| c.text_trimmed().to_string())
        .unwrap_or_default();
    Err(IhcError::Protocol(format!("SOAP fault {code}: {message}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_produces_fixed_envelope_shape() {
        let envelope = wrap("<ping/>");
        assert!(envelope.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(envelope.contains(&format!(r#"xmlns:s="{SOAP_ENV_NS}""#)));
        assert!(envelope.contains(&format!(r#"xmlns:xsd="{XSD_NS}""#)));
        assert!(envelope.contains(&format!(r#"xmlns:xsi="{XSI_NS}""#)));
        assert!(envelope.contains("<s:Body><ping/></s:Body>"));
    }

    #[test]
    fn parse_body_returns_first_response_element() {
        let xml_text = format!(
            r#"<s:Envelope xmlns:s="{SOAP_ENV_NS}"><s:Body><ns1:getStateResponse xmlns:ns1="utcs"><ns1:getStateResult>text.ctrl.state.ready</ns1:getStateResult></ns1:getStateResponse></s:Body></s:Envelope>"#
        );
        let response = parse_body(&xml_text).unwrap();
        assert_eq!(response.local_name, "getStateResponse");
        assert_eq!(response.ns_uri.as_deref(), Some("utcs"));
    }

    #[test]
    fn parse_body_surfaces_soap_fault() {
        let xml_text = format!(
            r#"<s:Envelope xmlns:s="{SOAP_ENV_NS}"><s:Body><s:Fault><faultcode>s:Server</faultcode><faultstring>boom</faultstring></s:Fault></s:Body></s:Envelope>"#
        );
        let err = parse_body(&xml_text).unwrap_err();
        assert!(matches!(err, IhcError::Protocol(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn parse_body_rejects_missing_body() {
        let err = parse_body("<root/>").unwrap_err();
        assert!(matches!(err, IhcError::Protocol(_)));
    }
}
