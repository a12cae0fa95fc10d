//! Wire types for the controller REST API. Replies arrive as an `imdata`
//! envelope of class-keyed managed objects; all attribute values are strings.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApicError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request to {url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("no login credentials configured")]
    MissingCredentials,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("internal task failure")]
    Internal,
}

/// Session token pair returned by `aaaLogin` with `gui-token-request=yes`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoginAttributes {
    pub token: String,
    #[serde(rename = "urlToken")]
    pub url_token: String,
}

/// Discovered client endpoint (`fvCEp`) attributes rendered into the table.
/// The controller sends many more attributes; these three are the ones shown.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EndpointRecord {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub encap: String,
}

impl EndpointRecord {
    pub const CLASS_NAME: &'static str = "fvCEp";

    /// Extract endpoint records from envelope objects, skipping anything that
    /// is not an `fvCEp`.
    pub fn from_imdata(objects: &[Value]) -> Vec<EndpointRecord> {
        objects
            .iter()
            .filter_map(|obj| {
                let (class_name, attributes) = class_attributes(obj)?;
                if class_name != Self::CLASS_NAME {
                    log::debug!("skipping object of class {}", class_name);
                    return None;
                }
                serde_json::from_value(attributes.clone()).ok()
            })
            .collect()
    }
}

/// `dnsProv` attributes mirrored into the provider table. Objects missing any
/// of these fields are skipped by the sync.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DnsProviderAttributes {
    pub dn: String,
    pub addr: String,
    pub preferred: String,
}

/// `dnsDomain` attributes mirrored into the domain table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DnsDomainAttributes {
    pub dn: String,
    pub name: String,
    #[serde(rename = "isDefault")]
    pub is_default: String,
}

/// Reply from the resolve backend. `ptr` is optional on purpose: a reply
/// without it is treated as an error by the caller and never rendered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveReply {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub ptr: Option<String>,
    #[serde(default)]
    pub cache: bool,
}

/// Controller boolean attributes arrive as `yes`/`no` strings.
pub fn yes_no(flag: &str) -> bool {
    flag == "yes"
}

/// Managed objects are keyed by their class name:
/// `{"fvCEp": {"attributes": {...}, "children": [...]}}`.
/// Returns the class name and its `attributes` object.
pub fn class_attributes(obj: &Value) -> Option<(&str, &Value)> {
    let map = obj.as_object()?;
    let (class_name, body) = map.iter().next()?;
    Some((class_name.as_str(), body.get("attributes")?))
}

/// Validate a class/dn query reply: both `imdata` and `totalCount` must be
/// present. Returns the page's objects and the parsed total.
pub fn parse_class_reply(js: &Value) -> Result<(Vec<Value>, usize), ApicError> {
    let imdata = js
        .get("imdata")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ApicError::MalformedReply("reply missing imdata".to_string()))?;
    let total_count = js
        .get("totalCount")
        .ok_or_else(|| ApicError::MalformedReply("reply missing totalCount".to_string()))?;

    // totalCount is a quoted number on the wire; a bare number is accepted too
    let total = total_count
        .as_str()
        .and_then(|s| s.parse::<usize>().ok())
        .or_else(|| total_count.as_u64().map(|n| n as usize))
        .ok_or_else(|| {
            ApicError::MalformedReply(format!("unparseable totalCount {}", total_count))
        })?;

    Ok((imdata.clone(), total))
}

/// Pull the token pair out of a login reply.
pub fn parse_login_reply(js: &Value) -> Result<LoginAttributes, ApicError> {
    let attributes = js
        .get("imdata")
        .and_then(|imdata| imdata.get(0))
        .and_then(|obj| obj.get("aaaLogin"))
        .and_then(|login| login.get("attributes"))
        .ok_or_else(|| {
            ApicError::MalformedReply("login reply missing aaaLogin attributes".to_string())
        })?;
    serde_json::from_value(attributes.clone())
        .map_err(|e| ApicError::MalformedReply(format!("login attributes: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_attributes_unwraps_first_key() {
        let obj = json!({"fvCEp": {"attributes": {"ip": "10.0.0.5"}}});
        let (class_name, attributes) = class_attributes(&obj).unwrap();
        assert_eq!(class_name, "fvCEp");
        assert_eq!(attributes["ip"], "10.0.0.5");
    }

    #[test]
    fn test_class_attributes_missing_attributes() {
        let obj = json!({"fvCEp": {"children": []}});
        assert!(class_attributes(&obj).is_none());
        assert!(class_attributes(&json!([])).is_none());
    }

    #[test]
    fn test_endpoint_records_from_imdata() {
        let objects = vec![
            json!({"fvCEp": {"attributes": {
                "ip": "10.0.0.5", "mac": "AA:BB:CC:DD:EE:01", "encap": "vlan-100"
            }}}),
            json!({"fvCEp": {"attributes": {
                "ip": "10.0.0.6", "mac": "AA:BB:CC:DD:EE:02", "encap": "vlan-100"
            }}}),
        ];
        let records = EndpointRecord::from_imdata(&objects);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ip, "10.0.0.5");
        assert_eq!(records[1].mac, "AA:BB:CC:DD:EE:02");
    }

    #[test]
    fn test_endpoint_records_skip_other_classes() {
        let objects = vec![
            json!({"fvTenant": {"attributes": {"name": "common"}}}),
            json!({"fvCEp": {"attributes": {"ip": "10.0.0.5", "mac": "m", "encap": "e"}}}),
        ];
        let records = EndpointRecord::from_imdata(&objects);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, "10.0.0.5");
    }

    #[test]
    fn test_endpoint_record_missing_fields_default_empty() {
        let objects = vec![json!({"fvCEp": {"attributes": {"ip": "10.0.0.5"}}})];
        let records = EndpointRecord::from_imdata(&objects);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mac, "");
        assert_eq!(records[0].encap, "");
    }

    #[test]
    fn test_parse_class_reply_requires_envelope() {
        let js = json!({"imdata": [], "totalCount": "0"});
        let (objects, total) = parse_class_reply(&js).unwrap();
        assert!(objects.is_empty());
        assert_eq!(total, 0);

        assert!(parse_class_reply(&json!({"imdata": []})).is_err());
        assert!(parse_class_reply(&json!({"totalCount": "0"})).is_err());
    }

    #[test]
    fn test_parse_class_reply_rejects_bad_total() {
        let err = parse_class_reply(&json!({"imdata": [], "totalCount": "many"})).unwrap_err();
        assert!(err.to_string().contains("totalCount"));
    }

    #[test]
    fn test_parse_login_reply() {
        let js = json!({"imdata": [{"aaaLogin": {"attributes": {
            "token": "tok-1", "urlToken": "url-tok-1", "refreshTimeoutSeconds": "600"
        }}}]});
        let attributes = parse_login_reply(&js).unwrap();
        assert_eq!(attributes.token, "tok-1");
        assert_eq!(attributes.url_token, "url-tok-1");
    }

    #[test]
    fn test_parse_login_reply_missing_attributes() {
        assert!(parse_login_reply(&json!({"imdata": []})).is_err());
        assert!(parse_login_reply(&json!({"error": "denied"})).is_err());
    }

    #[test]
    fn test_yes_no() {
        assert!(yes_no("yes"));
        assert!(!yes_no("no"));
        assert!(!yes_no(""));
    }
}
