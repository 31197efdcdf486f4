//! Device capabilities: remote operations a device says it supports.
//!
//! Devices announce capabilities at redemption time as a `|`-delimited list of
//! JSON objects:
//!
//! ```text
//! {"uri":"/on","string":"Turn on","method":"POST"}|{"uri":"/status","string":"Get status","method":"GET"}
//! ```

use serde::{Deserialize, Serialize};

use crate::identity::DeviceId;

/// Separator between entries of a capability list.
pub const CAPABILITY_SEPARATOR: char = '|';

/// Errors from parsing a capability list.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// An entry is not a JSON object with the required keys.
    #[error("malformed capability at position {index}: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// An entry has an empty `uri` or `method`.
    #[error("capability at position {index} has empty field `{field}`")]
    EmptyField { index: usize, field: &'static str },
}

/// A capability as announced by a device, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub uri: String,
    /// Human-readable label. Sent as `string` on the wire.
    #[serde(rename = "string")]
    pub display_string: String,
    pub method: String,
}

impl CapabilitySpec {
    pub fn new(
        uri: impl Into<String>,
        display_string: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            display_string: display_string.into(),
            method: method.into(),
        }
    }
}

/// A stored capability bound to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub device_id: DeviceId,
    pub uri: String,
    pub display_string: String,
    pub method: String,
}

impl Capability {
    pub fn matches(&self, uri: &str, method: &str) -> bool {
        self.uri == uri && self.method.eq_ignore_ascii_case(method)
    }
}

/// Parse a `|`-delimited capability list.
///
/// All-or-nothing: the first malformed entry fails the whole list. Blank
/// entries (an empty input, or a trailing separator) are skipped.
pub fn parse_capability_list(raw: &str) -> Result<Vec<CapabilitySpec>, CapabilityError> {
    let mut specs = Vec::new();

    for (index, entry) in raw.split(CAPABILITY_SEPARATOR).enumerate() {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let spec: CapabilitySpec = serde_json::from_str(entry)
            .map_err(|source| CapabilityError::Malformed { index, source })?;

        if spec.uri.trim().is_empty() {
            return Err(CapabilityError::EmptyField { index, field: "uri" });
        }
        if spec.method.trim().is_empty() {
            return Err(CapabilityError::EmptyField {
                index,
                field: "method",
            });
        }

        specs.push(spec);
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_capabilities_in_order() {
        let raw = r#"{"uri":"/on","string":"Turn on","method":"POST"}|{"uri":"/status","string":"Get status","method":"GET"}"#;
        let specs = parse_capability_list(raw).unwrap();

        assert_eq!(
            specs,
            vec![
                CapabilitySpec::new("/on", "Turn on", "POST"),
                CapabilitySpec::new("/status", "Get status", "GET"),
            ]
        );
    }

    #[test]
    fn empty_list_is_empty() {
        assert!(parse_capability_list("").unwrap().is_empty());
        assert!(parse_capability_list("  ").unwrap().is_empty());
    }

    #[test]
    fn missing_key_rejects_whole_list() {
        let raw = r#"{"uri":"/on","string":"Turn on","method":"POST"}|{"uri":"/off","string":"Turn off"}"#;
        let err = parse_capability_list(raw).unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed { index: 1, .. }));
    }

    #[test]
    fn garbage_entry_is_malformed() {
        let err = parse_capability_list("not json").unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed { index: 0, .. }));
    }

    #[test]
    fn empty_method_is_rejected() {
        let raw = r#"{"uri":"/on","string":"Turn on","method":""}"#;
        let err = parse_capability_list(raw).unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::EmptyField {
                index: 0,
                field: "method"
            }
        ));
    }

    #[test]
    fn display_string_uses_wire_name() {
        let spec = CapabilitySpec::new("/on", "Turn on", "POST");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["string"], "Turn on");
        assert!(json.get("display_string").is_none());
    }

    #[test]
    fn method_match_ignores_case() {
        let cap = Capability {
            device_id: DeviceId::new(1),
            uri: "/on".into(),
            display_string: "Turn on".into(),
            method: "POST".into(),
        };
        assert!(cap.matches("/on", "post"));
        assert!(!cap.matches("/off", "POST"));
    }
}
