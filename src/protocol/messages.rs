//! Gateway wire messages
//!
//! Device-list reports published by the gateway and the operation results the
//! broker sends back. All payloads are UTF-8 JSON with camelCase field names.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Report that the listed devices came online
pub const MSG_TYPE_REPORT_ONLINE: i32 = 1;
/// Report that the listed devices went offline
pub const MSG_TYPE_REPORT_OFFLINE: i32 = 3;

/// Result code carried by successful reports
pub const CODE_OK: i32 = 200;

/// Role of a device record inside a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classify {
    /// The gateway itself, directly attached to the broker
    Direct,
    /// A logical device behind the gateway
    Sub,
}

/// Single readable/writable point of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub index: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_info: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attribute {
    pub fn new(index: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            value: value.into(),
            access: None,
            content_type: None,
            content_info: None,
            name: None,
        }
    }
}

/// Device entry of a gateway report
///
/// # Examples
/// ```
/// use gatelink::protocol::{Attribute, Classify, DeviceRecord};
///
/// let lamp = DeviceRecord {
///     device_id: "gw-1#lamp".to_string(),
///     host_id: "gw-1".to_string(),
///     classify: Classify::Sub,
///     name: "lamp".to_string(),
///     alias_id: Some(6002),
///     device_type: "100".to_string(),
///     manufacturer_name: "ACME".to_string(),
///     vaddr: Some("LIGHT-11".to_string()),
///     attributes: vec![Attribute::new("1001", "1")],
/// };
/// let json = serde_json::to_string(&lamp).unwrap();
/// assert!(json.contains("\"classify\":\"sub\""));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub host_id: String,
    pub classify: Classify,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_id: Option<i64>,
    #[serde(rename = "type")]
    pub device_type: String,
    pub manufacturer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vaddr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

/// Device-list report exchanged on the gateway event topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMessage {
    pub msg_type: i32,
    pub ack: u8,
    /// Unique per logical report, never reused
    pub msg_id: String,
    pub msg: String,
    pub code: i32,
    /// Milliseconds since the unix epoch, as a decimal string
    pub time_stamp: String,
    #[serde(rename = "data", default)]
    pub devices: Vec<DeviceRecord>,
}

impl GatewayMessage {
    /// Build a report stamped with a fresh message id and the current time
    pub fn report(msg_type: i32, ack: u8, code: i32, devices: Vec<DeviceRecord>) -> Self {
        Self {
            msg_type,
            ack,
            msg_id: Uuid::new_v4().to_string(),
            msg: "report device".to_string(),
            code,
            time_stamp: Utc::now().timestamp_millis().to_string(),
            devices,
        }
    }

    /// Online report: acknowledged, code 200
    pub fn online(devices: Vec<DeviceRecord>) -> Self {
        Self::report(MSG_TYPE_REPORT_ONLINE, 1, CODE_OK, devices)
    }

    /// Offline report: unacknowledged, code 0
    pub fn offline(devices: Vec<DeviceRecord>) -> Self {
        Self::report(MSG_TYPE_REPORT_OFFLINE, 0, 0, devices)
    }

    /// Codes 0 and 200 both mean success
    pub fn is_success(&self) -> bool {
        self.code == 0 || self.code == CODE_OK
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Operation named by a gateway result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOperation {
    Online,
    Offline,
    Other(String),
}

impl GatewayOperation {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("online") {
            GatewayOperation::Online
        } else if s.eq_ignore_ascii_case("offline") {
            GatewayOperation::Offline
        } else {
            GatewayOperation::Other(s.to_string())
        }
    }
}

/// Result code as sent by the broker, either `"0"` or `0`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ResultCode {
    Number(i64),
    Text(String),
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        match self {
            ResultCode::Number(n) => *n == 0,
            ResultCode::Text(s) => s.trim() == "0",
        }
    }
}

#[derive(Deserialize)]
struct RawGatewayResult {
    #[serde(rename = "type")]
    op_type: String,
    #[serde(default)]
    result: Option<ResultCode>,
}

/// Operation result received on `$gateway/operation/result/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResult {
    pub operation: GatewayOperation,
    pub result: Option<ResultCode>,
}

impl GatewayResult {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawGatewayResult = serde_json::from_slice(payload)?;
        Ok(Self {
            operation: GatewayOperation::parse(&raw.op_type),
            result: raw.result,
        })
    }

    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_some_and(ResultCode::is_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sub_record() -> DeviceRecord {
        DeviceRecord {
            device_id: "gw-1#lighting#SC#111212121".to_string(),
            host_id: "gw-1".to_string(),
            classify: Classify::Sub,
            name: "lamp".to_string(),
            alias_id: Some(6002),
            device_type: "100".to_string(),
            manufacturer_name: "JOBO".to_string(),
            vaddr: Some("LIGHT-11".to_string()),
            attributes: vec![
                Attribute::new("1001", "1"),
                Attribute {
                    access: Some("rw".to_string()),
                    content_type: Some("enum".to_string()),
                    content_info: Some(BTreeMap::from([
                        ("0".to_string(), "off".to_string()),
                        ("1".to_string(), "on".to_string()),
                    ])),
                    name: Some("switch".to_string()),
                    ..Attribute::new("1002", "0")
                },
            ],
        }
    }

    fn direct_record() -> DeviceRecord {
        DeviceRecord {
            device_id: "gw-1".to_string(),
            host_id: "gw-1".to_string(),
            classify: Classify::Direct,
            name: "test-gw".to_string(),
            alias_id: None,
            device_type: "1".to_string(),
            manufacturer_name: "JOBO".to_string(),
            vaddr: None,
            attributes: vec![],
        }
    }

    #[test]
    fn test_wire_field_names() {
        let msg = GatewayMessage::online(vec![sub_record(), direct_record()]);
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["msgType"], 1);
        assert_eq!(value["ack"], 1);
        assert_eq!(value["code"], 200);
        assert_eq!(value["msg"], "report device");
        assert!(value["msgId"].is_string());
        assert!(value["timeStamp"].is_string());

        let data = value["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["deviceId"], "gw-1#lighting#SC#111212121");
        assert_eq!(data[0]["type"], "100");
        assert_eq!(data[0]["aliasId"], 6002);
        assert_eq!(data[0]["manufacturerName"], "JOBO");
        assert_eq!(data[0]["attributes"][1]["contentType"], "enum");
        assert_eq!(data[0]["attributes"][1]["contentInfo"]["1"], "on");

        // Absent optionals are omitted, not serialized as null
        assert!(data[1].get("aliasId").is_none());
        assert!(data[1].get("vaddr").is_none());
        assert!(data[1].get("attributes").is_none());
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let msg = GatewayMessage::online(vec![sub_record(), direct_record()]);
        let bytes = msg.to_bytes().unwrap();
        let parsed = GatewayMessage::from_slice(&bytes).unwrap();

        assert_eq!(parsed, msg);
        assert_eq!(parsed.devices[0].classify, Classify::Sub);
        assert_eq!(parsed.devices[0].attributes[0].index, "1001");
        assert_eq!(parsed.devices[0].attributes[1].index, "1002");
        assert_eq!(parsed.devices[1].classify, Classify::Direct);
    }

    #[test]
    fn test_reports_get_unique_ids() {
        let first = GatewayMessage::offline(vec![sub_record()]);
        let second = GatewayMessage::offline(vec![sub_record()]);
        assert_ne!(first.msg_id, second.msg_id);
        assert_eq!(first.msg_type, MSG_TYPE_REPORT_OFFLINE);
        assert_eq!(first.ack, 0);
        assert_eq!(first.code, 0);
        assert!(first.time_stamp.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_success_codes() {
        let mut msg = GatewayMessage::online(vec![]);
        assert!(msg.is_success());
        msg.code = 0;
        assert!(msg.is_success());
        msg.code = 500;
        assert!(!msg.is_success());
    }

    #[test]
    fn test_parse_gateway_result() {
        let online = GatewayResult::parse(br#"{"type":"online","result":"0"}"#).unwrap();
        assert_eq!(online.operation, GatewayOperation::Online);
        assert!(online.is_success());

        let offline = GatewayResult::parse(br#"{"type":"OFFLINE","result":0}"#).unwrap();
        assert_eq!(offline.operation, GatewayOperation::Offline);
        assert!(offline.is_success());

        let failed = GatewayResult::parse(br#"{"type":"online","result":"-1"}"#).unwrap();
        assert!(!failed.is_success());

        let missing = GatewayResult::parse(br#"{"type":"bind"}"#).unwrap();
        assert_eq!(missing.operation, GatewayOperation::Other("bind".to_string()));
        assert!(!missing.is_success());
    }

    #[test]
    fn test_parse_gateway_result_failures() {
        assert!(GatewayResult::parse(b"not json").is_err());
        assert!(GatewayResult::parse(br#"{"result":"0"}"#).is_err());
    }
}
