//! Wire model of LIS visit payloads.
//!
//! A visit carries a list of top-level entries. Each entry is either a single
//! investigation or a group whose children may themselves be groups. The tree
//! is parsed once into [`LisNode`] and walked iteratively afterwards.

use std::collections::VecDeque;

use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::domain::errors::{DomainError, DomainResult};

/// Report format requested when refetching a visit.
pub const STATIONERY_PDF: &str = "StationeryPDF";
/// Report format of visits that must not be processed.
pub const NON_STATIONERY_PDF: &str = "NonStationeryPDF";

/// Status bucket an LIS entry reports itself in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LisBucket {
    /// Result is final.
    Completed,
    /// Result approved in the LIS.
    Approve,
    /// Rerun requested in the LIS.
    Rerun,
    /// Any other status, kept verbatim.
    Other(String),
}

impl LisBucket {
    /// Map the `TestStatus` string onto a bucket.
    pub fn from_status(status: &str) -> Self {
        match status {
            "Completed" => Self::Completed,
            "Approve" => Self::Approve,
            "Rerun" => Self::Rerun,
            other => Self::Other(other.to_string()),
        }
    }

    /// The LIS spelling of this bucket.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "Completed",
            Self::Approve => "Approve",
            Self::Rerun => "Rerun",
            Self::Other(s) => s,
        }
    }
}

/// Fields shared by investigations and group headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LisResult {
    /// LIS identifier of the test.
    #[serde(rename = "TestID", default, deserialize_with = "lenient_string")]
    pub test_id: String,
    /// Master test code.
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_code: String,
    /// Display name.
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_name: String,
    /// Reported value.
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_value: String,
    /// Unit of measure code.
    #[serde(rename = "UOMCode", default, deserialize_with = "lenient_string")]
    pub uom_code: String,
    /// Raw value read off the instrument.
    #[serde(default, deserialize_with = "lenient_string")]
    pub device_actual_value: String,
    /// Instrument identifier.
    #[serde(rename = "DeviceID", default, deserialize_with = "lenient_string")]
    pub device_id: String,
    /// Analysis method.
    #[serde(default, deserialize_with = "lenient_string")]
    pub method_name: String,
    /// Department that ran the test.
    #[serde(default, deserialize_with = "lenient_string")]
    pub department_name: String,
    /// Reference range as printed.
    #[serde(default, deserialize_with = "lenient_string")]
    pub reference_range: String,
    /// When the result was captured, as sent.
    #[serde(default, deserialize_with = "lenient_string")]
    pub result_captured_at: String,
    /// User who captured the result.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub result_captured_by: i64,
    /// When the result was approved, as sent.
    #[serde(default, deserialize_with = "lenient_string")]
    pub result_approved_at: String,
    /// User who approved the result.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub result_approved_by: i64,
    /// LIS status string, see [`LisBucket`].
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_status: String,
    /// Remarks for the clinician.
    #[serde(default, deserialize_with = "lenient_string")]
    pub medical_remarks: String,
    /// Remarks for the lab.
    #[serde(default, deserialize_with = "lenient_string")]
    pub technical_remarks: String,
    /// Why a rerun was asked for.
    #[serde(default, deserialize_with = "lenient_string")]
    pub rerun_reason: String,
    /// Free-text rerun notes.
    #[serde(default, deserialize_with = "lenient_string")]
    pub rerun_remarks: String,
    /// When the rerun was asked for.
    #[serde(default, deserialize_with = "lenient_string")]
    pub rerun_time: String,
    /// `Yes` when the result came from an interfaced instrument.
    #[serde(rename = "IMDevice", default, deserialize_with = "lenient_string")]
    pub im_device: String,
    /// `AV` when the instrument auto-verified the result.
    #[serde(rename = "IMDeviceFlag", default, deserialize_with = "lenient_string")]
    pub im_device_flag: String,
    /// QC flag raised by the instrument.
    #[serde(default, deserialize_with = "lenient_string")]
    pub qc_flag: String,
    /// QC material lot.
    #[serde(default, deserialize_with = "lenient_string")]
    pub qc_lot_number: String,
    /// QC measurement.
    #[serde(default, deserialize_with = "lenient_string")]
    pub qc_value: String,
    /// Westgard rule warning, if any.
    #[serde(default, deserialize_with = "lenient_string")]
    pub qc_west_gard_warning: String,
    /// `Pass` or `Fail`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub qc_status: String,
}

impl LisResult {
    /// Status bucket this entry reports itself in.
    pub fn bucket(&self) -> LisBucket {
        LisBucket::from_status(&self.test_status)
    }

    /// Result came from an interfaced instrument.
    pub fn is_im_device(&self) -> bool {
        self.im_device.eq_ignore_ascii_case("yes")
    }

    /// Instrument marked the result as auto-verified.
    pub fn is_im_device_verified(&self) -> bool {
        self.im_device_flag.eq_ignore_ascii_case("av")
    }

    /// The instrument QC run failed.
    pub fn qc_failed(&self) -> bool {
        self.qc_status == "Fail"
    }

    /// Parsed capture time.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        parse_lis_timestamp(&self.result_captured_at)
    }

    /// Parsed approval time.
    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        parse_lis_timestamp(&self.result_approved_at)
    }
}

/// Parse an LIS timestamp. Accepts RFC 3339 as well as naive
/// `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD HH:MM:SS`, read as UTC.
pub fn parse_lis_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

/// A group header together with its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LisGroup {
    /// The group's own fields.
    pub header: LisResult,
    /// Nested entries, content list first then parameters.
    pub children: Vec<LisNode>,
}

/// One entry of the LIS result tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawNode")]
pub enum LisNode {
    /// A single test.
    Investigation(LisResult),
    /// A group of tests.
    Group(LisGroup),
    /// Entry with a `TestType` the engine does not handle.
    Unsupported {
        /// The unrecognised `TestType`.
        test_type: String,
        /// Fields of the entry.
        header: LisResult,
    },
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(rename = "TestType", default, deserialize_with = "lenient_string")]
    test_type: String,
    #[serde(rename = "OrderContentListInfo", default, deserialize_with = "nullable")]
    order_content: Vec<LisNode>,
    #[serde(rename = "ParameterListInfo", default, deserialize_with = "nullable")]
    parameters: Vec<LisNode>,
    #[serde(flatten)]
    result: LisResult,
}

impl From<RawNode> for LisNode {
    fn from(raw: RawNode) -> Self {
        match raw.test_type.to_uppercase().as_str() {
            "INV" | "INVESTIGATION" => Self::Investigation(raw.result),
            "GRP" | "GROUP" => {
                let mut children = raw.order_content;
                children.extend(raw.parameters);
                Self::Group(LisGroup {
                    header: raw.result,
                    children,
                })
            }
            _ => Self::Unsupported {
                test_type: raw.test_type,
                header: raw.result,
            },
        }
    }
}

impl LisNode {
    /// Shared fields of any node.
    pub fn header(&self) -> &LisResult {
        match self {
            Self::Investigation(result) => result,
            Self::Group(group) => &group.header,
            Self::Unsupported { header, .. } => header,
        }
    }

    /// Master test code of the node.
    pub fn test_code(&self) -> &str {
        &self.header().test_code
    }

    /// Whether the node is a group.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    /// Immediate children; empty for anything but a group.
    pub fn children(&self) -> &[LisNode] {
        match self {
            Self::Group(group) => &group.children,
            _ => &[],
        }
    }

    /// Leaf investigations in breadth-first order.
    ///
    /// A bare investigation yields itself. Walks with an explicit queue so
    /// deeply nested payloads cannot exhaust the stack.
    pub fn leaves(&self) -> Vec<&LisResult> {
        let mut leaves = Vec::new();
        let mut queue: VecDeque<&LisNode> = VecDeque::from([self]);
        while let Some(node) = queue.pop_front() {
            match node {
                Self::Investigation(result) => leaves.push(result),
                Self::Group(group) => queue.extend(group.children.iter()),
                Self::Unsupported { .. } => {}
            }
        }
        leaves
    }
}

/// A document attached to the visit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VisitDocument {
    /// Base64 encoded file.
    #[serde(rename = "VisitDocument", default, deserialize_with = "lenient_string")]
    pub document: String,
}

/// A full LIS visit, as pushed by webhook or returned by a refetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LisVisitPayload {
    /// OMS order the visit belongs to.
    #[serde(rename = "OrderId", default, deserialize_with = "lenient_string")]
    pub order_id: String,
    /// Top-level result entries.
    #[serde(rename = "OrderInfo", default, deserialize_with = "nullable")]
    pub order_info: Vec<LisNode>,
    /// Base64 encoded report, when requested.
    #[serde(rename = "ResultAsPdf", default, deserialize_with = "lenient_string")]
    pub result_as_pdf: String,
    /// Report format, see [`STATIONERY_PDF`].
    #[serde(rename = "ReportPDFFormat", default, deserialize_with = "lenient_string")]
    pub report_pdf_format: String,
    /// Documents attached to the visit.
    #[serde(rename = "VisitDocumentinfo", default, deserialize_with = "nullable")]
    pub visit_documents: Vec<VisitDocument>,
}

impl LisVisitPayload {
    /// Decode the base64 encoded JSON carried in webhook events.
    pub fn from_base64(data: &str) -> DomainResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| DomainError::ValidationFailed(format!("failed to decode base64 payload: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::ValidationFailed(format!("failed to parse LIS payload: {e}")))
    }

    /// Visits in this format are not processed.
    pub fn is_non_stationery(&self) -> bool {
        self.report_pdf_format == NON_STATIONERY_PDF
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts strings, numbers and null.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

/// Accepts integers, numeric strings and null; anything else reads as zero.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> LisVisitPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parses_investigation_and_nested_group() {
        let payload = parse(json!({
            "OrderInfo": [
                {"TestType": "INV", "TestCode": "GLU", "TestValue": "92", "TestStatus": "Completed",
                 "ResultApprovedBy": null, "TestID": 881},
                {"TestType": "GRP", "TestCode": "CBC", "TestStatus": "Completed",
                 "OrderContentListInfo": [
                    {"TestType": "INV", "TestCode": "HB", "TestValue": "13.1"},
                    {"TestType": "GRP", "TestCode": "DLC", "ParameterListInfo": [
                        {"TestType": "INV", "TestCode": "NEUT", "TestValue": "60"}
                    ]}
                 ]}
            ],
            "ReportPDFFormat": "StationeryPDF",
            "VisitDocumentinfo": null
        }));

        assert_eq!(payload.order_info.len(), 2);
        let glucose = payload.order_info[0].header();
        assert_eq!(glucose.test_id, "881");
        assert_eq!(glucose.result_approved_by, 0);

        let cbc = &payload.order_info[1];
        assert!(cbc.is_group());
        let codes: Vec<_> = cbc.leaves().iter().map(|l| l.test_code.as_str()).collect();
        assert_eq!(codes, vec!["HB", "NEUT"]);
        assert!(payload.visit_documents.is_empty());
    }

    #[test]
    fn test_unknown_test_type_is_unsupported() {
        let payload = parse(json!({"OrderInfo": [{"TestType": "PKG", "TestCode": "X"}]}));
        assert!(matches!(payload.order_info[0], LisNode::Unsupported { .. }));
        assert!(payload.order_info[0].leaves().is_empty());
    }

    #[test]
    fn test_from_base64_roundtrip() {
        let raw = json!({"OrderInfo": [], "ReportPDFFormat": "NonStationeryPDF"}).to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        let payload = LisVisitPayload::from_base64(&encoded).unwrap();
        assert!(payload.is_non_stationery());

        let err = LisVisitPayload::from_base64("%%%not-base64").unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }

    #[test]
    fn test_parse_lis_timestamp_formats() {
        let expected = "2026-10-01T08:00:00+00:00";
        for raw in ["2026-10-01T08:00:00Z", "2026-10-01T08:00:00", "2026-10-01 08:00:00"] {
            assert_eq!(parse_lis_timestamp(raw).unwrap().to_rfc3339(), expected, "{raw}");
        }
        assert_eq!(
            parse_lis_timestamp("2026-10-01T13:30:00+05:30").unwrap().to_rfc3339(),
            expected
        );
        assert!(parse_lis_timestamp("").is_none());
        assert!(parse_lis_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_device_flags_are_case_insensitive() {
        let result = LisResult {
            im_device: "YES".into(),
            im_device_flag: "Av".into(),
            qc_status: "Fail".into(),
            ..LisResult::default()
        };
        assert!(result.is_im_device());
        assert!(result.is_im_device_verified());
        assert!(result.qc_failed());
    }
}
