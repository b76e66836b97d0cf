//! Investigation result domain model.
//!
//! An investigation is one measured parameter of a test. Single-parameter
//! tests own exactly one investigation, panels own one per leaf.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::master_data::ResultType;
use super::status::InvestigationStatus;

/// Which rule or actor approved an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalSource {
    /// Not approved by any rule.
    #[default]
    Na,
    /// Auto-verified by an interfaced instrument.
    Im,
    /// Approved in the LIS by a user.
    Lims,
    /// Auto-approved by this engine.
    Oh,
}

impl ApprovalSource {
    /// Stored form, as the OMS spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Na => "NA",
            Self::Im => "IM",
            Self::Lims => "LIMS",
            Self::Oh => "OH",
        }
    }

    /// Parse the stored form; empty reads as `Na`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NA" | "" => Some(Self::Na),
            "IM" => Some(Self::Im),
            "LIMS" => Some(Self::Lims),
            "OH" => Some(Self::Oh),
            _ => None,
        }
    }
}

/// Why an investigation was not auto-approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Approved, or not yet decided.
    #[default]
    Na,
    /// QC failed on the instrument run.
    QcFailed,
    /// Value is blank or does not fit the result type.
    InvalidInvestigationValue,
    /// Delta check against the last approved value failed.
    PastRecord,
    /// Instrument already verified the value, so this engine does not approve it.
    ImDevice,
    /// Value was typed in, not measured.
    ManualInput,
    /// Value is outside the auto-approval band.
    RefRange,
}

impl FailureReason {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Na => "na",
            Self::QcFailed => "qc_failed",
            Self::InvalidInvestigationValue => "invalid_investigation_value",
            Self::PastRecord => "past_record",
            Self::ImDevice => "im_device",
            Self::ManualInput => "manual_input",
            Self::RefRange => "ref_range",
        }
    }

    /// Parse the stored form; empty reads as `Na`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "na" | "" => Some(Self::Na),
            "qc_failed" => Some(Self::QcFailed),
            "invalid_investigation_value" => Some(Self::InvalidInvestigationValue),
            "past_record" => Some(Self::PastRecord),
            "im_device" => Some(Self::ImDevice),
            "manual_input" => Some(Self::ManualInput),
            "ref_range" => Some(Self::RefRange),
            _ => None,
        }
    }
}

/// Classification of a value against its reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Abnormality {
    /// No range matched the value.
    #[default]
    Unclassified,
    /// Inside the normal range.
    Normal,
    /// Above the normal range.
    UpperAbnormal,
    /// Below the normal range.
    LowerAbnormal,
    /// Outside the critical range.
    Critical,
    /// Outside the physically plausible range.
    Improbable,
}

impl Abnormality {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclassified => "",
            Self::Normal => "normal",
            Self::UpperAbnormal => "upper_abnormal",
            Self::LowerAbnormal => "lower_abnormal",
            Self::Critical => "critical",
            Self::Improbable => "improbable",
        }
    }

    /// Parse the stored form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "" => Some(Self::Unclassified),
            "normal" => Some(Self::Normal),
            "upper_abnormal" => Some(Self::UpperAbnormal),
            "lower_abnormal" => Some(Self::LowerAbnormal),
            "critical" => Some(Self::Critical),
            "improbable" => Some(Self::Improbable),
            _ => None,
        }
    }

    /// Any classification other than normal or unclassified.
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            Self::LowerAbnormal | Self::UpperAbnormal | Self::Critical | Self::Improbable
        )
    }

    /// Critical or improbable.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical | Self::Improbable)
    }
}

/// How a value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MethodType {
    /// Entered by hand.
    #[default]
    Manual,
    /// Reported by an interfaced device.
    DeviceMeasured,
    /// Derived from other investigations.
    Calculated,
}

impl MethodType {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::DeviceMeasured => "device_measured",
            Self::Calculated => "calculated",
        }
    }

    /// Parse the stored form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "device_measured" => Some(Self::DeviceMeasured),
            "calculated" => Some(Self::Calculated),
            _ => None,
        }
    }

    /// Derive the method type from the LIS method name and device id.
    pub fn classify(method_name: &str, device_id: &str) -> Self {
        if method_name.trim().eq_ignore_ascii_case("calculated") {
            Self::Calculated
        } else if !device_id.is_empty() {
            Self::DeviceMeasured
        } else {
            Self::Manual
        }
    }
}

/// One measured parameter of a test, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationResult {
    /// Surrogate id.
    pub id: Uuid,
    /// Owning test detail.
    pub test_details_id: Uuid,
    /// LIS investigation code.
    pub lis_code: String,
    /// Investigation name from master data.
    pub name: String,
    /// Master-data investigation id, 0 when unknown.
    pub master_investigation_id: i64,
    /// Master-data investigation/method mapping id.
    pub master_method_mapping_id: i64,
    /// Reported value.
    pub value: String,
    /// Value as the device sent it, before any edit.
    pub device_value: String,
    /// Expected kind of value.
    pub result_type: ResultType,
    /// Title-cased department name.
    pub department: String,
    /// Unit of measure.
    pub uom: String,
    /// Method name reported by the LIS.
    pub method: String,
    /// How the value was produced.
    pub method_type: MethodType,
    /// Reference range as printed on the report.
    pub reference_range_text: String,
    /// Approval state.
    pub status: InvestigationStatus,
    /// Classification against the reference range.
    pub abnormality: Abnormality,
    /// Cached `abnormality.is_abnormal()`.
    pub is_abnormal: bool,
    /// Cached `abnormality.is_critical()`.
    pub is_critical: bool,
    /// Set when this engine approved the value.
    pub is_auto_approved: bool,
    /// Who approved it.
    pub approval_source: ApprovalSource,
    /// Reason the last decision did not approve.
    pub auto_approval_failure_reason: FailureReason,
    /// LIS user who entered the value.
    pub entered_by: i64,
    /// When the value was entered in the LIS.
    pub entered_at: Option<DateTime<Utc>>,
    /// OMS user who approved, 0 when not approved.
    pub approved_by: i64,
    /// When it was approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl InvestigationResult {
    /// Fold an incoming result for the same (test, code) pair into this one.
    ///
    /// Returns `false` and leaves the record untouched when the incoming
    /// status would revert an approved investigation.
    pub fn merge_from(&mut self, incoming: &Self) -> bool {
        if !self.status.accepts_reconciled(incoming.status) {
            return false;
        }
        if self.status != InvestigationStatus::Approve && incoming.status == InvestigationStatus::Approve {
            self.approval_source = incoming.approval_source;
            self.is_auto_approved = incoming.is_auto_approved;
            self.approved_by = incoming.approved_by;
            self.approved_at = incoming.approved_at;
        }
        self.value.clone_from(&incoming.value);
        self.status = incoming.status;
        self.master_investigation_id = incoming.master_investigation_id;
        self.master_method_mapping_id = incoming.master_method_mapping_id;
        self.abnormality = incoming.abnormality;
        self.is_abnormal = incoming.is_abnormal;
        self.is_critical = incoming.is_critical;
        self.entered_by = incoming.entered_by;
        self.entered_at = incoming.entered_at;
        self.device_value.clone_from(&incoming.device_value);
        self.method_type = incoming.method_type;
        self.auto_approval_failure_reason = incoming.auto_approval_failure_reason;
        self.updated_at = incoming.updated_at;
        true
    }
}

/// QC sidecar of an investigation result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationResultMetadata {
    /// Owning investigation result.
    pub investigation_result_id: Uuid,
    /// QC flag as reported by the LIS.
    pub qc_flag: String,
    /// Control lot of the QC run.
    pub qc_lot_number: String,
    /// Measured control value.
    pub qc_value: String,
    /// Westgard rule warning raised by the instrument.
    pub qc_westgard_warning: String,
    /// `Pass` or `Fail` as reported by the LIS.
    pub qc_status: String,
}

/// Audit snapshot of an investigation at the moment a rerun was triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerunInvestigationResult {
    /// Surrogate id.
    pub id: Uuid,
    /// Owning test detail.
    pub test_details_id: Uuid,
    /// LIS investigation code.
    pub lis_code: String,
    /// Master-data investigation id, 0 when unknown.
    pub master_investigation_id: i64,
    /// Investigation name at the time of the rerun.
    pub investigation_name: String,
    /// Value at the time of the rerun.
    pub investigation_value: String,
    /// Device value at the time of the rerun.
    pub device_value: String,
    /// Expected kind of value.
    pub result_type: ResultType,
    /// Reason given by the LIS or the QC check.
    pub rerun_reason: String,
    /// Free-text remarks sent with the rerun.
    pub rerun_remarks: String,
    /// LIS system id or OMS user id that asked for the rerun.
    pub rerun_triggered_by: String,
    /// When the rerun was triggered.
    pub rerun_triggered_at: DateTime<Utc>,
    /// LIS user who entered the value.
    pub entered_by: i64,
    /// When the value was entered in the LIS.
    pub entered_at: Option<DateTime<Utc>>,
}

/// Kind of remark; one of each is kept per investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemarkType {
    /// Clinical interpretation.
    Medical,
    /// Lab or instrument note.
    Technical,
}

impl RemarkType {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Technical => "technical",
        }
    }

    /// Parse the stored form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "medical" => Some(Self::Medical),
            "technical" => Some(Self::Technical),
            _ => None,
        }
    }
}

/// Free-text remark attached to an investigation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remark {
    /// Owning investigation result.
    pub investigation_result_id: Uuid,
    /// Medical or technical.
    pub remark_type: RemarkType,
    /// Remark text.
    pub description: String,
    /// LIS user who wrote the remark.
    pub remark_by: i64,
}
