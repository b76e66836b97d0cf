//! Reference data returned by the master-data service.
//!
//! Only the fields the engine reads are modelled; everything is lenient so a
//! partially filled record still deserializes.

use serde::{Deserialize, Serialize};

/// Declared result representation of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Numeric value compared against ranges.
    Numeric,
    /// Free text matched against accepted options.
    Textual,
    /// Graded text such as `1+` or `Trace`.
    SemiQuantitative,
    /// Not declared.
    #[default]
    #[serde(other)]
    Unspecified,
}

impl ResultType {
    /// Stored snake_case name; empty when unspecified.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Textual => "textual",
            Self::SemiQuantitative => "semi_quantitative",
            Self::Unspecified => "",
        }
    }

    /// Parse a stored name. Unknown names map to `Unspecified`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s {
            "numeric" => Self::Numeric,
            "textual" => Self::Textual,
            "semi_quantitative" => Self::SemiQuantitative,
            _ => Self::Unspecified,
        }
    }
}

/// How a reference range should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceLabel {
    /// Numeric bands.
    Range,
    /// Textual options.
    Textual,
    /// Not declared.
    #[default]
    #[serde(other)]
    Unknown,
}

/// One band of a reference range. Bounds are strings on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Range {
    /// Lower bound.
    pub min_value: String,
    /// Upper bound.
    pub max_value: String,
    /// `|` separated list of accepted textual values.
    pub result_value: String,
    /// Printable form of the band.
    pub reference_range_text: String,
}

impl Range {
    /// Lower bound as a number, if set and numeric.
    pub fn min(&self) -> Option<f64> {
        parse_bound(&self.min_value)
    }

    /// Upper bound as a number, if set and numeric.
    pub fn max(&self) -> Option<f64> {
        parse_bound(&self.max_value)
    }

    /// Case-insensitive membership in the textual options of this band.
    pub fn accepts_text(&self, value: &str) -> bool {
        let value = value.trim();
        self.result_value
            .split('|')
            .map(str::trim)
            .filter(|option| !option.is_empty())
            .any(|option| option.eq_ignore_ascii_case(value))
    }
}

fn parse_bound(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse().ok()
}

/// All reference bands of an investigation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterReferenceRange {
    /// Normal band.
    pub normal_range: Range,
    /// Critical band; values outside it are never auto-approved.
    pub critical_range: Range,
    /// Improbable band.
    pub improbable_range: Range,
    /// Band inside which results may auto-approve.
    pub auto_approval_range: Range,
    /// How to read the bands.
    pub reference_label: ReferenceLabel,
}

/// An investigation as described by the master-data service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterInvestigation {
    /// Master identifier.
    pub investigation_id: i64,
    /// Display name.
    pub investigation_name: String,
    /// Method-mapping id shared by all codes measuring the same parameter.
    pub investigation_method_mapping_id: i64,
    /// Code the LIS reports results under.
    pub lis_code: String,
    /// Owning department.
    pub department_name: String,
    /// Analysis method.
    pub method: String,
    /// Unit of measure.
    pub unit: String,
    /// Reference bands.
    pub reference_range: MasterReferenceRange,
    /// Declared result representation.
    pub result_type: ResultType,
    /// Allowed relative rise against the previous value, in percent.
    pub rcv_positive: f64,
    /// Allowed relative fall against the previous value, in percent.
    pub rcv_negative: f64,
    /// How far back a previous value still counts.
    pub past_value_threshold_days: u32,
}

/// A panel and its (possibly nested) member investigations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterPanel {
    /// Display name.
    pub panel_name: String,
    /// Master test identifier.
    pub test_id: i64,
    /// Code the panel is ordered under.
    pub panel_test_code: String,
    /// Direct member investigations.
    pub investigations: Vec<MasterInvestigation>,
    /// Nested sub-panels.
    pub panels: Vec<MasterPanel>,
}

/// Response of a panel lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestigationDetails {
    /// Investigations ordered on their own.
    pub investigations: Vec<MasterInvestigation>,
    /// Panels, each with its members.
    pub panels: Vec<MasterPanel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_investigation_tolerates_missing_fields() {
        let inv: MasterInvestigation = serde_json::from_str(
            r#"{"investigation_id": 5, "lis_code": "HB01", "result_type": "numeric",
                "reference_range": {"reference_label": "range",
                    "normal_range": {"min_value": "12", "max_value": "16"}}}"#,
        )
        .unwrap();
        assert_eq!(inv.investigation_id, 5);
        assert_eq!(inv.result_type, ResultType::Numeric);
        assert_eq!(inv.reference_range.reference_label, ReferenceLabel::Range);
        assert_eq!(inv.reference_range.normal_range.min(), Some(12.0));
        assert_eq!(inv.reference_range.critical_range.min(), None);
        assert!(inv.rcv_positive.abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_result_type_is_unspecified() {
        let inv: MasterInvestigation =
            serde_json::from_str(r#"{"result_type": "biopattern"}"#).unwrap();
        assert_eq!(inv.result_type, ResultType::Unspecified);
    }

    #[test]
    fn test_textual_options() {
        let range = Range {
            result_value: "Negative| Non Reactive |".into(),
            ..Range::default()
        };
        assert!(range.accepts_text("negative"));
        assert!(range.accepts_text("NON REACTIVE"));
        assert!(!range.accepts_text("Positive"));
        assert!(!range.accepts_text(""));
    }
}
