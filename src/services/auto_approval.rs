//! Per-investigation auto-approval rule chain.
//!
//! [`decide`] is pure: the caller gathers every input (master data, the
//! patient's last approved value, QC state) up front.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::domain::models::{ApprovalConfig, ApprovalSource, FailureReason, MasterInvestigation, MethodType};
use crate::domain::ports::PastValue;
use crate::services::abnormality::{lenient_number, within_auto_approval_range};

/// Static rule parameters.
#[derive(Debug, Clone, Default)]
pub struct ApprovalRules {
    /// Codes approved without range checks.
    pub default_auto_approval_codes: BTreeSet<String>,
    /// Investigations exempt from the delta check.
    pub delta_check_whitelist: BTreeSet<i64>,
}

impl From<&ApprovalConfig> for ApprovalRules {
    fn from(config: &ApprovalConfig) -> Self {
        Self {
            default_auto_approval_codes: config.default_auto_approval_codes.clone(),
            delta_check_whitelist: config.delta_check_whitelisted_investigation_ids.clone(),
        }
    }
}

/// Everything known about one investigation result when deciding.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalInput<'a> {
    /// Reported value.
    pub value: &'a str,
    /// When the value was entered.
    pub entered_at: Option<DateTime<Utc>>,
    /// How the result was produced.
    pub method_type: MethodType,
    /// Result came from an interfaced instrument.
    pub im_device: bool,
    /// The instrument auto-verified the result.
    pub im_device_verified: bool,
    /// Master definition.
    pub investigation: &'a MasterInvestigation,
    /// Previous approved value of the patient.
    pub past_value: Option<&'a PastValue>,
    /// The instrument QC run failed.
    pub qc_failed: bool,
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Verdict {
    /// Result may be approved automatically.
    pub approved: bool,
    /// Who decided.
    pub source: ApprovalSource,
    /// First rule that failed, `Na` when approved.
    pub reason: FailureReason,
}

impl Verdict {
    const fn approve(source: ApprovalSource) -> Self {
        Self {
            approved: true,
            source,
            reason: FailureReason::Na,
        }
    }

    const fn reject(reason: FailureReason) -> Self {
        Self {
            approved: false,
            source: ApprovalSource::Na,
            reason,
        }
    }
}

fn is_invalid_value(value: &str) -> bool {
    value.is_empty() || value.starts_with('-') || lenient_number(value) < 0.0
}

/// Rounded to five decimals.
fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

/// Percentage change from `old` to `new`.
pub fn percent_change(old: f64, new: f64) -> f64 {
    round5((new - old) / old * 100.0)
}

/// Whether a change of `percent` stays within the RCV bounds.
pub fn within_rcv(percent: f64, rcv_positive: f64, rcv_negative: f64) -> bool {
    (percent > 0.0 && percent <= rcv_positive) || (percent < 0.0 && percent >= rcv_negative) || percent == 0.0
}

/// Whole days from `from` to `to`, rounded up.
fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let hours = (to - from).num_seconds() as f64 / 3600.0;
    (hours / 24.0).ceil() as i64
}

/// Delta check against the patient's last approved value.
pub fn delta_check_passes(input: &ApprovalInput<'_>, rules: &ApprovalRules) -> bool {
    let investigation = input.investigation;
    if rules.delta_check_whitelist.contains(&investigation.investigation_id) {
        return true;
    }
    let Some(entered_at) = input.entered_at else {
        return false;
    };
    let Some(past) = input.past_value else {
        return true;
    };
    let threshold = investigation.past_value_threshold_days;
    if threshold != 0 && days_between(past.approved_at, entered_at) > i64::from(threshold) {
        return true;
    }
    let Ok(new_value) = input.value.parse::<f64>() else {
        return true;
    };
    if investigation.rcv_positive == 0.0 && investigation.rcv_negative == 0.0 {
        return true;
    }
    let Ok(old_value) = past.value.parse::<f64>() else {
        return false;
    };
    within_rcv(
        percent_change(old_value, new_value),
        investigation.rcv_positive,
        investigation.rcv_negative,
    )
}

/// Run the rule chain; the first matching rule decides.
pub fn decide(input: &ApprovalInput<'_>, rules: &ApprovalRules) -> Verdict {
    if input.qc_failed {
        return Verdict::reject(FailureReason::QcFailed);
    }
    if is_invalid_value(input.value) {
        return Verdict::reject(FailureReason::InvalidInvestigationValue);
    }
    if rules
        .default_auto_approval_codes
        .contains(&input.investigation.lis_code)
    {
        return Verdict::approve(ApprovalSource::Oh);
    }
    if !delta_check_passes(input, rules) {
        return Verdict::reject(FailureReason::PastRecord);
    }
    if input.im_device {
        return if input.im_device_verified {
            Verdict::approve(ApprovalSource::Im)
        } else {
            Verdict::reject(FailureReason::ImDevice)
        };
    }
    if input.method_type == MethodType::Manual {
        return Verdict::reject(FailureReason::ManualInput);
    }
    if !within_auto_approval_range(input.value, &input.investigation.reference_range) {
        return Verdict::reject(FailureReason::RefRange);
    }
    Verdict::approve(ApprovalSource::Oh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MasterReferenceRange, Range, ReferenceLabel};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn investigation() -> MasterInvestigation {
        MasterInvestigation {
            investigation_id: 11,
            lis_code: "HB".into(),
            rcv_positive: 10.0,
            rcv_negative: -10.0,
            past_value_threshold_days: 30,
            reference_range: MasterReferenceRange {
                auto_approval_range: Range {
                    min_value: "50".into(),
                    max_value: "200".into(),
                    ..Range::default()
                },
                reference_label: ReferenceLabel::Range,
                ..MasterReferenceRange::default()
            },
            ..MasterInvestigation::default()
        }
    }

    fn entered() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap()
    }

    fn past(value: &str, days_ago: i64) -> PastValue {
        PastValue {
            value: value.into(),
            approved_at: entered() - Duration::days(days_ago),
        }
    }

    fn input<'a>(value: &'a str, inv: &'a MasterInvestigation, past: Option<&'a PastValue>) -> ApprovalInput<'a> {
        ApprovalInput {
            value,
            entered_at: Some(entered()),
            method_type: MethodType::DeviceMeasured,
            im_device: false,
            im_device_verified: false,
            investigation: inv,
            past_value: past,
            qc_failed: false,
        }
    }

    #[test]
    fn test_rcv_examples() {
        let inv = investigation();
        let rules = ApprovalRules::default();

        let previous = past("100", 5);
        let verdict = decide(&input("108", &inv, Some(&previous)), &rules);
        assert!((percent_change(100.0, 108.0) - 8.0).abs() < f64::EPSILON);
        assert_eq!(verdict, Verdict::approve(ApprovalSource::Oh));

        let verdict = decide(&input("115", &inv, Some(&previous)), &rules);
        assert!((percent_change(100.0, 115.0) - 15.0).abs() < f64::EPSILON);
        assert_eq!(verdict, Verdict::reject(FailureReason::PastRecord));

        let verdict = decide(&input("95", &inv, Some(&previous)), &rules);
        assert!(verdict.approved);
    }

    #[test]
    fn test_rule_priority() {
        let inv = investigation();
        let rules = ApprovalRules {
            default_auto_approval_codes: BTreeSet::from(["HB".to_string()]),
            ..ApprovalRules::default()
        };

        let mut qc = input("", &inv, None);
        qc.qc_failed = true;
        assert_eq!(decide(&qc, &rules).reason, FailureReason::QcFailed);

        for bad in ["", "-4", "- 4"] {
            assert_eq!(
                decide(&input(bad, &inv, None), &rules).reason,
                FailureReason::InvalidInvestigationValue
            );
        }

        let mut manual = input("999", &inv, None);
        manual.method_type = MethodType::Manual;
        assert_eq!(decide(&manual, &rules), Verdict::approve(ApprovalSource::Oh));
    }

    #[test]
    fn test_device_and_manual_rules() {
        let inv = investigation();
        let rules = ApprovalRules::default();

        let mut device = input("100", &inv, None);
        device.im_device = true;
        assert_eq!(decide(&device, &rules).reason, FailureReason::ImDevice);
        device.im_device_verified = true;
        device.value = "5000";
        assert_eq!(decide(&device, &rules), Verdict::approve(ApprovalSource::Im));

        let mut manual = input("100", &inv, None);
        manual.method_type = MethodType::Manual;
        assert_eq!(decide(&manual, &rules).reason, FailureReason::ManualInput);

        assert_eq!(
            decide(&input("300", &inv, None), &rules).reason,
            FailureReason::RefRange
        );
        assert!(decide(&input("120", &inv, None), &rules).approved);
    }

    #[test]
    fn test_delta_check_skips() {
        let mut inv = investigation();
        let rules = ApprovalRules::default();
        let old = past("100", 45);
        assert!(delta_check_passes(&input("500", &inv, Some(&old)), &rules));

        let recent = past("100", 2);
        assert!(!delta_check_passes(&input("500", &inv, Some(&recent)), &rules));
        assert!(delta_check_passes(&input("positive", &inv, Some(&recent)), &rules));

        let unparsable_past = past("n/a", 2);
        assert!(!delta_check_passes(&input("100", &inv, Some(&unparsable_past)), &rules));

        let mut no_time = input("500", &inv, Some(&recent));
        no_time.entered_at = None;
        assert!(!delta_check_passes(&no_time, &rules));

        let whitelisted = ApprovalRules {
            delta_check_whitelist: BTreeSet::from([11]),
            ..ApprovalRules::default()
        };
        assert!(delta_check_passes(&input("500", &inv, Some(&recent)), &whitelisted));

        inv.rcv_positive = 0.0;
        inv.rcv_negative = 0.0;
        assert!(delta_check_passes(&input("500", &inv, Some(&recent)), &rules));
    }

    #[test]
    fn test_within_rcv_boundaries() {
        assert!(within_rcv(10.0, 10.0, -10.0));
        assert!(within_rcv(-10.0, 10.0, -10.0));
        assert!(within_rcv(0.0, 0.0, 0.0));
        assert!(!within_rcv(10.00001, 10.0, -10.0));
    }

    proptest! {
        #[test]
        fn decide_is_deterministic(
            value in "[-<>= 0-9.a-z]{0,8}",
            past_value in "[0-9]{1,4}",
            days_ago in 0i64..90,
            qc_failed: bool,
            im_device: bool,
            im_device_verified: bool,
            manual: bool,
        ) {
            let inv = investigation();
            let rules = ApprovalRules::default();
            let previous = past(&past_value, days_ago);
            let mut first = input(&value, &inv, Some(&previous));
            first.qc_failed = qc_failed;
            first.im_device = im_device;
            first.im_device_verified = im_device_verified;
            if manual {
                first.method_type = MethodType::Manual;
            }
            let second = first;
            let verdict = decide(&first, &rules);
            prop_assert_eq!(verdict, decide(&second, &rules));
            prop_assert_eq!(verdict.approved, verdict.reason == FailureReason::Na);
            prop_assert_eq!(verdict.approved, verdict.source != ApprovalSource::Na);
        }
    }
}
