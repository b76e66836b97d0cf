//! Cross-checks a normalized payload against master reference data.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::models::{InvestigationDetails, LisBucket, LisNode, MasterInvestigation, ResultType};
use crate::services::payload_normalizer::NormalizedPayload;

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("numeric pattern"));
static TEXTUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[a-zA-Z0-9().+\-:&_,%"<>=\s/;#@\[\]{}!?’‘“”']+$"#).expect("textual pattern")
});
static SEMI_QUANTITATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[<>]=?|=)?\s*\d+(?:\.\d+)?(?:[:-]\d+)?$").expect("semi-quantitative pattern"));

/// Whether a non-blank `value` fails the format of `result_type`.
/// Investigations without a declared type never fail.
pub fn has_incorrect_result_type(value: &str, result_type: ResultType) -> bool {
    match result_type {
        ResultType::Numeric => !NUMERIC.is_match(value),
        ResultType::Textual => !TEXTUAL.is_match(value),
        ResultType::SemiQuantitative => !SEMI_QUANTITATIVE.is_match(value),
        ResultType::Unspecified => false,
    }
}

/// Master reference data indexed by LIS code and method mapping.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    code_to_mapping: HashMap<String, i64>,
    mapping_to_codes: HashMap<i64, BTreeSet<String>>,
    investigations: HashMap<String, MasterInvestigation>,
}

impl ReferenceIndex {
    /// Index top-level investigations, then walk nested panels breadth-first.
    pub fn build(details: &InvestigationDetails) -> Self {
        let mut index = Self::default();
        for investigation in &details.investigations {
            index.insert(investigation);
        }
        let mut queue: VecDeque<_> = details.panels.iter().collect();
        while let Some(panel) = queue.pop_front() {
            for investigation in &panel.investigations {
                index.insert(investigation);
            }
            queue.extend(panel.panels.iter());
        }
        index
    }

    fn insert(&mut self, investigation: &MasterInvestigation) {
        let code = investigation.lis_code.clone();
        let mapping = investigation.investigation_method_mapping_id;
        self.code_to_mapping.insert(code.clone(), mapping);
        self.mapping_to_codes.entry(mapping).or_default().insert(code.clone());
        self.investigations.insert(code, investigation.clone());
    }

    /// Master definition for `code`.
    pub fn investigation(&self, code: &str) -> Option<&MasterInvestigation> {
        self.investigations.get(code)
    }

    /// Every reference code.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.code_to_mapping.keys().map(String::as_str)
    }

    /// Every reference code measuring the same parameter as `code`.
    pub fn siblings(&self, code: &str) -> Option<&BTreeSet<String>> {
        self.code_to_mapping
            .get(code)
            .and_then(|mapping| self.mapping_to_codes.get(mapping))
    }
}

/// Mismatches between a payload and its reference data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyReport {
    /// Payload codes unknown to the master data.
    pub missing_in_reference: BTreeSet<String>,
    /// Reference codes with no payload code sharing their method mapping.
    pub missing_in_payload: BTreeSet<String>,
    /// Investigations reported without a value.
    pub blank_values: BTreeSet<String>,
    /// Values that do not match the declared result type.
    pub incorrect_result_types: BTreeSet<String>,
    /// Approved tests whose approver is not a known pathologist.
    pub missing_approver: BTreeSet<String>,
    labels: BTreeMap<String, String>,
}

impl AnomalyReport {
    /// No anomaly was found.
    pub fn is_clean(&self) -> bool {
        self.missing_in_reference.is_empty()
            && self.missing_in_payload.is_empty()
            && self.blank_values.is_empty()
            && self.incorrect_result_types.is_empty()
            && self.missing_approver.is_empty()
    }

    fn label(&self, code: &str) -> String {
        match self.labels.get(code) {
            Some(name) if !name.is_empty() && name != code => format!("{name} ({code})"),
            _ => code.to_string(),
        }
    }

    fn describe(&self, codes: &BTreeSet<String>) -> String {
        codes.iter().map(|code| self.label(code)).collect::<Vec<_>>().join(", ")
    }

    /// One alert per non-empty anomaly class.
    pub fn alert_messages(&self, visit_id: &str, order_id: &str, city_code: &str) -> Vec<String> {
        let header = format!("visit {visit_id} (order {order_id}, city {city_code})");
        let classes = [
            ("Parameters missing in master data", &self.missing_in_reference),
            ("Parameters missing in LIS payload", &self.missing_in_payload),
            ("Blank values", &self.blank_values),
            ("Incorrect result types", &self.incorrect_result_types),
            ("Approving doctor details missing", &self.missing_approver),
        ];
        classes
            .into_iter()
            .filter(|(_, codes)| !codes.is_empty())
            .map(|(title, codes)| format!("{title} for {header}: {}", self.describe(codes)))
            .collect()
    }
}

/// Validates payloads for the tests ordered on a visit.
pub struct AnomalyDetector<'a> {
    ordered_codes: &'a BTreeSet<String>,
    skipped_codes: &'a BTreeSet<String>,
    pathologist_lis_ids: &'a HashSet<i64>,
}

impl<'a> AnomalyDetector<'a> {
    /// Detector for the tests ordered on a visit.
    pub fn new(
        ordered_codes: &'a BTreeSet<String>,
        skipped_codes: &'a BTreeSet<String>,
        pathologist_lis_ids: &'a HashSet<i64>,
    ) -> Self {
        Self {
            ordered_codes,
            skipped_codes,
            pathologist_lis_ids,
        }
    }

    /// Test codes to request reference data for.
    pub fn reference_codes(&self, payload: &NormalizedPayload) -> Vec<String> {
        let mut codes = BTreeSet::new();
        for bucket in [LisBucket::Completed, LisBucket::Approve] {
            if let Some(entries) = payload.bucket(&bucket) {
                codes.extend(
                    entries
                        .codes()
                        .filter(|code| !self.skipped_codes.contains(*code))
                        .map(String::from),
                );
            }
        }
        codes.into_iter().collect()
    }

    fn has_known_approver(&self, approved_by: i64) -> bool {
        approved_by != 0 && self.pathologist_lis_ids.contains(&approved_by)
    }

    /// Compare `payload` with its reference data.
    pub fn detect(&self, payload: &NormalizedPayload, reference: &ReferenceIndex) -> AnomalyReport {
        let mut report = AnomalyReport::default();
        let mut values: BTreeMap<String, String> = BTreeMap::new();

        // Completed entries overwrite approved ones for the same code.
        for bucket in [LisBucket::Approve, LisBucket::Completed] {
            let Some(entries) = payload.bucket(&bucket) else {
                continue;
            };
            for code in self.ordered_codes {
                if self.skipped_codes.contains(code) {
                    continue;
                }
                let Some(node) = entries.get(code) else {
                    continue;
                };
                if matches!(node, LisNode::Unsupported { .. }) {
                    continue;
                }
                let header = node.header();
                if bucket == LisBucket::Approve && !self.has_known_approver(header.result_approved_by) {
                    report.missing_approver.insert(header.test_code.clone());
                    report
                        .labels
                        .insert(header.test_code.clone(), header.test_name.clone());
                }
                for leaf in node.leaves() {
                    values.insert(leaf.test_code.clone(), leaf.test_value.clone());
                    report.labels.insert(leaf.test_code.clone(), leaf.test_name.clone());
                }
            }
        }

        let mut covered: BTreeSet<&str> = BTreeSet::new();
        for code in values.keys() {
            match reference.siblings(code) {
                Some(siblings) => covered.extend(siblings.iter().map(String::as_str)),
                None => {
                    report.missing_in_reference.insert(code.clone());
                }
            }
        }
        for code in reference.codes() {
            if !covered.contains(code) {
                report.missing_in_payload.insert(code.to_string());
            }
        }

        for (code, value) in &values {
            let result_type = reference
                .investigation(code)
                .map(|inv| inv.result_type)
                .unwrap_or_default();
            if value.is_empty() {
                report.blank_values.insert(code.clone());
            } else if has_incorrect_result_type(value, result_type) {
                report.incorrect_result_types.insert(code.clone());
            }
        }

        for code in report
            .missing_in_payload
            .iter()
            .chain(&report.blank_values)
            .chain(&report.incorrect_result_types)
        {
            if let Some(inv) = reference.investigation(code) {
                if !inv.investigation_name.is_empty() {
                    report.labels.insert(code.clone(), inv.investigation_name.clone());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LisGroup, LisResult, LisVisitPayload, MasterPanel};

    fn master(code: &str, mapping: i64, result_type: ResultType) -> MasterInvestigation {
        MasterInvestigation {
            investigation_id: mapping * 10,
            investigation_name: format!("{code} name"),
            investigation_method_mapping_id: mapping,
            lis_code: code.into(),
            result_type,
            ..MasterInvestigation::default()
        }
    }

    fn leaf(code: &str, value: &str) -> LisNode {
        LisNode::Investigation(LisResult {
            test_code: code.into(),
            test_name: format!("{code} test"),
            test_value: value.into(),
            test_status: "Completed".into(),
            ..LisResult::default()
        })
    }

    fn normalized(nodes: Vec<LisNode>) -> NormalizedPayload {
        NormalizedPayload::new(
            "V1",
            LisVisitPayload {
                order_info: nodes,
                ..LisVisitPayload::default()
            },
        )
    }

    fn codes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn test_result_type_formats() {
        assert!(!has_incorrect_result_type("12.5", ResultType::Numeric));
        assert!(has_incorrect_result_type("12.5 mg", ResultType::Numeric));
        assert!(has_incorrect_result_type("-1", ResultType::Numeric));
        assert!(!has_incorrect_result_type("Non Reactive (1:2)", ResultType::Textual));
        assert!(has_incorrect_result_type("value\u{7}", ResultType::Textual));
        assert!(!has_incorrect_result_type(">= 1.5", ResultType::SemiQuantitative));
        assert!(!has_incorrect_result_type("1:80", ResultType::SemiQuantitative));
        assert!(has_incorrect_result_type("trace", ResultType::SemiQuantitative));
        assert!(!has_incorrect_result_type("anything at all", ResultType::Unspecified));
    }

    #[test]
    fn test_reference_index_walks_nested_panels() {
        let details = InvestigationDetails {
            investigations: vec![master("GLU", 1, ResultType::Numeric)],
            panels: vec![MasterPanel {
                investigations: vec![master("HB", 2, ResultType::Numeric)],
                panels: vec![MasterPanel {
                    investigations: vec![master("HB_ALT", 2, ResultType::Numeric)],
                    ..MasterPanel::default()
                }],
                ..MasterPanel::default()
            }],
        };
        let index = ReferenceIndex::build(&details);
        assert_eq!(index.siblings("HB_ALT"), Some(&codes(&["HB", "HB_ALT"])));
        assert!(index.investigation("GLU").is_some());
        assert!(index.siblings("NOPE").is_none());
    }

    #[test]
    fn test_detects_every_anomaly_class() {
        let details = InvestigationDetails {
            investigations: vec![
                master("HB", 2, ResultType::Numeric),
                master("HB_ALT", 2, ResultType::Numeric),
                master("PLT", 3, ResultType::Numeric),
                master("MCV", 4, ResultType::Numeric),
                master("RBC", 5, ResultType::Numeric),
            ],
            panels: vec![],
        };
        let reference = ReferenceIndex::build(&details);
        let payload = normalized(vec![LisNode::Group(LisGroup {
            header: LisResult {
                test_code: "CBC".into(),
                test_status: "Completed".into(),
                ..LisResult::default()
            },
            children: vec![leaf("HB", "13.1"), leaf("PLT", ""), leaf("MCV", "high"), leaf("XYZ", "1")],
        })]);

        let ordered = codes(&["CBC"]);
        let skipped = BTreeSet::new();
        let pathologists = HashSet::new();
        let report = AnomalyDetector::new(&ordered, &skipped, &pathologists).detect(&payload, &reference);

        assert_eq!(report.missing_in_reference, codes(&["XYZ"]));
        assert_eq!(report.missing_in_payload, codes(&["RBC"]));
        assert_eq!(report.blank_values, codes(&["PLT"]));
        assert_eq!(report.incorrect_result_types, codes(&["MCV"]));
        assert!(report.missing_approver.is_empty());
        assert!(!report.is_clean());

        let messages = report.alert_messages("V1", "O1", "BLR");
        assert_eq!(messages.len(), 4);
        assert!(messages[1].contains("RBC name (RBC)"));
    }

    #[test]
    fn test_approver_must_be_known_pathologist() {
        let approved = |code: &str, approver: i64| {
            LisNode::Investigation(LisResult {
                test_code: code.into(),
                test_value: "1".into(),
                test_status: "Approve".into(),
                result_approved_by: approver,
                ..LisResult::default()
            })
        };
        let payload = normalized(vec![approved("A", 0), approved("B", 55), approved("C", 77)]);
        let reference = ReferenceIndex::build(&InvestigationDetails {
            investigations: vec![
                master("A", 1, ResultType::Numeric),
                master("B", 2, ResultType::Numeric),
                master("C", 3, ResultType::Numeric),
            ],
            panels: vec![],
        });
        let ordered = codes(&["A", "B", "C"]);
        let skipped = BTreeSet::new();
        let pathologists = HashSet::from([77]);
        let report = AnomalyDetector::new(&ordered, &skipped, &pathologists).detect(&payload, &reference);
        assert_eq!(report.missing_approver, codes(&["A", "B"]));
        assert!(report.missing_in_reference.is_empty());
    }

    #[test]
    fn test_unordered_and_skipped_codes_are_ignored() {
        let payload = normalized(vec![leaf("ODB002", ""), leaf("GLU", "")]);
        let ordered = codes(&["ODB002"]);
        let skipped = codes(&["ODB002"]);
        let pathologists = HashSet::new();
        let detector = AnomalyDetector::new(&ordered, &skipped, &pathologists);

        let report = detector.detect(&payload, &ReferenceIndex::default());
        assert!(report.is_clean());
        assert_eq!(detector.reference_codes(&payload), vec!["GLU".to_string()]);
    }
}
