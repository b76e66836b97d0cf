//! Classifies investigation values against master reference ranges.

use crate::domain::models::{Abnormality, MasterReferenceRange, Range, ReferenceLabel};

/// Numeric reading of a result value: comparison prefixes and spaces are
/// dropped and anything unparsable reads as zero.
pub fn lenient_number(raw: &str) -> f64 {
    let trimmed: String = raw
        .trim_matches(|c| matches!(c, '<' | '=' | '>' | ' '))
        .chars()
        .filter(|c| *c != ' ')
        .collect();
    trimmed.parse().unwrap_or(0.0)
}

#[derive(Clone, Copy)]
enum Bound {
    Inclusive,
    Exclusive,
}

/// Membership of `value` in the band between `min` and `max`. A missing bound
/// leaves that side open; with both missing the band is empty.
fn within(value: f64, min: Option<f64>, max: Option<f64>, lower: Bound, upper: Bound) -> bool {
    if min.is_none() && max.is_none() {
        return false;
    }
    let above_min = min.map_or(true, |m| match lower {
        Bound::Inclusive => value >= m,
        Bound::Exclusive => value > m,
    });
    let below_max = max.map_or(true, |m| match upper {
        Bound::Inclusive => value <= m,
        Bound::Exclusive => value < m,
    });
    above_min && below_max
}

/// Outside the band, touching a bound included.
fn outside(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.is_some_and(|m| value <= m) || max.is_some_and(|m| value >= m)
}

fn classify_numeric(value: &str, range: &MasterReferenceRange) -> Abnormality {
    if value.starts_with('-') {
        return Abnormality::LowerAbnormal;
    }
    let v = lenient_number(value);
    let (normal, critical, improbable) = (&range.normal_range, &range.critical_range, &range.improbable_range);
    if outside(v, improbable.min(), improbable.max()) {
        return Abnormality::Improbable;
    }
    let critical_low = critical.min().is_some()
        && within(v, improbable.min(), critical.min(), Bound::Exclusive, Bound::Inclusive);
    let critical_high = critical.max().is_some()
        && within(v, critical.max(), improbable.max(), Bound::Inclusive, Bound::Exclusive);
    if critical_low || critical_high {
        Abnormality::Critical
    } else if within(v, critical.min(), normal.min(), Bound::Exclusive, Bound::Exclusive) {
        Abnormality::LowerAbnormal
    } else if within(v, normal.max(), critical.max(), Bound::Exclusive, Bound::Exclusive) {
        Abnormality::UpperAbnormal
    } else if within(v, normal.min(), normal.max(), Bound::Inclusive, Bound::Inclusive) {
        Abnormality::Normal
    } else {
        Abnormality::Unclassified
    }
}

/// Classify `value` against `range`. Blank values and ranges without a
/// known label stay unclassified.
pub fn classify(value: &str, range: &MasterReferenceRange) -> Abnormality {
    if value.is_empty() {
        return Abnormality::Unclassified;
    }
    match range.reference_label {
        ReferenceLabel::Range => classify_numeric(value, range),
        ReferenceLabel::Textual => {
            if matches_textual(&range.normal_range, value) {
                Abnormality::Normal
            } else {
                Abnormality::UpperAbnormal
            }
        }
        ReferenceLabel::Unknown => Abnormality::Unclassified,
    }
}

fn matches_textual(band: &Range, value: &str) -> bool {
    if band.result_value.contains('|') {
        band.accepts_text(value)
    } else {
        band.result_value.eq_ignore_ascii_case(value)
    }
}

/// Whether `value` lies in the auto-approval band of `range`.
pub fn within_auto_approval_range(value: &str, range: &MasterReferenceRange) -> bool {
    if value.is_empty() {
        return false;
    }
    let band = &range.auto_approval_range;
    match range.reference_label {
        ReferenceLabel::Range => within(
            lenient_number(value),
            band.min(),
            band.max(),
            Bound::Inclusive,
            Bound::Inclusive,
        ),
        ReferenceLabel::Textual => matches_textual(band, value),
        ReferenceLabel::Unknown => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(min: &str, max: &str) -> Range {
        Range {
            min_value: min.into(),
            max_value: max.into(),
            ..Range::default()
        }
    }

    fn numeric_range() -> MasterReferenceRange {
        MasterReferenceRange {
            normal_range: band("12", "16"),
            critical_range: band("7", "20"),
            improbable_range: band("2", "30"),
            auto_approval_range: band("11", "17"),
            reference_label: ReferenceLabel::Range,
        }
    }

    #[test]
    fn test_lenient_number() {
        assert!((lenient_number("<= 5.5") - 5.5).abs() < f64::EPSILON);
        assert!((lenient_number(">1 000") - 1000.0).abs() < f64::EPSILON);
        assert!(lenient_number("trace").abs() < f64::EPSILON);
        assert!((lenient_number("-3") + 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_numeric_bands() {
        let range = numeric_range();
        assert_eq!(classify("14", &range), Abnormality::Normal);
        assert_eq!(classify("12", &range), Abnormality::Normal);
        assert_eq!(classify("10", &range), Abnormality::LowerAbnormal);
        assert_eq!(classify("18", &range), Abnormality::UpperAbnormal);
        assert_eq!(classify("7", &range), Abnormality::Critical);
        assert_eq!(classify("25", &range), Abnormality::Critical);
        assert_eq!(classify("20", &range), Abnormality::Critical);
        assert_eq!(classify("2", &range), Abnormality::Improbable);
        assert_eq!(classify("31", &range), Abnormality::Improbable);
        assert_eq!(classify("-1", &range), Abnormality::LowerAbnormal);
        assert_eq!(classify("", &range), Abnormality::Unclassified);
    }

    #[test]
    fn test_normal_only_range() {
        let range = MasterReferenceRange {
            normal_range: band("0", "5"),
            reference_label: ReferenceLabel::Range,
            ..MasterReferenceRange::default()
        };
        assert_eq!(classify("3", &range), Abnormality::Normal);
        assert_eq!(classify("6", &range), Abnormality::UpperAbnormal);
    }

    #[test]
    fn test_textual_classification() {
        let range = MasterReferenceRange {
            normal_range: Range {
                result_value: "Negative|Nil".into(),
                ..Range::default()
            },
            auto_approval_range: Range {
                result_value: "negative".into(),
                ..Range::default()
            },
            reference_label: ReferenceLabel::Textual,
            ..MasterReferenceRange::default()
        };
        assert_eq!(classify("nil", &range), Abnormality::Normal);
        assert_eq!(classify("Positive", &range), Abnormality::UpperAbnormal);
        assert!(within_auto_approval_range("NEGATIVE", &range));
        assert!(!within_auto_approval_range("Nil", &range));
    }

    #[test]
    fn test_auto_approval_band() {
        let range = numeric_range();
        assert!(within_auto_approval_range("11", &range));
        assert!(within_auto_approval_range("<= 17", &range));
        assert!(!within_auto_approval_range("17.5", &range));

        let open_top = MasterReferenceRange {
            auto_approval_range: band("5", ""),
            reference_label: ReferenceLabel::Range,
            ..MasterReferenceRange::default()
        };
        assert!(within_auto_approval_range("500", &open_top));

        let unbounded = MasterReferenceRange {
            reference_label: ReferenceLabel::Range,
            ..MasterReferenceRange::default()
        };
        assert!(!within_auto_approval_range("5", &unbounded));
        assert!(!within_auto_approval_range("5", &MasterReferenceRange::default()));
    }
}
