//! Metric sets carried by process and main reports, with their field-wise merge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Two partials carried different non-null values for the same field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOverlap {
    pub field: &'static str,
    pub kept: String,
    pub dropped: String,
}

/// Field-wise first-non-null merge. Implementations list every field exactly once.
pub trait MergeFields: Default {
    fn merge_from(&mut self, other: &Self, overlaps: &mut Vec<FieldOverlap>);
    fn populated_fields(&self) -> Vec<&'static str>;

    fn is_blank(&self) -> bool {
        self.populated_fields().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub value: T,
    pub overlaps: Vec<FieldOverlap>,
    pub blank_partials: usize,
}

/// Folds partials in order; the first non-null value of each field wins.
pub fn merge_first_non_null<T, I>(partials: I) -> Merged<T>
where
    T: MergeFields,
    I: IntoIterator<Item = T>,
{
    let mut value = T::default();
    let mut overlaps = Vec::new();
    let mut blank_partials = 0usize;
    for partial in partials {
        if partial.is_blank() {
            blank_partials += 1;
            continue;
        }
        value.merge_from(&partial, &mut overlaps);
    }
    Merged {
        value,
        overlaps,
        blank_partials,
    }
}

fn merge_slot<T: Clone + PartialEq + fmt::Debug>(
    slot: &mut Option<T>,
    incoming: &Option<T>,
    field: &'static str,
    overlaps: &mut Vec<FieldOverlap>,
) {
    match (slot.as_ref(), incoming) {
        (None, Some(value)) => *slot = Some(value.clone()),
        (Some(kept), Some(value)) if kept != value => overlaps.push(FieldOverlap {
            field,
            kept: format!("{kept:?}"),
            dropped: format!("{value:?}"),
        }),
        _ => {}
    }
}

macro_rules! metric_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: Option<$ty>, )*
        }

        impl $name {
            pub const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];
        }

        impl MergeFields for $name {
            fn merge_from(&mut self, other: &Self, overlaps: &mut Vec<FieldOverlap>) {
                $( merge_slot(&mut self.$field, &other.$field, stringify!($field), overlaps); )*
            }

            fn populated_fields(&self) -> Vec<&'static str> {
                let mut out = Vec::new();
                $( if self.$field.is_some() { out.push(stringify!($field)); } )*
                out
            }
        }
    };
}

metric_set! {
    /// Derived KPIs for one category (or the cross-category totals of a main report).
    ///
    /// Fields are grouped by the stage that produces them: labor-hour input,
    /// production cost, then efficiency ratios.
    pub struct ProcessMetrics {
        headcount: i64,
        present_count: i64,
        regular_hours: f64,
        overtime_hours: f64,
        total_input_hours: f64,
        direct_hours: f64,
        indirect_hours: f64,
        loss_hours: f64,
        support_in_hours: f64,
        support_out_hours: f64,
        net_input_hours: f64,
        loss_rate: f64,
        indirect_ratio: f64,
        hours_per_head: f64,

        lot_count: i64,
        completed_lot_count: i64,
        plan_qty: i64,
        input_qty: i64,
        completed_qty: i64,
        defect_qty: i64,
        /// completed - input; negative values are kept as-is.
        wip_qty: i64,
        material_cost: f64,
        processing_cost: f64,
        defect_cost: f64,
        total_cost: f64,
        unit_cost: f64,
        material_cost_ratio: f64,
        processing_cost_ratio: f64,

        earned_hours: f64,
        labor_efficiency: f64,
        defect_rate: f64,
        achievement_rate: f64,
        yield_rate: f64,
        lot_completion_rate: f64,
        output_per_hour: f64,
        cost_per_hour: f64,
    }
}

metric_set! {
    /// Attendance stage of the main report.
    pub struct AttendanceMetrics {
        total_headcount: i64,
        attended_count: i64,
        late_count: i64,
        absent_count: i64,
        leave_count: i64,
        attendance_rate: f64,
        absence_rate: f64,
    }
}

/// Cross-category metrics: the attendance stage plus the summed process stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainMetrics {
    pub attendance: AttendanceMetrics,
    pub totals: ProcessMetrics,
}

impl MainMetrics {
    pub fn from_attendance(attendance: AttendanceMetrics) -> Self {
        Self {
            attendance,
            totals: ProcessMetrics::default(),
        }
    }

    pub fn from_totals(totals: ProcessMetrics) -> Self {
        Self {
            attendance: AttendanceMetrics::default(),
            totals,
        }
    }
}

impl MergeFields for MainMetrics {
    fn merge_from(&mut self, other: &Self, overlaps: &mut Vec<FieldOverlap>) {
        self.attendance.merge_from(&other.attendance, overlaps);
        self.totals.merge_from(&other.totals, overlaps);
    }

    fn populated_fields(&self) -> Vec<&'static str> {
        let mut out = self.attendance.populated_fields();
        out.extend(self.totals.populated_fields());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial_a() -> ProcessMetrics {
        ProcessMetrics {
            defect_rate: Some(1.0),
            ..Default::default()
        }
    }

    fn partial_b() -> ProcessMetrics {
        ProcessMetrics {
            achievement_rate: Some(2.0),
            ..Default::default()
        }
    }

    #[test]
    fn disjoint_partials_merge_in_either_order() {
        let ab = merge_first_non_null([partial_a(), partial_b()]);
        let ba = merge_first_non_null([partial_b(), partial_a()]);
        assert_eq!(ab.value.defect_rate, Some(1.0));
        assert_eq!(ab.value.achievement_rate, Some(2.0));
        assert_eq!(ab.value, ba.value);
        assert!(ab.overlaps.is_empty());
    }

    #[test]
    fn null_never_overwrites_a_value() {
        let a = ProcessMetrics {
            defect_rate: Some(1.0),
            ..Default::default()
        };
        let b = ProcessMetrics {
            defect_rate: None,
            headcount: Some(3),
            ..Default::default()
        };
        assert_eq!(merge_first_non_null([a.clone(), b.clone()]).value.defect_rate, Some(1.0));
        assert_eq!(merge_first_non_null([b, a]).value.defect_rate, Some(1.0));
    }

    #[test]
    fn conflicting_values_keep_first_and_report_overlap() {
        let a = ProcessMetrics {
            total_cost: Some(10.0),
            ..Default::default()
        };
        let b = ProcessMetrics {
            total_cost: Some(12.5),
            ..Default::default()
        };
        let merged = merge_first_non_null([a, b]);
        assert_eq!(merged.value.total_cost, Some(10.0));
        assert_eq!(merged.overlaps.len(), 1);
        assert_eq!(merged.overlaps[0].field, "total_cost");
        assert_eq!(merged.overlaps[0].dropped, "12.5");
    }

    #[test]
    fn equal_values_are_not_overlaps_and_blank_partials_are_counted() {
        let a = ProcessMetrics {
            lot_count: Some(4),
            ..Default::default()
        };
        let merged = merge_first_non_null([ProcessMetrics::default(), a.clone(), a]);
        assert!(merged.overlaps.is_empty());
        assert_eq!(merged.blank_partials, 1);
        assert_eq!(merged.value.lot_count, Some(4));
    }

    #[test]
    fn field_lists_have_no_duplicates() {
        let mut all: Vec<&str> = ProcessMetrics::FIELDS.to_vec();
        all.extend(AttendanceMetrics::FIELDS);
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(before, all.len());
        assert_eq!(ProcessMetrics::FIELDS.len(), 36);
    }

    #[test]
    fn main_metrics_merge_spans_both_stages() {
        let attendance = MainMetrics::from_attendance(AttendanceMetrics {
            total_headcount: Some(12),
            ..Default::default()
        });
        let totals = MainMetrics::from_totals(ProcessMetrics {
            plan_qty: Some(100),
            ..Default::default()
        });
        let merged = merge_first_non_null([attendance, totals]);
        assert_eq!(merged.value.attendance.total_headcount, Some(12));
        assert_eq!(merged.value.totals.plan_qty, Some(100));
        assert_eq!(merged.value.populated_fields(), vec!["total_headcount", "plan_qty"]);
    }
}
