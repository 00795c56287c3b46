//! Custom Resource Definitions for Tofan

mod object_template;
mod test_case;
mod types;

pub use object_template::{ObjectTemplate, ObjectTemplateSpec, ObjectTemplateStatus, TemplateGvk};
pub use test_case::{
    conditions, ConditionCriteria, DynamicField, ObjectTemplateRef, ReadinessCriteria,
    TargetMetric, TestCase, TestCasePhase, TestCaseSpec, TestCaseStatus,
};
pub use types::{
    any_json_map, find_condition, preserve_unknown_object, set_condition, Condition,
    ConditionStatus,
};
