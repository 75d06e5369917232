use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{CiscopeError, Result};

/// The closed set of fetch capabilities a source may advertise. Dispatch
/// goes through this enum, so a handler name that is not declared here
/// cannot reach a source at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    Jobs,
    Builds,
    Tests,
    Deployment,
}

impl Handler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jobs => "fetch_jobs",
            Self::Builds => "fetch_builds",
            Self::Tests => "fetch_tests",
            Self::Deployment => "fetch_deployment",
        }
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl RangeOp {
    pub fn matches(self, value: f64, operand: f64) -> bool {
        match self {
            Self::Gt => value > operand,
            Self::Ge => value >= operand,
            Self::Lt => value < operand,
            Self::Le => value <= operand,
            Self::Eq => (value - operand).abs() < f64::EPSILON,
        }
    }
}

impl FromStr for RangeOp {
    type Err = CiscopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            other => Err(CiscopeError::InvalidConfiguration(format!(
                "unknown range operator '{other}'"
            ))),
        }
    }
}

/// One comparison such as `>=300`. Several ranges supplied for the same
/// criterion are AND-combined by the filter pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub op: RangeOp,
    pub operand: f64,
}

impl RangeFilter {
    pub fn matches(&self, value: f64) -> bool {
        self.op.matches(value, self.operand)
    }
}

impl FromStr for RangeFilter {
    type Err = CiscopeError;

    fn from_str(s: &str) -> Result<Self> {
        let split = s
            .find(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
            .ok_or_else(|| {
                CiscopeError::InvalidConfiguration(format!("range '{s}' has no operand"))
            })?;
        let (op, operand) = s.split_at(split);
        let op = RangeOp::from_str(op.trim())?;
        let operand = operand.trim().parse::<f64>().map_err(|_| {
            CiscopeError::InvalidConfiguration(format!("range operand '{operand}' is not a number"))
        })?;
        Ok(Self { op, operand })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CriterionValue {
    /// Present with no payload, e.g. `--last-build`.
    Flag,
    /// Patterns or exact values, e.g. `--jobs gate.*`.
    List(Vec<String>),
    /// Comparisons, e.g. `--test-duration '>=300'`.
    Ranges(Vec<RangeFilter>),
}

/// Statically declared shape of one query criterion: its depth in the
/// model hierarchy and the fetch capability it triggers, if any.
#[derive(Debug, Clone, Copy)]
pub struct CriterionSpec {
    pub name: &'static str,
    pub level: u32,
    pub handler: Option<Handler>,
}

/// Every criterion the query surface understands. Levels follow the model
/// depth: system = 1, job = 2, build = 3, test = 4. Criteria without a
/// handler only narrow records fetched by another criterion.
pub const CRITERIA: &[CriterionSpec] = &[
    CriterionSpec {
        name: "jobs",
        level: 2,
        handler: Some(Handler::Jobs),
    },
    CriterionSpec {
        name: "deployment",
        level: 2,
        handler: Some(Handler::Deployment),
    },
    CriterionSpec {
        name: "builds",
        level: 3,
        handler: Some(Handler::Builds),
    },
    CriterionSpec {
        name: "last_build",
        level: 3,
        handler: Some(Handler::Builds),
    },
    CriterionSpec {
        name: "build_status",
        level: 3,
        handler: None,
    },
    CriterionSpec {
        name: "build_duration",
        level: 3,
        handler: None,
    },
    CriterionSpec {
        name: "tests",
        level: 4,
        handler: Some(Handler::Tests),
    },
    CriterionSpec {
        name: "test_result",
        level: 4,
        handler: None,
    },
    CriterionSpec {
        name: "test_duration",
        level: 4,
        handler: None,
    },
];

pub fn descriptor(name: &str) -> Result<&'static CriterionSpec> {
    CRITERIA
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| CiscopeError::InvalidConfiguration(format!("unknown criterion '{name}'")))
}

#[derive(Debug, Clone)]
pub struct Criterion {
    pub name: String,
    pub level: u32,
    pub handler: Option<Handler>,
    pub value: CriterionValue,
}

impl Criterion {
    /// Build a criterion from the static registry; unknown names fail at
    /// load time, before any fetch.
    pub fn new(name: &str, value: CriterionValue) -> Result<Self> {
        let spec = descriptor(name)?;
        Ok(Self {
            name: spec.name.to_string(),
            level: spec.level,
            handler: spec.handler,
            value,
        })
    }
}

/// The set of criteria the caller selected for one query run. Read-only
/// once the query starts.
#[derive(Debug, Clone, Default)]
pub struct CriteriaSet {
    criteria: IndexMap<String, Criterion>,
}

impl CriteriaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, criterion: Criterion) {
        self.criteria.insert(criterion.name.clone(), criterion);
    }

    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.criteria.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.criteria.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Criteria sorted by level descending, stable on ties: the order the
    /// orchestrator walks them in.
    pub fn by_level_descending(&self) -> Vec<&Criterion> {
        let mut ordered: Vec<&Criterion> = self.criteria.values().collect();
        ordered.sort_by(|a, b| b.level.cmp(&a.level));
        ordered
    }

    /// The string values of a list criterion, if it is active.
    pub fn values(&self, name: &str) -> Option<&[String]> {
        match self.get(name).map(|c| &c.value) {
            Some(CriterionValue::List(values)) => Some(values.as_slice()),
            _ => None,
        }
    }

    /// The ranges of a ranged criterion, if it is active.
    pub fn ranges(&self, name: &str) -> Option<&[RangeFilter]> {
        match self.get(name).map(|c| &c.value) {
            Some(CriterionValue::Ranges(ranges)) => Some(ranges.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_every_handler_criterion() {
        assert_eq!(descriptor("jobs").unwrap().handler, Some(Handler::Jobs));
        assert_eq!(descriptor("tests").unwrap().level, 4);
        assert!(descriptor("build_status").unwrap().handler.is_none());
    }

    #[test]
    fn test_unknown_criterion_is_a_load_time_error() {
        let err = descriptor("release_notes").unwrap_err();
        assert!(matches!(err, CiscopeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_range_filter_parses_operator_and_operand() {
        let range: RangeFilter = ">=300".parse().unwrap();
        assert_eq!(range.op, RangeOp::Ge);
        assert!(range.matches(300.0));
        assert!(!range.matches(299.9));
    }

    #[test]
    fn test_range_filter_rejects_garbage() {
        assert!("=>300".parse::<RangeFilter>().is_err());
        assert!(">".parse::<RangeFilter>().is_err());
        assert!(">=fast".parse::<RangeFilter>().is_err());
    }

    #[test]
    fn test_operator_table() {
        assert!(RangeOp::Gt.matches(2.0, 1.0));
        assert!(RangeOp::Ge.matches(1.0, 1.0));
        assert!(RangeOp::Lt.matches(0.5, 1.0));
        assert!(RangeOp::Le.matches(1.0, 1.0));
        assert!(RangeOp::Eq.matches(1.0, 1.0));
        assert!(!RangeOp::Eq.matches(1.1, 1.0));
    }

    #[test]
    fn test_ordered_view_is_level_descending_and_stable() {
        let mut criteria = CriteriaSet::new();
        criteria.insert(Criterion::new("jobs", CriterionValue::List(vec![])).unwrap());
        criteria.insert(Criterion::new("tests", CriterionValue::List(vec![])).unwrap());
        criteria.insert(Criterion::new("builds", CriterionValue::List(vec![])).unwrap());
        criteria.insert(Criterion::new("last_build", CriterionValue::Flag).unwrap());

        let names: Vec<&str> = criteria
            .by_level_descending()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        // builds and last_build share level 3 and keep insertion order
        assert_eq!(names, vec!["tests", "builds", "last_build", "jobs"]);
    }
}
