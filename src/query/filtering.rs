use regex::Regex;

use crate::error::{CiscopeError, Result};
use crate::query::criteria::RangeFilter;

/// One stage of the filter pipeline. Stages must be pure: the chain is
/// conjunctive and stage order must not matter.
pub type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Keep the records that satisfy every stage. An empty chain admits all
/// records.
pub fn apply_filters<T>(records: Vec<T>, checks: &[Predicate<T>]) -> Vec<T> {
    records
        .into_iter()
        .filter(|record| checks.iter().all(|check| check(record)))
        .collect()
}

/// OR-join user patterns into a single regex, so `--jobs gate promote`
/// matches either job family.
pub fn join_patterns(patterns: &[String]) -> Result<Regex> {
    Regex::new(&patterns.join("|"))
        .map_err(|e| CiscopeError::InvalidConfiguration(format!("invalid pattern: {e}")))
}

/// Stage matching a regex against a string field of the record.
pub fn regex_stage<T, F>(pattern: Regex, field: F) -> Predicate<T>
where
    F: Fn(&T) -> &str + Send + Sync + 'static,
{
    Box::new(move |record| pattern.is_match(field(record)))
}

/// Stage requiring the field to equal one of the user-supplied values.
pub fn exact_stage<T, F>(values: Vec<String>, field: F) -> Predicate<T>
where
    F: Fn(&T) -> &str + Send + Sync + 'static,
{
    Box::new(move |record| values.iter().any(|value| value == field(record)))
}

/// Case-insensitive variant of [`exact_stage`], for status fields where
/// backends disagree on capitalization.
pub fn iexact_stage<T, F>(values: Vec<String>, field: F) -> Predicate<T>
where
    F: Fn(&T) -> &str + Send + Sync + 'static,
{
    let values: Vec<String> = values.into_iter().map(|v| v.to_uppercase()).collect();
    Box::new(move |record| {
        let field_value = field(record).to_uppercase();
        values.iter().any(|value| *value == field_value)
    })
}

/// Stage requiring a numeric field to satisfy every supplied range.
/// Records without the field never match a ranged criterion.
pub fn range_stage<T, F>(ranges: Vec<RangeFilter>, field: F) -> Predicate<T>
where
    F: Fn(&T) -> Option<f64> + Send + Sync + 'static,
{
    Box::new(move |record| match field(record) {
        Some(value) => ranges.iter().all(|range| range.matches(value)),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Clone)]
    struct Record {
        name: String,
        status: String,
        duration: Option<f64>,
    }

    fn record(name: &str, status: &str, duration: Option<f64>) -> Record {
        Record {
            name: name.into(),
            status: status.into(),
            duration,
        }
    }

    #[test]
    fn test_empty_chain_admits_all_records() {
        let records = vec![record("a", "SUCCESS", None), record("b", "FAILURE", None)];

        let kept = apply_filters(records.clone(), &[]);

        assert_eq!(kept, records);
    }

    #[test]
    fn test_chain_is_conjunctive() {
        let records = vec![
            record("gate-network", "SUCCESS", Some(10.0)),
            record("gate-storage", "FAILURE", Some(10.0)),
            record("promote", "SUCCESS", Some(10.0)),
        ];
        let checks: Vec<Predicate<Record>> = vec![
            regex_stage(join_patterns(&["^gate".into()]).unwrap(), |r: &Record| {
                &r.name
            }),
            iexact_stage(vec!["success".into()], |r: &Record| &r.status),
        ];

        let kept = apply_filters(records, &checks);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "gate-network");
    }

    #[test]
    fn test_patterns_are_or_joined() {
        let pattern = join_patterns(&["gate".into(), "promote".into()]).unwrap();
        let records = vec![
            record("gate-network", "SUCCESS", None),
            record("promote", "SUCCESS", None),
            record("nightly", "SUCCESS", None),
        ];

        let kept = apply_filters(
            records,
            &[regex_stage(pattern, |r: &Record| r.name.as_str())],
        );

        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_exact_stage_matches_whole_value() {
        let records = vec![record("10", "SUCCESS", None), record("103", "SUCCESS", None)];

        let kept = apply_filters(
            records,
            &[exact_stage(vec!["10".into()], |r: &Record| r.name.as_str())],
        );

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "10");
    }

    #[test]
    fn test_multiple_ranges_are_and_combined() {
        let ranges = vec![
            ">=5".parse::<RangeFilter>().unwrap(),
            "<20".parse::<RangeFilter>().unwrap(),
        ];
        let records = vec![
            record("a", "SUCCESS", Some(3.0)),
            record("b", "SUCCESS", Some(10.0)),
            record("c", "SUCCESS", Some(25.0)),
            record("d", "SUCCESS", None),
        ];

        let kept = apply_filters(records, &[range_stage(ranges, |r: &Record| r.duration)]);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "b");
    }
}
