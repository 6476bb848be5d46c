use crate::registry::TaskDefinition;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Verdict of the gate evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Fail(String),
}

impl GateOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateOutcome::Pass)
    }
}

/// The predicate set owned by one task definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateSpec {
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(skip)]
    compiled: CompiledPatterns,
}

/// `matches` patterns keyed by source, compiled on first use.
#[derive(Clone, Default)]
struct CompiledPatterns(OnceLock<HashMap<String, Regex>>);

impl std::fmt::Debug for CompiledPatterns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompiledPatterns")
    }
}

// A cache; two gates are equal when their predicates are.
impl PartialEq for CompiledPatterns {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl GateSpec {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            compiled: CompiledPatterns::default(),
        }
    }

    /// Every valid `matches` pattern of this gate, compiled once. Invalid
    /// patterns are absent and reported by [`GateSpec::issues`].
    pub fn patterns(&self) -> &HashMap<String, Regex> {
        self.compiled.0.get_or_init(|| {
            let mut patterns = HashMap::new();
            for p in &self.predicates {
                p.collect_patterns(&mut patterns);
            }
            patterns
        })
    }

    /// Defects that make the gate unusable (bad regex patterns).
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for p in &self.predicates {
            p.collect_issues(&mut issues);
        }
        issues
    }
}

/// One structured check against a task's output.
///
/// Fields are addressed with dotted paths (`outline_adherence.overall_score`);
/// a purely numeric segment indexes into an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Predicate {
    /// The field exists (any value, including null).
    Present { field: String },
    /// The field exists and is not null, an empty string/array or an empty object.
    NonEmpty { field: String },
    /// String length in characters, or array/object length, is at least `min`.
    MinLength { field: String, min: usize },
    /// String length in characters, or array/object length, is at most `max`.
    MaxLength { field: String, max: usize },
    /// The field equals one of `values`.
    OneOf { field: String, values: Vec<Value> },
    /// The field is a number within the inclusive bounds.
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// The field is a string matching `pattern`.
    Matches { field: String, pattern: String },
    /// The field is a non-empty array of objects whose integer `key` values
    /// are contiguous and increasing (`1, 2, 3`).
    Sequential { field: String, key: String },
    /// `field` is an array whose length equals `other`'s: the length of
    /// another array, or the value of an integer field.
    SameLength { field: String, other: String },
    /// When `field` equals `equals`, every predicate in `then` must hold.
    When {
        field: String,
        equals: Value,
        then: Vec<Predicate>,
    },
    /// At least one of the nested predicates holds.
    AnyOf { predicates: Vec<Predicate> },
}

impl Predicate {
    /// Short human-readable name used in FAIL reasons.
    pub fn label(&self) -> String {
        match self {
            Predicate::Present { field } => format!("present({field})"),
            Predicate::NonEmpty { field } => format!("non_empty({field})"),
            Predicate::MinLength { field, min } => format!("min_length({field}, {min})"),
            Predicate::MaxLength { field, max } => format!("max_length({field}, {max})"),
            Predicate::OneOf { field, .. } => format!("one_of({field})"),
            Predicate::Range { field, .. } => format!("range({field})"),
            Predicate::Matches { field, .. } => format!("matches({field})"),
            Predicate::Sequential { field, key } => format!("sequential({field}.{key})"),
            Predicate::SameLength { field, other } => format!("same_length({field}, {other})"),
            Predicate::When { field, .. } => format!("when({field})"),
            Predicate::AnyOf { .. } => "any_of".to_string(),
        }
    }

    /// Check the predicate; `Err` carries the failure explanation.
    pub fn check(&self, output: &Value) -> Result<(), String> {
        self.check_in(output, &HashMap::new())
    }

    /// Like [`Predicate::check`], taking `matches` patterns from `patterns`
    /// and compiling only the ones missing there.
    fn check_in(&self, output: &Value, patterns: &HashMap<String, Regex>) -> Result<(), String> {
        match self {
            Predicate::Present { field } => lookup(output, field)
                .map(|_| ())
                .ok_or_else(|| format!("field '{field}' is missing")),

            Predicate::NonEmpty { field } => {
                let value = require(output, field)?;
                if is_empty(value) {
                    Err(format!("field '{field}' is empty"))
                } else {
                    Ok(())
                }
            }

            Predicate::MinLength { field, min } => {
                let len = length_of(require(output, field)?, field)?;
                if len < *min {
                    Err(format!("field '{field}' has length {len}, below {min}"))
                } else {
                    Ok(())
                }
            }

            Predicate::MaxLength { field, max } => {
                let len = length_of(require(output, field)?, field)?;
                if len > *max {
                    Err(format!("field '{field}' has length {len}, above {max}"))
                } else {
                    Ok(())
                }
            }

            Predicate::OneOf { field, values } => {
                let value = require(output, field)?;
                if values.contains(value) {
                    Ok(())
                } else {
                    Err(format!("field '{field}' has value {value}, not one of the allowed values"))
                }
            }

            Predicate::Range { field, min, max } => {
                let value = require(output, field)?;
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("field '{field}' is not a number"))?;
                if let Some(lo) = min {
                    if n < *lo {
                        return Err(format!("field '{field}' is {n}, below {lo}"));
                    }
                }
                if let Some(hi) = max {
                    if n > *hi {
                        return Err(format!("field '{field}' is {n}, above {hi}"));
                    }
                }
                Ok(())
            }

            Predicate::Matches { field, pattern } => {
                let text = require(output, field)?
                    .as_str()
                    .ok_or_else(|| format!("field '{field}' is not a string"))?;
                let matched = match patterns.get(pattern) {
                    Some(re) => re.is_match(text),
                    None => Regex::new(pattern)
                        .map_err(|e| format!("invalid pattern for field '{field}': {e}"))?
                        .is_match(text),
                };
                if matched {
                    Ok(())
                } else {
                    Err(format!("field '{field}' does not match /{pattern}/"))
                }
            }

            Predicate::Sequential { field, key } => {
                let items = require(output, field)?
                    .as_array()
                    .ok_or_else(|| format!("field '{field}' is not an array"))?;
                if items.is_empty() {
                    return Err(format!("field '{field}' is empty"));
                }
                let numbers = items
                    .iter()
                    .map(|item| item.get(key).and_then(Value::as_i64))
                    .collect::<Option<Vec<i64>>>()
                    .ok_or_else(|| format!("every entry of '{field}' needs an integer '{key}'"))?;
                let first = numbers[0];
                for (offset, n) in (0_i64..).zip(&numbers) {
                    if first.checked_add(offset) != Some(*n) {
                        return Err(format!(
                            "'{field}.{key}' must be contiguous and increasing, found {numbers:?}"
                        ));
                    }
                }
                Ok(())
            }

            Predicate::SameLength { field, other } => {
                let len = require(output, field)?
                    .as_array()
                    .map(Vec::len)
                    .ok_or_else(|| format!("field '{field}' is not an array"))?;
                let other_value = require(output, other)?;
                let expected = match other_value {
                    Value::Array(a) => a.len(),
                    Value::Number(n) => n
                        .as_u64()
                        .map(|v| v as usize)
                        .ok_or_else(|| format!("field '{other}' is not a length"))?,
                    _ => return Err(format!("field '{other}' is neither an array nor an integer")),
                };
                if len == expected {
                    Ok(())
                } else {
                    Err(format!("field '{field}' has {len} entries, '{other}' expects {expected}"))
                }
            }

            Predicate::When {
                field,
                equals,
                then,
            } => {
                if lookup(output, field) != Some(equals) {
                    return Ok(());
                }
                for p in then {
                    p.check_in(output, patterns)
                        .map_err(|e| format!("when {field} = {equals}: {e}"))?;
                }
                Ok(())
            }

            Predicate::AnyOf { predicates } => {
                let mut reasons = Vec::new();
                for p in predicates {
                    match p.check_in(output, patterns) {
                        Ok(()) => return Ok(()),
                        Err(e) => reasons.push(e),
                    }
                }
                Err(format!("none of the alternatives hold ({})", reasons.join("; ")))
            }
        }
    }

    fn collect_patterns(&self, patterns: &mut HashMap<String, Regex>) {
        match self {
            Predicate::Matches { pattern, .. } => {
                if !patterns.contains_key(pattern) {
                    if let Ok(re) = Regex::new(pattern) {
                        patterns.insert(pattern.clone(), re);
                    }
                }
            }
            Predicate::When { then, .. } => then.iter().for_each(|p| p.collect_patterns(patterns)),
            Predicate::AnyOf { predicates } => {
                predicates.iter().for_each(|p| p.collect_patterns(patterns));
            }
            _ => {}
        }
    }

    fn collect_issues(&self, issues: &mut Vec<String>) {
        match self {
            Predicate::Matches { field, pattern } => {
                if let Err(e) = Regex::new(pattern) {
                    issues.push(format!("invalid pattern for field '{field}': {e}"));
                }
            }
            Predicate::When { then, .. } => then.iter().for_each(|p| p.collect_issues(issues)),
            Predicate::AnyOf { predicates } => {
                predicates.iter().for_each(|p| p.collect_issues(issues));
            }
            _ => {}
        }
    }
}

/// Evaluate a task's output against its definition.
///
/// The output must be a JSON object carrying every declared output key; then
/// the predicates run in order and the first failure decides the reason.
pub fn evaluate(def: &TaskDefinition, output: &Value) -> GateOutcome {
    let Some(object) = output.as_object() else {
        return GateOutcome::Fail("output must be a JSON object".to_string());
    };

    let missing: Vec<&str> = def
        .outputs
        .iter()
        .filter(|key| !object.contains_key(key.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return GateOutcome::Fail(format!("missing required outputs: {}", missing.join(", ")));
    }

    let patterns = def.gate.patterns();
    for predicate in &def.gate.predicates {
        if let Err(reason) = predicate.check_in(output, patterns) {
            return GateOutcome::Fail(format!("{}: {reason}", predicate.label()));
        }
    }
    GateOutcome::Pass
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn require<'a>(value: &'a Value, field: &str) -> Result<&'a Value, String> {
    lookup(value, field).ok_or_else(|| format!("field '{field}' is missing"))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn length_of(value: &Value, field: &str) -> Result<usize, String> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(a) => Ok(a.len()),
        Value::Object(o) => Ok(o.len()),
        _ => Err(format!("field '{field}' has no length")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(outputs: &[&str], predicates: Vec<Predicate>) -> TaskDefinition {
        TaskDefinition::new("t", 1)
            .with_outputs(outputs.iter().copied())
            .with_gate(GateSpec::new(predicates))
    }

    fn field(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn test_output_must_be_object() {
        let d = def(&[], vec![]);
        assert_eq!(
            evaluate(&d, &json!(["a"])),
            GateOutcome::Fail("output must be a JSON object".into())
        );
    }

    #[test]
    fn test_missing_declared_outputs() {
        let d = def(&["hook", "premise"], vec![]);
        let out = evaluate(&d, &json!({"hook": "x"}));
        assert_eq!(
            out,
            GateOutcome::Fail("missing required outputs: premise".into())
        );
    }

    #[test]
    fn test_first_failing_predicate_is_reported() {
        let d = def(
            &["hook"],
            vec![
                Predicate::NonEmpty { field: field("hook") },
                Predicate::MinLength {
                    field: field("hook"),
                    min: 20,
                },
                Predicate::MaxLength {
                    field: field("hook"),
                    max: 2,
                },
            ],
        );
        match evaluate(&d, &json!({"hook": "short"})) {
            GateOutcome::Fail(reason) => {
                assert!(reason.starts_with("min_length(hook, 20)"), "{reason}");
            }
            GateOutcome::Pass => panic!("expected fail"),
        }
    }

    #[test]
    fn test_dotted_paths_and_range() {
        let d = def(
            &[],
            vec![Predicate::Range {
                field: field("outline_adherence.overall_score"),
                min: Some(0.0),
                max: Some(100.0),
            }],
        );
        assert!(evaluate(&d, &json!({"outline_adherence": {"overall_score": 88}})).is_pass());
        assert!(!evaluate(&d, &json!({"outline_adherence": {"overall_score": 101}})).is_pass());
        assert!(!evaluate(&d, &json!({"outline_adherence": {}})).is_pass());
    }

    #[test]
    fn test_one_of_and_matches() {
        let d = def(
            &[],
            vec![
                Predicate::OneOf {
                    field: field("tense"),
                    values: vec![json!("past"), json!("present")],
                },
                Predicate::Matches {
                    field: field("isbn"),
                    pattern: r"^\d{3}-\d{10}$".into(),
                },
            ],
        );
        assert!(evaluate(&d, &json!({"tense": "past", "isbn": "978-1234567890"})).is_pass());
        assert!(!evaluate(&d, &json!({"tense": "future", "isbn": "978-1234567890"})).is_pass());
        assert!(!evaluate(&d, &json!({"tense": "past", "isbn": "nope"})).is_pass());
    }

    #[test]
    fn test_sequential_chapter_numbers() {
        let d = def(
            &["chapter_outline"],
            vec![Predicate::Sequential {
                field: field("chapter_outline"),
                key: "number".into(),
            }],
        );
        let ok = json!({"chapter_outline": [{"number": 1}, {"number": 2}, {"number": 3}]});
        let gap = json!({"chapter_outline": [{"number": 1}, {"number": 3}]});
        let dup = json!({"chapter_outline": [{"number": 1}, {"number": 1}]});
        let empty = json!({"chapter_outline": []});
        assert!(evaluate(&d, &ok).is_pass());
        assert!(!evaluate(&d, &gap).is_pass());
        assert!(!evaluate(&d, &dup).is_pass());
        assert!(!evaluate(&d, &empty).is_pass());
    }

    #[test]
    fn test_sequential_rejects_overflowing_numbers() {
        let d = def(
            &["c"],
            vec![Predicate::Sequential {
                field: field("c"),
                key: "n".into(),
            }],
        );
        let out = json!({"c": [{"n": i64::MAX}, {"n": 1}]});
        match evaluate(&d, &out) {
            GateOutcome::Fail(reason) => {
                assert!(reason.contains("contiguous and increasing"), "{reason}");
            }
            GateOutcome::Pass => panic!("expected fail"),
        }
        let single = json!({"c": [{"n": i64::MAX}]});
        assert!(evaluate(&d, &single).is_pass());
    }

    #[test]
    fn test_same_length_array_and_count() {
        let d = def(
            &[],
            vec![
                Predicate::SameLength {
                    field: field("chapters"),
                    other: field("chapter_outline"),
                },
                Predicate::SameLength {
                    field: field("chapters"),
                    other: field("chapter_count"),
                },
            ],
        );
        let ok = json!({"chapters": [1, 2], "chapter_outline": ["a", "b"], "chapter_count": 2});
        let bad = json!({"chapters": [1], "chapter_outline": ["a", "b"], "chapter_count": 2});
        assert!(evaluate(&d, &ok).is_pass());
        assert!(!evaluate(&d, &bad).is_pass());
    }

    #[test]
    fn test_cross_field_approval_consistency() {
        let d = def(
            &["approved"],
            vec![
                Predicate::When {
                    field: field("approved"),
                    equals: json!(false),
                    then: vec![Predicate::NonEmpty {
                        field: field("required_changes"),
                    }],
                },
                Predicate::When {
                    field: field("approved"),
                    equals: json!(true),
                    then: vec![Predicate::AnyOf {
                        predicates: vec![
                            Predicate::MaxLength {
                                field: field("required_changes"),
                                max: 0,
                            },
                            Predicate::NonEmpty {
                                field: field("waiver"),
                            },
                        ],
                    }],
                },
            ],
        );
        assert!(evaluate(&d, &json!({"approved": true, "required_changes": []})).is_pass());
        assert!(evaluate(&d, &json!({"approved": false, "required_changes": ["fix ch 3"]})).is_pass());
        assert!(!evaluate(&d, &json!({"approved": false, "required_changes": []})).is_pass());
        assert!(!evaluate(&d, &json!({"approved": true, "required_changes": ["x"]})).is_pass());
        assert!(evaluate(
            &d,
            &json!({"approved": true, "required_changes": ["x"], "waiver": "editor"})
        )
        .is_pass());
    }

    #[test]
    fn test_predicates_from_toml() {
        let spec: GateSpec = toml::from_str(
            r#"
            [[predicates]]
            check = "min_length"
            field = "hook"
            min = 3

            [[predicates]]
            check = "one_of"
            field = "tense"
            values = ["past", "present"]
            "#,
        )
        .unwrap();
        assert_eq!(spec.predicates.len(), 2);
        assert_eq!(
            spec.predicates[0],
            Predicate::MinLength {
                field: "hook".into(),
                min: 3
            }
        );
    }

    #[test]
    fn test_invalid_pattern_is_an_issue() {
        let spec = GateSpec::new(vec![Predicate::AnyOf {
            predicates: vec![Predicate::Matches {
                field: "x".into(),
                pattern: "(".into(),
            }],
        }]);
        assert_eq!(spec.issues().len(), 1);
    }

    #[test]
    fn test_patterns_compiled_once_per_gate() {
        let spec = GateSpec::new(vec![
            Predicate::Matches {
                field: field("isbn"),
                pattern: r"^\d{3}-".into(),
            },
            Predicate::AnyOf {
                predicates: vec![
                    Predicate::Matches {
                        field: field("isbn"),
                        pattern: r"\d$".into(),
                    },
                    Predicate::Matches {
                        field: field("isbn"),
                        pattern: "(".into(),
                    },
                ],
            },
        ]);
        let first = spec.patterns();
        assert_eq!(first.len(), 2);
        assert!(std::ptr::eq(first, spec.patterns()));

        let d = TaskDefinition::new("t", 1).with_gate(spec);
        assert!(evaluate(&d, &json!({"isbn": "978-1234567890"})).is_pass());
        assert!(!evaluate(&d, &json!({"isbn": "97-81234"})).is_pass());
    }

    #[test]
    fn test_gate_is_deterministic() {
        let d = def(&["hook"], vec![Predicate::NonEmpty { field: field("hook") }]);
        let out = json!({"hook": ""});
        assert_eq!(evaluate(&d, &out), evaluate(&d, &out));
    }
}
