//! Comparison of a job's failures against reference jobs.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{FailureSignature, JobResults, TestFailure};

/// A failure with its comparison flags. Flags are never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedFailure {
    #[serde(flatten)]
    pub failure: TestFailure,
    /// Failed in a reference job but not any more
    pub fixed: bool,
    /// Fails now but did not fail in any reference job
    pub regression: bool,
    /// Known to flip between passing and failing, or to fail inconsistently
    pub unstable: bool,
}

impl AnnotatedFailure {
    fn new(failure: TestFailure) -> Self {
        AnnotatedFailure {
            failure,
            fixed: false,
            regression: false,
            unstable: false,
        }
    }
}

/// Current failures annotated against a baseline, fixed ones appended.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultsDiff {
    pub results: BTreeMap<String, Vec<AnnotatedFailure>>,
    /// False when no reference job was supplied
    pub has_baseline: bool,
}

impl ResultsDiff {
    /// Failures that did not happen in any reference job.
    pub fn new_failures(&self) -> BTreeMap<&str, Vec<&AnnotatedFailure>> {
        self.section(|f| f.regression)
    }

    /// Reference failures that disappeared.
    pub fn fixed_failures(&self) -> BTreeMap<&str, Vec<&AnnotatedFailure>> {
        self.section(|f| f.fixed)
    }

    /// Everything failing now, without the fixed entries.
    pub fn current_failures(&self) -> BTreeMap<&str, Vec<&AnnotatedFailure>> {
        self.section(|f| !f.fixed)
    }

    fn section<F>(&self, keep: F) -> BTreeMap<&str, Vec<&AnnotatedFailure>>
    where
        F: Fn(&AnnotatedFailure) -> bool,
    {
        self.results
            .iter()
            .filter_map(|(suite, failures)| {
                let kept: Vec<&AnnotatedFailure> = failures.iter().filter(|f| keep(f)).collect();
                (!kept.is_empty()).then_some((suite.as_str(), kept))
            })
            .collect()
    }
}

/// Union the results of several reference jobs, one entry per signature.
pub fn union_results(references: &[JobResults]) -> JobResults {
    let mut union = JobResults::new();
    let mut seen: HashSet<(String, FailureSignature)> = HashSet::new();

    for reference in references {
        for (suite, failures) in reference {
            let entry = union.entry(suite.clone()).or_default();
            for failure in failures {
                if seen.insert((suite.clone(), failure.signature())) {
                    entry.push(failure.clone());
                }
            }
        }
    }

    union
}

/// Annotate `current` against the union of `references`.
///
/// A current failure missing from the baseline is a regression; a baseline
/// failure missing from `current` is appended with `fixed` set. Without any
/// reference there is no baseline and nothing is flagged.
pub fn diff_results(current: &JobResults, references: &[JobResults]) -> ResultsDiff {
    let mut diff = ResultsDiff {
        results: BTreeMap::new(),
        has_baseline: !references.is_empty(),
    };

    if references.is_empty() {
        for (suite, failures) in current {
            diff.results.insert(
                suite.clone(),
                failures.iter().cloned().map(AnnotatedFailure::new).collect(),
            );
        }
        return diff;
    }

    let baseline = union_results(references);

    for (suite, failures) in current {
        let known: HashSet<FailureSignature> = baseline
            .get(suite)
            .map(|old| old.iter().map(TestFailure::signature).collect())
            .unwrap_or_default();

        let annotated = failures
            .iter()
            .map(|failure| {
                let mut entry = AnnotatedFailure::new(failure.clone());
                entry.regression = !known.contains(&failure.signature());
                entry
            })
            .collect();
        diff.results.insert(suite.clone(), annotated);
    }

    for (suite, old_failures) in &baseline {
        let still_failing: HashSet<FailureSignature> = current
            .get(suite)
            .map(|now| now.iter().map(TestFailure::signature).collect())
            .unwrap_or_default();

        let fixed: Vec<AnnotatedFailure> = old_failures
            .iter()
            .filter(|old| !still_failing.contains(&old.signature()))
            .map(|old| {
                let mut entry = AnnotatedFailure::new(old.clone());
                entry.fixed = true;
                entry
            })
            .collect();

        if !fixed.is_empty() {
            diff.results.entry(suite.clone()).or_default().extend(fixed);
        }
    }

    diff
}
