//! Worker/request label matching.
//!
//! A request can run on a worker when the worker carries all of the
//! request's base labels. Provisionable labels are a preference: a worker
//! missing them can still take the request, but only after workers that
//! already carry them had their chance.

use std::collections::BTreeSet;

use quota_state::TaskRequest;

/// Which labels a worker must carry for a request to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Base and provisionable labels.
    ProvisionAware,
    /// Base labels only.
    Basic,
}

/// Match quality of `request` on a worker with `labels`, or `None` if the
/// worker cannot run it. Higher is better: a request asking for more base
/// labels is a rarer fit and is preferred for a worker that has them.
pub fn match_quality(labels: &BTreeSet<String>, request: &TaskRequest, mode: MatchMode) -> Option<usize> {
    if mode == MatchMode::ProvisionAware && !request.provisionable_labels.is_subset(labels) {
        return None;
    }
    request
        .base_labels
        .is_subset(labels)
        .then_some(request.base_labels.len())
}

/// Index of the best-quality request in `candidates` that matches
/// `labels` and passes `eligible`. Ties go to the earliest candidate.
pub(crate) fn best_match<'r, I, F>(
    labels: &BTreeSet<String>,
    candidates: I,
    mode: MatchMode,
    mut eligible: F,
) -> Option<usize>
where
    I: IntoIterator<Item = &'r TaskRequest>,
    F: FnMut(usize, &TaskRequest) -> bool,
{
    let mut best: Option<(usize, usize)> = None;
    for (index, request) in candidates.into_iter().enumerate() {
        let Some(quality) = match_quality(labels, request, mode) else {
            continue;
        };
        if best.is_some_and(|(_, q)| q >= quality) {
            continue;
        }
        if eligible(index, request) {
            best = Some((index, quality));
        }
    }
    best.map(|(index, _)| index)
}
