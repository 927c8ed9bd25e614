//! Randomized gift-exchange assignment.
//!
//! A run has two phases that share one assignment map and one random generator:
//! preferred pairings are resolved first, then every remaining active participant is
//! matched against the roster minus their exclusions. The pass is greedy and never
//! backtracks; a participant left with no viable receiver aborts the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Names starting with this marker are disabled: they neither give nor receive.
pub const DISABLED_MARKER: char = '#';

#[must_use]
pub fn is_disabled(name: &str) -> bool {
    name.starts_with(DISABLED_MARKER)
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AssignError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    ZeroPossibilities(Box<ZeroPossibilities>),
}

/// A regular-phase sender had no receiver left.
///
/// `partial` holds every assignment committed strictly before the failing sender, so
/// `partial.len() == assigned`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, thiserror::Error)]
#[error(
    "zero possibilities found for {sender_name} [{index}] (excludes: {excluded}, possible: {possible}). Assigned {assigned} of {total}"
)]
pub struct ZeroPossibilities {
    pub index: usize,
    pub sender_name: String,
    pub excluded: usize,
    pub possible: usize,
    pub assigned: usize,
    pub total: usize,
    pub partial: Assignments,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Participant {
    pub name: String,
    #[serde(default)]
    pub exclude_group_1: Option<String>,
    #[serde(default)]
    pub exclude_group_2: Option<String>,
}

impl Participant {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), exclude_group_1: None, exclude_group_2: None }
    }

    #[must_use]
    pub fn with_groups(
        name: impl Into<String>,
        exclude_group_1: Option<&str>,
        exclude_group_2: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            exclude_group_1: exclude_group_1.map(str::to_string),
            exclude_group_2: exclude_group_2.map(str::to_string),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        is_disabled(&self.name)
    }

    /// True when both participants carry the same set value on either exclusion axis.
    #[must_use]
    pub fn shares_group_with(&self, other: &Self) -> bool {
        fn same(lhs: Option<&String>, rhs: Option<&String>) -> bool {
            matches!((lhs, rhs), (Some(lhs), Some(rhs)) if lhs == rhs)
        }

        same(self.exclude_group_1.as_ref(), other.exclude_group_1.as_ref())
            || same(self.exclude_group_2.as_ref(), other.exclude_group_2.as_ref())
    }
}

/// One acceptable receiver for a giver. Several rows may share a giver.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct PreferredAssignment {
    pub giver: String,
    pub receiver: String,
}

impl PreferredAssignment {
    #[must_use]
    pub fn new(giver: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self { giver: giver.into(), receiver: receiver.into() }
    }
}

/// Receivers each giver had in earlier rounds, collapsed to a set per giver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct PastAssignments(BTreeMap<String, BTreeSet<String>>);

impl PastAssignments {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank receivers are ignored.
    pub fn insert(&mut self, giver: impl Into<String>, receiver: impl Into<String>) {
        let receiver = receiver.into();
        if receiver.trim().is_empty() {
            return;
        }
        self.0.entry(giver.into()).or_default().insert(receiver);
    }

    pub fn receivers_for<'a>(&'a self, giver: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.get(giver).into_iter().flatten().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<G, R> FromIterator<(G, R)> for PastAssignments
where
    G: Into<String>,
    R: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (G, R)>>(iter: I) -> Self {
        let mut past = Self::new();
        for (giver, receiver) in iter {
            past.insert(giver, receiver);
        }
        past
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct AssignmentPair {
    pub giver: String,
    pub receiver: String,
}

/// Giver to receiver map in commit order. Entries are never removed or overwritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct Assignments(Vec<AssignmentPair>);

impl Assignments {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `giver -> receiver`. Returns `false` and leaves the map untouched when the
    /// giver already has a receiver.
    pub fn commit(&mut self, giver: impl Into<String>, receiver: impl Into<String>) -> bool {
        let giver = giver.into();
        if self.contains_giver(&giver) {
            return false;
        }
        self.0.push(AssignmentPair { giver, receiver: receiver.into() });
        true
    }

    #[must_use]
    pub fn get(&self, giver: &str) -> Option<&str> {
        self.0.iter().find(|pair| pair.giver == giver).map(|pair| pair.receiver.as_str())
    }

    #[must_use]
    pub fn contains_giver(&self, giver: &str) -> bool {
        self.0.iter().any(|pair| pair.giver == giver)
    }

    pub fn receivers(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|pair| pair.receiver.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AssignmentPair> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Assignments {
    type Item = &'a AssignmentPair;
    type IntoIter = std::slice::Iter<'a, AssignmentPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Single distinct preferred receiver, assigned without exclusions.
    Forced,
    Preferred,
    Regular,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forced => "forced",
            Self::Preferred => "preferred",
            Self::Regular => "regular",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How tight one committed assignment was.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SelectionRecord {
    pub name: String,
    pub phase: Phase,
    pub excluded: usize,
    pub possible: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    AlreadyAssigned,
    NoCandidates,
    NoViableCandidates,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::AlreadyAssigned => "already_assigned",
            Self::NoCandidates => "no_candidates",
            Self::NoViableCandidates => "no_viable_candidates",
        }
    }
}

/// A preferred-assignment giver the preference phase left alone.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SkippedGiver {
    pub name: String,
    pub reason: SkipReason,
}

/// Everything a run consumes: roster, preferred pairings and history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RosterInput {
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub preferred: Vec<PreferredAssignment>,
    #[serde(default)]
    pub past: PastAssignments,
}

impl RosterInput {
    /// Check the roster before any draw is made.
    ///
    /// # Errors
    /// Returns [`AssignError::Validation`] when a participant name is blank or repeated, or
    /// when a preferred row has a blank giver.
    pub fn validate(&self) -> Result<(), AssignError> {
        let mut seen = BTreeSet::new();
        for participant in &self.participants {
            if participant.name.trim().is_empty() {
                return Err(AssignError::Validation(
                    "participant name MUST be non-empty".to_string(),
                ));
            }
            if !seen.insert(participant.name.as_str()) {
                return Err(AssignError::Validation(format!(
                    "participant name MUST be unique (duplicate: {})",
                    participant.name
                )));
            }
        }

        if self.preferred.iter().any(|row| row.giver.trim().is_empty()) {
            return Err(AssignError::Validation(
                "preferred assignment giver MUST be non-empty".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.participants.iter().filter(|participant| !participant.is_disabled()).count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct AssignmentOutcome {
    pub assignments: Assignments,
    pub selections: Vec<SelectionRecord>,
    pub skipped: Vec<SkippedGiver>,
}

impl AssignmentOutcome {
    fn record(&mut self, name: &str, phase: Phase, excluded: usize, possible: usize) {
        self.selections.push(SelectionRecord { name: name.to_string(), phase, excluded, possible });
    }

    fn skip(&mut self, name: &str, reason: SkipReason) {
        self.skipped.push(SkippedGiver { name: name.to_string(), reason });
    }
}

/// Optional seed for the run's generator. Without one the generator draws from OS entropy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct RunSeed(pub Option<u64>);

impl RunSeed {
    #[must_use]
    pub fn rng(self) -> StdRng {
        match self.0 {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl From<Option<u64>> for RunSeed {
    fn from(value: Option<u64>) -> Self {
        Self(value)
    }
}

/// Run both phases over `input`, drawing every random choice from `rng`.
///
/// Draw order is fixed: preferred givers in ascending name order, then the roster
/// shuffle, the sender shuffle, and one draw per regular sender. The same seed and input
/// therefore yield the same outcome.
///
/// # Errors
/// Returns [`AssignError::Validation`] for a malformed roster and
/// [`AssignError::ZeroPossibilities`] when a regular sender has no receiver left.
pub fn assign<R: Rng + ?Sized>(
    input: &RosterInput,
    rng: &mut R,
) -> Result<AssignmentOutcome, AssignError> {
    input.validate()?;

    let mut outcome = AssignmentOutcome::default();
    resolve_preferences(&input.preferred, &input.past, &mut outcome, rng);
    assign_regular(&input.participants, &input.past, &mut outcome, rng)?;

    tracing::info!(
        assigned = outcome.assignments.len(),
        total = input.participants.len(),
        "assignment run complete"
    );
    Ok(outcome)
}

/// Group preferred rows by giver. Givers iterate in ascending order; receivers keep row
/// order. A blank receiver registers the giver without adding a candidate.
fn group_preferences(preferred: &[PreferredAssignment]) -> BTreeMap<&str, Vec<&str>> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in preferred {
        let candidates = grouped.entry(row.giver.as_str()).or_default();
        if !row.receiver.trim().is_empty() {
            candidates.push(row.receiver.as_str());
        }
    }
    grouped
}

/// Preference phase. Never fails: givers without a viable candidate are recorded in
/// `outcome.skipped` and left for the regular phase.
pub fn resolve_preferences<R: Rng + ?Sized>(
    preferred: &[PreferredAssignment],
    past: &PastAssignments,
    outcome: &mut AssignmentOutcome,
    rng: &mut R,
) {
    tracing::info!(rows = preferred.len(), "applying random preferred assignments");

    for (giver, candidates) in group_preferences(preferred) {
        if is_disabled(giver) {
            tracing::debug!(giver, "skipping disabled giver");
            outcome.skip(giver, SkipReason::Disabled);
            continue;
        }
        if outcome.assignments.contains_giver(giver) {
            tracing::info!(giver, "giver already assigned");
            outcome.skip(giver, SkipReason::AlreadyAssigned);
            continue;
        }

        let distinct: BTreeSet<&str> =
            candidates.iter().copied().filter(|candidate| !is_disabled(candidate)).collect();
        let forced = match distinct.len() {
            0 => {
                tracing::info!(giver, "giver has no preferred receivers to choose from");
                outcome.skip(giver, SkipReason::NoCandidates);
                continue;
            }
            1 => distinct.first().copied(),
            _ => None,
        };
        if let Some(receiver) = forced {
            outcome.assignments.commit(giver, receiver);
            outcome.record(giver, Phase::Forced, 0, 1);
            tracing::debug!(giver, receiver, "forced preferred assignment");
            continue;
        }

        let excluded: BTreeSet<&str> =
            past.receivers_for(giver).chain(outcome.assignments.receivers()).collect();
        let possible: Vec<&str> =
            distinct.iter().copied().filter(|candidate| !excluded.contains(candidate)).collect();
        let n_excluded = excluded.len();

        let Some(receiver) = possible.choose(rng).copied() else {
            tracing::warn!(giver, excluded = n_excluded, "no possible preferred matches for giver");
            outcome.skip(giver, SkipReason::NoViableCandidates);
            continue;
        };
        outcome.assignments.commit(giver, receiver);
        outcome.record(giver, Phase::Preferred, n_excluded, possible.len());
        tracing::debug!(
            giver,
            receiver,
            excluded = n_excluded,
            possible = possible.len(),
            "preferred assignment"
        );
    }
}

/// Regular phase. Visits every roster member not yet assigned in shuffled order and
/// draws a receiver from the active roster minus the sender's exclusions.
///
/// # Errors
/// Returns [`AssignError::ZeroPossibilities`] for the first sender with no receiver left.
/// The outcome keeps the assignments made so far, which the error also carries.
pub fn assign_regular<R: Rng + ?Sized>(
    roster: &[Participant],
    past: &PastAssignments,
    outcome: &mut AssignmentOutcome,
    rng: &mut R,
) -> Result<(), AssignError> {
    tracing::info!(roster = roster.len(), "applying random regular assignments");

    let mut pool: Vec<&Participant> =
        roster.iter().filter(|participant| !participant.is_disabled()).collect();
    pool.shuffle(rng);
    let mut senders: Vec<&Participant> = roster
        .iter()
        .filter(|participant| !outcome.assignments.contains_giver(&participant.name))
        .collect();
    senders.shuffle(rng);

    for (index, sender) in senders.into_iter().enumerate() {
        if sender.is_disabled() {
            tracing::debug!(sender = %sender.name, "skipping disabled sender");
            continue;
        }
        if outcome.assignments.contains_giver(&sender.name) {
            tracing::info!(sender = %sender.name, "sender already assigned");
            continue;
        }

        let mut excluded: BTreeSet<&str> = BTreeSet::new();
        excluded.insert(sender.name.as_str());
        excluded.extend(
            pool.iter()
                .filter(|candidate| sender.shares_group_with(candidate))
                .map(|candidate| candidate.name.as_str()),
        );
        excluded.extend(past.receivers_for(&sender.name));
        excluded.extend(outcome.assignments.receivers());

        // Ordered as the shuffled pool; the set is only used for the count.
        let choices: Vec<&str> = pool
            .iter()
            .map(|candidate| candidate.name.as_str())
            .filter(|name| !excluded.contains(name))
            .collect();
        let possible: BTreeSet<&str> = choices.iter().copied().collect();
        let n_excluded = excluded.len();
        tracing::trace!(sender = %sender.name, ?possible, "possible receivers");

        let Some(receiver) = choices.choose(rng).copied() else {
            let failure = ZeroPossibilities {
                index,
                sender_name: sender.name.clone(),
                excluded: n_excluded,
                possible: possible.len(),
                assigned: outcome.assignments.len(),
                total: roster.len(),
                partial: outcome.assignments.clone(),
            };
            tracing::error!(
                sender = %sender.name,
                index,
                excluded = n_excluded,
                assigned = failure.assigned,
                total = failure.total,
                "unable to find a receiver for sender"
            );
            return Err(AssignError::ZeroPossibilities(Box::new(failure)));
        };

        outcome.assignments.commit(sender.name.as_str(), receiver);
        outcome.record(&sender.name, Phase::Regular, n_excluded, possible.len());
        tracing::debug!(
            sender = %sender.name,
            receiver,
            excluded = n_excluded,
            possible = possible.len(),
            "regular assignment"
        );
    }

    Ok(())
}
