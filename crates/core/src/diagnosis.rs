//! Diagnosis Pools
//!
//! Two separate stores of diagnosis candidates are kept for a session:
//!
//! - [`WorkingPool`]: raw accumulation. Every candidate the diagnosis
//!   collaborator reports is merged in by id, indicators growing by set union.
//! - [`ConsolidatedPool`]: the ranked display view. It is never updated
//!   incrementally; it is replaced wholesale with the evaluator's merge of the
//!   working pool against fresh candidates (`consolidated := evaluate(working, ..)`).
//!
//! Nothing links the two except the candidate id. Both are owned by
//! [`DiagnosisPool`] so callers always name which one they mean.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

/// Likelihood tier derived purely from how many indicators support a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProbabilityTier {
    Low,
    Medium,
    High,
}

impl ProbabilityTier {
    /// `0..=3` is Low, `4..=5` is Medium, anything above is High.
    pub fn from_indicator_count(count: usize) -> Self {
        match count {
            0..=3 => ProbabilityTier::Low,
            4..=5 => ProbabilityTier::Medium,
            _ => ProbabilityTier::High,
        }
    }
}

/// Display-priority classification for the consolidated pool.
///
/// Unlike [`ProbabilityTier`] this depends on the candidate's rank as well as
/// its indicator count, so it only exists for consolidated candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityTier {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    Moderate,
    High,
}

impl SeverityTier {
    /// Classifies a candidate by its 1-based `rank` and indicator count.
    pub fn classify(rank: usize, indicator_count: usize) -> Self {
        if rank == 1 && indicator_count > 8 {
            SeverityTier::High
        } else if indicator_count > 5 {
            SeverityTier::Moderate
        } else if indicator_count > 3 {
            SeverityTier::Low
        } else {
            SeverityTier::VeryLow
        }
    }
}

/// A candidate as reported by a collaborator. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    #[serde(default, alias = "did", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "diagnosis", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, alias = "indicators_point")]
    pub indicators: Vec<String>,
}

impl DiagnosisRecord {
    pub fn new<I, S>(id: &str, label: &str, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Some(id.to_string()),
            label: Some(label.to_string()),
            indicators: indicators.into_iter().map(Into::into).collect(),
        }
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }

    fn indicator_set(&self) -> BTreeSet<String> {
        self.indicators
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A stored candidate. Derived fields are computed from `indicators` on
/// demand, so they can never drift from the set they describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisCandidate {
    id: String,
    label: String,
    indicators: BTreeSet<String>,
}

impl DiagnosisCandidate {
    fn from_record(record: &DiagnosisRecord) -> Option<Self> {
        Some(Self {
            id: record.id()?.to_string(),
            label: record.label()?.to_string(),
            indicators: record.indicator_set(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn indicators(&self) -> &BTreeSet<String> {
        &self.indicators
    }

    pub fn indicator_count(&self) -> usize {
        self.indicators.len()
    }

    pub fn probability(&self) -> ProbabilityTier {
        ProbabilityTier::from_indicator_count(self.indicator_count())
    }

    fn priority(&self) -> (ProbabilityTier, usize) {
        (self.probability(), self.indicator_count())
    }

    fn basic(&self) -> BasicDiagnosis {
        BasicDiagnosis {
            id: self.id.clone(),
            label: self.label.clone(),
            indicators: self.indicators.iter().cloned().collect(),
        }
    }
}

impl Serialize for DiagnosisCandidate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DiagnosisCandidate", 5)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("label", &self.label)?;
        s.serialize_field("indicators", &self.indicators)?;
        s.serialize_field("indicator_count", &self.indicator_count())?;
        s.serialize_field("probability", &self.probability())?;
        s.end()
    }
}

/// The id/label/indicators projection handed to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicDiagnosis {
    pub id: String,
    pub label: String,
    pub indicators: Vec<String>,
}

/// The label/indicators projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledIndicators {
    pub label: String,
    pub indicators: Vec<String>,
}

/// A consolidated candidate with its display rank and severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedDiagnosis {
    pub id: String,
    pub label: String,
    pub indicators: Vec<String>,
    pub indicator_count: usize,
    pub probability: ProbabilityTier,
    pub rank: usize,
    pub severity: SeverityTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Every stored and derived field.
    Full,
    /// `id`, `label` and `indicators`.
    Basic,
    /// `label` and `indicators`.
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DiagnosisView {
    Full(DiagnosisCandidate),
    Basic(BasicDiagnosis),
    Normal(LabelledIndicators),
}

impl DiagnosisView {
    fn project(candidate: &DiagnosisCandidate, projection: Projection) -> Self {
        match projection {
            Projection::Full => DiagnosisView::Full(candidate.clone()),
            Projection::Basic => DiagnosisView::Basic(candidate.basic()),
            Projection::Normal => DiagnosisView::Normal(LabelledIndicators {
                label: candidate.label.clone(),
                indicators: candidate.indicators.iter().cloned().collect(),
            }),
        }
    }
}

/// Stable sort, highest (probability, indicator count) first.
fn sort_by_priority(candidates: &mut [DiagnosisCandidate]) {
    candidates.sort_by(|a, b| b.priority().cmp(&a.priority()));
}

/// Incremental accumulation of candidates keyed by id, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingPool {
    candidates: Vec<DiagnosisCandidate>,
}

impl WorkingPool {
    /// Merges `items` into the pool and returns how many records were applied.
    ///
    /// A known id gains the union of its indicators with the incoming ones;
    /// id and label never change. An unknown id is inserted if it carries a
    /// label. Records without an id are skipped.
    pub fn update(&mut self, items: &[DiagnosisRecord]) -> usize {
        let mut applied = 0;
        for item in items {
            let Some(id) = item.id() else {
                tracing::debug!(?item, "Skipping diagnosis record without an id");
                continue;
            };
            if let Some(existing) = self.candidates.iter_mut().find(|c| c.id == id) {
                existing.indicators.extend(item.indicator_set());
                applied += 1;
            } else if let Some(candidate) = DiagnosisCandidate::from_record(item) {
                self.candidates.push(candidate);
                applied += 1;
            } else {
                tracing::debug!(%id, "Skipping new diagnosis record without a label");
            }
        }
        applied
    }

    pub fn get(&self, id: &str) -> Option<&DiagnosisCandidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn candidates(&self) -> &[DiagnosisCandidate] {
        &self.candidates
    }

    pub fn sorted(&self) -> Vec<DiagnosisCandidate> {
        let mut sorted = self.candidates.clone();
        sort_by_priority(&mut sorted);
        sorted
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// The evaluator's latest merge, kept sorted by priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidatedPool {
    candidates: Vec<DiagnosisCandidate>,
}

impl ConsolidatedPool {
    /// Replaces the whole pool. Records missing an id or label are dropped;
    /// the rest keep merge-input order among equal priorities.
    pub fn replace(&mut self, merged: &[DiagnosisRecord]) {
        let mut candidates: Vec<DiagnosisCandidate> = merged
            .iter()
            .filter_map(DiagnosisCandidate::from_record)
            .collect();
        sort_by_priority(&mut candidates);
        self.candidates = candidates;
    }

    pub fn candidates(&self) -> &[DiagnosisCandidate] {
        &self.candidates
    }

    pub fn basic(&self) -> Vec<BasicDiagnosis> {
        self.candidates.iter().map(DiagnosisCandidate::basic).collect()
    }

    /// Assigns 1-based ranks by position and a severity tier to each candidate.
    pub fn with_severity(&self) -> Vec<RankedDiagnosis> {
        self.candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let rank = i + 1;
                RankedDiagnosis {
                    id: c.id.clone(),
                    label: c.label.clone(),
                    indicators: c.indicators.iter().cloned().collect(),
                    indicator_count: c.indicator_count(),
                    probability: c.probability(),
                    rank,
                    severity: SeverityTier::classify(rank, c.indicator_count()),
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Both diagnosis stores of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosisPool {
    working: WorkingPool,
    consolidated: ConsolidatedPool,
}

impl DiagnosisPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges collaborator output into the working pool.
    pub fn update(&mut self, items: &[DiagnosisRecord]) -> usize {
        self.working.update(items)
    }

    /// Replaces the consolidated pool with an externally computed merge.
    pub fn replace_consolidated(&mut self, merged: &[DiagnosisRecord]) {
        self.consolidated.replace(merged);
    }

    /// Projects the working pool, optionally sorted by priority.
    pub fn list(&self, sorted: bool, projection: Projection) -> Vec<DiagnosisView> {
        let candidates = if sorted {
            self.working.sorted()
        } else {
            self.working.candidates.clone()
        };
        candidates
            .iter()
            .map(|c| DiagnosisView::project(c, projection))
            .collect()
    }

    /// The sorted working pool in the shape collaborators consume.
    pub fn working_basic(&self) -> Vec<BasicDiagnosis> {
        self.working.sorted().iter().map(DiagnosisCandidate::basic).collect()
    }

    pub fn list_consolidated_with_severity(&self) -> Vec<RankedDiagnosis> {
        self.consolidated.with_severity()
    }

    pub fn working(&self) -> &WorkingPool {
        &self.working
    }

    pub fn consolidated(&self) -> &ConsolidatedPool {
        &self.consolidated
    }
}
