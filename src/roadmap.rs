//! Roadmap domain model: requests, intent, framework, validation, and the
//! generated content artifacts.
//!
//! A *framework* is the structural skeleton of a roadmap: phases holding
//! ordered learning units with prerequisite edges between units. Frameworks
//! come out of agents and are never trusted: [`RoadmapFramework::structural_issues`]
//! runs the local checks (id uniqueness, prerequisite integrity, acyclicity,
//! non-empty containers) that gate any qualitative scoring.

use crate::types::{ArtifactKind, UnitId};
use chrono::{DateTime, Utc};
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

// ===== Scoring constants =====

pub const WEIGHT_GOAL_ALIGNMENT: f64 = 0.30;
pub const WEIGHT_PROGRESSION: f64 = 0.30;
pub const WEIGHT_COVERAGE: f64 = 0.25;
pub const WEIGHT_FEASIBILITY: f64 = 0.15;

/// Score deducted per severe issue. A single severe issue also vetoes
/// validity outright, independent of the remaining score.
pub const SEVERE_PENALTY: f64 = 15.0;
/// Score deducted per minor issue.
pub const MINOR_PENALTY: f64 = 4.0;

// ===== Request & intent =====

/// What the caller asked for. Immutable for the lifetime of a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapRequest {
    /// Free-form learning goal, e.g. "learn Rust web backends".
    pub goal: String,
    /// Weekly time commitment used to size the roadmap.
    pub hours_per_week: u32,
    /// Optional prior-experience blurb.
    pub background: Option<String>,
}

/// Structured reading of the request produced by the intent agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    /// One-line restatement of the goal.
    pub headline: String,
    pub summary: String,
    /// Who this roadmap is for, e.g. "working developer new to Rust".
    pub audience: String,
    /// Topics the roadmap should emphasize.
    pub emphasis: Vec<String>,
    /// Hours per week the plan should assume.
    pub weekly_commitment: u32,
}

// ===== Framework =====

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapFramework {
    pub title: String,
    pub summary: String,
    pub phases: Vec<Phase>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub objective: String,
    pub units: Vec<Unit>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub title: String,
    pub objectives: Vec<String>,
    /// Unit ids that must be completed first. Must reference known units
    /// and stay acyclic.
    pub prerequisites: Vec<UnitId>,
    pub estimated_minutes: u32,
}

impl RoadmapFramework {
    /// All units across phases, in roadmap order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.phases.iter().flat_map(|phase| phase.units.iter())
    }

    pub fn unit_count(&self) -> usize {
        self.phases.iter().map(|phase| phase.units.len()).sum()
    }

    pub fn contains_unit(&self, unit_id: &str) -> bool {
        self.units().any(|unit| unit.id == unit_id)
    }

    /// Local structural checks, run before any qualitative scoring.
    /// Returns an empty vec for a structurally sound framework.
    pub fn structural_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.phases.is_empty() {
            issues.push(ValidationIssue::severe("framework has no phases", None));
            return issues;
        }

        let mut phase_ids = FxHashSet::default();
        for phase in &self.phases {
            if !phase_ids.insert(phase.id.as_str()) {
                issues.push(ValidationIssue::severe(
                    format!("duplicate phase id '{}'", phase.id),
                    None,
                ));
            }
            if phase.units.is_empty() {
                issues.push(ValidationIssue::severe(
                    format!("phase '{}' has no units", phase.id),
                    None,
                ));
            }
        }

        let mut unit_ids = FxHashSet::default();
        for unit in self.units() {
            if unit.id.trim().is_empty() {
                issues.push(ValidationIssue::severe("unit with blank id", None));
            } else if !unit_ids.insert(unit.id.as_str()) {
                issues.push(ValidationIssue::severe(
                    format!("duplicate unit id '{}'", unit.id),
                    Some(unit.id.clone()),
                ));
            }
        }

        // Prerequisite edges: known targets, no self-references, acyclic.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for unit in self.units() {
            graph.add_node(unit.id.as_str());
        }
        for unit in self.units() {
            for prereq in &unit.prerequisites {
                if prereq == &unit.id {
                    issues.push(ValidationIssue::severe(
                        format!("unit '{}' lists itself as a prerequisite", unit.id),
                        Some(unit.id.clone()),
                    ));
                } else if !unit_ids.contains(prereq.as_str()) {
                    issues.push(ValidationIssue::severe(
                        format!("unit '{}' requires unknown unit '{}'", unit.id, prereq),
                        Some(unit.id.clone()),
                    ));
                } else {
                    graph.add_edge(prereq.as_str(), unit.id.as_str(), ());
                }
            }
        }
        if is_cyclic_directed(&graph) {
            issues.push(ValidationIssue::severe(
                "prerequisite graph contains a cycle",
                None,
            ));
        }

        issues
    }
}

// ===== Validation =====

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Severe,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    /// Unit the issue points at, when attributable.
    pub unit_id: Option<UnitId>,
}

impl ValidationIssue {
    pub fn severe(message: impl Into<String>, unit_id: Option<UnitId>) -> Self {
        Self {
            severity: Severity::Severe,
            message: message.into(),
            unit_id,
        }
    }

    pub fn minor(message: impl Into<String>, unit_id: Option<UnitId>) -> Self {
        Self {
            severity: Severity::Minor,
            message: message.into(),
            unit_id,
        }
    }
}

/// Raw dimension scores (0–100 each) and issues from the scoring agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub goal_alignment: f64,
    pub progression: f64,
    pub coverage: f64,
    pub feasibility: f64,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    pub weight: f64,
    pub score: f64,
}

impl DimensionScore {
    fn new(dimension: &str, weight: f64, score: f64) -> Self {
        Self {
            dimension: dimension.to_string(),
            weight,
            // Agents occasionally wander out of the documented range.
            score: score.clamp(0.0, 100.0),
        }
    }
}

/// Outcome of one validation pass over a framework revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Weighted dimension average minus issue penalties, floored at 0.
    pub score: f64,
    /// Valid requires zero severe issues *and* score at or above the
    /// configured threshold.
    pub valid: bool,
    /// True when structural checks failed and no scoring agent ran.
    pub structural_only: bool,
    pub dimensions: Vec<DimensionScore>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Report for a framework that failed local structural checks.
    pub fn structural(issues: Vec<ValidationIssue>) -> Self {
        Self {
            score: 0.0,
            valid: false,
            structural_only: true,
            dimensions: Vec::new(),
            issues,
        }
    }

    /// Compute the weighted report from agent scores.
    pub fn from_scores(scores: &QualityScores, threshold: f64) -> Self {
        let dimensions = vec![
            DimensionScore::new("goal_alignment", WEIGHT_GOAL_ALIGNMENT, scores.goal_alignment),
            DimensionScore::new("progression", WEIGHT_PROGRESSION, scores.progression),
            DimensionScore::new("coverage", WEIGHT_COVERAGE, scores.coverage),
            DimensionScore::new("feasibility", WEIGHT_FEASIBILITY, scores.feasibility),
        ];
        let weighted: f64 = dimensions.iter().map(|d| d.weight * d.score).sum();
        let penalty: f64 = scores
            .issues
            .iter()
            .map(|issue| match issue.severity {
                Severity::Severe => SEVERE_PENALTY,
                Severity::Minor => MINOR_PENALTY,
            })
            .sum();
        let score = (weighted - penalty).max(0.0);
        let has_severe = scores
            .issues
            .iter()
            .any(|issue| issue.severity == Severity::Severe);
        Self {
            score,
            valid: !has_severe && score >= threshold,
            structural_only: false,
            dimensions,
            issues: scores.issues.clone(),
        }
    }

    pub fn severe_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Severe)
            .count()
    }
}

// ===== Content artifacts =====

/// Pointer to a persisted artifact. The document body lives in the
/// artifact store; the workflow state only carries these references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    /// `{roadmap_id}/{unit_id}/{kind}`, stable across regenerations.
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, roadmap_id: &str, unit_id: &str) -> Self {
        Self {
            kind,
            storage_key: format!("{roadmap_id}/{unit_id}/{kind}"),
            created_at: Utc::now(),
        }
    }
}

/// Long-form markdown tutorial for one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorialDoc {
    pub unit_id: UnitId,
    pub title: String,
    /// Markdown body.
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub title: String,
    pub url: String,
    pub note: Option<String>,
}

/// Curated external resources for one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    pub unit_id: UnitId,
    pub entries: Vec<ResourceEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub prompt: String,
    pub choices: Vec<String>,
    pub answer_index: u32,
    pub explanation: Option<String>,
}

/// Self-check quiz for one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub unit_id: UnitId,
    pub questions: Vec<QuizQuestion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, prereqs: &[&str]) -> Unit {
        Unit {
            id: id.to_string(),
            title: format!("Unit {id}"),
            objectives: vec![format!("objective for {id}")],
            prerequisites: prereqs.iter().map(|p| p.to_string()).collect(),
            estimated_minutes: 90,
        }
    }

    fn framework(units: Vec<Unit>) -> RoadmapFramework {
        RoadmapFramework {
            title: "Test Roadmap".into(),
            summary: "A roadmap for tests".into(),
            phases: vec![Phase {
                id: "p1".into(),
                title: "Phase 1".into(),
                objective: "learn things".into(),
                units,
            }],
        }
    }

    fn scores(g: f64, p: f64, c: f64, f: f64) -> QualityScores {
        QualityScores {
            goal_alignment: g,
            progression: p,
            coverage: c,
            feasibility: f,
            issues: vec![],
        }
    }

    #[test]
    fn sound_framework_has_no_structural_issues() {
        let fw = framework(vec![unit("a", &[]), unit("b", &["a"]), unit("c", &["a", "b"])]);
        assert!(fw.structural_issues().is_empty());
        assert_eq!(fw.unit_count(), 3);
        assert!(fw.contains_unit("b"));
        assert!(!fw.contains_unit("zzz"));
    }

    #[test]
    fn empty_framework_is_severe() {
        let fw = RoadmapFramework {
            title: "t".into(),
            summary: "s".into(),
            phases: vec![],
        };
        let issues = fw.structural_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Severe);
    }

    #[test]
    fn duplicate_unit_ids_detected() {
        let fw = framework(vec![unit("a", &[]), unit("a", &[])]);
        assert!(
            fw.structural_issues()
                .iter()
                .any(|i| i.message.contains("duplicate unit id 'a'"))
        );
    }

    #[test]
    fn unknown_prerequisite_detected() {
        let fw = framework(vec![unit("a", &["ghost"])]);
        let issues = fw.structural_issues();
        assert!(issues.iter().any(|i| i.message.contains("unknown unit 'ghost'")));
        assert_eq!(issues[0].unit_id.as_deref(), Some("a"));
    }

    #[test]
    fn self_prerequisite_detected() {
        let fw = framework(vec![unit("a", &["a"])]);
        assert!(
            fw.structural_issues()
                .iter()
                .any(|i| i.message.contains("itself"))
        );
    }

    #[test]
    fn prerequisite_cycle_detected() {
        let fw = framework(vec![unit("a", &["c"]), unit("b", &["a"]), unit("c", &["b"])]);
        assert!(
            fw.structural_issues()
                .iter()
                .any(|i| i.message.contains("cycle"))
        );
    }

    #[test]
    fn phase_without_units_detected() {
        let mut fw = framework(vec![unit("a", &[])]);
        fw.phases.push(Phase {
            id: "p2".into(),
            title: "Phase 2".into(),
            objective: "empty".into(),
            units: vec![],
        });
        assert!(
            fw.structural_issues()
                .iter()
                .any(|i| i.message.contains("'p2' has no units"))
        );
    }

    #[test]
    fn weighted_average_matches_hand_computation() {
        // 90*.30 + 80*.30 + 70*.25 + 60*.15 = 27 + 24 + 17.5 + 9 = 77.5
        let report = ValidationReport::from_scores(&scores(90.0, 80.0, 70.0, 60.0), 70.0);
        assert!((report.score - 77.5).abs() < 1e-9);
        assert!(report.valid);
        assert!(!report.structural_only);
        assert_eq!(report.dimensions.len(), 4);
    }

    #[test]
    fn issue_penalties_subtract_from_score() {
        let mut s = scores(90.0, 80.0, 70.0, 60.0);
        s.issues.push(ValidationIssue::minor("weak phase summary", None));
        s.issues.push(ValidationIssue::minor("thin coverage of testing", None));
        // 77.5 - 2*4 = 69.5, below threshold despite no severe issue.
        let report = ValidationReport::from_scores(&s, 70.0);
        assert!((report.score - 69.5).abs() < 1e-9);
        assert!(!report.valid);
    }

    #[test]
    fn severe_issue_vetoes_validity_even_above_threshold() {
        let mut s = scores(100.0, 100.0, 100.0, 100.0);
        s.issues.push(ValidationIssue::severe("misordered prerequisites", None));
        // 100 - 15 = 85 ≥ 70, but a severe issue blocks validity.
        let report = ValidationReport::from_scores(&s, 70.0);
        assert!((report.score - 85.0).abs() < 1e-9);
        assert!(!report.valid);
        assert_eq!(report.severe_count(), 1);
    }

    #[test]
    fn score_floors_at_zero() {
        let mut s = scores(10.0, 10.0, 10.0, 10.0);
        for _ in 0..5 {
            s.issues.push(ValidationIssue::severe("broken", None));
        }
        let report = ValidationReport::from_scores(&s, 70.0);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn out_of_range_dimension_scores_are_clamped() {
        let report = ValidationReport::from_scores(&scores(150.0, -20.0, 100.0, 100.0), 70.0);
        let clamped: Vec<f64> = report.dimensions.iter().map(|d| d.score).collect();
        assert_eq!(clamped, vec![100.0, 0.0, 100.0, 100.0]);
    }

    #[test]
    fn structural_report_is_invalid_with_zero_score() {
        let report =
            ValidationReport::structural(vec![ValidationIssue::severe("no phases", None)]);
        assert_eq!(report.score, 0.0);
        assert!(!report.valid);
        assert!(report.structural_only);
        assert!(report.dimensions.is_empty());
    }

    #[test]
    fn artifact_ref_key_layout() {
        let r = ArtifactRef::new(ArtifactKind::Quiz, "rust-basics-a1b2c3", "u-1");
        assert_eq!(r.storage_key, "rust-basics-a1b2c3/u-1/quiz");
    }
}
