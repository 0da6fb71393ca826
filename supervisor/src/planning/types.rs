//! Planning data model: PlanDraft, Critique (SPEC_FULL §3).
//!
//! Grounded in `debate/orchestrator.rs`'s `CoderOutput`/`ReviewerOutput`
//! pair, retargeted at plan drafts and critiques.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueVerdict {
    Approved,
    NeedsRevision,
    NeedsHuman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueTarget {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueItem {
    pub id: String,
    pub severity: Severity,
    pub category: String,
    pub target: CritiqueTarget,
    pub title: String,
    pub description: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CritiqueStats {
    pub critical: u32,
    pub major: u32,
    pub minor: u32,
    pub suggestion: u32,
}

impl CritiqueStats {
    pub fn from_items(items: &[CritiqueItem]) -> Self {
        let mut stats = Self::default();
        for item in items {
            match item.severity {
                Severity::Critical => stats.critical += 1,
                Severity::Major => stats.major += 1,
                Severity::Minor => stats.minor += 1,
                Severity::Suggestion => stats.suggestion += 1,
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub version: u32,
    pub verdict: CritiqueVerdict,
    pub items: Vec<CritiqueItem>,
    pub stats: CritiqueStats,
}

impl Critique {
    /// The keys this critique's items occupy for overlap computation
    /// (SPEC_FULL §4.15: `category:target.type:target.id?global`).
    pub fn item_keys(&self) -> std::collections::HashSet<String> {
        self.items
            .iter()
            .map(|item| {
                format!(
                    "{}:{}:{}",
                    item.category,
                    item.target.kind,
                    item.target.id.as_deref().unwrap_or("global")
                )
            })
            .collect()
    }

    /// Items worth feeding back into the next Planner revision: everything
    /// except `suggestion`/`minor` severities (SPEC_FULL §4.15).
    pub fn revision_worthy_items(&self) -> Vec<&CritiqueItem> {
        self.items
            .iter()
            .filter(|item| matches!(item.severity, Severity::Critical | Severity::Major))
            .collect()
    }

    pub fn satisfies_auto_approve(&self, max_minor: u32) -> bool {
        matches!(self.verdict, CritiqueVerdict::Approved)
            || (self.stats.critical == 0 && self.stats.major == 0 && self.stats.minor <= max_minor)
    }
}

/// `PlanDraft`, persisted as `draft-v{n}.json`. The draft body itself
/// (phases/tasks prose) is agent-authored content; the pipeline only needs
/// to round-trip it opaquely plus the fields it inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDraft {
    pub version: u32,
    pub phases: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, severity: Severity, category: &str) -> CritiqueItem {
        CritiqueItem {
            id: id.into(),
            severity,
            category: category.into(),
            target: CritiqueTarget { kind: "phase".into(), id: Some("1".into()) },
            title: "t".into(),
            description: "d".into(),
            suggestion: None,
        }
    }

    #[test]
    fn stats_tally_by_severity() {
        let items = vec![
            item("a", Severity::Critical, "design"),
            item("b", Severity::Minor, "design"),
            item("c", Severity::Minor, "design"),
        ];
        let stats = CritiqueStats::from_items(&items);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.minor, 2);
    }

    #[test]
    fn revision_worthy_excludes_minor_and_suggestion() {
        let items = vec![
            item("a", Severity::Critical, "design"),
            item("b", Severity::Suggestion, "design"),
            item("c", Severity::Minor, "design"),
        ];
        let critique = Critique {
            version: 1,
            verdict: CritiqueVerdict::NeedsRevision,
            stats: CritiqueStats::from_items(&items),
            items,
        };
        assert_eq!(critique.revision_worthy_items().len(), 1);
    }

    #[test]
    fn auto_approve_allows_up_to_configured_minor_count() {
        let items = vec![item("a", Severity::Minor, "design"); 3];
        let critique = Critique {
            version: 1,
            verdict: CritiqueVerdict::NeedsRevision,
            stats: CritiqueStats::from_items(&items),
            items,
        };
        assert!(critique.satisfies_auto_approve(3));
        assert!(!critique.satisfies_auto_approve(2));
    }
}
