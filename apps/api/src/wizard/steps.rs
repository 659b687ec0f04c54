//! Step Registry — the fixed, ordered catalog of wizard steps and the URL
//! scheme that addresses them.
//!
//! A step's position in `WIZARD_STEPS` is its index. The catalog is built into
//! the binary and never mutated, so the registry is `Copy` and shared freely.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wizard::snapshot::DraftId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    TargetJob,
    PersonalInfo,
    Summary,
    Experience,
    Projects,
    Education,
    Skills,
    Review,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::TargetJob => "target_job",
            StepId::PersonalInfo => "personal_info",
            StepId::Summary => "summary",
            StepId::Experience => "experience",
            StepId::Projects => "projects",
            StepId::Education => "education",
            StepId::Skills => "skills",
            StepId::Review => "review",
        }
    }

    /// Parses the persisted form written by `as_str`.
    pub fn parse(value: &str) -> Option<StepId> {
        WIZARD_STEPS
            .iter()
            .map(|s| s.id)
            .find(|id| id.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Step {
    pub id: StepId,
    pub label: &'static str,
    pub url_segment: &'static str,
}

pub const WIZARD_STEPS: &[Step] = &[
    Step {
        id: StepId::TargetJob,
        label: "Target Job",
        url_segment: "target-job",
    },
    Step {
        id: StepId::PersonalInfo,
        label: "Personal Info",
        url_segment: "personal-info",
    },
    Step {
        id: StepId::Summary,
        label: "Professional Summary",
        url_segment: "summary",
    },
    Step {
        id: StepId::Experience,
        label: "Experience",
        url_segment: "experience",
    },
    Step {
        id: StepId::Projects,
        label: "Projects",
        url_segment: "projects",
    },
    Step {
        id: StepId::Education,
        label: "Education",
        url_segment: "education",
    },
    Step {
        id: StepId::Skills,
        label: "Skills",
        url_segment: "skills",
    },
    Step {
        id: StepId::Review,
        label: "Review",
        url_segment: "review",
    },
];

#[derive(Debug, Clone, Copy)]
pub struct StepRegistry {
    steps: &'static [Step],
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new(WIZARD_STEPS)
    }
}

impl StepRegistry {
    pub fn new(steps: &'static [Step]) -> Self {
        assert!(!steps.is_empty(), "step registry requires at least one step");
        Self { steps }
    }

    /// Exact match on `url_segment`.
    pub fn index_for_url_segment(&self, segment: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.url_segment == segment)
    }

    pub fn index_for_id(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Panics on an out-of-range index; callers validate indices first.
    pub fn step_at(&self, index: usize) -> Step {
        self.steps[index]
    }

    pub fn first(&self) -> Step {
        self.steps[0]
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &'static [Step] {
        self.steps
    }
}

/// Which draft a wizard URL addresses: a not-yet-persisted draft (`new`) or
/// an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftRef {
    New,
    Existing(DraftId),
}

pub const NEW_DRAFT_SEGMENT: &str = "new";

impl DraftRef {
    pub fn id(&self) -> Option<DraftId> {
        match self {
            DraftRef::New => None,
            DraftRef::Existing(id) => Some(*id),
        }
    }
}

impl fmt::Display for DraftRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftRef::New => f.write_str(NEW_DRAFT_SEGMENT),
            DraftRef::Existing(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for DraftRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NEW_DRAFT_SEGMENT {
            return Ok(DraftRef::New);
        }
        s.parse::<DraftId>()
            .map(DraftRef::Existing)
            .map_err(|_| format!("'{s}' is neither '{NEW_DRAFT_SEGMENT}' nor a draft id"))
    }
}

/// URL layout of the wizard and the screens it hands off to.
/// Step URLs are `<root>/<draft-id-or-new>/<step-segment>`.
#[derive(Debug, Clone)]
pub struct WizardPaths {
    pub root: String,
    pub dashboard: String,
    pub finalize: String,
}

impl WizardPaths {
    pub fn new(root: &str, dashboard: &str, finalize: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
            dashboard: dashboard.to_string(),
            finalize: finalize.trim_end_matches('/').to_string(),
        }
    }

    pub fn step_url(&self, draft: DraftRef, step: &Step) -> String {
        format!("{}/{}/{}", self.root, draft, step.url_segment)
    }

    pub fn finalize_url(&self, draft: DraftRef) -> String {
        format!("{}/{}", self.finalize, draft)
    }
}

impl Default for WizardPaths {
    fn default() -> Self {
        Self::new("/resume-builder", "/dashboard", "/export")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_every_segment_resolves_to_its_own_index() {
        let registry = StepRegistry::default();
        for (i, step) in WIZARD_STEPS.iter().enumerate() {
            assert_eq!(registry.index_for_url_segment(step.url_segment), Some(i));
            assert_eq!(registry.step_at(i), *step);
        }
    }

    #[test]
    fn test_segment_match_is_exact() {
        let registry = StepRegistry::default();
        assert_eq!(registry.index_for_url_segment("Education"), None);
        assert_eq!(registry.index_for_url_segment("education/"), None);
        assert_eq!(registry.index_for_url_segment(""), None);
        assert_eq!(registry.index_for_url_segment("new"), None);
    }

    #[test]
    fn test_step_ids_and_segments_are_unique() {
        for (i, a) in WIZARD_STEPS.iter().enumerate() {
            for b in &WIZARD_STEPS[i + 1..] {
                assert_ne!(a.id, b.id);
                assert_ne!(a.url_segment, b.url_segment);
            }
        }
    }

    #[test]
    fn test_step_id_parse_matches_serde_form() {
        for step in WIZARD_STEPS {
            let json = serde_json::to_string(&step.id).unwrap();
            assert_eq!(json, format!("\"{}\"", step.id.as_str()));
            assert_eq!(StepId::parse(step.id.as_str()), Some(step.id));
        }
        assert_eq!(StepId::parse("cover_letter"), None);
    }

    #[test]
    fn test_draft_ref_round_trips_through_path_segment() {
        assert_eq!("new".parse::<DraftRef>().unwrap(), DraftRef::New);

        let uuid = Uuid::new_v4();
        let parsed: DraftRef = uuid.to_string().parse().unwrap();
        assert_eq!(parsed, DraftRef::Existing(DraftId(uuid)));
        assert_eq!(parsed.to_string(), uuid.to_string());

        assert!("draft-42".parse::<DraftRef>().is_err());
    }

    #[test]
    fn test_step_url_layout() {
        let paths = WizardPaths::new("/resume-builder/", "/dashboard", "/export");
        let step = StepRegistry::default().step_at(5);
        assert_eq!(
            paths.step_url(DraftRef::New, &step),
            "/resume-builder/new/education"
        );
        let id = DraftId(Uuid::nil());
        assert_eq!(
            paths.finalize_url(DraftRef::Existing(id)),
            format!("/export/{}", Uuid::nil())
        );
    }
}
