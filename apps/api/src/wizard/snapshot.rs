use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::wizard::steps::StepId;

const MAX_TITLE_CHARS: usize = 200;
const MAX_SUMMARY_CHARS: usize = 5000;
const MAX_SECTION_ITEMS: usize = 50;

/// Remote identity of a persisted draft. Assigned by the Draft Store on the
/// first successful save and never changed afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct DraftId(pub Uuid);

impl DraftId {
    pub fn new_v4() -> Self {
        DraftId(Uuid::new_v4())
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DraftId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(DraftId)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersonalInfo {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperienceItem {
    pub company: String,
    pub role: String,
    pub location: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectItem {
    pub name: String,
    pub description: String,
    pub tech_stack: Vec<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EducationItem {
    pub institution: String,
    pub degree: String,
    pub field: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub gpa: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Sections {
    pub experience: Vec<ExperienceItem>,
    pub projects: Vec<ProjectItem>,
    pub education: Vec<EducationItem>,
    pub skills: Vec<String>,
}

/// The full in-memory state of the résumé under edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DraftSnapshot {
    pub id: Option<DraftId>,
    pub title: String,
    pub target_job: String,
    pub personal_info: PersonalInfo,
    pub professional_summary: String,
    pub sections: Sections,
    /// Last step the user was sent to on a successful save. Only consulted
    /// when the URL carries no recognizable step.
    pub current_step_id: Option<StepId>,
}

/// A typed partial update over `DraftSnapshot`, as submitted by the client.
/// Absent fields are left untouched; present fields replace the snapshot's
/// value wholesale.
///
/// The four section lists are patched individually so a step owning
/// `skills` never clobbers `experience`. Neither the draft id nor the saved
/// step hint is client-writable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DraftPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_info: Option<PersonalInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub professional_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<Vec<ExperienceItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<ProjectItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub education: Option<Vec<EducationItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid value for '{field}': {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl DraftPatch {
    pub fn is_empty(&self) -> bool {
        *self == DraftPatch::default()
    }

    /// Shallow per-field override of `snapshot`. The draft id and the saved
    /// step hint are never touched.
    pub fn apply_to(self, snapshot: &mut DraftSnapshot) {
        if let Some(title) = self.title {
            snapshot.title = title;
        }
        if let Some(target_job) = self.target_job {
            snapshot.target_job = target_job;
        }
        if let Some(personal_info) = self.personal_info {
            snapshot.personal_info = personal_info;
        }
        if let Some(summary) = self.professional_summary {
            snapshot.professional_summary = summary;
        }
        if let Some(experience) = self.experience {
            snapshot.sections.experience = experience;
        }
        if let Some(projects) = self.projects {
            snapshot.sections.projects = projects;
        }
        if let Some(education) = self.education {
            snapshot.sections.education = education;
        }
        if let Some(skills) = self.skills {
            snapshot.sections.skills = skills;
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            if title.chars().count() > MAX_TITLE_CHARS {
                return Err(ValidationError::new(
                    "title",
                    format!("must be at most {MAX_TITLE_CHARS} characters"),
                ));
            }
        }
        if let Some(summary) = &self.professional_summary {
            if summary.chars().count() > MAX_SUMMARY_CHARS {
                return Err(ValidationError::new(
                    "professional_summary",
                    format!("must be at most {MAX_SUMMARY_CHARS} characters"),
                ));
            }
        }
        if let Some(info) = &self.personal_info {
            let email = info.email.trim();
            if !email.is_empty() && !email.contains('@') {
                return Err(ValidationError::new(
                    "personal_info.email",
                    format!("'{email}' is not an email address"),
                ));
            }
        }

        check_len("experience", self.experience.as_deref())?;
        check_len("projects", self.projects.as_deref())?;
        check_len("education", self.education.as_deref())?;
        check_len("skills", self.skills.as_deref())?;

        if let Some(skills) = &self.skills {
            if skills.iter().any(|s| s.trim().is_empty()) {
                return Err(ValidationError::new("skills", "skills must not be blank"));
            }
        }
        Ok(())
    }
}

fn check_len<T>(field: &'static str, items: Option<&[T]>) -> Result<(), ValidationError> {
    match items {
        Some(items) if items.len() > MAX_SECTION_ITEMS => Err(ValidationError::new(
            field,
            format!("at most {MAX_SECTION_ITEMS} entries allowed, got {}", items.len()),
        )),
        _ => Ok(()),
    }
}

impl From<&DraftSnapshot> for DraftPatch {
    /// Every content field set: applying this patch reproduces the snapshot's
    /// content, though not its id or step hint.
    fn from(snapshot: &DraftSnapshot) -> Self {
        DraftPatch {
            title: Some(snapshot.title.clone()),
            target_job: Some(snapshot.target_job.clone()),
            personal_info: Some(snapshot.personal_info.clone()),
            professional_summary: Some(snapshot.professional_summary.clone()),
            experience: Some(snapshot.sections.experience.clone()),
            projects: Some(snapshot.sections.projects.clone()),
            education: Some(snapshot.sections.education.clone()),
            skills: Some(snapshot.sections.skills.clone()),
        }
    }
}
