use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A skill the candidate claims, with self-assessed proficiency on a 0–10 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLevel {
    pub name: String,
    pub level: f64,
}

/// A skill the job requires, at a minimum proficiency level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredSkill {
    pub name: String,
    pub level: f64,
    /// Relative weight of this skill within the job's requirements.
    #[serde(default = "default_importance")]
    pub importance: f64,
}

fn default_importance() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub id: Uuid,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub skills: Vec<SkillLevel>,
    pub location: Option<Location>,
    #[serde(default)]
    pub open_to_remote: bool,
    pub salary_expectation: Option<SalaryRange>,
    #[serde(default)]
    pub experience_years: f64,
}

impl CandidateProfile {
    /// Text fed to the embedding model.
    pub fn embedding_text(&self) -> String {
        let skills: Vec<&str> = self.skills.iter().map(|s| s.name.as_str()).collect();
        format!("{}\n{}\nSkills: {}", self.headline, self.summary, skills.join(", "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<RequiredSkill>,
    pub location: Option<Location>,
    #[serde(default)]
    pub remote: bool,
    pub salary_range: Option<SalaryRange>,
    pub min_experience_years: Option<f64>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl JobPosting {
    pub fn embedding_text(&self) -> String {
        let skills: Vec<&str> = self
            .required_skills
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        format!(
            "{}\n{}\nRequired: {}",
            self.title,
            self.description,
            skills.join(", ")
        )
    }
}

/// Canonical form used when comparing skill names across profiles and postings.
pub fn normalize_skill(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_skill_folds_case_and_whitespace() {
        assert_eq!(normalize_skill("  Machine   Learning "), "machine learning");
        assert_eq!(normalize_skill("SQL"), "sql");
    }

    #[test]
    fn test_required_skill_importance_defaults_to_one() {
        let skill: RequiredSkill = serde_json::from_str(r#"{"name":"AWS","level":5}"#).unwrap();
        assert_eq!(skill.importance, 1.0);
    }
}
