// Prompt constants for match coaching. Templates are filled by `build_coach_prompt`.

use crate::matching::engine::MatchResult;
use crate::models::profile::{CandidateProfile, JobPosting};

/// System prompt for coaching advice on a single scored match.
pub const COACH_SYSTEM: &str = "You are a pragmatic career coach. \
    You receive a candidate profile, a job posting, and a computed match breakdown. \
    Give concise, concrete advice in plain text. \
    Do NOT invent experience the candidate does not list. \
    Do NOT restate the scores back verbatim.";

/// Coaching prompt template. Every `{placeholder}` is replaced before sending.
pub const COACH_PROMPT_TEMPLATE: &str = r#"Job: {job_title}

Candidate headline: {headline}
Candidate skills: {skills}
Years of experience: {experience}

Match score: {score}/100
Matched skills: {matched}
Missing skills (largest gap first): {missing}
Observations:
{reasons}

Write at most five short bullet points:
- what the candidate should highlight when applying
- which missing skills are worth closing first, and how
- whether this role is a realistic next step"#;

fn or_none(items: Vec<String>) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

pub fn build_coach_prompt(profile: &CandidateProfile, job: &JobPosting, result: &MatchResult) -> String {
    let skills = profile
        .skills
        .iter()
        .map(|s| format!("{} ({})", s.name, s.level))
        .collect();
    let missing = result
        .missing_skills
        .iter()
        .map(|g| format!("{} (gap {})", g.name, g.gap))
        .collect();
    let matched = result
        .matched_skills
        .iter()
        .map(|m| format!("{} ({} of {} required)", m.name, m.candidate_level, m.required_level))
        .collect();
    let reasons: Vec<String> = result.reasons.iter().map(|r| format!("- {r}")).collect();

    COACH_PROMPT_TEMPLATE
        .replace("{job_title}", &job.title)
        .replace("{headline}", &profile.headline)
        .replace("{skills}", &or_none(skills))
        .replace("{experience}", &profile.experience_years.to_string())
        .replace("{score}", &((result.score * 100.0).round() as u32).to_string())
        .replace("{matched}", &or_none(matched))
        .replace("{missing}", &or_none(missing))
        .replace("{reasons}", &reasons.join("\n"))
}
