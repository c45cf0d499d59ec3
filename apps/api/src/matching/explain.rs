//! Human-readable reasons and a one-line recommendation for a scored job.

use crate::matching::scoring::{Dimension, SkillCredit, SkillGap, SkillMatch, SubScores};
use crate::models::profile::JobPosting;

const STRONG: f64 = 0.6;
const WEAK: f64 = 0.3;

/// Strengths (sub-scores ≥ 0.6, strongest first) followed by concerns (< 0.3, weakest first).
pub fn build_reasons(scores: &SubScores, skills: &SkillMatch, job: &JobPosting) -> Vec<String> {
    let mut present: Vec<(Dimension, f64)> = scores.present().collect();

    present.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut reasons: Vec<String> = present
        .iter()
        .filter(|(_, score)| *score >= STRONG)
        .map(|(dim, score)| strength(*dim, *score, skills, job))
        .collect();

    present.reverse();
    reasons.extend(
        present
            .iter()
            .filter(|(_, score)| *score < WEAK)
            .map(|(dim, score)| concern(*dim, *score, skills, job)),
    );
    reasons
}

fn percent(score: f64) -> u32 {
    (score * 100.0).round() as u32
}

fn strength(dim: Dimension, score: f64, skills: &SkillMatch, job: &JobPosting) -> String {
    let pct = percent(score);
    match dim {
        Dimension::Skill => format!(
            "Covers {} of {} required skills ({pct}%)",
            skills.matched.len(),
            job.required_skills.len()
        ),
        Dimension::Semantic => format!("Background closely matches the role description ({pct}%)"),
        Dimension::Experience => format!("Meets the experience requirement ({pct}%)"),
        Dimension::Location if job.remote => "Remote role and open to remote work".to_string(),
        Dimension::Location => format!("Location is a good fit ({pct}%)"),
        Dimension::Salary => format!("Salary range meets expectations ({pct}%)"),
    }
}

fn concern(dim: Dimension, score: f64, skills: &SkillMatch, job: &JobPosting) -> String {
    let pct = percent(score);
    match dim {
        Dimension::Skill => match top_gaps(&skills.missing) {
            Some(gaps) => format!("Missing key skills: {gaps} ({pct}%)"),
            None if job.required_skills.is_empty() => "The profile lists no skills".to_string(),
            None => format!("Required skills held below the expected level ({pct}%)"),
        },
        Dimension::Semantic => format!("Background has little overlap with the role ({pct}%)"),
        Dimension::Experience => match job.min_experience_years {
            Some(years) => format!("Below the required {years} years of experience ({pct}%)"),
            None => format!("Experience is short of the role ({pct}%)"),
        },
        Dimension::Location => format!("Location does not match ({pct}%)"),
        Dimension::Salary => format!("Salary range falls short of expectations ({pct}%)"),
    }
}

fn top_gaps(missing: &[SkillGap]) -> Option<String> {
    if missing.is_empty() {
        return None;
    }
    let names: Vec<&str> = missing.iter().take(3).map(|g| g.name.as_str()).collect();
    Some(names.join(", "))
}

/// Summary line keyed on the composite score band.
pub fn build_recommendation(score: f64, missing: &[SkillGap]) -> String {
    let pct = percent(score);
    let gaps = top_gaps(missing);

    if score >= 0.8 {
        "Strong match. The profile covers the key requirements of this role.".to_string()
    } else if score >= 0.6 {
        match gaps {
            Some(gaps) => format!("Good match ({pct}/100). Worth strengthening: {gaps}."),
            None => format!("Good match ({pct}/100)."),
        }
    } else if score >= 0.4 {
        match gaps {
            Some(gaps) => format!("Partial match ({pct}/100). Notable gaps: {gaps}."),
            None => format!("Partial match ({pct}/100). Review the weaker areas before applying."),
        }
    } else {
        format!("Weak match ({pct}/100). This role is a stretch for the current profile.")
    }
}
