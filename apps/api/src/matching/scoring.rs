//! Sub-score functions. Each returns a value in [0, 1], or `None` when the inputs
//! needed to judge that dimension are missing.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matching::weights::MatchWeights;
use crate::models::embedding::cosine_similarity;
use crate::models::profile::{normalize_skill, CandidateProfile, JobPosting, Location, SalaryRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Skill,
    Semantic,
    Experience,
    Location,
    Salary,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Skill,
        Dimension::Semantic,
        Dimension::Experience,
        Dimension::Location,
        Dimension::Salary,
    ];
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dimension::Skill => "skill",
            Dimension::Semantic => "semantic",
            Dimension::Experience => "experience",
            Dimension::Location => "location",
            Dimension::Salary => "salary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub skill: Option<f64>,
    pub semantic: Option<f64>,
    pub experience: Option<f64>,
    pub location: Option<f64>,
    pub salary: Option<f64>,
}

impl SubScores {
    pub fn get(&self, dim: Dimension) -> Option<f64> {
        match dim {
            Dimension::Skill => self.skill,
            Dimension::Semantic => self.semantic,
            Dimension::Experience => self.experience,
            Dimension::Location => self.location,
            Dimension::Salary => self.salary,
        }
    }

    /// Present sub-scores only.
    pub fn present(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        Dimension::ALL
            .into_iter()
            .filter_map(|dim| self.get(dim).map(|score| (dim, score)))
    }
}

/// A required skill the candidate holds, and the share of it credited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCredit {
    pub name: String,
    pub candidate_level: f64,
    pub required_level: f64,
    pub credit: f64,
}

/// A required skill the candidate does not list at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillGap {
    pub name: String,
    /// Required proficiency the candidate is short by.
    pub gap: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillMatch {
    pub score: Option<f64>,
    pub matched: Vec<SkillCredit>,
    /// Sorted by gap descending, then name.
    pub missing: Vec<SkillGap>,
}

/// Importance-weighted credit over the job's required skills. A skill held below the
/// required level earns `level / required`; an absent skill earns nothing.
///
/// A profile with no skills scores 0 against every job. A job with no required skills
/// leaves the dimension out for any profile that lists skills.
pub fn skill_score(profile: &CandidateProfile, job: &JobPosting) -> SkillMatch {
    if job.required_skills.is_empty() && !profile.skills.is_empty() {
        return SkillMatch::default();
    }

    let held: HashMap<String, f64> = profile
        .skills
        .iter()
        .map(|s| (normalize_skill(&s.name), s.level))
        .collect();

    let mut matched = Vec::new();
    let mut missing = Vec::new();
    let mut earned = 0.0;
    let mut possible = 0.0;

    for required in &job.required_skills {
        let importance = if required.importance.is_finite() {
            required.importance.max(0.0)
        } else {
            0.0
        };
        possible += importance;

        match held.get(&normalize_skill(&required.name)) {
            Some(level) => {
                let credit = if required.level <= 0.0 {
                    1.0
                } else {
                    (level / required.level).clamp(0.0, 1.0)
                };
                earned += importance * credit;
                matched.push(SkillCredit {
                    name: required.name.clone(),
                    candidate_level: *level,
                    required_level: required.level,
                    credit,
                });
            }
            None => missing.push(SkillGap {
                name: required.name.clone(),
                gap: required.level.max(0.0),
            }),
        }
    }

    missing.sort_by(|a, b| b.gap.total_cmp(&a.gap).then_with(|| a.name.cmp(&b.name)));

    let score = if possible > 0.0 { earned / possible } else { 0.0 };
    SkillMatch {
        score: Some(score.clamp(0.0, 1.0)),
        matched,
        missing,
    }
}

/// Cosine similarity mapped from [-1, 1] onto [0, 1]. A zero-norm vector scores 0
/// rather than the midpoint.
pub fn semantic_score(profile: &[f32], job: &[f32]) -> f64 {
    let has_norm = |v: &[f32]| v.iter().any(|x| *x != 0.0);
    if profile.len() != job.len() || !has_norm(profile) || !has_norm(job) {
        return 0.0;
    }
    ((cosine_similarity(profile, job) + 1.0) / 2.0).clamp(0.0, 1.0)
}

pub fn experience_score(profile: &CandidateProfile, job: &JobPosting) -> f64 {
    match job.min_experience_years {
        Some(required) if required > 0.0 => (profile.experience_years / required).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

pub fn location_score(profile: &CandidateProfile, job: &JobPosting) -> Option<f64> {
    if job.remote && profile.open_to_remote {
        return Some(1.0);
    }
    let (candidate, posting) = (profile.location.as_ref()?, job.location.as_ref()?);

    if same_place(&candidate.city, &posting.city) && same_country(candidate, posting) {
        Some(1.0)
    } else if same_place(&candidate.region, &posting.region) && same_country(candidate, posting) {
        Some(0.5)
    } else if (candidate.city.is_none() && candidate.region.is_none())
        || (posting.city.is_none() && posting.region.is_none())
    {
        None
    } else {
        Some(0.0)
    }
}

fn same_place(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => normalize_skill(a) == normalize_skill(b),
        _ => false,
    }
}

/// Unknown country on either side does not count as a mismatch.
fn same_country(a: &Location, b: &Location) -> bool {
    match (&a.country, &b.country) {
        (Some(x), Some(y)) => normalize_skill(x) == normalize_skill(y),
        _ => true,
    }
}

/// Share of the candidate's expectation range the job's range reaches.
pub fn salary_score(profile: &CandidateProfile, job: &JobPosting) -> Option<f64> {
    let expected = profile.salary_expectation.as_ref()?;
    let offered = job.salary_range.as_ref()?;
    if !valid_range(expected)
        || !valid_range(offered)
        || !expected.currency.eq_ignore_ascii_case(&offered.currency)
    {
        return None;
    }

    if offered.min >= expected.max {
        return Some(1.0);
    }
    if expected.max == expected.min {
        return Some(if offered.max >= expected.min { 1.0 } else { 0.0 });
    }
    let covered = offered.max.min(expected.max) - expected.min;
    Some((covered / (expected.max - expected.min)).clamp(0.0, 1.0))
}

fn valid_range(range: &SalaryRange) -> bool {
    range.min.is_finite() && range.max.is_finite() && range.min >= 0.0 && range.min <= range.max
}

/// Weighted mean over present sub-scores. Returns the composite and the weights that
/// were actually applied (renormalized to sum to 1, zero for excluded sub-scores).
///
/// When every present sub-score carries zero weight, the present sub-scores are
/// weighted equally instead.
pub fn composite(scores: &SubScores, weights: &MatchWeights) -> (f64, MatchWeights) {
    let present = scores.present().count();
    let mut applied = MatchWeights::ZERO;
    if present == 0 {
        return (0.0, applied);
    }

    let total: f64 = scores.present().map(|(dim, _)| weights.get(dim)).sum();
    let share_of = |dim: Dimension| {
        if total > 0.0 {
            weights.get(dim) / total
        } else {
            1.0 / present as f64
        }
    };

    let mut composite = 0.0;
    for (dim, score) in scores.present() {
        let share = share_of(dim);
        applied.set(dim, share);
        composite += share * score;
    }
    (composite.clamp(0.0, 1.0), applied)
}
