use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::embedding::EmbeddingService;
use crate::errors::EngineError;
use crate::matching::explain::{build_reasons, build_recommendation};
use crate::matching::scoring::{
    composite, experience_score, location_score, salary_score, semantic_score, skill_score,
    SkillCredit, SkillGap, SubScores,
};
use crate::matching::weights::MatchWeights;
use crate::models::embedding::EmbeddingVector;
use crate::models::profile::{CandidateProfile, JobPosting};

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub job_id: Uuid,
    /// Composite score in [0, 1].
    pub score: f64,
    pub sub_scores: SubScores,
    /// Weights actually applied after renormalizing over present sub-scores.
    pub applied_weights: MatchWeights,
    pub matched_skills: Vec<SkillCredit>,
    pub missing_skills: Vec<SkillGap>,
    pub reasons: Vec<String>,
    pub recommendation: String,
    #[serde(skip)]
    posted_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone)]
pub struct MatchEngine {
    embeddings: EmbeddingService,
}

impl MatchEngine {
    pub fn new(embeddings: EmbeddingService) -> Self {
        Self { embeddings }
    }

    /// Scores every job against the profile and returns them best first.
    ///
    /// One result per job. Any embedding failure fails the whole ranking.
    pub async fn rank(
        &self,
        profile: &CandidateProfile,
        jobs: &[JobPosting],
        weights: &MatchWeights,
        model_id: &str,
    ) -> Result<Vec<MatchResult>, EngineError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut texts = Vec::with_capacity(jobs.len() + 1);
        texts.push(profile.embedding_text());
        texts.extend(jobs.iter().map(JobPosting::embedding_text));
        let vectors = self.embeddings.embed_many(&texts, model_id).await?;

        let Some((profile_vector, job_vectors)) = vectors.split_first() else {
            return Ok(Vec::new());
        };

        let mut results: Vec<MatchResult> = jobs
            .iter()
            .zip(job_vectors)
            .map(|(job, vector)| score_job(profile, profile_vector, job, vector, weights))
            .collect();
        results.sort_by(rank_order);

        debug!(
            "Ranked {} jobs for profile {} (best {:.3})",
            results.len(),
            profile.id,
            results.first().map(|r| r.score).unwrap_or_default()
        );
        Ok(results)
    }
}

/// Score descending, then most recently posted (undated last), then job id.
fn rank_order(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.posted_at, b.posted_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.job_id.cmp(&b.job_id))
}

pub fn score_job(
    profile: &CandidateProfile,
    profile_vector: &EmbeddingVector,
    job: &JobPosting,
    job_vector: &EmbeddingVector,
    weights: &MatchWeights,
) -> MatchResult {
    let skills = skill_score(profile, job);
    let sub_scores = SubScores {
        skill: skills.score,
        semantic: Some(semantic_score(&profile_vector.values, &job_vector.values)),
        experience: Some(experience_score(profile, job)),
        location: location_score(profile, job),
        salary: salary_score(profile, job),
    };
    let (score, applied_weights) = composite(&sub_scores, weights);

    MatchResult {
        job_id: job.id,
        score,
        reasons: build_reasons(&sub_scores, &skills, job),
        recommendation: build_recommendation(score, &skills.missing),
        sub_scores,
        applied_weights,
        matched_skills: skills.matched,
        missing_skills: skills.missing,
        posted_at: job.posted_at,
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::batching::{BatchPolicy, BatchScheduler};
    use crate::cache::local::LocalTier;
    use crate::cache::InferenceCache;
    use crate::inference::registry::ModelRegistry;
    use crate::models::profile::{RequiredSkill, SalaryRange, SkillLevel};
    use crate::test_support::{descriptor, StubLoader};

    fn engine(loader: StubLoader) -> MatchEngine {
        let registry = ModelRegistry::new(Arc::new(loader), 1024);
        registry.register(descriptor("minilm", 16)).unwrap();
        let cache = Arc::new(InferenceCache::new(
            LocalTier::new(NonZeroUsize::new(64).unwrap(), Duration::from_secs(3600)),
            Vec::new(),
        ));
        let scheduler = BatchScheduler::new(
            registry.clone(),
            BatchPolicy::new(Duration::from_millis(20), Duration::from_secs(5)),
        );
        MatchEngine::new(EmbeddingService::new(registry, cache, scheduler))
    }

    fn profile() -> CandidateProfile {
        CandidateProfile {
            id: Uuid::new_v4(),
            headline: "Data engineer".to_string(),
            summary: "Pipelines in Python and SQL".to_string(),
            skills: vec![
                SkillLevel {
                    name: "Python".to_string(),
                    level: 8.0,
                },
                SkillLevel {
                    name: "SQL".to_string(),
                    level: 5.0,
                },
            ],
            location: None,
            open_to_remote: true,
            salary_expectation: Some(SalaryRange {
                min: 120_000.0,
                max: 150_000.0,
                currency: "USD".to_string(),
            }),
            experience_years: 5.0,
        }
    }

    fn job(n: u128, title: &str, skills: &[(&str, f64)]) -> JobPosting {
        JobPosting {
            id: Uuid::from_u128(n),
            title: title.to_string(),
            description: String::new(),
            required_skills: skills
                .iter()
                .map(|(name, level)| RequiredSkill {
                    name: name.to_string(),
                    level: *level,
                    importance: 1.0,
                })
                .collect(),
            location: None,
            remote: true,
            salary_range: None,
            min_experience_years: Some(3.0),
            posted_at: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_python_sql_profile_against_python_aws_job() {
        let results = engine(StubLoader::new())
            .rank(
                &profile(),
                &[job(1, "Data platform engineer", &[("Python", 6.0), ("AWS", 5.0)])],
                &MatchWeights::default(),
                "minilm",
            )
            .await
            .unwrap();

        let result = &results[0];
        assert_eq!(result.sub_scores.skill, Some(0.5));
        assert_eq!(result.matched_skills[0].name, "Python");
        assert_eq!(result.matched_skills[0].credit, 1.0);
        assert_eq!(result.missing_skills[0].name, "AWS");
        assert_eq!(result.missing_skills[0].gap, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_salary_renormalizes_weights() {
        let results = engine(StubLoader::new())
            .rank(
                &profile(),
                &[job(1, "Analyst", &[("SQL", 5.0)])],
                &MatchWeights::default(),
                "minilm",
            )
            .await
            .unwrap();

        let result = &results[0];
        assert_eq!(result.sub_scores.salary, None);
        assert_eq!(result.applied_weights.salary, 0.0);
        assert!((result.applied_weights.total() - 1.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_bounded_result_per_job() {
        let mut paid = job(3, "ML engineer", &[("Python", 9.0), ("PyTorch", 7.0)]);
        paid.salary_range = Some(SalaryRange {
            min: 140_000.0,
            max: 180_000.0,
            currency: "USD".to_string(),
        });
        let jobs = vec![
            job(1, "Data engineer", &[("Python", 6.0), ("SQL", 4.0)]),
            job(2, "Frontend engineer", &[("TypeScript", 7.0)]),
            paid,
            job(4, "Generalist", &[]),
        ];

        let results = engine(StubLoader::new())
            .rank(&profile(), &jobs, &MatchWeights::default(), "minilm")
            .await
            .unwrap();

        assert_eq!(results.len(), jobs.len());
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let results = engine(StubLoader::new())
            .rank(&profile(), &[], &MatchWeights::default(), "minilm")
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_failure_fails_whole_ranking() {
        let err = engine(StubLoader::new().failing_load("no weights"))
            .rank(
                &profile(),
                &[job(1, "Data engineer", &[("Python", 6.0)])],
                &MatchWeights::default(),
                "minilm",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad { .. }));
    }

    #[test]
    fn test_ties_break_on_posting_date_then_id() {
        let vector = EmbeddingVector {
            source_hash: "x".to_string(),
            model_id: "minilm".to_string(),
            model_version: "v1".to_string(),
            values: vec![1.0, 0.0],
            created_at: Utc::now(),
        };
        let p = profile();
        let mut older = job(1, "Same", &[("Python", 6.0)]);
        older.posted_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut newer = job(9, "Same", &[("Python", 6.0)]);
        newer.posted_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let undated_low = job(2, "Same", &[("Python", 6.0)]);
        let undated_high = job(5, "Same", &[("Python", 6.0)]);

        let mut results: Vec<MatchResult> = [&undated_high, &older, &undated_low, &newer]
            .into_iter()
            .map(|j| score_job(&p, &vector, j, &vector, &MatchWeights::default()))
            .collect();
        results.sort_by(rank_order);

        let ids: Vec<u128> = results.iter().map(|r| r.job_id.as_u128()).collect();
        assert_eq!(ids, vec![9, 1, 2, 5]);
    }
}
