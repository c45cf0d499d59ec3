//! Axum route handlers for the Matching API.

use std::collections::HashMap;
use std::slice;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::RecordStore;
use crate::errors::{AppError, EngineError};
use crate::inference::model::{LoadedModel, TaskKind};
use crate::matching::engine::MatchResult;
use crate::matching::prompts::{build_coach_prompt, COACH_SYSTEM};
use crate::matching::weights::MatchWeights;
use crate::models::profile::{CandidateProfile, JobPosting};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub profile: Option<CandidateProfile>,
    pub profile_id: Option<Uuid>,
    #[serde(default)]
    pub jobs: Vec<JobPosting>,
    #[serde(default)]
    pub job_ids: Vec<Uuid>,
    pub weights: Option<MatchWeights>,
    /// Embedding model; the configured default when omitted.
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub results: Vec<MatchResult>,
    pub model_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CoachRequest {
    pub profile: CandidateProfile,
    pub job: JobPosting,
    /// Generation model that writes the advice.
    pub model_id: String,
    pub embedding_model_id: Option<String>,
    pub weights: Option<MatchWeights>,
}

#[derive(Debug, Serialize)]
pub struct CoachResponse {
    #[serde(rename = "match")]
    pub match_result: MatchResult,
    pub advice: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /match
///
/// Ranks inline and/or stored job postings against a candidate profile.
/// Unknown profile or job ids are a 404; nothing is silently dropped.
pub async fn handle_match(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let weights = resolve_weights(request.weights, &state.weights)?;
    let model_id = request
        .model_id
        .unwrap_or_else(|| state.config.default_embedding_model.clone());

    let records = state.records.as_deref();
    let profile = resolve_profile(records, request.profile, request.profile_id).await?;
    let mut jobs = request.jobs;
    jobs.extend(resolve_jobs(records, &request.job_ids).await?);

    let results = state
        .matcher
        .rank(&profile, &jobs, &weights, &model_id)
        .await?;

    Ok(Json(MatchResponse { results, model_id }))
}

/// POST /coach
///
/// Scores one job against a profile, then asks a generation model for advice
/// grounded in that breakdown.
pub async fn handle_coach(
    State(state): State<AppState>,
    Json(request): Json<CoachRequest>,
) -> Result<Json<CoachResponse>, AppError> {
    let weights = resolve_weights(request.weights, &state.weights)?;
    let embedding_model = request
        .embedding_model_id
        .unwrap_or_else(|| state.config.default_embedding_model.clone());

    let match_result = state
        .matcher
        .rank(&request.profile, slice::from_ref(&request.job), &weights, &embedding_model)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("ranking returned no result")))?;

    let handle = state.registry.ensure_ready(&request.model_id).await?;
    let LoadedModel::Generation(generator) = handle.model() else {
        return Err(EngineError::WrongTaskKind {
            model_id: request.model_id,
            expected: TaskKind::Generation,
            actual: handle.model().kind(),
        }
        .into());
    };

    let prompt = build_coach_prompt(&request.profile, &request.job, &match_result);
    let advice = generator.generate(&prompt, COACH_SYSTEM).await?;

    Ok(Json(CoachResponse {
        match_result,
        advice: advice.trim().to_string(),
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn resolve_weights(requested: Option<MatchWeights>, default: &MatchWeights) -> Result<MatchWeights, AppError> {
    let weights = requested.unwrap_or(*default);
    weights.validate().map_err(AppError::Validation)?;
    Ok(weights)
}

async fn resolve_profile(
    records: Option<&dyn RecordStore>,
    inline: Option<CandidateProfile>,
    profile_id: Option<Uuid>,
) -> Result<CandidateProfile, AppError> {
    match (inline, profile_id) {
        (Some(profile), None) => Ok(profile),
        (None, Some(id)) => require_records(records)?
            .profile_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Profile {id} not found"))),
        (Some(_), Some(_)) => Err(AppError::Validation(
            "provide either profile or profile_id, not both".to_string(),
        )),
        (None, None) => Err(AppError::Validation(
            "one of profile or profile_id is required".to_string(),
        )),
    }
}

/// Fetches stored jobs in the order requested. Fails if any id is unknown.
async fn resolve_jobs(records: Option<&dyn RecordStore>, ids: &[Uuid]) -> Result<Vec<JobPosting>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let found: HashMap<Uuid, JobPosting> = require_records(records)?
        .jobs_by_ids(ids)
        .await?
        .into_iter()
        .map(|job| (job.id, job))
        .collect();

    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !found.contains_key(id))
        .map(Uuid::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::NotFound(format!(
            "Job postings not found: {}",
            missing.join(", ")
        )));
    }

    // Duplicate ids resolve to the same posting.
    Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
}

fn require_records(records: Option<&dyn RecordStore>) -> Result<&dyn RecordStore, AppError> {
    records.ok_or_else(|| {
        AppError::Validation("id lookups need a configured record store (DATABASE_URL)".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryRecordStore;

    fn posting(n: u128) -> JobPosting {
        JobPosting {
            id: Uuid::from_u128(n),
            title: format!("Job {n}"),
            description: String::new(),
            required_skills: vec![],
            location: None,
            remote: false,
            salary_range: None,
            min_experience_years: None,
            posted_at: None,
        }
    }

    #[tokio::test]
    async fn test_jobs_resolve_in_request_order() {
        let store = MemoryRecordStore::new(vec![posting(1), posting(2), posting(3)], vec![]);
        let ids = [Uuid::from_u128(3), Uuid::from_u128(1)];

        let jobs = resolve_jobs(Some(&store as &dyn RecordStore), &ids).await.unwrap();
        let got: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(got, ids.to_vec());
    }

    #[tokio::test]
    async fn test_unknown_job_id_is_not_found() {
        let store = MemoryRecordStore::new(vec![posting(1)], vec![]);
        let err = resolve_jobs(Some(&store as &dyn RecordStore), &[Uuid::from_u128(1), Uuid::from_u128(7)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(msg) if msg.contains(&Uuid::from_u128(7).to_string())));
    }

    #[tokio::test]
    async fn test_id_lookup_without_store_is_validation_error() {
        let err = resolve_jobs(None, &[Uuid::from_u128(1)]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_profile_sources_are_exclusive() {
        let err = resolve_profile(None, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let store = MemoryRecordStore::new(vec![], vec![]);
        let err = resolve_profile(Some(&store as &dyn RecordStore), None, Some(Uuid::from_u128(4)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_invalid_request_weights_rejected() {
        let bad = MatchWeights {
            skill: -1.0,
            ..MatchWeights::default()
        };
        assert!(resolve_weights(Some(bad), &MatchWeights::default()).is_err());
        assert_eq!(
            resolve_weights(None, &MatchWeights::default()).unwrap(),
            MatchWeights::default()
        );
    }
}
