use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::profile::{
    CandidateProfile, JobPosting, Location, RequiredSkill, SalaryRange, SkillLevel,
};

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Read-only access to stored profiles and postings.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the postings that exist; unknown ids are simply absent.
    async fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<JobPosting>, sqlx::Error>;
    async fn profile_by_id(&self, id: Uuid) -> Result<Option<CandidateProfile>, sqlx::Error>;
}

#[derive(Debug, FromRow)]
struct JobPostingRow {
    id: Uuid,
    title: String,
    description: String,
    required_skills: Json<Vec<RequiredSkill>>,
    location: Option<Json<Location>>,
    remote: bool,
    salary_range: Option<Json<SalaryRange>>,
    min_experience_years: Option<f64>,
    posted_at: Option<DateTime<Utc>>,
}

impl From<JobPostingRow> for JobPosting {
    fn from(row: JobPostingRow) -> Self {
        JobPosting {
            id: row.id,
            title: row.title,
            description: row.description,
            required_skills: row.required_skills.0,
            location: row.location.map(|j| j.0),
            remote: row.remote,
            salary_range: row.salary_range.map(|j| j.0),
            min_experience_years: row.min_experience_years,
            posted_at: row.posted_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CandidateProfileRow {
    id: Uuid,
    headline: String,
    summary: String,
    skills: Json<Vec<SkillLevel>>,
    location: Option<Json<Location>>,
    open_to_remote: bool,
    salary_expectation: Option<Json<SalaryRange>>,
    experience_years: f64,
}

impl From<CandidateProfileRow> for CandidateProfile {
    fn from(row: CandidateProfileRow) -> Self {
        CandidateProfile {
            id: row.id,
            headline: row.headline,
            summary: row.summary,
            skills: row.skills.0,
            location: row.location.map(|j| j.0),
            open_to_remote: row.open_to_remote,
            salary_expectation: row.salary_expectation.map(|j| j.0),
            experience_years: row.experience_years,
        }
    }
}

/// `job_postings` and `candidate_profiles`, with skills, locations and salary ranges
/// held in JSONB columns.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<JobPosting>, sqlx::Error> {
        let rows = sqlx::query_as::<_, JobPostingRow>(
            r#"SELECT id, title, description, required_skills, location, remote,
                      salary_range, min_experience_years, posted_at
               FROM job_postings
               WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobPosting::from).collect())
    }

    async fn profile_by_id(&self, id: Uuid) -> Result<Option<CandidateProfile>, sqlx::Error> {
        let row = sqlx::query_as::<_, CandidateProfileRow>(
            r#"SELECT id, headline, summary, skills, location, open_to_remote,
                      salary_expectation, experience_years
               FROM candidate_profiles
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CandidateProfile::from))
    }
}
