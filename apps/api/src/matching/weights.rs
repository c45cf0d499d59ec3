use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::matching::scoring::Dimension;

/// Relative importance of each sub-score. Only ratios matter: weights are renormalized
/// over the sub-scores present for a given job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub skill: f64,
    pub semantic: f64,
    pub experience: f64,
    pub location: f64,
    pub salary: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            skill: 0.35,
            semantic: 0.25,
            experience: 0.15,
            location: 0.10,
            salary: 0.15,
        }
    }
}

impl MatchWeights {
    pub const ZERO: MatchWeights = MatchWeights {
        skill: 0.0,
        semantic: 0.0,
        experience: 0.0,
        location: 0.0,
        salary: 0.0,
    };

    /// Reads a JSON weights file. Omitted fields fall back to the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read weights file {}", path.display()))?;
        let weights: MatchWeights = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid weights file {}", path.display()))?;
        weights
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid weights in {}: {e}", path.display()))?;
        Ok(weights)
    }

    /// Every weight finite and non-negative, with a positive total.
    pub fn validate(&self) -> Result<(), String> {
        for dim in Dimension::ALL {
            let w = self.get(dim);
            if !w.is_finite() || w < 0.0 {
                return Err(format!("weight for {dim} must be a finite, non-negative number"));
            }
        }
        if self.total() <= 0.0 {
            return Err("weights must not all be zero".to_string());
        }
        Ok(())
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Skill => self.skill,
            Dimension::Semantic => self.semantic,
            Dimension::Experience => self.experience,
            Dimension::Location => self.location,
            Dimension::Salary => self.salary,
        }
    }

    pub fn set(&mut self, dim: Dimension, value: f64) {
        match dim {
            Dimension::Skill => self.skill = value,
            Dimension::Semantic => self.semantic = value,
            Dimension::Experience => self.experience = value,
            Dimension::Location => self.location = value,
            Dimension::Salary => self.salary = value,
        }
    }

    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum()
    }
}
