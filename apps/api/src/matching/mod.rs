//! Matching Engine: ranks job postings against a candidate profile.
//!
//! Each job gets up to five sub-scores in [0, 1]. Sub-scores that cannot be computed
//! (no salary data, no location on either side, no required skills) are excluded and
//! the remaining weights are renormalized, so the composite never averages in a
//! phantom component.

pub mod engine;
pub mod explain;
pub mod handlers;
pub mod prompts;
pub mod scoring;
pub mod weights;

pub use engine::MatchEngine;
pub use weights::MatchWeights;
