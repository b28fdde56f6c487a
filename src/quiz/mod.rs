//! Quiz lifecycle: question generation (keyword or model), normalization,
//! grading and mastery/progress views.

pub mod grading;
pub mod keywords;
pub mod model;
pub mod normalize;
pub mod progress;
