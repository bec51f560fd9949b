//! Data models for the GPU dataset.

mod dataset;
mod detail;
mod failure;
mod listing;

pub use crate::normalize::NormalizedKey;
pub use dataset::Dataset;
pub use detail::{DetailRecord, FetchStrategy, SpecFields};
pub use failure::{FailureEntry, FailureKind};
pub use listing::{FilterRecord, Listing};
