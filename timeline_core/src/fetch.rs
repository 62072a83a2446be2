//! Requests the controller hands to its host, and what comes back.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FetchId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Manifest,
    Live {
        locator: String,
    },
    Archive {
        index: usize,
        locator: String,
        generation: u64,
    },
}

impl FetchTarget {
    pub fn locator(&self) -> Option<&str> {
        match self {
            FetchTarget::Manifest => None,
            FetchTarget::Live { locator } | FetchTarget::Archive { locator, .. } => Some(locator),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub id: FetchId,
    pub target: FetchTarget,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{locator} not found")]
    NotFound { locator: String },
    #[error("failed to fetch {locator}: {message}")]
    Transport { locator: String, message: String },
    #[error("failed to decode {locator}: {message}")]
    Decode { locator: String, message: String },
}
