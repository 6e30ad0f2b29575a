//! Status state machines for documents and generation records.
//!
//! Statuses are only advanced through the transition functions below. Each returns the
//! next state or a [`TransitionError`] naming the rejected move, so a terminal record
//! can never be walked back into an active state.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {entity} status transition: {from} -> {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

impl TransitionError {
    fn new(entity: &'static str, from: impl Display, to: impl Display) -> Self {
        Self {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    const ENTITY: &'static str = "document";

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// UPLOADED -> PROCESSING
    pub fn start_processing(self) -> Result<Self, TransitionError> {
        match self {
            DocumentStatus::Uploaded => Ok(DocumentStatus::Processing),
            from => Err(TransitionError::new(
                Self::ENTITY,
                from,
                DocumentStatus::Processing,
            )),
        }
    }

    /// PROCESSING -> COMPLETED
    pub fn complete(self) -> Result<Self, TransitionError> {
        match self {
            DocumentStatus::Processing => Ok(DocumentStatus::Completed),
            from => Err(TransitionError::new(
                Self::ENTITY,
                from,
                DocumentStatus::Completed,
            )),
        }
    }

    /// UPLOADED | PROCESSING -> FAILED
    pub fn fail(self) -> Result<Self, TransitionError> {
        match self {
            DocumentStatus::Uploaded | DocumentStatus::Processing => Ok(DocumentStatus::Failed),
            from => Err(TransitionError::new(Self::ENTITY, from, DocumentStatus::Failed)),
        }
    }
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentStatus::Uploaded => write!(f, "UPLOADED"),
            DocumentStatus::Processing => write!(f, "PROCESSING"),
            DocumentStatus::Completed => write!(f, "COMPLETED"),
            DocumentStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOADED" => Ok(DocumentStatus::Uploaded),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "COMPLETED" => Ok(DocumentStatus::Completed),
            "FAILED" => Ok(DocumentStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid document status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Requested,
    Completed,
    Failed,
}

impl GenerationStatus {
    const ENTITY: &'static str = "generation record";

    pub fn is_terminal(self) -> bool {
        !matches!(self, GenerationStatus::Requested)
    }

    /// REQUESTED -> COMPLETED
    pub fn complete(self) -> Result<Self, TransitionError> {
        match self {
            GenerationStatus::Requested => Ok(GenerationStatus::Completed),
            from => Err(TransitionError::new(
                Self::ENTITY,
                from,
                GenerationStatus::Completed,
            )),
        }
    }

    /// REQUESTED -> FAILED
    pub fn fail(self) -> Result<Self, TransitionError> {
        match self {
            GenerationStatus::Requested => Ok(GenerationStatus::Failed),
            from => Err(TransitionError::new(
                Self::ENTITY,
                from,
                GenerationStatus::Failed,
            )),
        }
    }
}

impl Display for GenerationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            GenerationStatus::Requested => write!(f, "REQUESTED"),
            GenerationStatus::Completed => write!(f, "COMPLETED"),
            GenerationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for GenerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(GenerationStatus::Requested),
            "COMPLETED" => Ok(GenerationStatus::Completed),
            "FAILED" => Ok(GenerationStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid generation status: {}", s)),
        }
    }
}
