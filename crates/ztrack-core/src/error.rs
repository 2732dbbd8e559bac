//! 引擎错误定义

use crate::entity::EntityId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    #[error("Coordinate count mismatch: expected {expected}, found {found}")]
    CoordinateCount { expected: usize, found: usize },

    #[error("Entity {0:?} has no coordinates")]
    EmptyGeometry(EntityId),

    #[error("Index {index} out of range for {len} coordinates")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("A drag session is already active")]
    AlreadyDragging,

    #[error("No drag session is active")]
    NotDragging,

    #[error("Scene error: {0}")]
    Scene(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
