//! API handlers module

pub mod conversations;
pub mod documents;
pub mod health;
pub mod messages;

use docchat_common::errors::{AppError, Result};
use validator::Validate;

/// Run derive-based validation, mapping failures to a 400
pub(crate) fn validate<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })
}
