pub mod timestamp;

use std::path::PathBuf;
use which::which;

use crate::errors::{AppError, Result};

/// Finds an executable (pg_dump, mysqldump, psql, ...) in the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|_| AppError::ExecutableNotFound(program.to_string()))
}
