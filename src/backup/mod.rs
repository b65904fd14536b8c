mod logic;
pub(crate) mod db_dump; // Dump command construction per engine

pub use logic::{BackupOutcome, perform_backup};
