mod logic;
pub(crate) mod db_restore; // Restore command construction per engine

pub use logic::{RestoreOutcome, perform_restore};
