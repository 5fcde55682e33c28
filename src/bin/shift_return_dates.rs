use std::process::ExitCode;

use inventory_migrate::db::migrations::{catalog, entrypoint};

// The range comes from `return_date_shift` in MIGRATION_CONFIG or
// MIGRATION_SHIFT_START / MIGRATION_SHIFT_END.
#[tokio::main]
async fn main() -> ExitCode {
    entrypoint::run_from_env(&[catalog::SHIFT_RETURN_DATES]).await
}
