use std::process::ExitCode;

use inventory_migrate::db::migrations::{catalog, entrypoint};

/// Give every marketplace sale without a status the `completed` status
#[tokio::main]
async fn main() -> ExitCode {
    entrypoint::run_from_env(&[catalog::BACKFILL_SALE_STATUS]).await
}
