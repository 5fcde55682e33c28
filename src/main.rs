use inventory_migrate::db::migrations::{catalog, entrypoint};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--list" || a == "-h" || a == "--help") {
        println!("Usage: inventory-migrate <migration>...");
        println!();
        println!("Available migrations:");
        for (name, summary) in catalog::CATALOG {
            println!("  {:<36} {}", name, summary);
        }
        return ExitCode::SUCCESS;
    }

    let names: Vec<&str> = args.iter().map(String::as_str).collect();
    entrypoint::run_from_env(&names).await
}
