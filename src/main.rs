//! Stackbridge CLI entry point.

use stackbridge::cli::{self, Cli};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Err(err) = cli::execute(cli).await {
        eprintln!("stackbridge: {err}");
        std::process::exit(1);
    }
}
