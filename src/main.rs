mod cli_main;

use clap::Parser;
use cli_main::Cli;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Setting tracing default failed");

    let start = std::time::Instant::now();
    if let Err(e) = cli_main::run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
    tracing::debug!("Finished in {:.2}s", start.elapsed().as_secs_f32());
}
