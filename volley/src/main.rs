use clap::Parser as _;

mod cli;
mod exit_codes;
mod output;
mod run;
mod script_yaml;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    init_tracing();

    let code = match args.command {
        cli::Command::Run(run_args) => run::execute(run_args).await,
    };

    std::process::exit(code);
}
