mod cli;

use clap::Parser;

fn main() {
    env_logger::init();

    let prog = std::env::args().next().unwrap_or_else(|| "uvc-tune".into());
    let args = cli::Args::parse();
    std::process::exit(cli::run(&prog, &args));
}
