mod abilities;
mod actions;
mod cli;
mod config;
mod engine;
mod fusion;
mod gestures;
mod ipc;
mod landmarks;
mod logging;
mod processor;
mod stabilizer;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
