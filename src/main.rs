use clap::Parser;
use rarity::Cli;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    cli.run()
}
