use anyhow::Result;
use env_logger::Env;
use lazydag::{
    cli::{config_from_matches, create_commands},
    tutorial::{run, TutorialConfig},
};
use log::info;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = create_commands().get_matches();
    let config = config_from_matches(&matches, TutorialConfig::from_env()?)?;

    let output = run(&config)?;
    info!("add(inc(1), inc(2)) = {}", output.total);
    println!("{}", output.total);
    print!("{}", output.scores);

    Ok(())
}
