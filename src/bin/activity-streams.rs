//! activity-streams CLI - run configured activity streams
//!
//! Loads a streams YAML file, starts every stream on its own owner thread
//! and waits for all of them to finish.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use activity_streams::config::StreamsConfig;
use activity_streams::runtime::StreamHandle;

#[derive(Parser)]
#[command(name = "activity-streams")]
#[command(version, about = "Parse raw activity data into normalized activity records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured stream until its input ends
    Run {
        /// Path to the streams configuration file
        #[arg(short, long, default_value = "config/streams.yaml")]
        config: PathBuf,
    },

    /// Load and build the configuration without running it
    Validate {
        /// Path to the streams configuration file
        #[arg(short, long, default_value = "config/streams.yaml")]
        config: PathBuf,
    },
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => run(config),
        Commands::Validate { config } => validate(config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load(config: &PathBuf) -> Result<StreamsConfig, Box<dyn std::error::Error>> {
    let streams = StreamsConfig::load_from_file(config)?;
    tracing::info!(
        "Loaded {} parser(s) and {} stream(s) from {}",
        streams.parsers.len(),
        streams.streams.len(),
        config.display()
    );
    Ok(streams)
}

fn validate(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let streams = load(&config)?.build()?;
    for stream in &streams {
        println!("✓ {}", stream.name());
    }
    println!("Configuration is valid ({} stream(s))", streams.len());
    Ok(())
}

fn run(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let streams = load(&config)?.build()?;
    if streams.is_empty() {
        return Err("no streams configured".into());
    }

    let handles = streams
        .into_iter()
        .map(|stream| stream.spawn())
        .collect::<Result<Vec<StreamHandle>, _>>()?;

    let mut failed = 0;
    for handle in handles {
        let name = handle.name().to_string();
        match handle.join() {
            Ok(stats) => println!("{}", stats),
            Err(e) => {
                tracing::error!("Stream {} failed: {}", name, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} stream(s) failed", failed).into());
    }
    Ok(())
}
