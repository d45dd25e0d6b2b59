//! Repository Config CLI
//!
//! View and manage schema repository configuration.

use clap::{Parser, Subcommand};
use xsd_repository::{catalog, RepositoryConfig};

#[derive(Parser)]
#[command(name = "xsd-repository-config")]
#[command(about = "View and manage schema repository configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Show {
        /// Config file to load (optional)
        #[arg(short, long)]
        config: Option<String>,

        /// Output as TOML
        #[arg(long)]
        toml: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new config file
    Init {
        /// Output path
        #[arg(short, long, default_value = "xsd-repository.toml")]
        output: String,
    },

    /// Validate configuration
    Validate {
        /// Config file to validate
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Check the configured repository directory and catalog on disk
    Status {
        /// Config file to load (optional)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Show { config, toml, json } => {
            let cfg = RepositoryConfig::load_from(config.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else if toml {
                println!("{}", ::toml::to_string_pretty(&cfg)?);
            } else {
                println!("📋 Schema Repository Configuration\n");
                println!("Repository:");
                println!("  Path: {:?}", cfg.repository_path());
                println!("  Catalog: {:?}", cfg.catalog_path());
                println!("  Create if missing: {}", cfg.repository.create_if_missing);

                println!("\nComparison:");
                println!("  Strategy: {}", cfg.comparison.strategy);
            }
        }

        Commands::Init { output } => {
            let cfg = RepositoryConfig::default();
            cfg.save(&output)?;
            println!("✅ Created config file: {}", output);
        }

        Commands::Validate { config } => match RepositoryConfig::load_from(config.as_deref()) {
            Ok(cfg) => {
                println!("✅ Configuration is valid");
                println!("   Repository: {:?}", cfg.repository_path());
                println!("   Strategy: {}", cfg.comparison.strategy);
            }
            Err(e) => {
                eprintln!("❌ Configuration error: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Status { config } => {
            let cfg = RepositoryConfig::load_from(config.as_deref())?;
            let root = cfg.repository_path();
            let catalog_path = cfg.catalog_path();

            if !root.is_dir() {
                let note = if cfg.repository.create_if_missing {
                    "created on first use"
                } else {
                    "create_if_missing is off"
                };
                println!("⚠️  Repository {:?} does not exist ({})", root, note);
                return Ok(());
            }
            println!("📁 Repository: {:?}", root);

            if !catalog_path.exists() {
                println!("📋 Catalog {:?} not written yet (no schemas stored)", catalog_path);
                return Ok(());
            }
            match catalog::parse(&catalog_path) {
                Ok(index) => {
                    println!("✅ Catalog {:?}", catalog_path);
                    println!("   Namespaces: {}", index.namespaces().count());
                    println!("   Registrations: {}", index.len());
                }
                Err(e) => {
                    eprintln!("❌ {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
