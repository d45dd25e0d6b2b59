//! Schema Repository CLI
//!
//! Commands for storing, inspecting and removing schemas.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use xsd_repository::{ImportSource, RepositoryConfig, SchemaStore, ServiceSchemas};

#[derive(Parser)]
#[command(name = "xsd-repository")]
#[command(about = "Namespace-indexed XSD repository with catalog deduplication")]
struct Cli {
    /// Config file to load (optional)
    #[arg(short, long)]
    config: Option<String>,

    /// Repository directory, overriding the configuration
    #[arg(short, long)]
    repository: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every catalog registration
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a schema file
    Add {
        /// Schema file to store
        file: PathBuf,
        /// File name inside the repository (defaults to the source name)
        #[arg(short, long)]
        name: Option<String>,
        /// Always write a new file, skipping deduplication
        #[arg(long)]
        overwrite: bool,
        /// Imported schema content as NAMESPACE=FILE; enables import-aware reuse
        #[arg(short, long = "import")]
        imports: Vec<String>,
    },

    /// Store a root schema together with the schemas it imports
    AddService {
        /// Root schema file
        root: PathBuf,
        /// Owner name used for the generated file names
        #[arg(short, long)]
        owner: String,
        /// Imported schema as NAMESPACE=FILE (repeatable, also per namespace)
        #[arg(short, long = "import")]
        imports: Vec<String>,
    },

    /// Print a stored schema
    Get {
        namespace: String,
        location: String,
    },

    /// Check whether a registration exists
    Has {
        namespace: String,
        location: String,
    },

    /// Remove a registration and its file
    Remove {
        namespace: String,
        location: String,
        /// Keep the schema file on disk
        #[arg(long)]
        keep_file: bool,
    },

    /// Show the preferred local file for a namespace
    Resolve {
        namespace: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = RepositoryConfig::load_from(cli.config.as_deref())?;
    if let Some(path) = cli.repository {
        config.repository.path = path;
    }
    let store = SchemaStore::from_config(&config)
        .with_context(|| format!("opening repository {}", config.repository_path().display()))?;

    match cli.command {
        Commands::List { json } => {
            let entries = store.list_all_schemas()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No schemas registered yet.");
            } else {
                println!("📚 Registered schemas ({}):", entries.len());
                for entry in entries {
                    println!("  {}", entry);
                }
            }
        }

        Commands::Add { file, name, overwrite, imports } => {
            let content = read(&file)?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("schema path has no file name")?,
            };
            let location = if imports.is_empty() {
                store.add_schema(&content, &name, overwrite)?
            } else {
                let mut map = BTreeMap::new();
                for (namespace, path) in parse_imports(&imports)? {
                    map.entry(namespace).or_insert(read(&path)?);
                }
                store.add_schema_with_imports(&content, &name, overwrite, &map)?
            };
            println!("✅ Stored at {}", location);
        }

        Commands::AddService { root, owner, imports } => {
            let mut schemas = ServiceSchemas::new(read(&root)?);
            let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (namespace, path) in parse_imports(&imports)? {
                grouped.entry(namespace).or_default().push(read(&path)?);
            }
            for (namespace, mut contents) in grouped {
                let source = if contents.len() == 1 {
                    ImportSource::Single(contents.remove(0))
                } else {
                    ImportSource::Multiple(contents)
                };
                schemas = schemas.with_import(namespace, source);
            }

            let locations = store.add_service_schemas(&schemas, &owner)?;
            println!("✅ Stored {} namespaces:", locations.len());
            for (namespace, location) in locations {
                println!("  {} -> {}", namespace, location);
            }
        }

        Commands::Get { namespace, location } => {
            print!("{}", store.get_schema_as_string(&namespace, &location)?);
        }

        Commands::Has { namespace, location } => {
            if store.has_schema(&namespace, &location)? {
                println!("✅ {} -> {} is registered", namespace, location);
            } else {
                println!("❌ {} -> {} is not registered", namespace, location);
                std::process::exit(1);
            }
        }

        Commands::Remove { namespace, location, keep_file } => {
            if store.remove_schema_entry(&namespace, &location, !keep_file)? {
                println!("🗑️  Removed {} -> {}", namespace, location);
            } else {
                bail!("{} -> {} is not registered", namespace, location);
            }
        }

        Commands::Resolve { namespace } => match store.resolve(&namespace)? {
            Some(path) => println!("{}", path.display()),
            None => bail!("no local schema registered for {}", namespace),
        },
    }

    Ok(())
}

fn read(path: &PathBuf) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn parse_imports(raw: &[String]) -> anyhow::Result<Vec<(String, PathBuf)>> {
    raw.iter()
        .map(|arg| match arg.rsplit_once('=') {
            Some((namespace, path)) if !namespace.is_empty() && !path.is_empty() => {
                Ok((namespace.to_string(), PathBuf::from(path)))
            }
            _ => bail!("expected NAMESPACE=FILE, got {:?}", arg),
        })
        .collect()
}
