//! layerfs command line
//!
//! Inspect and extend a case database from the shell

use anyhow::Context;
use clap::{Parser, Subcommand};
use layerfs::{CancellationToken, Case, CaseBuilder, InodeAddress, VfsConfig};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "layerfs")]
#[command(about = "Layered virtual filesystem over forensic evidence")]
struct Args {
    /// Path to the SQLite case database
    #[arg(short = 'c', long)]
    case: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the segments of an address
    Parse { address: String },

    /// Write the contents of an address to stdout
    Cat { address: String },

    /// Print size and SHA-256 of an address
    Stat { address: String },

    /// Register an evidence file under a source name
    AddSource { name: String, path: PathBuf },

    /// Register a node for an address
    Node { address: String, path: String },

    /// Carve embedded files out of an address
    Carve {
        address: String,

        /// Only carve these extensions (repeatable)
        #[arg(short = 'e', long = "ext")]
        extensions: Vec<String>,
    },

    /// List registered nodes
    Nodes,
}

fn open_case(args: &Args) -> anyhow::Result<Case> {
    let config = match &args.config {
        Some(path) => VfsConfig::load(path)
            .with_context(|| format!("loading configuration {:?}", path))?,
        None => VfsConfig::default(),
    };
    CaseBuilder::new()
        .sqlite(&args.case)
        .config(config)
        .build()
        .with_context(|| format!("opening case {:?}", args.case))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if let Command::Parse { address } = &args.command {
        let address = InodeAddress::parse(address)?;
        for (index, segment) in address.segments().iter().enumerate() {
            println!("{}\t{}\t{}", index, segment.specifier, segment.params);
        }
        return Ok(());
    }

    let case = open_case(&args)?;

    match args.command {
        Command::Parse { .. } => {}
        Command::Cat { address } => {
            let address = InodeAddress::parse(&address)?;
            let data = case.read_all(&address)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Command::Stat { address } => {
            let address = InodeAddress::parse(&address)?;
            let size = case.open(&address)?.size();
            let digest = case.digest(&address)?;
            let path = case.store().node(&address)?.map(|node| node.path);
            println!("address: {}", address);
            println!("path:    {}", path.as_deref().unwrap_or("-"));
            println!("size:    {}", size);
            println!("sha256:  {}", digest);
        }
        Command::AddSource { name, path } => {
            let path = path
                .canonicalize()
                .with_context(|| format!("resolving {:?}", path))?;
            case.store().add_source(&name, &path)?;
            info!("Registered source '{}' at {:?}", name, path);
        }
        Command::Node { address, path } => {
            let address = InodeAddress::parse(&address)?;
            let node = case.create_node(&address, &path)?;
            println!("{}", serde_json::to_string(&node)?);
        }
        Command::Carve {
            address,
            extensions,
        } => {
            let address = InodeAddress::parse(&address)?;
            let nodes = case.carve(&address, &CancellationToken::new(), &extensions)?;
            for node in nodes {
                println!("{}", serde_json::to_string(&node)?);
            }
        }
        Command::Nodes => {
            for node in case.nodes()? {
                let size = node.size.map(|s| s.to_string());
                println!(
                    "{}\t{}\t{}",
                    node.address,
                    size.as_deref().unwrap_or("-"),
                    node.path
                );
            }
        }
    }

    Ok(())
}
