use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use dataset_sync::backends::FileSystemBackend;
use dataset_sync::config::StoreConfig;
use dataset_sync::data::{DataTree, EntryPath, RowId};
use dataset_sync::store::{DigestAlgorithm, RemoteStore, calculate_checksums};

#[derive(Parser)]
#[command(name = "dsync", author, version, about = "Inspect and fetch datasets held in a remote store")]
struct Cli {
    /// Config file (default: <config dir>/dataset-sync/store.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository root, overriding the config file
    #[arg(long, global = true, env = "DSYNC_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rows of a dataset, leaves in order
    Tree {
        dataset: String,
        #[arg(long)]
        json: bool,
    },
    /// List the entries of one row
    Entries {
        dataset: String,
        /// Row IDs, one per hierarchy level
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Download a file-set into a staging directory
    Get {
        dataset: String,
        /// Entry path, e.g. `t1w` or `brain_mask@segmentation`
        path: String,
        #[arg(long, num_args = 1.., required = true)]
        row: Vec<String>,
        #[arg(long)]
        dest: PathBuf,
    },
    /// Print the digests of a local directory
    Checksum {
        dir: PathBuf,
        #[arg(long, default_value = "sha256")]
        digest: DigestAlgorithm,
    },
}

fn main() -> Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Checksum { dir, digest } => {
            let sums = calculate_checksums(&dir, digest, &[])
                .with_context(|| format!("checksumming {}", dir.display()))?;
            for (path, sum) in sums {
                println!("{sum}  {path}");
            }
            Ok(())
        }
        Commands::Tree { dataset, json } => {
            let store = open_store(cli.config, cli.root)?;
            let tree = store.populate_tree(&dataset)?;
            print_tree(&tree, json)
        }
        Commands::Entries { dataset, ids, json } => {
            let store = open_store(cli.config, cli.root)?;
            let mut tree = store.populate_tree(&dataset)?;
            let row = find_row(&tree, &ids)?;
            store.populate_row(&mut tree, row)?;
            print_entries(&tree, row, json)
        }
        Commands::Get {
            dataset,
            path,
            row,
            dest,
        } => {
            let store = open_store(cli.config, cli.root)?;
            let mut tree = store.populate_tree(&dataset)?;
            let row = find_row(&tree, &row)?;
            store.populate_row(&mut tree, row)?;
            let path = EntryPath::parse(&path)?;
            let entry = tree
                .find_entry(row, &path)
                .map(|e| e.id())
                .ok_or_else(|| anyhow!("no entry {path} in row {}", tree.row(row).ids().join("/")))?;
            let out = store.get_fileset(&tree, entry, &dest)?;
            println!("{}", out.display());
            Ok(())
        }
    }
}

fn open_store(config: Option<PathBuf>, root: Option<PathBuf>) -> Result<RemoteStore<FileSystemBackend>> {
    let mut config = StoreConfig::discover(config.as_deref())?;
    if let Some(root) = root {
        config.root = root;
    }
    config.build_store()
}

fn find_row(tree: &DataTree, ids: &[String]) -> Result<RowId> {
    tree.row_by_ids(ids)
        .map(|r| r.id())
        .ok_or_else(|| anyhow!("no row {} in dataset {}", ids.join("/"), tree.dataset_id()))
}

fn print_tree(tree: &DataTree, as_json: bool) -> Result<()> {
    if as_json {
        let leaves: Vec<_> = tree
            .leaves()
            .map(|row| json!({ "ids": row.ids(), "metadata": row.metadata() }))
            .collect();
        let mut rows = serde_json::Map::new();
        for freq in tree.hierarchy().levels() {
            let ids: Vec<_> = tree.rows(*freq).map(|r| r.ids().join("/")).collect();
            rows.insert(freq.to_string(), json!(ids));
        }
        let out = json!({
            "dataset": tree.dataset_id(),
            "hierarchy": tree.hierarchy(),
            "rows": rows,
            "leaves": leaves,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("dataset {}", tree.dataset_id());
    for freq in tree.hierarchy().levels() {
        println!("{freq}: {}", tree.rows(*freq).count());
    }
    for row in tree.leaves() {
        let meta = row.metadata();
        let date = meta.get("date").and_then(|v| v.as_str()).unwrap_or("-");
        let age = meta.get("age").and_then(|v| v.as_f64()).unwrap_or(-1.0);
        println!("  {}  date={date} age={age:.2}", row.ids().join("/"));
    }
    Ok(())
}

fn print_entries(tree: &DataTree, row: RowId, as_json: bool) -> Result<()> {
    if as_json {
        let entries: Vec<_> = tree
            .row_entries(row)
            .map(|e| {
                json!({
                    "path": e.path().to_string(),
                    "datatype": e.datatype().to_string(),
                    "uri": e.uri(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in tree.row_entries(row) {
        println!("{}\t{}\t{}", entry.path(), entry.datatype(), entry.uri());
    }
    Ok(())
}
