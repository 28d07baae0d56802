use crate::cli::{FetchDataArgs, IngestArgs, ListDatasetsArgs};
use crate::commands::AppContext;
use crate::error::{CliError, Result};
use colored::Colorize;
use comfy_table::{presets, Cell, Table};
use cref_db::DatasetFilter;
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct FetchManifest {
    #[serde(default)]
    files: Vec<FetchEntry>,
}

#[derive(Debug, Deserialize)]
struct FetchEntry {
    path: String,
    sha256: String,
}

pub fn handle_fetch_data(args: FetchDataArgs, context: &AppContext) -> Result<()> {
    let registry = context.config.registry(&args.registry)?;

    let manifest_path = if registry.manifest.is_absolute() {
        registry.manifest.clone()
    } else {
        registry.source.join(&registry.manifest)
    };
    let manifest: FetchManifest = toml::from_str(&fs_err::read_to_string(&manifest_path)?)?;

    println!(
        "- Fetching bundle '{}' ({} file(s)) into '{}'...",
        args.registry.cyan(),
        manifest.files.len(),
        args.output_directory.display()
    );
    fs_err::create_dir_all(&args.output_directory)?;

    for entry in &manifest.files {
        let source = registry.source.join(&entry.path);
        if !source.is_file() {
            return Err(CliError::FetchFileMissing(entry.path.clone()));
        }
        let bytes = fs_err::read(&source)?;
        let actual = sha256_hex(&bytes);
        if actual != entry.sha256 {
            return Err(CliError::FetchHashMismatch {
                path: entry.path.clone(),
                expected: entry.sha256.clone(),
                actual,
            });
        }

        let destination = args.output_directory.join(&entry.path);
        if let Some(parent) = destination.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(&destination, &bytes)?;
        tracing::debug!("Fetched '{}' ({} bytes)", entry.path, bytes.len());
    }

    println!(
        "  {} {} file(s) verified and written",
        "OK".green().bold(),
        manifest.files.len()
    );
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn handle_ingest(args: IngestArgs, context: &AppContext) -> Result<()> {
    let datasets = cref_db::ingest(&context.db, args.source_type, &args.path)?;
    println!(
        "- Ingested {} {} dataset(s) from '{}'",
        datasets.len().to_string().bold(),
        args.source_type.to_string().cyan(),
        args.path.display()
    );
    Ok(())
}

pub fn handle_list(args: ListDatasetsArgs, context: &AppContext) -> Result<()> {
    let datasets = context.db.datasets(&DatasetFilter {
        source_type: args.source_type,
    })?;

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(["Source type", "Identity", "Path"]);
    for dataset in &datasets {
        table.add_row([
            Cell::new(dataset.source_type),
            Cell::new(dataset.identity()),
            Cell::new(dataset.path.display()),
        ]);
    }
    println!("{table}");
    println!("{} dataset(s)", datasets.len());
    Ok(())
}
