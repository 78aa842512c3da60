// src/commands.rs
//! Command handlers for the datapack CLI

use anyhow::{Context, Result};
use datapack::{
    create_or_verify_metadata, Config, Direction, FieldResolver, MetadataOutcome,
    NonInteractive, PackageReader, PackageWriter, SchemaCatalog, TerminalResolver,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Fetch the schema catalog named by the configuration
fn load_catalog(config: &Config) -> Result<SchemaCatalog> {
    let source = config.schema_source()?;
    let catalog = SchemaCatalog::fetch(source.as_ref())
        .with_context(|| format!("failed to load schema catalog from {}", source.describe()))?;
    Ok(catalog)
}

fn resolver(non_interactive: bool) -> Box<dyn FieldResolver> {
    if non_interactive {
        Box::new(NonInteractive)
    } else {
        Box::new(TerminalResolver::stdio())
    }
}

fn data_dir(config: &Config) -> Result<&Path> {
    config
        .data_dir
        .as_deref()
        .context("no data directory given")
}

fn report(outcome: &MetadataOutcome) {
    match outcome {
        MetadataOutcome::Generated { path, records } => {
            info!("Generated {} with {} records", path.display(), records)
        }
        MetadataOutcome::Verified(summary) => {
            info!("Verified {} manifest records", summary.records)
        }
    }
}

/// Create or verify the manifest of the data directory, then pack it
pub fn cmd_pack(config: &Config, non_interactive: bool) -> Result<()> {
    // Settings conflicts surface before anything is read or written
    let descriptor = config.descriptor(Direction::Pack)?;
    let data_dir = data_dir(config)?;

    let catalog = load_catalog(config)?;
    let mut resolver = resolver(non_interactive);
    let outcome = create_or_verify_metadata(
        data_dir,
        &config.metadata_options(),
        &catalog,
        resolver.as_mut(),
        false,
    )?;
    report(&outcome);

    info!(
        "Packing {} into {} ({})",
        data_dir.display(),
        descriptor.location(),
        descriptor.format()
    );
    let summary = PackageWriter::new(descriptor).pack(data_dir)?;
    info!("Pack complete: {} files, {} bytes", summary.entries, summary.bytes);
    Ok(())
}

/// Unpack a package, then verify the unpacked manifest
pub fn cmd_unpack(config: &Config) -> Result<()> {
    let descriptor = config.descriptor(Direction::Unpack)?;
    let out_dir: PathBuf = data_dir(config)?.to_path_buf();
    let catalog = load_catalog(config)?;

    info!(
        "Unpacking {} ({}) into {}",
        descriptor.location(),
        descriptor.format(),
        out_dir.display()
    );
    let summary = PackageReader::new(descriptor).unpack(&out_dir)?;
    info!("Unpack complete: {} files, {} bytes", summary.entries, summary.bytes);

    let outcome = create_or_verify_metadata(
        &out_dir,
        &config.metadata_options(),
        &catalog,
        &mut NonInteractive,
        true,
    )?;
    report(&outcome);
    Ok(())
}

/// Verify the manifest of a data directory without packing it
pub fn cmd_verify(config: &Config) -> Result<()> {
    let data_dir = data_dir(config)?;
    let catalog = load_catalog(config)?;

    let outcome = create_or_verify_metadata(
        data_dir,
        &config.metadata_options(),
        &catalog,
        &mut NonInteractive,
        true,
    )?;
    report(&outcome);

    if let MetadataOutcome::Verified(summary) = outcome {
        println!("{}: {} records verified", data_dir.display(), summary.records);
        if summary.unlisted > 0 {
            println!("  {} data files are not listed in the manifest", summary.unlisted);
        }
    }
    Ok(())
}
