// src/cli.rs
//! CLI definitions for datapack
//!
//! This module contains the command-line interface definitions using clap
//! and the mapping from arguments to a run mode and [`Config`]. The actual
//! command implementations are in the `commands` module.

use anyhow::{bail, Result};
use clap::Parser;
use datapack::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "datapack")]
#[command(version)]
#[command(
    about = "Pack data directories into compressed, optionally encrypted packages and unpack them",
    long_about = "Pack data directories into compressed, optionally encrypted packages and unpack them.\n\n\
                  A directory input is packed, a file input is unpacked, and no input unpacks\n\
                  standard input. Every data directory carries a metadata.csv manifest that is\n\
                  generated when missing and verified otherwise."
)]
pub struct Cli {
    /// Data directory to pack or package file to unpack
    pub inputs: Vec<PathBuf>,

    /// Package file to write, or directory to unpack into
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Compression override (.tar.gz, .tar.bz2, .zip)
    #[arg(long = "comp")]
    pub compression: Option<String>,

    /// Public key (pack) or secret key (unpack) file
    #[arg(long)]
    pub key_path: Option<PathBuf>,

    /// Look up the recipient's public key on a keyserver by email
    #[arg(long)]
    pub public_key_email: Option<String>,

    /// File holding the secret key passphrase
    #[arg(long)]
    pub key_pass_path: Option<PathBuf>,

    /// HKP keyserver base URL
    #[arg(long)]
    pub keyserver: Option<String>,

    /// Site (organization) name
    #[arg(long)]
    pub site: Option<String>,

    /// Data model schema name
    #[arg(long)]
    pub schema: Option<String>,

    /// Data model schema version (defaults to the latest)
    #[arg(long)]
    pub schema_version: Option<String>,

    /// Version of the data set
    #[arg(long)]
    pub data_version: Option<String>,

    /// URL of the ETL code that produced the data
    #[arg(long)]
    pub etl: Option<String>,

    /// Schema service base URL
    #[arg(long)]
    pub service: Option<String>,

    /// Offline schema catalog (JSON) used instead of the service
    #[arg(long)]
    pub catalog_file: Option<PathBuf>,

    /// Only verify the data directory's metadata manifest
    #[arg(long)]
    pub verify_only: bool,

    /// Settings file (TOML); flags take precedence
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fail instead of prompting for missing metadata
    #[arg(long)]
    pub non_interactive: bool,
}

/// What a run does, decided from the inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Pack `data_dir` into `package`, or standard output
    Pack {
        data_dir: PathBuf,
        package: Option<PathBuf>,
    },
    /// Unpack `package`, or standard input, into `out_dir`
    Unpack {
        package: Option<PathBuf>,
        out_dir: PathBuf,
    },
    /// Verify the manifest of `data_dir`
    Verify { data_dir: PathBuf },
}

impl Cli {
    /// Decide the run mode from the inputs
    pub fn mode(&self) -> Result<Mode> {
        let out_dir = || self.out.clone().unwrap_or_else(|| PathBuf::from("."));

        match self.inputs.as_slice() {
            [] => Ok(Mode::Unpack {
                package: None,
                out_dir: out_dir(),
            }),
            [input] if input.is_dir() && self.verify_only => Ok(Mode::Verify {
                data_dir: input.clone(),
            }),
            [input] if input.is_dir() => Ok(Mode::Pack {
                data_dir: input.clone(),
                package: self.out.clone(),
            }),
            [input] if input.is_file() => Ok(Mode::Unpack {
                package: Some(input.clone()),
                out_dir: out_dir(),
            }),
            [input] => bail!("input not found: {}", input.display()),
            _ => bail!(
                "expected at most one input, got {}; pass a data directory or a package file",
                self.inputs.len()
            ),
        }
    }

    /// Build the run configuration: flags first, then the settings file
    pub fn to_config(&self, mode: &Mode) -> Result<Config> {
        let (package_path, data_dir) = match mode {
            Mode::Pack { data_dir, package } => (package.clone(), Some(data_dir.clone())),
            Mode::Unpack { package, out_dir } => (package.clone(), Some(out_dir.clone())),
            Mode::Verify { data_dir } => (None, Some(data_dir.clone())),
        };

        let flags = Config {
            package_path,
            data_dir,
            compression: self.compression.clone(),
            key_path: self.key_path.clone(),
            public_key_email: self.public_key_email.clone(),
            key_pass_path: self.key_pass_path.clone(),
            keyserver: self.keyserver.clone(),
            site: self.site.clone(),
            schema: self.schema.clone(),
            schema_version: self.schema_version.clone(),
            data_version: self.data_version.clone(),
            etl: self.etl.clone(),
            service: self.service.clone(),
            catalog_file: self.catalog_file.clone(),
        };

        match &self.config {
            Some(path) => Ok(flags.or(Config::from_file(path)?)),
            None => Ok(flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("datapack").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_input_unpacks_stdin() {
        let cli = parse(&[]);
        assert_eq!(
            cli.mode().unwrap(),
            Mode::Unpack {
                package: None,
                out_dir: PathBuf::from(".")
            }
        );
    }

    #[test]
    fn test_directory_input_packs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap();
        let cli = parse(&[path, "--out", "test.tar.gz.gpg"]);
        assert_eq!(
            cli.mode().unwrap(),
            Mode::Pack {
                data_dir: dir.path().to_path_buf(),
                package: Some(PathBuf::from("test.tar.gz.gpg")),
            }
        );

        let cli = parse(&[path, "--verify-only"]);
        assert_eq!(
            cli.mode().unwrap(),
            Mode::Verify {
                data_dir: dir.path().to_path_buf()
            }
        );
    }

    #[test]
    fn test_file_input_unpacks() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("test.zip");
        fs::write(&package, "").unwrap();
        let cli = parse(&[package.to_str().unwrap(), "-o", "out"]);
        assert_eq!(
            cli.mode().unwrap(),
            Mode::Unpack {
                package: Some(package.clone()),
                out_dir: PathBuf::from("out"),
            }
        );
    }

    #[test]
    fn test_too_many_inputs() {
        let cli = parse(&["a", "b"]);
        assert!(cli.mode().is_err());
        assert!(parse(&["/nonexistent/input"]).mode().is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("datapack.toml");
        fs::write(&settings, "site = \"FILE\"\nschema = \"pedsnet\"\n").unwrap();

        let cli = parse(&[
            "--site",
            "ORG",
            "--comp",
            ".zip",
            "--config",
            settings.to_str().unwrap(),
        ]);
        let mode = cli.mode().unwrap();
        let config = cli.to_config(&mode).unwrap();
        assert_eq!(config.site.as_deref(), Some("ORG"));
        assert_eq!(config.schema.as_deref(), Some("pedsnet"));
        assert_eq!(config.compression.as_deref(), Some(".zip"));
        assert_eq!(config.data_dir, Some(PathBuf::from(".")));
        assert!(config.package_path.is_none());
    }
}
