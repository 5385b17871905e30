//! Migrates a v2 Sumo Logic Kubernetes Collection `values.yaml` to v3.
//!
//! Reads `--in`, runs every migration and writes `--out`. Anything that needs
//! a person's attention is logged at the warn level.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, util::SubscriberInitExt};
use values_migrate::migrate_with_blueprint;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed migrating {path}: {source}")]
    Migrate {
        path: PathBuf,
        source: values_migrate::Error,
    },
    #[error("failed writing {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// input values.yaml to be migrated
    #[clap(long = "in", default_value = "values.yaml")]
    input: PathBuf,
    /// output values.yaml
    #[clap(long = "out", default_value = "new_values.yaml")]
    output: PathBuf,
    /// document whose key order the output follows, the input by default
    #[clap(long)]
    blueprint: Option<PathBuf>,
}

fn read(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `contents` to `path`, readable by the owner only.
fn write(path: &Path, contents: &str) -> Result<(), Error> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .and_then(|mut file| file.write_all(contents.as_bytes()))
        .map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn run(cli: &Cli) -> Result<(), Error> {
    let input = read(&cli.input)?;
    let blueprint = match &cli.blueprint {
        Some(path) => read(path)?,
        None => input.clone(),
    };
    let output = migrate_with_blueprint(&input, &blueprint).map_err(|source| Error::Migrate {
        path: cli.input.clone(),
        source,
    })?;
    write(&cli.output, &output)?;
    info!(
        input = %cli.input.display(),
        output = %cli.output.display(),
        "migration complete"
    );
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .finish()
        .init();

    let cli = Cli::parse();
    let res = run(&cli);
    if let Err(ref err) = res {
        error!("{err}");
    }
    res
}
