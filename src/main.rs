//! dynbridge - Dynamic-Library Foreign-Function Bridge
//!
//! CLI entry point for loading units, running their init protocol, and
//! invoking exported entry points. Load and resolve failures are fatal:
//! the process exits non-zero with a diagnostic naming the missing path or
//! symbol.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dynbridge::config::HostConfig;
use dynbridge::manifest::UnitManifest;
use dynbridge::{to_foreign, ForeignValue, LibraryHandle, Loader};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dyb")]
#[command(version)]
#[command(about = "Dynamic-library foreign-function bridge", long_about = None)]
struct Cli {
    /// Extra unit search path (repeatable)
    #[arg(long = "search-path", global = true, value_name = "DIR")]
    search_paths: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a unit and call one exported symbol directly
    Call {
        /// Unit path or bare library name
        library: String,

        /// Exported symbol to invoke
        symbol: String,

        /// Integer arguments, boxed before the call
        #[arg(allow_negative_numbers = true)]
        args: Vec<i64>,

        /// Init symbol to run first (omit for units with no setup)
        #[arg(long)]
        init: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a parsed unit manifest
    Inspect {
        /// Manifest file (unit.json)
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// Load a unit per its manifest, run init, and invoke an export
    Run {
        /// Manifest file (unit.json)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Export to invoke (default: the manifest's first export)
        #[arg(long)]
        entry: Option<String>,

        /// Integer arguments, boxed before the call
        #[arg(allow_negative_numbers = true)]
        args: Vec<i64>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = build_loader(&cli.search_paths);

    match cli.command {
        Commands::Call {
            library,
            symbol,
            args,
            init,
            verbose,
        } => cmd_call(&loader, &library, &symbol, &args, init.as_deref(), verbose),
        Commands::Inspect { manifest } => cmd_inspect(&manifest),
        Commands::Run {
            manifest,
            entry,
            args,
            verbose,
        } => cmd_run(&loader, &manifest, entry.as_deref(), &args, verbose),
    }
}

fn build_loader(extra_paths: &[PathBuf]) -> Loader {
    let config = HostConfig::load_or_default();
    let loader = Loader::new();
    for path in config
        .loader
        .search_paths
        .iter()
        .chain(extra_paths.iter())
    {
        loader.add_search_path(path);
    }
    loader
}

fn cmd_call(
    loader: &Loader,
    library: &str,
    symbol: &str,
    args: &[i64],
    init: Option<&str>,
    verbose: bool,
) -> Result<()> {
    let handle = loader
        .load(library)
        .with_context(|| format!("loading unit '{}'", library))?;
    if verbose {
        println!("loaded {}", handle.path().display());
    }

    loader
        .initialize(&handle, init)
        .with_context(|| format!("initializing unit '{}'", library))?;

    let result = invoke(loader, &handle, symbol, args, verbose)?;
    print_result(&result);

    loader.unload(&handle)?;
    Ok(())
}

fn cmd_inspect(path: &PathBuf) -> Result<()> {
    let manifest = UnitManifest::load(path)
        .with_context(|| format!("reading manifest '{}'", path.display()))?;
    manifest.validate()?;

    println!("unit:    {}", manifest.name);
    println!("library: {}", manifest.library);
    if !manifest.description.is_empty() {
        println!("about:   {}", manifest.description);
    }
    if let Some(init) = &manifest.init {
        println!("init:    {}", init);
    }
    for export in &manifest.exports {
        if export.description.is_empty() {
            println!("export:  {}/{}", export.name, export.arity);
        } else {
            println!(
                "export:  {}/{}  {}",
                export.name, export.arity, export.description
            );
        }
    }
    Ok(())
}

fn cmd_run(
    loader: &Loader,
    path: &PathBuf,
    entry: Option<&str>,
    args: &[i64],
    verbose: bool,
) -> Result<()> {
    let manifest = UnitManifest::load(path)
        .with_context(|| format!("reading manifest '{}'", path.display()))?;
    manifest.validate()?;

    let export = match entry {
        Some(name) => manifest
            .export(name)
            .with_context(|| format!("manifest has no export named '{}'", name))?,
        None => manifest
            .exports
            .first()
            .context("manifest declares no exports")?,
    };
    if args.len() != export.arity {
        bail!(
            "export '{}' takes {} argument(s), got {}",
            export.name,
            export.arity,
            args.len()
        );
    }

    let handle = loader
        .load(&manifest.library)
        .with_context(|| format!("loading unit '{}'", manifest.library))?;
    if verbose {
        println!("loaded {}", handle.path().display());
    }

    loader
        .initialize(&handle, manifest.init.as_deref())
        .with_context(|| format!("initializing unit '{}'", manifest.name))?;
    if verbose {
        if let Some(init) = &manifest.init {
            println!("ran init symbol '{}'", init);
        }
    }

    let result = invoke(loader, &handle, &export.name, args, verbose)?;
    print_result(&result);

    loader.unload(&handle)?;
    Ok(())
}

fn invoke(
    loader: &Loader,
    handle: &LibraryHandle,
    symbol: &str,
    args: &[i64],
    verbose: bool,
) -> Result<ForeignValue> {
    let sym = loader
        .resolve(handle, symbol, args.len())
        .with_context(|| format!("resolving symbol '{}'", symbol))?;

    let boxed: Vec<ForeignValue> = args.iter().map(|&v| to_foreign(v)).collect();
    if verbose {
        println!("calling {}/{}", sym.name(), sym.arity());
    }

    sym.call(&boxed)
        .with_context(|| format!("calling '{}'", symbol))
}

fn print_result(result: &ForeignValue) {
    match result {
        ForeignValue::Unit => println!("(no value)"),
        other => println!("{}", other),
    }
}
