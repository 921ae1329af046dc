//! archspec CLI — query CPU microarchitectures from the command line.

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use archspec_cpu::catalog::Catalog;
use archspec_cpu::detect;
use archspec_cpu::flags;
use archspec_cpu::microarchitecture::Microarchitecture;

#[derive(Parser)]
#[command(name = "archspec", version, about = "CPU microarchitecture queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the host CPU's microarchitecture name
    Cpu,
    /// List known microarchitectures
    List {
        /// Restrict to one architecture family (e.g. x86_64, aarch64)
        #[arg(long)]
        family: Option<String>,
    },
    /// Show details of a microarchitecture
    Describe {
        /// Microarchitecture name
        name: String,
        /// Output format (default: human-readable, "json" for the snapshot)
        #[arg(long)]
        format: Option<String>,
    },
    /// Resolve compiler optimization flags for a microarchitecture
    Flags {
        /// Microarchitecture name (default: the detected host)
        name: Option<String>,
        /// Compiler name (e.g. gcc, clang, intel)
        #[arg(long)]
        compiler: String,
        /// Compiler version (dot-separated digits)
        #[arg(long)]
        version: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let catalog = Catalog::shared()?;

    match cli.command {
        Commands::Cpu => {
            println!("{}", detect::host_with(catalog));
        }

        Commands::List { family } => {
            for node in catalog.iter() {
                if let Some(family) = &family {
                    if node.family().name() != family {
                        continue;
                    }
                }
                println!("{}", node.name());
            }
        }

        Commands::Describe { name, format } => {
            let node = catalog
                .get(&name)
                .with_context(|| format!("unknown microarchitecture '{name}'"))?;
            match format.as_deref() {
                None => print!("{}", describe(node)),
                Some("json") => {
                    println!("{}", serde_json::to_string_pretty(&node.snapshot())?)
                }
                Some(other) => anyhow::bail!("unknown format '{other}' (expected 'json')"),
            }
        }

        Commands::Flags {
            name,
            compiler,
            version,
        } => {
            let node = match name {
                Some(name) => Arc::clone(
                    catalog
                        .get(&name)
                        .with_context(|| format!("unknown microarchitecture '{name}'"))?,
                ),
                None => detect::host_with(catalog),
            };
            let rendered = flags::render(&node, &compiler, &version)?;
            if let Some(warning) = rendered.warning {
                eprintln!("warning: {warning}");
            }
            println!("{}", rendered.flags);
        }
    }

    Ok(())
}

/// Human-readable description of a node.
fn describe(node: &Microarchitecture) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "name:       {}", node.name());
    let _ = writeln!(out, "vendor:     {}", node.vendor());
    let _ = writeln!(out, "family:     {}", node.family().name());
    let _ = writeln!(out, "generic:    {}", node.generic().name());
    if node.generation() != 0 {
        let _ = writeln!(out, "generation: {}", node.generation());
    }
    let features: Vec<String> = node.inherited_features().into_iter().collect();
    let _ = writeln!(out, "features:   {}", features.join(" "));
    let _ = writeln!(out, "ancestry:");
    for line in node.tree().lines() {
        let _ = writeln!(out, "    {line}");
    }
    out
}
