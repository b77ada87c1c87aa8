//! xrefbind CLI tool
//!
//! ## Commands
//!
//! - `resolve --config <toml> <uid>...`: resolve uids against the configured catalogs and
//!   reference packages, printing one line per uid
//! - `verify <manifest> <output_dir>`: re-hash every output recorded in a manifest

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xrefbind::{
    config::BuildConfig,
    context::BuildContext,
    manifest::{Manifest, VerifyIssue},
    source::SourceRegistry,
    xref::ResolutionState,
};

#[derive(Parser)]
#[command(name = "xrefbind")]
#[command(author, version, about = "Resolve cross references and verify build manifests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve uids against the configured catalogs and packages
    Resolve {
        /// Configuration file path
        #[arg(short, long, default_value = "xrefbind.toml")]
        config: PathBuf,

        /// Print the full resolved spec as JSON
        #[arg(long)]
        json: bool,

        /// Uids to resolve
        #[arg(required = true)]
        uids: Vec<String>,
    },

    /// Check that every output recorded in a manifest exists and matches its hash
    Verify {
        /// Path to the manifest JSON file
        manifest: PathBuf,

        /// Output directory the manifest paths are relative to
        output_dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve { config, json, uids } => {
            let config = BuildConfig::load(&config)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let ctx = runtime.block_on(BuildContext::from_config(
                &config,
                SourceRegistry::default(),
            ))?;

            let mut unresolved = 0;
            for uid in uids.iter() {
                let spec = ctx.get_xref_spec(uid);
                let source = match ctx.xref_state(uid) {
                    Some(ResolutionState::Internal(_)) => "internal",
                    Some(ResolutionState::ExternalResolved(_)) => "external",
                    Some(ResolutionState::Unknown) | None => "unknown",
                };
                match spec {
                    Some(spec) if json => println!("{}", serde_json::to_string(&spec)?),
                    Some(spec) => println!(
                        "{}\t{}\t{}\t{}",
                        uid,
                        source,
                        spec.href().unwrap_or("-"),
                        spec.display_text("name", &config.display_language)
                    ),
                    None => {
                        unresolved += 1;
                        println!("{uid}\t{source}\t-\t-");
                    }
                }
            }
            tracing::info!("{}", ctx.resolver().stats());
            if unresolved > 0 {
                eprintln!("Error: {unresolved} of {} uids could not be resolved", uids.len());
                std::process::exit(1);
            }
        }
        Commands::Verify {
            manifest,
            output_dir,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let issues = manifest.verify(&output_dir)?;
            for issue in issues.iter() {
                match issue {
                    VerifyIssue::Missing { relative_path } => {
                        println!("missing\t{relative_path}")
                    }
                    VerifyIssue::HashMismatch {
                        relative_path,
                        expected,
                        actual,
                    } => println!("changed\t{relative_path}\texpected {expected}\tfound {actual}"),
                }
            }
            let outputs: usize = manifest.files.iter().map(|item| item.output.len()).sum();
            if !issues.is_empty() {
                eprintln!("Error: {} of {} outputs failed verification", issues.len(), outputs);
                std::process::exit(1);
            }
            println!("{outputs} outputs verified");
        }
    }
    Ok(())
}
