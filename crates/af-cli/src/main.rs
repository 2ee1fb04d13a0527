//! AdFilter CLI
//!
//! Host-side tooling for the request filter core: replay recorded browsing
//! scenarios, inspect registrable domains and render the blocked-document
//! interstitial.

mod scenario;

use std::fs;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use af_core::interstitial::DocumentBlockedInterstitial;
use af_core::psl::{DomainRegistry, PrivateRegistries};
use af_core::types::RuleGroup;
use af_core::FilterConfig;

#[derive(Parser)]
#[command(name = "af-cli")]
#[command(about = "AdFilter request filter tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Filter timing configuration (JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Public Suffix List file, in public_suffix_list.dat format
    #[arg(long, global = true)]
    psl: Option<String>,

    /// Debug logging (RUST_LOG still applies per module)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a browsing scenario and print observer events and counters as JSON
    Replay {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: String,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Print the registrable domain of each host
    Domain {
        /// Hosts to look up
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Render the blocked-document interstitial
    Interstitial {
        /// Blocked document URL
        #[arg(short, long)]
        url: String,

        /// Rule group that blocked it (tracking, ad-blocking)
        #[arg(short, long, default_value = "ad-blocking")]
        group: RuleGroup,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match &cli.command {
        Commands::Replay { scenario, pretty } => cmd_replay(&cli, scenario, *pretty),
        Commands::Domain { hosts } => cmd_domain(&cli, hosts),
        Commands::Interstitial { url, group } => cmd_interstitial(url, *group),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_module("af_core", LevelFilter::Debug);
        builder.filter_module("af_cli", LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn load_config(cli: &Cli) -> Result<FilterConfig, String> {
    let Some(path) = &cli.config else {
        return Ok(FilterConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    FilterConfig::from_json(&text).map_err(|e| format!("'{}': {}", path, e))
}

fn load_domains(cli: &Cli) -> Result<DomainRegistry, String> {
    let Some(path) = &cli.psl else {
        return Ok(DomainRegistry::builtin());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    DomainRegistry::from_list_text(&text).map_err(|e| format!("'{}': {}", path, e))
}

fn cmd_replay(cli: &Cli, path: &str, pretty: bool) -> Result<(), String> {
    let config = load_config(cli)?;
    let domains = load_domains(cli)?;

    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    let scenario: scenario::Scenario =
        serde_json::from_str(&text).map_err(|e| format!("Invalid scenario '{}': {}", path, e))?;

    let report = scenario::replay(&scenario, config, domains)?;

    let json = if pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .map_err(|e| format!("Failed to serialize report: {}", e))?;

    println!("{json}");
    Ok(())
}

fn cmd_domain(cli: &Cli, hosts: &[String]) -> Result<(), String> {
    let domains = load_domains(cli)?;

    for host in hosts {
        let with_private = domains.registrable_domain(host, PrivateRegistries::Include);
        let without_private = domains.registrable_domain(host, PrivateRegistries::Exclude);
        println!(
            "{host}\t{}\t{}",
            if with_private.is_empty() { "-" } else { &with_private },
            if without_private.is_empty() { "-" } else { &without_private },
        );
    }

    Ok(())
}

fn cmd_interstitial(url: &str, group: RuleGroup) -> Result<(), String> {
    if url.is_empty() {
        return Err("URL must not be empty".to_string());
    }
    let page = DocumentBlockedInterstitial::new(url, group);
    print!("{}", page.html_contents());
    Ok(())
}
