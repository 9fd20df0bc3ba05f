use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use meshtrace_config::{
    MeshtraceConfig,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration as JSON.
    Show,
}

pub fn handle_config(action: &ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, *verbose),
        ConfigAction::Show => show(path),
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn show(path: Option<&Path>) -> Result<()> {
    let config: MeshtraceConfig = match path {
        Some(path) => meshtrace_config::load_config(path)?,
        None => meshtrace_config::discover_and_load(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    eprintln!("data dir:   {}", config.data_dir().display());
    eprintln!("export dir: {}", config.export_dir().display());
    Ok(())
}
