//! buildflow — command-line entry point for the build orchestrator.

mod display;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use buildflow_core::artifacts;
use buildflow_core::config::{parse_config_yaml, sample_config, BuildConfig};
use buildflow_core::runner::ShellRunner;
use buildflow_core::{Engine, EngineOptions, ExecutionMode, GraphBuilder, NodeRegistry};

#[derive(Parser, Debug)]
#[command(name = "buildflow", version, about = "Declarative build orchestrator")]
struct Cli {
    /// Target to build (defaults to the config's default_target)
    #[arg(long, conflicts_with_all = ["validate", "display"])]
    target: Option<String>,

    /// Validate the configuration and graph without executing commands
    #[arg(long)]
    validate: bool,

    /// Print the target tree for the named target (implies --validate)
    #[arg(long, value_name = "NAME")]
    display: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "buildflow.yaml")]
    config: PathBuf,

    /// Capture command output to log files only
    #[arg(long, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,

    /// Informational logging
    #[arg(long, conflicts_with = "debug")]
    verbose: bool,

    /// Full debug logging
    #[arg(long)]
    debug: bool,

    /// Walk the graph without executing; nodes finish as dry-run
    #[arg(long)]
    dry_run: bool,

    /// Comma-separated node names that report failure without executing
    #[arg(long, value_name = "CSV")]
    simulate_failure: Option<String>,

    /// Print a starting configuration and exit
    #[arg(long)]
    generate_sample_config: bool,

    /// Print the execution order (validate pass) and exit
    #[arg(long)]
    print_build_order: bool,

    /// Print the execution order as JSON and exit
    #[arg(long)]
    print_build_order_json: bool,

    /// Suppress the end-of-run summary
    #[arg(long, conflicts_with = "summary")]
    no_summary: bool,

    /// Force the end-of-run summary even in quiet mode
    #[arg(long)]
    summary: bool,

    /// List declared targets and exit
    #[arg(long)]
    list_targets: bool,

    /// Check the conditional notification graph and exit
    #[arg(long)]
    validate_notification_graph: bool,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .init();

    match run(cli).await {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    if cli.generate_sample_config {
        print!("{}", sample_config());
        return Ok(true);
    }

    let yaml = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let config = parse_config_yaml(&yaml)?;

    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        return Err(anyhow!("{} configuration error(s)", errors.len()));
    }

    if cli.list_targets {
        list_targets(&config);
        return Ok(true);
    }

    let root = cli
        .target
        .clone()
        .or_else(|| cli.display.clone())
        .or_else(|| config.default_target.clone())
        .ok_or_else(|| anyhow!("no target given and no default_target configured"))?;

    let mut registry = NodeRegistry::new();
    let root_id = GraphBuilder::new(&config, &mut registry).build(&root, None)?;

    if cli.validate_notification_graph {
        display::print_notification_graph(&registry);
        return Ok(true);
    }

    if cli.display.is_some() {
        display::print_tree(&registry, root_id);
        return Ok(true);
    }

    let mode = if cli.validate || cli.print_build_order || cli.print_build_order_json {
        ExecutionMode::Validate
    } else if cli.dry_run {
        ExecutionMode::DryRun
    } else {
        ExecutionMode::Real
    };

    let simulate_failures: HashSet<String> = cli
        .simulate_failure
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let options = EngineOptions {
        mode,
        quiet: cli.quiet,
        build_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        simulate_failures,
    };
    let mut engine = Engine::new(registry, Arc::new(ShellRunner), options);

    // A configured pre-flight pass walks the whole graph in validate mode
    // before anything executes for real.
    if config.validate_on_build && mode == ExecutionMode::Real {
        engine.set_mode(ExecutionMode::Validate);
        let preflight = engine.run(&root, &BTreeMap::new()).await?;
        if !preflight.success() {
            display::print_summary(&preflight);
            return Ok(false);
        }
        engine.set_mode(ExecutionMode::Real);
    }

    let report = engine.run(&root, &BTreeMap::new()).await?;

    if cli.print_build_order_json {
        println!("{}", display::build_order_json(&report)?);
        return Ok(report.success());
    }
    if cli.print_build_order {
        display::print_build_order(&report);
        return Ok(report.success());
    }

    if mode == ExecutionMode::Real && report.success() {
        run_artifact_stage(&config, &root, engine.registry())?;
    }

    let show_summary = cli.summary || (!cli.no_summary && !cli.quiet);
    if show_summary {
        display::print_summary(&report);
    }

    Ok(report.success())
}

fn list_targets(config: &BuildConfig) {
    for task in &config.tasks {
        println!("task      {}", task.name);
    }
    for platform in &config.platforms {
        println!("platform  {}", platform.name);
    }
    for name in config.build_groups.keys() {
        println!("group     {name}");
    }
}

/// Collection, archiving, and retention cleanup after a successful build.
fn run_artifact_stage(
    config: &BuildConfig,
    target: &str,
    registry: &NodeRegistry,
) -> Result<()> {
    let Some(artifact_config) = &config.artifacts else {
        return Ok(());
    };

    let collected = artifacts::collect_artifacts(registry)?;
    let archives_dir = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("archives");
    artifacts::archive_artifacts(artifact_config, target, &collected, &archives_dir)?;

    if artifact_config.cleanup_enabled {
        if let Some(retention) = &artifact_config.retention {
            artifacts::cleanup_archives(retention, &archives_dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_conflicts_with_validate() {
        let result = Cli::try_parse_from(["buildflow", "--target", "x", "--validate"]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["buildflow", "--target", "x", "--display", "y"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbosity_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["buildflow", "--quiet", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["buildflow", "--verbose", "--debug"]).is_err());
    }

    #[test]
    fn test_log_filter_mapping() {
        let cli = Cli::try_parse_from(["buildflow", "--debug"]).unwrap();
        assert_eq!(cli.log_filter(), "debug");
        let cli = Cli::try_parse_from(["buildflow", "--verbose"]).unwrap();
        assert_eq!(cli.log_filter(), "info");
        let cli = Cli::try_parse_from(["buildflow", "--quiet"]).unwrap();
        assert_eq!(cli.log_filter(), "error");
        let cli = Cli::try_parse_from(["buildflow"]).unwrap();
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["buildflow"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("buildflow.yaml"));
        assert!(cli.target.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_simulate_failure_csv() {
        let cli =
            Cli::try_parse_from(["buildflow", "--simulate-failure", "a, b ,c"]).unwrap();
        assert_eq!(cli.simulate_failure.as_deref(), Some("a, b ,c"));
    }
}
