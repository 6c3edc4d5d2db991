//! `sweepflow` command line: run, plan and sweep pipelines, verify journals

use anyhow::{anyhow, Context};
use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use sweepflow_kernel::config::{EngineSettings, Pipeline};
use sweepflow_kernel::engine::Engine;
use sweepflow_kernel::graph::DependencyGraph;
use sweepflow_kernel::journal;
use sweepflow_kernel::logging::{self, LogFormat};
use sweepflow_kernel::report::RunReport;
use sweepflow_kernel::rule::ScriptRef;
use sweepflow_kernel::scheduler::CancelHandle;
use sweepflow_kernel::sweep::{MigrationSweep, DEFAULT_MIGRATION, DEFAULT_OUTPUT_ROOT};
use sweepflow_kernel::{exit_codes, KernelError};
use tracing::{info, warn};

fn jobs_arg() -> Arg {
    Arg::new("jobs")
        .short('j')
        .long("jobs")
        .value_parser(value_parser!(usize))
        .help("Maximum scripts running at once (default: available parallelism)")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print the report as JSON")
}

fn journal_arg() -> Arg {
    Arg::new("journal")
        .long("journal")
        .value_parser(value_parser!(PathBuf))
        .help("Write the transition journal to this file (JSON lines)")
}

fn stamps_arg() -> Arg {
    Arg::new("stamps")
        .long("stamps")
        .action(ArgAction::SetTrue)
        .help("Require completion stamps for cache hits")
}

fn list_arg(id: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .num_args(1..)
        .action(ArgAction::Append)
        .help(help)
}

fn cli() -> Command {
    Command::new("sweepflow")
        .version(sweepflow_kernel::VERSION)
        .about("Declarative rule orchestration for parameterized simulation pipelines")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v debug, -vv trace)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(PossibleValuesParser::new(["text", "json"]))
                .help("Log output format"),
        )
        .subcommand(
            Command::new("run")
                .about("Build the pipeline graph and execute it")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline file (.yaml, .yml or .toml)"),
                )
                .arg(jobs_arg())
                .arg(json_arg())
                .arg(journal_arg())
                .arg(stamps_arg()),
        )
        .subcommand(
            Command::new("plan")
                .about("Show which rules would run, without executing anything")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline file (.yaml, .yml or .toml)"),
                )
                .arg(json_arg())
                .arg(stamps_arg()),
        )
        .subcommand(
            Command::new("sweep")
                .about("Run the migration sweep: evolution models crossed with DTD triples")
                .arg(
                    Arg::new("script")
                        .long("script")
                        .required(true)
                        .help("Command that runs one simulation, e.g. 'python scripts/migration.py'"),
                )
                .arg(list_arg("evolution", "Star formation history models").required(true))
                .arg(list_arg("dtd", "DTD kinds, parallel to --dtd-params and --dtd-name").required(true))
                .arg(list_arg("dtd-params", "DTD parameter strings, e.g. slope=-1.1").required(true))
                .arg(list_arg("dtd-name", "Output name fragments, e.g. powerlaw_slope11").required(true))
                .arg(
                    Arg::new("migration")
                        .long("migration")
                        .default_value(DEFAULT_MIGRATION)
                        .help("Radial migration model"),
                )
                .arg(
                    Arg::new("nstars")
                        .long("nstars")
                        .default_value("2")
                        .value_parser(value_parser!(u64))
                        .help("Star particles per zone per timestep"),
                )
                .arg(
                    Arg::new("minimum-delay")
                        .long("minimum-delay")
                        .default_value("0.04")
                        .value_parser(value_parser!(f64))
                        .help("Minimum SN Ia delay time in Gyr"),
                )
                .arg(
                    Arg::new("output-root")
                        .long("output-root")
                        .default_value(DEFAULT_OUTPUT_ROOT)
                        .help("Directory the .vice outputs are written under"),
                )
                .arg(
                    Arg::new("conda")
                        .long("conda")
                        .help("Conda environment to run the script in"),
                )
                .arg(
                    Arg::new("working-dir")
                        .long("working-dir")
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory scripts run in"),
                )
                .arg(
                    Arg::new("no-force")
                        .long("no-force")
                        .action(ArgAction::SetTrue)
                        .help("Do not pass -f to the script"),
                )
                .arg(
                    Arg::new("cache")
                        .long("cache")
                        .action(ArgAction::SetTrue)
                        .help("Skip combinations whose output already exists"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show the plan without executing"),
                )
                .arg(jobs_arg())
                .arg(json_arg())
                .arg(journal_arg())
                .arg(stamps_arg()),
        )
        .subcommand(
            Command::new("verify-journal")
                .about("Verify the hash chain of a transition journal")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Journal file written by --journal"),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let verbosity = matches.get_count("verbose");
    let format = matches
        .get_one::<String>("log-format")
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();
    if let Err(e) = logging::init_tracing(format, verbosity) {
        eprintln!("warning: {e:#}");
    }

    let result = match matches.subcommand() {
        Some(("run", args)) => cmd_run(args).await,
        Some(("plan", args)) => cmd_plan(args),
        Some(("sweep", args)) => cmd_sweep(args).await,
        Some(("verify-journal", args)) => cmd_verify_journal(args),
        _ => {
            let _ = cli().print_help();
            Ok(exit_codes::CONFIG_ERROR)
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            e.downcast_ref::<KernelError>()
                .map_or(exit_codes::CONFIG_ERROR, KernelError::exit_code)
        }
    };
    std::process::exit(code);
}

fn path_arg<'a>(args: &'a ArgMatches, id: &str) -> anyhow::Result<&'a PathBuf> {
    args.get_one::<PathBuf>(id)
        .ok_or_else(|| anyhow!("--{id} is required"))
}

fn load_pipeline(args: &ArgMatches) -> anyhow::Result<Pipeline> {
    let path = path_arg(args, "file")?;
    Pipeline::load(path)
        .map_err(KernelError::from)
        .with_context(|| format!("loading pipeline '{}'", path.display()))
}

fn apply_overrides(mut settings: EngineSettings, args: &ArgMatches) -> EngineSettings {
    if let Some(jobs) = args.try_get_one::<usize>("jobs").ok().flatten() {
        settings.max_concurrency = *jobs;
    }
    if args.get_flag("stamps") {
        settings.stamps = true;
    }
    settings
}

/// Ctrl-C stops new dispatch; running scripts are left to finish
fn install_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, no new rules will start");
            handle.cancel();
        }
    });
}

fn emit_run(report: &RunReport, args: &ArgMatches) -> anyhow::Result<i32> {
    if let Some(path) = args.get_one::<PathBuf>("journal") {
        journal::write_jsonl(path, &report.journal)
            .map_err(KernelError::from)
            .with_context(|| format!("writing journal '{}'", path.display()))?;
        info!(path = %path.display(), entries = report.journal.len(), "journal written");
    }
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.generate_text());
    }
    Ok(report.exit_code())
}

async fn cmd_run(args: &ArgMatches) -> anyhow::Result<i32> {
    let pipeline = load_pipeline(args)?;
    let engine = Engine::new(apply_overrides(pipeline.settings.clone(), args));
    install_ctrl_c(engine.cancel_handle());
    let report = engine.run(&pipeline.rules).await?;
    emit_run(&report, args)
}

fn cmd_plan(args: &ArgMatches) -> anyhow::Result<i32> {
    let pipeline = load_pipeline(args)?;
    let engine = Engine::new(apply_overrides(pipeline.settings.clone(), args));
    let plan = engine.plan(&pipeline.rules)?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", plan.generate_text());
    }
    Ok(exit_codes::SUCCESS)
}

fn migration_sweep(args: &ArgMatches) -> anyhow::Result<MigrationSweep> {
    let line = args
        .get_one::<String>("script")
        .ok_or_else(|| anyhow!("--script is required"))?;
    let script = ScriptRef::parse(line).ok_or_else(|| anyhow!("--script must name a program"))?;
    let strings = |id: &str| -> Vec<String> {
        args.get_many::<String>(id)
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    };

    let mut sweep = MigrationSweep::new(script)
        .with_evolutions(strings("evolution"))
        .with_force(!args.get_flag("no-force"))
        .with_cache(args.get_flag("cache"));
    sweep.dtd_kinds = strings("dtd");
    sweep.dtd_params = strings("dtd-params");
    sweep.dtd_names = strings("dtd-name");
    if let Some(migration) = args.get_one::<String>("migration") {
        sweep.migration = migration.clone();
    }
    if let Some(root) = args.get_one::<String>("output-root") {
        sweep.output_root = root.clone();
    }
    if let Some(nstars) = args.get_one::<u64>("nstars") {
        sweep.nstars = *nstars;
    }
    if let Some(delay) = args.get_one::<f64>("minimum-delay") {
        sweep.minimum_delay = *delay;
    }
    sweep.env = args.get_one::<String>("conda").cloned();
    Ok(sweep)
}

async fn cmd_sweep(args: &ArgMatches) -> anyhow::Result<i32> {
    let sweep = migration_sweep(args)?;
    let instances = sweep.instances().map_err(KernelError::from)?;
    let graph = DependencyGraph::build(instances).map_err(KernelError::from)?;
    info!(instances = graph.len(), "migration sweep expanded");

    let mut settings = EngineSettings::new();
    if let Some(dir) = args.get_one::<PathBuf>("working-dir") {
        settings = settings.with_working_dir(dir.clone());
    }
    let engine = Engine::new(apply_overrides(settings, args));

    if args.get_flag("dry-run") {
        let plan = engine.plan_graph(&graph)?;
        if args.get_flag("json") {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print!("{}", plan.generate_text());
        }
        return Ok(exit_codes::SUCCESS);
    }

    install_ctrl_c(engine.cancel_handle());
    let report = engine.run_graph(graph).await?;
    emit_run(&report, args)
}

fn cmd_verify_journal(args: &ArgMatches) -> anyhow::Result<i32> {
    let path = path_arg(args, "path")?;
    let events = journal::read_jsonl(path)
        .map_err(KernelError::from)
        .with_context(|| format!("reading journal '{}'", path.display()))?;
    match journal::verify_chain(&events) {
        Ok(()) => {
            println!("journal OK: {} entries", events.len());
            Ok(exit_codes::SUCCESS)
        }
        Err(e) => {
            println!("journal INVALID: {e}");
            Ok(exit_codes::NODE_FAILED)
        }
    }
}
