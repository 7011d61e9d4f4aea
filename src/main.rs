//! Automata search CLI - Evolve cellular-automaton rules from the command line.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use automata_search::{
    compute::{
        Rule, RuleError, RuleSpace,
        evolution::{SearchEngine, SearchError},
    },
    schema::{SearchConfig, SearchConfigError},
};

const USAGE: &str = "\
Usage: automata-search [search|sample|replay] [options]
       automata-search --example

Modes:
  search   Evolve a population of rules (default)
  sample   Score uniformly random rules, no evolution
  replay   Symmetrize a rule (-i or -f), write grid snapshots and score it

Options:
  --config <path>         JSON configuration (see --example)
  -n <states>             Number of cell states
  --horizon <h>           Neighborhood radius
  -s <size>               Grid side length
  -t <timesteps>          Simulation timestep budget
  -g <grain>              Snapshot interval in replay mode
  -z <count>              Generations (search) or rules (sample)
  -p <size>               Population size
  -d <children>           Children per parent
  -m <rate>               Mutation rate
  -i <rule>               Seed rule as a digit string
  -f <path>               Seed rule file
  -e, --no-early-stop     Keep simulating after a fixed point
  --seed <u64>            Random seed
  --timeout <secs>        Abort a single candidate evaluation after this long
  --data-root <dir>       Output directory (default: data_2d)";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("Error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Error parsing config: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] SearchConfigError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Search,
    Sample,
    Replay,
}

enum RuleInput {
    Inline(String),
    File(PathBuf),
}

struct Cli {
    mode: Mode,
    config: SearchConfig,
    count: Option<usize>,
    rule: Option<RuleInput>,
}

fn main() -> ExitCode {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().is_some_and(|a| a == "--example") {
        return match serde_json::to_string_pretty(&SearchConfig::default()) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    match parse_args(&args).and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("{}", msg);
            eprintln!();
            eprintln!("{}", USAGE);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Cli, CliError> {
    let mut rest = args;
    let mode = match rest.first().map(String::as_str) {
        Some("search") => Mode::Search,
        Some("sample") => Mode::Sample,
        Some("replay") => Mode::Replay,
        _ => Mode::Search,
    };
    if matches!(rest.first().map(String::as_str), Some("search" | "sample" | "replay")) {
        rest = &rest[1..];
    }

    // The config file is applied first so flags override it.
    let mut config = match rest.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = PathBuf::from(value(rest, i)?);
            let text = fs::read_to_string(&path).map_err(|source| CliError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text)?
        }
        None => SearchConfig::default(),
    };

    let mut count = None;
    let mut rule = None;
    let mut i = 0;
    while i < rest.len() {
        let flag = rest[i].as_str();
        let takes_value = !matches!(flag, "-e" | "--no-early-stop");
        match flag {
            "--config" => {}
            "-n" => config.automaton.states = parse(rest, i)?,
            "--horizon" => config.automaton.horizon = parse(rest, i)?,
            "-s" => config.automaton.size = parse(rest, i)?,
            "-t" => config.automaton.timesteps = parse(rest, i)?,
            "-g" => config.automaton.grain = parse(rest, i)?,
            "-z" => {
                let n: usize = parse(rest, i)?;
                config.population.generations = n;
                count = Some(n);
            }
            "-p" => config.population.size = parse(rest, i)?,
            "-d" => config.population.children = parse(rest, i)?,
            "-m" => config.population.mutation_rate = parse(rest, i)?,
            "-i" | "-f" => {
                if rule.is_some() {
                    return Err(CliError::Usage(
                        "Give only one input, either -i rule or -f rule_file".into(),
                    ));
                }
                let v = value(rest, i)?.to_string();
                rule = Some(if flag == "-i" {
                    RuleInput::Inline(v)
                } else {
                    RuleInput::File(PathBuf::from(v))
                });
            }
            "-e" | "--no-early-stop" => config.automaton.early_stop = false,
            "--seed" => config.random_seed = Some(parse(rest, i)?),
            "--timeout" => config.candidate_timeout_secs = Some(parse(rest, i)?),
            "--data-root" => config.data_root = PathBuf::from(value(rest, i)?),
            other => return Err(CliError::Usage(format!("Unknown argument: {}", other))),
        }
        i += if takes_value { 2 } else { 1 };
    }

    if mode == Mode::Replay && rule.is_none() {
        return Err(CliError::Usage("replay needs a rule (-i or -f)".into()));
    }

    Ok(Cli {
        mode,
        config,
        count,
        rule,
    })
}

fn value(args: &[String], i: usize) -> Result<&str, CliError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| CliError::Usage(format!("Missing value for {}", args[i])))
}

fn parse<T: std::str::FromStr>(args: &[String], i: usize) -> Result<T, CliError> {
    let raw = value(args, i)?;
    raw.parse()
        .map_err(|_| CliError::Usage(format!("Invalid value for {}: {}", args[i], raw)))
}

fn load_rule(space: &RuleSpace, input: &RuleInput) -> Result<Rule, CliError> {
    match input {
        RuleInput::Inline(digits) => Ok(Rule::parse(space, digits)?),
        RuleInput::File(path) => Ok(Rule::read_file(space, path)?),
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    cli.config.validate()?;
    let space = RuleSpace::from_config(&cli.config.automaton).map_err(SearchConfigError::from)?;
    let rule = cli
        .rule
        .as_ref()
        .map(|input| load_rule(&space, input))
        .transpose()?;

    let automaton = &cli.config.automaton;
    println!("Automata Search");
    println!("===============");
    println!(
        "States: {}, horizon: {}, grid: {}x{}, rule length: {}",
        automaton.states,
        automaton.horizon,
        automaton.size,
        automaton.size,
        space.size()
    );
    println!("Timesteps: {}", automaton.timesteps);
    println!();

    let count = cli.count.unwrap_or(cli.config.population.generations);
    let mut engine = SearchEngine::new(cli.config)?;

    match cli.mode {
        Mode::Search => {
            let summary = engine.run_with_callback(rule, |progress| {
                println!(
                    "  Generation {}/{}: lowest={:.6}, mean={:.6}, highest={:.6}, failed={}",
                    progress.generation + 1,
                    progress.total_generations,
                    progress.lowest_score,
                    progress.mean_score,
                    progress.highest_score,
                    progress.failures
                );
            })?;

            println!();
            println!("Stopped: {:?}", summary.stop_reason);
            println!("Seed: {}", summary.random_seed);
            println!("Genealogy: {}", summary.genealogy_path.display());
            println!("Results: {}", summary.results_path.display());
            println!(
                "Time: {:.2}s ({} evaluations, {} failed, {:.2} evaluations/s)",
                summary.elapsed_seconds,
                summary.total_evaluations,
                summary.failed_evaluations,
                summary.evaluations_per_second
            );
        }
        Mode::Sample => {
            for candidate in engine.sample_random(count)? {
                match &candidate.outcome {
                    Ok(_) => println!("{}\t{:.6}", candidate.fingerprint, candidate.score),
                    Err(e) => println!("{}\tfailed: {}", candidate.fingerprint, e),
                }
            }
        }
        Mode::Replay => {
            let Some(rule) = rule else {
                return Err(CliError::Usage("replay needs a rule (-i or -f)".into()));
            };
            let report = engine.replay(rule)?;
            println!("Fingerprint: {}", report.fingerprint);
            for session in &report.evaluation.sessions {
                println!(
                    "  Checkpoint {}: train={:.6}, test={:.6}",
                    session.checkpoint, session.errors.train, session.errors.test
                );
            }
            println!("Score: {:.6}", report.score);
            println!(
                "Snapshots: {} in {}",
                report.snapshots,
                report.steps_dir.display()
            );
        }
    }

    Ok(())
}
