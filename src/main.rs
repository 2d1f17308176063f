use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rom_tracker::build_context;
use rom_tracker::clinical::Movement;
use rom_tracker::config::Config;
use rom_tracker::pose::{RawFrame, Schema, Side};
use rom_tracker::synthetic::SyntheticTestCase;
use rom_tracker::validation::ValidationPipeline;

const CONFIG_PATH: &str = "config.toml";

#[derive(Parser)]
#[command(name = "rom-tracker", version, long_version = env!("GIT_VERSION"))]
#[command(about = "Clinical range-of-motion measurement from body landmarks")]
struct Cli {
    /// 設定ファイル (無ければデフォルト値)
    #[arg(short, long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the synthetic accuracy battery and print a JSON report
    Validate {
        /// Movements to sweep (default: all)
        #[arg(short, long, value_parser = parse_movement)]
        movement: Vec<Movement>,
        /// Sides to sweep (default: left and right)
        #[arg(short, long, value_parser = parse_side)]
        side: Vec<Side>,
        /// Annotated ground-truth cases (JSON array or single case) instead of
        /// the generated battery
        #[arg(long)]
        ground_truth: Option<PathBuf>,
        /// Landmark layout for generated cases
        #[arg(long, value_parser = parse_schema)]
        schema: Option<Schema>,
        /// Skip injected-fault cases
        #[arg(long)]
        no_faults: bool,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Exit with an error when the acceptance threshold is missed
        #[arg(long)]
        strict: bool,
    },
    /// Load and validate the configuration, then print the active thresholds
    CheckConfig,
    /// Feed JSON-lines raw frames through a processing context
    Replay {
        /// One RawFrame JSON object per line ("-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: String,
        #[arg(short, long, value_parser = parse_movement)]
        movement: Movement,
        #[arg(short, long, value_parser = parse_side, default_value = "left")]
        side: Side,
    },
}

fn parse_movement(s: &str) -> std::result::Result<Movement, String> {
    Movement::ALL
        .into_iter()
        .find(|m| m.as_str() == s)
        .ok_or_else(|| {
            let names: Vec<_> = Movement::ALL.iter().map(|m| m.as_str()).collect();
            format!("unknown movement '{}' (expected one of: {})", s, names.join(", "))
        })
}

fn parse_side(s: &str) -> std::result::Result<Side, String> {
    match s {
        "left" | "l" => Ok(Side::Left),
        "right" | "r" => Ok(Side::Right),
        "bilateral" | "both" => Ok(Side::Bilateral),
        _ => Err(format!("unknown side '{}'", s)),
    }
}

fn parse_schema(s: &str) -> std::result::Result<Schema, String> {
    Schema::from_tag(s).map_err(|e| e.to_string())
}

fn load_cases(path: &Path) -> Result<Vec<SyntheticTestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if let Ok(cases) = serde_json::from_str::<Vec<SyntheticTestCase>>(&content) {
        return Ok(cases);
    }
    let case: SyntheticTestCase = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a test case or a list of test cases", path.display()))?;
    Ok(vec![case])
}

fn emit(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Validate {
            movement,
            side,
            ground_truth,
            schema,
            no_faults,
            output,
            strict,
        } => {
            if let Some(schema) = schema {
                config.validation.schema = schema;
            }
            let pipeline = ValidationPipeline::new(&config);
            let report = match ground_truth {
                Some(path) => pipeline.run_cases(&load_cases(&path)?),
                None => {
                    let movements = if movement.is_empty() {
                        Movement::ALL.to_vec()
                    } else {
                        movement
                    };
                    let sides = if side.is_empty() {
                        vec![Side::Left, Side::Right]
                    } else {
                        side
                    };
                    let requests = if no_faults {
                        ValidationPipeline::sweep(&movements, &sides)
                    } else {
                        pipeline.battery(&movements, &sides)
                    };
                    pipeline.run(&requests)?
                }
            };
            emit(&serde_json::to_string_pretty(&report)?, output.as_deref())?;
            if strict && !report.meets_acceptance {
                bail!(
                    "pass rate {:.1}% below required {:.1}%",
                    report.metrics.pass_rate * 100.0,
                    config.validation.min_pass_rate * 100.0
                );
            }
        }
        Commands::CheckConfig => {
            println!("config: {}", cli.config.display());
            println!("thresholds v{}:", config.thresholds.version);
            for (kind, t) in &config.thresholds.entries {
                println!(
                    "  {:<22} warning {:>6.2}  critical {:>6.2}  [{}]",
                    kind, t.warning, t.critical, t.unit
                );
            }
            println!("targets:");
            for m in Movement::ALL {
                println!("  {:<22} {:>6.1}°", m, config.measurement.target(m));
            }
            println!("OK");
        }
        Commands::Replay {
            input,
            movement,
            side,
        } => {
            let reader: Box<dyn BufRead> = if input == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let file = fs::File::open(&input)
                    .with_context(|| format!("failed to open {}", input))?;
                Box::new(BufReader::new(file))
            };

            let mut ctx = build_context(&config);
            ctx.set_movement(movement, side);
            let stdout = io::stdout();
            let mut out = stdout.lock();

            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let raw: RawFrame = serde_json::from_str(&line)
                    .with_context(|| format!("line {}: invalid frame", n + 1))?;
                match ctx.ingest(&raw) {
                    Ok(report) => writeln!(out, "{}", serde_json::to_string(&report)?)?,
                    Err(e) => tracing::warn!("line {}: frame discarded: {}", n + 1, e),
                }
            }

            let repetition = ctx.complete_repetition();
            let summary = serde_json::json!({
                "repetition": repetition,
                "prioritized": ctx.prioritized_compensations(),
            });
            writeln!(out, "{}", serde_json::to_string(&summary)?)?;
        }
    }

    Ok(())
}
