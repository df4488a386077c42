use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    // Bare numbers are seconds.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))
}

fn parse_positive(input: &str) -> Result<u64, String> {
    match input.trim().parse::<u64>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(v) => Ok(v),
        Err(_) => Err(format!("invalid number '{input}'")),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary line to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "volley",
    author,
    version,
    about = "Declarative HTTP load generator",
    long_about = "volley drives virtual users through a declarative YAML scenario, ramps concurrency through configured stages, and gates the run on thresholds.\n\nThe process environment is visible to scenario templates as ${env.NAME}; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  volley run scenarios/smoke.yaml\n  volley run scenarios/load.yaml --max-vus 200\n  volley run scenarios/smoke.yaml --vus 20 --duration 1m --output json\n  volley run scenarios/borrow.yaml --base-url http://127.0.0.1:8080\n\nExit codes: 0 ok, 11 thresholds failed, 12 aborted by threshold, 13 setup failed, 30 invalid input, 40 runtime error, 130 interrupted."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test scenario
    #[command(
        long_about = "Run a YAML scenario.\n\nCLI flags override values from the scenario file. Passing --vus or --duration switches a staged scenario to a fixed number of VUs."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario (.yaml)
    pub scenario: PathBuf,

    /// Fixed number of virtual users
    #[arg(long, value_parser = parse_positive)]
    pub vus: Option<u64>,

    /// Test duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Upper bound on concurrently running VUs (defaults to the peak target)
    #[arg(long, value_parser = parse_positive)]
    pub max_vus: Option<u64>,

    /// Base URL for relative request paths (overrides BASE_URL and the scenario file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Seed for `choose` and randomized `sleep` (random when omitted; printed in the summary)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Add/override env vars visible to the scenario (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Debug-level engine logs on stderr (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,
}

impl RunArgs {
    pub fn overrides(&self) -> volley_core::RunOverrides {
        volley_core::RunOverrides {
            vus: self.vus,
            duration: self.duration,
            max_vus: self.max_vus,
            base_url: self.base_url.clone(),
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn zero_vus_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["volley", "run", "s.yaml", "--vus", "0"]).is_err());
        assert!(Cli::try_parse_from(["volley", "run", "s.yaml", "--max-vus", "0"]).is_err());
    }

    #[test]
    fn cli_parses_run_overrides() {
        let parsed = Cli::try_parse_from([
            "volley",
            "run",
            "load.yaml",
            "--vus",
            "2",
            "--duration",
            "250ms",
            "--max-vus",
            "8",
            "--base-url",
            "http://127.0.0.1:9000",
            "--seed",
            "42",
            "--env",
            "FOO=bar",
            "--env",
            "EMPTY=",
            "--output",
            "json",
            "-v",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        let Command::Run(args) = cli.command;
        assert_eq!(args.scenario, PathBuf::from("load.yaml"));
        assert_eq!(args.env, vec!["FOO=bar".to_string(), "EMPTY=".to_string()]);
        assert!(matches!(args.output, OutputFormat::Json));
        assert!(args.verbose);

        let o = args.overrides();
        assert_eq!(o.vus, Some(2));
        assert_eq!(o.duration, Some(Duration::from_millis(250)));
        assert_eq!(o.max_vus, Some(8));
        assert_eq!(o.base_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(o.seed, Some(42));
    }
}
