//! policychain CLI — validate and run policy chain configurations.
//!
//! Usage:
//! ```bash
//! # Check a chain file and print its policy order
//! policychain validate --config chain.yaml
//!
//! # Run one payload through the chain against the echo operation
//! policychain run --config chain.yaml --payload '{"order": 42}'
//!
//! # List built-in policy kinds
//! policychain policies
//! ```

mod tracing_setup;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use policychain_core::{ChainFactory, ExecutionContext};
use policychain_policies::{ChainConfig, EchoOperation, HandlerRegistry, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]),
        "policies" => {
            cmd_policies();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("policychain {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("policychain {}", env!("CARGO_PKG_VERSION"));
    println!("Compose and run ordered policy chains\n");
    println!("USAGE:");
    println!("    policychain <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run        Execute one payload through a configured chain");
    println!("    validate   Load, validate and compose a chain file");
    println!("    policies   List built-in policy kinds");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --config <FILE>    Chain file (.yaml/.yml or .json)  [required]");
    println!("    --payload <JSON>   Request payload for `run`  [default: {{}}]");
}

fn load_config(args: &[String]) -> Result<ChainConfig> {
    let path = parse_flag(args, "--config").ok_or_else(|| anyhow!("--config is required"))?;
    ChainConfig::load(&path).with_context(|| format!("loading {path}"))
}

async fn cmd_run(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    tracing_setup::init_tracing(&config.log);

    let payload = match parse_flag(args, "--payload") {
        Some(raw) => serde_json::from_str(&raw).context("--payload is not valid JSON")?,
        None => serde_json::json!({}),
    };

    let factory = ChainFactory::default();
    let chain = config.build(&HandlerRegistry::with_builtins(), Arc::new(EchoOperation), &factory)?;

    let ctx = ExecutionContext::new(payload);
    println!("Execution {}", ctx.id);
    match chain.execute(ctx).await {
        Ok(out) => {
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Err(e) => Err(anyhow!("{}", e.report())),
    }
}

fn cmd_validate(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    tracing_setup::init_tracing(&LogConfig {
        level: "warn".into(),
        ..config.log.clone()
    });

    let chain = config.build(
        &HandlerRegistry::with_builtins(),
        Arc::new(EchoOperation),
        &ChainFactory::default(),
    )?;

    println!("Chain '{}' is valid ({} policies):", config.name, chain.len());
    for (position, policy) in chain.policies().iter().enumerate() {
        println!("  {position}. {:<16} {}", policy.id().as_str(), policy.kind());
    }
    Ok(())
}

fn cmd_policies() {
    println!("Built-in policy kinds:\n");
    for kind in HandlerRegistry::with_builtins().kinds() {
        let about = match kind {
            "circuit_breaker" => "Reject while downstream keeps failing (failure_threshold, open_duration_ms)",
            "logging" => "Log entry/exit with latency (level, include_payload)",
            "rate_limit" => "Token bucket throttling (capacity, refill_rate, cost, wait)",
            "retry" => "Exponential backoff retries (max_retries, initial_backoff_ms, multiplier)",
            "transform" => "Merge fields into request/response (request, response, attributes)",
            _ => "",
        };
        println!("  {kind:<16} {about}");
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
