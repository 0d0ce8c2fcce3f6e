//! ai-gateway: 网关配置检查与存储探测的命令行工具
//!
//! Usage:
//!   ai-gateway check-config <file>     Load and validate a config file
//!   ai-gateway probe [<file>]          Run the store probe and print gateway status
//!   ai-gateway version                 Show version information

use ai_gateway_rust::gateway::GatewayBuilder;
use ai_gateway_rust::telemetry::init_tracing;
use ai_gateway_rust::GatewayConfig;
use anyhow::Context;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    init_tracing("warn");

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "check-config" => cmd_check_config(&args[2..]),
        "probe" => cmd_probe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"ai-gateway: AI 请求网关命令行工具

USAGE:
    ai-gateway <COMMAND> [ARGS]

COMMANDS:
    check-config <file>     Load a YAML config, apply environment overrides, validate it
                            and print the effective configuration
    probe [<file>]          Run the store capability probe and print a status snapshot as JSON
    version                 Show version information
    help                    Show this help message

ENVIRONMENT:
    AI_GATEWAY_REDIS_URL, AI_GATEWAY_DAILY_LIMIT_USD, AI_GATEWAY_RATE_LIMIT_MAX,
    AI_GATEWAY_RATE_LIMIT_WINDOW_MS, AI_GATEWAY_PROVIDER_BASE_URL,
    AI_GATEWAY_PROVIDER_MODEL, AI_GATEWAY_PROVIDER_API_KEY, AI_GATEWAY_HTTP_TIMEOUT_SECS
    RUST_LOG                Log filter (default: warn)"#
    );
}

fn cmd_version() {
    println!("ai-gateway {}", env!("CARGO_PKG_VERSION"));
}

fn load_config(path: Option<&String>) -> anyhow::Result<GatewayConfig> {
    let path = path.map(PathBuf::from);
    GatewayConfig::load(path.as_deref()).with_context(|| match &path {
        Some(p) => format!("invalid configuration in {}", p.display()),
        None => "invalid configuration".to_string(),
    })
}

fn cmd_check_config(args: &[String]) -> anyhow::Result<()> {
    let Some(file) = args.first() else {
        anyhow::bail!("check-config requires a config file path");
    };
    let cfg = load_config(Some(file))?;
    println!("Configuration OK: {file}");
    println!();
    print!("{}", cfg.to_yaml_string()?);
    Ok(())
}

async fn cmd_probe(args: &[String]) -> anyhow::Result<()> {
    let cfg = load_config(args.first())?;
    let gateway = GatewayBuilder::from_config(&cfg)?.build().await;
    let status = gateway.status();
    println!("store mode: {:?}", status.store_mode);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
