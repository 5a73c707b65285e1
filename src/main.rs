use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shellflow_core::config::{ExecOptions, Shell};
use shellflow_core::types::{ExecutionResult, GraphReport, NodeState};
use shellflow_exec::registry::parse_signal;
use shellflow_exec::{CommandExecutor, ProcessRegistry, Scheduler};

#[derive(Parser)]
#[command(name = "shellflow", version, about = "Command graphs with auto-backgrounding")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single command
    Run {
        /// The command line to execute
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
        #[command(flatten)]
        flags: ExecFlags,
    },
    /// Execute a command graph from Shellflow text or structured JSON
    Dag {
        /// Graph in Shellflow text form ("a; {b & c}; d")
        flow: String,
        /// Interpret the graph argument as structured JSON instead of Shellflow text
        #[arg(long)]
        json_input: bool,
        #[command(flatten)]
        flags: ExecFlags,
    },
    /// Interactive session: run/dag plus ps/logs/kill against the live registry
    Repl,
}

#[derive(Args)]
struct ExecFlags {
    /// Treat a flat node list as one parallel group
    #[arg(long)]
    parallel: bool,
    /// Skip not-yet-started transitive dependents of a failed node
    #[arg(long)]
    strict: bool,
    /// Seconds before a running command is auto-backgrounded (0 disables)
    #[arg(long)]
    timeout: Option<i64>,
    /// Suppress stdout in immediate results
    #[arg(long)]
    quiet: bool,
    /// Working directory for spawned commands
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Extra environment, as KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    /// Interpreter: zsh (default), bash, sh, dash
    #[arg(long, value_parser = parse_shell)]
    shell: Option<Shell>,
    /// Emit the report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_shell(s: &str) -> Result<Shell, String> {
    s.parse::<Shell>().map_err(|e| e.to_string())
}

impl ExecFlags {
    fn to_options(&self) -> anyhow::Result<ExecOptions> {
        let mut options = ExecOptions {
            parallel: self.parallel,
            strict: self.strict,
            quiet: self.quiet,
            cwd: self.cwd.clone(),
            shell: self.shell,
            ..ExecOptions::default()
        };
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        for pair in &self.env {
            let (k, v) = pair
                .split_once('=')
                .with_context(|| format!("--env '{pair}' is not KEY=VALUE"))?;
            options.env.insert(k.to_string(), v.to_string());
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let registry = Arc::new(ProcessRegistry::new());

    let code = match cli.command {
        Commands::Run { command, flags } => {
            let options = flags.to_options()?;
            let executor = CommandExecutor::new(registry.clone());
            let result = executor.run_command(&command.join(" "), &options).await?;
            print_result(&result, flags.json)?;
            i32::from(!result.counts_as_success())
        }
        Commands::Dag {
            flow,
            json_input,
            flags,
        } => {
            let options = flags.to_options()?;
            let graph = if json_input {
                let value: serde_json::Value =
                    serde_json::from_str(&flow).context("invalid JSON graph input")?;
                shellflow_graph::compile_value(&value, options.parallel)?
            } else {
                shellflow_graph::compile_text(&flow)?
            };
            let scheduler = Scheduler::new(registry.clone());
            let report = scheduler.run(&graph, &options).await;
            print_report(&report, flags.json)?;
            i32::from(!report.succeeded)
        }
        Commands::Repl => {
            repl(registry).await?;
            0
        }
    };
    std::process::exit(code);
}

fn print_result(result: &ExecutionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if !result.stdout.is_empty() {
        println!("{}", result.stdout);
    }
    if result.state == NodeState::Failed && !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
    match (&result.background_id, result.state) {
        (Some(id), _) => println!(
            "backgrounded as '{id}' after {}ms; follow with `logs {id}` / `kill {id}`",
            result.duration_ms
        ),
        (None, NodeState::Failed) => println!(
            "failed (exit {}) in {}ms",
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".into()),
            result.duration_ms
        ),
        _ => {}
    }
    Ok(())
}

fn print_report(report: &GraphReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for r in &report.results {
        let code = r
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<12} {:>4} {:>8}ms",
            r.node_id, r.state, code, r.duration_ms
        );
        for line in r.stdout.lines() {
            println!("    {line}");
        }
        if r.state == NodeState::Failed {
            for line in r.stderr.lines().take(10) {
                println!("    ! {line}");
            }
        }
        if let Some(id) = &r.background_id {
            println!("    -> registry id '{id}' (follow with `logs {id}` / `kill {id}`)");
        }
    }
    println!(
        "{}: {} nodes in {}ms",
        if report.succeeded { "ok" } else { "failed" },
        report.results.len(),
        report.duration_ms
    );
    Ok(())
}

async fn repl(registry: Arc<ProcessRegistry>) -> anyhow::Result<()> {
    let executor = CommandExecutor::new(registry.clone());
    let scheduler = Scheduler::new(registry.clone());
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!("shellflow interactive session");
    println!(
        "commands: run <cmd>, dag <flow>, ps, status <id>, logs <id> [n], kill <id> [signal], rm <id>, quit"
    );

    loop {
        print!("shellflow> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match cmd {
            "quit" | "exit" => break,
            "run" => match executor.run_command(rest, &ExecOptions::default()).await {
                Ok(result) => print_result(&result, false)?,
                Err(e) => println!("error: {e}"),
            },
            "dag" => match shellflow_graph::compile_text(rest) {
                Ok(graph) => {
                    let report = scheduler.run(&graph, &ExecOptions::default()).await;
                    print_report(&report, false)?;
                }
                Err(e) => println!("error: {e}"),
            },
            "ps" => {
                for snap in registry.list().await {
                    println!(
                        "{:<16} {:<12} {:>7} {:>6} {}",
                        snap.id,
                        snap.state.to_string(),
                        snap.pid,
                        if snap.detached { "bg" } else { "" },
                        snap.command
                    );
                }
            }
            "status" => match registry.get(rest).await {
                Ok(record) => {
                    let snap = record.snapshot().await;
                    println!("{}", serde_json::to_string_pretty(&snap)?);
                }
                Err(e) => println!("error: {e}"),
            },
            "logs" => {
                let mut parts = rest.split_whitespace();
                let Some(id) = parts.next() else {
                    println!("usage: logs <id> [n]");
                    continue;
                };
                let n = parts.next().and_then(|s| s.parse().ok()).unwrap_or(100);
                match registry.logs(id, n).await {
                    Ok(lines) => {
                        for line in lines {
                            println!("{line}");
                        }
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            "kill" => {
                let mut parts = rest.split_whitespace();
                let Some(id) = parts.next() else {
                    println!("usage: kill <id> [signal]");
                    continue;
                };
                let signal = match parts.next().map(parse_signal).transpose() {
                    Ok(sig) => sig,
                    Err(e) => {
                        println!("error: {e}");
                        continue;
                    }
                };
                match registry.kill(id, signal).await {
                    Ok(state) => println!("{id}: {state}"),
                    Err(e) => println!("error: {e}"),
                }
            }
            "rm" => match registry.remove(rest).await {
                Ok(()) => println!("removed '{rest}'"),
                Err(e) => println!("error: {e}"),
            },
            other => println!("unknown command '{other}'"),
        }
    }
    Ok(())
}
