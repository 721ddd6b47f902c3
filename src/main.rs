//! docflow - 多 MCP 服务器文档编排引擎
//!
//! 入口：初始化日志、加载配置、连接服务器，然后执行子命令：
//! - `process <file>...`：逐个处理文档，打印终止状态
//! - `tools`：列出合并后的能力目录
//! - `call <tool> [json-args]`：直接调用单个工具并打印结果
//!
//! 全局选项 `--config <path>` 追加一个 TOML 配置文件。

use std::path::PathBuf;

use anyhow::{bail, Context};
use docflow::{
    agent::{connector_from_config, Engine},
    config::load_config,
    mcp::load_server_descriptors,
    observability,
    react::RunEvent,
};
use tokio_util::sync::CancellationToken;

const USAGE: &str = "Usage: docflow [--config <path>] <command>

Commands:
  process <file>...         Process documents through the orchestration loop
  tools                     List the merged tool catalog
  call <tool> [json-args]   Invoke one tool directly and print its result";

enum Command {
    Process(Vec<PathBuf>),
    Tools,
    Call { tool: String, args: serde_json::Value },
}

fn parse_args(mut args: Vec<String>) -> anyhow::Result<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            bail!("--config requires a path\n\n{USAGE}");
        }
        config_path = Some(PathBuf::from(args.remove(pos + 1)));
        args.remove(pos);
    }

    let mut it = args.into_iter();
    let command = match it.next().as_deref() {
        Some("process") => {
            let files: Vec<PathBuf> = it.map(PathBuf::from).collect();
            if files.is_empty() {
                bail!("process requires at least one file\n\n{USAGE}");
            }
            Command::Process(files)
        }
        Some("tools") => Command::Tools,
        Some("call") => {
            let tool = it
                .next()
                .with_context(|| format!("call requires a tool name\n\n{USAGE}"))?;
            let args = match it.next() {
                Some(raw) => serde_json::from_str(&raw).context("json-args is not valid JSON")?,
                None => serde_json::json!({}),
            };
            Command::Call { tool, args }
        }
        _ => bail!("{USAGE}"),
    };
    Ok((config_path, command))
}

fn print_event(ev: &RunEvent) {
    match ev {
        RunEvent::StepUpdate { step, max_steps } => println!("--- Iteration {step}/{max_steps} ---"),
        RunEvent::ThinkingContent { text } => println!("Oracle: {text}"),
        RunEvent::ToolCall { tool, args } => println!("Calling tool: {tool} {args}"),
        RunEvent::Observation { tool, outcome, preview } => {
            println!("Result of {tool} [{outcome}]: {preview}")
        }
        RunEvent::DocumentTracked { reference, document_id } => {
            println!("Tracked document_id {document_id} for {reference}")
        }
        RunEvent::Finished { state, iterations } => {
            println!("Finished: {state} after {iterations} iteration(s)")
        }
        RunEvent::Error { text } => eprintln!("Error: {text}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let (config_path, command) = parse_args(std::env::args().skip(1).collect())?;
    let cfg = load_config(config_path).context("Failed to load config")?;

    let descriptors = load_server_descriptors(&cfg.mcp.config_path)
        .with_context(|| format!("Failed to load {}", cfg.mcp.config_path.display()))?;
    let connector = connector_from_config(&cfg).context("Failed to build MCP connector")?;

    let mut engine = Engine::from_config(&cfg);
    let report = engine.connect(&descriptors, &connector).await;
    if !report.any_connected() {
        tracing::warn!("No MCP server connected; the oracle will see an empty catalog");
    }

    let result = match command {
        Command::Tools => {
            let snapshot = engine.catalog().snapshot();
            for cap in snapshot.exposed() {
                println!("{} ({}) - {}", cap.name, cap.server, cap.description);
            }
            for c in snapshot.collisions() {
                println!("collision: {} served by {}, shadowed on {}", c.name, c.winner, c.shadowed);
            }
            Ok(())
        }
        Command::Call { tool, args } => {
            let r = engine.call_tool(&tool, args).await;
            println!("{}", r.text());
            Ok(())
        }
        Command::Process(files) => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling current run");
                    ctrl_c.cancel();
                }
            });

            let mut failures = 0usize;
            for file in files {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let printer = tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        print_event(&ev);
                    }
                });
                let outcome = engine.process_document(&file, cancel.clone(), Some(&tx)).await;
                drop(tx);
                let _ = printer.await;

                println!("{} -> {} ({})", outcome.document_name, outcome.state, outcome.run_id);
                if let Some(reason) = &outcome.failure_reason {
                    println!("  reason: {reason}");
                }
                if !outcome.state.is_success() {
                    failures += 1;
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            if failures > 0 {
                Err(anyhow::anyhow!("{failures} document(s) did not complete"))
            } else {
                Ok(())
            }
        }
    };

    engine.teardown().await;
    result
}
