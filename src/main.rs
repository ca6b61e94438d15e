//! EEG Copilot 控制台前端
//!
//! 入口：初始化日志、创建 Agent 编排器，逐行读取 stdin 作为用户输入，并打印控制器事件。
//! 命令：/yes /no 回复确认请求，/stop 停止生成，/clear 清空对话，/mode single|multi 切换执行模式，/quit 退出。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use eeg_copilot::core::{create_agent, Command, ExecutionMode};
use eeg_copilot::react::ControllerEvent;
use tokio::io::{AsyncBufReadExt, BufReader};

fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Submit(line.to_string())));
    };
    let mut parts = rest.split_whitespace();
    let cmd = match parts.next().unwrap_or_default() {
        "yes" | "y" => Command::Resume(true),
        "no" | "n" => Command::Resume(false),
        "stop" => Command::Stop,
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        "mode" => {
            let mode: ExecutionMode = parts.next().unwrap_or_default().parse()?;
            Command::SetMode(mode)
        }
        other => return Err(format!("unknown command: /{other}")),
    };
    Ok(Some(cmd))
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::MessageChunk { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        ControllerEvent::MessageDiscarded => println!("\n[discarded, retrying]"),
        ControllerEvent::ToolCall { tool, parameters } => {
            println!("\n[tool] {tool} {}", serde_json::Value::Object(parameters.clone()));
        }
        ControllerEvent::Observation { tool, ok, preview } => {
            let mark = if *ok { "ok" } else { "failed" };
            println!("[{mark}] {tool}: {preview}");
        }
        ControllerEvent::UiRequest { tool, request } => println!("[ui] {tool}: {request}"),
        ControllerEvent::ConfirmationRequest {
            tool,
            parameters,
            context,
        } => {
            println!(
                "\n[confirm] {tool} {} ({context})\nType /yes to run it or /no to cancel.",
                serde_json::Value::Object(parameters.clone())
            );
        }
        ControllerEvent::LoopDetected { tool } => println!("\n[loop] {tool}"),
        ControllerEvent::Recovery { action, detail } => println!("\n[{action}] {detail}"),
        ControllerEvent::Final { text } => println!("\n{text}\n"),
        ControllerEvent::Error { text } => println!("\n[error] {text}\n"),
        ControllerEvent::PhaseChanged { .. } | ControllerEvent::Thinking { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eeg_copilot::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (cmd_tx, mut event_rx) = create_agent(config_path)
        .await
        .context("Failed to create agent")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    println!("EEG Copilot. Commands: /yes /no /stop /clear /mode single|multi /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match parse_line(&line) {
            Ok(Some(cmd)) => {
                let quit = cmd == Command::Quit;
                cmd_tx.send(cmd).context("Agent stopped")?;
                if quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("{e}"),
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    drop(cmd_tx);
    let _ = printer.await;
    Ok(())
}
