//! GenerationWorker：在编排器控制路径之外执行一次推理
//!
//! 每次 dispatch 派生一个 tokio 任务：流式读取 LlmClient 输出，依次发送 Chunk，
//! 最后恰好发送一个 Finished 或 Failed。所有事件带 generation id，经同一个 mpsc 通道按序送达。
//! 打开流受 request 超时约束，整次生成受 stream 超时约束。
//! 取消通过 CancellationToken 协作完成；被取消的任务不再发送任何事件，
//! 编排器也会把已停止的 generation 的迟到事件当作过期丢弃。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, SessionSupervisor};
use crate::llm::LlmClient;
use crate::memory::Message;

pub type GenerationId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEventKind {
    Chunk(String),
    Finished,
    Failed(AgentError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub generation: GenerationId,
    pub kind: WorkerEventKind,
}

pub struct GenerationWorker {
    llm: Arc<dyn LlmClient>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    supervisor: SessionSupervisor,
    next_id: GenerationId,
    timeouts: GenerationTimeouts,
}

/// 打开流的超时与整次生成的超时
#[derive(Debug, Clone, Copy)]
pub struct GenerationTimeouts {
    pub request: Duration,
    pub stream: Duration,
}

impl GenerationWorker {
    /// 返回 worker 与其事件接收端
    pub fn new(
        llm: Arc<dyn LlmClient>,
        timeouts: GenerationTimeouts,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                llm,
                events_tx,
                supervisor: SessionSupervisor::new(),
                next_id: 0,
                timeouts,
            },
            events_rx,
        )
    }

    /// 派发一次生成；调用方保证同一时刻只有一个未完成的生成
    pub fn dispatch(&mut self, messages: Vec<Message>) -> GenerationId {
        self.next_id += 1;
        let id = self.next_id;
        let token = self.supervisor.begin_generation();
        let llm = self.llm.clone();
        let tx = self.events_tx.clone();
        let timeouts = self.timeouts;
        tokio::spawn(async move {
            run_generation(id, llm, messages, tx, token, timeouts).await;
        });
        id
    }

    /// 后端累计 token 使用：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 请求停止当前生成（协作式，不保证立即生效）
    pub fn interrupt(&mut self) {
        self.supervisor.interrupt();
    }

    pub fn shutdown(&mut self) {
        self.supervisor.shutdown();
    }
}

fn send(tx: &mpsc::UnboundedSender<WorkerEvent>, generation: GenerationId, kind: WorkerEventKind) {
    let _ = tx.send(WorkerEvent { generation, kind });
}

async fn run_generation(
    id: GenerationId,
    llm: Arc<dyn LlmClient>,
    messages: Vec<Message>,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    token: CancellationToken,
    timeouts: GenerationTimeouts,
) {
    let deadline = tokio::time::sleep(timeouts.stream);
    tokio::pin!(deadline);
    let timed_out = AgentError::GenerationTimeout(timeouts.stream.as_secs());

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!(generation = id, "generation interrupted before streaming");
            return;
        }
        _ = &mut deadline => {
            send(&tx, id, WorkerEventKind::Failed(timed_out.clone()));
            return;
        }
        r = tokio::time::timeout(timeouts.request, llm.complete_stream(&messages)) => r,
    };
    let mut stream = match opened {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            send(&tx, id, WorkerEventKind::Failed(AgentError::LlmError(e)));
            return;
        }
        Err(_) => {
            tracing::warn!(generation = id, "llm request timed out before streaming");
            send(
                &tx,
                id,
                WorkerEventKind::Failed(AgentError::GenerationTimeout(timeouts.request.as_secs())),
            );
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(generation = id, "generation interrupted");
                return;
            }
            _ = &mut deadline => {
                send(&tx, id, WorkerEventKind::Failed(timed_out.clone()));
                return;
            }
            item = stream.next() => match item {
                Some(Ok(chunk)) => send(&tx, id, WorkerEventKind::Chunk(chunk)),
                Some(Err(e)) => {
                    send(&tx, id, WorkerEventKind::Failed(AgentError::LlmError(e)));
                    return;
                }
                None => {
                    send(&tx, id, WorkerEventKind::Finished);
                    return;
                }
            }
        }
    }
}
