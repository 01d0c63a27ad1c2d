//! Async driver for the payment/task handshake
//!
//! Executes the actions emitted by [`transition`] against a [`Toolset`],
//! feeding each normalized result back in as an event until the state
//! machine reaches `Done` or `Failed`. The toolset is closed exactly once
//! when the run ends, whichever way it ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use xcat_agent::{normalize_output, ArtifactFetcher, ToolCatalog, Toolset};
use xcat_core::fail_open::fail_open;
use xcat_core::{
    tool_names, HandshakeFailure, IdempotencyKey, Network, Result, TaskId, ToolCallResult,
    XcatConfig,
};

use crate::observer::{HandshakeObserver, NoopObserver};
use crate::payment::{PaymentChallenge, PaymentProof};
use crate::state_machine::{transition, Action, Event, State};

/// Source of payment evidence when none was configured
#[async_trait]
pub trait EvidencePrompt: Send + Sync {
    /// Ask for the transaction hash (base) or signature (solana) that pays
    /// `challenge`
    async fn evidence(&self, network: Network, challenge: &PaymentChallenge) -> Result<String>;
}

/// Outcome of a completed handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReport {
    pub task_id: TaskId,
    pub download_url: String,
    pub saved_file: PathBuf,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    /// Quote settled by a top-up during this run, if payment was needed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_quote_id: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Mutable bookkeeping for one run
#[derive(Debug, Default)]
struct RunContext {
    create_arguments: Value,
    idempotency_key: Option<IdempotencyKey>,
    polling_since: Option<Instant>,
    paid_quote_id: Option<String>,
    bytes: u64,
}

/// Drives a handshake over the given collaborators
pub struct Handshake {
    config: XcatConfig,
    toolset: Arc<dyn Toolset>,
    fetcher: Arc<dyn ArtifactFetcher>,
    prompt: Arc<dyn EvidencePrompt>,
    observer: Arc<dyn HandshakeObserver>,
}

impl Handshake {
    pub fn new(
        config: XcatConfig,
        toolset: Arc<dyn Toolset>,
        fetcher: Arc<dyn ArtifactFetcher>,
        prompt: Arc<dyn EvidencePrompt>,
    ) -> Self {
        Self {
            config,
            toolset,
            fetcher,
            prompt,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn HandshakeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Full run: create (paying if asked), poll, download
    pub async fn run(&self) -> Result<HandshakeReport> {
        let outcome = self.run_inner().await;
        self.close().await;
        outcome
    }

    /// Fetch and download the result of an already created task
    pub async fn resume_download(&self, task_id: TaskId) -> Result<HandshakeReport> {
        let outcome = self.resume_inner(task_id).await;
        self.close().await;
        outcome
    }

    async fn run_inner(&self) -> Result<HandshakeReport> {
        let catalog = self.discover().await?;
        catalog.require_handshake_tools()?;

        let key = self
            .config
            .idempotency_key
            .clone()
            .unwrap_or_else(IdempotencyKey::generate);
        info!("Using idempotency key {}", key);
        self.observer.on_idempotency_key(&key);

        let mut ctx = RunContext {
            create_arguments: json!({
                "users": self.config.users,
                "mode": self.config.mode,
                "idempotency_key": key.as_str(),
            }),
            idempotency_key: Some(key),
            ..RunContext::default()
        };

        let start = transition(State::Idle, Event::Start);
        self.drive(start, &mut ctx).await
    }

    async fn resume_inner(&self, task_id: TaskId) -> Result<HandshakeReport> {
        let catalog = self.discover().await?;
        catalog.require(tool_names::GET_RESULT_DOWNLOAD_URL)?;

        let start = (
            State::FetchingDownload { task_id },
            vec![Action::FetchDownloadUrl { task_id }],
        );
        self.drive(start, &mut RunContext::default()).await
    }

    async fn discover(&self) -> Result<ToolCatalog> {
        let tools = self.toolset.list_tools().await?;
        let catalog = ToolCatalog::from_tools(&tools);
        info!("Discovered {} relevant tools", catalog.names().len());
        self.observer.on_tools(&catalog.names());
        Ok(catalog)
    }

    async fn close(&self) {
        fail_open("toolset.close", || self.toolset.close()).await;
    }

    /// Run the state machine from `start` until it reaches a terminal state
    async fn drive(
        &self,
        start: (State, Vec<Action>),
        ctx: &mut RunContext,
    ) -> Result<HandshakeReport> {
        let (mut state, mut actions) = start;

        loop {
            self.observer.on_state(&state);

            let mut next = None;
            for action in actions {
                if let Some(event) = self.execute(action, ctx).await? {
                    next = Some(event);
                }
            }

            match &state {
                State::Done {
                    task_id,
                    download_url,
                    path,
                } => {
                    return Ok(HandshakeReport {
                        task_id: *task_id,
                        download_url: download_url.clone(),
                        saved_file: path.clone(),
                        bytes: ctx.bytes,
                        idempotency_key: ctx.idempotency_key.clone(),
                        paid_quote_id: ctx.paid_quote_id.clone(),
                        finished_at: Utc::now(),
                    });
                }
                State::Failed { failure } => return Err(failure.clone().into()),
                _ => {}
            }

            let event = next.ok_or_else(|| {
                HandshakeFailure::InvalidTransition(format!("{:?} produced no event", state))
            })?;
            (state, actions) = transition(state, event);
        }
    }

    async fn execute(&self, action: Action, ctx: &mut RunContext) -> Result<Option<Event>> {
        let event = match action {
            Action::Log { message } => {
                info!("{}", message);
                return Ok(None);
            }

            Action::CreateTask => {
                let result = self
                    .call(tool_names::CREATE_CRAWL_TASK, ctx.create_arguments.clone())
                    .await?;
                Event::CreateReturned(result)
            }

            Action::CollectProof { challenge } => {
                self.observer.on_challenge(&challenge);
                match self.build_proof(&challenge).await {
                    Ok(proof) => {
                        info!("Built {} payment proof", proof.network);
                        Event::ProofReady {
                            payment_signature_b64: proof.encode(),
                        }
                    }
                    Err(failure) => Event::ProofUnavailable(failure),
                }
            }

            Action::TopUp {
                quote_id,
                payment_signature_b64,
            } => {
                let result = self
                    .call(
                        tool_names::X402_TOPUP,
                        json!({
                            "quote_id": quote_id,
                            "payment_signature_b64": payment_signature_b64,
                        }),
                    )
                    .await?;
                if result.ok {
                    ctx.paid_quote_id = Some(quote_id);
                }
                Event::TopupReturned(result)
            }

            Action::PollStatus { task_id, wait } => {
                let since = *ctx.polling_since.get_or_insert_with(Instant::now);
                let deadline = since + self.config.polling.timeout();

                if wait {
                    let wake = Instant::now() + self.config.polling.interval();
                    tokio::time::sleep_until(wake.min(deadline)).await;
                }

                if Instant::now() >= deadline {
                    let waited_secs = since.elapsed().as_secs();
                    warn!("Task {} not ready after {}s", task_id, waited_secs);
                    Event::DeadlineElapsed { waited_secs }
                } else {
                    let result = self
                        .call(tool_names::GET_TASK_STATUS, json!({ "task_id": task_id }))
                        .await?;
                    Event::StatusReturned(result)
                }
            }

            Action::FetchDownloadUrl { task_id } => {
                let result = self
                    .call(
                        tool_names::GET_RESULT_DOWNLOAD_URL,
                        json!({ "task_id": task_id }),
                    )
                    .await?;
                Event::DownloadUrlReturned(result)
            }

            Action::Download {
                task_id,
                download_url,
            } => {
                let path = self.config.result_path(task_id);
                ensure_parent(&path).await?;
                ctx.bytes = self.fetcher.download(&download_url, &path).await?;
                self.observer.on_saved(task_id, ctx.bytes);
                Event::Downloaded { path }
            }
        };

        Ok(Some(event))
    }

    /// Invoke a tool and decode its normalized result
    async fn call(&self, tool: &str, arguments: Value) -> Result<ToolCallResult> {
        debug!("Calling {} with {}", tool, arguments);
        let raw = self.toolset.call_tool(tool, arguments).await?;
        let normalized = normalize_output(&raw);
        self.observer.on_response(tool, &normalized);
        Ok(ToolCallResult::from_value(&normalized))
    }

    /// Resolve network and evidence, then build the proof
    async fn build_proof(
        &self,
        challenge: &PaymentChallenge,
    ) -> std::result::Result<PaymentProof, HandshakeFailure> {
        let network: Network = self
            .config
            .network
            .parse()
            .map_err(|_| HandshakeFailure::InvalidNetwork(self.config.network.clone()))?;

        let evidence = match self.config.evidence_for(network) {
            Some(evidence) => evidence.to_string(),
            None => self
                .prompt
                .evidence(network, challenge)
                .await
                .map_err(|e| HandshakeFailure::EvidenceUnavailable(e.to_string()))?,
        };

        // Sent verbatim, even when blank
        Ok(PaymentProof::new(network, evidence.trim()))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
