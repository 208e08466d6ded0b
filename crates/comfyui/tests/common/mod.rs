#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use zeniji_comfyui::api::{ComfyUIApiError, GenerationBackend, SubmitResponse};
use zeniji_comfyui::dispatcher::EventDispatcher;
use zeniji_comfyui::events::{event_channel, EventSender};
use zeniji_comfyui::registry::{ArtifactRef, PendingJobRegistry};
use zeniji_comfyui::submitter::JobSubmitter;
use zeniji_comfyui::waiter::{ResultWaiter, WaitConfig};
use zeniji_core::graph::{JobGraph, NodeSpec};

/// In-memory stand-in for a ComfyUI server's HTTP side.
///
/// Prompt ids are handed out sequentially (`prompt-1`, `prompt-2`, ...).
/// Every fetched artifact returns its filename as bytes unless a body was
/// registered with [`MockBackend::set_artifact`].
#[derive(Default)]
pub struct MockBackend {
    pub unreachable: bool,
    next_id: AtomicU64,
    reject_with: Mutex<Option<(u16, String)>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    missing: Mutex<Vec<String>>,
    pub submitted: Mutex<Vec<serde_json::Value>>,
    pub fetched: Mutex<Vec<ArtifactRef>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Make every following submission fail with `status`.
    pub fn reject_submissions(&self, status: u16, body: &str) {
        *self.reject_with.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn set_artifact(&self, filename: &str, bytes: &[u8]) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
    }

    /// Make `/view` answer 404 for `filename`.
    pub fn lose_artifact(&self, filename: &str) {
        self.missing.lock().unwrap().push(filename.to_string());
    }

    pub fn fetched_filenames(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.filename.clone())
            .collect()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn api_url(&self) -> &str {
        "http://mock:8000"
    }

    async fn check_reachable(&self) -> Result<(), ComfyUIApiError> {
        if self.unreachable {
            return Err(ComfyUIApiError::ApiError {
                status: 503,
                body: "server offline".to_string(),
            });
        }
        Ok(())
    }

    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        _client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        if let Some((status, body)) = self.reject_with.lock().unwrap().clone() {
            return Err(ComfyUIApiError::ApiError { status, body });
        }
        self.submitted.lock().unwrap().push(workflow.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmitResponse {
            prompt_id: format!("prompt-{n}"),
            number: n as i32,
        })
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.fetched.lock().unwrap().push(artifact.clone());
        if self.missing.lock().unwrap().contains(&artifact.filename) {
            return Err(ComfyUIApiError::ApiError {
                status: 404,
                body: "not found".to_string(),
            });
        }
        let bytes = self
            .artifacts
            .lock()
            .unwrap()
            .get(&artifact.filename)
            .cloned()
            .unwrap_or_else(|| artifact.filename.as_bytes().to_vec());
        Ok(bytes)
    }

    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.cancelled.lock().unwrap().push(prompt_id.to_string());
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        Ok(())
    }

    async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        Ok(json!({ "prompt_id": prompt_id, "outputs": {} }))
    }
}

/// Submitter, dispatcher and waiter wired to one registry and a mock
/// backend, without a push channel.
pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub registry: Arc<PendingJobRegistry>,
    pub events: EventSender,
    pub dispatcher: EventDispatcher,
    pub submitter: JobSubmitter,
    pub waiter: Arc<ResultWaiter>,
    pub shutdown: CancellationToken,
}

pub fn harness(config: WaitConfig) -> Harness {
    harness_with(MockBackend::new(), config)
}

pub fn harness_with(backend: MockBackend, config: WaitConfig) -> Harness {
    let backend = Arc::new(backend);
    let registry = Arc::new(PendingJobRegistry::new());
    let events = event_channel();
    let shutdown = CancellationToken::new();
    let dispatcher = EventDispatcher::new(Arc::clone(&registry), events.clone());
    let submitter = JobSubmitter::new(
        backend.clone() as Arc<dyn GenerationBackend>,
        Arc::clone(&registry),
        "test-client".to_string(),
    );
    let waiter = Arc::new(ResultWaiter::new(
        backend.clone() as Arc<dyn GenerationBackend>,
        Arc::clone(&registry),
        events.clone(),
        config,
        shutdown.clone(),
    ));
    Harness {
        backend,
        registry,
        events,
        dispatcher,
        submitter,
        waiter,
        shutdown,
    }
}

/// Short budgets so timeout paths finish quickly.
pub fn fast_wait() -> WaitConfig {
    WaitConfig {
        poll_interval: Duration::from_millis(10),
        completion_grace: Duration::from_millis(200),
        hard_timeout: Duration::from_millis(800),
    }
}

/// Minimal photoreal-style graph.
pub fn portrait_graph() -> JobGraph {
    let mut graph = JobGraph::new();
    graph.insert(
        "3",
        NodeSpec::new("KSampler")
            .with_input("seed", json!(0))
            .with_input("steps", json!(9))
            .with_input("cfg", json!(1.0))
            .with_input("sampler_name", json!("euler"))
            .with_input("scheduler", json!("simple")),
    );
    graph.insert("6", NodeSpec::new("CLIPTextEncode").with_input("text", json!("")));
    graph.insert("7", NodeSpec::new("CLIPTextEncode").with_input("text", json!("")));
    graph.insert("9", NodeSpec::new("SaveImage"));
    graph
}

// ---------------------------------------------------------------------------
// Push message builders
// ---------------------------------------------------------------------------

pub fn executing(prompt_id: &str, node: Option<&str>) -> String {
    json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}}).to_string()
}

pub fn executed(prompt_id: &str, node: &str, filename: &str) -> String {
    json!({
        "type": "executed",
        "data": {
            "node": node,
            "output": {"images": [{"filename": filename, "subfolder": "", "type": "output"}]},
            "prompt_id": prompt_id,
        }
    })
    .to_string()
}

pub fn execution_error(prompt_id: &str, exception_type: &str, message: &str) -> String {
    json!({
        "type": "execution_error",
        "data": {
            "prompt_id": prompt_id,
            "node_id": "16",
            "node_type": "UNETLoader",
            "exception_message": message,
            "exception_type": exception_type,
            "traceback": [],
        }
    })
    .to_string()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
