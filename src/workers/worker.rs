//! A single supervised worker process.
//!
//! The `Worker` handle is created once and lives for the whole process; the
//! child beneath it is launched, may exit, and is relaunched by the
//! manager's failure loop. Everything tied to one child generation (the
//! loaded flag, start instant, pid, exit observer) is reset by `start`.

use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ModelConfig, ModelName};
use crate::error::HubError;
use crate::types::PredictRequest;

/// Stable worker identifier of the form `<model>-<ordinal>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(model: &ModelName, ordinal: usize) -> Self {
        Self(format!("{}-{}", model, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event posted on the failure channel when a child process exits.
#[derive(Debug)]
pub struct WorkerFailure {
    pub id: WorkerId,
    pub description: String,
    pub runtime: Duration,
}

/// Per-generation lifecycle flags, mutated only under the worker's lock.
#[derive(Debug, Default)]
struct Lifecycle {
    launched: bool,
    loaded: bool,
    busy: bool,
    pid: Option<u32>,
    started_at: Option<Instant>,
    generation: u64,
}

/// Handle to one worker child process bound to a loopback port.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    model: ModelConfig,
    port: u16,
    command: Vec<String>,
    state: Mutex<Lifecycle>,
    failed_tx: mpsc::UnboundedSender<WorkerFailure>,
    client: reqwest::Client,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        model: ModelConfig,
        port: u16,
        command: Vec<String>,
        failed_tx: mpsc::UnboundedSender<WorkerFailure>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            id,
            model,
            port,
            command,
            state: Mutex::new(Lifecycle::default()),
            failed_tx,
            client,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn model_name(&self) -> &ModelName {
        &self.model.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Launch the child process and the observer that reports its exit.
    ///
    /// Resets all per-generation state. The exit observer is spawned exactly
    /// once per call and owns the child handle.
    pub fn start(&self) -> Result<(), HubError> {
        let program = self
            .command
            .first()
            .ok_or_else(|| HubError::ConfigInvalid("worker command is empty".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..])
            .arg(self.id.as_str())
            .arg(&self.model.path)
            .arg(self.port.to_string())
            .arg(&self.model.handler)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The exit observer owns the child; if the runtime tears it
            // down (shutdown), take the process with it.
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| HubError::Spawn { id: self.id.clone(), source: e })?;

        if let Some(stdout) = child.stdout.take() {
            forward_child_output(self.id.clone(), stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_child_output(self.id.clone(), stderr);
        }

        let started_at = Instant::now();
        let generation = {
            let mut state = self.state.lock().expect("worker mutex poisoned");
            state.launched = true;
            state.loaded = false;
            state.busy = false;
            state.pid = child.id();
            state.started_at = Some(started_at);
            state.generation += 1;
            state.generation
        };

        info!(
            worker_id = %self.id,
            model = %self.model.name,
            port = self.port,
            pid = ?child.id(),
            generation,
            "worker launched"
        );

        let id = self.id.clone();
        let failed_tx = self.failed_tx.clone();
        tokio::spawn(async move {
            let description = match child.wait().await {
                Ok(status) => format!("process exited with {}", status),
                Err(e) => format!("failed to await process: {}", e),
            };
            let runtime = started_at.elapsed();
            error!(
                worker_id = %id,
                runtime = %format_elapsed(runtime),
                "{description}"
            );
            // Send fails only during shutdown, once the manager is gone.
            let _ = failed_tx.send(WorkerFailure { id, description, runtime });
        });

        Ok(())
    }

    /// Record that the child signalled readiness. Idempotent within one
    /// generation; ignored when no child is live.
    pub fn mark_ready(&self) {
        let mut state = self.state.lock().expect("worker mutex poisoned");
        if state.launched {
            state.loaded = true;
        } else {
            warn!(worker_id = %self.id, "readiness signal with no live process ignored");
        }
    }

    pub fn mark_busy(&self) {
        self.state.lock().expect("worker mutex poisoned").busy = true;
    }

    pub fn mark_available(&self) {
        self.state.lock().expect("worker mutex poisoned").busy = false;
    }

    /// Record the observed process exit, clearing all generation state.
    pub fn mark_exited(&self) {
        let mut state = self.state.lock().expect("worker mutex poisoned");
        state.launched = false;
        state.loaded = false;
        state.busy = false;
        state.pid = None;
    }

    pub fn is_launched(&self) -> bool {
        self.state.lock().expect("worker mutex poisoned").launched
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().expect("worker mutex poisoned").loaded
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().expect("worker mutex poisoned").busy
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.lock().expect("worker mutex poisoned").pid
    }

    pub fn uptime(&self) -> Option<Duration> {
        let state = self.state.lock().expect("worker mutex poisoned");
        state.launched.then(|| state.started_at.map(|t| t.elapsed())).flatten()
    }

    /// How many times this worker has been launched.
    pub fn generation(&self) -> u64 {
        self.state.lock().expect("worker mutex poisoned").generation
    }

    /// Forward a prediction to the child and return its JSON response.
    ///
    /// No retry. A failure here says nothing about the process itself; only
    /// the exit observer decides that the worker is gone.
    pub async fn predict(&self, request: &PredictRequest) -> Result<Value, HubError> {
        let url = format!("http://127.0.0.1:{}/predict", self.port);
        debug!(worker_id = %self.id, url = %url, "forwarding predict");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                HubError::forward(self.id.clone(), format!("failed to reach worker: {}", e))
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(HubError::forward(
                self.id.clone(),
                format!("worker returned {}: {}", status, body),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            HubError::forward(self.id.clone(), format!("failed to decode response: {}", e))
        })
    }
}

/// Forward one of the child's output streams into the host log, one line at
/// a time, tagged with the worker id.
fn forward_child_output<R>(id: WorkerId, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if line.to_lowercase().contains("error") {
                warn!(worker_id = %id, "{line}");
            } else {
                info!(worker_id = %id, "{line}");
            }
        }
    });
}

/// Human-readable elapsed time, e.g. "1 hours 3 minutes 7 seconds".
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{} hours ", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{} minutes ", minutes));
    }
    out.push_str(&format!("{} seconds", seconds));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelName;
    use axum::{routing::post, Json, Router};
    use std::sync::Arc;

    fn test_model() -> ModelConfig {
        ModelConfig {
            name: ModelName::new("m"),
            path: "/models/m".into(),
            handler: "h".into(),
            workers: 1,
        }
    }

    fn test_worker_with(
        port: u16,
        command: Vec<String>,
    ) -> (Worker, mpsc::UnboundedReceiver<WorkerFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let model = test_model();
        let worker = Worker::new(
            WorkerId::new(&model.name, 1),
            model,
            port,
            command,
            tx,
            reqwest::Client::new(),
        );
        (worker, rx)
    }

    #[test]
    fn test_worker_id_format() {
        let id = WorkerId::new(&ModelName::new("resnet"), 3);
        assert_eq!(id.as_str(), "resnet-3");
        assert_eq!(id.to_string(), "resnet-3");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(7)), "7 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2 minutes 5 seconds");
        assert_eq!(
            format_elapsed(Duration::from_secs(3600 + 62)),
            "1 hours 1 minutes 2 seconds"
        );
    }

    #[test]
    fn test_flags_before_launch() {
        let (worker, _rx) =
            test_worker_with(18900, vec!["sh".into(), "-c".into(), "sleep 5".into()]);
        assert!(!worker.is_launched());
        assert!(!worker.is_loaded());
        assert!(!worker.is_busy());
        assert_eq!(worker.generation(), 0);

        // Readiness before launch must be ignored.
        worker.mark_ready();
        assert!(!worker.is_loaded());
    }

    #[tokio::test]
    async fn test_start_and_state_transitions() {
        let (worker, _rx) =
            test_worker_with(18901, vec!["sh".into(), "-c".into(), "sleep 5".into()]);

        worker.start().unwrap();
        assert!(worker.is_launched());
        assert!(!worker.is_loaded());
        assert_eq!(worker.generation(), 1);
        assert!(worker.pid().is_some());

        worker.mark_ready();
        assert!(worker.is_loaded());
        worker.mark_ready(); // idempotent
        assert!(worker.is_loaded());

        worker.mark_busy();
        assert!(worker.is_busy());
        worker.mark_available();
        assert!(!worker.is_busy());

        worker.mark_exited();
        assert!(!worker.is_launched());
        assert!(!worker.is_loaded());
        assert!(worker.pid().is_none());
    }

    #[tokio::test]
    async fn test_exit_observer_reports_failure() {
        let (worker, mut rx) =
            test_worker_with(18902, vec!["sh".into(), "-c".into(), "exit 3".into()]);
        worker.start().unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no failure event")
            .expect("channel closed");
        assert_eq!(&failure.id, worker.id());
        assert!(failure.description.contains("exited"), "{}", failure.description);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (worker, _rx) =
            test_worker_with(18903, vec!["/nonexistent/worker-binary".into()]);
        let err = worker.start().unwrap_err();
        assert!(matches!(err, HubError::Spawn { .. }));
        assert!(!worker.is_launched());
    }

    async fn serve_stub(response: Value) -> u16 {
        let app = Router::new().route(
            "/predict",
            post(move |Json(_): Json<Value>| {
                let response = response.clone();
                async move { Json(response) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_predict_roundtrip() {
        let port = serve_stub(serde_json::json!({"y": 2})).await;
        let (worker, _rx) = test_worker_with(port, vec!["true".into()]);

        let request: PredictRequest =
            serde_json::from_str(r#"{"params": {"model": "m", "x": 1}}"#).unwrap();
        let response = worker.predict(&request).await.unwrap();
        assert_eq!(response, serde_json::json!({"y": 2}));
    }

    #[tokio::test]
    async fn test_predict_non_200_is_an_error() {
        let app = Router::new().route(
            "/predict",
            post(|| async {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "model blew up"})),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (worker, _rx) = test_worker_with(port, vec!["true".into()]);
        let request: PredictRequest =
            serde_json::from_str(r#"{"params": {"model": "m"}}"#).unwrap();
        let err = worker.predict(&request).await.unwrap_err();
        assert!(err.to_string().contains("500"), "{}", err);
    }

    #[tokio::test]
    async fn test_predict_connection_refused() {
        // Nothing listens on this port.
        let (worker, _rx) = test_worker_with(1, vec!["true".into()]);
        let request: PredictRequest =
            serde_json::from_str(r#"{"params": {"model": "m"}}"#).unwrap();
        let err = worker.predict(&request).await.unwrap_err();
        assert!(matches!(err, HubError::WorkerForward { .. }));
    }

    #[test]
    fn test_worker_is_send_sync() {
        fn assert_send_sync(_: impl Send + Sync) {}
        let (worker, _rx) = test_worker_with(18904, vec!["true".into()]);
        assert_send_sync(Arc::new(worker));
    }
}
