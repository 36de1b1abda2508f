//! Bounded command dispatch.
//!
//! Every command, whatever produced it, goes through one [`WorkerPool`]:
//! - a fixed number of workers share a bounded job queue
//! - [`WorkerPool::submit`] waits once all workers are busy and the queue is full
//! - each job runs under its own child [`CancellationToken`]
//! - the outcome of a job can be awaited through [`WorkerPool::submit_with_report`]
//!
//! [`ScannerExecutor`] is the executor used in production: it turns each
//! command into a request to the matching scanner service.

use crate::command::{Command, CommandArgs, CommandName};
use crate::error::ControllerError;
use crate::identity::hash_from_image_id;
use crate::metrics::Metrics;
use scanner_client::{
    ImageScanRequest, ProfileKind, ProfileScanRequest, ScanSession, ScannerClientTrait, WorkloadScanRequest,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one executed command, errors rendered as text
pub type JobResult = Result<(), String>;

/// Runs one command to completion
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &Command, cancel: CancellationToken) -> Result<(), ControllerError>;
}

struct Job {
    command: Command,
    done: Option<oneshot::Sender<JobResult>>,
}

/// Submission side of the pool, cheap to clone
#[derive(Clone, Debug)]
pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    closed: CancellationToken,
}

impl WorkerPool {
    /// Spawn `concurrency` workers on a queue of `queue_size` jobs
    ///
    /// Workers stop when `cancel` fires. The returned set completes once all
    /// of them did.
    pub fn start(
        executor: Arc<dyn CommandExecutor>,
        concurrency: usize,
        queue_size: usize,
        cancel: CancellationToken,
        metrics: Option<Metrics>,
    ) -> (Self, JoinSet<()>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for id in 0..concurrency.max(1) {
            workers.spawn(worker(
                id,
                Arc::clone(&rx),
                Arc::clone(&executor),
                cancel.clone(),
                metrics.clone(),
            ));
        }
        info!("Started worker pool with {} workers", concurrency.max(1));

        let pool = Self {
            jobs: tx,
            closed: cancel.child_token(),
        };
        (pool, workers)
    }

    /// Queue a command, waiting for room when the pool is saturated
    pub async fn submit(&self, command: Command) -> Result<(), ControllerError> {
        self.enqueue(Job { command, done: None }).await
    }

    /// Queue a command and get a receiver for its outcome
    pub async fn submit_with_report(
        &self,
        command: Command,
    ) -> Result<oneshot::Receiver<JobResult>, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Job {
            command,
            done: Some(tx),
        })
        .await?;
        Ok(rx)
    }

    /// Stop accepting work; queued jobs still run
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn enqueue(&self, job: Job) -> Result<(), ControllerError> {
        if self.closed.is_cancelled() {
            return Err(ControllerError::PoolClosed);
        }
        tokio::select! {
            sent = self.jobs.send(job) => sent.map_err(|_| ControllerError::PoolClosed),
            () = self.closed.cancelled() => Err(ControllerError::PoolClosed),
        }
    }
}

async fn worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
    metrics: Option<Metrics>,
) {
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let name = job.command.name;
        debug!("Worker {} executing {} for {}", id, name, job.command.wlid);
        let result = executor
            .execute(&job.command, cancel.child_token())
            .await
            .map_err(|e| e.to_string());

        let outcome = if result.is_ok() { "success" } else { "failure" };
        if let Some(m) = &metrics {
            m.commands_executed.with_label_values(&[name.as_str(), outcome]).inc();
        }
        if let Err(e) = &result {
            warn!("Command {} for {} failed: {}", name, job.command.wlid, e);
        }
        if let Some(done) = job.done {
            // the submitter may have stopped waiting
            let _ = done.send(result);
        }
    }
    debug!("Worker {} stopped", id);
}

/// Drain handler output into the pool until either side closes
pub async fn forward(mut commands: mpsc::Receiver<Command>, pool: WorkerPool) {
    while let Some(command) = commands.recv().await {
        if let Err(e) = pool.submit(command).await {
            debug!("Stopped forwarding commands: {}", e);
            return;
        }
    }
    debug!("Command stream ended");
}

/// Executes commands against the scanner services
#[derive(Debug)]
pub struct ScannerExecutor<C> {
    client: Arc<C>,
}

impl<C: ScannerClientTrait> ScannerExecutor<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    async fn dispatch(&self, command: &Command) -> Result<(), ControllerError> {
        let wlid = command.wlid.clone();
        match (command.name, &command.args) {
            (CommandName::ScanImages | CommandName::ScanFilteredSbom, CommandArgs::Container { container_data, pod }) => {
                let request = ImageScanRequest {
                    session: ScanSession::new(),
                    wlid,
                    image_tag: container_data.image_tag.clone(),
                    image_hash: hash_from_image_id(&container_data.image_id).to_string(),
                    container_name: container_data.container_name.clone(),
                    instance_id: container_data.instance_id.clone(),
                    slug: container_data.slug.clone(),
                    pod: pod.clone(),
                };
                if command.name == CommandName::ScanImages {
                    self.client.scan_image(&request).await?;
                } else {
                    self.client.scan_filtered_sbom(&request).await?;
                }
            }
            (
                CommandName::ScanApplicationProfile | CommandName::ScanContainerProfile,
                CommandArgs::Profile { name, namespace, pod },
            ) => {
                let kind = if command.name == CommandName::ScanApplicationProfile {
                    ProfileKind::ApplicationProfile
                } else {
                    ProfileKind::ContainerProfile
                };
                let request = ProfileScanRequest {
                    session: ScanSession::new(),
                    wlid,
                    kind,
                    name: name.clone(),
                    namespace: namespace.clone(),
                    pod: pod.clone(),
                };
                self.client.scan_profile(&request).await?;
            }
            (CommandName::ScanWorkload, CommandArgs::Workload { .. } | CommandArgs::None) => {
                let object = match &command.args {
                    CommandArgs::Workload { object } => object.clone(),
                    _ => None,
                };
                let request = WorkloadScanRequest {
                    session: ScanSession::new(),
                    wlid,
                    object,
                };
                self.client.scan_workload(&request).await?;
            }
            (name, _) => {
                return Err(ControllerError::Serialization(format!(
                    "arguments of {} command for {} do not match the command",
                    name, command.wlid
                )));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C: ScannerClientTrait + 'static> CommandExecutor for ScannerExecutor<C> {
    async fn execute(&self, command: &Command, cancel: CancellationToken) -> Result<(), ControllerError> {
        tokio::select! {
            result = self.dispatch(command) => result,
            () = cancel.cancelled() => Err(ControllerError::PoolClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ContainerData;
    use scanner_client::{MockScannerClient, RecordedRequest};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    // Blocks every command until a permit is released
    struct GatedExecutor {
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedSender<String>,
    }

    #[async_trait::async_trait]
    impl CommandExecutor for GatedExecutor {
        async fn execute(&self, command: &Command, _cancel: CancellationToken) -> Result<(), ControllerError> {
            let _ = self.started.send(command.wlid.clone());
            let permit = self.gate.acquire().await.map_err(|_| ControllerError::PoolClosed)?;
            permit.forget();
            if command.wlid == "fail" {
                return Err(ControllerError::Watch("boom".to_string()));
            }
            Ok(())
        }
    }

    fn command(wlid: &str) -> Command {
        Command::new(CommandName::ScanWorkload, wlid, CommandArgs::None)
    }

    struct Harness {
        pool: WorkerPool,
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
        metrics: Metrics,
        _workers: JoinSet<()>,
    }

    fn gated(concurrency: usize, queue: usize) -> Harness {
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, started) = mpsc::unbounded_channel();
        let executor = Arc::new(GatedExecutor {
            gate: Arc::clone(&gate),
            started: started_tx,
        });
        let cancel = CancellationToken::new();
        let metrics = Metrics::new().unwrap();
        let (pool, workers) = WorkerPool::start(executor, concurrency, queue, cancel.clone(), Some(metrics.clone()));
        Harness {
            pool,
            gate,
            started,
            cancel,
            metrics,
            _workers: workers,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_blocks_when_saturated() {
        let Harness { pool, gate, mut started, _workers, .. } = gated(1, 1);

        pool.submit(command("a")).await.unwrap();
        assert_eq!(started.recv().await.unwrap(), "a");
        // worker busy, one slot in the queue
        pool.submit(command("b")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(100), pool.submit(command("c"))).await;
        assert!(blocked.is_err());

        gate.add_permits(3);
        tokio::time::timeout(Duration::from_secs(1), pool.submit(command("c")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.recv().await.unwrap(), "b");
        assert_eq!(started.recv().await.unwrap(), "c");
    }

    #[tokio::test]
    async fn test_report_outcome_and_metrics() {
        let Harness { pool, gate, metrics, _workers, .. } = gated(2, 4);
        gate.add_permits(2);

        let ok = pool.submit_with_report(command("ok")).await.unwrap();
        let failed = pool.submit_with_report(command("fail")).await.unwrap();

        assert_eq!(ok.await.unwrap(), Ok(()));
        let err = failed.await.unwrap().unwrap_err();
        assert!(err.contains("boom"));
        assert_eq!(
            metrics.commands_executed.with_label_values(&["kubescapeScan", "success"]).get(),
            1
        );
        assert_eq!(
            metrics.commands_executed.with_label_values(&["kubescapeScan", "failure"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let Harness { pool, _workers, .. } = gated(1, 1);
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.submit(command("a")).await, Err(ControllerError::PoolClosed)));

        let Harness { pool, cancel, _workers, .. } = gated(1, 1);
        cancel.cancel();
        assert!(matches!(pool.submit(command("a")).await, Err(ControllerError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_forward_drains_into_pool() {
        let Harness { pool, gate, mut started, _workers, .. } = gated(2, 4);
        gate.add_permits(2);
        let (tx, rx) = mpsc::channel(4);
        tx.send(command("one")).await.unwrap();
        tx.send(command("two")).await.unwrap();
        drop(tx);

        forward(rx, pool).await;
        let mut seen = vec![started.recv().await.unwrap(), started.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_scanner_executor_routes_commands() {
        let client = Arc::new(MockScannerClient::new());
        let executor = ScannerExecutor::new(Arc::clone(&client));
        let container = ContainerData {
            image_id: "docker.io/library/nginx@sha256:abcd".to_string(),
            image_tag: "nginx:1.27".to_string(),
            container_name: "nginx".to_string(),
            wlid: "wlid://cluster-c/namespace-default/deployment-web".to_string(),
            ..Default::default()
        };

        let commands = [
            Command::scan_images(container.clone(), None),
            Command::new(
                CommandName::ScanFilteredSbom,
                container.wlid.clone(),
                CommandArgs::Container { container_data: container, pod: None },
            ),
            Command::new(
                CommandName::ScanContainerProfile,
                "wlid://cluster-c/namespace-default/pod-debug",
                CommandArgs::Profile {
                    name: "pod-debug".to_string(),
                    namespace: "default".to_string(),
                    pod: None,
                },
            ),
            Command::new(CommandName::ScanWorkload, "wlid://cluster-c/namespace-default/deployment-web", CommandArgs::None),
        ];
        for cmd in &commands {
            executor.execute(cmd, CancellationToken::new()).await.unwrap();
        }

        let requests = client.requests();
        assert_eq!(requests.len(), 4);
        let RecordedRequest::Image(image) = &requests[0] else {
            panic!("expected image scan");
        };
        assert_eq!(image.image_hash, "abcd");
        assert_eq!(image.image_tag, "nginx:1.27");
        assert!(matches!(requests[1], RecordedRequest::FilteredSbom(_)));
        let RecordedRequest::Profile(profile) = &requests[2] else {
            panic!("expected profile scan");
        };
        assert_eq!(profile.kind, ProfileKind::ContainerProfile);
        assert!(matches!(requests[3], RecordedRequest::Workload(_)));
    }

    #[tokio::test]
    async fn test_scanner_executor_errors() {
        let client = Arc::new(MockScannerClient::new());
        let executor = ScannerExecutor::new(Arc::clone(&client));

        let mismatched = Command::new(CommandName::ScanImages, "wlid://x", CommandArgs::None);
        let result = executor.execute(&mismatched, CancellationToken::new()).await;
        assert!(matches!(result, Err(ControllerError::Serialization(_))));

        client.fail_next("scanner unavailable");
        let result = executor
            .execute(&command("wlid://cluster-c/namespace-default/deployment-web"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ControllerError::Scanner(_))));
        assert!(client.requests().is_empty());
    }
}
