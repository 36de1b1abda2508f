//! Main controller implementation.
//!
//! Wires every part of the operator together and supervises the resulting
//! tasks:
//! - streaming watches: pods, SBOMs, filtered SBOMs, continuous-scanning workloads
//! - polling watches: application and container profiles
//! - the command watcher and its `OperatorAPI` consumer
//! - the worker pool, fed by every handler and by the HTTP trigger endpoint
//! - the HTTP server
//!
//! The controller stops on Ctrl-C, on cancellation of its token, or when a
//! task fails. Shutdown cancels everything, closes the pool and gives the
//! tasks a grace period to finish.

use crate::backoff::ExponentialBackoff;
use crate::config::{CooldownConfig, OperatorConfig};
use crate::cooldown::CooldownQueue;
use crate::dispatch::{self, ScannerExecutor, WorkerPool};
use crate::error::{ControllerError, WatchError};
use crate::event::{KeyedObject, WatchEvent};
use crate::handlers::{
    run_handler, Emitter, EventHandler, FilteredSbomHandler, HandlerFailure, KubeStatusReporter, MatchingRules,
    OperatorCommandsHandler, PodHandler, ProfileHandler, SbomHandler, WorkloadHandler,
};
use crate::lookup::{ClusterLookup, KubeLookup};
use crate::metrics::Metrics;
use crate::server::{self, AppState};
use crate::source::{resolve_gvrs, KubeSource, ListOptions, ResourceSource};
use crate::state::{ImageIndex, WatchState};
use crate::watcher::{CommandWatcher, GenericResourceWatch, Readiness, SelfHealingWatch, WatchPool};
use crds::operator_command::{OPERATOR_COMMAND_APP_NAME, OPERATOR_COMMAND_APP_NAME_LABEL};
use crds::{ApplicationProfile, ContainerProfile, OperatorCommand, SBOMSyft, SBOMSyftFiltered};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::{Api, Client, Resource};
use scanner_client::ScannerClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time tasks get to finish after shutdown was requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

type TaskResult = (&'static str, Result<(), ControllerError>);

/// Main controller of the scan operator.
pub struct Controller {
    config: OperatorConfig,
    client: Client,
    metrics: Metrics,
    readiness: Readiness,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing scan operator for cluster {}", config.cluster_name);
        let client = Client::try_default().await?;
        Ok(Self {
            config,
            client,
            metrics: Metrics::new()?,
            readiness: Readiness::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the controller when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        let mut wiring = Wiring::new(&self)?;
        wiring.pods(&self);
        wiring.sboms(&self);
        wiring.profiles(&self);
        wiring.commands(&self);
        if self.config.continuous_scan_enabled {
            wiring.continuous_scanning(&self).await?;
        }
        wiring.server(&self);
        let Wiring { mut tasks, pool, .. } = wiring;
        info!("Scan operator running with {} tasks", tasks.len());

        let outcome = loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Cannot listen for Ctrl-C: {}", e);
                    }
                    info!("Received Ctrl-C, shutting down");
                    break Ok(());
                }
                () = self.cancel.cancelled() => break Ok(()),
                joined = tasks.join_next() => match joined {
                    None => break Ok(()),
                    Some(Ok((name, Ok(())))) => debug!("{} finished", name),
                    Some(Ok((name, Err(e)))) => {
                        error!("{} failed: {}", name, e);
                        break Err(e);
                    }
                    Some(Err(e)) => break Err(ControllerError::Watch(format!("task panicked: {}", e))),
                },
            }
        };

        self.cancel.cancel();
        pool.close();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((name, Err(e))) = joined {
                    debug!("{} ended during shutdown: {}", name, e);
                }
            }
        })
        .await;
        if drained.is_err() {
            info!("Aborting {} tasks still running after {:?}", tasks.len(), SHUTDOWN_GRACE);
            tasks.abort_all();
        }
        info!("Scan operator stopped");
        outcome
    }
}

/// Shared pieces used while spawning the controller's tasks
struct Wiring {
    tasks: JoinSet<TaskResult>,
    emitter: Emitter,
    pool: WorkerPool,
    lookup: Arc<dyn ClusterLookup>,
    // shared by the pod and SBOM handlers
    index: ImageIndex,
}

impl Wiring {
    fn new(controller: &Controller) -> Result<Self, ControllerError> {
        let config = &controller.config;
        let mut tasks = JoinSet::new();

        let scanner = ScannerClient::new(config.vuln_scan_url.clone(), config.config_scan_url.clone())?;
        let (pool, mut workers) = WorkerPool::start(
            Arc::new(ScannerExecutor::new(Arc::new(scanner))),
            config.worker_concurrency,
            config.worker_queue_size,
            controller.cancel.clone(),
            Some(controller.metrics.clone()),
        );
        tasks.spawn(async move {
            while workers.join_next().await.is_some() {}
            ("worker pool", Ok(()))
        });

        let (commands_tx, commands_rx) = mpsc::channel(config.worker_queue_size);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(commands_tx, errors_tx).with_metrics(controller.metrics.clone());
        let forward_pool = pool.clone();
        tasks.spawn(async move {
            dispatch::forward(commands_rx, forward_pool).await;
            ("command forwarder", Ok(()))
        });
        tasks.spawn(async move {
            log_failures(errors_rx).await;
            ("handler errors", Ok(()))
        });

        Ok(Self {
            tasks,
            emitter,
            pool,
            lookup: Arc::new(KubeLookup::new(controller.client.clone())),
            index: ImageIndex::new(),
        })
    }

    fn backoff(config: &OperatorConfig) -> ExponentialBackoff {
        ExponentialBackoff::new(config.backoff_initial, config.backoff_max)
    }

    /// Stream `source` through a cooldown queue into `handler`
    fn stream<K, H>(
        &mut self,
        controller: &Controller,
        source: Arc<dyn ResourceSource<K>>,
        opts: ListOptions,
        cooldown: &CooldownConfig,
        handler: H,
    ) where
        K: Resource + KeyedObject + Clone + Send + Sync + 'static,
        H: EventHandler<K> + 'static,
    {
        let name = source.describe();
        let ready = controller.readiness.register(name.clone());
        let watch = SelfHealingWatch::new(source, opts)
            .with_backoff(Self::backoff(&controller.config))
            .with_ready_flag(ready);
        let (queue, events) = CooldownQueue::new(&name, cooldown.capacity, cooldown.ttl);
        let queue = queue.with_metrics(controller.metrics.clone());

        let cancel = controller.cancel.clone();
        info!("Starting {} watcher", name);
        self.tasks.spawn(async move {
            let reason = watch.run(queue.clone(), cancel).await;
            queue.stop();
            ("watch", watch_outcome(reason))
        });
        self.spawn_handler(handler, events);
    }

    /// Poll `source` through a cooldown queue into `handler`
    fn poll<K, H>(&mut self, controller: &Controller, source: Arc<dyn ResourceSource<K>>, handler: H)
    where
        K: KeyedObject + Clone + Send + Sync + 'static,
        H: EventHandler<K> + 'static,
    {
        let config = &controller.config;
        let name = source.describe();
        let watch = GenericResourceWatch::new(source, config.generic_watch_period, config.generic_watch_page_size);
        let (queue, events) = CooldownQueue::new(&name, config.profile_cooldown.capacity, config.profile_cooldown.ttl);
        let queue = queue.with_metrics(controller.metrics.clone());

        let cancel = controller.cancel.clone();
        info!("Starting {} poller every {:?}", name, config.generic_watch_period);
        self.tasks.spawn(async move {
            let reason = watch.run(queue.clone(), cancel).await;
            queue.stop();
            ("poll", watch_outcome(reason))
        });
        self.spawn_handler(handler, events);
    }

    fn spawn_handler<K, H>(&mut self, handler: H, events: mpsc::UnboundedReceiver<WatchEvent<K>>)
    where
        K: Send + 'static,
        H: EventHandler<K> + 'static,
    {
        let out = self.emitter.clone();
        self.tasks.spawn(async move {
            run_handler(Arc::new(handler), events, out).await;
            ("handler", Ok(()))
        });
    }

    fn pods(&mut self, controller: &Controller) {
        let config = &controller.config;
        let source = KubeSource::new(Api::<Pod>::all(controller.client.clone()), "v1/pods");
        let opts = ListOptions::default().fields("status.phase=Running");
        let handler = PodHandler::new(
            config.cluster_name.clone(),
            WatchState::new(),
            self.index.clone(),
            Arc::clone(&self.lookup),
        )
        .with_guard_time(config.pod_scan_guard_time)
        .with_namespaces(config.include_namespaces.clone(), config.exclude_namespaces.clone());
        self.stream::<Pod, _>(controller, Arc::new(source), opts, &config.cooldown, handler);
    }

    fn sboms(&mut self, controller: &Controller) {
        let config = &controller.config;
        let client = controller.client.clone();

        let sboms = KubeSource::new(Api::<SBOMSyft>::all(client.clone()), "sbomsyfts");
        self.stream::<SBOMSyft, _>(
            controller,
            Arc::new(sboms),
            ListOptions::default(),
            &config.cooldown,
            SbomHandler::new(self.index.clone()),
        );

        let filtered = KubeSource::new(Api::<SBOMSyftFiltered>::all(client), "sbomsyftfiltereds");
        self.stream::<SBOMSyftFiltered, _>(
            controller,
            Arc::new(filtered),
            ListOptions::default(),
            &config.cooldown,
            FilteredSbomHandler::new(WatchState::new()),
        );
    }

    fn profiles(&mut self, controller: &Controller) {
        let skip = controller.config.skip_profiles_without_instances;
        let client = controller.client.clone();

        let application = KubeSource::new(Api::<ApplicationProfile>::all(client.clone()), "applicationprofiles");
        let handler = ProfileHandler::<ApplicationProfile>::new(Arc::clone(&self.lookup)).skip_without_instances(skip);
        self.poll::<ApplicationProfile, _>(controller, Arc::new(application), handler);

        let container = KubeSource::new(Api::<ContainerProfile>::all(client), "containerprofiles");
        let handler = ProfileHandler::<ContainerProfile>::new(Arc::clone(&self.lookup)).skip_without_instances(skip);
        self.poll::<ContainerProfile, _>(controller, Arc::new(container), handler);
    }

    fn commands(&mut self, controller: &Controller) {
        let config = &controller.config;
        let api = Api::<OperatorCommand>::namespaced(controller.client.clone(), &config.namespace);
        let source = KubeSource::new(api, format!("{}/operatorcommands", config.namespace));
        let selector = format!("{}={}", OPERATOR_COMMAND_APP_NAME_LABEL, OPERATOR_COMMAND_APP_NAME);

        let mut watcher = CommandWatcher::new(Arc::new(source), ListOptions::default().labels(&selector))
            .with_max_age(config.command_max_age)
            .with_cooldown(config.cooldown.clone())
            .with_backoff(Self::backoff(config))
            .with_page_size(config.generic_watch_page_size)
            .with_ready_flag(controller.readiness.register("operatorcommands"));
        let received = watcher.register_for_commands();

        let cancel = controller.cancel.clone();
        info!("Starting operator command watcher in {}", config.namespace);
        self.tasks.spawn(async move { ("command watcher", watch_outcome(watcher.run(cancel).await)) });

        let consumer = OperatorCommandsHandler::new(
            self.pool.clone(),
            Arc::new(KubeStatusReporter::new(controller.client.clone())),
        );
        let cancel = controller.cancel.clone();
        self.tasks.spawn(async move {
            consumer.run(received, cancel).await;
            ("operator commands", Ok(()))
        });
    }

    async fn continuous_scanning(&mut self, controller: &Controller) -> Result<(), ControllerError> {
        let config = &controller.config;
        let rules = MatchingRules::from_file(Path::new(&config.matching_rules_filename))?;
        let (resolved, unknown) = resolve_gvrs(controller.client.clone(), &rules.gvrs()).await?;
        for gvr in unknown {
            warn!("Not watching {}: resource not served by the cluster", gvr);
        }

        let mut pool = WatchPool::<DynamicObject>::new();
        for (gvr, resource) in resolved {
            let source: Arc<dyn ResourceSource<DynamicObject>> =
                Arc::new(KubeSource::dynamic(controller.client.clone(), &resource));
            let watch = SelfHealingWatch::new(source, ListOptions::default())
                .with_backoff(Self::backoff(config))
                .with_ready_flag(controller.readiness.register(gvr.to_string()));
            pool.add(watch);
        }
        if pool.is_empty() {
            warn!("Continuous scanning enabled but no matching resources were found");
            return Ok(());
        }

        let (queue, events) = CooldownQueue::new("workloads", config.cooldown.capacity, config.cooldown.ttl);
        let queue = queue.with_metrics(controller.metrics.clone());
        let cancel = controller.cancel.clone();
        info!("Starting continuous scanning of {} resources", pool.len());
        self.tasks.spawn(async move {
            pool.run(queue.clone(), cancel).await;
            queue.stop();
            ("continuous scanning", Ok(()))
        });
        self.spawn_handler(WorkloadHandler::new(config.cluster_name.clone(), rules.namespaces), events);
        Ok(())
    }

    fn server(&mut self, controller: &Controller) {
        let state = AppState {
            readiness: controller.readiness.clone(),
            metrics: controller.metrics.clone(),
            pool: self.pool.clone(),
        };
        let addr = controller.config.listen_addr.clone();
        let cancel = controller.cancel.clone();
        self.tasks.spawn(async move { ("http server", server::serve(&addr, state, cancel).await) });
    }
}

/// A watch ending on shutdown is not a failure
fn watch_outcome(reason: WatchError) -> Result<(), ControllerError> {
    if reason.is_shutdown() {
        Ok(())
    } else {
        Err(reason.into())
    }
}

async fn log_failures(mut errors: mpsc::UnboundedReceiver<HandlerFailure>) {
    while let Some(failure) = errors.recv().await {
        warn!("{} handler dropped an event: {}", failure.handler, failure.error);
    }
}
