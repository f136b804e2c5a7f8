use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::orchestrator::{cluster, deployment};
use crate::Services;

const QUEUE_CAPACITY: usize = 8;
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum ClusterCommand {
    CreateCluster,
    DeleteCluster,
    CreateDeployment { deployment_id: Uuid },
    UpdateDeployment { deployment_id: Uuid },
    DeleteDeployment { deployment_id: Uuid },
}

struct WorkerHandle {
    tx: mpsc::Sender<ClusterCommand>,
    cancel: Arc<AtomicBool>,
}

type WorkerMap = Arc<Mutex<HashMap<Uuid, WorkerHandle>>>;

pub struct Orchestrator {
    services: Arc<Services>,
    workers: WorkerMap,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>) -> Arc<Self> {
        Arc::new(Orchestrator {
            services,
            workers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Enqueue a command on the cluster's worker, spawning the worker on
    /// first use. A full queue surfaces as 503 to the caller.
    pub fn submit(&self, cluster_id: Uuid, command: ClusterCommand) -> Result<(), ApiError> {
        let mut workers = self.workers.lock().expect("worker registry poisoned");
        let handle = workers
            .entry(cluster_id)
            .or_insert_with(|| spawn_worker(self.services.clone(), self.workers.clone(), cluster_id));

        // A delete request doubles as the cancellation signal for whatever
        // the worker is currently doing; the create observes it at its next
        // step boundary and the queued delete then runs the teardown.
        if matches!(command, ClusterCommand::DeleteCluster) {
            handle.cancel.store(true, Ordering::SeqCst);
        }

        handle.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ApiError::Busy,
            mpsc::error::TrySendError::Closed(_) => {
                ApiError::Internal(anyhow::anyhow!("cluster worker is gone"))
            }
        })
    }

    pub fn has_worker(&self, cluster_id: Uuid) -> bool {
        self.workers
            .lock()
            .expect("worker registry poisoned")
            .contains_key(&cluster_id)
    }

    /// Periodic observational sweep: clusters stuck in a non-terminal state
    /// with no live worker are logged so an operator can intervene.
    pub fn start_reconciler(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match orchestrator.services.store.clusters_in_flight().await {
                    Ok(stuck) => {
                        for (id, name, status) in stuck {
                            if !orchestrator.has_worker(id) {
                                warn!(
                                    cluster = %name,
                                    %id,
                                    %status,
                                    "cluster is in a non-terminal state with no active worker"
                                );
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "reconciliation sweep failed"),
                }
            }
        });
    }
}

fn spawn_worker(services: Arc<Services>, workers: WorkerMap, cluster_id: Uuid) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = cancel.clone();

    tokio::spawn(async move {
        run_worker(services, workers, cluster_id, rx, worker_cancel).await;
    });

    WorkerHandle { tx, cancel }
}

async fn run_worker(
    services: Arc<Services>,
    workers: WorkerMap,
    cluster_id: Uuid,
    mut rx: mpsc::Receiver<ClusterCommand>,
    cancel: Arc<AtomicBool>,
) {
    info!(%cluster_id, "cluster worker started");

    while let Some(command) = rx.recv().await {
        match command {
            ClusterCommand::CreateCluster => {
                cluster::create(&services, cluster_id, cancel.as_ref()).await;
            }
            ClusterCommand::DeleteCluster => {
                cancel.store(false, Ordering::SeqCst);
                if cluster::delete(&services, cluster_id).await {
                    break;
                }
            }
            ClusterCommand::CreateDeployment { deployment_id } => {
                deployment::install(&services, cluster_id, deployment_id, false).await;
            }
            ClusterCommand::UpdateDeployment { deployment_id } => {
                deployment::install(&services, cluster_id, deployment_id, true).await;
            }
            ClusterCommand::DeleteDeployment { deployment_id } => {
                deployment::remove(&services, cluster_id, deployment_id).await;
            }
        }
    }

    workers
        .lock()
        .expect("worker registry poisoned")
        .remove(&cluster_id);
    info!(%cluster_id, "cluster worker stopped");
}
