//! Kubernetes resource watcher.
//!
//! Watches MachineRequest resources labelled for this provider and drives
//! them through `kube_runtime::Controller`, which guarantees at most one
//! reconciliation per request at a time and handles reconnects.

use crate::error::ControllerError;
use crate::reconciler::{request_id, Reconciler, DEPROVISION_FINALIZER};
use crds::{MachineRequest, PROVIDER_ID_LABEL};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{self, Action, Config as ControllerConfig};
use kube_runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, Instrument};

/// Shared state handed to every reconciliation.
pub struct Context {
    pub client: Client,
    pub reconciler: Reconciler,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Label selector matching requests routed to `provider_id`.
pub fn provider_selector(provider_id: &str) -> String {
    format!("{PROVIDER_ID_LABEL}={provider_id}")
}

/// Watches MachineRequest resources for changes.
pub struct Watcher {
    context: Arc<Context>,
    api: Api<MachineRequest>,
    provider_id: String,
    ready: Arc<AtomicBool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(context: Arc<Context>, api: Api<MachineRequest>, provider_id: String, ready: Arc<AtomicBool>) -> Self {
        Self {
            context,
            api,
            provider_id,
            ready,
        }
    }

    /// Runs the controller until a shutdown signal arrives.
    pub async fn watch_machine_requests(self) -> Result<(), ControllerError> {
        let selector = provider_selector(&self.provider_id);
        info!("Starting MachineRequest watcher ({})", selector);

        // short debounce: status patches of our own arrive in bursts
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(8);

        self.ready.store(true, Ordering::Release);

        Controller::new(self.api, watcher::Config::default().labels(&selector))
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context)
            .for_each(|res| async move {
                match res {
                    Ok((request, _)) => debug!("Reconciled MachineRequest {}", request.name),
                    Err(controller::Error::ReconcilerFailed(err, request)) if err.requeue_after().is_some() => {
                        debug!("MachineRequest {} still deprovisioning", request.name);
                    }
                    Err(e) => error!("MachineRequest controller error: {}", e),
                }
            })
            .await;

        info!("MachineRequest watcher stopped");
        Ok(())
    }
}

async fn reconcile(request: Arc<MachineRequest>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let namespace = request.namespace().unwrap_or_default();
    let span = info_span!("reconcile", request_id = %request_id(&request), namespace = %namespace);
    let api: Api<MachineRequest> = Api::namespaced(ctx.client.clone(), &namespace);

    async {
        finalizer(&api, DEPROVISION_FINALIZER, request, |event| async {
            match event {
                FinalizerEvent::Apply(request) => ctx.reconciler.apply(&api, &request).await,
                FinalizerEvent::Cleanup(request) => ctx.reconciler.cleanup(&api, &request).await,
            }
        })
        .await
        .map_err(|e| ControllerError::Finalizer(Box::new(e)))
    }
    .instrument(span)
    .await
}

fn error_policy(request: Arc<MachineRequest>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    if let Some(delay) = error.requeue_after() {
        return Action::requeue(delay);
    }
    let key = request_id(&request);
    let delay = ctx.reconciler.backoff_delay(&key);
    error!("Reconciliation error for MachineRequest {}: {} (retry in {:?})", key, error, delay);
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selector() {
        assert_eq!(provider_selector("kubevirt"), "kubevirt.microscaler.io/provider=kubevirt");
    }
}
