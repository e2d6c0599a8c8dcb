//! Kubernetes resource watchers.
//!
//! Each custom resource kind is driven by a `kube_runtime::Controller`
//! through the generic [`watch_resource`] helper. Resources named in
//! SpecialResourceModule `watch` entries get a plain watcher each, spawned
//! on demand, whose events are fed to [`DynamicWatches`].

use crate::backoff::BackoffTracker;
use crate::dynamic_watch::{DynamicWatches, WatchKey};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use cluster_client::gvk_from;
use crds::{PreflightValidation, SpecialResource, SpecialResourceModule};
use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::{Api, Client, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller::{Action, Config as ControllerConfig}, watcher, Controller, WatchStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

fn sr_backoff(reconciler: &Reconciler) -> &BackoffTracker {
    &reconciler.sr_backoff
}

fn module_backoff(reconciler: &Reconciler) -> &BackoffTracker {
    &reconciler.module_backoff
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// Reconciles run one at a time per kind. Transient outcomes requeue
/// after the delay the error asks for; everything else backs off per
/// object until the next success.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    backoff: fn(&Reconciler) -> &BackoffTracker,
    trigger: Option<BoxStream<'static, ObjectRef<K>>>,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let name = obj.name_any();
        if let Some(delay) = error.requeue_after() {
            debug!("{} {} requeued in {:?}: {}", resource_name, name, delay, error);
            return Action::requeue(delay);
        }
        let delay = backoff(&ctx).next(&format!("{}/{}", resource_name, name));
        error!("Reconciliation of {} {} failed, retrying in {:?}: {}", resource_name, name, delay, error);
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let name = obj.name_any();
            debug!("Reconciling {} {}", resource_name, name);
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            backoff(&ctx).reset(&format!("{}/{}", resource_name, name));
            Ok(action)
        }
    };

    let mut controller = Controller::new(api, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(1));
    if let Some(trigger) = trigger {
        controller = controller.reconcile_on(trigger);
    }
    controller
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("{} controller event: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches the operator's custom resources
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("reconciler", &self.reconciler).finish_non_exhaustive()
    }
}

impl Watcher {
    /// Watcher over the given API client
    pub fn new(reconciler: Arc<Reconciler>, client: Client) -> Self {
        Self { reconciler, client }
    }

    /// Drives SpecialResources
    pub async fn watch_special_resources(&self) -> Result<(), ControllerError> {
        watch_resource(
            Api::<SpecialResource>::all(self.client.clone()),
            Arc::clone(&self.reconciler),
            |reconciler, resource| {
                Box::pin(async move {
                    reconciler.reconcile_special_resource(&resource).await?;
                    Ok(Action::await_change())
                })
            },
            sr_backoff,
            None,
            "SpecialResource",
        )
        .await
    }

    /// Drives SpecialResourceModules, also on requeues from dynamic watches
    pub async fn watch_modules(&self, requeues: UnboundedReceiver<String>) -> Result<(), ControllerError> {
        let trigger = requeues
            .map(|name| ObjectRef::<SpecialResourceModule>::new(&name))
            .boxed();
        watch_resource(
            Api::<SpecialResourceModule>::all(self.client.clone()),
            Arc::clone(&self.reconciler),
            |reconciler, resource| {
                Box::pin(async move {
                    reconciler.reconcile_module(&resource).await?;
                    Ok(Action::await_change())
                })
            },
            module_backoff,
            Some(trigger),
            "SpecialResourceModule",
        )
        .await
    }

    /// Drives PreflightValidations
    pub async fn watch_preflight_validations(&self) -> Result<(), ControllerError> {
        watch_resource(
            Api::<PreflightValidation>::all(self.client.clone()),
            Arc::clone(&self.reconciler),
            |reconciler, resource| {
                Box::pin(async move {
                    Ok(match reconciler.reconcile_preflight(&resource).await? {
                        Some(delay) => Action::requeue(delay),
                        None => Action::await_change(),
                    })
                })
            },
            sr_backoff,
            None,
            "PreflightValidation",
        )
        .await
    }

    /// Spawns one watch task per resource announced by the dynamic watch
    /// registry, for as long as some module watches it
    pub async fn watch_dynamic(
        &self,
        watches: Arc<DynamicWatches>,
        mut new_resources: UnboundedReceiver<WatchKey>,
    ) -> Result<(), ControllerError> {
        let mut tasks: HashMap<WatchKey, JoinHandle<()>> = HashMap::new();
        while let Some(key) = new_resources.next().await {
            let client = self.client.clone();
            let watches = Arc::clone(&watches);
            track_task(&mut tasks, key.clone(), || tokio::spawn(watch_key(client, watches, key)));
        }
        Err(ControllerError::Watch("dynamic watch registry closed".to_string()))
    }
}

/// Spawns the watch task of `key` unless one is still running, dropping
/// finished tasks. Returns whether a task was spawned.
fn track_task(
    tasks: &mut HashMap<WatchKey, JoinHandle<()>>,
    key: WatchKey,
    spawn: impl FnOnce() -> JoinHandle<()>,
) -> bool {
    tasks.retain(|_, task| !task.is_finished());
    if tasks.contains_key(&key) {
        return false;
    }
    tasks.insert(key, spawn());
    true
}

/// Feeds every event of one resource to the registry until nobody watches it
async fn watch_key(client: Client, watches: Arc<DynamicWatches>, key: WatchKey) {
    let gvk = gvk_from(&key.api_version, &key.kind);
    let (resource, _) = match kube::discovery::pinned_kind(&client, &gvk).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Cannot watch {} {}: {}", key.api_version, key.kind, e);
            return;
        }
    };
    let api: Api<DynamicObject> = match &key.namespace {
        Some(namespace) => Api::namespaced_with(client, namespace, &resource),
        None => Api::all_with(client, &resource),
    };
    let mut config = watcher::Config::default();
    if let Some(name) = &key.name {
        config = config.fields(&format!("metadata.name={}", name));
    }

    info!("Watching {} {} {}", key.api_version, key.kind, key.name.as_deref().unwrap_or("*"));
    let mut events = watcher(api, config).default_backoff().applied_objects().boxed();
    while let Some(event) = events.next().await {
        if !watches.is_watched(&key) {
            info!("No module watches {} {} anymore", key.api_version, key.kind);
            return;
        }
        let object = match event {
            Ok(object) => object,
            Err(e) => {
                warn!("Watch of {} {} failed: {}", key.api_version, key.kind, e);
                continue;
            }
        };
        let value = match serde_json::to_value(&object) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unreadable {} {}: {}", key.kind, object.name_any(), e);
                continue;
            }
        };
        match watches.observe(&key, &value) {
            Ok(modules) if !modules.is_empty() => {
                debug!("{} {} changed, requeueing {:?}", key.kind, object.name_any(), modules);
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot evaluate watch on {} {}: {}", key.kind, object.name_any(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: &str) -> WatchKey {
        WatchKey {
            api_version: "v1".to_string(),
            kind: kind.to_string(),
            name: None,
            namespace: None,
        }
    }

    #[tokio::test]
    async fn test_finished_watch_tasks_are_dropped() {
        let mut tasks = HashMap::new();
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        assert!(track_task(&mut tasks, key("ConfigMap"), || {
            tokio::spawn(async move {
                let _ = released.await;
            })
        }));
        assert!(!track_task(&mut tasks, key("ConfigMap"), || tokio::spawn(async {})));

        let done = tokio::spawn(async {});
        assert!(track_task(&mut tasks, key("Secret"), || done));
        let _ = release.send(());
        while tasks.values().any(|task| !task.is_finished()) {
            tokio::task::yield_now().await;
        }

        assert!(track_task(&mut tasks, key("Service"), || tokio::spawn(std::future::pending())));
        assert_eq!(tasks.len(), 1);
        assert!(tasks.contains_key(&key("Service")));
    }
}
