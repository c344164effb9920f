//! The notification controller facade
//!
//! Owns the SOAP client, credentials, listener registry, project cache and
//! the long-poll worker task: a facade mutex, retry-once-on-falsy unary
//! ops, a pending-enable queue drained by the worker, and a
//! reauthentication policy, all built on a `tokio::sync::Mutex` held
//! across `.await` points and a spawned tokio task, following this
//! crate's async-runtime idiom throughout rather than introducing OS
//! threads.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[cfg(feature = "tracing")]
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::error::IhcResult;
use crate::soap::{SoapClient, IHCSTATE_READY};
use crate::transport::{Session, TlsMode};
use crate::value::{ResourceId, ResourceValue};

/// A registered value-change callback.
pub type Listener = Arc<dyn Fn(ResourceId, ResourceValue) + Send + Sync>;

struct FacadeState {
    listeners: HashMap<ResourceId, Vec<Listener>>,
    pending_enable: Vec<ResourceId>,
    project_cache: Option<Vec<u8>>,
}

struct Inner {
    client: SoapClient,
    username: String,
    password: String,
    config: ControllerConfig,
    state: Mutex<FacadeState>,
    running: AtomicBool,
    worker_started: AtomicBool,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The public facade over one controller connection.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(base_url: &str, username: &str, password: &str, tls: TlsMode) -> IhcResult<Self> {
        Self::with_config(base_url, username, password, tls, ControllerConfig::default())
    }

    pub fn with_config(
        base_url: &str,
        username: &str,
        password: &str,
        tls: TlsMode,
        config: ControllerConfig,
    ) -> IhcResult<Self> {
        let session = Session::new(
            base_url,
            tls,
            config.min_interval,
            config.retry_attempts,
            config.retry_backoff_factor,
            config.request_timeout,
        )?;
        let client = SoapClient::new(session);
        let inner = Inner {
            client,
            username: username.to_string(),
            password: password.to_string(),
            config,
            state: Mutex::new(FacadeState {
                listeners: HashMap::new(),
                pending_enable: Vec::new(),
                project_cache: None,
            }),
            running: AtomicBool::new(false),
            worker_started: AtomicBool::new(false),
            worker_handle: Mutex::new(None),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Authenticate and, on success, re-enable notifications for every
    /// currently-registered listener id in one call.
    pub async fn authenticate(&self) -> IhcResult<bool> {
        let state = self.inner.state.lock().await;
        let ok = self.inner.client.authenticate(&self.inner.username, &self.inner.password).await?;
        if ok {
            let ids: Vec<ResourceId> = state.listeners.keys().copied().collect();
            if !ids.is_empty() {
                let _ = self.inner.client.enable_runtime_value_notifications(&ids).await;
            }
        }
        Ok(ok)
    }

    /// Signal the worker to stop at its next check point. Does not join it
    /// synchronously.
    pub fn disconnect(&self) {
        self.inner.running.store(false, Ordering::Release);
    }

    /// Non-retrying read: the full taxonomy, with `Ok(None)` meaning
    /// "absent" rather than conflating it with failure.
    pub async fn try_get_runtime_value(&self, id: ResourceId) -> IhcResult<Option<ResourceValue>> {
        self.inner.client.get_resource_value(id).await
    }

    /// Legacy falsy-retry surface: a `false`/absent/failed read triggers
    /// one `re_authenticate` + retry, matching
    /// `IHCController.get_runtime_value`.
    pub async fn get_runtime_value(&self, id: ResourceId) -> IhcResult<bool> {
        if is_truthy(&self.inner.client.get_resource_value(id).await) {
            return Ok(true);
        }
        self.re_authenticate(false).await;
        Ok(is_truthy(&self.inner.client.get_resource_value(id).await))
    }

    pub async fn set_runtime_value_bool(&self, id: ResourceId, value: bool) -> IhcResult<bool> {
        self.retry_on_failure(|| self.inner.client.set_resource_value_bool(id, value)).await
    }

    pub async fn set_runtime_value_int(&self, id: ResourceId, value: i32) -> IhcResult<bool> {
        self.retry_on_failure(|| self.inner.client.set_resource_value_int(id, value)).await
    }

    pub async fn set_runtime_value_float(&self, id: ResourceId, value: f64) -> IhcResult<bool> {
        self.retry_on_failure(|| self.inner.client.set_resource_value_float(id, value)).await
    }

    async fn retry_on_failure<F, Fut>(&self, op: F) -> IhcResult<bool>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = IhcResult<bool>>,
    {
        if let Ok(true) = op().await {
            return Ok(true);
        }
        self.re_authenticate(false).await;
        op().await
    }

    /// Project gating: block until the controller reports
    /// ready, then fetch and cache. Returns `Ok(None)` ("absent") if the
    /// controller never reaches ready within the wait budget.
    pub async fn get_project(&self) -> IhcResult<Option<Vec<u8>>> {
        let mut state = self.inner.state.lock().await;
        if let Some(project) = &state.project_cache {
            return Ok(Some(project.clone()));
        }
        let ready = self.inner.client.get_state().await? == IHCSTATE_READY
            || self
                .inner
                .client
                .wait_for_controller_state_change(IHCSTATE_READY, 10)
                .await?
                == IHCSTATE_READY;
        if !ready {
            return Ok(None);
        }
        let project = self.inner.client.get_project().await?;
        state.project_cache = Some(project.clone());
        Ok(Some(project))
    }

    /// Register a callback for `id`. Starts the worker on first call.
    /// `delayed` defers the wire-level enable call to the worker's next
    /// turn instead of issuing it from the caller's thread.
    pub async fn add_notify_event<F>(&self, id: ResourceId, callback: F, delayed: bool) -> IhcResult<bool>
    where
        F: Fn(ResourceId, ResourceValue) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        let mut enabled = true;
        {
            let mut state = self.inner.state.lock().await;
            let is_new = !state.listeners.contains_key(&id);
            state.listeners.entry(id).or_default().push(listener);
            if is_new {
                if delayed {
                    state.pending_enable.push(id);
                } else {
                    match self.inner.client.enable_runtime_value_notifications(&[id]).await {
                        Ok(true) => {}
                        _ => enabled = false,
                    }
                }
            }
        }
        self.ensure_worker_started().await;
        Ok(enabled)
    }

    async fn ensure_worker_started(&self) {
        if self
            .inner
            .worker_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let worker = self.clone();
            let handle = tokio::spawn(worker.run_worker());
            *self.inner.worker_handle.lock().await = Some(handle);
        }
    }

    async fn run_worker(self) {
        self.inner.running.store(true, Ordering::Release);
        #[cfg(feature = "tracing")]
        info!("notification worker starting");
        loop {
            if !self.inner.running.load(Ordering::Acquire) {
                break;
            }

            let pending = self.drain_pending_enable().await;
            if !pending.is_empty() {
                let _ = self.inner.client.enable_runtime_value_notifications(&pending).await;
            }

            match self
                .inner
                .client
                .wait_for_resource_value_changes(self.inner.config.default_wait_seconds)
                .await
            {
                Ok(changes) => self.dispatch_changes(changes).await,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(error = %_err, "long poll failed, reauthenticating");
                    self.re_authenticate(true).await;
                }
            }

            if !self.inner.running.load(Ordering::Acquire) {
                break;
            }
        }
        #[cfg(feature = "tracing")]
        info!("notification worker stopped");
    }

    async fn drain_pending_enable(&self) -> Vec<ResourceId> {
        let mut state = self.inner.state.lock().await;
        if state.pending_enable.is_empty() {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        state.pending_enable.drain(..).filter(|id| seen.insert(*id)).collect()
    }

    /// Dispatch each `(id, value)` pair, in the controller's reply order,
    /// to a lock-released snapshot of that id's listeners, in registration
    /// order. A listener panic is caught and logged; it does not kill the
    /// worker or abort dispatch to the remaining listeners.
    async fn dispatch_changes(&self, changes: Vec<(ResourceId, ResourceValue)>) {
        for (id, value) in changes {
            let callbacks = {
                let state = self.inner.state.lock().await;
                state.listeners.get(&id).cloned().unwrap_or_default()
            };
            for callback in callbacks {
                let value = value.clone();
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(id, value)));
                if result.is_err() {
                    #[cfg(feature = "tracing")]
                    error!(resource_id = %id, "listener callback panicked, continuing dispatch");
                }
            }
        }
    }

    /// Reauthentication policy: loop `authenticate()`, sleeping
    /// `retryinterval` between attempts. From the worker, retry as long as
    /// `running` stays true; otherwise bail out after `reauthenticatetimeout`.
    pub async fn re_authenticate(&self, from_worker: bool) -> bool {
        let deadline = Instant::now() + self.inner.config.reauthenticatetimeout;
        loop {
            if let Ok(true) = self.authenticate().await {
                return true;
            }
            if from_worker {
                if !self.inner.running.load(Ordering::Acquire) {
                    return false;
                }
            } else if Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(self.inner.config.retryinterval).await;
        }
    }
}

/// Mirrors the Python source's implicit truthiness test used to decide
/// whether a read needs a reauth-and-retry: absent, `false`, zero and empty-string values all count as
/// falsy. Composite values (time/date/datetime) have no natural falsy
/// state and are always truthy.
fn is_truthy(value: &IhcResult<Option<ResourceValue>>) -> bool {
    match value {
        Ok(Some(ResourceValue::Bool(b))) => *b,
        Ok(Some(ResourceValue::Int(i))) => *i != 0,
        Ok(Some(ResourceValue::Float(f))) => *f != 0.0,
        Ok(Some(ResourceValue::EnumName(s))) | Ok(Some(ResourceValue::Raw(s))) => !s.is_empty(),
        Ok(Some(ResourceValue::TimerMilliseconds(m))) => *m != 0,
        Ok(Some(ResourceValue::TimeOfDay(_))) | Ok(Some(ResourceValue::DateTime(_))) | Ok(Some(ResourceValue::Date(_))) => true,
        Ok(None) | Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_python_falsy_rules() {
        assert!(!is_truthy(&Ok(None)));
        assert!(!is_truthy(&Ok(Some(ResourceValue::Bool(false)))));
        assert!(is_truthy(&Ok(Some(ResourceValue::Bool(true)))));
        assert!(!is_truthy(&Ok(Some(ResourceValue::Int(0)))));
        assert!(is_truthy(&Ok(Some(ResourceValue::Int(1)))));
        assert!(!is_truthy(&Ok(Some(ResourceValue::EnumName(String::new())))));
        assert!(is_truthy(&Ok(Some(ResourceValue::TimeOfDay(crate::value::TimeOfDay {
            hours: 0,
            minutes: 0,
            seconds: 0,
        })))));
    }
}
