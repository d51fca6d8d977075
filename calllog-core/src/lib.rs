use std::sync::Arc;

use calllog_codec::{opt_bool, opt_value};
use calllog_policy::{
    Admission, GateDecision, PermissionGate, PermissionStatus, PROMPT_REQUEST_CODE,
};
use calllog_sched::{Executor, WriteExecutor};
use calllog_store::CallLogStore;
use calllog_types::{
    Action, PendingResult, PermissionState, ResultSink, WriteOperation, WriteRequest, WriteResult,
    WRITE_CALL_LOG,
};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod config;
pub use config::{ConfigError, WriterConfig};

/// What the embedding host must provide.
///
/// `request_permission` only starts the prompt. The answer comes back later
/// through [`CallLogWriter::on_permission_result`]; calling it from inside
/// `request_permission` would deadlock on the gate.
pub trait PluginHost: Send + Sync {
    fn has_permission(&self, permission: &str) -> bool;
    fn request_permission(&self, request_code: i32, permission: &str);
}

/// Handle returned for every invocation.
#[derive(Debug)]
pub struct Dispatch {
    /// `false` for an unknown action or an immediate permission denial.
    pub accepted: bool,
    /// Completes exactly once with the terminal result.
    pub result: PendingResult,
}

/// The plugin: command dispatch in front of the permission gate and the
/// background write executor.
pub struct CallLogWriter {
    host: Arc<dyn PluginHost>,
    executor: Arc<dyn Executor>,
    gate: Mutex<PermissionGate<WriteRequest>>,
}

impl CallLogWriter {
    pub fn new(host: Arc<dyn PluginHost>, executor: Arc<dyn Executor>) -> Self {
        Self {
            host,
            executor,
            gate: Mutex::new(PermissionGate::new()),
        }
    }

    /// Wire a [`WriteExecutor`] over `store` as configured.
    pub fn with_store(
        host: Arc<dyn PluginHost>,
        store: Arc<dyn CallLogStore>,
        config: &WriterConfig,
    ) -> Self {
        let executor =
            WriteExecutor::new(store, config.max_concurrent_writes, config.insert_strategy);
        Self::new(host, Arc::new(executor))
    }

    /// Entry point for the script bridge: an action name plus its ordered arguments.
    ///
    /// `writeBulk`: `[entries, declaresPermission]`. `clear`: `[declaresPermission]`.
    pub async fn execute(&self, action: &str, args: &[Value]) -> Dispatch {
        let action: Action = match action.parse() {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "invalid action");
                let (sink, result) = ResultSink::channel(Uuid::new_v4());
                sink.deliver(WriteResult::InvalidAction);
                return Dispatch {
                    accepted: false,
                    result,
                };
            }
        };

        let (operation, declared) = match action {
            Action::WriteBulk => (
                WriteOperation::WriteBulk {
                    records: opt_value(args, 0),
                },
                opt_bool(args, 1),
            ),
            Action::Clear => (WriteOperation::Clear, opt_bool(args, 0)),
        };

        let (request, result) = WriteRequest::new(operation, declared);
        tracing::debug!(request_id = %request.id, %action, declared, "dispatching");

        let mut gate = self.gate.lock().await;
        let accepted = self.admit(&mut gate, request);
        Dispatch { accepted, result }
    }

    /// Report the outcome of a permission prompt. Returns `false` when the
    /// result did not match an outstanding prompt and was dropped.
    pub async fn on_permission_result(
        &self,
        request_code: i32,
        grants: &[PermissionStatus],
    ) -> bool {
        let mut gate = self.gate.lock().await;
        let Some(resolution) = gate.resolve(request_code, grants) else {
            return false;
        };

        match resolution.decision {
            GateDecision::Proceed => {
                tracing::info!(request_id = %resolution.request.id, "permission granted, resuming");
                self.executor.submit(resolution.request);
            }
            _ => {
                tracing::info!(request_id = %resolution.request.id, "permission denied");
                resolution.request.complete(WriteResult::PermissionDenied);
            }
        }

        for request in resolution.waiting {
            self.admit(&mut gate, request);
        }
        true
    }

    pub async fn prompt_outstanding(&self) -> bool {
        self.gate.lock().await.prompt_outstanding()
    }

    fn admit(&self, gate: &mut PermissionGate<WriteRequest>, request: WriteRequest) -> bool {
        let state = PermissionState {
            declared_by_caller: request.declared_permission,
            granted_by_os: self.host.has_permission(WRITE_CALL_LOG),
        };
        match gate.admit(state, request) {
            Admission::Proceed(request) => {
                self.executor.submit(request);
                true
            }
            Admission::Denied(request) => {
                tracing::info!(request_id = %request.id, "permission denied");
                request.complete(WriteResult::PermissionDenied);
                false
            }
            Admission::PromptRequired => {
                tracing::info!("requesting {WRITE_CALL_LOG}");
                self.host.request_permission(PROMPT_REQUEST_CODE, WRITE_CALL_LOG);
                true
            }
            Admission::Queued => {
                tracing::debug!("queued behind outstanding permission prompt");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FixedHost {
        granted: AtomicBool,
        prompts: AtomicUsize,
    }

    impl PluginHost for FixedHost {
        fn has_permission(&self, _permission: &str) -> bool {
            self.granted.load(Ordering::SeqCst)
        }

        fn request_permission(&self, _request_code: i32, _permission: &str) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Completes every request inline with a fixed count.
    struct CountingExecutor(AtomicUsize);

    impl Executor for CountingExecutor {
        fn submit(&self, request: WriteRequest) {
            self.0.fetch_add(1, Ordering::SeqCst);
            request.complete(WriteResult::Ok(0));
        }
    }

    fn writer(granted: bool) -> (CallLogWriter, Arc<FixedHost>, Arc<CountingExecutor>) {
        let host = Arc::new(FixedHost {
            granted: AtomicBool::new(granted),
            prompts: AtomicUsize::new(0),
        });
        let exec = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        (CallLogWriter::new(host.clone(), exec.clone()), host, exec)
    }

    #[tokio::test]
    async fn unknown_action_skips_gate_and_executor() {
        let (w, host, exec) = writer(false);
        let d = w.execute("insertBulk", &[]).await;
        assert!(!d.accepted);
        assert_eq!(d.result.await.unwrap(), WriteResult::InvalidAction);
        assert_eq!(host.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(exec.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_reads_flag_from_first_argument() {
        let (w, host, _exec) = writer(false);
        let d = w.execute("clear", &[Value::Bool(true)]).await;
        assert!(!d.accepted);
        assert_eq!(d.result.await.unwrap(), WriteResult::PermissionDenied);
        assert_eq!(host.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queued_request_prompts_again_after_denial() {
        let (w, host, exec) = writer(false);
        let first = w.execute("clear", &[]).await;
        let second = w.execute("clear", &[]).await;
        assert_eq!(host.prompts.load(Ordering::SeqCst), 1);

        assert!(w.on_permission_result(PROMPT_REQUEST_CODE, &[PermissionStatus::Denied]).await);
        assert_eq!(first.result.await.unwrap(), WriteResult::PermissionDenied);
        assert_eq!(host.prompts.load(Ordering::SeqCst), 2);
        assert!(w.prompt_outstanding().await);

        host.granted.store(true, Ordering::SeqCst);
        assert!(w.on_permission_result(PROMPT_REQUEST_CODE, &[PermissionStatus::Granted]).await);
        assert_eq!(second.result.await.unwrap(), WriteResult::Ok(0));
        assert_eq!(exec.0.load(Ordering::SeqCst), 1);
    }
}
