//! Worker-side script execution
//!
//! Each worker thread owns its own engine instance; live values never cross
//! the thread boundary, only `SerializedScriptValue` byte buffers do. The
//! one genuinely cross-thread operation is termination: any thread may
//! schedule it through a handle, and the worker's own thread observes the
//! flag with sequentially consistent loads.

use crate::host::ConsoleSink;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tandem_clone::{
    SerializationErrorMode, SerializedScriptValue, serialization_delegate_for,
};
use tandem_core::{ExecutionContext, Realm, ScriptType, ScriptValue, SourceCode, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a worker evaluation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Execution has been forbidden on this worker (after termination or a
    /// fatal error).
    #[error("worker execution is forbidden")]
    ExecutionForbidden,
    /// Termination was scheduled from another thread.
    #[error("worker execution was terminated")]
    Terminated,
    /// The script threw; the message was reported to the worker console.
    #[error("script exception: {0}")]
    Exception(String),
}

/// The global scope backing a worker (console only; no DOM).
#[derive(Default)]
pub struct WorkerGlobalContext {
    console: ConsoleSink,
}

impl WorkerGlobalContext {
    /// A fresh worker scope.
    pub fn new() -> Rc<WorkerGlobalContext> {
        Rc::new(WorkerGlobalContext::default())
    }

    /// The worker's console.
    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }
}

impl ExecutionContext for WorkerGlobalContext {
    fn report_exception(&self, message: &str, source_url: &str, line: u32) {
        self.console.add(crate::host::ConsoleMessage {
            source: crate::host::ConsoleMessageSource::JavaScript,
            level: crate::host::ConsoleMessageLevel::Error,
            message: message.to_string(),
            url: source_url.to_string(),
            line,
        });
    }

    fn is_worker_context(&self) -> bool {
        true
    }
}

/// Cross-thread termination switch for one worker.
#[derive(Clone)]
pub struct WorkerTerminationHandle {
    terminating: Arc<AtomicBool>,
}

impl WorkerTerminationHandle {
    /// Request that the worker stop executing script. Safe from any thread;
    /// the worker sees the request on its next execution boundary.
    pub fn schedule_execution_termination(&self) {
        self.terminating.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested.
    pub fn is_execution_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }
}

type MessageHandler = Box<dyn Fn(ScriptValue)>;

/// One worker's engine instance and execution entry points. Lives on the
/// worker's own thread.
pub struct WorkerScriptController {
    script_type: ScriptType,
    realm: Realm,
    context: Rc<WorkerGlobalContext>,
    terminating: Arc<AtomicBool>,
    execution_forbidden: Cell<bool>,
    disable_eval_message: RefCell<Option<String>>,
    message_handler: RefCell<Option<MessageHandler>>,
}

impl WorkerScriptController {
    /// A controller with a fresh realm and worker scope.
    pub fn new(script_type: ScriptType) -> WorkerScriptController {
        WorkerScriptController {
            script_type,
            realm: Realm::new(script_type),
            context: WorkerGlobalContext::new(),
            terminating: Arc::new(AtomicBool::new(false)),
            execution_forbidden: Cell::new(false),
            disable_eval_message: RefCell::new(None),
            message_handler: RefCell::new(None),
        }
    }

    /// The engine this worker runs.
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// The worker's realm.
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The worker's global scope.
    pub fn context(&self) -> &Rc<WorkerGlobalContext> {
        &self.context
    }

    /// A cloneable, thread-safe termination switch.
    pub fn termination_handle(&self) -> WorkerTerminationHandle {
        WorkerTerminationHandle {
            terminating: self.terminating.clone(),
        }
    }

    /// Whether termination has been scheduled (from any thread).
    pub fn is_execution_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Permanently stop running script on this worker.
    pub fn forbid_execution(&self) {
        self.execution_forbidden.set(true);
    }

    /// Whether execution has been forbidden.
    pub fn is_execution_forbidden(&self) -> bool {
        self.execution_forbidden.get()
    }

    /// Forbid `eval`; the message is raised at the next evaluation.
    pub fn disable_eval(&self, error_message: &str) {
        *self.disable_eval_message.borrow_mut() = Some(error_message.to_string());
        self.realm.set_eval_enabled(false);
    }

    /// Install the structured-clone message callback.
    pub fn set_message_handler(&self, handler: impl Fn(ScriptValue) + 'static) {
        *self.message_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Run a script on this worker.
    pub fn evaluate(&self, source: &SourceCode) -> Result<ScriptValue, WorkerError> {
        if self.is_execution_forbidden() {
            return Err(WorkerError::ExecutionForbidden);
        }
        if self.is_execution_terminating() {
            self.forbid_execution();
            return Err(WorkerError::Terminated);
        }

        if let Some(message) = self.disable_eval_message.borrow_mut().take() {
            self.realm.set_exception(Value::string(message.clone()));
            self.context.report_exception(&message, &source.url, 0);
            self.realm.take_exception();
            return Err(WorkerError::Exception(message));
        }

        match self.realm.evaluate(source) {
            Ok(value) => {
                if self.is_execution_terminating() {
                    self.forbid_execution();
                    return Err(WorkerError::Terminated);
                }
                Ok(ScriptValue::for_realm(&self.realm, value))
            }
            Err(exception) => {
                if self.is_execution_terminating() {
                    self.forbid_execution();
                    return Err(WorkerError::Terminated);
                }
                let message = ScriptValue::for_realm(&self.realm, exception)
                    .delegate()
                    .coerce_to_string();
                self.context.report_exception(&message, &source.url, 0);
                self.realm.take_exception();
                Err(WorkerError::Exception(message))
            }
        }
    }

    /// Reconstruct a posted clone in this worker's engine and hand it to
    /// the message handler.
    pub fn deliver_serialized_message(&self, bytes: Vec<u8>) {
        let serialized = SerializedScriptValue::from_wire_bytes(bytes);
        let delegate = serialization_delegate_for(&self.realm);
        match serialized.deserialize(delegate.as_ref(), None, SerializationErrorMode::NonThrowing)
        {
            Ok(value) => {
                if let Some(handler) = self.message_handler.borrow().as_ref() {
                    handler(value);
                }
            }
            Err(error) => {
                warn!(engine = %self.script_type, %error, "dropping undeliverable message");
            }
        }
    }
}

/// Work shipped to a worker thread. Only bytes and strings cross; live
/// values stay on their own thread.
pub enum WorkerJob {
    /// Evaluate a script, answering with its string coercion.
    Evaluate {
        /// Program text
        source: String,
        /// Source URL
        url: String,
        /// Where the outcome goes
        result_tx: Sender<Result<String, WorkerError>>,
    },
    /// Deliver a structured-clone message.
    Message {
        /// The clone's wire bytes
        bytes: Vec<u8>,
    },
}

/// A spawned worker thread and the channels into it.
pub struct WorkerHandle {
    job_tx: Sender<WorkerJob>,
    termination: WorkerTerminationHandle,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Evaluate on the worker, blocking for the result.
    pub fn evaluate(&self, source: &str, url: &str) -> Result<String, WorkerError> {
        let (result_tx, result_rx) = bounded(1);
        let job = WorkerJob::Evaluate {
            source: source.to_string(),
            url: url.to_string(),
            result_tx,
        };
        if self.job_tx.send(job).is_err() {
            return Err(WorkerError::ExecutionForbidden);
        }
        result_rx
            .recv()
            .unwrap_or(Err(WorkerError::ExecutionForbidden))
    }

    /// Post a structured clone to the worker.
    pub fn post_message(&self, serialized: &SerializedScriptValue) {
        let _ = self.job_tx.send(WorkerJob::Message {
            bytes: serialized.data().to_vec(),
        });
    }

    /// The cross-thread termination switch.
    pub fn termination_handle(&self) -> WorkerTerminationHandle {
        self.termination.clone()
    }

    /// Terminate and join the worker thread.
    pub fn shutdown(mut self) {
        self.termination.schedule_execution_termination();
        let (job_tx, _) = unbounded();
        // Dropping our sender closes the channel and wakes the loop.
        drop(std::mem::replace(&mut self.job_tx, job_tx));
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn a worker thread owning its own engine instance.
///
/// `setup` runs once on the worker thread before any job, to install the
/// evaluator and message handler.
pub fn spawn_worker(
    script_type: ScriptType,
    setup: impl FnOnce(&WorkerScriptController) + Send + 'static,
) -> WorkerHandle {
    let (job_tx, job_rx) = unbounded::<WorkerJob>();
    let (termination_tx, termination_rx) = bounded::<WorkerTerminationHandle>(1);

    let join = std::thread::Builder::new()
        .name(format!("tandem-worker-{}", script_type.abbreviation()))
        .spawn(move || run_worker(script_type, job_rx, termination_tx, setup))
        .expect("spawning a worker thread");

    let termination = termination_rx
        .recv()
        .expect("worker thread sends its termination handle before running jobs");

    WorkerHandle {
        job_tx,
        termination,
        join: Some(join),
    }
}

fn run_worker(
    script_type: ScriptType,
    job_rx: Receiver<WorkerJob>,
    termination_tx: Sender<WorkerTerminationHandle>,
    setup: impl FnOnce(&WorkerScriptController),
) {
    debug!(engine = %script_type, "worker starting");

    let controller = WorkerScriptController::new(script_type);
    let _ = termination_tx.send(controller.termination_handle());
    setup(&controller);

    loop {
        if controller.is_execution_terminating() {
            controller.forbid_execution();
            debug!(engine = %script_type, "worker terminating");
            break;
        }

        match job_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(WorkerJob::Evaluate {
                source,
                url,
                result_tx,
            }) => {
                let outcome = controller
                    .evaluate(&SourceCode::new(source, url))
                    .map(|value| value.delegate().coerce_to_string());
                let _ = result_tx.send(outcome);
            }
            Ok(WorkerJob::Message { bytes }) => {
                controller.deliver_serialized_message(bytes);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!(engine = %script_type, "worker job channel closed");
                break;
            }
        }
    }

    debug!(engine = %script_type, "worker stopped");
}
