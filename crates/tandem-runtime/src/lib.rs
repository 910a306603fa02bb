//! # Tandem Runtime
//!
//! The frame-facing layer of the tandem bridge: one [`ScriptController`] per
//! (frame, engine), a [`ScriptManager`] fanning lifecycle operations out to
//! both, the execution policy (sandboxing, view-source, loader client), and
//! worker threads that own isolated engine instances and exchange only
//! structured-clone bytes with the rest of the world.
//!
//! Failure philosophy, inherited from the browser: a policy denial is not an
//! error (silent no-op plus an optional console diagnostic), and a script
//! exception is reported to the owning document's console rather than thrown
//! across the controller boundary.

#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod host;
pub mod manager;
pub mod worker;

pub use config::RuntimeConfig;
pub use controller::ScriptController;
pub use host::{
    ConsoleMessage, ConsoleMessageLevel, ConsoleMessageSource, ConsoleSink, DefaultLoaderClient,
    Document, Frame, FrameLoaderClient, Node, ReasonForCallingCanExecuteScripts, SandboxFlags,
};
pub use manager::ScriptManager;
pub use worker::{
    WorkerError, WorkerGlobalContext, WorkerHandle, WorkerJob, WorkerScriptController,
    WorkerTerminationHandle, spawn_worker,
};
