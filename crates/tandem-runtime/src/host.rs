//! The host objects the bridge executes against
//!
//! The real DOM lives elsewhere; these are the pieces the script layer
//! actually touches: a frame, its document with sandboxing state, a console
//! sink for diagnostics, and the loader-client policy hook. The execution
//! policy itself (`can_execute_scripts`) lives here because both the
//! per-engine controllers and the manager consult it.

use crate::config::RuntimeConfig;
use bitflags::bitflags;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tandem_core::ExecutionContext;
use tracing::{error, warn};

bitflags! {
    /// What a sandboxed document is forbidden to do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SandboxFlags: u32 {
        /// Navigation of other frames
        const NAVIGATION = 1 << 0;
        /// Plugin content
        const PLUGINS = 1 << 1;
        /// Unique-origin demotion
        const ORIGIN = 1 << 2;
        /// Form submission
        const FORMS = 1 << 3;
        /// Script execution (absent the `allow-scripts` permission)
        const SCRIPTS = 1 << 4;
        /// Top-level navigation
        const TOP_NAVIGATION = 1 << 5;
        /// Popup windows
        const POPUPS = 1 << 6;
        /// Everything
        const ALL = !0;
    }
}

/// Where a console message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMessageSource {
    /// Security policy enforcement
    Security,
    /// A JavaScript error or `console` call
    JavaScript,
    /// A Ruby error or console call
    Ruby,
    /// Anything else
    Other,
}

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMessageLevel {
    /// Informational
    Log,
    /// Something suspicious
    Warning,
    /// Something broken
    Error,
}

/// One recorded console message.
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
    /// Message source channel
    pub source: ConsoleMessageSource,
    /// Severity
    pub level: ConsoleMessageLevel,
    /// The text
    pub message: String,
    /// Source URL, when known
    pub url: String,
    /// One-based line, 0 when unknown
    pub line: u32,
}

/// Records diagnostics the way a page console would.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    messages: RefCell<Vec<ConsoleMessage>>,
}

impl ConsoleSink {
    /// Append a message (also mirrored to the tracing log).
    pub fn add(&self, message: ConsoleMessage) {
        match message.level {
            ConsoleMessageLevel::Error => {
                error!(url = %message.url, line = message.line, "{}", message.message);
            }
            ConsoleMessageLevel::Warning => {
                warn!(url = %message.url, line = message.line, "{}", message.message);
            }
            ConsoleMessageLevel::Log => {}
        }
        self.messages.borrow_mut().push(message);
    }

    /// All recorded messages, oldest first.
    pub fn messages(&self) -> Vec<ConsoleMessage> {
        self.messages.borrow().clone()
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }
}

/// The document a frame is displaying.
pub struct Document {
    url: RefCell<String>,
    sandbox_flags: Cell<SandboxFlags>,
    view_source: Cell<bool>,
    console: ConsoleSink,
}

impl Document {
    /// A document at `url`, unsandboxed.
    pub fn new(url: impl Into<String>) -> Rc<Document> {
        Rc::new(Document {
            url: RefCell::new(url.into()),
            sandbox_flags: Cell::new(SandboxFlags::empty()),
            view_source: Cell::new(false),
            console: ConsoleSink::default(),
        })
    }

    /// The document URL.
    pub fn url(&self) -> String {
        self.url.borrow().clone()
    }

    /// Replace the document URL (navigation).
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.borrow_mut() = url.into();
    }

    /// Apply sandbox flags.
    pub fn set_sandbox_flags(&self, flags: SandboxFlags) {
        self.sandbox_flags.set(flags);
    }

    /// True when sandboxed against `what`.
    pub fn is_sandboxed(&self, what: SandboxFlags) -> bool {
        self.sandbox_flags.get().contains(what)
    }

    /// Mark this as a view-source document.
    pub fn set_view_source(&self, view_source: bool) {
        self.view_source.set(view_source);
    }

    /// True for view-source documents.
    pub fn is_view_source(&self) -> bool {
        self.view_source.get()
    }

    /// The document's console.
    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }

    /// Record a console diagnostic.
    pub fn add_console_message(
        &self,
        source: ConsoleMessageSource,
        level: ConsoleMessageLevel,
        message: impl Into<String>,
    ) {
        self.console.add(ConsoleMessage {
            source,
            level,
            message: message.into(),
            url: self.url(),
            line: 0,
        });
    }
}

impl ExecutionContext for Document {
    fn report_exception(&self, message: &str, source_url: &str, line: u32) {
        self.console.add(ConsoleMessage {
            source: ConsoleMessageSource::JavaScript,
            level: ConsoleMessageLevel::Error,
            message: message.to_string(),
            url: source_url.to_string(),
            line,
        });
    }
}

/// Loader-side policy hook consulted when neither sandboxing nor
/// view-source settles the question.
pub trait FrameLoaderClient {
    /// Whether script may run, given the settings answer.
    fn allow_script(&self, enabled_by_settings: bool) -> bool {
        enabled_by_settings
    }

    /// Script was denied right before an execution attempt.
    fn did_not_allow_script(&self) {}
}

/// The default client: settings decide.
pub struct DefaultLoaderClient;

impl FrameLoaderClient for DefaultLoaderClient {}

/// Why `can_execute_scripts` is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonForCallingCanExecuteScripts {
    /// A script is about to run; denials are worth a console diagnostic.
    AboutToExecuteScript,
    /// Introspection only; stay quiet on denial.
    NotAboutToExecuteScript,
}

/// One frame of the page, owner of a document and of per-engine script
/// machinery.
pub struct Frame {
    document: RefCell<Option<Rc<Document>>>,
    loader_client: RefCell<Rc<dyn FrameLoaderClient>>,
    config: RefCell<RuntimeConfig>,
}

impl Frame {
    /// A frame with no document yet.
    pub fn new(config: RuntimeConfig) -> Rc<Frame> {
        Rc::new(Frame {
            document: RefCell::new(None),
            loader_client: RefCell::new(Rc::new(DefaultLoaderClient)),
            config: RefCell::new(config),
        })
    }

    /// The current document.
    pub fn document(&self) -> Option<Rc<Document>> {
        self.document.borrow().clone()
    }

    /// Install a document (load or navigation).
    pub fn set_document(&self, document: Rc<Document>) {
        *self.document.borrow_mut() = Some(document);
    }

    /// Replace the loader policy hook.
    pub fn set_loader_client(&self, client: Rc<dyn FrameLoaderClient>) {
        *self.loader_client.borrow_mut() = client;
    }

    /// The frame's runtime configuration.
    pub fn config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }

    /// Execution policy: sandboxing beats everything except view-source;
    /// otherwise the loader client decides against the settings default.
    ///
    /// Denial is not an error. It is a silent no-op, with a console
    /// diagnostic only when a script was actually about to run.
    pub fn can_execute_scripts(&self, reason: ReasonForCallingCanExecuteScripts) -> bool {
        if let Some(document) = self.document() {
            if document.is_sandboxed(SandboxFlags::SCRIPTS) {
                if reason == ReasonForCallingCanExecuteScripts::AboutToExecuteScript {
                    document.add_console_message(
                        ConsoleMessageSource::Security,
                        ConsoleMessageLevel::Error,
                        format!(
                            "Blocked script execution in '{}' because the document's frame is sandboxed and the 'allow-scripts' permission is not set.",
                            document.url()
                        ),
                    );
                }
                return false;
            }
            if document.is_view_source() {
                return true;
            }
        }

        let allowed = self
            .loader_client
            .borrow()
            .allow_script(self.config.borrow().script_enabled);
        if !allowed && reason == ReasonForCallingCanExecuteScripts::AboutToExecuteScript {
            self.loader_client.borrow().did_not_allow_script();
        }
        allowed
    }
}

/// A DOM node, reduced to what the script layer needs: the frame it lives
/// in.
pub struct Node {
    frame: Weak<Frame>,
}

impl Node {
    /// A node belonging to `frame`'s document.
    pub fn new(frame: &Rc<Frame>) -> Node {
        Node {
            frame: Rc::downgrade(frame),
        }
    }

    /// The owning frame, if it is still alive.
    pub fn frame(&self) -> Option<Rc<Frame>> {
        self.frame.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandboxed_document_blocks_scripts() {
        let frame = Frame::new(RuntimeConfig::default());
        let document = Document::new("https://example.com/");
        document.set_sandbox_flags(SandboxFlags::SCRIPTS);
        frame.set_document(document.clone());

        assert!(!frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::AboutToExecuteScript));
        // The denial produced exactly one security diagnostic.
        let messages = document.console().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source, ConsoleMessageSource::Security);

        // Introspection-only checks stay quiet.
        assert!(
            !frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::NotAboutToExecuteScript)
        );
        assert_eq!(document.console().len(), 1);
    }

    #[test]
    fn test_view_source_document_always_allows() {
        let frame = Frame::new(RuntimeConfig {
            script_enabled: false,
            ..RuntimeConfig::default()
        });
        let document = Document::new("view-source:https://example.com/");
        document.set_view_source(true);
        frame.set_document(document);
        assert!(frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::AboutToExecuteScript));
    }

    #[test]
    fn test_loader_client_is_consulted() {
        struct DenyingClient {
            denials: Cell<usize>,
        }
        impl FrameLoaderClient for DenyingClient {
            fn allow_script(&self, _enabled: bool) -> bool {
                false
            }
            fn did_not_allow_script(&self) {
                self.denials.set(self.denials.get() + 1);
            }
        }

        let frame = Frame::new(RuntimeConfig::default());
        frame.set_document(Document::new("https://example.com/"));
        let client = Rc::new(DenyingClient {
            denials: Cell::new(0),
        });
        frame.set_loader_client(client.clone());

        assert!(!frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::AboutToExecuteScript));
        assert_eq!(client.denials.get(), 1);
        // Introspection does not notify the client.
        assert!(
            !frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::NotAboutToExecuteScript)
        );
        assert_eq!(client.denials.get(), 1);
    }

    #[test]
    fn test_settings_disable_scripts() {
        let frame = Frame::new(RuntimeConfig {
            script_enabled: false,
            ..RuntimeConfig::default()
        });
        frame.set_document(Document::new("https://example.com/"));
        assert!(
            !frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::NotAboutToExecuteScript)
        );
    }
}
