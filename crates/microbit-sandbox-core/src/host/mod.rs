//! The interpreter host: loads the runtime bundle, holds the importable
//! hardware modules, and runs transformed programs.
//!
//! Program failures never escape [`InterpreterHost::run`]; they come back as
//! a diagnostic line such as `NameError: name 'x' is not defined (line 3)`.
//! The only fatal error is a runtime bundle that no source can provide.

pub mod runtime;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::script::{
    parse, ExecutionEnv, InterruptHandle, Interpreter, ModuleObject, OutputSink, Spawner,
};
use crate::transform::transform_with_report;

pub use runtime::{
    load_runtime, sources_from_config, BundleSource, BundledSource, FileSource, RuntimeBundle,
    UrlSource, BUNDLED_PRELUDE,
};

/// Failures of the host itself, as opposed to the program it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum HostError {
    /// Every runtime source failed; one entry per attempt.
    RuntimeUnavailable { attempts: Vec<String> },
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::RuntimeUnavailable { attempts } => {
                write!(f, "runtime bundle unavailable")?;
                if attempts.is_empty() {
                    write!(f, ": no sources configured")
                } else {
                    write!(f, " (tried {})", attempts.join("; "))
                }
            }
        }
    }
}

impl std::error::Error for HostError {}

pub struct InterpreterHost {
    config: RuntimeConfig,
    sources: Vec<Box<dyn BundleSource>>,
    runtime: RefCell<Option<Rc<RuntimeBundle>>>,
    output: RefCell<OutputSink>,
    modules: RefCell<BTreeMap<String, Rc<ModuleObject>>>,
    spawner: RefCell<Option<Spawner>>,
    interrupt: InterruptHandle,
    /// The interpreter of the most recent run, kept so its handlers stay callable.
    current: RefCell<Option<Interpreter>>,
}

impl InterpreterHost {
    pub fn new(config: RuntimeConfig) -> Self {
        let sources = sources_from_config(&config);
        Self::with_sources(config, sources)
    }

    pub fn with_sources(config: RuntimeConfig, sources: Vec<Box<dyn BundleSource>>) -> Self {
        Self {
            config,
            sources,
            runtime: RefCell::new(None),
            output: RefCell::new(Rc::new(|_: &str| {})),
            modules: RefCell::new(BTreeMap::new()),
            spawner: RefCell::new(None),
            interrupt: InterruptHandle::new(),
            current: RefCell::new(None),
        }
    }

    pub fn with_interrupt(mut self, interrupt: InterruptHandle) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Load the runtime bundle. Calling it again after success is a no-op.
    pub async fn initialize(&self) -> Result<(), HostError> {
        if self.is_initialized() {
            return Ok(());
        }
        let bundle = load_runtime(&self.sources).await?;
        *self.runtime.borrow_mut() = Some(Rc::new(bundle));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.borrow().is_some()
    }

    pub fn runtime_version(&self) -> Option<String> {
        self.runtime.borrow().as_ref().map(|b| b.version.clone())
    }

    pub fn set_output_callback(&self, sink: OutputSink) {
        *self.output.borrow_mut() = sink;
    }

    /// Where un-awaited board calls are started.
    pub fn set_spawner(&self, spawner: Spawner) {
        *self.spawner.borrow_mut() = Some(spawner);
    }

    /// Make `module` importable as `name`.
    pub fn register_hardware_module(&self, name: &str, module: Rc<ModuleObject>) {
        debug!(module = name, "registered host module");
        self.modules.borrow_mut().insert(name.to_string(), module);
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run `source`. Returns `""` on success, otherwise a diagnostic.
    pub async fn run(&self, source: &str) -> String {
        let Some(runtime) = self.runtime.borrow().clone() else {
            return "RuntimeError: runtime is not initialized".to_string();
        };
        self.interrupt.clear();

        let output = self.output.borrow().clone();
        let transformed = transform_with_report(source);
        for warning in &transformed.warnings {
            output(&format!("Warning: {}", warning));
        }
        let program = match parse(&transformed.source) {
            Ok(program) => program,
            Err(e) => return e.to_string(),
        };

        let env = ExecutionEnv {
            output,
            modules: self.modules.borrow().clone(),
            spawner: self.spawner.borrow().clone(),
            interrupt: self.interrupt.clone(),
            max_depth: self.config.max_call_depth,
        };
        let interpreter = Interpreter::new(env);
        if let Some(previous) = self.current.borrow_mut().replace(interpreter.clone()) {
            previous.clear();
        }

        if let Err(e) = interpreter.execute(&runtime.program).await {
            return format!("runtime prelude failed: {}", e);
        }
        for module in &self.config.auto_import {
            if let Err(e) = interpreter.import_all(module) {
                return e.to_string();
            }
        }
        info!(
            awaits = transformed.awaits_inserted,
            suspend_functions = transformed.suspend_functions.len(),
            "running program"
        );
        match interpreter.execute(&program).await {
            Ok(()) => String::new(),
            Err(e) => {
                debug!(error = %e, "program failed");
                e.to_string()
            }
        }
    }

    /// Drop the previous run's globals.
    pub fn reset(&self) {
        if let Some(previous) = self.current.borrow_mut().take() {
            previous.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Value;

    fn collecting_host() -> (InterpreterHost, Rc<RefCell<Vec<String>>>) {
        let host = InterpreterHost::new(RuntimeConfig {
            auto_import: Vec::new(),
            ..RuntimeConfig::default()
        });
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = lines.clone();
        host.set_output_callback(Rc::new(move |line: &str| sink.borrow_mut().push(line.to_string())));
        (host, lines)
    }

    #[tokio::test]
    async fn test_run_before_initialize_is_a_diagnostic() {
        let (host, _) = collecting_host();
        assert_eq!(host.run("x = 1").await, "RuntimeError: runtime is not initialized");
    }

    #[tokio::test]
    async fn test_prelude_helpers_and_output() {
        let (host, lines) = collecting_host();
        host.initialize().await.unwrap();
        assert_eq!(host.runtime_version().as_deref(), Some("1.0"));
        let result = host
            .run("print(constrain(12, 0, 10))\nprint(map_range(5, 0, 10, 0, 100))")
            .await;
        assert_eq!(result, "");
        assert_eq!(*lines.borrow(), vec!["10", "50.0"]);
    }

    #[tokio::test]
    async fn test_program_errors_become_diagnostics() {
        let (host, _) = collecting_host();
        host.initialize().await.unwrap();
        assert_eq!(
            host.run("x = 1\ny = x + z\n").await,
            "NameError: name 'z' is not defined (line 2)"
        );
        assert!(host.run("def f(:\n    pass\n").await.starts_with("SyntaxError"));
    }

    #[tokio::test]
    async fn test_registered_module_is_importable() {
        let (host, lines) = collecting_host();
        host.initialize().await.unwrap();
        let board = ModuleObject::new("board");
        board.define_sync("answer", |_| Ok(Value::Int(42)));
        host.register_hardware_module("board", board);
        assert_eq!(host.run("from board import *\nprint(answer())").await, "");
        assert_eq!(host.run("import board\nprint(board.answer())").await, "");
        assert_eq!(*lines.borrow(), vec!["42", "42"]);
        assert!(host.run("import nothing").await.starts_with("ImportError"));
    }

    #[tokio::test]
    async fn test_duplicate_startup_is_warned() {
        let (host, lines) = collecting_host();
        host.initialize().await.unwrap();
        let source = "def on_start():\n    print('one')\ndef on_start():\n    print('two')\non_start()\non_start()\n";
        assert_eq!(host.run(source).await, "");
        let lines = lines.borrow();
        assert_eq!(lines.iter().filter(|l| l.starts_with("Warning:")).count(), 2);
        assert_eq!(lines.iter().filter(|l| *l == "one").count(), 1);
        assert!(!lines.iter().any(|l| l == "two"));
    }
}
