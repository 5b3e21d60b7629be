//! The embedded scripting runtime.
//!
//! A small Python dialect covering what board programs use: functions
//! (including `async def`/`await`), control flow, lists, and module imports.
//! Hardware namespaces are plain [`ModuleObject`]s populated with native
//! functions.

pub mod ast;
mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use error::{ErrorKind, ScriptError, ScriptResult};
pub use interpreter::{
    call_value, invoke_callback, ExecutionEnv, InterruptHandle, Interpreter, OutputSink, Spawner,
    DEFAULT_MAX_DEPTH,
};
pub use ast::Program;
pub use parser::parse;
pub use value::{expect_args, ModuleObject, NativeFunction, Value};
