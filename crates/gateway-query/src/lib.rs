//! Safe-query compiler (C4), plan validator (C5), and plan executor (C6).

pub mod compiler;
pub mod executor;
pub mod validator;

pub use compiler::{compile, CompiledQuery};
pub use executor::{ExecutionResult, PlanExecutor};
pub use validator::{dry_compile, validate, ValidationReport};
