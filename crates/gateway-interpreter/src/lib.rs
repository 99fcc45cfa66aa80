//! Tier 2/3 natural-language interpretation aide (§4.7), with a
//! dependency-free rule-based default and an optional third-party LLM
//! backend behind the same [`Interpreter`] trait.

pub mod interpreter;
pub mod llm;
pub mod rule_based;

pub use interpreter::{Interpreter, Tier2Outcome};
pub use llm::LlmInterpreter;
pub use rule_based::RuleBasedInterpreter;

use gateway_core::InterpreterConfig;
use std::sync::Arc;

/// Builds the interpreter configured for this process: an [`LlmInterpreter`]
/// when `LLM_ENABLED=true`, otherwise the dependency-free
/// [`RuleBasedInterpreter`] (§9 design notes: external aides are optional).
pub fn build_interpreter(config: &InterpreterConfig) -> gateway_core::GatewayResult<Arc<dyn Interpreter>> {
    if config.llm_enabled {
        Ok(Arc::new(LlmInterpreter::new(config.clone())?))
    } else {
        Ok(Arc::new(RuleBasedInterpreter))
    }
}
