//! The Tier 2/3 interpretation boundary (§4.7). An [`Interpreter`] turns a
//! natural-language request into either a Tier-1-compatible template choice,
//! a brief reply, or (Tier 3) a full structured [`Plan`] — the plan still
//! flows through the validator and compiler afterward, same as any other
//! plan (§4.7: "the resulting plan still flows through the validator and
//! executor").

use async_trait::async_trait;
use gateway_core::plan::Plan;
use gateway_core::schema_contract::SchemaContract;
use gateway_core::GatewayResult;
use serde::{Deserialize, Serialize};

/// What the Tier 2 interpreter produced: either a Tier-1-compatible
/// template choice with parameters, or a direct natural-language reply when
/// no query is actually implied (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Tier2Outcome {
    Template { template: String, params: serde_json::Value },
    Reply { content: String },
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret_tier2(&self, text: &str) -> GatewayResult<Tier2Outcome>;
    async fn interpret_tier3(&self, text: &str, contract: &SchemaContract) -> GatewayResult<Plan>;
}
