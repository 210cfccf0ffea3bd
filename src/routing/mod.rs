//! 意图路由：选择处理者并抽取参数

pub mod extract;
pub mod intent;
pub mod schema;

pub use extract::{extract_json_object, Extraction};
pub use intent::{
    coerce_parameters, decide, CapabilitySelection, FnRouter, Handler, IntentRouter, Router,
    RoutingDecision,
};
pub use schema::{routing_answer_schema_json, RoutingAnswer};
