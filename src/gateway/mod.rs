//! Caller-facing gateway: request types, the facade and its registry

pub mod facade;
pub mod registry;
pub mod request;

pub use facade::{AdmissionCost, Gateway, RouteHandle, UnitCost};
pub use registry::GatewayRegistry;
pub use request::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TENANT, DEFAULT_WORKSPACE, MAX_PROMPT_LENGTH,
    RouteRequest, RouteResult, TaskType,
};
