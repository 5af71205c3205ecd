//! HTTP routes served by the node agent

pub const BUSIEST_ENI: &str = "/v1/eni/busiest";
pub const MANAGED_ENIS: &str = "/v1/eni/managed";
pub const NODE_RESOURCE: &str = "/v1/node/resource";
pub const SERVICE_SETUP: &str = "/v1/service/setup";
pub const SERVICE_CLEAN: &str = "/v1/service/clean";
pub const HEALTH: &str = "/healthz";
