//! Node Agent Client
//!
//! Wire protocol and client for the per-node agent that owns the local
//! ENI pool and host routing. The controller drives every node-local
//! action through `NodeAgentTrait`; the agent itself implements the same
//! trait so both sides share one contract.
//!
//! # Example
//!
//! ```no_run
//! use node_agent_client::{new_request_id, NodeAgentClient, NodeAgentTrait, Timeouts};
//! use std::net::Ipv4Addr;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = NodeAgentClient::node_url(Ipv4Addr::new(10, 0, 1, 5), 19200);
//! let agent = NodeAgentClient::connect(url, Timeouts::default()).await?;
//!
//! let request_id = new_request_id();
//! let eni = agent.choose_busiest_eni(&request_id).await?;
//! agent
//!     .setup_network_for_service(&request_id, Ipv4Addr::new(10, 0, 1, 50), &eni)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Plain JSON over HTTP**: request/response bodies in `models`, routes in `paths`
//! - **Typed errors**: remote failures come back as `NodeAgentError` variants
//! - **Mocking**: `MockNodeAgent` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod models;
pub mod paths;
#[path = "trait.rs"]
pub mod agent_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{NodeAgentClient, Timeouts};
pub use error::NodeAgentError;
pub use models::*;
pub use agent_trait::NodeAgentTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockNodeAgent;
