//! Cloud ENI Gateway Client
//!
//! A Rust client for the cloud ENI gateway: the service that owns the
//! vendor SDK calls for elastic network interfaces on one instance.
//! Provides type-safe models and methods for ENI lifecycle, secondary IP
//! assignment and instance limits.
//!
//! # Example
//!
//! ```no_run
//! use eni_gateway_client::{EniGatewayClient, EniGatewayTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = EniGatewayClient::new("http://127.0.0.1:19300".to_string())?
//!     .with_instance("i-0123456789abcdef0");
//!
//! // Allocate and attach a new ENI
//! let eni_id = client.alloc_eni().await?;
//! let eni = client.wait_for_eni_attached(&eni_id).await?;
//!
//! // Put a secondary address on it
//! let ip = client.alloc_ip_addresses(&eni.eni_id).await?;
//! println!("{} now carries {}", eni.eni_id, ip);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **ENI lifecycle**: allocate, wait for attachment, free, delete leaked
//! - **Private IPs**: allocate, release and reassign secondary addresses
//! - **Limits**: instance ENI count and per-ENI IPv4 limits
//! - **Mocking**: `MockEniGateway` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod gateway_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::EniGatewayClient;
pub use common::HttpClient;
pub use error::EniGatewayError;
pub use models::*;
pub use gateway_trait::EniGatewayTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockEniGateway;
