//! EniGateway trait for mocking
//!
//! This trait abstracts the ENI gateway so the capacity manager and the
//! ownership controller can be unit tested without a cloud account.

use crate::error::EniGatewayError;
use crate::models::EniMetadata;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Cloud ENI gateway operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait EniGatewayTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Create a managed ENI and attach it to the local instance, returning its id
    async fn alloc_eni(&self) -> Result<String, EniGatewayError>;

    /// Detach and delete an ENI
    async fn free_eni(&self, eni_id: &str) -> Result<(), EniGatewayError>;

    /// Block until the ENI reports attached, returning its metadata
    async fn wait_for_eni_attached(&self, eni_id: &str) -> Result<EniMetadata, EniGatewayError>;

    /// All ENIs attached to the local instance, keyed by ENI id
    async fn describe_all_enis(&self) -> Result<HashMap<String, EniMetadata>, EniGatewayError>;

    /// Managed ENIs created for this instance that are no longer attached
    async fn find_leaked_enis(&self) -> Result<Vec<EniMetadata>, EniGatewayError>;

    /// Delete an unattached ENI
    async fn delete_eni(&self, eni_id: &str) -> Result<(), EniGatewayError>;

    /// Assign one new secondary address to the ENI
    async fn alloc_ip_addresses(&self, eni_id: &str) -> Result<Ipv4Addr, EniGatewayError>;

    /// Release secondary addresses from the ENI
    async fn dealloc_ip_addresses(
        &self,
        eni_id: &str,
        addresses: &[Ipv4Addr],
    ) -> Result<(), EniGatewayError>;

    /// Assign an existing address to the ENI, moving it if held elsewhere
    async fn assign_private_ip_addresses(
        &self,
        eni_id: &str,
        address: Ipv4Addr,
    ) -> Result<(), EniGatewayError>;

    /// Enable or disable the source/destination check of an ENI
    async fn modify_source_dest_check(&self, eni_id: &str, enabled: bool) -> Result<(), EniGatewayError>;

    /// Maximum ENIs the instance type supports
    async fn get_eni_limit(&self) -> Result<usize, EniGatewayError>;

    /// Maximum IPv4 addresses per ENI for the instance type
    async fn get_eni_ipv4_limit(&self) -> Result<usize, EniGatewayError>;
}
