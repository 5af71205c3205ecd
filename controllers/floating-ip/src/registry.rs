//! Node Registry
//!
//! One agent handle per cluster node plus the node's last capacity
//! snapshot. Membership follows Kubernetes Node events; snapshots are
//! refreshed on a timer and used to place new floating IPs.

use crate::error::ControllerError;
use node_agent_client::{NodeAgentClient, NodeAgentError, NodeAgentTrait, NodeResource, Timeouts, new_request_id};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Dials the agent of one node
#[async_trait::async_trait]
pub trait AgentConnector: Send + Sync {
    /// Return a handle to the agent on `node_ip`, which must be serving
    async fn connect(&self, node_ip: Ipv4Addr) -> Result<Arc<dyn NodeAgentTrait>, NodeAgentError>;
}

/// Connects to agents over HTTP on a fixed port
#[derive(Debug, Clone)]
pub struct HttpConnector {
    pub port: u16,
    pub timeouts: Timeouts,
}

#[async_trait::async_trait]
impl AgentConnector for HttpConnector {
    async fn connect(&self, node_ip: Ipv4Addr) -> Result<Arc<dyn NodeAgentTrait>, NodeAgentError> {
        let client = NodeAgentClient::connect(NodeAgentClient::node_url(node_ip, self.port), self.timeouts).await?;
        Ok(Arc::new(client))
    }
}

/// A registered node
#[derive(Clone)]
pub struct Node {
    pub ip: Ipv4Addr,
    pub agent: Arc<dyn NodeAgentTrait>,
    pub resource: NodeResource,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("ip", &self.ip)
            .field("agent", &self.agent.endpoint())
            .field("resource", &self.resource)
            .finish()
    }
}

impl Node {
    pub fn spare(&self) -> usize {
        self.resource.spare()
    }
}

pub struct NodeRegistry {
    connector: Arc<dyn AgentConnector>,
    nodes: RwLock<HashMap<Ipv4Addr, Node>>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry").finish_non_exhaustive()
    }
}

impl NodeRegistry {
    pub fn new(connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            connector,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Dial the node's agent, take a first snapshot and register it.
    ///
    /// Dial failures are returned as-is; retrying is up to the caller.
    pub async fn register(&self, node_ip: Ipv4Addr) -> Result<Node, ControllerError> {
        let agent = self.connector.connect(node_ip).await?;
        let resource = agent.describe_node_resource(&new_request_id()).await?;
        let node = Node { ip: node_ip, agent, resource };
        info!(%node_ip, spare = node.spare(), "Registered node");
        self.set_node(node.clone()).await;
        Ok(node)
    }

    pub async fn set_node(&self, node: Node) {
        self.nodes.write().await.insert(node.ip, node);
    }

    pub async fn remove_node(&self, node_ip: Ipv4Addr) -> Option<Node> {
        let removed = self.nodes.write().await.remove(&node_ip);
        if removed.is_some() {
            info!(%node_ip, "Removed node");
        }
        removed
    }

    pub async fn get_node(&self, node_ip: Ipv4Addr) -> Result<Node, ControllerError> {
        self.nodes
            .read()
            .await
            .get(&node_ip)
            .cloned()
            .ok_or_else(|| ControllerError::NodeNotFound(node_ip.to_string()))
    }

    pub async fn contains(&self, node_ip: Ipv4Addr) -> bool {
        self.nodes.read().await.contains_key(&node_ip)
    }

    /// Node with the most spare private IPs, restricted to nodes with an
    /// ENI in `subnet_id` when given. Ties go to the lowest node IP.
    pub async fn choose_spare_node(&self, subnet_id: Option<&str>) -> Result<Node, ControllerError> {
        let nodes = self.nodes.read().await;
        nodes
            .values()
            .filter(|node| subnet_id.is_none_or(|subnet| node.resource.has_subnet(subnet)))
            .filter(|node| node.spare() > 0)
            .max_by(|a, b| a.spare().cmp(&b.spare()).then_with(|| b.ip.cmp(&a.ip)))
            .cloned()
            .ok_or_else(|| {
                ControllerError::ResourceUnavailable(match subnet_id {
                    Some(subnet) => format!("no node with spare private ips in subnet {subnet}"),
                    None => "no node with spare private ips".to_string(),
                })
            })
    }

    /// Refresh every node's capacity snapshot; failing nodes keep their
    /// previous snapshot
    pub async fn refresh(&self) {
        let nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        for node in nodes {
            match node.agent.describe_node_resource(&new_request_id()).await {
                Ok(resource) => {
                    debug!(node_ip = %node.ip, spare = resource.spare(), "Refreshed node resource");
                    if let Some(entry) = self.nodes.write().await.get_mut(&node.ip) {
                        entry.resource = resource;
                    }
                }
                Err(e) => warn!(node_ip = %node.ip, error = %e, "Failed to refresh node resource"),
            }
        }
    }

    pub async fn run_refresh_loop(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eni_gateway_client::mock::helpers::{eni_with_usage, managed_eni_in_subnet};
    use crate::test_utils::MockConnector;
    use node_agent_client::{MockNodeAgent, ServingStatus};

    fn node_ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 1, last)
    }

    fn agent_with(used: &[u32]) -> MockNodeAgent {
        let agent = MockNodeAgent::new("mock://agent", 6);
        for (i, used) in used.iter().enumerate() {
            let device = u32::try_from(i).unwrap() + 1;
            agent.add_eni(eni_with_usage(&format!("eni-{device}"), device, *used));
        }
        agent
    }

    async fn registry(nodes: Vec<(Ipv4Addr, MockNodeAgent)>) -> NodeRegistry {
        let connector = Arc::new(MockConnector::default());
        for (ip, agent) in &nodes {
            connector.add(*ip, agent.clone());
        }
        let registry = NodeRegistry::new(connector);
        for (ip, _) in nodes {
            registry.register(ip).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_choose_spare_node_prefers_most_spare() {
        let registry = registry(vec![
            (node_ip(5), agent_with(&[5, 5])),
            (node_ip(6), agent_with(&[1, 1])),
            (node_ip(7), agent_with(&[3])),
        ])
        .await;

        let node = registry.choose_spare_node(None).await.unwrap();
        assert_eq!(node.ip, node_ip(6));
        assert_eq!(node.spare(), 10);
    }

    #[tokio::test]
    async fn test_choose_spare_node_ties_go_to_lowest_ip() {
        let registry = registry(vec![(node_ip(9), agent_with(&[2])), (node_ip(8), agent_with(&[2]))]).await;
        assert_eq!(registry.choose_spare_node(None).await.unwrap().ip, node_ip(8));
    }

    #[tokio::test]
    async fn test_choose_spare_node_by_subnet() {
        let in_subnet = MockNodeAgent::new("mock://b", 6);
        in_subnet.add_eni(managed_eni_in_subnet("eni-b", 1, "subnet-2", vec![]));
        let registry = registry(vec![(node_ip(5), agent_with(&[1])), (node_ip(6), in_subnet)]).await;

        assert_eq!(registry.choose_spare_node(Some("subnet-2")).await.unwrap().ip, node_ip(6));
        let err = registry.choose_spare_node(Some("subnet-3")).await.unwrap_err();
        assert!(err.is_resource_unavailable());
    }

    #[tokio::test]
    async fn test_full_nodes_do_not_qualify() {
        let registry = registry(vec![(node_ip(5), agent_with(&[6, 6]))]).await;
        assert!(matches!(
            registry.choose_spare_node(None).await,
            Err(ControllerError::ResourceUnavailable(_))
        ));

        let empty = NodeRegistry::new(Arc::new(MockConnector::default()));
        assert!(empty.choose_spare_node(None).await.is_err());
    }

    #[tokio::test]
    async fn test_register_requires_serving_agent() {
        let agent = agent_with(&[1]);
        agent.set_status(ServingStatus::NotServing);
        let connector = Arc::new(MockConnector::default());
        connector.add(node_ip(5), agent.clone());
        let registry = NodeRegistry::new(connector);

        let err = registry.register(node_ip(5)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Agent(NodeAgentError::NotServing(_))));
        assert!(!registry.contains(node_ip(5)).await);

        agent.set_status(ServingStatus::Serving);
        assert!(registry.register(node_ip(5)).await.is_ok());
        assert!(registry.contains(node_ip(5)).await);

        // unknown nodes fail to dial
        assert!(registry.register(node_ip(6)).await.is_err());
    }

    #[tokio::test]
    async fn test_get_and_remove_node() {
        let registry = registry(vec![(node_ip(5), agent_with(&[1]))]).await;

        assert_eq!(registry.get_node(node_ip(5)).await.unwrap().ip, node_ip(5));
        assert!(registry.remove_node(node_ip(5)).await.is_some());
        assert!(matches!(
            registry.get_node(node_ip(5)).await,
            Err(ControllerError::NodeNotFound(_))
        ));
        assert!(registry.remove_node(node_ip(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_updates_snapshots() {
        let agent = agent_with(&[1]);
        let registry = registry(vec![(node_ip(5), agent.clone())]).await;
        assert_eq!(registry.get_node(node_ip(5)).await.unwrap().spare(), 5);

        agent.add_eni(eni_with_usage("eni-2", 2, 2));
        agent.fail_next("describe_node_resource");
        registry.refresh().await;
        // failed refresh keeps the old snapshot
        assert_eq!(registry.get_node(node_ip(5)).await.unwrap().spare(), 5);

        registry.refresh().await;
        assert_eq!(registry.get_node(node_ip(5)).await.unwrap().spare(), 9);
    }
}
