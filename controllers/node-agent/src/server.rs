//! Axum HTTP server for the node agent RPC surface

use crate::error::AgentError;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use node_agent_client::{
    AckResponse, AgentRequest, BusiestEniResponse, ErrorKind, ErrorResponse, HealthResponse, ManagedEnisResponse,
    NodeAgentError, NodeAgentTrait, NodeResourceResponse, ServiceNetworkRequest, ServingStatus, paths,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Agent shared by all handlers
pub type SharedAgent = Arc<dyn NodeAgentTrait>;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ResourceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(request_id: &str, error: NodeAgentError) -> ApiError {
    let kind = error.kind();
    warn!(request_id, error = %error, "Request failed");
    (
        status_for(kind),
        Json(ErrorResponse {
            request_id: request_id.to_string(),
            message: error.to_string(),
            kind,
        }),
    )
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                request_id: String::new(),
                message: rejection.body_text(),
                kind: ErrorKind::InvalidRequest,
            }),
        )
    })
}

async fn choose_busiest_eni(
    State(agent): State<SharedAgent>,
    payload: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<Json<BusiestEniResponse>, ApiError> {
    let AgentRequest { request_id } = body(payload)?;
    let eni = agent
        .choose_busiest_eni(&request_id)
        .await
        .map_err(|e| api_error(&request_id, e))?;
    Ok(Json(BusiestEniResponse { request_id, eni }))
}

async fn get_managed_enis(
    State(agent): State<SharedAgent>,
    payload: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<Json<ManagedEnisResponse>, ApiError> {
    let AgentRequest { request_id } = body(payload)?;
    let enis = agent
        .get_managed_enis(&request_id)
        .await
        .map_err(|e| api_error(&request_id, e))?;
    Ok(Json(ManagedEnisResponse { request_id, enis }))
}

async fn describe_node_resource(
    State(agent): State<SharedAgent>,
    payload: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<Json<NodeResourceResponse>, ApiError> {
    let AgentRequest { request_id } = body(payload)?;
    let resource = agent
        .describe_node_resource(&request_id)
        .await
        .map_err(|e| api_error(&request_id, e))?;
    Ok(Json(NodeResourceResponse { request_id, resource }))
}

async fn setup_network_for_service(
    State(agent): State<SharedAgent>,
    payload: Result<Json<ServiceNetworkRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, ApiError> {
    let ServiceNetworkRequest { request_id, private_ip, eni } = body(payload)?;
    agent
        .setup_network_for_service(&request_id, private_ip, &eni)
        .await
        .map_err(|e| api_error(&request_id, e))?;
    Ok(Json(AckResponse { request_id }))
}

async fn clean_network_for_service(
    State(agent): State<SharedAgent>,
    payload: Result<Json<ServiceNetworkRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, ApiError> {
    let ServiceNetworkRequest { request_id, private_ip, eni } = body(payload)?;
    agent
        .clean_network_for_service(&request_id, private_ip, &eni)
        .await
        .map_err(|e| api_error(&request_id, e))?;
    Ok(Json(AckResponse { request_id }))
}

async fn health(State(agent): State<SharedAgent>) -> (StatusCode, Json<HealthResponse>) {
    let status = agent.health().await.unwrap_or(ServingStatus::NotServing);
    let code = match status {
        ServingStatus::Serving => StatusCode::OK,
        ServingStatus::NotServing => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(HealthResponse { status }))
}

/// Routes of the agent RPC surface
pub fn router(agent: SharedAgent) -> Router {
    Router::new()
        .route(paths::BUSIEST_ENI, post(choose_busiest_eni))
        .route(paths::MANAGED_ENIS, post(get_managed_enis))
        .route(paths::NODE_RESOURCE, post(describe_node_resource))
        .route(paths::SERVICE_SETUP, post(setup_network_for_service))
        .route(paths::SERVICE_CLEAN, post(clean_network_for_service))
        .route(paths::HEALTH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

/// Bind the RPC listener; failure here is fatal for the agent
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, AgentError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Node agent listening on {}", addr);
    Ok(listener)
}

/// Serve the RPC surface until the listener fails
pub async fn serve(listener: TcpListener, agent: SharedAgent) -> Result<(), AgentError> {
    axum::serve(listener, router(agent)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use eni_gateway_client::mock::helpers::eni_with_usage;
    use node_agent_client::{MockNodeAgent, NodeAgentClient, Timeouts};
    use serde::de::DeserializeOwned;
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn mock_agent() -> MockNodeAgent {
        let agent = MockNodeAgent::new("mock://node-a", 6);
        agent.add_eni(eni_with_usage("eni-a", 1, 3));
        agent.add_eni(eni_with_usage("eni-b", 2, 1));
        agent
    }

    fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read<T: DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_busiest_eni_route() {
        let router = router(Arc::new(mock_agent()));

        let response = router
            .oneshot(post_json(paths::BUSIEST_ENI, serde_json::json!({ "request_id": "r-1" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: BusiestEniResponse = read(response).await;
        assert_eq!(body.request_id, "r-1");
        assert_eq!(body.eni.eni_id, "eni-a");
    }

    #[tokio::test]
    async fn test_capacity_exhaustion_is_503() {
        let router = router(Arc::new(MockNodeAgent::new("mock://empty", 6)));

        let response = router
            .oneshot(post_json(paths::BUSIEST_ENI, serde_json::json!({ "request_id": "r-2" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorResponse = read(response).await;
        assert_eq!(body.request_id, "r-2");
        assert_eq!(body.kind, ErrorKind::ResourceUnavailable);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let router = router(Arc::new(mock_agent()));

        let response = router
            .oneshot(post_json(paths::SERVICE_SETUP, serde_json::json!({ "request_id": "r-3", "private_ip": "nope" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = read(response).await;
        assert_eq!(body.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_service_setup_route() {
        let agent = mock_agent();
        let router = router(Arc::new(agent.clone()));
        let request = ServiceNetworkRequest {
            request_id: "r-4".to_string(),
            private_ip: Ipv4Addr::new(10, 0, 1, 50),
            eni: eni_with_usage("eni-a", 1, 3),
        };

        let response = router
            .oneshot(post_json(paths::SERVICE_SETUP, serde_json::to_value(&request).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: AckResponse = read(response).await;
        assert_eq!(body.request_id, "r-4");
        assert_eq!(agent.services().get(&Ipv4Addr::new(10, 0, 1, 50)).map(String::as_str), Some("eni-a"));
    }

    #[tokio::test]
    async fn test_health_reports_not_serving_as_503() {
        let agent = mock_agent();
        agent.set_status(ServingStatus::NotServing);
        let router = router(Arc::new(agent.clone()));

        let request = Request::builder().uri(paths::HEALTH).body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: HealthResponse = read(response).await;
        assert_eq!(body.status, ServingStatus::NotServing);

        agent.set_status(ServingStatus::Serving);
        let request = Request::builder().uri(paths::HEALTH).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_round_trip_over_socket() {
        let agent = mock_agent();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(agent.clone())));

        let client = NodeAgentClient::connect(format!("http://{addr}"), Timeouts::default())
            .await
            .unwrap();

        let enis = client.get_managed_enis("r-5").await.unwrap();
        assert_eq!(enis.len(), 2);

        let resource = client.describe_node_resource("r-6").await.unwrap();
        assert_eq!(resource.spare(), 8);

        // remote errors come back typed
        agent.fail_next("choose_busiest_eni");
        let err = client.choose_busiest_eni("r-7").await.unwrap_err();
        assert!(matches!(err, NodeAgentError::Agent { request_id, .. } if request_id == "r-7"));

        let eni = enis["eni-b"].clone();
        let ip = Ipv4Addr::new(10, 0, 1, 60);
        client.setup_network_for_service("r-8", ip, &eni).await.unwrap();
        client.clean_network_for_service("r-9", ip, &eni).await.unwrap();
        assert!(agent.services().is_empty());
    }
}
