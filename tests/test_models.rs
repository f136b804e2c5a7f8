use datainfrapilot_backend::models::{
    AccessType, ClusterCreateRequest, ConfigValue, DeploymentCreateRequest, EndpointConfig,
    LifecycleState, normalize_endpoint_value,
};

#[tokio::test]
async fn test_cluster_create_request_deserialization() {
    // Wire shape from the UI, node counts as strings included.
    let json = r#"{
        "name": "prod",
        "provider": "hetzner",
        "k3s_version": "v1.32.3+k3s1",
        "provider_config": {"token": "secret"},
        "pools": [
            {"name": "control-plane", "node_type": "cx22", "region": "fsn1", "number_of_nodes": "1"},
            {"name": "workers", "node_type": "cx32", "region": "fsn1", "number_of_nodes": "2"}
        ],
        "additional_components": {"traefik_dashboard": {"enabled": false}}
    }"#;

    let request: ClusterCreateRequest = serde_json::from_str(json).unwrap();

    assert_eq!(request.name, "prod");
    assert_eq!(request.provider, "hetzner");
    assert_eq!(request.k3s_version, "v1.32.3+k3s1");
    assert_eq!(request.pools.len(), 2);
    assert_eq!(request.pools[0].number_of_nodes, Some(1));
    assert_eq!(request.pools[1].number_of_nodes, Some(2));
    assert!(request.domain_name.is_none());
    let dashboard = request.additional_components.traefik_dashboard.unwrap();
    assert!(!dashboard.enabled);
}

#[tokio::test]
async fn test_deployment_create_request_deserialization() {
    let json = r#"{
        "name": "analytics",
        "application": "grafana",
        "config": {"version": "11.6", "replicas": 2},
        "endpoints": [
            {"name": "web-ui", "access_type": "cluster_ip_path", "value": "/grafana"}
        ]
    }"#;

    let request: DeploymentCreateRequest = serde_json::from_str(json).unwrap();

    assert_eq!(request.name, "analytics");
    assert_eq!(request.application, "grafana");
    assert_eq!(
        request.config.get("version"),
        Some(&ConfigValue::Text("11.6".to_string()))
    );
    assert_eq!(
        request.config.get("replicas"),
        Some(&ConfigValue::Number(2.0))
    );
    assert_eq!(request.endpoints.len(), 1);
    assert_eq!(request.endpoints[0].access_type, AccessType::ClusterIpPath);
    // enabled defaults to true on the wire
    assert!(request.endpoints[0].enabled);
    assert!(request.volumes.is_empty());
}

#[tokio::test]
async fn test_lifecycle_state_wire_format() {
    assert_eq!(
        serde_json::to_string(&LifecycleState::Creating).unwrap(),
        r#""creating""#
    );
    assert_eq!(
        serde_json::to_string(&LifecycleState::Failed).unwrap(),
        r#""failed""#
    );

    let state: LifecycleState = serde_json::from_str(r#""deleting""#).unwrap();
    assert_eq!(state, LifecycleState::Deleting);

    assert!(LifecycleState::Running.is_terminal());
    assert!(LifecycleState::Failed.is_terminal());
    assert!(!LifecycleState::Creating.is_terminal());
}

#[tokio::test]
async fn test_endpoint_normalization_rules() {
    // Path-typed values get exactly one leading slash and no trailing one.
    assert_eq!(
        normalize_endpoint_value(AccessType::DomainPath, "Grafana/"),
        "/grafana"
    );
    assert_eq!(
        normalize_endpoint_value(AccessType::ClusterIpPath, "//spark//"),
        "/spark"
    );
    // Subdomains lose slashes and case.
    assert_eq!(
        normalize_endpoint_value(AccessType::Subdomain, "/Airflow"),
        "airflow"
    );

    // Normalizing an already-normalized value is a no-op.
    let once = normalize_endpoint_value(AccessType::DomainPath, "/grafana");
    assert_eq!(normalize_endpoint_value(AccessType::DomainPath, &once), once);
}

#[tokio::test]
async fn test_endpoint_config_serialization_roundtrip() {
    let endpoint = EndpointConfig {
        name: "web-ui".to_string(),
        access_type: AccessType::DomainPath,
        value: "/grafana".to_string(),
        enabled: true,
    };

    let json = serde_json::to_string(&endpoint).unwrap();
    assert!(json.contains(r#""access_type":"domain_path""#));

    let parsed: EndpointConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.name, "web-ui");
    assert_eq!(parsed.access_type, AccessType::DomainPath);
}
