use std::collections::BTreeMap;

use datainfrapilot_backend::catalog::{flower_active, resolve_endpoint, Catalog};
use datainfrapilot_backend::models::{AccessType, ConfigValue, EndpointConfig};

fn config(pairs: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_catalog_exposes_the_four_applications() {
    let catalog = Catalog::new();
    for id in ["airflow", "spark", "grafana", "prefect"] {
        let app = catalog.get(id).unwrap();
        assert!(!app.endpoints.is_empty(), "{} has no endpoints", id);
        assert!(!app.chart.repo_url.is_empty());
    }
    assert!(catalog.get("superset").is_err());
}

#[tokio::test]
async fn test_airflow_valid_config_passes() {
    let catalog = Catalog::new();
    let app = catalog.get("airflow").unwrap();
    let cfg = config(&[
        ("version", ConfigValue::Text("2.10.3".into())),
        ("executor", ConfigValue::Text("CeleryExecutor".into())),
        ("flower_enabled", ConfigValue::Bool(true)),
        (
            "dags_repository",
            ConfigValue::Text("https://github.com/acme/dags.git".into()),
        ),
    ]);
    assert!(catalog.validate_config(app, &cfg).is_empty());
}

#[tokio::test]
async fn test_airflow_bad_dag_repo_scheme_fails() {
    let catalog = Catalog::new();
    let app = catalog.get("airflow").unwrap();
    let cfg = config(&[(
        "dags_repository",
        ConfigValue::Text("ssh://example.com/dags.git".into()),
    )]);
    let issues = catalog.validate_config(app, &cfg);
    assert!(issues.iter().any(|i| i.field == "dags_repository"));
}

#[tokio::test]
async fn test_airflow_flower_policy() {
    // KubernetesExecutor with flower_enabled=true must not expose the
    // Flower UI.
    let cfg = config(&[
        ("executor", ConfigValue::Text("KubernetesExecutor".into())),
        ("flower_enabled", ConfigValue::Bool(true)),
    ]);
    assert!(!flower_active(&cfg));

    let cfg = config(&[
        ("executor", ConfigValue::Text("CeleryExecutor".into())),
        ("flower_enabled", ConfigValue::Bool(true)),
    ]);
    assert!(flower_active(&cfg));
}

#[tokio::test]
async fn test_airflow_custom_image_gates_registry_fields() {
    let catalog = Catalog::new();
    let app = catalog.get("airflow").unwrap();

    let without_toggle = config(&[(
        "dags_repository",
        ConfigValue::Text("https://github.com/acme/dags.git".into()),
    )]);
    let issues = catalog.validate_config(app, &without_toggle);
    assert!(!issues.iter().any(|i| i.field.starts_with("registry")));

    let with_toggle = config(&[
        (
            "dags_repository",
            ConfigValue::Text("https://github.com/acme/dags.git".into()),
        ),
        ("custom_image_enabled", ConfigValue::Bool(true)),
    ]);
    let issues = catalog.validate_config(app, &with_toggle);
    assert!(issues.iter().any(|i| i.field == "registry_url"));
    assert!(issues.iter().any(|i| i.field == "registry_tag"));
}

#[tokio::test]
async fn test_spark_worker_bounds() {
    let catalog = Catalog::new();
    let app = catalog.get("spark").unwrap();
    let cfg = config(&[
        ("min_workers", ConfigValue::Number(4.0)),
        ("max_workers", ConfigValue::Number(2.0)),
    ]);
    let issues = catalog.validate_config(app, &cfg);
    assert!(issues.iter().any(|i| i.field == "max_workers"));
}

#[tokio::test]
async fn test_validation_twice_yields_identical_outcome() {
    let catalog = Catalog::new();
    let app = catalog.get("spark").unwrap();
    let cfg = config(&[("min_workers", ConfigValue::Number(0.0))]);
    assert_eq!(
        catalog.validate_config(app, &cfg),
        catalog.validate_config(app, &cfg)
    );
}

#[tokio::test]
async fn test_endpoint_resolution_per_access_type() {
    let subdomain = EndpointConfig {
        name: "web-ui".into(),
        access_type: AccessType::Subdomain,
        value: "airflow".into(),
        enabled: true,
    };
    let resolved = resolve_endpoint(&subdomain, Some("example.com"), "203.0.113.9", "dip-a").unwrap();
    assert_eq!(resolved.host.as_deref(), Some("airflow.example.com"));
    assert_eq!(resolved.base_url, "https://airflow.example.com");
    assert_eq!(resolved.entrypoint, "websecure");
    assert!(resolved.tls_secret.is_some());

    let domain_path = EndpointConfig {
        name: "web-ui".into(),
        access_type: AccessType::DomainPath,
        value: "/grafana".into(),
        enabled: true,
    };
    let resolved = resolve_endpoint(&domain_path, Some("example.com"), "203.0.113.9", "dip-a").unwrap();
    assert_eq!(resolved.host.as_deref(), Some("example.com"));
    assert_eq!(resolved.path, "/grafana");
    assert_eq!(resolved.base_url, "https://example.com/grafana");

    let ip_path = EndpointConfig {
        name: "web-ui".into(),
        access_type: AccessType::ClusterIpPath,
        value: "/prefect".into(),
        enabled: true,
    };
    let resolved = resolve_endpoint(&ip_path, None, "203.0.113.9", "dip-a").unwrap();
    assert_eq!(resolved.base_url, "http://203.0.113.9/prefect");
    assert_eq!(resolved.entrypoint, "web");

    // Domain-less clusters cannot serve domain-bound endpoints.
    assert!(resolve_endpoint(&domain_path, None, "203.0.113.9", "dip-a").is_err());
}

#[tokio::test]
async fn test_version_listing_for_static_sources() {
    let catalog = Catalog::new();
    let versions = catalog.versions("spark").await.unwrap();
    assert!(versions.contains(&"3.5.1".to_string()));
    assert!(catalog.versions("nonexistent").await.is_err());
}
