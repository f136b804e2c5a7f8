use std::collections::BTreeMap;

use datainfrapilot_backend::catalog::{Catalog, InstallContext};
use datainfrapilot_backend::models::{AccessType, ConfigValue, EndpointConfig};
use datainfrapilot_backend::render::{self, Renderer};
use serde_json::json;

fn config(pairs: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn install_context(endpoints: &[(&str, AccessType, &str)]) -> InstallContext {
    let namespace = "dip-test".to_string();
    let mut ctx = InstallContext {
        namespace: namespace.clone(),
        access_ip: "203.0.113.9".to_string(),
        node_pool: None,
        endpoints: BTreeMap::new(),
        volume_pvcs: BTreeMap::new(),
        pull_secret: None,
    };
    for (name, access_type, value) in endpoints {
        let ep = EndpointConfig {
            name: name.to_string(),
            access_type: *access_type,
            value: value.to_string(),
            enabled: true,
        };
        let resolved = datainfrapilot_backend::catalog::resolve_endpoint(
            &ep,
            Some("example.com"),
            &ctx.access_ip,
            &namespace,
        )
        .unwrap();
        ctx.endpoints.insert(name.to_string(), resolved);
    }
    ctx
}

#[tokio::test]
async fn test_worker_cloud_init_renders_bit_exact_join() {
    let renderer = Renderer::new().unwrap();
    let out = renderer
        .render(
            render::CLOUD_INIT_WORKER,
            json!({
                "k3s_version": "v1.32.3+k3s1",
                "k3s_token": "tok",
                "master_ip": "198.51.100.4",
                "pool_name": "workers",
            }),
        )
        .unwrap();

    assert!(out.starts_with("#cloud-config"));
    assert!(out.contains(r#"K3S_URL="https://198.51.100.4:6443""#));
    assert!(out.contains(r#"K3S_TOKEN="tok""#));
    assert!(out.contains("--node-label pool=workers"));
}

#[tokio::test]
async fn test_airflow_values_render_without_flower() {
    // Flower is hidden here, so the rendered values must not enable it.
    let catalog = Catalog::new();
    let app = catalog.get("airflow").unwrap();
    let cfg = config(&[
        ("executor", ConfigValue::Text("KubernetesExecutor".into())),
        ("flower_enabled", ConfigValue::Bool(true)),
        (
            "dags_repository",
            ConfigValue::Text("https://github.com/acme/dags.git".into()),
        ),
    ]);
    let ctx = install_context(&[("web-ui", AccessType::Subdomain, "airflow")]);

    let values_ctx = catalog.build_values_context(app, &cfg, &ctx).unwrap();
    let rendered = Renderer::new()
        .unwrap()
        .render(render::AIRFLOW_VALUES, values_ctx)
        .unwrap();

    assert!(rendered.contains("executor: KubernetesExecutor"));
    assert!(rendered.contains("enabled: false"));
    assert!(!rendered.contains("flower:\n  enabled: true"));
    assert!(rendered.contains("base_url: https://airflow.example.com"));
}

#[tokio::test]
async fn test_airflow_custom_image_ignores_version() {
    let catalog = Catalog::new();
    let app = catalog.get("airflow").unwrap();
    let cfg = config(&[
        ("version", ConfigValue::Text("2.10.3".into())),
        ("custom_image_enabled", ConfigValue::Bool(true)),
        ("registry_url", ConfigValue::Text("registry.acme.io/airflow".into())),
        ("registry_tag", ConfigValue::Text("v7".into())),
        (
            "dags_repository",
            ConfigValue::Text("https://github.com/acme/dags.git".into()),
        ),
    ]);
    let ctx = install_context(&[("web-ui", AccessType::Subdomain, "airflow")]);

    let values_ctx = catalog.build_values_context(app, &cfg, &ctx).unwrap();
    let rendered = Renderer::new()
        .unwrap()
        .render(render::AIRFLOW_VALUES, values_ctx)
        .unwrap();

    assert!(rendered.contains("defaultAirflowRepository: registry.acme.io/airflow"));
    assert!(rendered.contains(r#"defaultAirflowTag: "v7""#));
    assert!(!rendered.contains("airflowVersion"));
}

#[tokio::test]
async fn test_spark_cluster_manifest_carries_worker_bounds() {
    let catalog = Catalog::new();
    let app = catalog.get("spark").unwrap();
    let cfg = config(&[
        ("min_workers", ConfigValue::Number(2.0)),
        ("max_workers", ConfigValue::Number(5.0)),
    ]);
    let ctx = install_context(&[("web-ui", AccessType::ClusterIpPath, "/spark")]);

    let manifests = catalog.build_manifest_contexts(app, &cfg, &ctx).unwrap();
    let renderer = Renderer::new().unwrap();

    let (template, cluster_ctx) = &manifests[0];
    let rendered = renderer.render(template, cluster_ctx).unwrap();
    assert!(rendered.contains("kind: SparkCluster"));
    assert!(rendered.contains("minWorkers: 2"));
    assert!(rendered.contains("maxWorkers: 5"));
    assert!(rendered.contains("spark.ui.reverseProxyUrl: \"http://203.0.113.9/spark\""));
}

#[tokio::test]
async fn test_grafana_values_serve_from_sub_path() {
    let catalog = Catalog::new();
    let app = catalog.get("grafana").unwrap();
    let cfg = config(&[("replicas", ConfigValue::Number(3.0))]);
    let ctx = install_context(&[("web-ui", AccessType::ClusterIpPath, "/grafana")]);

    let values_ctx = catalog.build_values_context(app, &cfg, &ctx).unwrap();
    let rendered = Renderer::new()
        .unwrap()
        .render(render::GRAFANA_VALUES, values_ctx)
        .unwrap();

    assert!(rendered.contains("replicas: 3"));
    assert!(rendered.contains("root_url: http://203.0.113.9/grafana"));
    assert!(rendered.contains("storageClassName: hcloud-volumes"));
}

#[tokio::test]
async fn test_renderer_rejects_unknown_variables() {
    let renderer = Renderer::new().unwrap();
    let result = renderer.render(render::CLOUD_INIT_WORKER, json!({"k3s_version": "x"}));
    assert!(result.is_err());
}
