use std::collections::BTreeMap;

use serde_json::json;

use crate::catalog::{InstallContext, VersionSource};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AccessEndpointSpec, AccessType, ApplicationDescriptor, ConfigOption, ConfigOptionType,
    ConfigValue, CredentialsSource, HelmChartRef,
};
use crate::render;

pub fn descriptor() -> ApplicationDescriptor {
    ApplicationDescriptor {
        id: "grafana".to_string(),
        display_name: "Grafana".to_string(),
        config_options: vec![
            ConfigOption {
                id: "version".to_string(),
                label: "Grafana version".to_string(),
                option_type: ConfigOptionType::Select,
                required: true,
                default: Some(ConfigValue::Text("11.6".to_string())),
                select_options: vec!["11.6".to_string(), "11.5".to_string(), "10.4".to_string()],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "replicas".to_string(),
                label: "Replica count".to_string(),
                option_type: ConfigOptionType::Number,
                required: false,
                default: Some(ConfigValue::Number(1.0)),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
        ],
        volume_requirements: vec![],
        endpoints: vec![AccessEndpointSpec {
            name: "web-ui".to_string(),
            description: "Grafana Web UI".to_string(),
            default_access: AccessType::ClusterIpPath,
            default_value: "/grafana".to_string(),
            required: true,
            service: "{release}",
            port: 80,
        }],
        chart: HelmChartRef {
            name: "grafana".to_string(),
            repo_url: "https://grafana.github.io/helm-charts".to_string(),
            version: "8.12.1".to_string(),
        },
        credentials: CredentialsSource::Secret {
            secret_name: "grafana".to_string(),
            username_key: Some("admin-user".to_string()),
            password_key: "admin-password".to_string(),
            fallback_username: "admin".to_string(),
        },
        values_template: render::GRAFANA_VALUES,
        manifest_templates: &[],
    }
}

pub fn version_source() -> VersionSource {
    VersionSource::Static(vec![
        "11.6".to_string(),
        "11.5".to_string(),
        "10.4".to_string(),
    ])
}

pub fn values_context(
    config: &BTreeMap<String, ConfigValue>,
    ctx: &InstallContext,
) -> ApiResult<serde_json::Value> {
    let web = ctx.endpoints.get("web-ui").ok_or_else(|| {
        ApiError::Validation("grafana requires the web-ui endpoint".to_string())
    })?;

    let replicas = config
        .get("replicas")
        .and_then(ConfigValue::as_f64)
        .unwrap_or(1.0) as i64;

    Ok(json!({
        "replicas": replicas.max(1),
        "entrypoint": web.entrypoint,
        "path": web.path,
        "host": web.host.clone().unwrap_or_default(),
        "tls_secret": web.tls_secret.clone().unwrap_or_default(),
        "root_url": web.base_url,
        "node_pool": ctx.node_pool.clone().unwrap_or_default(),
    }))
}
