// Application catalog: static descriptors for the deployable applications,
// config validation against their schemas, and endpoint resolution shared by
// the deployment pipeline.

mod airflow;
mod grafana;
mod prefect;
mod spark;
mod versions;

pub use airflow::{flower_active, AIRFLOW_SSH_SECRET, REGISTRY_PULL_SECRET};
pub use prefect::{credentials_secret_data as prefect_credentials_secret_data, PREFECT_CREDENTIALS_SECRET};
pub use versions::{VersionCache, VersionSource};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    AccessType, ApplicationDescriptor, ConfigOption, ConfigOptionType, ConfigValue,
    EndpointConfig, normalize_endpoint_value,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

/// Endpoint with its routing facts computed against the target cluster.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub name: String,
    pub access_type: AccessType,
    pub host: Option<String>,
    pub path: String,
    pub base_url: String,
    pub tls_secret: Option<String>,
    pub entrypoint: &'static str,
}

/// Computed facts handed to an application's values builder.
#[derive(Debug, Clone, Default)]
pub struct InstallContext {
    pub namespace: String,
    pub access_ip: String,
    pub node_pool: Option<String>,
    pub endpoints: BTreeMap<String, ResolvedEndpoint>,
    pub volume_pvcs: BTreeMap<String, String>,
    pub pull_secret: Option<String>,
}

pub struct Catalog {
    apps: BTreeMap<String, ApplicationDescriptor>,
    version_sources: BTreeMap<String, VersionSource>,
    versions: VersionCache,
}

impl Catalog {
    pub fn new() -> Self {
        let mut apps = BTreeMap::new();
        let mut version_sources = BTreeMap::new();

        for (descriptor, source) in [
            (airflow::descriptor(), airflow::version_source()),
            (spark::descriptor(), spark::version_source()),
            (grafana::descriptor(), grafana::version_source()),
            (prefect::descriptor(), prefect::version_source()),
        ] {
            version_sources.insert(descriptor.id.clone(), source);
            apps.insert(descriptor.id.clone(), descriptor);
        }

        Catalog {
            apps,
            version_sources,
            versions: VersionCache::new(),
        }
    }

    pub fn list(&self) -> Vec<&ApplicationDescriptor> {
        self.apps.values().collect()
    }

    pub fn get(&self, id: &str) -> ApiResult<&ApplicationDescriptor> {
        self.apps
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("application '{}'", id)))
    }

    pub async fn versions(&self, id: &str) -> ApiResult<Vec<String>> {
        let source = self
            .version_sources
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("application '{}'", id)))?;
        self.versions.get(id, source).await
    }

    /// Check a user config mapping against the application's schema.
    /// Conditional fields hidden by their predicate are treated as absent.
    /// An empty result means the config is acceptable.
    pub fn validate_config(
        &self,
        app: &ApplicationDescriptor,
        config: &BTreeMap<String, ConfigValue>,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for option in &app.config_options {
            let visible = option_visible(option, config);
            let value = if visible { config.get(&option.id) } else { None };

            match value {
                None => {
                    if visible && option.required && option.default.is_none() {
                        issues.push(ValidationIssue {
                            field: option.id.clone(),
                            message: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => check_type(option, value, &mut issues),
            }
        }

        match app.id.as_str() {
            "airflow" => airflow::validate_extra(config, &mut issues),
            "spark" => spark::validate_extra(config, &mut issues),
            _ => {}
        }

        issues
    }

    /// Render the application's Helm values for an install or upgrade.
    pub fn build_values_context(
        &self,
        app: &ApplicationDescriptor,
        config: &BTreeMap<String, ConfigValue>,
        ctx: &InstallContext,
    ) -> ApiResult<serde_json::Value> {
        match app.id.as_str() {
            "airflow" => airflow::values_context(config, ctx),
            "spark" => spark::values_context(config, ctx),
            "grafana" => grafana::values_context(config, ctx),
            "prefect" => prefect::values_context(config, ctx),
            other => Err(ApiError::NotFound(format!("application '{}'", other))),
        }
    }

    /// Contexts for the extra manifests applied after the chart install.
    pub fn build_manifest_contexts(
        &self,
        app: &ApplicationDescriptor,
        config: &BTreeMap<String, ConfigValue>,
        ctx: &InstallContext,
    ) -> ApiResult<Vec<(&'static str, serde_json::Value)>> {
        match app.id.as_str() {
            "spark" => spark::manifest_contexts(config, ctx),
            _ => Ok(Vec::new()),
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn option_visible(option: &ConfigOption, config: &BTreeMap<String, ConfigValue>) -> bool {
    match &option.conditional {
        None => true,
        Some(cond) => config
            .get(&cond.field)
            .map(|value| value == &cond.value)
            .unwrap_or(false),
    }
}

fn check_type(option: &ConfigOption, value: &ConfigValue, issues: &mut Vec<ValidationIssue>) {
    let ok = match option.option_type {
        ConfigOptionType::Text => matches!(value, ConfigValue::Text(_)),
        ConfigOptionType::Number => matches!(value, ConfigValue::Number(_)),
        ConfigOptionType::Boolean => matches!(value, ConfigValue::Bool(_)),
        ConfigOptionType::Select => matches!(value, ConfigValue::Text(_)),
    };
    if !ok {
        issues.push(ValidationIssue {
            field: option.id.clone(),
            message: format!("expected a {:?} value", option.option_type),
        });
        return;
    }

    // Fixed select choices are closed; version selects are validated against
    // the live feed at deploy time instead.
    if option.option_type == ConfigOptionType::Select
        && !option.fetched_versions
        && !option.select_options.is_empty()
    {
        if let Some(text) = value.as_str() {
            if !option.select_options.iter().any(|o| o == text) {
                issues.push(ValidationIssue {
                    field: option.id.clone(),
                    message: format!("'{}' is not one of the allowed choices", text),
                });
            }
        }
    }
}

/// Compute routing facts for an enabled endpoint. Subdomain and domain-path
/// endpoints need the cluster to own a domain.
pub fn resolve_endpoint(
    endpoint: &EndpointConfig,
    domain: Option<&str>,
    access_ip: &str,
    namespace: &str,
) -> ApiResult<ResolvedEndpoint> {
    let normalized = normalize_endpoint_value(endpoint.access_type, &endpoint.value);

    match endpoint.access_type {
        AccessType::Subdomain => {
            let domain = domain.ok_or_else(|| {
                ApiError::Validation(format!(
                    "endpoint '{}' uses a subdomain but the cluster has no domain name",
                    endpoint.name
                ))
            })?;
            let host = if normalized.contains('.') {
                normalized
            } else {
                format!("{}.{}", normalized, domain)
            };
            Ok(ResolvedEndpoint {
                name: endpoint.name.clone(),
                access_type: endpoint.access_type,
                base_url: format!("https://{}", host),
                tls_secret: Some(format!("{}-{}-tls", namespace, endpoint.name)),
                host: Some(host),
                path: "/".to_string(),
                entrypoint: "websecure",
            })
        }
        AccessType::DomainPath => {
            let domain = domain.ok_or_else(|| {
                ApiError::Validation(format!(
                    "endpoint '{}' uses a domain path but the cluster has no domain name",
                    endpoint.name
                ))
            })?;
            Ok(ResolvedEndpoint {
                name: endpoint.name.clone(),
                access_type: endpoint.access_type,
                base_url: format!("https://{}{}", domain, normalized),
                tls_secret: Some(format!("{}-{}-tls", namespace, endpoint.name)),
                host: Some(domain.to_string()),
                path: normalized,
                entrypoint: "websecure",
            })
        }
        AccessType::ClusterIpPath => Ok(ResolvedEndpoint {
            name: endpoint.name.clone(),
            access_type: endpoint.access_type,
            base_url: format!("http://{}{}", access_ip, normalized),
            tls_secret: None,
            host: None,
            path: normalized,
            entrypoint: "web",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn catalog_lists_all_applications() {
        let catalog = Catalog::new();
        let mut ids: Vec<_> = catalog.list().iter().map(|a| a.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["airflow", "grafana", "prefect", "spark"]);
    }

    #[test]
    fn validation_flags_missing_required_field() {
        let catalog = Catalog::new();
        let app = catalog.get("airflow").unwrap();
        let issues = catalog.validate_config(app, &config(&[]));
        assert!(issues.iter().any(|i| i.field == "dags_repository"));
    }

    #[test]
    fn validation_is_idempotent() {
        let catalog = Catalog::new();
        let app = catalog.get("airflow").unwrap();
        let cfg = config(&[
            ("dags_repository", ConfigValue::Text("https://github.com/acme/dags.git".into())),
            ("executor", ConfigValue::Text("CeleryExecutor".into())),
        ]);
        let first = catalog.validate_config(app, &cfg);
        let second = catalog.validate_config(app, &cfg);
        assert_eq!(first, second);
    }

    #[test]
    fn hidden_conditional_field_is_ignored() {
        let catalog = Catalog::new();
        let app = catalog.get("airflow").unwrap();
        // registry_url is gated behind custom_image_enabled; with the toggle
        // off it must not be required even though it is marked required.
        let cfg = config(&[
            ("dags_repository", ConfigValue::Text("git@github.com:acme/dags.git".into())),
            ("custom_image_enabled", ConfigValue::Bool(false)),
        ]);
        let issues = catalog.validate_config(app, &cfg);
        assert!(!issues.iter().any(|i| i.field == "registry_url"));

        let cfg = config(&[
            ("dags_repository", ConfigValue::Text("git@github.com:acme/dags.git".into())),
            ("custom_image_enabled", ConfigValue::Bool(true)),
        ]);
        let issues = catalog.validate_config(app, &cfg);
        assert!(issues.iter().any(|i| i.field == "registry_url"));
        assert!(issues.iter().any(|i| i.field == "registry_tag"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let catalog = Catalog::new();
        let app = catalog.get("grafana").unwrap();
        let issues = catalog.validate_config(
            app,
            &config(&[("replicas", ConfigValue::Text("two".into()))]),
        );
        assert!(issues.iter().any(|i| i.field == "replicas"));
    }

    #[test]
    fn subdomain_endpoint_requires_domain() {
        let ep = EndpointConfig {
            name: "web-ui".into(),
            access_type: AccessType::Subdomain,
            value: "airflow".into(),
            enabled: true,
        };
        assert!(resolve_endpoint(&ep, None, "203.0.113.7", "dip-x").is_err());

        let resolved = resolve_endpoint(&ep, Some("example.com"), "203.0.113.7", "dip-x").unwrap();
        assert_eq!(resolved.host.as_deref(), Some("airflow.example.com"));
        assert_eq!(resolved.path, "/");
        assert_eq!(resolved.base_url, "https://airflow.example.com");
    }

    #[test]
    fn cluster_ip_endpoint_resolves_against_access_ip() {
        let ep = EndpointConfig {
            name: "web-ui".into(),
            access_type: AccessType::ClusterIpPath,
            value: "Grafana/".into(),
            enabled: true,
        };
        let resolved = resolve_endpoint(&ep, None, "203.0.113.7", "dip-x").unwrap();
        assert_eq!(resolved.path, "/grafana");
        assert_eq!(resolved.base_url, "http://203.0.113.7/grafana");
        assert!(resolved.tls_secret.is_none());
    }
}
