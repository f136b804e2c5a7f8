use std::collections::BTreeMap;

use serde_json::json;

use crate::catalog::{InstallContext, ValidationIssue, VersionSource};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AccessEndpointSpec, AccessType, ApplicationDescriptor, ConfigOption, ConfigOptionType,
    ConfigValue, Conditional, CredentialsSource, HelmChartRef, VolumeRequirement,
};
use crate::render;

pub const AIRFLOW_SSH_SECRET: &str = "airflow-ssh-secret";
pub const REGISTRY_PULL_SECRET: &str = "registry-pull-secret";

pub fn descriptor() -> ApplicationDescriptor {
    ApplicationDescriptor {
        id: "airflow".to_string(),
        display_name: "Apache Airflow".to_string(),
        config_options: vec![
            ConfigOption {
                id: "version".to_string(),
                label: "Airflow version".to_string(),
                option_type: ConfigOptionType::Select,
                required: true,
                default: Some(ConfigValue::Text("2.10.3".to_string())),
                select_options: vec![],
                fetched_versions: true,
                conditional: None,
            },
            ConfigOption {
                id: "executor".to_string(),
                label: "Executor".to_string(),
                option_type: ConfigOptionType::Select,
                required: true,
                default: Some(ConfigValue::Text("CeleryExecutor".to_string())),
                select_options: vec![
                    "CeleryExecutor".to_string(),
                    "LocalExecutor".to_string(),
                    "KubernetesExecutor".to_string(),
                ],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "flower_enabled".to_string(),
                label: "Enable Flower UI".to_string(),
                option_type: ConfigOptionType::Boolean,
                required: false,
                default: Some(ConfigValue::Bool(false)),
                select_options: vec![],
                fetched_versions: false,
                conditional: Some(Conditional {
                    field: "executor".to_string(),
                    value: ConfigValue::Text("CeleryExecutor".to_string()),
                }),
            },
            ConfigOption {
                id: "dags_repository".to_string(),
                label: "DAG repository URL".to_string(),
                option_type: ConfigOptionType::Text,
                required: true,
                default: None,
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "dags_repository_branch".to_string(),
                label: "DAG repository branch".to_string(),
                option_type: ConfigOptionType::Text,
                required: false,
                default: Some(ConfigValue::Text("main".to_string())),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "dags_repository_subpath".to_string(),
                label: "Path to DAGs inside the repository".to_string(),
                option_type: ConfigOptionType::Text,
                required: false,
                default: Some(ConfigValue::Text("dags".to_string())),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "dags_repository_private".to_string(),
                label: "Private DAG repository".to_string(),
                option_type: ConfigOptionType::Boolean,
                required: false,
                default: Some(ConfigValue::Bool(false)),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "dags_repository_ssh_private_key".to_string(),
                label: "SSH private key for the DAG repository".to_string(),
                option_type: ConfigOptionType::Text,
                required: true,
                default: None,
                select_options: vec![],
                fetched_versions: false,
                conditional: Some(Conditional {
                    field: "dags_repository_private".to_string(),
                    value: ConfigValue::Bool(true),
                }),
            },
            ConfigOption {
                id: "custom_image_enabled".to_string(),
                label: "Use a custom Airflow image".to_string(),
                option_type: ConfigOptionType::Boolean,
                required: false,
                default: Some(ConfigValue::Bool(false)),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "registry_url".to_string(),
                label: "Image repository".to_string(),
                option_type: ConfigOptionType::Text,
                required: true,
                default: None,
                select_options: vec![],
                fetched_versions: false,
                conditional: Some(Conditional {
                    field: "custom_image_enabled".to_string(),
                    value: ConfigValue::Bool(true),
                }),
            },
            ConfigOption {
                id: "registry_tag".to_string(),
                label: "Image tag".to_string(),
                option_type: ConfigOptionType::Text,
                required: true,
                default: None,
                select_options: vec![],
                fetched_versions: false,
                conditional: Some(Conditional {
                    field: "custom_image_enabled".to_string(),
                    value: ConfigValue::Bool(true),
                }),
            },
            ConfigOption {
                id: "registry_username".to_string(),
                label: "Registry username".to_string(),
                option_type: ConfigOptionType::Text,
                required: false,
                default: None,
                select_options: vec![],
                fetched_versions: false,
                conditional: Some(Conditional {
                    field: "custom_image_enabled".to_string(),
                    value: ConfigValue::Bool(true),
                }),
            },
            ConfigOption {
                id: "registry_password".to_string(),
                label: "Registry password".to_string(),
                option_type: ConfigOptionType::Text,
                required: false,
                default: None,
                select_options: vec![],
                fetched_versions: false,
                conditional: Some(Conditional {
                    field: "custom_image_enabled".to_string(),
                    value: ConfigValue::Bool(true),
                }),
            },
            ConfigOption {
                id: "instance_name".to_string(),
                label: "Instance name".to_string(),
                option_type: ConfigOptionType::Text,
                required: false,
                default: Some(ConfigValue::Text("Airflow".to_string())),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
        ],
        volume_requirements: vec![VolumeRequirement {
            name: "airflow-logs".to_string(),
            default_size_gb: 100,
            description: "Persistent storage for Airflow logs".to_string(),
        }],
        endpoints: vec![
            AccessEndpointSpec {
                name: "web-ui".to_string(),
                description: "Airflow Web UI".to_string(),
                default_access: AccessType::Subdomain,
                default_value: "airflow".to_string(),
                required: true,
                service: "{release}-webserver",
                port: 8080,
            },
            AccessEndpointSpec {
                name: "flower-ui".to_string(),
                description: "Airflow Flower UI".to_string(),
                default_access: AccessType::DomainPath,
                default_value: "/flower".to_string(),
                required: false,
                service: "{release}-flower",
                port: 5555,
            },
        ],
        chart: HelmChartRef {
            name: "airflow".to_string(),
            repo_url: "https://airflow.apache.org".to_string(),
            version: "1.15.0".to_string(),
        },
        credentials: CredentialsSource::Static {
            username: "admin".to_string(),
            password: "admin".to_string(),
        },
        values_template: render::AIRFLOW_VALUES,
        manifest_templates: &[],
    }
}

pub fn version_source() -> VersionSource {
    VersionSource::GithubReleases { repo: "apache/airflow" }
}

/// The Flower UI is only real under the Celery executor with the toggle on;
/// otherwise its endpoint must not be exposed.
pub fn flower_active(config: &BTreeMap<String, ConfigValue>) -> bool {
    let celery = config
        .get("executor")
        .and_then(ConfigValue::as_str)
        .map(|e| e == "CeleryExecutor")
        // CeleryExecutor is the default executor.
        .unwrap_or(true);
    let flower = config
        .get("flower_enabled")
        .and_then(ConfigValue::as_bool)
        .unwrap_or(false);
    celery && flower
}

pub fn validate_extra(config: &BTreeMap<String, ConfigValue>, issues: &mut Vec<ValidationIssue>) {
    if let Some(repo) = config.get("dags_repository").and_then(ConfigValue::as_str) {
        let ok = repo.starts_with("http://")
            || repo.starts_with("https://")
            || repo.starts_with("git@");
        if !ok {
            issues.push(ValidationIssue {
                field: "dags_repository".to_string(),
                message: "must start with http://, https:// or git@".to_string(),
            });
        }
    }
}

fn text<'a>(config: &'a BTreeMap<String, ConfigValue>, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(ConfigValue::as_str).unwrap_or(default)
}

pub fn values_context(
    config: &BTreeMap<String, ConfigValue>,
    ctx: &InstallContext,
) -> ApiResult<serde_json::Value> {
    let web = ctx.endpoints.get("web-ui").ok_or_else(|| {
        ApiError::Validation("airflow requires the web-ui endpoint".to_string())
    })?;

    let flower_enabled = flower_active(config);
    let flower = ctx.endpoints.get("flower-ui").filter(|_| flower_enabled);

    let custom_image = config
        .get("custom_image_enabled")
        .and_then(ConfigValue::as_bool)
        .unwrap_or(false);

    let private_repo = config
        .get("dags_repository_private")
        .and_then(ConfigValue::as_bool)
        .unwrap_or(false);

    Ok(json!({
        "custom_image": custom_image,
        "image_repository": text(config, "registry_url", ""),
        "image_tag": text(config, "registry_tag", ""),
        "pull_secret": ctx.pull_secret.clone().unwrap_or_default(),
        "airflow_version": text(config, "version", "2.10.3"),
        "executor": text(config, "executor", "CeleryExecutor"),
        "instance_name": text(config, "instance_name", "Airflow"),
        "flower_enabled": flower_enabled,
        "web_base_url": web.base_url,
        "web_entrypoint": web.entrypoint,
        "web_path": web.path,
        "web_host": web.host.clone().unwrap_or_default(),
        "web_tls_secret": web.tls_secret.clone().unwrap_or_default(),
        "flower_entrypoint": flower.map(|f| f.entrypoint).unwrap_or("web"),
        "flower_path": flower.map(|f| f.path.clone()).unwrap_or_default(),
        "flower_host": flower.and_then(|f| f.host.clone()).unwrap_or_default(),
        "dags_repo": text(config, "dags_repository", ""),
        "dags_branch": text(config, "dags_repository_branch", "main"),
        "dags_subpath": text(config, "dags_repository_subpath", "dags"),
        "dags_ssh_secret": if private_repo { AIRFLOW_SSH_SECRET } else { "" },
        "logs_pvc": ctx
            .volume_pvcs
            .get("airflow-logs")
            .cloned()
            .unwrap_or_else(|| "airflow-logs".to_string()),
        "node_pool": ctx.node_pool.clone().unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn flower_requires_celery_executor() {
        assert!(flower_active(&config(&[
            ("executor", ConfigValue::Text("CeleryExecutor".into())),
            ("flower_enabled", ConfigValue::Bool(true)),
        ])));
        assert!(!flower_active(&config(&[
            ("executor", ConfigValue::Text("KubernetesExecutor".into())),
            ("flower_enabled", ConfigValue::Bool(true)),
        ])));
        assert!(!flower_active(&config(&[(
            "executor",
            ConfigValue::Text("CeleryExecutor".into())
        )])));
    }

    #[test]
    fn dag_repository_scheme_is_enforced() {
        let mut issues = Vec::new();
        validate_extra(
            &config(&[("dags_repository", ConfigValue::Text("ftp://x".into()))]),
            &mut issues,
        );
        assert_eq!(issues.len(), 1);

        issues.clear();
        validate_extra(
            &config(&[("dags_repository", ConfigValue::Text("git@github.com:a/b.git".into()))]),
            &mut issues,
        );
        assert!(issues.is_empty());
    }
}
