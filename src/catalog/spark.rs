use std::collections::BTreeMap;

use serde_json::json;

use crate::catalog::{InstallContext, ValidationIssue, VersionSource};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AccessEndpointSpec, AccessType, ApplicationDescriptor, ConfigOption, ConfigOptionType,
    ConfigValue, CredentialsSource, HelmChartRef,
};
use crate::render;

pub fn descriptor() -> ApplicationDescriptor {
    ApplicationDescriptor {
        id: "spark".to_string(),
        display_name: "Apache Spark".to_string(),
        config_options: vec![
            ConfigOption {
                id: "version".to_string(),
                label: "Spark version".to_string(),
                option_type: ConfigOptionType::Select,
                required: true,
                default: Some(ConfigValue::Text("3.5.1".to_string())),
                select_options: vec![
                    "3.5.5".to_string(),
                    "3.5.1".to_string(),
                    "3.4.4".to_string(),
                ],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "min_workers".to_string(),
                label: "Minimum worker count".to_string(),
                option_type: ConfigOptionType::Number,
                required: false,
                default: Some(ConfigValue::Number(1.0)),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
            ConfigOption {
                id: "max_workers".to_string(),
                label: "Maximum worker count".to_string(),
                option_type: ConfigOptionType::Number,
                required: false,
                default: Some(ConfigValue::Number(3.0)),
                select_options: vec![],
                fetched_versions: false,
                conditional: None,
            },
        ],
        volume_requirements: vec![],
        endpoints: vec![AccessEndpointSpec {
            name: "web-ui".to_string(),
            description: "Spark Web UI".to_string(),
            default_access: AccessType::ClusterIpPath,
            default_value: "/spark".to_string(),
            required: true,
            service: "spark-cluster-master-ui",
            port: 8080,
        }],
        chart: HelmChartRef {
            name: "spark-kubernetes-operator".to_string(),
            repo_url: "https://apache.github.io/spark-kubernetes-operator".to_string(),
            version: "1.0.0".to_string(),
        },
        credentials: CredentialsSource::None,
        values_template: render::SPARK_VALUES,
        manifest_templates: &[
            render::SPARK_CLUSTER,
            render::SPARK_STRIP_PREFIX,
            render::SPARK_MASTER_SVC,
        ],
    }
}

pub fn version_source() -> VersionSource {
    VersionSource::Static(vec![
        "3.5.5".to_string(),
        "3.5.1".to_string(),
        "3.4.4".to_string(),
    ])
}

fn worker_bounds(config: &BTreeMap<String, ConfigValue>) -> (i64, i64) {
    let min = config
        .get("min_workers")
        .and_then(ConfigValue::as_f64)
        .unwrap_or(1.0) as i64;
    let max = config
        .get("max_workers")
        .and_then(ConfigValue::as_f64)
        .unwrap_or(3.0) as i64;
    (min, max)
}

pub fn validate_extra(config: &BTreeMap<String, ConfigValue>, issues: &mut Vec<ValidationIssue>) {
    let (min, max) = worker_bounds(config);
    if min < 1 {
        issues.push(ValidationIssue {
            field: "min_workers".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if max < min {
        issues.push(ValidationIssue {
            field: "max_workers".to_string(),
            message: "must be greater than or equal to min_workers".to_string(),
        });
    }
}

pub fn values_context(
    _config: &BTreeMap<String, ConfigValue>,
    ctx: &InstallContext,
) -> ApiResult<serde_json::Value> {
    Ok(json!({ "namespace": ctx.namespace }))
}

/// The SparkCluster custom resource and its ingress plumbing, applied after
/// the operator chart is installed.
pub fn manifest_contexts(
    config: &BTreeMap<String, ConfigValue>,
    ctx: &InstallContext,
) -> ApiResult<Vec<(&'static str, serde_json::Value)>> {
    let web = ctx.endpoints.get("web-ui").ok_or_else(|| {
        ApiError::Validation("spark requires the web-ui endpoint".to_string())
    })?;
    let (min, max) = worker_bounds(config);
    let cluster_name = "spark-cluster";

    let shared = json!({
        "cluster_name": cluster_name,
        "namespace": ctx.namespace,
        "web_ui_path": web.path,
    });

    let mut cluster = shared.clone();
    cluster["spark_version"] = json!(config
        .get("version")
        .and_then(ConfigValue::as_str)
        .unwrap_or("3.5.1"));
    cluster["min_workers"] = json!(min);
    cluster["max_workers"] = json!(max);
    cluster["web_ui_url"] = json!(web.base_url);

    Ok(vec![
        (render::SPARK_CLUSTER, cluster),
        (render::SPARK_STRIP_PREFIX, shared.clone()),
        (render::SPARK_MASTER_SVC, shared),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn worker_bounds_are_ordered() {
        let mut issues = Vec::new();
        validate_extra(
            &config(&[
                ("min_workers", ConfigValue::Number(5.0)),
                ("max_workers", ConfigValue::Number(2.0)),
            ]),
            &mut issues,
        );
        assert!(issues.iter().any(|i| i.field == "max_workers"));

        issues.clear();
        validate_extra(
            &config(&[("min_workers", ConfigValue::Number(0.0))]),
            &mut issues,
        );
        assert!(issues.iter().any(|i| i.field == "min_workers"));
    }
}
