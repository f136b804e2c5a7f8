use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;

use crate::catalog::{InstallContext, VersionSource};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AccessEndpointSpec, AccessType, ApplicationDescriptor, ConfigOption, ConfigOptionType,
    ConfigValue, CredentialsSource, HelmChartRef,
};
use crate::render;

pub const PREFECT_CREDENTIALS_SECRET: &str = "prefect-creds";

pub fn descriptor() -> ApplicationDescriptor {
    ApplicationDescriptor {
        id: "prefect".to_string(),
        display_name: "Prefect".to_string(),
        config_options: vec![ConfigOption {
            id: "version".to_string(),
            label: "Prefect version".to_string(),
            option_type: ConfigOptionType::Select,
            required: true,
            default: Some(ConfigValue::Text("3.4.8".to_string())),
            select_options: vec!["3.4.8".to_string(), "3.3.5".to_string()],
            fetched_versions: false,
            conditional: None,
        }],
        volume_requirements: vec![],
        endpoints: vec![AccessEndpointSpec {
            name: "web-ui".to_string(),
            description: "Prefect Web UI".to_string(),
            default_access: AccessType::ClusterIpPath,
            default_value: "/prefect".to_string(),
            required: true,
            service: "prefect-server",
            port: 4200,
        }],
        chart: HelmChartRef {
            name: "prefect-server".to_string(),
            repo_url: "https://prefecthq.github.io/prefect-helm".to_string(),
            version: "2025.7.10174756".to_string(),
        },
        credentials: CredentialsSource::Secret {
            secret_name: PREFECT_CREDENTIALS_SECRET.to_string(),
            username_key: None,
            password_key: "auth-string".to_string(),
            fallback_username: "admin".to_string(),
        },
        values_template: render::PREFECT_VALUES,
        manifest_templates: &[],
    }
}

pub fn version_source() -> VersionSource {
    VersionSource::Static(vec!["3.4.8".to_string(), "3.3.5".to_string()])
}

/// Basic-auth credentials materialized into the namespace before install;
/// the chart points at the secret instead of carrying the password.
pub fn credentials_secret_data() -> BTreeMap<String, String> {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    BTreeMap::from([("auth-string".to_string(), format!("admin:{}", password))])
}

pub fn values_context(
    _config: &BTreeMap<String, ConfigValue>,
    ctx: &InstallContext,
) -> ApiResult<serde_json::Value> {
    let web = ctx.endpoints.get("web-ui").ok_or_else(|| {
        ApiError::Validation("prefect requires the web-ui endpoint".to_string())
    })?;

    Ok(json!({
        "api_base_path": format!("{}/api", web.path.trim_end_matches('/')),
        "ui_api_url": format!("{}/api", web.path.trim_end_matches('/')),
        "credentials_secret": PREFECT_CREDENTIALS_SECRET,
        "entrypoint": web.entrypoint,
        "host": web.host.clone().unwrap_or_default(),
        "path": web.path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_secret_holds_admin_auth_string() {
        let data = credentials_secret_data();
        let auth = data.get("auth-string").unwrap();
        assert!(auth.starts_with("admin:"));
        assert!(auth.len() > "admin:".len());
    }
}
