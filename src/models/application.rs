use serde::{Deserialize, Serialize};

use crate::models::deployment::AccessType;

/// A user-supplied config value. The application's config schema decides
/// which shape is acceptable for each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Truthiness used by conditional visibility: `false` and unset mean
    /// hidden-gating values stay off.
    pub fn is_truthy(&self) -> bool {
        match self {
            ConfigValue::Bool(b) => *b,
            ConfigValue::Number(n) => *n != 0.0,
            ConfigValue::Text(s) => !s.is_empty(),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Number(n) => {
                if n.fract() == 0.0 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOptionType {
    Text,
    Number,
    Select,
    Boolean,
}

/// Visibility predicate: the option is shown (and validated) only when
/// `field` currently holds `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conditional {
    pub field: String,
    pub value: ConfigValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub option_type: ConfigOptionType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<ConfigValue>,
    /// Choices for `select` options. Empty when versions are fetched from
    /// the upstream registry instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_options: Vec<String>,
    /// Marks a select whose choices come from the version feed.
    #[serde(default)]
    pub fetched_versions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Conditional>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequirement {
    pub name: String,
    pub default_size_gb: i32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEndpointSpec {
    pub name: String,
    pub description: String,
    pub default_access: AccessType,
    pub default_value: String,
    pub required: bool,
    /// Backing service the ingress routes to; `{release}` is substituted
    /// with the Helm release name at install time.
    #[serde(skip)]
    pub service: &'static str,
    #[serde(skip)]
    pub port: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmChartRef {
    pub name: String,
    pub repo_url: String,
    pub version: String,
}

/// Where a deployment's first-login credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialsSource {
    /// Hard-wired defaults shipped by the chart.
    Static { username: String, password: String },
    /// Read from a known secret in the deployment namespace.
    Secret {
        secret_name: String,
        username_key: Option<String>,
        password_key: String,
        fallback_username: String,
    },
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationDescriptor {
    pub id: String,
    pub display_name: String,
    pub config_options: Vec<ConfigOption>,
    pub volume_requirements: Vec<VolumeRequirement>,
    pub endpoints: Vec<AccessEndpointSpec>,
    pub chart: HelmChartRef,
    #[serde(skip)]
    pub credentials: CredentialsSource,
    /// Values template name under `templates/`.
    #[serde(skip)]
    pub values_template: &'static str,
    /// Extra manifest templates applied after the chart install.
    #[serde(skip)]
    pub manifest_templates: &'static [&'static str],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_value_untagged_order() {
        let v: ConfigValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ConfigValue::Bool(true));
        let v: ConfigValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, ConfigValue::Number(3.0));
        let v: ConfigValue = serde_json::from_str(r#""CeleryExecutor""#).unwrap();
        assert_eq!(v, ConfigValue::Text("CeleryExecutor".into()));
    }

    #[test]
    fn display_renders_integers_without_fraction() {
        assert_eq!(ConfigValue::Number(3.0).to_string(), "3");
        assert_eq!(ConfigValue::Number(2.5).to_string(), "2.5");
        assert_eq!(ConfigValue::Bool(false).to_string(), "false");
    }
}
