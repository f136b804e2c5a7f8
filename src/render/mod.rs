// Text templating for cloud-init, addon manifests and Helm values. The
// environment is strict: referencing a variable the caller did not supply
// fails the render instead of producing silently broken artifacts.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Error)]
#[error("template error: {0}")]
pub struct RenderError(#[from] minijinja::Error);

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        ApiError::Internal(anyhow::anyhow!(err.to_string()))
    }
}

pub const CLOUD_INIT_CONTROL_PLANE: &str = "cloud-init-control-plane.yml";
pub const CLOUD_INIT_WORKER: &str = "cloud-init-worker.yml";
pub const HCLOUD_CSI: &str = "hcloud-csi.yml";
pub const TRAEFIK_DASHBOARD: &str = "traefik-dashboard.yml";
pub const CERT_MANAGER_ISSUER: &str = "cert-manager-issuer.yml";
pub const AIRFLOW_VALUES: &str = "airflow-values.yml";
pub const GRAFANA_VALUES: &str = "grafana-values.yml";
pub const PREFECT_VALUES: &str = "prefect-values.yml";
pub const SPARK_VALUES: &str = "spark-values.yml";
pub const SPARK_CLUSTER: &str = "spark-cluster.yml";
pub const SPARK_STRIP_PREFIX: &str = "spark-strip-prefix-middleware.yml";
pub const SPARK_MASTER_SVC: &str = "spark-master-svc.yml";

const TEMPLATES: &[(&str, &str)] = &[
    (CLOUD_INIT_CONTROL_PLANE, include_str!("../../templates/cloud-init-control-plane.yml")),
    (CLOUD_INIT_WORKER, include_str!("../../templates/cloud-init-worker.yml")),
    (HCLOUD_CSI, include_str!("../../templates/hcloud-csi.yml")),
    (TRAEFIK_DASHBOARD, include_str!("../../templates/traefik-dashboard.yml")),
    (CERT_MANAGER_ISSUER, include_str!("../../templates/cert-manager-issuer.yml")),
    (AIRFLOW_VALUES, include_str!("../../templates/airflow-values.yml")),
    (GRAFANA_VALUES, include_str!("../../templates/grafana-values.yml")),
    (PREFECT_VALUES, include_str!("../../templates/prefect-values.yml")),
    (SPARK_VALUES, include_str!("../../templates/spark-values.yml")),
    (SPARK_CLUSTER, include_str!("../../templates/spark-cluster.yml")),
    (SPARK_STRIP_PREFIX, include_str!("../../templates/spark-strip-prefix-middleware.yml")),
    (SPARK_MASTER_SVC, include_str!("../../templates/spark-master-svc.yml")),
];

#[derive(Clone)]
pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Renderer { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, RenderError> {
        let template = self.env.get_template(name)?;
        Ok(template.render(ctx)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_plane_cloud_init_substitutes_token_and_version() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(
                CLOUD_INIT_CONTROL_PLANE,
                json!({
                    "k3s_version": "v1.32.3+k3s1",
                    "k3s_token": "secret-token",
                    "pool_name": "control-plane",
                }),
            )
            .unwrap();
        assert!(out.contains("INSTALL_K3S_VERSION=\"v1.32.3+k3s1\""));
        assert!(out.contains("K3S_TOKEN=\"secret-token\""));
        assert!(out.contains("--disable servicelb"));
        assert!(out.contains("pool=control-plane"));
    }

    #[test]
    fn worker_cloud_init_carries_join_url() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(
                CLOUD_INIT_WORKER,
                json!({
                    "k3s_version": "v1.32.3+k3s1",
                    "k3s_token": "secret-token",
                    "master_ip": "203.0.113.7",
                    "pool_name": "workers",
                }),
            )
            .unwrap();
        assert!(out.contains("https://203.0.113.7:6443"));
        assert!(out.contains("pool=workers"));
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let renderer = Renderer::new().unwrap();
        let err = renderer
            .render(CLOUD_INIT_CONTROL_PLANE, json!({"k3s_version": "v1.32.3+k3s1"}))
            .unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }
}
