use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{self, InstallContext};
use crate::error::{ApiError, ApiResult};
use crate::helm::HelmEngine;
use crate::kube::{IngressRoute, KubeGateway, HCLOUD_STORAGE_CLASS};
use crate::models::{
    AccessType, ApplicationDescriptor, Cluster, ConfigValue, CredentialsResponse, Deployment,
    EndpointConfig, LifecycleState, normalize_endpoint_value,
};
use crate::orchestrator::{StepContext, StepError};
use crate::provider::{provider_for, ROLE_CONTROL_PLANE};
use crate::store::Store;
use crate::Services;

/// Helm release names are immutable; they are derived from the deployment id
/// rather than the user-facing name, which can be renamed.
pub fn release_name(application: &str, deployment_id: Uuid) -> String {
    let id = deployment_id.simple().to_string();
    format!("{}-{}", application, &id[..8])
}

/// Cluster-wide endpoint uniqueness over normalized `(access_type, value)`.
pub async fn endpoint_taken(
    store: &Store,
    cluster_id: Uuid,
    access_type: AccessType,
    value: &str,
    exclude_deployment: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let normalized = normalize_endpoint_value(access_type, value);
    let existing = store.cluster_endpoints(cluster_id).await?;

    Ok(existing.iter().any(|ep| {
        if exclude_deployment == Some(ep.deployment_id) {
            return false;
        }
        match AccessType::parse(&ep.access_type) {
            Some(ty) if ty == access_type => {
                normalize_endpoint_value(ty, &ep.value) == normalized
            }
            _ => false,
        }
    }))
}

pub async fn install(
    services: &Arc<Services>,
    cluster_id: Uuid,
    deployment_id: Uuid,
    is_update: bool,
) {
    if let Err(e) = run_install(services, cluster_id, deployment_id, is_update).await {
        let message = e.message();
        error!(%deployment_id, error = %message, "deployment install failed");
        if let Err(db) = services
            .store
            .set_deployment_status(deployment_id, LifecycleState::Failed, Some(&message))
            .await
        {
            error!(%deployment_id, error = %db, "failed to persist deployment failure");
        }
    }
}

async fn load_gateway(services: &Services, cluster_id: Uuid) -> anyhow::Result<(KubeGateway, HelmEngine)> {
    let secrets = services
        .store
        .get_cluster_secrets(cluster_id)
        .await?
        .ok_or_else(|| anyhow!("cluster row disappeared"))?;
    let kubeconfig = secrets
        .kubeconfig
        .ok_or_else(|| anyhow!("cluster has no kubeconfig yet"))?;

    let gateway = KubeGateway::from_kubeconfig_yaml(&kubeconfig).await?;

    // helm and kubectl read the kubeconfig from disk; refresh the cached
    // copy in case the process restarted since the cluster was created.
    tokio::fs::create_dir_all(&services.config.kubeconfig_dir).await?;
    let path = services.config.kubeconfig_path(cluster_id);
    tokio::fs::write(&path, &kubeconfig).await?;
    let helm = HelmEngine::new(
        &services.config.helm_bin,
        &services.config.kubectl_bin,
        &path,
        services.config.helm_timeout,
    );

    Ok((gateway, helm))
}

fn build_install_context(
    cluster: &Cluster,
    deployment: &Deployment,
    app: &ApplicationDescriptor,
) -> ApiResult<InstallContext> {
    let access_ip = cluster.access_ip.clone().unwrap_or_default();

    let mut endpoints = BTreeMap::new();
    for ep in active_endpoints(deployment, app) {
        let resolved = catalog::resolve_endpoint(
            ep,
            cluster.domain_name.as_deref(),
            &access_ip,
            &deployment.namespace,
        )?;
        endpoints.insert(ep.name.clone(), resolved);
    }

    let volume_pvcs = deployment
        .volumes
        .iter()
        .map(|v| (v.volume_name.clone(), v.pvc_name.clone()))
        .collect();

    let custom_image = deployment
        .config
        .get("custom_image_enabled")
        .and_then(ConfigValue::as_bool)
        .unwrap_or(false);
    let has_registry_auth = deployment
        .config
        .get("registry_username")
        .and_then(ConfigValue::as_str)
        .is_some();

    Ok(InstallContext {
        namespace: deployment.namespace.clone(),
        access_ip,
        node_pool: deployment.pool_name.clone(),
        endpoints,
        volume_pvcs,
        pull_secret: (custom_image && has_registry_auth)
            .then(|| catalog::REGISTRY_PULL_SECRET.to_string()),
    })
}

/// Enabled endpoints minus the ones the application policy hides (the
/// Flower UI without a Celery executor).
fn active_endpoints<'a>(
    deployment: &'a Deployment,
    app: &ApplicationDescriptor,
) -> impl Iterator<Item = &'a EndpointConfig> {
    let flower_hidden = app.id == "airflow" && !catalog::flower_active(&deployment.config);
    deployment
        .endpoints
        .iter()
        .filter(move |ep| ep.enabled && !(flower_hidden && ep.name == "flower-ui"))
}

async fn run_install(
    services: &Arc<Services>,
    cluster_id: Uuid,
    deployment_id: Uuid,
    is_update: bool,
) -> Result<(), StepError> {
    let store = &services.store;

    let cluster = store
        .get_cluster(cluster_id)
        .await
        .step("load deployment")?
        .ok_or_else(|| StepError {
            step: "load deployment".to_string(),
            source: anyhow!("cluster row disappeared"),
        })?;
    let deployment = store
        .get_deployment(deployment_id)
        .await
        .step("load deployment")?
        .ok_or_else(|| StepError {
            step: "load deployment".to_string(),
            source: anyhow!("deployment row disappeared"),
        })?;

    if cluster.status != LifecycleState::Running {
        return Err(StepError {
            step: "load deployment".to_string(),
            source: anyhow!("cluster is not running"),
        });
    }

    let phase = if is_update {
        LifecycleState::Updating
    } else {
        LifecycleState::Deploying
    };
    store
        .set_deployment_status(deployment_id, phase, None)
        .await
        .step("load deployment")?;

    let app = services
        .catalog
        .get(&deployment.application)
        .step("resolve application")?
        .clone();

    let (gateway, helm) = load_gateway(services, cluster_id)
        .await
        .step("connect to cluster")?;

    gateway
        .ensure_namespace(&deployment.namespace)
        .await
        .step("ensure namespace")?;

    bind_volumes(services, &cluster, &deployment, &gateway)
        .await
        .step("bind volumes")?;

    materialize_secrets(services, &deployment, &app, &gateway, is_update)
        .await
        .step("materialize secrets")?;

    let ctx = build_install_context(&cluster, &deployment, &app).step("render values")?;
    let values_ctx = services
        .catalog
        .build_values_context(&app, &deployment.config, &ctx)
        .step("render values")?;
    let values = services
        .renderer
        .render(app.values_template, values_ctx)
        .step("render values")?;

    let release = release_name(&app.id, deployment_id);
    if let Err(e) = helm
        .install_or_upgrade(&release, &deployment.namespace, &app.chart, &values)
        .await
    {
        // A timed-out wait on an upgrade is a partial failure: the release
        // and its resources stay in place for the next attempt.
        let step = if is_update && e.is_wait_timeout() {
            "helm upgrade timed out, release left in place"
        } else if is_update {
            "helm upgrade"
        } else {
            "helm install"
        };
        return Err(StepError {
            step: step.to_string(),
            source: anyhow!("{}", e),
        });
    }

    for (template, manifest_ctx) in services
        .catalog
        .build_manifest_contexts(&app, &deployment.config, &ctx)
        .step("apply manifests")?
    {
        let manifest = services
            .renderer
            .render(template, manifest_ctx)
            .step("apply manifests")?;
        helm.apply_manifests(&manifest).await.step("apply manifests")?;
    }

    for resolved in ctx.endpoints.values() {
        let spec = app
            .endpoints
            .iter()
            .find(|s| s.name == resolved.name)
            .ok_or_else(|| StepError {
                step: "ensure ingress".to_string(),
                source: anyhow!("endpoint '{}' is not part of the application", resolved.name),
            })?;

        let mut annotations = BTreeMap::from([
            (
                "traefik.ingress.kubernetes.io/router.entrypoints".to_string(),
                resolved.entrypoint.to_string(),
            ),
            (
                "traefik.ingress.kubernetes.io/router.priority".to_string(),
                "10".to_string(),
            ),
        ]);
        if resolved.tls_secret.is_some() {
            annotations.insert(
                "cert-manager.io/cluster-issuer".to_string(),
                "acme-prod".to_string(),
            );
        }
        if app.id == "spark" {
            // Spark's UI does not serve from a subpath; the rendered
            // middleware strips it before the request reaches the master.
            annotations.insert(
                "traefik.ingress.kubernetes.io/router.middlewares".to_string(),
                format!("{}-spark-cluster-strip-prefix@kubernetescrd", deployment.namespace),
            );
        }

        gateway
            .ensure_ingress(&IngressRoute {
                name: format!("{}-{}", release, resolved.name),
                namespace: deployment.namespace.clone(),
                host: resolved.host.clone(),
                path: resolved.path.clone(),
                service: spec.service.replace("{release}", &release),
                port: spec.port,
                annotations,
                tls_secret: resolved.tls_secret.clone(),
            })
            .await
            .step("ensure ingress")?;
    }

    store
        .mark_deployment_running(deployment_id)
        .await
        .step("persist deployment state")?;

    match gateway
        .pod_readiness(
            &deployment.namespace,
            &format!("app.kubernetes.io/instance={}", release),
        )
        .await
    {
        Ok(pods) => info!(%deployment_id, release, ready = pods.ready, total = pods.total, "deployment is running"),
        Err(e) => info!(%deployment_id, release, error = %e, "deployment is running (readiness summary unavailable)"),
    }
    Ok(())
}

/// Existing volumes are attached on the provider side and marked in-use;
/// fresh requirements become PVCs against the default storage class.
async fn bind_volumes(
    services: &Arc<Services>,
    cluster: &Cluster,
    deployment: &Deployment,
    gateway: &KubeGateway,
) -> anyhow::Result<()> {
    for binding in &deployment.volumes {
        if binding.existing_volume {
            let volume = services
                .store
                .get_volume_by_name(&binding.volume_name)
                .await?
                .ok_or_else(|| anyhow!("volume '{}' does not exist", binding.volume_name))?;
            let provider_id: i64 = volume
                .provider_id
                .as_deref()
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| anyhow!("volume '{}' has no provider id", binding.volume_name))?;

            let secrets = services
                .store
                .get_cluster_secrets(cluster.id)
                .await?
                .ok_or_else(|| anyhow!("cluster row disappeared"))?;
            let provider = provider_for(
                &secrets.provider,
                &secrets.provider_config,
                services.config.provider_timeout,
            )
            .map_err(|e| anyhow!(e.to_string()))?;

            let selector = format!("{}={},{}={}", crate::provider::LABEL_CLUSTER, cluster.id, crate::provider::LABEL_ROLE, ROLE_CONTROL_PLANE);
            let servers = provider.list_servers(&selector).await?;
            let target = servers
                .first()
                .ok_or_else(|| anyhow!("no control-plane server to attach volume to"))?;
            let status = provider.server_status(target.id).await?;
            if status != "running" {
                return Err(anyhow!(
                    "control-plane server {} is '{}', cannot attach volume",
                    target.name,
                    status
                ));
            }
            if let Err(e) = provider.attach_volume(provider_id, target.id).await {
                // Already-attached volumes come back as a conflict; treat
                // attachment as idempotent.
                warn!(volume = %binding.volume_name, error = %e, "volume attach reported an error");
            }
        } else {
            gateway
                .create_pvc(
                    &deployment.namespace,
                    &binding.pvc_name,
                    binding.size_gb,
                    HCLOUD_STORAGE_CLASS,
                )
                .await?;
        }
    }
    Ok(())
}

async fn materialize_secrets(
    services: &Arc<Services>,
    deployment: &Deployment,
    app: &ApplicationDescriptor,
    gateway: &KubeGateway,
    is_update: bool,
) -> anyhow::Result<()> {
    let config = &deployment.config;

    if app.id == "airflow" {
        let private = config
            .get("dags_repository_private")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false);
        if private {
            let key = config
                .get("dags_repository_ssh_private_key")
                .and_then(ConfigValue::as_str)
                .ok_or_else(|| anyhow!("private DAG repository needs an ssh key"))?;
            gateway
                .upsert_secret(
                    &deployment.namespace,
                    catalog::AIRFLOW_SSH_SECRET,
                    BTreeMap::from([("gitSshKey".to_string(), key.to_string())]),
                    None,
                )
                .await?;
        }

        let custom_image = config
            .get("custom_image_enabled")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false);
        if custom_image {
            if let (Some(username), Some(password)) = (
                config.get("registry_username").and_then(ConfigValue::as_str),
                config.get("registry_password").and_then(ConfigValue::as_str),
            ) {
                let registry = config
                    .get("registry_url")
                    .and_then(ConfigValue::as_str)
                    .ok_or_else(|| anyhow!("custom image needs a registry url"))?;
                let registry_host = registry
                    .split('/')
                    .next()
                    .unwrap_or(registry);
                gateway
                    .upsert_registry_secret(
                        &deployment.namespace,
                        catalog::REGISTRY_PULL_SECRET,
                        registry_host,
                        username,
                        password,
                    )
                    .await?;
            }
        }
    }

    if app.id == "prefect" && !is_update {
        gateway
            .upsert_secret(
                &deployment.namespace,
                catalog::PREFECT_CREDENTIALS_SECRET,
                catalog::prefect_credentials_secret_data(),
                None,
            )
            .await?;
    }

    Ok(())
}

pub async fn remove(services: &Arc<Services>, cluster_id: Uuid, deployment_id: Uuid) {
    if let Err(e) = run_remove(services, cluster_id, deployment_id).await {
        let message = e.message();
        error!(%deployment_id, error = %message, "deployment removal failed");
        if let Err(db) = services
            .store
            .set_deployment_status(deployment_id, LifecycleState::Failed, Some(&message))
            .await
        {
            error!(%deployment_id, error = %db, "failed to persist deployment failure");
        }
    }
}

async fn run_remove(
    services: &Arc<Services>,
    cluster_id: Uuid,
    deployment_id: Uuid,
) -> Result<(), StepError> {
    let store = &services.store;

    let deployment = match store.get_deployment(deployment_id).await.step("load deployment")? {
        Some(deployment) => deployment,
        None => return Ok(()),
    };

    store
        .set_deployment_status(deployment_id, LifecycleState::Deleting, None)
        .await
        .step("load deployment")?;

    let app = services
        .catalog
        .get(&deployment.application)
        .step("resolve application")?
        .clone();
    let (gateway, helm) = load_gateway(services, cluster_id)
        .await
        .step("connect to cluster")?;

    let release = release_name(&app.id, deployment_id);
    helm.uninstall(&release, &deployment.namespace)
        .await
        .step("helm uninstall")?;

    for ep in deployment.endpoints.iter().filter(|ep| ep.enabled) {
        gateway
            .delete_ingress(&deployment.namespace, &format!("{}-{}", release, ep.name))
            .await
            .step("delete ingress")?;
    }

    for binding in &deployment.volumes {
        if binding.existing_volume {
            // User-owned volumes are detached, never deleted.
            if let Some(volume) = store
                .get_volume_by_name(&binding.volume_name)
                .await
                .step("release volumes")?
            {
                if let Some(provider_id) = volume.provider_id.as_deref().and_then(|id| id.parse::<i64>().ok()) {
                    if let Ok(Some(secrets)) = store.get_cluster_secrets(cluster_id).await {
                        if let Ok(provider) = provider_for(
                            &secrets.provider,
                            &secrets.provider_config,
                            services.config.provider_timeout,
                        ) {
                            if let Err(e) = provider.detach_volume(provider_id).await {
                                warn!(volume = %binding.volume_name, error = %e, "volume detach failed");
                            }
                        }
                    }
                }
            }
        } else {
            gateway
                .delete_pvc(&deployment.namespace, &binding.pvc_name)
                .await
                .step("release volumes")?;
        }
    }

    // Secrets this deployment materialized go before the namespace so a
    // wedged namespace deletion cannot leave credentials behind.
    for secret in [
        catalog::AIRFLOW_SSH_SECRET,
        catalog::REGISTRY_PULL_SECRET,
        catalog::PREFECT_CREDENTIALS_SECRET,
    ] {
        gateway
            .delete_secret(&deployment.namespace, secret)
            .await
            .step("delete secrets")?;
    }

    gateway
        .delete_namespace(&deployment.namespace)
        .await
        .step("delete namespace")?;

    for binding in deployment.volumes.iter().filter(|b| b.existing_volume) {
        store
            .adjust_volume_in_use(&binding.volume_name, -1)
            .await
            .step("remove deployment row")?;
    }
    store
        .delete_deployment_row(deployment_id)
        .await
        .step("remove deployment row")?;

    info!(%deployment_id, "deployment removed");
    Ok(())
}

/// First-login credentials for a running deployment, read from the
/// application's known secret. This is a read path and does not go through
/// the cluster worker.
pub async fn read_credentials(
    services: &Services,
    cluster: &Cluster,
    deployment: &Deployment,
) -> ApiResult<CredentialsResponse> {
    let app = services.catalog.get(&deployment.application)?;

    match &app.credentials {
        crate::models::CredentialsSource::Static { username, password } => Ok(CredentialsResponse {
            username: username.clone(),
            password: password.clone(),
        }),
        crate::models::CredentialsSource::None => Err(ApiError::NotFound(
            format!("credentials for '{}'", app.id),
        )),
        crate::models::CredentialsSource::Secret {
            secret_name,
            username_key,
            password_key,
            fallback_username,
        } => {
            let secrets = services
                .store
                .get_cluster_secrets(cluster.id)
                .await?
                .ok_or_else(|| ApiError::NotFound("cluster".to_string()))?;
            let kubeconfig = secrets
                .kubeconfig
                .ok_or_else(|| ApiError::Conflict("cluster is not running".to_string()))?;
            let gateway = KubeGateway::from_kubeconfig_yaml(&kubeconfig).await?;

            let data = gateway.read_secret(&deployment.namespace, secret_name).await?;
            let raw_password = data.get(password_key).cloned().ok_or_else(|| {
                ApiError::Kube(format!("secret {} has no key {}", secret_name, password_key))
            })?;

            match username_key {
                Some(key) => Ok(CredentialsResponse {
                    username: data
                        .get(key)
                        .cloned()
                        .unwrap_or_else(|| fallback_username.clone()),
                    password: raw_password,
                }),
                // Combined `user:password` strings, e.g. basic-auth secrets.
                None => match raw_password.split_once(':') {
                    Some((user, pass)) => Ok(CredentialsResponse {
                        username: user.to_string(),
                        password: pass.to_string(),
                    }),
                    None => Ok(CredentialsResponse {
                        username: fallback_username.clone(),
                        password: raw_password,
                    }),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_name_is_stable_and_short() {
        let id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert_eq!(release_name("grafana", id), "grafana-6ba7b810");
        assert_eq!(release_name("grafana", id), release_name("grafana", id));
    }
}
