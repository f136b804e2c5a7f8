use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::helm::HelmEngine;
use crate::models::{Cluster, HelmChartRef, LifecycleState, Pool};
use crate::orchestrator::{StepContext, StepError};
use crate::provider::{
    cluster_labels, cluster_selector, provider_for, Provider, ServerInfo, ServerSpec,
    ROLE_CONTROL_PLANE, ROLE_WORKER,
};
use crate::remote::SshExecutor;
use crate::render;
use crate::Services;

/// Worker-pool servers are brought up at most four at a time per pool.
const POOL_CREATE_CONCURRENCY: usize = 4;

const CERT_MANAGER_CHART: (&str, &str, &str) =
    ("cert-manager", "https://charts.jetstack.io", "v1.14.4");

pub async fn create(services: &Arc<Services>, cluster_id: Uuid, cancel: &AtomicBool) {
    if let Err(e) = run_create(services, cluster_id, cancel).await {
        let message = e.message();
        error!(%cluster_id, error = %message, "cluster provisioning failed");
        if let Err(db) = services
            .store
            .set_cluster_status(cluster_id, LifecycleState::Failed, Some(&message))
            .await
        {
            error!(%cluster_id, error = %db, "failed to persist cluster failure");
        }
    }
}

fn ensure_not_cancelled(cancel: &AtomicBool) -> Result<(), StepError> {
    if cancel.load(Ordering::SeqCst) {
        Err(StepError {
            step: "cancelled".to_string(),
            source: anyhow!("cancelled"),
        })
    } else {
        Ok(())
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

async fn run_create(
    services: &Arc<Services>,
    cluster_id: Uuid,
    cancel: &AtomicBool,
) -> Result<(), StepError> {
    let store = &services.store;
    let config = &services.config;

    let cluster = store
        .get_cluster(cluster_id)
        .await
        .step("load cluster")?
        .ok_or_else(|| StepError {
            step: "load cluster".to_string(),
            source: anyhow!("cluster row disappeared"),
        })?;
    let secrets = store
        .get_cluster_secrets(cluster_id)
        .await
        .step("load cluster")?
        .ok_or_else(|| StepError {
            step: "load cluster".to_string(),
            source: anyhow!("cluster row disappeared"),
        })?;

    store
        .set_cluster_status(cluster_id, LifecycleState::Creating, None)
        .await
        .step("load cluster")?;

    let provider = provider_for(&secrets.provider, &secrets.provider_config, config.provider_timeout)
        .step("resolve provider")?;

    let control_plane = cluster
        .pools
        .iter()
        .find(|p| p.control_plane)
        .ok_or_else(|| StepError {
            step: "resolve pools".to_string(),
            source: anyhow!("no control-plane pool"),
        })?;

    let k3s_token = generate_token();
    let ssh = SshExecutor::new(&config.ssh_user, config.ssh_key_path.clone(), config.ssh_timeout);

    // SSH key, private network and firewall are shared by every server in
    // the cluster.
    let public_key = tokio::fs::read_to_string(&config.ssh_public_key_path)
        .await
        .step("create ssh key")?;
    let ssh_key_id = provider
        .ensure_ssh_key(&format!("dip-{}", cluster_id), public_key.trim())
        .await
        .step("create ssh key")?;

    let shared_labels = cluster_labels(cluster_id, ROLE_CONTROL_PLANE, &control_plane.name);
    let network_id = provider
        .ensure_network(&format!("dip-net-{}", cluster_id), &shared_labels)
        .await
        .step("ensure network")?;
    let firewall_id = provider
        .ensure_firewall(&format!("dip-fw-{}", cluster_id), &shared_labels)
        .await
        .step("ensure firewall")?;

    ensure_not_cancelled(cancel)?;

    let user_data = services
        .renderer
        .render(
            render::CLOUD_INIT_CONTROL_PLANE,
            json!({
                "k3s_version": cluster.k3s_version,
                "k3s_token": k3s_token,
                "pool_name": control_plane.name,
            }),
        )
        .step("create server: control-plane")?;

    let control_plane_server = provider
        .create_server(&ServerSpec {
            name: format!("{}-{}-1", cluster.name, control_plane.name),
            server_type: control_plane.node_type.clone(),
            region: control_plane.region.clone(),
            image: String::new(),
            user_data,
            labels: cluster_labels(cluster_id, ROLE_CONTROL_PLANE, &control_plane.name),
            ssh_key_id,
            network_id: Some(network_id),
            firewall_id: Some(firewall_id),
        })
        .await
        .step("create server: control-plane")?;

    let access_ip = control_plane_server.public_ip.clone();
    if access_ip.is_empty() {
        return Err(StepError {
            step: "create server: control-plane".to_string(),
            source: anyhow!("control-plane server has no public address"),
        });
    }

    ensure_not_cancelled(cancel)?;

    ssh.wait_for_cloud_init(&access_ip, config.readiness_timeout)
        .await
        .step("wait for control plane")?;
    ssh.wait_for_k3s_ready(&access_ip, true, config.readiness_timeout)
        .await
        .step("wait for control plane")?;

    let kubeconfig = ssh
        .fetch_kubeconfig(&access_ip)
        .await
        .step("fetch kubeconfig")?;
    let join_token = ssh.read_node_token(&access_ip).await.step("fetch kubeconfig")?;

    ensure_not_cancelled(cancel)?;

    for pool in cluster.pools.iter().filter(|p| !p.control_plane) {
        create_worker_pool(
            services,
            &cluster,
            pool,
            provider.clone(),
            &ssh,
            &access_ip,
            &join_token,
            ssh_key_id,
            network_id,
            firewall_id,
        )
        .await
        .step(&format!("create server: {}", pool.name))?;
        ensure_not_cancelled(cancel)?;
    }

    // Cache the kubeconfig for helm/kubectl before installing anything on
    // the new cluster.
    tokio::fs::create_dir_all(&config.kubeconfig_dir)
        .await
        .step("install csi driver")?;
    let kubeconfig_path = config.kubeconfig_path(cluster_id);
    tokio::fs::write(&kubeconfig_path, &kubeconfig)
        .await
        .step("install csi driver")?;

    let helm = HelmEngine::new(
        &config.helm_bin,
        &config.kubectl_bin,
        &kubeconfig_path,
        config.helm_timeout,
    );

    let hcloud_token = secrets
        .provider_config
        .get("token")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    let csi = services
        .renderer
        .render(render::HCLOUD_CSI, json!({ "hcloud_token": hcloud_token }))
        .step("install csi driver")?;
    helm.apply_manifests(&csi).await.step("install csi driver")?;

    // The read model strips the dashboard password; take the addon config
    // from the raw row instead.
    let addons: crate::models::AdditionalComponents =
        serde_json::from_value(secrets.additional_components.clone()).unwrap_or_default();
    if let Some(dashboard) = addons.traefik_dashboard.as_ref().filter(|d| d.enabled) {
        let username = dashboard.username.as_deref().unwrap_or("admin");
        let password = dashboard
            .password
            .as_deref()
            .ok_or_else(|| StepError {
                step: "install traefik dashboard".to_string(),
                source: anyhow!("dashboard password missing"),
            })?;
        let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .step("install traefik dashboard")?;
        let manifest = services
            .renderer
            .render(
                render::TRAEFIK_DASHBOARD,
                json!({ "basic_auth_users": format!("{}:{}", username, hashed) }),
            )
            .step("install traefik dashboard")?;
        helm.apply_manifests(&manifest)
            .await
            .step("install traefik dashboard")?;
    }

    if let Some(domain) = cluster.domain_name.as_deref() {
        let (name, repo_url, version) = CERT_MANAGER_CHART;
        let chart = HelmChartRef {
            name: name.to_string(),
            repo_url: repo_url.to_string(),
            version: version.to_string(),
        };
        helm.install_or_upgrade("cert-manager", "cert-manager", &chart, "installCRDs: true\n")
            .await
            .step("install cert-manager")?;
        let issuer = services
            .renderer
            .render(
                render::CERT_MANAGER_ISSUER,
                json!({ "acme_email": format!("admin@{}", domain) }),
            )
            .step("install cert-manager")?;
        helm.apply_manifests(&issuer).await.step("install cert-manager")?;
    }

    store
        .mark_cluster_running(cluster_id, &access_ip, &kubeconfig)
        .await
        .step("persist cluster state")?;

    info!(%cluster_id, cluster = %cluster.name, %access_ip, "cluster is running");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_worker_pool(
    services: &Arc<Services>,
    cluster: &Cluster,
    pool: &Pool,
    provider: Arc<dyn Provider>,
    ssh: &SshExecutor,
    master_ip: &str,
    join_token: &str,
    ssh_key_id: i64,
    network_id: i64,
    firewall_id: i64,
) -> anyhow::Result<Vec<ServerInfo>> {
    let count = pool.initial_node_count();
    let user_data = services.renderer.render(
        render::CLOUD_INIT_WORKER,
        json!({
            "k3s_version": cluster.k3s_version,
            "k3s_token": join_token,
            "master_ip": master_ip,
            "pool_name": pool.name,
        }),
    )?;

    info!(cluster = %cluster.name, pool = %pool.name, count, "creating worker pool");

    let readiness_timeout = services.config.readiness_timeout;
    let specs: Vec<ServerSpec> = (1..=count)
        .map(|i| ServerSpec {
            name: format!("{}-{}-{}", cluster.name, pool.name, i),
            server_type: pool.node_type.clone(),
            region: pool.region.clone(),
            image: String::new(),
            user_data: user_data.clone(),
            labels: cluster_labels(cluster.id, ROLE_WORKER, &pool.name),
            ssh_key_id,
            network_id: Some(network_id),
            firewall_id: Some(firewall_id),
        })
        .collect();

    let servers: Vec<ServerInfo> = stream::iter(specs)
        .map(|spec| {
            let provider = provider.clone();
            let ssh = ssh.clone();
            async move {
                let server = provider.create_server(&spec).await?;
                if server.public_ip.is_empty() {
                    bail!("server {} has no public address", server.name);
                }
                ssh.wait_for_cloud_init(&server.public_ip, readiness_timeout).await?;
                ssh.wait_for_k3s_ready(&server.public_ip, false, readiness_timeout).await?;
                Ok::<_, anyhow::Error>(server)
            }
        })
        .buffer_unordered(POOL_CREATE_CONCURRENCY)
        .try_collect()
        .await?;

    Ok(servers)
}

/// Tear the cluster down by provider labels, not stored ids, so resources
/// leaked by a partial create are collected too. Returns true once the row
/// is gone.
pub async fn delete(services: &Arc<Services>, cluster_id: Uuid) -> bool {
    match run_delete(services, cluster_id).await {
        Ok(removed) => removed,
        Err(e) => {
            let message = e.message();
            error!(%cluster_id, error = %message, "cluster teardown failed");
            if let Err(db) = services
                .store
                .set_cluster_status(cluster_id, LifecycleState::Failed, Some(&message))
                .await
            {
                error!(%cluster_id, error = %db, "failed to persist cluster failure");
            }
            false
        }
    }
}

async fn run_delete(services: &Arc<Services>, cluster_id: Uuid) -> Result<bool, StepError> {
    let store = &services.store;
    let config = &services.config;

    let secrets = match store.get_cluster_secrets(cluster_id).await.step("load cluster")? {
        Some(secrets) => secrets,
        // Nothing left to do; an earlier delete already finished.
        None => return Ok(true),
    };

    store
        .set_cluster_status(cluster_id, LifecycleState::Deleting, None)
        .await
        .step("load cluster")?;

    let provider = provider_for(&secrets.provider, &secrets.provider_config, config.provider_timeout)
        .step("resolve provider")?;

    // Addon uninstalls are best effort; the servers are going away anyway.
    let kubeconfig_path = config.kubeconfig_path(cluster_id);
    if kubeconfig_path.exists() {
        let helm = HelmEngine::new(
            &config.helm_bin,
            &config.kubectl_bin,
            &kubeconfig_path,
            config.helm_timeout,
        );
        if let Err(e) = helm.uninstall("cert-manager", "cert-manager").await {
            warn!(%cluster_id, error = %e, "cert-manager uninstall failed, continuing teardown");
        }
    }

    let selector = cluster_selector(cluster_id);

    let mut servers = provider.list_servers(&selector).await.step("delete servers")?;
    // Reverse creation order: provider ids are monotonic.
    servers.sort_by(|a, b| b.id.cmp(&a.id));
    for server in &servers {
        provider.delete_server(server.id).await.step("delete servers")?;
        info!(%cluster_id, server = %server.name, "server removed");
    }

    let volumes = provider.list_volumes(&selector).await.step("delete volumes")?;
    for volume in volumes.iter().filter(|v| !v.retained()) {
        if let Err(e) = provider.detach_volume(volume.id).await {
            warn!(%cluster_id, volume = %volume.name, error = %e, "detach failed before delete");
        }
        provider.delete_volume(volume.id).await.step("delete volumes")?;
    }

    for network_id in provider.list_networks(&selector).await.step("delete network")? {
        provider.delete_network(network_id).await.step("delete network")?;
    }
    for firewall_id in provider.list_firewalls(&selector).await.step("delete firewall")? {
        provider.delete_firewall(firewall_id).await.step("delete firewall")?;
    }

    if let Err(e) = tokio::fs::remove_file(&kubeconfig_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(%cluster_id, error = %e, "failed to drop cached kubeconfig");
        }
    }

    // The row delete cascades to deployments and their volume bindings, so
    // release the in-use counts of referenced volumes first.
    let deployments = store
        .list_deployments(cluster_id)
        .await
        .step("remove cluster row")?;
    for deployment in &deployments {
        for binding in deployment.volumes.iter().filter(|b| b.existing_volume) {
            store
                .adjust_volume_in_use(&binding.volume_name, -1)
                .await
                .step("remove cluster row")?;
        }
    }

    store.delete_cluster_row(cluster_id).await.step("remove cluster row")?;
    info!(%cluster_id, "cluster removed");
    Ok(true)
}
