// Typed gateway to a target cluster's API server, authenticated with the
// kubeconfig captured at bootstrap. `ensure_*` operations are idempotent:
// they server-side-apply the desired object.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use serde_json::json;
use thiserror::Error;

use crate::error::ApiError;

pub const HCLOUD_STORAGE_CLASS: &str = "hcloud-volumes";
const FIELD_MANAGER: &str = "datainfrapilot";

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("kubeconfig rejected: {0}")]
    Config(String),

    #[error("api server error: {0}")]
    Api(String),
}

impl From<kube::Error> for KubeError {
    fn from(err: kube::Error) -> Self {
        KubeError::Api(err.to_string())
    }
}

impl From<KubeError> for ApiError {
    fn from(err: KubeError) -> Self {
        ApiError::Kube(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct IngressRoute {
    pub name: String,
    pub namespace: String,
    pub host: Option<String>,
    pub path: String,
    pub service: String,
    pub port: i32,
    pub annotations: BTreeMap<String, String>,
    pub tls_secret: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PodReadiness {
    pub ready: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub async fn from_kubeconfig_yaml(yaml: &str) -> Result<Self, KubeError> {
        let kubeconfig =
            Kubeconfig::from_yaml(yaml).map_err(|e| KubeError::Config(e.to_string()))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| KubeError::Config(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| KubeError::Config(e.to_string()))?;
        Ok(KubeGateway { client })
    }

    pub async fn ensure_namespace(&self, name: &str) -> Result<(), KubeError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<(), KubeError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        secret_type: Option<&str>,
    ) -> Result<(), KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            string_data: Some(data),
            type_: secret_type.map(str::to_string),
            ..Default::default()
        };
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await?;
        Ok(())
    }

    /// Pull secret for a user-supplied registry, in the dockerconfigjson
    /// shape the kubelet expects.
    pub async fn upsert_registry_secret(
        &self,
        namespace: &str,
        name: &str,
        registry: &str,
        username: &str,
        password: &str,
    ) -> Result<(), KubeError> {
        let auth = BASE64.encode(format!("{}:{}", username, password));
        let dockerconfig = json!({
            "auths": { registry: { "username": username, "password": password, "auth": auth } }
        });
        self.upsert_secret(
            namespace,
            name,
            BTreeMap::from([(".dockerconfigjson".to_string(), dockerconfig.to_string())]),
            Some("kubernetes.io/dockerconfigjson"),
        )
        .await
    }

    pub async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await?
            .ok_or_else(|| KubeError::Api(format!("secret {}/{} not found", namespace, name)))?;

        let mut decoded = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            let text = String::from_utf8(value.0)
                .map_err(|_| KubeError::Api(format!("secret key {} is not utf-8", key)))?;
            decoded.insert(key, text);
        }
        Ok(decoded)
    }

    pub async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn ensure_ingress(&self, route: &IngressRoute) -> Result<(), KubeError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &route.namespace);

        let path = HTTPIngressPath {
            path: Some(route.path.clone()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: route.service.clone(),
                    port: Some(ServiceBackendPort {
                        number: Some(route.port),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
        };

        let tls = route.tls_secret.as_ref().map(|secret| {
            vec![IngressTLS {
                hosts: route.host.as_ref().map(|h| vec![h.clone()]),
                secret_name: Some(secret.clone()),
            }]
        });

        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some(route.name.clone()),
                namespace: Some(route.namespace.clone()),
                annotations: Some(route.annotations.clone()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some("traefik".to_string()),
                rules: Some(vec![IngressRule {
                    host: route.host.clone(),
                    http: Some(HTTPIngressRuleValue { paths: vec![path] }),
                }]),
                tls,
                ..Default::default()
            }),
            ..Default::default()
        };

        api.patch(
            &route.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&ingress),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_pvc(
        &self,
        namespace: &str,
        name: &str,
        size_gb: i32,
        storage_class: &str,
    ) -> Result<(), KubeError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }

        let pvc: PersistentVolumeClaim = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": { "name": name, "namespace": namespace },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "storageClassName": storage_class,
                "resources": { "requests": { "storage": Quantity(format!("{}Gi", size_gb)) } }
            }
        }))
        .map_err(|e| KubeError::Api(format!("pvc construction: {}", e)))?;

        api.create(&PostParams::default(), &pvc).await?;
        Ok(())
    }

    pub async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ready/total pod counts for a label selector, e.g. a Helm release.
    pub async fn pod_readiness(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<PodReadiness, KubeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await?;

        let total = pods.items.len();
        let ready = pods
            .items
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .map(|conds| {
                        conds
                            .iter()
                            .any(|c| c.type_ == "Ready" && c.status == "True")
                    })
                    .unwrap_or(false)
            })
            .count();

        Ok(PodReadiness { ready, total })
    }
}
