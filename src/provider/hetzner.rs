use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::retry::RetryBackoff;
use crate::provider::{Provider, ProviderError, ServerInfo, ServerSpec, VolumeInfo};

const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";
const SERVER_IMAGE_FALLBACK: &str = "ubuntu-22.04";
const SERVER_START_POLL: Duration = Duration::from_secs(2);
const SERVER_START_BUDGET: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct HetznerProvider {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HcloudErrorBody {
    error: HcloudError,
}

#[derive(Debug, Deserialize)]
struct HcloudError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct HcloudServer {
    id: i64,
    name: String,
    status: String,
    public_net: HcloudPublicNet,
}

#[derive(Debug, Deserialize)]
struct HcloudPublicNet {
    ipv4: Option<HcloudIpv4>,
}

#[derive(Debug, Deserialize)]
struct HcloudIpv4 {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct HcloudVolume {
    id: i64,
    name: String,
    size: i32,
    #[serde(default)]
    labels: std::collections::BTreeMap<String, String>,
}

impl From<&HcloudServer> for ServerInfo {
    fn from(s: &HcloudServer) -> Self {
        ServerInfo {
            id: s.id,
            name: s.name.clone(),
            public_ip: s
                .public_net
                .ipv4
                .as_ref()
                .map(|v| v.ip.clone())
                .unwrap_or_default(),
            status: s.status.clone(),
        }
    }
}

fn is_uniqueness(err: &ProviderError) -> bool {
    matches!(err, ProviderError::Api { message, .. } if message.starts_with("uniqueness_error"))
}

impl HetznerProvider {
    pub fn new(token: &str, timeout: Duration) -> Self {
        HetznerProvider {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client"),
            token: token.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// One API call with the retry policy: 429 and 5xx responses plus
    /// transport failures are retried with exponential backoff, everything
    /// else surfaces immediately.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = RetryBackoff::new();

        loop {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .query(query);
            if let Some(body) = body {
                req = req.json(body);
            }

            let err = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if status == reqwest::StatusCode::NO_CONTENT {
                            return Ok(Value::Null);
                        }
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| ProviderError::Transport(e.to_string()));
                    }
                    let code = status.as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    match serde_json::from_str::<HcloudErrorBody>(&text) {
                        Ok(parsed) if code == 401 || code == 403 => {
                            return Err(ProviderError::Auth(parsed.error.message));
                        }
                        Ok(parsed) if parsed.error.code == "resource_limit_exceeded" => {
                            return Err(ProviderError::Quota(parsed.error.message));
                        }
                        Ok(parsed) => ProviderError::Api {
                            status: code,
                            message: format!("{}: {}", parsed.error.code, parsed.error.message),
                        },
                        Err(_) => ProviderError::Api {
                            status: code,
                            message: text,
                        },
                    }
                }
                Err(e) => ProviderError::Transport(e.to_string()),
            };

            if !err.is_retriable() {
                return Err(err);
            }
            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(ProviderError::RetriesExhausted(err.to_string())),
            }
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        self.request(reqwest::Method::GET, path, query, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ProviderError> {
        self.request(reqwest::Method::POST, path, &[], Some(&body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        self.request(reqwest::Method::DELETE, path, &[], None).await?;
        Ok(())
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value, field: &str) -> Result<T, ProviderError> {
        let inner = value.get(field).cloned().unwrap_or(Value::Null);
        serde_json::from_value(inner).map_err(|e| ProviderError::Transport(format!(
            "unexpected response shape for '{}': {}",
            field, e
        )))
    }

    async fn find_id_by_name(&self, path: &str, field: &str, name: &str) -> Result<Option<i64>, ProviderError> {
        let value = self.get(path, &[("name", name)]).await?;
        let items: Vec<Value> = Self::parse(value, field)?;
        Ok(items.first().and_then(|v| v.get("id")).and_then(Value::as_i64))
    }

    async fn wait_until_server_running(&self, id: i64) -> Result<HcloudServer, ProviderError> {
        let deadline = tokio::time::Instant::now() + SERVER_START_BUDGET;
        loop {
            let value = self.get(&format!("/servers/{}", id), &[]).await?;
            let server: HcloudServer = Self::parse(value, "server")?;
            if server.status == "running" {
                return Ok(server);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Api {
                    status: 504,
                    message: format!("server {} did not reach 'running' (last: {})", id, server.status),
                });
            }
            tokio::time::sleep(SERVER_START_POLL).await;
        }
    }
}

#[async_trait]
impl Provider for HetznerProvider {
    async fn ensure_ssh_key(&self, name: &str, public_key: &str) -> Result<i64, ProviderError> {
        let body = json!({ "name": name, "public_key": public_key });
        match self.post("/ssh_keys", body).await {
            Ok(value) => {
                let key: Value = Self::parse(value, "ssh_key")?;
                key.get("id").and_then(Value::as_i64).ok_or_else(|| ProviderError::Transport(
                    "ssh_key response missing id".to_string(),
                ))
            }
            // An existing key with the same name is adopted, not an error.
            Err(err) if is_uniqueness(&err) => self
                .find_id_by_name("/ssh_keys", "ssh_keys", name)
                .await?
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    async fn ensure_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<i64, ProviderError> {
        let body = json!({
            "name": name,
            "ip_range": "10.0.0.0/16",
            "subnets": [{
                "type": "cloud",
                "ip_range": "10.0.1.0/24",
                "network_zone": "eu-central",
            }],
            "labels": labels,
        });
        match self.post("/networks", body).await {
            Ok(value) => {
                let network: Value = Self::parse(value, "network")?;
                network.get("id").and_then(Value::as_i64).ok_or_else(|| {
                    ProviderError::Transport("network response missing id".to_string())
                })
            }
            Err(err) if is_uniqueness(&err) => self
                .find_id_by_name("/networks", "networks", name)
                .await?
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    async fn ensure_firewall(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<i64, ProviderError> {
        let body = json!({
            "name": name,
            "labels": labels,
            "rules": [
                {
                    "direction": "in",
                    "protocol": "tcp",
                    "port": "22",
                    "source_ips": ["0.0.0.0/0", "::/0"],
                },
                {
                    "direction": "in",
                    "protocol": "tcp",
                    "port": "6443",
                    "source_ips": ["0.0.0.0/0", "::/0"],
                },
                {
                    "direction": "in",
                    "protocol": "tcp",
                    "port": "80",
                    "source_ips": ["0.0.0.0/0", "::/0"],
                },
                {
                    "direction": "in",
                    "protocol": "tcp",
                    "port": "443",
                    "source_ips": ["0.0.0.0/0", "::/0"],
                },
            ],
        });
        match self.post("/firewalls", body).await {
            Ok(value) => {
                let firewall: Value = Self::parse(value, "firewall")?;
                firewall.get("id").and_then(Value::as_i64).ok_or_else(|| {
                    ProviderError::Transport("firewall response missing id".to_string())
                })
            }
            Err(err) if is_uniqueness(&err) => self
                .find_id_by_name("/firewalls", "firewalls", name)
                .await?
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerInfo, ProviderError> {
        let mut body = json!({
            "name": spec.name,
            "server_type": spec.server_type,
            "location": spec.region,
            "image": if spec.image.is_empty() { SERVER_IMAGE_FALLBACK } else { &spec.image },
            "start_after_create": true,
            "user_data": spec.user_data,
            "labels": spec.labels,
            "ssh_keys": [spec.ssh_key_id],
        });
        if let Some(network_id) = spec.network_id {
            body["networks"] = json!([network_id]);
        }
        if let Some(firewall_id) = spec.firewall_id {
            body["firewalls"] = json!([{ "firewall": firewall_id }]);
        }

        let server = match self.post("/servers", body).await {
            Ok(value) => Self::parse::<HcloudServer>(value, "server")?,
            // A server with this name already exists from an earlier partial
            // run; adopt it.
            Err(err) if is_uniqueness(&err) => {
                let value = self.get("/servers", &[("name", &spec.name)]).await?;
                let servers: Vec<HcloudServer> = Self::parse(value, "servers")?;
                servers.into_iter().next().ok_or(err)?
            }
            Err(err) => return Err(err),
        };

        let running = self.wait_until_server_running(server.id).await?;
        Ok(ServerInfo::from(&running))
    }

    async fn delete_server(&self, id: i64) -> Result<(), ProviderError> {
        self.delete(&format!("/servers/{}", id)).await
    }

    async fn server_status(&self, id: i64) -> Result<String, ProviderError> {
        let value = self.get(&format!("/servers/{}", id), &[]).await?;
        let server: HcloudServer = Self::parse(value, "server")?;
        Ok(server.status)
    }

    async fn list_servers(&self, label_selector: &str) -> Result<Vec<ServerInfo>, ProviderError> {
        let value = self
            .get("/servers", &[("label_selector", label_selector)])
            .await?;
        let servers: Vec<HcloudServer> = Self::parse(value, "servers")?;
        Ok(servers.iter().map(ServerInfo::from).collect())
    }

    async fn create_volume(
        &self,
        name: &str,
        size_gb: i32,
        region: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<VolumeInfo, ProviderError> {
        let body = json!({
            "name": name,
            "size": size_gb,
            "location": region,
            "format": "ext4",
            "labels": labels,
        });
        let volume = match self.post("/volumes", body).await {
            Ok(value) => Self::parse::<HcloudVolume>(value, "volume")?,
            Err(err) if is_uniqueness(&err) => {
                let value = self.get("/volumes", &[("name", name)]).await?;
                let volumes: Vec<HcloudVolume> = Self::parse(value, "volumes")?;
                volumes.into_iter().next().ok_or(err)?
            }
            Err(err) => return Err(err),
        };
        Ok(VolumeInfo {
            id: volume.id,
            name: volume.name,
            size_gb: volume.size,
            labels: volume.labels,
        })
    }

    async fn delete_volume(&self, id: i64) -> Result<(), ProviderError> {
        self.delete(&format!("/volumes/{}", id)).await
    }

    async fn attach_volume(&self, volume_id: i64, server_id: i64) -> Result<(), ProviderError> {
        self.post(
            &format!("/volumes/{}/actions/attach", volume_id),
            json!({ "server": server_id, "automount": false }),
        )
        .await?;
        Ok(())
    }

    async fn detach_volume(&self, volume_id: i64) -> Result<(), ProviderError> {
        self.post(&format!("/volumes/{}/actions/detach", volume_id), json!({}))
            .await?;
        Ok(())
    }

    async fn list_volumes(&self, label_selector: &str) -> Result<Vec<VolumeInfo>, ProviderError> {
        let value = self
            .get("/volumes", &[("label_selector", label_selector)])
            .await?;
        let volumes: Vec<HcloudVolume> = Self::parse(value, "volumes")?;
        Ok(volumes
            .into_iter()
            .map(|v| VolumeInfo {
                id: v.id,
                name: v.name,
                size_gb: v.size,
                labels: v.labels,
            })
            .collect())
    }

    async fn list_networks(&self, label_selector: &str) -> Result<Vec<i64>, ProviderError> {
        let value = self
            .get("/networks", &[("label_selector", label_selector)])
            .await?;
        let items: Vec<Value> = Self::parse(value, "networks")?;
        Ok(items.iter().filter_map(|v| v.get("id").and_then(Value::as_i64)).collect())
    }

    async fn delete_network(&self, id: i64) -> Result<(), ProviderError> {
        self.delete(&format!("/networks/{}", id)).await
    }

    async fn list_firewalls(&self, label_selector: &str) -> Result<Vec<i64>, ProviderError> {
        let value = self
            .get("/firewalls", &[("label_selector", label_selector)])
            .await?;
        let items: Vec<Value> = Self::parse(value, "firewalls")?;
        Ok(items.iter().filter_map(|v| v.get("id").and_then(Value::as_i64)).collect())
    }

    async fn delete_firewall(&self, id: i64) -> Result<(), ProviderError> {
        self.delete(&format!("/firewalls/{}", id)).await
    }
}
