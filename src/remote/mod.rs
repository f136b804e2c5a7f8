// SSH-driven node bootstrap. The k3s install itself happens through
// cloud-init; this layer waits for it, reads the join token and pulls the
// kubeconfig off the control plane.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

const READINESS_POLL: Duration = Duration::from_secs(5);
const NODE_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

#[derive(Clone)]
pub struct SshExecutor {
    user: String,
    key_path: PathBuf,
    command_timeout: Duration,
}

impl SshExecutor {
    pub fn new(user: &str, key_path: PathBuf, command_timeout: Duration) -> Self {
        SshExecutor {
            user: user.to_string(),
            key_path,
            command_timeout,
        }
    }

    /// Run one command on the host and return stdout. Non-zero exit maps to
    /// an error carrying stderr.
    pub async fn run(&self, host: &str, command: &str) -> Result<String> {
        debug!(host, command, "ssh exec");

        let child = Command::new("ssh")
            .arg("-i")
            .arg(&self.key_path)
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "BatchMode=yes",
            ])
            .arg(format!("{}@{}", self.user, host))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ssh")?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("ssh command timed out after {:?}: {}", self.command_timeout, command))?
            .context("ssh did not produce output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ssh command failed ({}): {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Block until cloud-init reports completion on the host.
    pub async fn wait_for_cloud_init(&self, host: &str, budget: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            match self
                .run(host, "test -f /var/lib/cloud/instance/boot-finished && echo done")
                .await
            {
                Ok(out) if out.trim() == "done" => return Ok(()),
                Ok(_) => debug!(host, "cloud-init still running"),
                Err(e) => debug!(host, error = %e, "ssh not reachable yet"),
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("cloud-init did not finish on {} within {:?}", host, budget);
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    }

    /// Readiness probe for a bootstrapped node: the k3s unit must be active
    /// and (on servers) the kubeconfig present.
    pub async fn wait_for_k3s_ready(
        &self,
        host: &str,
        control_plane: bool,
        budget: Duration,
    ) -> Result<()> {
        let unit = if control_plane { "k3s" } else { "k3s-agent" };
        let check = if control_plane {
            format!(
                "systemctl is-active {} && test -f {} && echo ready",
                unit, KUBECONFIG_PATH
            )
        } else {
            format!("systemctl is-active {} && echo ready", unit)
        };

        let deadline = tokio::time::Instant::now() + budget;
        loop {
            match self.run(host, &check).await {
                Ok(out) if out.lines().last() == Some("ready") => return Ok(()),
                Ok(out) => debug!(host, state = out.trim(), "k3s not ready yet"),
                Err(e) => debug!(host, error = %e, "k3s readiness probe failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("k3s did not become ready on {} within {:?}", host, budget);
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    }

    /// Join token workers use to register against the control plane.
    pub async fn read_node_token(&self, host: &str) -> Result<String> {
        let token = self.run(host, &format!("cat {}", NODE_TOKEN_PATH)).await?;
        let token = token.trim();
        if token.is_empty() {
            bail!("empty node token on {}", host);
        }
        Ok(token.to_string())
    }

    /// Fetch the kubeconfig and point it at the public address instead of
    /// the loopback the installer writes.
    pub async fn fetch_kubeconfig(&self, host: &str) -> Result<String> {
        let raw = self.run(host, &format!("cat {}", KUBECONFIG_PATH)).await?;
        let rewritten = raw.replace("127.0.0.1", host);

        // A truncated transfer would poison every later kube call; make
        // sure what we cache is at least well-formed YAML.
        serde_yaml::from_str::<serde_yaml::Value>(&rewritten)
            .context("fetched kubeconfig is not valid yaml")?;

        Ok(rewritten)
    }
}
