// Helm release management. Like the rest of the pack's external-system
// plumbing this drives the CLI directly and maps its stderr into a small
// error taxonomy the orchestrators can act on.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::HelmChartRef;

#[derive(Debug, Error)]
pub enum HelmError {
    #[error("chart not found: {0}")]
    ChartNotFound(String),

    #[error("timed out waiting for release: {0}")]
    WaitTimeout(String),

    #[error("api server error: {0}")]
    ApiServer(String),

    #[error("helm failed: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HelmError> for ApiError {
    fn from(err: HelmError) -> Self {
        ApiError::Helm(err.to_string())
    }
}

impl HelmError {
    /// A timed-out upgrade left resources in place; the orchestrator marks
    /// the deployment failed without tearing anything down.
    pub fn is_wait_timeout(&self) -> bool {
        matches!(self, HelmError::WaitTimeout(_))
    }
}

fn categorize(stderr: &str) -> HelmError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("chart") && lowered.contains("not found") {
        HelmError::ChartNotFound(stderr.trim().to_string())
    } else if lowered.contains("timed out waiting") || lowered.contains("context deadline exceeded") {
        HelmError::WaitTimeout(stderr.trim().to_string())
    } else if lowered.contains("kubernetes cluster unreachable") || lowered.contains("connection refused")
    {
        HelmError::ApiServer(stderr.trim().to_string())
    } else {
        HelmError::Failed(stderr.trim().to_string())
    }
}

#[derive(Clone)]
pub struct HelmEngine {
    helm_bin: String,
    kubectl_bin: String,
    kubeconfig: PathBuf,
    timeout: Duration,
}

impl HelmEngine {
    pub fn new(helm_bin: &str, kubectl_bin: &str, kubeconfig: &Path, timeout: Duration) -> Self {
        HelmEngine {
            helm_bin: helm_bin.to_string(),
            kubectl_bin: kubectl_bin.to_string(),
            kubeconfig: kubeconfig.to_path_buf(),
            timeout,
        }
    }

    async fn run_helm(&self, args: &[&str]) -> Result<String, HelmError> {
        debug!(?args, "helm exec");

        let output = Command::new(&self.helm_bin)
            .args(args)
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(categorize(&stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Install or upgrade a release atomically, waiting for the workload to
    /// settle within the engine's timeout.
    pub async fn install_or_upgrade(
        &self,
        release: &str,
        namespace: &str,
        chart: &HelmChartRef,
        values_yaml: &str,
    ) -> Result<(), HelmError> {
        // Repos are added under the chart name; --force-update makes the
        // call idempotent across releases sharing a repository.
        self.run_helm(&["repo", "add", &chart.name, &chart.repo_url, "--force-update"])
            .await?;

        let values_path = std::env::temp_dir().join(format!("values-{}.yaml", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&values_path).await?;
        file.write_all(values_yaml.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        let chart_ref = format!("{}/{}", chart.name, chart.name);
        let timeout = format!("{}s", self.timeout.as_secs());
        let result = self
            .run_helm(&[
                "upgrade",
                "--install",
                release,
                &chart_ref,
                "--version",
                &chart.version,
                "--namespace",
                namespace,
                "--create-namespace",
                "-f",
                values_path.to_str().unwrap_or_default(),
                "--atomic",
                "--wait",
                "--timeout",
                &timeout,
            ])
            .await;

        if let Err(e) = tokio::fs::remove_file(&values_path).await {
            warn!(path = %values_path.display(), error = %e, "failed to remove rendered values file");
        }

        result.map(|_| ())
    }

    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), HelmError> {
        match self
            .run_helm(&["uninstall", release, "--namespace", namespace, "--wait"])
            .await
        {
            Ok(_) => Ok(()),
            // Releases that never made it are fine to "uninstall".
            Err(HelmError::Failed(msg)) if msg.contains("release: not found") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Apply a rendered manifest bundle (possibly multi-document) through
    /// kubectl against the same kubeconfig.
    pub async fn apply_manifests(&self, yaml: &str) -> Result<(), HelmError> {
        debug!("kubectl apply");

        let mut child = Command::new(&self.kubectl_bin)
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(yaml.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(categorize(&stderr));
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_categorization() {
        assert!(matches!(
            categorize("Error: chart \"grafana\" version 9.9.9 not found"),
            HelmError::ChartNotFound(_)
        ));
        assert!(matches!(
            categorize("Error: timed out waiting for the condition"),
            HelmError::WaitTimeout(_)
        ));
        assert!(matches!(
            categorize("Error: Kubernetes cluster unreachable"),
            HelmError::ApiServer(_)
        ));
        assert!(matches!(categorize("Error: something else"), HelmError::Failed(_)));
    }

    #[test]
    fn wait_timeout_flag() {
        assert!(categorize("context deadline exceeded").is_wait_timeout());
        assert!(!categorize("boom").is_wait_timeout());
    }
}
