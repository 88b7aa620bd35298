//! Remote command execution and log access for pods

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, LogParams};
use kube::{Api, Client};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};

/// Captured output of a command run inside a container
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Trait abstracting the pod exec and log subresources
///
/// Timeouts are the implementation's concern; callers treat every method as a
/// single blocking step.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodExecutor: Send + Sync {
    /// Run `command` in `container` of `pod`, feeding `stdin` when given
    async fn exec(
        &self,
        ns: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
        tty: bool,
    ) -> Result<ExecOutput>;

    /// Last `tail_lines` lines of the container log
    async fn logs(&self, ns: &str, pod: &str, container: &str, tail_lines: i64) -> Result<String>;
}

/// Real implementation over the Kubernetes websocket exec API
pub struct KubePodExecutor {
    client: Client,
}

impl KubePodExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn exec_error(pod: &str, message: impl Into<String>) -> Error {
    Error::ExecError {
        pod: pod.to_string(),
        message: message.into(),
    }
}

async fn read_stream<R>(reader: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl PodExecutor for KubePodExecutor {
    async fn exec(
        &self,
        ns: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
        tty: bool,
    ) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);

        let attach_params = AttachParams {
            container: Some(container.to_string()),
            stdin: stdin.is_some(),
            stdout: true,
            // A tty merges stderr into stdout
            stderr: !tty,
            tty,
            ..Default::default()
        };

        let mut attached = pods.exec(pod, command, &attach_params).await?;

        if let Some(input) = stdin {
            let mut writer = attached
                .stdin()
                .ok_or_else(|| exec_error(pod, "No stdin available"))?;
            writer
                .write_all(&input)
                .await
                .map_err(|e| exec_error(pod, format!("Failed to write stdin: {}", e)))?;
            writer
                .shutdown()
                .await
                .map_err(|e| exec_error(pod, format!("Failed to close stdin: {}", e)))?;
        }

        // Drain both streams together so a chatty stderr cannot stall stdout
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let (stdout, stderr) = tokio::join!(read_stream(stdout_reader), read_stream(stderr_reader));
        let stdout = stdout.map_err(|e| exec_error(pod, format!("Failed to read stdout: {}", e)))?;
        let stderr = stderr.map_err(|e| exec_error(pod, format!("Failed to read stderr: {}", e)))?;

        if let Some(status_channel) = attached.take_status()
            && let Some(result) = status_channel.await
            && let Some(status) = result.status
            && status != "Success"
        {
            debug!(pod = %pod, status = %status, "Command exited with non-success status");
            return Err(exec_error(
                pod,
                result.message.unwrap_or_else(|| status.clone()),
            ));
        }

        attached
            .join()
            .await
            .map_err(|e| exec_error(pod, format!("Exec session failed: {}", e)))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn logs(&self, ns: &str, pod: &str, container: &str, tail_lines: i64) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }
}
