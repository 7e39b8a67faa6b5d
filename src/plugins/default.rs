//! The implicit `default` source and destination plugins.
//!
//! Chains that do not name their own end stages get these: the source end
//! bridges the process stdio (the qrexec channel handed to us by the
//! dispatcher), the destination end spawns `qrexec-client-vm` towards the
//! target VM.

use crate::chan;
use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{DestinationPlugin, PluginCtx, SessionMeta, SourcePlugin};
use anyhow::anyhow;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// The qrexec client binary used to reach the destination VM.
const QREXEC_CLIENT: &str = "/usr/lib/qubes/qrexec-client-vm";

/// Default source stage: reads the source VM from stdin, answers on stdout.
pub struct DefaultSource;

impl DefaultSource {
    pub fn load(_ctx: PluginCtx) -> Result<Box<dyn SourcePlugin>, ProxyError> {
        Ok(Box::new(DefaultSource))
    }
}

#[async_trait]
impl SourcePlugin for DefaultSource {
    async fn communicate_src(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        let inbound = async move {
            let mut stdin = tokio::io::stdin();
            let mut src_w = src_w;
            let n = chan::copy(&mut stdin, &mut src_w, -1).await?;
            tracing::debug!(bytes = n, "source stdin drained");
            Ok::<_, ProxyError>(())
        };
        let outbound = async move {
            let mut src_r = src_r;
            let mut stdout = tokio::io::stdout();
            let n = chan::copy(&mut src_r, &mut stdout, -1).await?;
            tracing::debug!(bytes = n, "source stdout finished");
            Ok::<_, ProxyError>(())
        };
        futures::try_join!(inbound, outbound)?;
        Ok(())
    }
}

/// Default destination stage: spawns the qrexec client towards the target VM
/// and splices the pipeline onto its stdio.
pub struct DefaultDestination {
    meta: Arc<SessionMeta>,
}

impl DefaultDestination {
    pub fn load(ctx: PluginCtx) -> Result<Box<dyn DestinationPlugin>, ProxyError> {
        Ok(Box::new(DefaultDestination {
            meta: ctx.meta.clone(),
        }))
    }
}

#[async_trait]
impl DestinationPlugin for DefaultDestination {
    async fn communicate_dst(
        &self,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        let mut child = Command::new(QREXEC_CLIENT)
            .arg(&self.meta.dst)
            .arg(&self.meta.call)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // The child's stderr must not fall through to the qrexec channel;
            // it is pumped into the journal below.
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProxyError::Peer(format!("failed to start {QREXEC_CLIENT}: {e}")))?;

        let child_in = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("child stdin was not captured"))?;
        let child_out = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout was not captured"))?;
        let child_err = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("child stderr was not captured"))?;

        let feed = async move {
            let mut dst_r = dst_r;
            let mut child_in = child_in;
            chan::copy(&mut dst_r, &mut child_in, -1).await?;
            // dropping child_in closes the child's stdin
            Ok::<_, ProxyError>(())
        };
        let pump = async move {
            let mut child_out = child_out;
            let mut dst_w = dst_w;
            chan::copy(&mut child_out, &mut dst_w, -1).await?;
            Ok::<_, ProxyError>(())
        };
        let diagnostics = async move {
            let mut lines = BufReader::new(child_err).lines();
            while let Some(line) = lines.next_line().await? {
                tracing::warn!(client = QREXEC_CLIENT, "{line}");
            }
            Ok::<_, ProxyError>(())
        };
        futures::try_join!(feed, pump, diagnostics)?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(ProxyError::Peer(format!(
                "{QREXEC_CLIENT} exited with {status}; the qrexec policy may have denied the call"
            )));
        }
        tracing::debug!("qrexec client finished");
        Ok(())
    }
}
