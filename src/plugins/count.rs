//! Admission control: refuse a chain once it has been used too often.
//!
//! Keeps one counter file per chain with a unix timestamp per admitted
//! session. On start the file is pruned of entries older than the interval,
//! the session is refused if the remainder already meets the limit, and
//! admitted sessions append their own timestamp. Only after admission are
//! the streams spliced through unmodified.
//!
//! The counter file is shared across proxy processes; access is serialized
//! by atomically creating a `<file>.lock` directory next to it (directory
//! creation being the atomic primitive the host filesystem gives us) with a
//! 200 ms polling backoff while another process holds it.
//!
//! Configuration:
//! - `limit`: admitted sessions per interval, > 0
//! - `limit_interval`: interval length in seconds, > 0
//! - `state_dir`: where counter files live
//!   (default `/var/lib/qrexec-proxy/count`)

use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{FilterPlugin, PluginCtx, SessionMeta, splice};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_STATE_DIR: &str = "/var/lib/qrexec-proxy/count";
const LOCK_RETRY: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct CountConfig {
    limit: u64,
    limit_interval: f64,
    #[serde(default)]
    state_dir: Option<PathBuf>,
}

pub struct Count {
    limit: u64,
    interval: f64,
    state_dir: PathBuf,
    meta: Arc<SessionMeta>,
}

/// Cross-process lock around one counter file.
///
/// Held from successful `acquire` until `release`; if the proxy dies in
/// between, `Drop` removes the sentinel so other sessions are not wedged.
struct StateLock {
    path: PathBuf,
    held: bool,
}

impl StateLock {
    async fn acquire(counter_file: &Path) -> Result<StateLock, ProxyError> {
        let mut os = counter_file.as_os_str().to_owned();
        os.push(".lock");
        let path = PathBuf::from(os);
        loop {
            match tokio::fs::create_dir(&path).await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(StateLock { path, held: true })
    }

    async fn release(mut self) -> Result<(), ProxyError> {
        self.held = false;
        tokio::fs::remove_dir(&self.path).await?;
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if self.held {
            let _ = std::fs::remove_dir(&self.path);
        }
    }
}

impl Count {
    pub fn load(ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        let cfg: CountConfig = ctx.typed_config()?;
        if cfg.limit == 0 {
            return Err(ProxyError::Config(format!(
                "stage {}: limit must be > 0",
                ctx.label
            )));
        }
        if !(cfg.limit_interval > 0.0) || !cfg.limit_interval.is_finite() {
            return Err(ProxyError::Config(format!(
                "stage {}: limit_interval must be a positive number of seconds",
                ctx.label
            )));
        }
        let state_dir = cfg
            .state_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        std::fs::create_dir_all(&state_dir).map_err(|e| {
            ProxyError::Config(format!(
                "stage {}: cannot create state dir {}: {e}",
                ctx.label,
                state_dir.display()
            ))
        })?;
        Ok(Box::new(Count {
            limit: cfg.limit,
            interval: cfg.limit_interval,
            state_dir,
            meta: ctx.meta.clone(),
        }))
    }

    /// Check and update the chain's counter; error if the session must not
    /// proceed.
    async fn admit(&self) -> Result<(), ProxyError> {
        let counter_file = self.state_dir.join(&self.meta.chain);
        let lock = StateLock::acquire(&counter_file).await?;
        let verdict = self.update_counters(&counter_file).await;
        lock.release().await?;
        verdict
    }

    async fn update_counters(&self, counter_file: &Path) -> Result<(), ProxyError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("system clock before the unix epoch: {e}"))?
            .as_secs();

        let existing = match tokio::fs::read_to_string(counter_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut kept: Vec<u64> = Vec::new();
        for line in existing.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let stamp: u64 = line.parse().map_err(|_| {
                anyhow!(
                    "corrupt counter file {}: bad entry {line:?}",
                    counter_file.display()
                )
            })?;
            if (now.saturating_sub(stamp) as f64) < self.interval {
                kept.push(stamp);
            }
        }

        let admitted = (kept.len() as u64) < self.limit;
        if admitted {
            kept.push(now);
        }
        // the pruned list is rewritten even when refusing
        let lines: Vec<String> = kept.iter().map(u64::to_string).collect();
        tokio::fs::write(counter_file, lines.join("\n")).await?;

        if admitted {
            tracing::debug!(used = kept.len(), limit = self.limit, "session admitted");
            Ok(())
        } else {
            Err(ProxyError::Admission(format!(
                "connection limit of {} reached for chain {}",
                self.limit, self.meta.chain
            )))
        }
    }
}

#[async_trait]
impl FilterPlugin for Count {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        self.admit().await?;
        futures::try_join!(splice(src_r, dst_w), splice(dst_r, src_w))?;
        Ok(())
    }
}
