//! End the connection once a per-direction time limit is reached.
//!
//! A deadline hit surfaces as a timeout error, which tears the whole session
//! down through the pipeline's first-failure semantics. A timeout alone does
//! not stop a compromised VM from opening further connections; pair it with
//! `count` for that.
//!
//! Configuration:
//! - `src2dst_timeout`: seconds before the source-to-destination stream is
//!   cut off, -1 = infinite
//! - `dst2src_timeout`: same for the destination-to-source stream

use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{FilterPlugin, PluginCtx, splice};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TimeoutConfig {
    src2dst_timeout: f64,
    dst2src_timeout: f64,
}

pub struct Timeout {
    src2dst: Option<Duration>,
    dst2src: Option<Duration>,
}

fn deadline(seconds: f64, label: &str) -> Result<Option<Duration>, ProxyError> {
    if seconds < 0.0 {
        return Ok(None);
    }
    if !seconds.is_finite() {
        return Err(ProxyError::Config(format!(
            "stage {label}: timeouts must be finite"
        )));
    }
    Ok(Some(Duration::from_secs_f64(seconds)))
}

impl Timeout {
    pub fn load(ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        let cfg: TimeoutConfig = ctx.typed_config()?;
        Ok(Box::new(Timeout {
            src2dst: deadline(cfg.src2dst_timeout, &ctx.label)?,
            dst2src: deadline(cfg.dst2src_timeout, &ctx.label)?,
        }))
    }

    async fn bounded(
        limit: Option<Duration>,
        direction: &'static str,
        reader: PipeReader,
        writer: PipeWriter,
    ) -> Result<(), ProxyError> {
        match limit {
            None => {
                splice(reader, writer).await?;
                Ok(())
            }
            Some(d) => match tokio::time::timeout(d, splice(reader, writer)).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(ProxyError::Timeout {
                    seconds: d.as_secs_f64(),
                    direction,
                }),
            },
        }
    }
}

#[async_trait]
impl FilterPlugin for Timeout {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        futures::try_join!(
            Self::bounded(self.src2dst, "src2dst", src_r, dst_w),
            Self::bounded(self.dst2src, "dst2src", dst_r, src_w),
        )?;
        Ok(())
    }
}
