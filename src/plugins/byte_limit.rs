//! Limit the number of bytes sent in either direction.
//!
//! Once a direction's limit is reached its downstream write side is closed
//! and the remaining upstream bytes are read and discarded. Draining matters
//! as much as closing: a writer left stalled against a full pipe would turn
//! back-pressure into a signal the peer can observe.
//!
//! Configuration:
//! - `src2dst_limit`: bytes allowed from source to destination, -1 = unbounded
//! - `dst2src_limit`: bytes allowed from destination to source, -1 = unbounded

use crate::chan;
use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{FilterPlugin, PluginCtx};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ByteLimitConfig {
    src2dst_limit: i64,
    dst2src_limit: i64,
}

pub struct ByteLimit {
    src2dst_limit: i64,
    dst2src_limit: i64,
}

impl ByteLimit {
    pub fn load(ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        let cfg: ByteLimitConfig = ctx.typed_config()?;
        for limit in [cfg.src2dst_limit, cfg.dst2src_limit] {
            if limit < -1 {
                return Err(ProxyError::Config(format!(
                    "stage {}: byte limits must be -1 or non-negative, got {limit}",
                    ctx.label
                )));
            }
        }
        Ok(Box::new(ByteLimit {
            src2dst_limit: cfg.src2dst_limit,
            dst2src_limit: cfg.dst2src_limit,
        }))
    }

    async fn copy_then_discard(
        limit: i64,
        mut reader: PipeReader,
        mut writer: PipeWriter,
    ) -> Result<(), ProxyError> {
        chan::copy(&mut reader, &mut writer, limit).await?;
        // half-close downstream first, then absorb whatever the upstream
        // writer still has in flight
        drop(writer);
        let dropped = chan::discard(reader).await?;
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "discarded past the limit");
        }
        Ok(())
    }
}

/// One-way convenience filter: lets source-to-destination traffic through
/// unbounded and stops everything coming back.
pub fn load_stop_dst(_ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
    Ok(Box::new(ByteLimit {
        src2dst_limit: -1,
        dst2src_limit: 0,
    }))
}

#[async_trait]
impl FilterPlugin for ByteLimit {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        futures::try_join!(
            Self::copy_then_discard(self.src2dst_limit, src_r, dst_w),
            Self::copy_then_discard(self.dst2src_limit, dst_r, src_w),
        )?;
        Ok(())
    }
}
