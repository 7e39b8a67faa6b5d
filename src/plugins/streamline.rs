//! Reshape traffic into fixed-size blocks with randomized pacing.
//!
//! Incoming data is buffered until a full window has been read and only then
//! written out, with a uniformly random delay before each read and each
//! write. Blocking the sender while the window fills, plus the jitter,
//! raises the cost of back-pressure side channels between two cooperating
//! VMs: a receiver can no longer signal bits by precisely timing how it
//! stalls the stream. This is a rate limiter for such channels, not an
//! eliminator, and it costs throughput and latency on the primary stream.
//!
//! Configuration:
//! - `buf_size`: window size in bytes (default 10 MiB)
//! - `delay_read`: maximum seconds to wait before refilling the window
//!   (default 0.5)
//! - `delay_write`: maximum seconds to wait before emitting a window
//!   (default 0.5)

use crate::chan;
use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{FilterPlugin, PluginCtx};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Deserialize)]
struct StreamlineConfig {
    #[serde(default = "default_buf_size")]
    buf_size: usize,
    #[serde(default = "default_delay")]
    delay_read: f64,
    #[serde(default = "default_delay")]
    delay_write: f64,
}

fn default_buf_size() -> usize {
    10 * 1024 * 1024
}

fn default_delay() -> f64 {
    0.5
}

pub struct Streamline {
    buf_size: usize,
    delay_read: f64,
    delay_write: f64,
}

impl Streamline {
    pub fn load(ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        let cfg: StreamlineConfig = ctx.typed_config()?;
        if cfg.buf_size == 0 {
            return Err(ProxyError::Config(format!(
                "stage {}: buf_size must be > 0",
                ctx.label
            )));
        }
        for delay in [cfg.delay_read, cfg.delay_write] {
            if !delay.is_finite() || delay < 0.0 {
                return Err(ProxyError::Config(format!(
                    "stage {}: delays must be non-negative seconds",
                    ctx.label
                )));
            }
        }
        Ok(Box::new(Streamline {
            buf_size: cfg.buf_size,
            delay_read: cfg.delay_read,
            delay_write: cfg.delay_write,
        }))
    }

    async fn jitter(max_delay: f64) {
        if max_delay <= 0.0 {
            return;
        }
        // the rng is not Send; pick the delay before suspending
        let delay = {
            let mut rng = rand::rng();
            rng.random_range(0.0..=max_delay)
        };
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }

    async fn reshape(
        &self,
        mut reader: PipeReader,
        mut writer: PipeWriter,
    ) -> Result<(), ProxyError> {
        let mut first = true;
        loop {
            if !first {
                Self::jitter(self.delay_read).await;
            }
            first = false;
            let block = chan::read_exactly(&mut reader, self.buf_size).await?;
            if block.is_empty() {
                break;
            }
            Self::jitter(self.delay_write).await;
            chan::write_all(&mut writer, &block, false).await?;
            if block.len() < self.buf_size {
                break;
            }
        }
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl FilterPlugin for Streamline {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        futures::try_join!(
            self.reshape(src_r, dst_w),
            self.reshape(dst_r, src_w),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::open_pipe;
    use crate::plugins::SessionMeta;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn load(config: serde_json::Value) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        Streamline::load(PluginCtx {
            label: "test_streamline_0".into(),
            meta: Arc::new(SessionMeta {
                chain: "test".into(),
                src: "a".into(),
                dst: "b".into(),
                call: "svc".into(),
            }),
            config: Some(config),
        })
    }

    #[test]
    fn bad_parameters_are_config_errors() {
        assert_eq!(
            load(serde_json::json!({"buf_size": 0})).err().unwrap().kind(),
            "config"
        );
        assert_eq!(
            load(serde_json::json!({"delay_read": -1.0}))
                .err()
                .unwrap()
                .kind(),
            "config"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn payload_survives_windowing() {
        let (src_r, mut upstream_w) = open_pipe();
        let (mut upstream_r, src_w) = open_pipe();
        let (dst_r, mut downstream_w) = open_pipe();
        let (mut downstream_r, dst_w) = open_pipe();

        // window smaller than the payload so several blocks are emitted
        let filter = load(serde_json::json!({"buf_size": 1024})).unwrap();
        let task =
            tokio::spawn(async move { filter.proxy(src_r, src_w, dst_r, dst_w).await });

        let payload: Vec<u8> = (0..5000).map(|i| (i % 253) as u8).collect();
        upstream_w.write_all(&payload).await.unwrap();
        drop(upstream_w);
        downstream_w.write_all(b"reply").await.unwrap();
        drop(downstream_w);

        let mut forward = Vec::new();
        downstream_r.read_to_end(&mut forward).await.unwrap();
        assert_eq!(forward, payload);

        let mut reverse = Vec::new();
        upstream_r.read_to_end(&mut reverse).await.unwrap();
        assert_eq!(reverse, b"reply");

        task.await.unwrap().unwrap();
    }
}
