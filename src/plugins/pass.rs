//! A filter that just passes all data on. Useful for debugging only.

use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{FilterPlugin, PluginCtx, splice};
use async_trait::async_trait;

pub struct Pass;

impl Pass {
    pub fn load(_ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        Ok(Box::new(Pass))
    }
}

#[async_trait]
impl FilterPlugin for Pass {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        futures::try_join!(splice(src_r, dst_w), splice(dst_r, src_w))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::open_pipe;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn both_directions_round_trip() {
        let (src_r, mut upstream_w) = open_pipe();
        let (mut upstream_r, src_w) = open_pipe();
        let (dst_r, mut downstream_w) = open_pipe();
        let (mut downstream_r, dst_w) = open_pipe();

        let filter = tokio::spawn(async move {
            Pass.proxy(src_r, src_w, dst_r, dst_w).await
        });

        upstream_w.write_all(b"ping").await.unwrap();
        drop(upstream_w);
        downstream_w.write_all(b"pong").await.unwrap();
        drop(downstream_w);

        let mut forward = Vec::new();
        downstream_r.read_to_end(&mut forward).await.unwrap();
        assert_eq!(forward, b"ping");

        let mut reverse = Vec::new();
        upstream_r.read_to_end(&mut reverse).await.unwrap();
        assert_eq!(reverse, b"pong");

        filter.await.unwrap().unwrap();
    }
}
