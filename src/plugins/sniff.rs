//! Passively record all traffic to the journal while passing it through.
//!
//! Every chunk is logged with chain, call and the direction it travelled.
//! Chunk boundaries are whatever the pipe delivers, so a rendered chunk may
//! split multi-byte sequences arbitrarily.
//!
//! Configuration:
//! - `decode`: rendering of the bytes in the journal, `base64` (default),
//!   `hex` or `string`
//! - `encoding`: text encoding for `string` mode; only `utf-8` is supported
//!
//! `string` mode hands attacker-controlled bytes to the journal after lossy
//! decoding and is therefore not the default.

use crate::chan;
use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use crate::plugins::{FilterPlugin, PluginCtx, SessionMeta};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Deserialize)]
struct SniffConfig {
    #[serde(default = "default_decode")]
    decode: String,
    #[serde(default = "default_encoding")]
    encoding: String,
}

fn default_decode() -> String {
    "base64".into()
}

fn default_encoding() -> String {
    "utf-8".into()
}

#[derive(Debug, Clone, Copy)]
enum Rendering {
    Base64,
    Hex,
    Text,
}

pub struct Sniff {
    rendering: Rendering,
    meta: Arc<SessionMeta>,
}

impl Sniff {
    pub fn load(ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        let cfg: SniffConfig = ctx.typed_config()?;
        let rendering = match cfg.decode.as_str() {
            "base64" => Rendering::Base64,
            "hex" => Rendering::Hex,
            "string" | "str" => {
                if !matches!(cfg.encoding.as_str(), "utf-8" | "utf8") {
                    return Err(ProxyError::Config(format!(
                        "stage {}: unsupported encoding {:?}, only utf-8 is available",
                        ctx.label, cfg.encoding
                    )));
                }
                Rendering::Text
            }
            other => {
                return Err(ProxyError::Config(format!(
                    "stage {}: unsupported decode parameter value: {other}",
                    ctx.label
                )));
            }
        };
        Ok(Box::new(Sniff {
            rendering,
            meta: ctx.meta.clone(),
        }))
    }

    fn render(&self, buf: &[u8]) -> String {
        match self.rendering {
            Rendering::Base64 => BASE64.encode(buf),
            Rendering::Hex => hex::encode(buf),
            Rendering::Text => String::from_utf8_lossy(buf).into_owned(),
        }
    }

    async fn tap(
        &self,
        mut reader: PipeReader,
        mut writer: PipeWriter,
        src2dst: bool,
    ) -> Result<(), ProxyError> {
        let meta = &self.meta;
        let (from, to) = if src2dst {
            (&meta.src, &meta.dst)
        } else {
            (&meta.dst, &meta.src)
        };
        loop {
            let buf = chan::read_some(&mut reader, chan::READ_BUF_SIZE).await?;
            if buf.is_empty() {
                break;
            }
            tracing::info!(
                "(data:{}:{}) {} -> {}: {}",
                meta.chain,
                meta.call,
                from,
                to,
                self.render(&buf)
            );
            chan::write_all(&mut writer, &buf, false).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl FilterPlugin for Sniff {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError> {
        futures::try_join!(
            self.tap(src_r, dst_w, true),
            self.tap(dst_r, src_w, false),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::open_pipe;
    use tokio::io::AsyncReadExt;

    fn sniff(config: serde_json::Value) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        Sniff::load(PluginCtx {
            label: "test_sniff_0".into(),
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
    fn renderings() {
        let meta = Arc::new(SessionMeta {
            chain: "test".into(),
            src: "a".into(),
            dst: "b".into(),
            call: "svc".into(),
        });
        let base64 = Sniff {
            rendering: Rendering::Base64,
            meta: meta.clone(),
        };
        assert_eq!(base64.render(b"hi"), "aGk=");

        let hexed = Sniff {
            rendering: Rendering::Hex,
            meta: meta.clone(),
        };
        assert_eq!(hexed.render(&[0xde, 0xad]), "dead");

        let text = Sniff {
            rendering: Rendering::Text,
            meta,
        };
        assert_eq!(text.render(b"ok\xff"), "ok\u{fffd}");
    }

    #[test]
    fn unknown_decode_is_a_config_error() {
        let err = sniff(serde_json::json!({"decode": "rot13"})).err().unwrap();
        assert_eq!(err.kind(), "config");

        let err = sniff(serde_json::json!({"decode": "string", "encoding": "latin-1"}))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn traffic_is_forwarded_byte_exact() {
        let (src_r, mut upstream_w) = open_pipe();
        let (mut upstream_r, src_w) = open_pipe();
        let (dst_r, mut downstream_w) = open_pipe();
        let (mut downstream_r, dst_w) = open_pipe();

        let filter = sniff(serde_json::json!({})).unwrap();
        let task =
            tokio::spawn(async move { filter.proxy(src_r, src_w, dst_r, dst_w).await });

        let payload: Vec<u8> = (0..10 * 1024).map(|i| (i % 251) as u8).collect();
        upstream_w.write_all(&payload).await.unwrap();
        drop(upstream_w);
        downstream_w.write_all(&payload).await.unwrap();
        drop(downstream_w);

        let mut forward = Vec::new();
        downstream_r.read_to_end(&mut forward).await.unwrap();
        assert_eq!(forward, payload);

        let mut reverse = Vec::new();
        upstream_r.read_to_end(&mut reverse).await.unwrap();
        assert_eq!(reverse, payload);

        task.await.unwrap().unwrap();
    }
}
