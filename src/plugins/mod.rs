//! Plugin contract and shared plumbing for proxy stages.
//!
//! A chain is made of stages in three roles: one Source adjacent to the
//! calling VM, any number of Filters, and one Destination adjacent to the
//! called VM. Every stage receives move-only pipe endpoints and runs as its
//! own task; a stage that returns or fails drops its endpoints, which is how
//! EOF and teardown propagate to its neighbours.
//!
//! Nothing a stage emits besides payload (no log lines, no diagnostics, no
//! subprocess stderr) may reach the source VM's byte channel. Only the
//! Source stage writes to the process stdout, and only payload.

use crate::chan;
use crate::error::ProxyError;
use crate::pipe::{PipeReader, PipeWriter};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

pub mod byte_limit;
pub mod count;
pub mod default;
pub mod pass;
pub mod registry;
pub mod sniff;
pub mod streamline;
pub mod timeout;

/// Immutable facts about the proxied call, shared with every stage.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    /// Chain name the source VM addressed.
    pub chain: String,
    /// Source VM identity as reported by the qrexec dispatcher.
    pub src: String,
    /// Destination VM the call is proxied to.
    pub dst: String,
    /// The qrexec service being called.
    pub call: String,
}

/// The position a stage occupies in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    Source,
    Filter,
    Destination,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRole::Source => write!(f, "source"),
            StageRole::Filter => write!(f, "filter"),
            StageRole::Destination => write!(f, "destination"),
        }
    }
}

/// Everything a plugin constructor gets to work with.
pub struct PluginCtx {
    /// Stage instance label, `<chain>_<plugin>_<index>` for listed stages.
    pub label: String,
    pub meta: Arc<SessionMeta>,
    /// The stage's slice of the chain configuration, if any.
    pub config: Option<serde_json::Value>,
}

impl PluginCtx {
    /// Deserialize the stage configuration into a typed struct.
    ///
    /// An absent configuration deserializes from an empty object, so structs
    /// whose fields all carry serde defaults accept it, while structs with
    /// required fields turn it into a configuration error.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, ProxyError> {
        let value = self
            .config
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        serde_json::from_value(value)
            .map_err(|e| ProxyError::Config(format!("stage {}: {e}", self.label)))
    }
}

/// Stage adjacent to the source VM: bridges the process stdio to the
/// pipeline's source-side pipes.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// `src_r` carries data returning from downstream for delivery to the
    /// source VM; `src_w` feeds the source VM's bytes into the pipeline.
    async fn communicate_src(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
    ) -> Result<(), ProxyError>;
}

/// Stage adjacent to the destination VM.
#[async_trait]
pub trait DestinationPlugin: Send + Sync {
    /// `dst_r` carries data headed for the destination VM; `dst_w` feeds the
    /// destination's answer back into the pipeline.
    async fn communicate_dst(
        &self,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError>;
}

/// Middle stage: sees both half-streams of the bidirectional call.
///
/// The two directions are independent; a filter may finish one and keep
/// serving the other. Endpoints are consumed, so every exit path closes
/// them; the pipeline additionally tears the stage down if a neighbour
/// fails.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    async fn proxy(
        &self,
        src_r: PipeReader,
        src_w: PipeWriter,
        dst_r: PipeReader,
        dst_w: PipeWriter,
    ) -> Result<(), ProxyError>;
}

/// Move one half-stream from `reader` to `writer` until EOF.
///
/// Takes both endpoints by value: when the copy finishes they are dropped
/// right away, which half-closes the downstream side while the stage's other
/// direction may still be running.
pub(crate) async fn splice(
    mut reader: PipeReader,
    mut writer: PipeWriter,
) -> Result<u64, ProxyError> {
    Ok(chan::copy(&mut reader, &mut writer, -1).await?)
}
