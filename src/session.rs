//! Session driver: turns one qrexec invocation into a running pipeline.
//!
//! The dispatcher invokes the proxy with a single argument of the form
//! `[chain]+[destination vm]+[call]` (qrexec splits call arguments on `+`,
//! so the proxy does too) and exports the calling VM's name in the
//! environment. The driver resolves the chain in the configuration file,
//! loads its plugins and hands the assembled pipeline to the engine.

use crate::config::{ChainConfig, ProxyConfig};
use crate::engine::Pipeline;
use crate::error::ProxyError;
use crate::plugins::registry::Registry;
use crate::plugins::{PluginCtx, SessionMeta, StageRole};
use std::path::Path;
use std::sync::Arc;

/// Environment variable the qrexec dispatcher sets to the calling VM's name.
pub const SOURCE_VM_ENV: &str = "QREXEC_REMOTE_DOMAIN";

pub async fn run(call_spec: &str, config_path: &Path) -> Result<(), ProxyError> {
    let meta = match session_meta(call_spec) {
        Ok(meta) => Arc::new(meta),
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "invalid invocation");
            return Err(err);
        }
    };

    tracing::info!(
        chain = %meta.chain,
        src = %meta.src,
        dst = %meta.dst,
        call = %meta.call,
        "starting proxied call"
    );

    match drive(&meta, config_path).await {
        Ok(()) => {
            tracing::info!(chain = %meta.chain, "all stages finished, exiting");
            Ok(())
        }
        Err(err) => {
            tracing::error!(
                chain = %meta.chain,
                src = %meta.src,
                dst = %meta.dst,
                call = %meta.call,
                kind = err.kind(),
                error = %err,
                "session failed"
            );
            Err(err)
        }
    }
}

async fn drive(meta: &Arc<SessionMeta>, config_path: &Path) -> Result<(), ProxyError> {
    let config = ProxyConfig::load(config_path)?;
    let chain_cfg = config.chain(&meta.chain).ok_or_else(|| {
        ProxyError::Config(format!(
            "chain {} not found in {}",
            meta.chain,
            config_path.display()
        ))
    })?;

    let registry = Registry::builtin();
    let pipeline = assemble(&registry, chain_cfg, meta)?;
    pipeline.run().await
}

/// Resolve the chain's stage list into constructed plugins.
///
/// End slots are heuristic: if the first listed stage is registered as a
/// source it takes the source slot, and likewise the last listed stage for
/// the destination slot; otherwise the `default` plugins serve and the
/// listed stage stays in the filter list. Middle stages must resolve as
/// filters, and there any load failure is fatal.
fn assemble(
    registry: &Registry,
    chain_cfg: &ChainConfig,
    meta: &Arc<SessionMeta>,
) -> Result<Pipeline, ProxyError> {
    let names = &chain_cfg.plugins;
    let mut lo = 0;
    let mut hi = names.len();

    let source = if lo < hi && registry.has(StageRole::Source, &names[lo]) {
        let (label, ctx) = stage_ctx(chain_cfg, lo, &names[lo], meta);
        let plugin = registry.source(&names[lo], ctx)?;
        lo += 1;
        (label, plugin)
    } else {
        let label = format!("{}_default_src", meta.chain);
        let ctx = PluginCtx {
            label: label.clone(),
            meta: meta.clone(),
            config: None,
        };
        (label, registry.source("default", ctx)?)
    };

    let destination = if lo < hi && registry.has(StageRole::Destination, &names[hi - 1]) {
        hi -= 1;
        let (label, ctx) = stage_ctx(chain_cfg, hi, &names[hi], meta);
        (label, registry.destination(&names[hi], ctx)?)
    } else {
        let label = format!("{}_default_dst", meta.chain);
        let ctx = PluginCtx {
            label: label.clone(),
            meta: meta.clone(),
            config: None,
        };
        (label, registry.destination("default", ctx)?)
    };

    let mut filters = Vec::with_capacity(hi - lo);
    for index in lo..hi {
        let (label, ctx) = stage_ctx(chain_cfg, index, &names[index], meta);
        filters.push((label, registry.filter(&names[index], ctx)?));
    }

    Ok(Pipeline::new(source, filters, destination))
}

fn stage_ctx(
    chain_cfg: &ChainConfig,
    index: usize,
    name: &str,
    meta: &Arc<SessionMeta>,
) -> (String, PluginCtx) {
    let label = format!("{}_{}_{}", meta.chain, name, index);
    let ctx = PluginCtx {
        label: label.clone(),
        meta: meta.clone(),
        config: chain_cfg.stage_config(index, name),
    };
    (label, ctx)
}

/// Build the immutable session metadata from the invocation.
fn session_meta(call_spec: &str) -> Result<SessionMeta, ProxyError> {
    let src = std::env::var(SOURCE_VM_ENV).map_err(|_| {
        ProxyError::Config(format!(
            "failed to identify the source VM: {SOURCE_VM_ENV} is not set"
        ))
    })?;

    let parts: Vec<&str> = call_spec.split('+').collect();
    let [chain, dst, call] = parts.as_slice() else {
        return Err(ProxyError::Config(format!(
            "unexpected call specification {call_spec:?}, \
             expected [chain]+[destination vm]+[call]"
        )));
    };
    if chain.is_empty() || dst.is_empty() || call.is_empty() {
        return Err(ProxyError::Config(format!(
            "empty component in call specification {call_spec:?}"
        )));
    }

    Ok(SessionMeta {
        chain: chain.to_string(),
        src,
        dst: dst.to_string(),
        call: call.to_string(),
    })
}
