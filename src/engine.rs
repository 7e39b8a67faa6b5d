//! The pipeline engine: builds the bidirectional streaming graph and runs
//! one task per stage until the session ends.
//!
//! # Graph construction
//!
//! Two pipes per hop, one for each direction. The source stage holds the
//! outside-facing ends; walking down the chain, each filter is wired with
//! its upstream ends being whatever the previous hop emits and its
//! downstream ends being a freshly opened pipe pair, whose far ends become
//! the upstream of the next hop. The destination stage gets the final pair.
//!
//! # Termination
//!
//! Stages own their endpoints, so any returning stage closes them, and the
//! EOF ripples outward: neighbours see their reads end, drain, and return
//! too. That is the whole shutdown mechanism for clean sessions, including
//! half-closed ones where one direction keeps flowing after the other
//! finished.
//!
//! Failures use first-error semantics: the first stage task to fail decides
//! the session outcome, every still-running task is aborted, and the engine
//! waits for all of them to wind down before reporting. Aborting a task
//! drops its future and with it any endpoints still held, so cleanup is the
//! same ownership story as the normal path.

use crate::error::ProxyError;
use crate::pipe::open_pipe;
use crate::plugins::{DestinationPlugin, FilterPlugin, SourcePlugin};
use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::Instrument;

pub struct Pipeline {
    source: (String, Box<dyn SourcePlugin>),
    filters: Vec<(String, Box<dyn FilterPlugin>)>,
    destination: (String, Box<dyn DestinationPlugin>),
}

impl Pipeline {
    pub fn new(
        source: (String, Box<dyn SourcePlugin>),
        filters: Vec<(String, Box<dyn FilterPlugin>)>,
        destination: (String, Box<dyn DestinationPlugin>),
    ) -> Self {
        Self {
            source,
            filters,
            destination,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns once every stage task has finished or been torn down; the
    /// result is `Ok` only if all of them returned normally.
    pub async fn run(self) -> Result<(), ProxyError> {
        let mut tasks: JoinSet<Result<(), ProxyError>> = JoinSet::new();

        let (src_r, src_w) = open_pipe();
        let (dst_r, dst_w) = open_pipe();

        let (label, source) = self.source;
        tracing::debug!(stage = %label, "starting source stage");
        tasks.spawn(
            async move { source.communicate_src(dst_r, src_w).await }
                .instrument(tracing::info_span!("stage", name = %label)),
        );

        // the downstream-facing ends of the hop built so far
        let mut cur_r = src_r;
        let mut cur_w = dst_w;

        for (label, filter) in self.filters {
            let (r1, w1) = open_pipe();
            let (r2, w2) = open_pipe();
            let up_r = cur_r;
            let up_w = cur_w;
            tracing::debug!(stage = %label, "starting filter stage");
            tasks.spawn(
                async move { filter.proxy(up_r, up_w, r1, w2).await }
                    .instrument(tracing::info_span!("stage", name = %label)),
            );
            cur_r = r2;
            cur_w = w1;
        }

        let (label, destination) = self.destination;
        tracing::debug!(stage = %label, "starting destination stage");
        tasks.spawn(
            async move { destination.communicate_dst(cur_r, cur_w).await }
                .instrument(tracing::info_span!("stage", name = %label)),
        );

        let mut first_err: Option<ProxyError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        tracing::debug!(error = %err, "stage failed, tearing down the session");
                        tasks.abort_all();
                        first_err = Some(err);
                    } else {
                        tracing::debug!(error = %err, "follow-up stage failure");
                    }
                }
                Err(join_err) if join_err.is_panic() => {
                    if first_err.is_none() {
                        tasks.abort_all();
                        first_err =
                            Some(anyhow!("stage task panicked: {join_err}").into());
                    }
                }
                // aborted during teardown
                Err(_) => {}
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
