//! Plugin registry.
//!
//! Stage names resolve to constructors through a startup-time registry, one
//! table per role. A plugin may register under several roles with the same
//! name (`default` does, covering both end slots), and the lookup tells
//! *unknown name* apart from *known name, wrong role* so the session driver
//! can report the difference.

use crate::error::ProxyError;
use crate::plugins::{
    DestinationPlugin, FilterPlugin, PluginCtx, SourcePlugin, StageRole, byte_limit, count,
    default, pass, sniff, streamline, timeout,
};
use std::collections::HashMap;

pub type SourceCtor = fn(PluginCtx) -> Result<Box<dyn SourcePlugin>, ProxyError>;
pub type FilterCtor = fn(PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError>;
pub type DestinationCtor = fn(PluginCtx) -> Result<Box<dyn DestinationPlugin>, ProxyError>;

#[derive(Default)]
pub struct Registry {
    sources: HashMap<String, SourceCtor>,
    filters: HashMap<String, FilterCtor>,
    destinations: HashMap<String, DestinationCtor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every plugin shipped in this crate.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register_source("default", default::DefaultSource::load);
        reg.register_destination("default", default::DefaultDestination::load);
        reg.register_filter("pass", pass::Pass::load);
        reg.register_filter("byte_limit", byte_limit::ByteLimit::load);
        reg.register_filter("stop_dst", byte_limit::load_stop_dst);
        reg.register_filter("timeout", timeout::Timeout::load);
        reg.register_filter("count", count::Count::load);
        reg.register_filter("sniff", sniff::Sniff::load);
        reg.register_filter("streamline", streamline::Streamline::load);
        reg
    }

    pub fn register_source(&mut self, name: &str, ctor: SourceCtor) {
        self.sources.insert(name.to_string(), ctor);
    }

    pub fn register_filter(&mut self, name: &str, ctor: FilterCtor) {
        self.filters.insert(name.to_string(), ctor);
    }

    pub fn register_destination(&mut self, name: &str, ctor: DestinationCtor) {
        self.destinations.insert(name.to_string(), ctor);
    }

    /// Whether `name` is registered for `role`. Used by the end-slot
    /// heuristic, which falls back to `default` instead of failing.
    pub fn has(&self, role: StageRole, name: &str) -> bool {
        match role {
            StageRole::Source => self.sources.contains_key(name),
            StageRole::Filter => self.filters.contains_key(name),
            StageRole::Destination => self.destinations.contains_key(name),
        }
    }

    pub fn source(&self, name: &str, ctx: PluginCtx) -> Result<Box<dyn SourcePlugin>, ProxyError> {
        match self.sources.get(name) {
            Some(ctor) => ctor(ctx),
            None => Err(self.load_failure(StageRole::Source, name)),
        }
    }

    pub fn filter(&self, name: &str, ctx: PluginCtx) -> Result<Box<dyn FilterPlugin>, ProxyError> {
        match self.filters.get(name) {
            Some(ctor) => ctor(ctx),
            None => Err(self.load_failure(StageRole::Filter, name)),
        }
    }

    pub fn destination(
        &self,
        name: &str,
        ctx: PluginCtx,
    ) -> Result<Box<dyn DestinationPlugin>, ProxyError> {
        match self.destinations.get(name) {
            Some(ctor) => ctor(ctx),
            None => Err(self.load_failure(StageRole::Destination, name)),
        }
    }

    fn load_failure(&self, role: StageRole, name: &str) -> ProxyError {
        let known_elsewhere = [StageRole::Source, StageRole::Filter, StageRole::Destination]
            .into_iter()
            .any(|other| other != role && self.has(other, name));
        if known_elsewhere {
            ProxyError::PluginRoleMismatch {
                name: name.to_string(),
                role,
            }
        } else {
            ProxyError::PluginNotFound {
                name: name.to_string(),
                role,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::SessionMeta;
    use std::sync::Arc;

    fn ctx() -> PluginCtx {
        PluginCtx {
            label: "test_stage_0".into(),
            meta: Arc::new(SessionMeta {
                chain: "test".into(),
                src: "source-vm".into(),
                dst: "dest-vm".into(),
                call: "my.Service".into(),
            }),
            config: None,
        }
    }

    #[test]
    fn builtin_names_resolve_for_their_roles() {
        let reg = Registry::builtin();
        assert!(reg.has(StageRole::Source, "default"));
        assert!(reg.has(StageRole::Destination, "default"));
        for name in [
            "pass",
            "byte_limit",
            "stop_dst",
            "timeout",
            "count",
            "sniff",
            "streamline",
        ] {
            assert!(reg.has(StageRole::Filter, name), "missing filter {name}");
        }
    }

    #[test]
    fn unknown_name_reports_not_found() {
        let reg = Registry::builtin();
        match reg.filter("no_such_plugin", ctx()) {
            Err(ProxyError::PluginNotFound { name, role }) => {
                assert_eq!(name, "no_such_plugin");
                assert_eq!(role, StageRole::Filter);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("resolved unexpectedly"),
        }
    }

    #[test]
    fn wrong_role_reports_mismatch() {
        let reg = Registry::builtin();
        // `default` exists, but only for the end slots
        match reg.filter("default", ctx()) {
            Err(ProxyError::PluginRoleMismatch { name, role }) => {
                assert_eq!(name, "default");
                assert_eq!(role, StageRole::Filter);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("resolved unexpectedly"),
        }
        // and `pass` only as a filter
        assert!(matches!(
            reg.source("pass", ctx()),
            Err(ProxyError::PluginRoleMismatch { .. })
        ));
    }
}
