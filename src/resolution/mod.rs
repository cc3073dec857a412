//! Card identification and catalog resolution pipeline.

pub mod cross_scope_resolver;
pub mod fuzzy_matcher;
pub mod rate_limited_client;
pub mod retrying_caller;
pub mod scope_cache;
