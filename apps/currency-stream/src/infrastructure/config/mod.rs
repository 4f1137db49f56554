//! Configuration Module
//!
//! Configuration loading for the rate service.

mod settings;

pub use settings::{
    CacheSettings, ConfigError, LiveChannelSettings, PollSettings, ServerSettings, ServiceConfig,
    UpstreamCredential, UpstreamSettings,
};
