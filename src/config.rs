//! Bootstrap configuration, loaded once at construction from the
//! environment.
//!
//! A single pass over known variable names: required variables missing
//! at that pass fail fast with the offending variable name
//! (`PropertyError::EnvironmentVariable`), and the indexed
//! `SubDataURI{n}`/`PubDataURI{n}` families are collected into
//! `Vec<DataStreamConfig>`.

use std::env;

use crate::error::{PropertyError, PropertyResult};
use crate::property_store::{AccessMode, PropertyDecl, PropertyValue};

#[derive(Debug, Clone)]
pub struct DataStreamConfig {
    pub uri: String,
    pub stream_id: i64,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub node_id: i64,
    pub status_uri: String,
    pub status_stream_id: i64,
    pub control_uri: String,
    pub control_stream_id: i64,
    pub control_filter: Option<String>,
    pub heartbeat_period_ns: i64,
    pub late_message_threshold_ns: i64,
    pub log_level: String,
    pub sub_data: Vec<DataStreamConfig>,
    pub pub_data: Vec<DataStreamConfig>,
}

fn require(name: &str) -> PropertyResult<String> {
    env::var(name).map_err(|_| PropertyError::EnvironmentVariable(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn require_i64(name: &str) -> PropertyResult<i64> {
    let raw = require(name)?;
    raw.parse::<i64>()
        .map_err(|_| PropertyError::EnvironmentVariable(name.to_string()))
}

fn optional_i64(name: &str, default: i64) -> PropertyResult<i64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|_| PropertyError::EnvironmentVariable(name.to_string())),
        Err(_) => Ok(default),
    }
}

/// Collects the `SUB_DATA_URI_{n}`/`SUB_DATA_STREAM_{n}` (or `PUB_DATA_*`)
/// family for `n = 0..count`, stopping at the first gap, matching the
/// derived `SubDataConnectionCount`/`PubDataConnectionCount` property.
fn collect_data_streams(uri_prefix: &str, stream_prefix: &str) -> PropertyResult<Vec<DataStreamConfig>> {
    let mut streams = Vec::new();
    let mut n = 0usize;
    loop {
        let uri_var = format!("{uri_prefix}_{n}");
        let stream_var = format!("{stream_prefix}_{n}");
        match env::var(&uri_var) {
            Ok(uri) => {
                let stream_id = require_i64(&stream_var)?;
                streams.push(DataStreamConfig { uri, stream_id });
                n += 1;
            }
            Err(_) => break,
        }
    }
    Ok(streams)
}

impl AgentConfig {
    /// Fail-fast load: missing required env vars cause construction to
    /// fail. This is the only entry point; there is no file-based
    /// configuration layer.
    pub fn from_env() -> PropertyResult<Self> {
        Ok(Self {
            name: require("BLOCK_NAME")?,
            node_id: require_i64("BLOCK_ID")?,
            status_uri: require("STATUS_URI")?,
            status_stream_id: require_i64("STATUS_STREAM_ID")?,
            control_uri: require("CONTROL_URI")?,
            control_stream_id: require_i64("CONTROL_STREAM_ID")?,
            control_filter: optional("CONTROL_FILTER"),
            heartbeat_period_ns: optional_i64("HEARTBEAT_PERIOD_NS", 10_000_000_000)?,
            late_message_threshold_ns: optional_i64("LATE_MESSAGE_THRESHOLD_NS", 1_000_000_000)?,
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "Info".to_string()),
            sub_data: collect_data_streams("SUB_DATA_URI", "SUB_DATA_STREAM")?,
            pub_data: collect_data_streams("PUB_DATA_URI", "PUB_DATA_STREAM")?,
        })
    }

    /// Expose every bootstrap config value as a read-only (mostly) property,
    /// so it is queryable through the same `Properties`/per-key read
    /// protocol as any runtime property. `HeartbeatPeriodNs` and
    /// `LogLevel` are declared `RW` here with no hooks attached — the
    /// caller (the host bootstrap) is expected to layer its own
    /// `on_set` hook on top for the ones that need to take effect
    /// immediately (e.g. `LogLevel` reloading the tracing filter), by
    /// replacing the corresponding entry in the returned `Vec` before
    /// handing it to `Agent::new`.
    pub fn declared_properties(&self) -> Vec<PropertyDecl> {
        let mut decls = vec![
            PropertyDecl::new("Name", AccessMode::READ_ONLY, PropertyValue::Str(self.name.clone())),
            PropertyDecl::new("NodeId", AccessMode::READ_ONLY, PropertyValue::I64(self.node_id)),
            PropertyDecl::new(
                "StatusURI",
                AccessMode::READ_ONLY,
                PropertyValue::Str(self.status_uri.clone()),
            ),
            PropertyDecl::new(
                "StatusStreamID",
                AccessMode::READ_ONLY,
                PropertyValue::I64(self.status_stream_id),
            ),
            PropertyDecl::new(
                "ControlURI",
                AccessMode::READ_ONLY,
                PropertyValue::Str(self.control_uri.clone()),
            ),
            PropertyDecl::new(
                "ControlStreamID",
                AccessMode::READ_ONLY,
                PropertyValue::I64(self.control_stream_id),
            ),
            PropertyDecl::new(
                "HeartbeatPeriodNs",
                AccessMode::READ_WRITE,
                PropertyValue::I64(self.heartbeat_period_ns),
            ),
            PropertyDecl::new(
                "LateMessageThresholdNs",
                AccessMode::READ_ONLY,
                PropertyValue::I64(self.late_message_threshold_ns),
            ),
            PropertyDecl::new(
                "LogLevel",
                AccessMode::READ_WRITE,
                PropertyValue::Symbol(self.log_level.clone()),
            ),
            PropertyDecl::new(
                "SubDataConnectionCount",
                AccessMode::READ_ONLY,
                PropertyValue::I64(self.sub_data.len() as i64),
            ),
            PropertyDecl::new(
                "PubDataConnectionCount",
                AccessMode::READ_ONLY,
                PropertyValue::I64(self.pub_data.len() as i64),
            ),
        ];
        if let Some(filter) = &self.control_filter {
            decls.push(PropertyDecl::new(
                "ControlFilter",
                AccessMode::READ_ONLY,
                PropertyValue::Str(filter.clone()),
            ));
        }
        for (n, stream) in self.sub_data.iter().enumerate() {
            decls.push(PropertyDecl::new(
                Box::leak(format!("SubDataURI{n}").into_boxed_str()),
                AccessMode::READ_ONLY,
                PropertyValue::Str(stream.uri.clone()),
            ));
            decls.push(PropertyDecl::new(
                Box::leak(format!("SubDataStreamID{n}").into_boxed_str()),
                AccessMode::READ_ONLY,
                PropertyValue::I64(stream.stream_id),
            ));
        }
        for (n, stream) in self.pub_data.iter().enumerate() {
            decls.push(PropertyDecl::new(
                Box::leak(format!("PubDataURI{n}").into_boxed_str()),
                AccessMode::READ_ONLY,
                PropertyValue::Str(stream.uri.clone()),
            ));
            decls.push(PropertyDecl::new(
                Box::leak(format!("PubDataStreamID{n}").into_boxed_str()),
                AccessMode::READ_ONLY,
                PropertyValue::I64(stream.stream_id),
            ));
        }
        decls
    }
}
