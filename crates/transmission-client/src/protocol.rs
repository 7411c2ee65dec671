//! Wire types for the daemon's JSON-RPC dialect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::RawTorrent;

pub const METHOD_TORRENT_ADD: &str = "torrent-add";
pub const METHOD_TORRENT_GET: &str = "torrent-get";
pub const METHOD_TORRENT_REMOVE: &str = "torrent-remove";
pub const METHOD_TORRENT_VERIFY: &str = "torrent-verify";
pub const METHOD_SESSION_STATS: &str = "session-stats";

/// Header carrying the daemon session token.
pub const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

/// Header identifying this client to the daemon.
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";

/// Header carrying the request timestamp.
pub const TIME_HEADER: &str = "Time";

pub const RESULT_SUCCESS: &str = "success";

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub method: &'a str,
    pub arguments: &'a Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddArguments<'a> {
    pub filename: &'a str,
    #[serde(rename = "download-dir")]
    pub download_dir: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetArguments<'a> {
    pub fields: &'a [&'a str],
    pub ids: &'a [&'a str],
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveArguments<'a> {
    pub ids: &'a [&'a str],
    #[serde(rename = "delete-local-data", skip_serializing_if = "std::ops::Not::not")]
    pub delete_local_data: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdsArguments<'a> {
    pub ids: &'a [&'a str],
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStats {
    pub torrent_count: u64,
    pub active_torrent_count: u64,
    pub paused_torrent_count: u64,
    pub download_speed: i64,
    pub upload_speed: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TorrentList {
    pub torrents: Vec<RawTorrent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_arguments_use_daemon_field_names() {
        let args = AddArguments {
            filename: "magnet:?xt=urn:btih:abc",
            download_dir: "/data/abc",
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["download-dir"], "/data/abc");
    }

    #[test]
    fn remove_omits_delete_flag_unless_set() {
        let keep = serde_json::to_value(RemoveArguments {
            ids: &["abc"],
            delete_local_data: false,
        })
        .unwrap();
        assert!(keep.get("delete-local-data").is_none());

        let purge = serde_json::to_value(RemoveArguments {
            ids: &["abc"],
            delete_local_data: true,
        })
        .unwrap();
        assert_eq!(purge["delete-local-data"], true);
    }

    #[test]
    fn session_stats_reads_torrent_count() {
        let stats: SessionStats =
            serde_json::from_value(serde_json::json!({"torrentCount": 12, "downloadSpeed": 5}))
                .unwrap();
        assert_eq!(stats.torrent_count, 12);
    }
}
