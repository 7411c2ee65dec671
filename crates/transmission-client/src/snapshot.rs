//! Job snapshot model.
//!
//! A [`JobSnapshot`] is built from the raw record a daemon returns for
//! `torrent-get`. It is immutable; every poll produces a fresh one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grace period before a downloading job without sources counts as seedless.
pub const SEED_GRACE_MINUTES: i64 = 5;

/// Grace period for private jobs, which usually take longer to find peers.
pub const PRIVATE_SEED_GRACE_MINUTES: i64 = 10;

/// Fields requested from the daemon for every snapshot.
pub const SNAPSHOT_FIELDS: &[&str] = &[
    "id",
    "hashString",
    "name",
    "status",
    "addedDate",
    "percentDone",
    "totalSize",
    "eta",
    "rateDownload",
    "rateUpload",
    "errorString",
    "error",
    "isFinished",
    "isPrivate",
    "isStalled",
    "peers",
    "peersConnected",
    "downloadDir",
];

/// Daemon status codes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Stopped,
    CheckingWait,
    Checking,
    DownloadingWait,
    Downloading,
    SeedingWait,
    Seeding,
    Isolated,
}

impl JobStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Stopped),
            1 => Some(Self::CheckingWait),
            2 => Some(Self::Checking),
            3 => Some(Self::DownloadingWait),
            4 => Some(Self::Downloading),
            5 => Some(Self::SeedingWait),
            6 => Some(Self::Seeding),
            7 => Some(Self::Isolated),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::CheckingWait => 1,
            Self::Checking => 2,
            Self::DownloadingWait => 3,
            Self::Downloading => 4,
            Self::SeedingWait => 5,
            Self::Seeding => 6,
            Self::Isolated => 7,
        }
    }
}

/// A peer entry as reported by the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPeer {
    pub address: String,
    pub progress: f64,
    pub is_downloading_from: bool,
}

impl RawPeer {
    fn is_seed(&self) -> bool {
        self.progress == 1.0
    }
}

/// A job record exactly as the daemon serialises it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTorrent {
    pub id: i64,
    pub hash_string: String,
    pub name: String,
    pub status: i64,
    pub added_date: i64,
    pub percent_done: f64,
    pub total_size: i64,
    pub eta: i64,
    pub rate_download: i64,
    pub rate_upload: i64,
    pub error_string: String,
    pub error: i64,
    pub is_finished: bool,
    pub is_private: bool,
    pub is_stalled: bool,
    pub peers: Vec<RawPeer>,
    pub peers_connected: i64,
    pub download_dir: String,
}

/// Point-in-time view of a job on one member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: i64,
    pub hash: String,
    pub name: String,
    pub status_code: i64,
    pub status: Option<JobStatus>,
    pub added_at: DateTime<Utc>,
    pub percent_done: f64,
    pub total_size: i64,
    pub eta: i64,
    pub download_rate: i64,
    pub upload_rate: i64,
    pub error: i64,
    pub error_message: String,
    pub is_finished: bool,
    pub is_private: bool,
    pub is_stalled: bool,
    pub peers_in_swarm: usize,
    pub peers_connected: usize,
    pub seeds_in_swarm: usize,
    pub seeds_connected: usize,
    pub reported_peers_connected: i64,
    pub download_dir: String,
    pub host: String,
}

impl JobSnapshot {
    pub fn from_raw(raw: RawTorrent, host: impl Into<String>) -> Self {
        let (seeds, peers): (Vec<&RawPeer>, Vec<&RawPeer>) =
            raw.peers.iter().partition(|peer| peer.is_seed());

        let seeds_connected = seeds.iter().filter(|p| p.is_downloading_from).count();
        let peers_connected = peers.iter().filter(|p| p.is_downloading_from).count();

        Self {
            id: raw.id,
            hash: raw.hash_string.to_lowercase(),
            name: raw.name,
            status_code: raw.status,
            status: JobStatus::from_code(raw.status),
            added_at: DateTime::from_timestamp(raw.added_date, 0).unwrap_or(DateTime::UNIX_EPOCH),
            percent_done: raw.percent_done,
            total_size: raw.total_size,
            eta: raw.eta,
            download_rate: raw.rate_download,
            upload_rate: raw.rate_upload,
            error: raw.error,
            error_message: raw.error_string,
            is_finished: raw.is_finished,
            is_private: raw.is_private,
            is_stalled: raw.is_stalled,
            peers_in_swarm: peers.len(),
            peers_connected,
            seeds_in_swarm: seeds.len(),
            seeds_connected,
            reported_peers_connected: raw.peers_connected,
            download_dir: raw.download_dir,
            host: host.into(),
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.status == Some(JobStatus::Downloading)
    }

    pub fn is_completed(&self) -> bool {
        self.percent_done == 1.0
    }

    pub fn has_error(&self) -> bool {
        self.error != 0
    }

    pub fn has_seeds(&self) -> bool {
        self.has_seeds_at(Utc::now())
    }

    /// Seed check evaluated at `now`.
    ///
    /// A downloading job with no connected seeds and fewer than two connected
    /// peers is seedless once its grace period has run out.
    pub fn has_seeds_at(&self, now: DateTime<Utc>) -> bool {
        let starved =
            self.is_downloading() && self.seeds_connected == 0 && self.peers_connected < 2;
        if !starved {
            return true;
        }

        let grace = if self.is_private {
            PRIVATE_SEED_GRACE_MINUTES
        } else {
            SEED_GRACE_MINUTES
        };

        (now - self.added_at).num_minutes() <= grace
    }

    pub fn percent_label(&self) -> String {
        format!("{:.0}%", self.percent_done * 100.0)
    }

    pub fn status_label(&self) -> &str {
        match &self.status {
            Some(status) => status.as_ref(),
            None => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn peer(progress: f64, is_downloading_from: bool) -> RawPeer {
        RawPeer {
            address: "10.1.1.1".into(),
            progress,
            is_downloading_from,
        }
    }

    fn starving(added_minutes_ago: i64, is_private: bool) -> JobSnapshot {
        let now = Utc::now();
        let raw = RawTorrent {
            hash_string: "ABCDEF0123456789ABCDEF0123456789ABCDEF01".into(),
            status: 4,
            added_date: (now - Duration::minutes(added_minutes_ago)).timestamp(),
            is_private,
            peers: vec![peer(0.2, true), peer(1.0, false)],
            ..Default::default()
        };
        JobSnapshot::from_raw(raw, "10.0.0.1")
    }

    #[test]
    fn status_codes_map_to_labels() {
        assert_eq!(JobStatus::from_code(4), Some(JobStatus::Downloading));
        assert_eq!(JobStatus::from_code(1).unwrap().to_string(), "checking_wait");
        assert_eq!(JobStatus::from_code(8), None);
        assert_eq!(JobStatus::Isolated.code(), 7);
    }

    #[test]
    fn peers_are_split_into_seeds_and_leechers() {
        let raw = RawTorrent {
            hash_string: "AA".into(),
            peers: vec![
                peer(1.0, true),
                peer(1.0, false),
                peer(0.5, true),
                peer(0.5, true),
                peer(0.1, false),
            ],
            ..Default::default()
        };
        let snapshot = JobSnapshot::from_raw(raw, "h");
        assert_eq!(snapshot.hash, "aa");
        assert_eq!(snapshot.seeds_in_swarm, 2);
        assert_eq!(snapshot.seeds_connected, 1);
        assert_eq!(snapshot.peers_in_swarm, 3);
        assert_eq!(snapshot.peers_connected, 2);
    }

    #[test]
    fn seedless_after_grace_period() {
        assert!(!starving(6, false).has_seeds());
        assert!(starving(4, false).has_seeds());
    }

    #[test]
    fn private_jobs_get_a_longer_grace_period() {
        assert!(starving(6, true).has_seeds());
        assert!(!starving(11, true).has_seeds());
    }

    #[test]
    fn has_seeds_only_applies_while_downloading() {
        let mut snapshot = starving(30, false);
        snapshot.status = Some(JobStatus::Seeding);
        assert!(snapshot.has_seeds());
    }

    #[test]
    fn completion_ignores_everything_else() {
        let mut snapshot = starving(30, false);
        snapshot.percent_done = 1.0;
        snapshot.error = 3;
        snapshot.is_stalled = true;
        assert!(snapshot.is_completed());
        assert_eq!(snapshot.percent_label(), "100%");
    }

    #[test]
    fn deserializes_daemon_record() {
        let raw: RawTorrent = serde_json::from_value(serde_json::json!({
            "id": 7,
            "hashString": "CB84CCC10F296DF72D6C40BA7A07C178A4323A14",
            "name": "ubuntu.iso",
            "status": 6,
            "percentDone": 0.25,
            "peers": [{"address": "1.2.3.4", "progress": 1, "isDownloadingFrom": true}],
            "unknownField": true
        }))
        .unwrap();
        let snapshot = JobSnapshot::from_raw(raw, "10.0.0.2");
        assert_eq!(snapshot.status_label(), "seeding");
        assert_eq!(snapshot.seeds_connected, 1);
        assert_eq!(snapshot.hash, "cb84ccc10f296df72d6c40ba7a07c178a4323a14");
        assert_eq!(snapshot.host, "10.0.0.2");
    }
}
