//! Turning user-supplied job sources into a canonical source and job hash.

use std::sync::LazyLock;

use base32::Alphabet;
use regex::Regex;
use url::Url;

use crate::{Error, Result};

const MAGNET_SCHEME: &str = "magnet";
const BTIH_PREFIX: &str = "urn:btih:";

/// A hex info-hash run anywhere in the input, e.g. inside a cache URL.
static HASH_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([0-9a-f]{32,40})\b").unwrap());

/// A source the daemons can consume, plus the job's lower-case hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source: String,
    pub hash: String,
}

pub trait SourceResolver: Send + Sync + 'static {
    fn resolve(&self, source: &str) -> Result<Resolved>;
}

/// Resolves magnet links and hash-bearing URLs without touching the network.
///
/// Non-magnet inputs are rewritten to a bare magnet so a daemon never has to
/// download a metadata file from a third party.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagnetResolver;

impl MagnetResolver {
    pub fn new() -> Self {
        Self
    }
}

impl SourceResolver for MagnetResolver {
    fn resolve(&self, source: &str) -> Result<Resolved> {
        let source = source.trim();

        if let Ok(url) = Url::parse(source)
            && url.scheme().eq_ignore_ascii_case(MAGNET_SCHEME)
        {
            let hash = magnet_hash(&url).ok_or_else(|| {
                Error::resolve(source, "magnet link carries no usable btih topic")
            })?;
            return Ok(Resolved {
                source: source.to_string(),
                hash,
            });
        }

        let Some(found) = HASH_RUN_REGEX.captures(source).and_then(|c| c.get(1)) else {
            return Err(Error::resolve(source, "no info-hash found"));
        };

        let hash = found.as_str().to_ascii_lowercase();
        Ok(Resolved {
            source: magnet_for(&hash),
            hash,
        })
    }
}

pub fn magnet_for(hash: &str) -> String {
    format!("{MAGNET_SCHEME}:?xt={BTIH_PREFIX}{hash}")
}

fn magnet_hash(url: &Url) -> Option<String> {
    url.query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, topic)| {
            let topic = topic.to_ascii_lowercase();
            topic.strip_prefix(BTIH_PREFIX).and_then(normalize_btih)
        })
}

fn normalize_btih(value: &str) -> Option<String> {
    match value.len() {
        40 if value.bytes().all(|b| b.is_ascii_hexdigit()) => Some(value.to_ascii_lowercase()),
        32 => base32_to_hex(value),
        _ => None,
    }
}

/// Decode an RFC 4648 base32 string (no padding) into lower-case hex.
fn base32_to_hex(value: &str) -> Option<String> {
    let bytes = base32::decode(
        Alphabet::Rfc4648 { padding: false },
        &value.to_ascii_uppercase(),
    )?;
    Some(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

    #[test]
    fn test_hex_magnet_keeps_source() {
        let magnet = format!("magnet:?xt=urn:btih:{}&dn=ubuntu", HEX.to_uppercase());
        let resolved = MagnetResolver.resolve(&magnet).unwrap();

        assert_eq!(resolved.hash, HEX);
        assert_eq!(resolved.source, magnet);
    }

    #[test]
    fn test_base32_magnet_is_converted() {
        let resolved = MagnetResolver
            .resolve("magnet:?xt=urn:btih:YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKEK")
            .unwrap();
        assert_eq!(resolved.hash, HEX);
    }

    #[test]
    fn test_hash_bearing_url_is_rewritten_to_magnet() {
        let url = format!("http://torcache.example/torrent/{}.torrent", HEX.to_uppercase());
        let resolved = MagnetResolver.resolve(&url).unwrap();

        assert_eq!(resolved.hash, HEX);
        assert_eq!(resolved.source, format!("magnet:?xt=urn:btih:{HEX}"));
    }

    #[test]
    fn test_unresolvable_inputs() {
        assert!(matches!(
            MagnetResolver.resolve("http://example.com/file.torrent"),
            Err(Error::Resolve { .. })
        ));
        assert!(MagnetResolver.resolve("magnet:?dn=nothing").is_err());
        assert!(MagnetResolver.resolve("magnet:?xt=urn:btih:xyz").is_err());
    }

    #[test]
    fn test_base32_decoding() {
        assert_eq!(base32_to_hex("MZXW6YTB").as_deref(), Some("666f6f6261"));
        assert_eq!(base32_to_hex("mzxw6ytb").as_deref(), Some("666f6f6261"));
        assert_eq!(base32_to_hex("MZ!W6YTB"), None);
    }

    #[test]
    fn test_overlong_hex_run_is_not_truncated() {
        let url = format!("http://torcache.example/torrent/{HEX}0.torrent");
        assert!(MagnetResolver.resolve(&url).is_err());

        let url = format!("http://torcache.example/torrent/x{HEX}.torrent");
        assert!(MagnetResolver.resolve(&url).is_err());
    }
}
