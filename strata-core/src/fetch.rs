//! Archive download, verification and extraction
//!
//! `ArchiveFetcher` is the collaborator a dataset source calls on rank 0 to
//! materialize its files. `HttpArchiveFetcher` downloads over HTTP(S) with
//! reqwest, verifies a checksum and unpacks single-file `.gz`/`.xz` archives
//! next to the download.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, StrataError};
use crate::idx::compression::{strip_compression_suffix, Compression};
use crate::metrics::standard;
use crate::runtime::{IoRuntime, RuntimeConfig};

const CHUNK_SIZE: usize = 1024 * 1024;

/// Expected digest of a downloaded archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Checksum {
    /// Lowercase hex MD5 digest
    Md5(String),
    /// CRC32C value
    Crc32c(u32),
}

impl Checksum {
    /// Digest of `path` in the same scheme as `self`
    pub fn compute(&self, path: &Path) -> Result<Checksum> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut buf = vec![0u8; CHUNK_SIZE];
        match self {
            Checksum::Md5(_) => {
                let mut ctx = md5::Context::new();
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    ctx.consume(&buf[..n]);
                }
                Ok(Checksum::Md5(format!("{:x}", ctx.compute())))
            }
            Checksum::Crc32c(_) => {
                let mut crc = 0u32;
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    crc = crc32c::crc32c_append(crc, &buf[..n]);
                }
                Ok(Checksum::Crc32c(crc))
            }
        }
    }

    /// Check a buffer against this digest
    pub fn matches_bytes(&self, data: &[u8]) -> bool {
        match self {
            Checksum::Md5(expected) => format!("{:x}", md5::compute(data)) == *expected,
            Checksum::Crc32c(expected) => crc32c::crc32c(data) == *expected,
        }
    }
}

impl FromStr for Checksum {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StrataError::InvalidConfig {
            reason: format!("unrecognized checksum '{}'", s),
        };
        let is_md5 = |hex: &str| hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit());

        if let Some(hex) = s.strip_prefix("md5:") {
            return is_md5(hex)
                .then(|| Checksum::Md5(hex.to_ascii_lowercase()))
                .ok_or_else(invalid);
        }
        if let Some(value) = s.strip_prefix("crc32c:") {
            let parsed = match value.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => value.parse(),
            };
            return parsed.map(Checksum::Crc32c).map_err(|_| invalid());
        }
        if is_md5(s) {
            return Ok(Checksum::Md5(s.to_ascii_lowercase()));
        }
        Err(invalid())
    }
}

impl TryFrom<String> for Checksum {
    type Error = StrataError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::Md5(hex) => write!(f, "md5:{}", hex),
            Checksum::Crc32c(v) => write!(f, "crc32c:{}", v),
        }
    }
}

/// Returns true if `path` is a file and, when a checksum is given, matches it
pub fn check_integrity(path: &Path, checksum: Option<&Checksum>) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    match checksum {
        None => Ok(true),
        Some(expected) => Ok(expected.compute(path)? == *expected),
    }
}

/// Unpack a single-file archive beside itself and return the unpacked path
///
/// `.gz` and `.xz` files are decompressed to their stem; other plain files are
/// returned unchanged. Multi-file containers are not supported.
pub fn extract_archive(archive: &Path) -> Result<PathBuf> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let multi_file = [".tar", ".tar.gz", ".tgz", ".tar.xz", ".zip"];
    if multi_file.iter().any(|ext| name.ends_with(ext)) {
        return Err(StrataError::UnsupportedArchive {
            path: archive.to_path_buf(),
        });
    }

    let compression = Compression::from_path(archive);
    if compression == Compression::None {
        return Ok(archive.to_path_buf());
    }

    let target = strip_compression_suffix(archive);
    let partial = with_suffix(&target, ".part");
    {
        let mut reader = compression.reader(BufReader::new(File::open(archive)?));
        let mut out = File::create(&partial)?;
        io::copy(&mut reader, &mut out).map_err(|e| {
            StrataError::format(format!("failed to unpack {}: {}", archive.display(), e))
        })?;
        out.sync_all()?;
    }
    fs::rename(&partial, &target)?;
    debug!("Extracted {} to {}", archive.display(), target.display());
    Ok(target)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Downloads, verifies and unpacks one archive
pub trait ArchiveFetcher: Send + Sync + fmt::Debug {
    /// Fetch `url` into `dest_dir`, verify it against `checksum` and extract
    /// it there, returning the extracted path
    fn fetch_and_verify(&self, url: &str, dest_dir: &Path, checksum: &Checksum) -> Result<PathBuf>;
}

/// Configuration for HTTP fetching
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Delete the archive after a successful extraction
    pub remove_archive: bool,
    pub runtime: RuntimeConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 600,
            remove_archive: false,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// `ArchiveFetcher` over HTTP(S)
///
/// A failed `https://` transfer or checksum is retried once over `http://`.
pub struct HttpArchiveFetcher {
    client: Client,
    runtime: IoRuntime,
    config: FetchConfig,
}

impl HttpArchiveFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| StrataError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        let runtime = IoRuntime::new(config.runtime.clone())?;
        Ok(Self {
            client,
            runtime,
            config,
        })
    }

    /// Stream `url` into `path`, returning the byte count
    fn download(&self, url: &str, path: &Path) -> Result<u64> {
        let fetch_err = |reason: String| StrataError::Fetch {
            url: url.to_string(),
            reason,
        };

        self.runtime.block_on(async {
            let mut resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| fetch_err(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(fetch_err(format!("status {}", resp.status())));
            }

            let mut out = File::create(path)?;
            let mut written = 0u64;
            while let Some(chunk) = resp.chunk().await.map_err(|e| fetch_err(e.to_string()))? {
                out.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            out.sync_all()?;
            Ok::<u64, StrataError>(written)
        })
    }

    /// One download attempt into `archive`, verified before it is renamed in
    fn fetch_once(&self, url: &str, archive: &Path, checksum: &Checksum) -> Result<()> {
        let partial = with_suffix(archive, ".part");
        info!("Downloading {} to {}", url, archive.display());

        let start = Instant::now();
        let result = self.download(url, &partial).and_then(|bytes| {
            standard::BYTES_FETCHED.inc_by(bytes);
            let actual = checksum.compute(&partial)?;
            if actual != *checksum {
                return Err(StrataError::Integrity {
                    path: archive.to_path_buf(),
                    expected: checksum.to_string(),
                    actual: actual.to_string(),
                });
            }
            Ok(bytes)
        });
        standard::FETCH_DURATION.observe(start.elapsed().as_secs_f64());

        match result {
            Ok(bytes) => {
                fs::rename(&partial, archive)?;
                debug!("Fetched {} bytes from {}", bytes, url);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for HttpArchiveFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpArchiveFetcher")
            .field("config", &self.config)
            .finish()
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    fn fetch_and_verify(&self, url: &str, dest_dir: &Path, checksum: &Checksum) -> Result<PathBuf> {
        let filename = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StrataError::Fetch {
                url: url.to_string(),
                reason: "URL has no file name".into(),
            })?;
        fs::create_dir_all(dest_dir)?;
        let archive = dest_dir.join(filename);

        if check_integrity(&archive, Some(checksum))? {
            info!("Using downloaded and verified file: {}", archive.display());
        } else {
            match self.fetch_once(url, &archive, checksum) {
                Err(e) if e.is_retryable() && url.starts_with("https:") => {
                    let fallback = url.replacen("https:", "http:", 1);
                    warn!("Fetch of {} failed ({}); trying {}", url, e, fallback);
                    self.fetch_once(&fallback, &archive, checksum)?;
                }
                other => other?,
            }
        }

        let extracted = extract_archive(&archive)?;
        if self.config.remove_archive && extracted != archive {
            fs::remove_file(&archive)?;
        }
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idx::compression::compress;

    #[test]
    fn test_parse_checksum() {
        let md5: Checksum = "md5:F68B3C2DCBEAADA9FBDD348BBDEB9487".parse().unwrap();
        assert_eq!(
            md5,
            Checksum::Md5("f68b3c2dcbeaada9fbdd348bbdeb9487".into())
        );
        let bare: Checksum = "d53e105ee54ea40749a09fcbcd1e9432".parse().unwrap();
        assert!(matches!(bare, Checksum::Md5(_)));
        assert_eq!("crc32c:42".parse::<Checksum>().unwrap(), Checksum::Crc32c(42));
        assert_eq!("crc32c:0x2a".parse::<Checksum>().unwrap(), Checksum::Crc32c(42));
        assert!("sha1:abc".parse::<Checksum>().is_err());
        assert!("md5:abc".parse::<Checksum>().is_err());
    }

    #[test]
    fn test_checksum_serde_as_string() {
        let c = Checksum::Crc32c(7);
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"crc32c:7\"");
        let back: Checksum = serde_json::from_str("\"crc32c:7\"").unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_compute_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();

        let expected = Checksum::Md5("5d41402abc4b2a76b9719d911017c592".into());
        assert!(check_integrity(&path, Some(&expected)).unwrap());
        assert!(expected.matches_bytes(b"hello"));

        let crc = Checksum::Crc32c(crc32c::crc32c(b"hello"));
        assert!(check_integrity(&path, Some(&crc)).unwrap());
        assert!(!check_integrity(&dir.path().join("absent"), None).unwrap());
    }

    #[test]
    fn test_extract_gzip_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("labels-idx1-ubyte.gz");
        fs::write(&archive, compress(b"payload", Compression::Gzip).unwrap()).unwrap();

        let extracted = extract_archive(&archive).unwrap();
        assert_eq!(extracted, dir.path().join("labels-idx1-ubyte"));
        assert_eq!(fs::read(&extracted).unwrap(), b"payload");
    }

    #[test]
    fn test_extract_rejects_containers() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.tar.gz");
        fs::write(&archive, b"").unwrap();
        assert!(matches!(
            extract_archive(&archive),
            Err(StrataError::UnsupportedArchive { .. })
        ));
    }
}
