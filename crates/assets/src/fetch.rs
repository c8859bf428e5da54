use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[cfg(not(target_arch = "wasm32"))]
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid asset location '{0}'")]
    InvalidLocation(String),
    #[error("{0} is not valid UTF-8 text")]
    NotUtf8(String),
    #[error("{0} is empty")]
    Empty(String),
    /// Failure reported by a host environment that has no richer error type.
    #[error("{0}")]
    Host(String),
}

/// Source of raw shader text and texture bytes, addressed by relative path.
pub trait AssetFetcher: Send + Sync {
    /// Human readable origin for log lines.
    fn describe(&self) -> String;

    fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetches text that must never be served from a stale cache.
    fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(path)?;
        String::from_utf8(bytes).map_err(|_| FetchError::NotUtf8(path.to_string()))
    }
}

/// Picks an HTTP fetcher for `http(s)://` bases and a directory fetcher otherwise.
pub fn fetcher_for(base: &str) -> Result<Arc<dyn AssetFetcher>, FetchError> {
    let trimmed = base.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        #[cfg(not(target_arch = "wasm32"))]
        {
            return Ok(Arc::new(HttpFetcher::new(trimmed)?));
        }
        #[cfg(target_arch = "wasm32")]
        {
            return Err(FetchError::InvalidLocation(trimmed.to_string()));
        }
    }
    Ok(Arc::new(DirectoryFetcher::new(trimmed)))
}

/// Appends a `v=<token>` query parameter so intermediaries cannot serve a cached copy.
pub fn cache_busted(url: &str, token: u128) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}v={token}")
}

/// Milliseconds since the Unix epoch, used as the cache-busting token.
pub fn cache_token() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

#[cfg(not(target_arch = "wasm32"))]
pub use http::HttpFetcher;

#[cfg(not(target_arch = "wasm32"))]
mod http {
    use reqwest::blocking::Client;
    use reqwest::Url;
    use tracing::debug;

    use super::{cache_busted, cache_token, AssetFetcher, FetchError};

    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        http: Client,
        base: Url,
    }

    impl HttpFetcher {
        pub fn new(base: &str) -> Result<Self, FetchError> {
            let mut normalized = base.to_string();
            if !normalized.ends_with('/') {
                normalized.push('/');
            }
            let base = Url::parse(&normalized)
                .map_err(|_| FetchError::InvalidLocation(base.to_string()))?;
            let http = Client::builder()
                .build()
                .map_err(|source| FetchError::Http {
                    url: base.to_string(),
                    source,
                })?;
            Ok(Self { http, base })
        }

        pub fn base(&self) -> &Url {
            &self.base
        }

        fn resolve(&self, path: &str) -> Result<Url, FetchError> {
            self.base
                .join(path.trim_start_matches('/'))
                .map_err(|_| FetchError::InvalidLocation(path.to_string()))
        }

        fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            debug!(%url, "fetching asset");
            let response = self
                .http
                .get(url)
                .send()
                .map_err(|source| FetchError::Http {
                    url: url.to_string(),
                    source,
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
            Ok(bytes.to_vec())
        }
    }

    impl AssetFetcher for HttpFetcher {
        fn describe(&self) -> String {
            self.base.to_string()
        }

        fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError> {
            let url = self.resolve(path)?;
            self.get(url.as_str())
        }

        fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
            let url = self.resolve(path)?;
            let bytes = self.get(&cache_busted(url.as_str(), cache_token()))?;
            String::from_utf8(bytes).map_err(|_| FetchError::NotUtf8(path.to_string()))
        }
    }
}

/// Reads assets from a local directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|part| matches!(part, std::path::Component::ParentDir))
        {
            return Err(FetchError::InvalidLocation(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetFetcher for DirectoryFetcher {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let full = self.resolve(path)?;
        debug!(path = %full.display(), "reading asset");
        fs::read(&full).map_err(|source| FetchError::Io { path: full, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_cache_token() {
        assert_eq!(
            cache_busted("https://host/shader/simple.vert", 42),
            "https://host/shader/simple.vert?v=42"
        );
        assert_eq!(cache_busted("https://host/a?x=1", 7), "https://host/a?x=1&v=7");
    }

    #[test]
    fn directory_fetcher_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shader")).unwrap();
        std::fs::write(dir.path().join("shader/simple.vert"), "void main() {}").unwrap();

        let fetcher = DirectoryFetcher::new(dir.path());
        assert_eq!(
            fetcher.fetch_text("shader/simple.vert").unwrap(),
            "void main() {}"
        );
        assert!(matches!(
            fetcher.fetch_text("shader/missing.frag"),
            Err(FetchError::Io { .. })
        ));
    }

    #[test]
    fn directory_fetcher_rejects_parent_components() {
        let fetcher = DirectoryFetcher::new("/tmp");
        assert!(matches!(
            fetcher.fetch_bytes("../etc/passwd"),
            Err(FetchError::InvalidLocation(_))
        ));
    }

    #[test]
    fn selects_fetcher_from_base() {
        let http = fetcher_for("https://example.org/blackhole").unwrap();
        assert_eq!(http.describe(), "https://example.org/blackhole/");
        let dir = fetcher_for("blackhole").unwrap();
        assert_eq!(dir.describe(), "blackhole");
    }
}
