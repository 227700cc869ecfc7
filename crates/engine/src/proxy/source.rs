//! Proxy sources

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::model::{Proxy, ProxyError, ProxyType};

/// Somewhere proxies can be (re)loaded from
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Human readable name for logs
    fn name(&self) -> String;

    /// Load the current proxy list
    async fn fetch(&self) -> Result<Vec<Proxy>, ProxyError>;
}

/// Parse a newline separated proxy list
///
/// Blank lines and `#` comments are ignored. Malformed lines are returned
/// separately so callers can decide whether to log or reject them.
pub fn parse_proxy_lines(text: &str, default_type: ProxyType) -> (Vec<Proxy>, Vec<ProxyError>) {
    let mut proxies = Vec::new();
    let mut errors = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Proxy::parse(line, default_type) {
            Ok(proxy) => proxies.push(proxy),
            Err(e) => errors.push(e),
        }
    }

    (proxies, errors)
}

fn log_rejected(source: &str, errors: &[ProxyError]) {
    if let Some(first) = errors.first() {
        warn!(source, rejected = errors.len(), first = %first, "Skipped malformed proxies");
    }
}

/// In-memory list of proxy lines
#[derive(Debug, Clone)]
pub struct ListProxySource {
    lines: Vec<String>,
    default_type: ProxyType,
}

impl ListProxySource {
    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = S>, default_type: ProxyType) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            default_type,
        }
    }
}

#[async_trait]
impl ProxySource for ListProxySource {
    fn name(&self) -> String {
        format!("list({})", self.lines.len())
    }

    async fn fetch(&self) -> Result<Vec<Proxy>, ProxyError> {
        let (proxies, errors) = parse_proxy_lines(&self.lines.join("\n"), self.default_type);
        log_rejected(&self.name(), &errors);
        Ok(proxies)
    }
}

/// Proxy list file, re-read on every fetch
#[derive(Debug, Clone)]
pub struct FileProxySource {
    path: PathBuf,
    default_type: ProxyType,
}

impl FileProxySource {
    pub fn new(path: impl Into<PathBuf>, default_type: ProxyType) -> Self {
        Self {
            path: path.into(),
            default_type,
        }
    }
}

#[async_trait]
impl ProxySource for FileProxySource {
    fn name(&self) -> String {
        format!("file({})", self.path.display())
    }

    async fn fetch(&self) -> Result<Vec<Proxy>, ProxyError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ProxyError::Source {
                source_name: self.name(),
                message: e.to_string(),
            })?;

        let (proxies, errors) = parse_proxy_lines(&text, self.default_type);
        log_rejected(&self.name(), &errors);
        Ok(proxies)
    }
}

/// Serializable description of a proxy source, stored in job options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxySourceSpec {
    List {
        proxies: Vec<String>,
        #[serde(default)]
        default_type: ProxyType,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        default_type: ProxyType,
    },
}

impl ProxySourceSpec {
    /// Instantiate the source
    pub fn build(&self) -> Arc<dyn ProxySource> {
        match self {
            Self::List {
                proxies,
                default_type,
            } => Arc::new(ListProxySource::new(proxies.clone(), *default_type)),
            Self::File { path, default_type } => {
                Arc::new(FileProxySource::new(path.clone(), *default_type))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_lines_skips_comments_and_blanks() {
        let text = "# office proxies\n10.0.0.1:80\n\n  (socks5)10.0.0.2:1080  \nbroken\n";
        let (proxies, errors) = parse_proxy_lines(text, ProxyType::Http);

        assert_eq!(proxies.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(proxies[1].proxy_type, ProxyType::Socks5);
    }

    #[tokio::test]
    async fn test_list_source() {
        let source = ListProxySource::new(["1.1.1.1:80", "2.2.2.2:81:u:p"], ProxyType::Http);
        let proxies = source.fetch().await.unwrap();

        assert_eq!(proxies.len(), 2);
        assert_eq!(source.name(), "list(2)");
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "3.3.3.3:3128").unwrap();
        writeln!(file, "socks5://4.4.4.4:1080").unwrap();

        let source = FileProxySource::new(file.path(), ProxyType::Http);
        let proxies = source.fetch().await.unwrap();

        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[1].proxy_type, ProxyType::Socks5);
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let source = FileProxySource::new("/nonexistent/proxies.txt", ProxyType::Http);
        assert!(matches!(
            source.fetch().await,
            Err(ProxyError::Source { .. })
        ));
    }

    #[test]
    fn test_spec_serialization() {
        let spec: ProxySourceSpec =
            serde_json::from_str(r#"{"type": "file", "path": "proxies.txt"}"#).unwrap();
        assert_eq!(
            spec,
            ProxySourceSpec::File {
                path: "proxies.txt".into(),
                default_type: ProxyType::Http
            }
        );
    }
}
