//! Resolution of the runtime bundle: the prelude every program runs on top of.
//!
//! Sources are tried in order until one yields a valid bundle. A bundle is
//! valid when its first line is the `# microbit-runtime <version>` header and
//! the rest parses.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::HostError;
use crate::config::RuntimeConfig;
use crate::script::{parse, Program};

const HEADER_PREFIX: &str = "# microbit-runtime ";

/// The prelude compiled into the crate.
pub const BUNDLED_PRELUDE: &str = include_str!("prelude.py");

const REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Somewhere a runtime bundle can be fetched from.
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Human-readable location, used in diagnostics.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<String>;
}

/// The prelude shipped with the crate.
pub struct BundledSource;

#[async_trait]
impl BundleSource for BundledSource {
    fn describe(&self) -> String {
        "bundled prelude".to_string()
    }

    async fn fetch(&self) -> Result<String> {
        Ok(BUNDLED_PRELUDE.to_string())
    }
}

pub struct FileSource {
    pub path: PathBuf,
}

#[async_trait]
impl BundleSource for FileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn fetch(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read runtime bundle {}", self.path.display()))
    }
}

pub struct UrlSource {
    pub url: String,
}

#[async_trait]
impl BundleSource for UrlSource {
    fn describe(&self) -> String {
        format!("url {}", self.url)
    }

    async fn fetch(&self) -> Result<String> {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || {
            let agent = ureq::AgentBuilder::new().timeout(REMOTE_TIMEOUT).build();
            let response = agent
                .get(&url)
                .call()
                .with_context(|| format!("GET {} failed", url))?;
            response
                .into_string()
                .with_context(|| format!("Failed to read body from {}", url))
        })
        .await
        .map_err(|e| anyhow!("runtime download task failed: {}", e))?
    }
}

/// A validated runtime bundle.
#[derive(Debug, Clone)]
pub struct RuntimeBundle {
    pub version: String,
    /// Where it was loaded from.
    pub origin: String,
    pub program: Program,
}

impl RuntimeBundle {
    pub fn from_text(text: &str, origin: impl Into<String>) -> Result<Self> {
        let first = text.lines().next().unwrap_or_default().trim();
        let Some(version) = first.strip_prefix(HEADER_PREFIX) else {
            bail!("missing '{}<version>' header", HEADER_PREFIX);
        };
        let version = version.trim();
        if version.is_empty() {
            bail!("empty runtime version");
        }
        let program = parse(text).map_err(|e| anyhow!("runtime bundle does not parse: {}", e))?;
        Ok(Self {
            version: version.to_string(),
            origin: origin.into(),
            program,
        })
    }
}

/// Local sources first (the configured file, or the bundled prelude), then
/// the remote fallback.
pub fn sources_from_config(config: &RuntimeConfig) -> Vec<Box<dyn BundleSource>> {
    let mut sources: Vec<Box<dyn BundleSource>> = Vec::new();
    match &config.local_path {
        Some(path) => sources.push(Box::new(FileSource { path: path.clone() })),
        None => sources.push(Box::new(BundledSource)),
    }
    if let Some(url) = &config.remote_url {
        sources.push(Box::new(UrlSource { url: url.clone() }));
    }
    sources
}

/// Try each source in order and return the first valid bundle.
pub async fn load_runtime(sources: &[Box<dyn BundleSource>]) -> Result<RuntimeBundle, HostError> {
    let mut attempts = Vec::new();
    for source in sources {
        let origin = source.describe();
        let loaded = source
            .fetch()
            .await
            .and_then(|text| RuntimeBundle::from_text(&text, origin.clone()));
        match loaded {
            Ok(bundle) => {
                info!(origin = %origin, version = %bundle.version, "runtime loaded");
                return Ok(bundle);
            }
            Err(e) => {
                warn!(origin = %origin, error = %e, "runtime source failed");
                attempts.push(format!("{}: {:#}", origin, e));
            }
        }
    }
    debug!(attempts = attempts.len(), "no runtime source succeeded");
    Err(HostError::RuntimeUnavailable { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Failing;

    #[async_trait]
    impl BundleSource for Failing {
        fn describe(&self) -> String {
            "unreachable mirror".to_string()
        }

        async fn fetch(&self) -> Result<String> {
            bail!("connection refused")
        }
    }

    #[test]
    fn test_bundled_prelude_is_valid() {
        let bundle = RuntimeBundle::from_text(BUNDLED_PRELUDE, "bundled").unwrap();
        assert_eq!(bundle.version, "1.0");
    }

    #[test]
    fn test_header_is_required() {
        assert!(RuntimeBundle::from_text("x = 1\n", "test").is_err());
        assert!(RuntimeBundle::from_text("# microbit-runtime 2\nx = (\n", "test").is_err());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# microbit-runtime 9.9").unwrap();
        writeln!(file, "answer = 42").unwrap();

        let sources: Vec<Box<dyn BundleSource>> = vec![
            Box::new(Failing),
            Box::new(FileSource {
                path: file.path().to_path_buf(),
            }),
        ];
        let bundle = load_runtime(&sources).await.unwrap();
        assert_eq!(bundle.version, "9.9");
        assert!(bundle.origin.starts_with("file "));
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_fatal() {
        let sources: Vec<Box<dyn BundleSource>> = vec![
            Box::new(Failing),
            Box::new(FileSource {
                path: PathBuf::from("/nonexistent/runtime.py"),
            }),
        ];
        let err = load_runtime(&sources).await.unwrap_err();
        let HostError::RuntimeUnavailable { attempts } = &err else {
            panic!("unexpected error {:?}", err);
        };
        assert_eq!(attempts.len(), 2);
        assert!(err.to_string().contains("unreachable mirror"));
    }

    #[test]
    fn test_sources_from_config() {
        let mut config = RuntimeConfig::default();
        assert_eq!(sources_from_config(&config)[0].describe(), "bundled prelude");
        config.local_path = Some(PathBuf::from("/opt/rt.py"));
        config.remote_url = Some("https://example.invalid/rt.py".into());
        let described: Vec<String> = sources_from_config(&config).iter().map(|s| s.describe()).collect();
        assert_eq!(
            described,
            vec!["file /opt/rt.py", "url https://example.invalid/rt.py"]
        );
    }
}
