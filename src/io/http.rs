use crate::config::ArchiveConfig;
use crate::types::{ArdError, ArdResult};
use std::path::Path;
use std::time::Duration;

/// True for links that need HTTP access rather than the local filesystem
pub fn is_remote(link: &str) -> bool {
    link.starts_with("http://") || link.starts_with("https://")
}

/// Blocking HTTP access to the archive with bounded retries
///
/// Local paths are read straight from disk so a mirrored archive can be used
/// with the same code path.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::blocking::Client,
    max_retries: u32,
    retry_delay: Duration,
}

/// Outcome of a single fetch attempt
enum Attempt {
    Done(Option<String>),
    Retry(ArdError),
}

impl HttpClient {
    pub fn new(config: &ArchiveConfig) -> ArdResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("ceda-ard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArdError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Fetch a text document. `Ok(None)` when the server reports 404.
    pub fn get_text(&self, link: &str) -> ArdResult<Option<String>> {
        if !is_remote(link) {
            let path = Path::new(link);
            if !path.exists() {
                return Ok(None);
            }
            return Ok(Some(std::fs::read_to_string(path)?));
        }

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            log::debug!("GET {} (attempt {} of {})", link, attempt, self.max_retries);
            match self.try_get_once(link) {
                Attempt::Done(body) => return Ok(body),
                Attempt::Retry(e) => {
                    log::debug!("Attempt {} for {} failed: {}", attempt, link, e);
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ArdError::Http(format!("Request failed after all retries: {}", link))
        }))
    }

    fn try_get_once(&self, link: &str) -> Attempt {
        let response = match self.client.get(link).send() {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(ArdError::Http(format!("HTTP request failed: {}", e))),
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Attempt::Done(None);
        }
        if !status.is_success() {
            return Attempt::Retry(ArdError::Http(format!(
                "HTTP {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                link
            )));
        }

        match response.text() {
            Ok(body) => Attempt::Done(Some(body)),
            Err(e) => Attempt::Retry(ArdError::Http(format!("Failed to read response body: {}", e))),
        }
    }

    /// Startup connectivity check. Any failure here is fatal for the run.
    pub fn probe(&self, link: &str) -> ArdResult<()> {
        if !is_remote(link) {
            return if Path::new(link).is_dir() {
                Ok(())
            } else {
                Err(ArdError::Connectivity(format!("Archive root not found: {}", link)))
            };
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match self.client.head(link).send() {
                Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                    return Ok(());
                }
                Ok(response) => last_error = format!("HTTP {}", response.status().as_u16()),
                Err(e) => last_error = e.to_string(),
            }
            if attempt < self.max_retries {
                std::thread::sleep(self.retry_delay);
            }
        }

        Err(ArdError::Connectivity(format!("{}: {}", link, last_error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://data.ceda.ac.uk/neodc"));
        assert!(!is_remote("/data/sentinel_2/2023/06/01"));
    }

    #[test]
    fn test_local_text_missing_is_none() {
        let client = HttpClient::new(&ArchiveConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nothing_meta.xml");
        assert!(client.get_text(missing.to_str().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_probe_local_root() {
        let client = HttpClient::new(&ArchiveConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(client.probe(dir.path().to_str().unwrap()).is_ok());
        let missing = dir.path().join("absent");
        assert!(matches!(
            client.probe(missing.to_str().unwrap()),
            Err(ArdError::Connectivity(_))
        ));
    }
}
