use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::PaperscoutError;

const DEFAULT_USER_AGENT: &str = "PaperScout/0.1 (literature discovery; mailto:paperscout@example.com)";

/// An HTTP client that only allows requests to approved domains.
///
/// Every bibliographic source goes through this client, so a
/// misconfigured base URL fails fast with `SecurityError` instead of leaking
/// a query to an arbitrary host.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist and a 30 s request timeout.
    pub fn new() -> Result<Self, PaperscoutError> {
        Self::with_settings(Duration::from_secs(30), DEFAULT_USER_AGENT)
    }

    /// Creates a client with an explicit per-request timeout and User-Agent.
    pub fn with_settings(timeout: Duration, user_agent: &str) -> Result<Self, PaperscoutError> {
        let mut allowlist = HashSet::new();
        let domains = [
            "api.crossref.org",        // CrossRef
            "api.openalex.org",        // OpenAlex
            "api.semanticscholar.org", // Semantic Scholar
            "export.arxiv.org",        // arXiv
            "www.ebi.ac.uk",           // Europe PMC
            "serpapi.com",             // Google Scholar via SerpAPI
            "localhost",               // Ollama local
            "127.0.0.1",               // Localhost alt
            "api.openai.com",          // OpenAI LLMs + embeddings
            "generativelanguage.googleapis.com", // Gemini
        ];

        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| PaperscoutError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Appends the host of `url` to the allowlist (used for configured base URLs).
    pub fn allow_url_host(&mut self, url: &str) {
        if let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
            self.allowlist.insert(host);
        }
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                // Exact match or a subdomain of an allowed domain
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, PaperscoutError> {
        self.request(reqwest::Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, PaperscoutError> {
        self.request(reqwest::Method::POST, url)
    }

    pub fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, PaperscoutError> {
        if !self.is_allowed(url) {
            return Err(PaperscoutError::SecurityError(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }

        Ok(self.client.request(method, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allowlist_covers_sources() {
        let c = SandboxClient::new().unwrap();
        assert!(c.is_allowed("https://api.crossref.org/works?query=x"));
        assert!(c.is_allowed("https://api.openalex.org/works"));
        assert!(c.is_allowed("http://export.arxiv.org/api/query"));
        assert!(c.is_allowed("https://www.ebi.ac.uk/europepmc/webservices/rest/search"));
        assert!(c.is_allowed("https://serpapi.com/search.json?engine=google_scholar"));
    }

    #[test]
    fn test_unknown_domain_blocked() {
        let c = SandboxClient::new().unwrap();
        assert!(!c.is_allowed("https://evil.example.com/steal"));
        assert!(c.get("https://evil.example.com/steal").is_err());
        assert!(!c.is_allowed("not a url"));
    }

    #[test]
    fn test_suffix_is_not_subdomain() {
        let c = SandboxClient::new().unwrap();
        // "notapi.crossref.org.evil.com" must not pass as a crossref subdomain
        assert!(!c.is_allowed("https://api.crossref.org.evil.com/"));
    }

    #[test]
    fn test_allow_url_host() {
        let mut c = SandboxClient::new().unwrap();
        assert!(!c.is_allowed("https://llm.internal.lab/v1/chat"));
        c.allow_url_host("https://llm.internal.lab:8443/v1");
        assert!(c.is_allowed("https://llm.internal.lab/v1/chat"));
    }
}
