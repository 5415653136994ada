use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::Deserialize;

use crate::{FetchError, SourceBatch, SourcePage, TextSource};

/// MediaWiki client that fetches plain-text page extracts.
///
/// Several articles can be requested in one call by joining titles with `|`.
/// MediaWiki only returns more than one extract per request in intro mode, so
/// multi-title topics are fetched with `exintro` set.
///
/// Wikimedia refuses requests without a `User-Agent`, so every request
/// carries one.
#[derive(Clone)]
pub struct WikipediaClient {
    base_url: String,
    client: reqwest::Client,
    user_agent: String,
    intro_only: bool,
}

pub const DEFAULT_USER_AGENT: &str =
    concat!("gamenet/", env!("CARGO_PKG_VERSION"), " (game article ingestion)");

#[derive(Deserialize)]
struct QueryResponse {
    query: Option<QueryBody>,
}

#[derive(Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    missing: bool,
}

impl WikipediaClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            intro_only: false,
        }
    }

    pub fn default() -> Self {
        Self::new("https://en.wikipedia.org/w/api.php".to_string())
    }

    /// Only fetch the lead section of each article.
    pub fn with_intro_only(mut self, intro_only: bool) -> Self {
        self.intro_only = intro_only;
        self
    }

    /// Identify the caller; Wikimedia asks for contact details here.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn request(&self, topic: &str) -> reqwest::RequestBuilder {
        self.client
            .get(&self.base_url)
            .header(USER_AGENT, self.user_agent.as_str())
            .query(&self.params(topic))
    }

    fn params<'a>(&self, topic: &'a str) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
            ("prop", "extracts"),
            ("explaintext", "1"),
            ("redirects", "1"),
            ("titles", topic),
        ];
        if self.intro_only || topic.contains('|') {
            params.push(("exintro", "1"));
            params.push(("exlimit", "max"));
        }
        params
    }

    fn parse(body: &str) -> Result<SourceBatch, FetchError> {
        let response: QueryResponse =
            serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        let Some(query) = response.query else {
            return Err(FetchError::Malformed("response has no query section".to_string()));
        };

        let pages = query
            .pages
            .into_iter()
            .filter(|page| !page.missing)
            .map(|page| SourcePage {
                title: page.title,
                body: page.extract,
            })
            .collect();

        Ok(SourceBatch { pages })
    }
}

#[async_trait]
impl TextSource for WikipediaClient {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, topic: &str) -> Result<SourceBatch, FetchError> {
        let url = self.base_url.clone();

        let response = self
            .request(topic)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let batch = Self::parse(&body)?;
        tracing::debug!(pages = batch.len(), "Fetched article batch");
        Ok(batch)
    }
}
