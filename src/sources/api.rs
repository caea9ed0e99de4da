use super::{AdapterResult, ApiRecord, RawRecord};
use crate::error::UpstreamError;
use crate::models::MediaType;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

/// Which upstream listing a category maps to
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiEndpoint {
    pub media_type: MediaType,
    /// Path under the API base URL, e.g. `trending/movie/day`
    pub endpoint: String,
}

impl ApiEndpoint {
    pub fn new(media_type: MediaType, endpoint: impl Into<String>) -> Self {
        Self {
            media_type,
            endpoint: endpoint.into(),
        }
    }
}

/// Direct client for the upstream metadata API.
///
/// One call per fetch; retrying is left to whoever asks again.
pub struct ApiAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiAdapter {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn url_for(&self, endpoint: &ApiEndpoint) -> String {
        format!(
            "{}/{}",
            self.base_url,
            endpoint.endpoint.trim_start_matches('/')
        )
    }

    pub async fn fetch(
        &self,
        endpoint: &ApiEndpoint,
        page: u32,
    ) -> Result<AdapterResult, UpstreamError> {
        let url = self.url_for(endpoint);
        log::debug!("Fetching {} page {}", url, page);

        let mut request = self.client.get(&url).query(&[("page", page.to_string())]);
        if !self.api_key.is_empty() {
            request = request.query(&[("api_key", self.api_key.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus(status.as_u16()));
        }

        let body = response.text().await?;
        let records = parse_results(&body)?;
        log::debug!("{} returned {} records", url, records.len());

        Ok(AdapterResult {
            media_type: endpoint.media_type,
            records,
        })
    }
}

/// Pull the `results` array out of an upstream payload.
///
/// Entries that are not objects of the expected shape are skipped.
pub fn parse_results(body: &str) -> Result<Vec<RawRecord>, UpstreamError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| UpstreamError::MalformedPayload(e.to_string()))?;

    let results = payload
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::MalformedPayload("missing results array".to_string()))?;

    Ok(results
        .iter()
        .filter_map(|entry| match ApiRecord::deserialize(entry) {
            Ok(record) => Some(RawRecord::Api(record)),
            Err(e) => {
                log::debug!("Skipping upstream entry: {}", e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{build_client, HttpClientConfig};

    #[test]
    fn test_parse_results() {
        let body = r#"{
            "page": 1,
            "results": [
                {"id": 550, "title": "Fight Club", "release_date": "1999-10-15", "poster_path": "/a.jpg"},
                {"id": 1399, "name": "Game of Thrones", "first_air_date": "2011-04-17", "media_type": "tv"},
                "not an object"
            ]
        }"#;

        let records = parse_results(body).unwrap();
        assert_eq!(records.len(), 2);
        match &records[1] {
            RawRecord::Api(record) => {
                assert_eq!(record.name.as_deref(), Some("Game of Thrones"));
                assert_eq!(record.media_type.as_deref(), Some("tv"));
                assert!(record.poster_path.is_none());
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_missing_results_is_malformed() {
        assert_eq!(
            parse_results(r#"{"status_message": "Invalid API key"}"#),
            Err(UpstreamError::MalformedPayload(
                "missing results array".to_string()
            ))
        );
        assert!(matches!(
            parse_results(r#"{"results": {}}"#),
            Err(UpstreamError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_results("<html>"),
            Err(UpstreamError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_url_for_joins_cleanly() {
        let client = build_client(&HttpClientConfig::default()).unwrap();
        let adapter = ApiAdapter::new(client, "https://api.themoviedb.org/3/", "key");
        let endpoint = ApiEndpoint::new(MediaType::Movie, "/trending/movie/day");
        assert_eq!(
            adapter.url_for(&endpoint),
            "https://api.themoviedb.org/3/trending/movie/day"
        );
    }
}
