use std::{thread, time::Duration, vec};

use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;

use crate::cve_sources::http_client;
use crate::platform::Platform;

pub mod cve;

pub const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// The API refuses larger pages.
pub const MAX_RESULTS_PER_PAGE: usize = 2000;

#[derive(thiserror::Error, Debug)]
pub enum SourceRetrievalError {
    #[error("could not create http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to the advisory source failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("advisory source answered with status {0}")]
    Status(StatusCode),
    #[error("unexpected payload from the advisory source: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
    /// Pause between two page requests. Without an API key NVD allows
    /// about five requests per 30 seconds.
    pub page_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_url: NVD_API_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            user_agent: concat!("domain-db/", env!("CARGO_PKG_VERSION")).to_string(),
            page_delay: Duration::from_secs(6),
        }
    }
}

/// What to ask the advisory source for.
#[derive(Debug, Clone)]
pub struct NvdQuery {
    pub platform: Option<Platform>,
    pub keyword: Option<String>,
    pub results_per_page: usize,
    /// Stop after this many records even if the source has more.
    pub max_records: Option<usize>,
}

impl Default for NvdQuery {
    fn default() -> Self {
        Self {
            platform: None,
            keyword: None,
            results_per_page: 100,
            max_records: None,
        }
    }
}

impl NvdQuery {
    fn params(&self, start_index: usize) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(4);
        if let Some(platform) = &self.platform {
            params.push(("cpeName", platform.to_string()));
        }
        if let Some(keyword) = &self.keyword {
            params.push(("keywordSearch", keyword.clone()));
        }

        let mut per_page = self.results_per_page.clamp(1, MAX_RESULTS_PER_PAGE);
        if let Some(max) = self.max_records {
            per_page = per_page.min(max.max(1));
        }
        params.push(("resultsPerPage", per_page.to_string()));
        params.push(("startIndex", start_index.to_string()));
        params
    }
}

/// One page of the NVD 2.0 `cves` endpoint. Records are kept raw, each one
/// is validated on its own when it gets normalized.
#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(rename = "resultsPerPage", default)]
    pub results_per_page: usize,
    #[serde(rename = "startIndex", default)]
    pub start_index: usize,
    #[serde(rename = "totalResults", default)]
    pub total_results: usize,
    pub vulnerabilities: Vec<serde_json::Value>,
}

pub fn parse_page(body: &[u8]) -> Result<Page, SourceRetrievalError> {
    Ok(serde_json::from_slice(body)?)
}

#[derive(Clone)]
pub struct NvdClient {
    http: Client,
    options: ClientOptions,
}

impl NvdClient {
    pub fn new(options: ClientOptions) -> Result<Self, SourceRetrievalError> {
        let http = http_client(options.timeout, &options.user_agent)
            .map_err(SourceRetrievalError::Client)?;
        Ok(Self { http, options })
    }

    pub fn fetch_page(
        &self,
        query: &NvdQuery,
        start_index: usize,
    ) -> Result<Page, SourceRetrievalError> {
        log::debug!("fetching {} from index {} ...", self.options.api_url, start_index);

        let mut request = self
            .http
            .get(&self.options.api_url)
            .header("Accept", "application/json")
            .query(&query.params(start_index));
        if let Some(api_key) = &self.options.api_key {
            request = request.header("apiKey", api_key);
        }

        let response = request.send().map_err(SourceRetrievalError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceRetrievalError::Status(status));
        }

        let body = response.bytes().map_err(SourceRetrievalError::Request)?;
        parse_page(&body)
    }

    /// Lazily walk every page matching `query`.
    pub fn records(&self, query: NvdQuery) -> NvdRecords {
        NvdRecords {
            client: self.clone(),
            query,
            next_index: 0,
            pages: 0,
            yielded: 0,
            buffered: Vec::new().into_iter(),
            exhausted: false,
        }
    }
}

/// Raw records from consecutive pages. The first retrieval error is yielded
/// once and ends the iteration.
pub struct NvdRecords {
    client: NvdClient,
    query: NvdQuery,
    next_index: usize,
    pages: usize,
    yielded: usize,
    buffered: vec::IntoIter<serde_json::Value>,
    exhausted: bool,
}

impl NvdRecords {
    fn limit_reached(&self) -> bool {
        matches!(self.query.max_records, Some(max) if self.yielded >= max)
    }
}

impl Iterator for NvdRecords {
    type Item = Result<serde_json::Value, SourceRetrievalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit_reached() {
                return None;
            }

            if let Some(record) = self.buffered.next() {
                self.yielded += 1;
                return Some(Ok(record));
            }

            if self.exhausted {
                return None;
            }

            if self.pages > 0 && !self.client.options.page_delay.is_zero() {
                thread::sleep(self.client.options.page_delay);
            }

            match self.client.fetch_page(&self.query, self.next_index) {
                Ok(page) => {
                    self.pages += 1;
                    let received = page.vulnerabilities.len();
                    self.next_index += received;
                    self.exhausted = received == 0 || self.next_index >= page.total_results;

                    log::info!(
                        "received {} records ({}/{})",
                        received,
                        self.next_index,
                        page.total_results
                    );

                    self.buffered = page.vulnerabilities.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{
        fs,
        io::{Read, Write},
        net::TcpListener,
        thread::JoinHandle,
    };

    const PAGE_FIXTURE: &str = "src/fixtures/nvd_page.json";

    /// Answer one request per entry of `responses`, in order, then stop.
    fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/rest/json/cves/2.0", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let request = String::from_utf8_lossy(&request).to_string();
                requests.push(request.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
            requests
        });

        (url, handle)
    }

    fn client(api_url: String) -> NvdClient {
        NvdClient::new(ClientOptions {
            api_url,
            timeout: Duration::from_secs(5),
            page_delay: Duration::ZERO,
            ..Default::default()
        })
        .unwrap()
    }

    fn page(ids: &[&str], start_index: usize, total_results: usize) -> String {
        let vulnerabilities = ids
            .iter()
            .map(|id| {
                json!({
                    "cve": {
                        "id": id,
                        "published": "2024-01-01T00:00:00.000",
                        "lastModified": "2024-01-01T00:00:00.000",
                        "descriptions": [{ "lang": "en", "value": id }],
                        "metrics": {},
                        "references": []
                    }
                })
            })
            .collect::<Vec<_>>();

        json!({
            "resultsPerPage": ids.len(),
            "startIndex": start_index,
            "totalResults": total_results,
            "format": "NVD_CVE",
            "version": "2.0",
            "vulnerabilities": vulnerabilities
        })
        .to_string()
    }

    #[test]
    fn parses_page_fixture() {
        let body = fs::read(PAGE_FIXTURE).unwrap();
        let page = parse_page(&body).unwrap();

        assert_eq!(page.total_results, 2);
        assert_eq!(page.vulnerabilities.len(), 2);
        assert_eq!(page.vulnerabilities[0]["cve"]["id"], "CVE-2021-44228");
    }

    #[test]
    fn rejects_malformed_payloads() {
        let bodies: [&[u8]; 4] = [
            b"<html>rate limited</html>",
            b"[]",
            b"{\"totalResults\": 3}",
            b"{\"vulnerabilities\": {}}",
        ];
        for body in bodies {
            assert!(matches!(
                parse_page(body),
                Err(SourceRetrievalError::Payload(_))
            ));
        }
    }

    #[test]
    fn builds_query_parameters() {
        let query = NvdQuery {
            platform: Some("cpe:2.3:a:apache:log4j:2.14.1:*:*:*:*:*:*:*".parse().unwrap()),
            keyword: None,
            results_per_page: 5000,
            max_records: None,
        };

        assert_eq!(
            query.params(4000),
            vec![
                ("cpeName", "cpe:2.3:a:apache:log4j:2.14.1:*:*:*:*:*:*:*".to_string()),
                ("resultsPerPage", "2000".to_string()),
                ("startIndex", "4000".to_string()),
            ]
        );

        let query = NvdQuery {
            keyword: Some("openssh".to_string()),
            max_records: Some(10),
            ..Default::default()
        };
        assert_eq!(
            query.params(0),
            vec![
                ("keywordSearch", "openssh".to_string()),
                ("resultsPerPage", "10".to_string()),
                ("startIndex", "0".to_string()),
            ]
        );
    }

    #[test]
    fn walks_every_page() {
        let (url, server) = serve(vec![
            (200, page(&["CVE-2024-0001", "CVE-2024-0002"], 0, 3)),
            (200, page(&["CVE-2024-0003"], 2, 3)),
        ]);

        let records = client(url)
            .records(NvdQuery::default())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let ids = records
            .iter()
            .map(|r| r["cve"]["id"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["CVE-2024-0001", "CVE-2024-0002", "CVE-2024-0003"]);

        let requests = server.join().unwrap();
        assert!(requests[0].contains("startIndex=0"));
        assert!(requests[1].contains("startIndex=2"));
    }

    #[test]
    fn stops_at_max_records() {
        let (url, server) = serve(vec![(
            200,
            page(&["CVE-2024-0001", "CVE-2024-0002", "CVE-2024-0003"], 0, 50),
        )]);

        let query = NvdQuery {
            max_records: Some(2),
            ..Default::default()
        };
        let records = client(url).records(query).collect::<Vec<_>>();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(Result::is_ok));
        server.join().unwrap();
    }

    #[test]
    fn error_status_ends_the_walk() {
        let (url, server) = serve(vec![
            (200, page(&["CVE-2024-0001"], 0, 10)),
            (503, "{\"message\": \"unavailable\"}".to_string()),
        ]);

        let mut records = client(url).records(NvdQuery::default());

        assert!(records.next().unwrap().is_ok());
        assert!(matches!(
            records.next(),
            Some(Err(SourceRetrievalError::Status(status))) if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(records.next().is_none());
        server.join().unwrap();
    }

    #[test]
    fn unreachable_source_is_a_request_error() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut records = client(format!("http://127.0.0.1:{port}/")).records(NvdQuery::default());

        assert!(matches!(
            records.next(),
            Some(Err(SourceRetrievalError::Request(_)))
        ));
        assert!(records.next().is_none());
    }
}
