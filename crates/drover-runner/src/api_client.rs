//! HTTP client for the coordinator's runner protocol.

use anyhow::{bail, Context, Result};
use log::debug;
use reqwest::StatusCode;
use std::time::Duration;

use drover_protocol::{
    HeartbeatRequest, PollResponse, RegisterRequest, RegisterResponse, ReportCompletedRequest,
    ReportFailedRequest, ReportStartedRequest, ReportStoppedRequest,
};

const API_PREFIX: &str = "/api/v1";

/// Client for coordinator endpoints used by the runner.
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CoordinatorClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    /// `POST /runner/register`
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let response = self
            .request(self.http.post(self.url("/runner/register")))
            .json(request)
            .send()
            .await
            .context("connecting to coordinator")?;

        if response.status() != StatusCode::CREATED {
            bail!("registration rejected: {}", response.status());
        }
        response.json().await.context("parsing register response")
    }

    /// `GET /runner/runs` — the long-poll. `None` means a clean 204
    /// timeout.
    pub async fn poll(
        &self,
        runner_id: &str,
        tags: &str,
        poll_timeout_secs: u64,
    ) -> Result<Option<PollResponse>> {
        let mut query: Vec<(&str, String)> = vec![
            ("runner_id", runner_id.to_string()),
            ("timeout_secs", poll_timeout_secs.to_string()),
        ];
        if !tags.is_empty() {
            query.push(("tags", tags.to_string()));
        }

        let response = self
            .request(self.http.get(self.url("/runner/runs")))
            .query(&query)
            // The server holds the poll open; allow for it plus slack.
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .send()
            .await
            .context("polling coordinator")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => {
                let envelope: PollResponse =
                    response.json().await.context("parsing poll envelope")?;
                debug!("poll envelope: run={}, stops={}", envelope.run.is_some(), envelope.stop_runs.len());
                Ok(Some(envelope))
            }
            status => bail!("poll failed: {status}"),
        }
    }

    /// `POST /runner/heartbeat`
    pub async fn heartbeat(&self, runner_id: &str) -> Result<()> {
        let response = self
            .request(self.http.post(self.url("/runner/heartbeat")))
            .json(&HeartbeatRequest {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await
            .context("sending heartbeat")?;

        if !response.status().is_success() {
            bail!("heartbeat rejected: {}", response.status());
        }
        Ok(())
    }

    /// `POST /runner/deregister`
    pub async fn deregister(&self, runner_id: &str) -> Result<()> {
        let response = self
            .request(self.http.post(self.url("/runner/deregister")))
            .json(&HeartbeatRequest {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await
            .context("sending deregistration")?;

        if !response.status().is_success() {
            bail!("deregistration rejected: {}", response.status());
        }
        Ok(())
    }

    /// `POST /runner/runs/{id}/started`
    pub async fn report_started(&self, runner_id: &str, run_id: &str) -> Result<()> {
        self.report(
            run_id,
            "started",
            &ReportStartedRequest {
                runner_id: runner_id.to_string(),
            },
        )
        .await
    }

    /// `POST /runner/runs/{id}/completed`
    pub async fn report_completed(&self, runner_id: &str, run_id: &str) -> Result<()> {
        self.report(
            run_id,
            "completed",
            &ReportCompletedRequest {
                runner_id: runner_id.to_string(),
            },
        )
        .await
    }

    /// `POST /runner/runs/{id}/failed`
    pub async fn report_failed(&self, runner_id: &str, run_id: &str, error: &str) -> Result<()> {
        self.report(
            run_id,
            "failed",
            &ReportFailedRequest {
                runner_id: runner_id.to_string(),
                error: error.to_string(),
            },
        )
        .await
    }

    /// `POST /runner/runs/{id}/stopped`
    pub async fn report_stopped(&self, runner_id: &str, run_id: &str, signal: &str) -> Result<()> {
        self.report(
            run_id,
            "stopped",
            &ReportStoppedRequest {
                runner_id: runner_id.to_string(),
                signal: signal.to_string(),
            },
        )
        .await
    }

    /// `GET /scripts/{name}` — fetch script content for a sync command.
    pub async fn fetch_script(&self, name: &str) -> Result<String> {
        let response = self
            .request(self.http.get(self.url(&format!("/scripts/{name}"))))
            .send()
            .await
            .context("fetching script")?;

        if !response.status().is_success() {
            bail!("script fetch rejected: {}", response.status());
        }
        response.text().await.context("reading script body")
    }

    async fn report<T: serde::Serialize>(
        &self,
        run_id: &str,
        verb: &str,
        body: &T,
    ) -> Result<()> {
        let response = self
            .request(
                self.http
                    .post(self.url(&format!("/runner/runs/{run_id}/{verb}"))),
            )
            .json(body)
            .send()
            .await
            .with_context(|| format!("reporting {verb}"))?;

        if !response.status().is_success() {
            bail!("report {verb} rejected: {}", response.status());
        }
        Ok(())
    }
}
