use crate::{
    config::ApiConfig,
    error::{Error, Result},
    http_client::{Accept, api_client, handle_http_response},
    models::{Enrollment, VisitDetailPayload, VisitHeaderPayload, VisitRecord},
};
use anyhow::Context;
use log::info;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::{fmt::Debug, time::Duration};
use trait_variant::make;

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait VisitApi {
    async fn enroll_device(&self, enrollment: &Enrollment) -> Result<()>;
    async fn post_visit_detail(&self, detail: &VisitDetailPayload) -> Result<()>;
    async fn post_visit_header(&self, header: &VisitHeaderPayload) -> Result<()>;
    async fn visit_details_for(&self, employee_code: &str) -> Result<Vec<VisitRecord>>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    enrollment_client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Enrollment requests are bounded independently of the general request timeout.
    pub const ENROLLMENT_TIMEOUT: Duration = Duration::from_secs(10);

    // API endpoint constants
    const ENROLLMENT_ENDPOINT: &str = "/api/DeviceUserEnrollment";
    const VISIT_DETAILS_ENDPOINT: &str = "/api/VisitDetails";
    const VISIT_HEADER_ENDPOINT: &str = "/api/VisitHeader";
    const VISIT_DETAILS_BY_EMPLOYEE_ENDPOINT: &str = "/api/VisitDetails/employeeCode";

    pub fn new(base_url: Url, request_timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "failed to create api client: {base_url} cannot be used as base url"
        );

        let client = api_client(request_timeout)?;
        let enrollment_client =
            api_client(Self::ENROLLMENT_TIMEOUT).context("failed to create enrollment client")?;

        Ok(ApiClient {
            client,
            enrollment_client,
            base_url,
        })
    }

    pub fn from_config(config: &ApiConfig) -> anyhow::Result<Self> {
        Self::new(config.base_url.clone(), config.request_timeout)
    }

    /// Resolve endpoint path segments against the base url, percent-encoding each segment
    fn build_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn endpoint_url(&self, endpoint: &str, extra: &[&str]) -> Url {
        let mut segments: Vec<&str> = endpoint.split('/').filter(|s| !s.is_empty()).collect();
        segments.extend_from_slice(extra);
        self.build_url(&segments)
    }

    /// GET request to the visit API
    async fn get(&self, url: Url) -> Result<String> {
        let operation = format!("GET {}", url.path());
        info!("GET {url}");

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::transport(&operation, e))?;

        handle_http_response(res, Accept::Success, &operation).await
    }

    /// POST request to the visit API with JSON body
    async fn post_json(
        &self,
        client: &Client,
        url: Url,
        body: impl Debug + Serialize,
        accept: Accept,
    ) -> Result<String> {
        let operation = format!("POST {}", url.path());
        info!("POST {url} with body: {body:?}");

        let res = client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport(&operation, e))?;

        handle_http_response(res, accept, &operation).await
    }
}

impl VisitApi for ApiClient {
    async fn enroll_device(&self, enrollment: &Enrollment) -> Result<()> {
        let url = self.endpoint_url(Self::ENROLLMENT_ENDPOINT, &[]);
        self.post_json(
            &self.enrollment_client,
            url,
            enrollment,
            Accept::Only(StatusCode::OK),
        )
        .await?;
        Ok(())
    }

    async fn post_visit_detail(&self, detail: &VisitDetailPayload) -> Result<()> {
        let url = self.endpoint_url(Self::VISIT_DETAILS_ENDPOINT, &[]);
        self.post_json(&self.client, url, detail, Accept::Success)
            .await?;
        Ok(())
    }

    async fn post_visit_header(&self, header: &VisitHeaderPayload) -> Result<()> {
        let url = self.endpoint_url(Self::VISIT_HEADER_ENDPOINT, &[]);
        self.post_json(&self.client, url, header, Accept::Success)
            .await?;
        Ok(())
    }

    async fn visit_details_for(&self, employee_code: &str) -> Result<Vec<VisitRecord>> {
        let url = self.endpoint_url(Self::VISIT_DETAILS_BY_EMPLOYEE_ENDPOINT, &[employee_code]);
        let body = self.get(url).await?;
        parse_visit_records(&body)
    }
}

/// Parse a history response, telling "not an array" apart from "array of something else"
pub fn parse_visit_records(body: &str) -> Result<Vec<VisitRecord>> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::Format(format!("response is not valid JSON: {e}")))?;

    let serde_json::Value::Array(items) = value else {
        return Err(Error::Format("expected an array of visit records".to_string()));
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| Error::Format(format!("invalid visit record: {e}")))
        })
        .collect()
}
