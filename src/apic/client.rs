//! REST client for the controller API. Carries the session token pair on
//! every request: `DevCookie` header plus a challenge value, sent as the
//! `challenge` query parameter in standalone mode and as the
//! `APIC-challenge` header when embedded. Class and dn queries are paged;
//! a request with no tokens goes out unauthenticated for the controller to
//! reject (the caller logs the failure).

use std::time::{Duration, Instant};

use reqwest::RequestBuilder;
use serde_json::{Value, json};
use url::Url;

use super::filters::{QueryFilters, wcard};
use super::session::{DeploymentMode, SessionContext};
use super::types::{
    ApicError, EndpointRecord, ResolveReply, parse_class_reply, parse_login_reply,
};

// The controller hardcodes a 90s session timeout; stay above it
const SESSION_MAX_TIMEOUT: Duration = Duration::from_secs(120);
const SESSION_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PAGE_SIZE: usize = 75_000;

#[derive(Clone)]
pub struct ApicClient {
    base: Url,
    client: reqwest::Client,
}

impl ApicClient {
    pub fn new(base_url: &str, verify_ssl: bool) -> Result<Self, ApicError> {
        let base = Url::parse(base_url)?;
        // Controllers commonly run self-signed certificates
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Listing URL for endpoints in a subnet: wildcard match on the literal
    /// subnet string, child subtrees included.
    pub fn endpoint_listing_url(subnet: &str) -> String {
        let filters = QueryFilters::new()
            .with_query_target_filter(wcard("fvCEp.ip", subnet))
            .with_rsp_subtree("children");
        format!(
            "/api/class/{}.json{}",
            EndpointRecord::CLASS_NAME,
            filters.build()
        )
    }

    pub fn resolve_url(ip: &str) -> String {
        format!("/appcenter/Cisco/CLUS/resolve.json?ip={}", ip)
    }

    /// Credentialed login (standalone mode). Stores the returned token pair
    /// on the session context.
    pub async fn login(
        &self,
        session: &mut SessionContext,
        username: &str,
        password: &str,
    ) -> Result<(), ApicError> {
        let url = self.base.join("/api/aaaLogin.json?gui-token-request=yes")?;
        log::debug!("opening session to {}", self.base);
        let response = self
            .client
            .post(url.clone())
            .timeout(SESSION_LOGIN_TIMEOUT)
            .json(&login_body(username, password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApicError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let js: Value = response.json().await?;
        session.set_tokens(parse_login_reply(&js)?);
        Ok(())
    }

    /// List endpoints whose IP matches the subnet wildcard filter.
    pub async fn list_endpoints(
        &self,
        session: &SessionContext,
        subnet: &str,
    ) -> Result<Vec<EndpointRecord>, ApicError> {
        log::debug!("listing endpoints for {}", subnet);
        let objects = self
            .get(session, &Self::endpoint_listing_url(subnet), None)
            .await?;
        Ok(EndpointRecord::from_imdata(&objects))
    }

    /// Resolve one IP to a reverse-DNS name through the app backend.
    pub async fn resolve_ip(
        &self,
        session: &SessionContext,
        ip: &str,
    ) -> Result<ResolveReply, ApicError> {
        log::debug!("resolving ip {}", ip);
        let js = self.get_json(session, &Self::resolve_url(ip)).await?;
        serde_json::from_value(js).map_err(|e| ApicError::MalformedReply(e.to_string()))
    }

    /// Class query: `/api/class/<name>.json` with optional filters, paged.
    pub async fn get_class(
        &self,
        session: &SessionContext,
        class_name: &str,
        filters: &QueryFilters,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, ApicError> {
        let url = format!("/api/class/{}.json{}", class_name, filters.build());
        self.get(session, &url, limit).await
    }

    /// Single-dn query: `/api/mo/<dn>.json`. `Ok(None)` is a valid empty
    /// reply, distinct from an error.
    pub async fn get_dn(
        &self,
        session: &SessionContext,
        dn: &str,
        filters: &QueryFilters,
    ) -> Result<Option<Value>, ApicError> {
        let url = format!("/api/mo/{}.json{}", dn, filters.build());
        let mut objects = self.get(session, &url, None).await?;
        if objects.is_empty() {
            Ok(None)
        } else {
            Ok(Some(objects.swap_remove(0)))
        }
    }

    /// Paged GET. Appends `page-size`/`page` and walks pages, accumulating
    /// envelope objects until a short page arrives or the accumulated count
    /// reaches the reported total. `limit` caps the returned objects.
    async fn get(
        &self,
        session: &SessionContext,
        url: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, ApicError> {
        let delimiter = if url.contains('?') { '&' } else { '?' };
        let mut results: Vec<Value> = Vec::new();
        let mut page = 0usize;

        loop {
            let page_url = format!(
                "{}{}page-size={}&page={}",
                url, delimiter, DEFAULT_PAGE_SIZE, page
            );
            let started = Instant::now();
            let js = self.get_json(session, &page_url).await?;
            log::debug!(
                "page {} fetched in {}ms",
                page,
                started.elapsed().as_millis()
            );

            let (objects, total) = parse_class_reply(&js)?;
            let page_len = objects.len();
            results.extend(objects);
            log::debug!("results count: {}/{}", results.len(), total);

            if limit_reached(&mut results, limit)
                || page_walk_done(page_len, DEFAULT_PAGE_SIZE, results.len(), total)
            {
                return Ok(results);
            }
            page += 1;
        }
    }

    /// One authenticated GET, parsed as JSON.
    async fn get_json(&self, session: &SessionContext, url: &str) -> Result<Value, ApicError> {
        let full_url = self.base.join(url)?;
        let request = self
            .client
            .get(full_url.clone())
            .timeout(SESSION_MAX_TIMEOUT);
        let response = self.apply_auth(request, session).send().await?;
        if !response.status().is_success() {
            return Err(ApicError::Status {
                status: response.status().as_u16(),
                url: full_url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    fn apply_auth(&self, request: RequestBuilder, session: &SessionContext) -> RequestBuilder {
        let Some(tokens) = session.tokens() else {
            log::warn!("no session tokens present, sending unauthenticated request");
            return request;
        };
        let request = request.header("DevCookie", &tokens.token);
        match session.mode() {
            DeploymentMode::Standalone => {
                request.query(&[("challenge", tokens.url_token.as_str())])
            }
            DeploymentMode::Embedded => request.header("APIC-challenge", &tokens.url_token),
        }
    }
}

fn login_body(username: &str, password: &str) -> Value {
    json!({
        "aaaUser": {
            "attributes": {
                "name": username,
                "pwd": password,
            }
        }
    })
}

/// An explicit limit caps the walk before the envelope-driven stop checks.
/// True when the cap was hit; the results are truncated to it.
fn limit_reached(results: &mut Vec<Value>, limit: Option<usize>) -> bool {
    match limit {
        Some(limit) if results.len() >= limit => {
            results.truncate(limit);
            true
        }
        _ => false,
    }
}

/// A walk ends on a short page, or once the accumulated count reaches the
/// reported total.
fn page_walk_done(page_len: usize, page_size: usize, accumulated: usize, total: usize) -> bool {
    page_len < page_size || accumulated >= total
}
