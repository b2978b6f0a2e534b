//! HTTP transport and the eight operations the operator needs

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{body_excerpt, ClientError};
use crate::types::{
    CreateResourceRequest, CreateSiteRequest, CreateTargetRequest, Domain, Organization,
    Resource, Site, Target,
};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size used for list calls; the operator does not paginate further
const LIST_LIMIT: u32 = 1000;

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct OrgList {
    #[serde(default)]
    orgs: Vec<Organization>,
}

#[derive(Deserialize)]
struct DomainList {
    #[serde(default)]
    domains: Vec<Domain>,
}

#[derive(Deserialize)]
struct SiteList {
    #[serde(default)]
    sites: Vec<Site>,
}

/// Client for one Pangolin API endpoint and key
#[derive(Clone, Debug)]
pub struct PangolinClient {
    base_url: Url,
    http: reqwest::Client,
}

impl PangolinClient {
    /// Build a client for `endpoint` (the API root, without `/v1`)
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| ClientError::Build(format!("invalid api key: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("pangolin-operator/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        let mut base_url = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| ClientError::Build(format!("invalid endpoint {endpoint}: {e}")))?;
        base_url
            .path_segments_mut()
            .map_err(|_| ClientError::Build(format!("endpoint {endpoint} cannot carry a path")))?
            .pop_if_empty()
            .push("v1");

        Ok(Self { base_url, http })
    }

    /// API url for `segments`, each percent-encoded as one path segment
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    /// List url with the single page the operator reads
    fn list_url(&self, segments: &[&str]) -> Url {
        let mut url = self.url(segments);
        url.query_pairs_mut()
            .append_pair("limit", &LIST_LIMIT.to_string())
            .append_pair("offset", "0");
        url
    }

    /// Organizations visible to the key, in API order
    pub async fn list_organizations(&self) -> Result<Vec<Organization>, ClientError> {
        let list: OrgList = self
            .call("list-orgs", Method::GET, self.url(&["orgs"]), None::<&()>)
            .await?;
        Ok(list.orgs)
    }

    /// Domains registered with an organization
    pub async fn list_domains(&self, org_id: &str) -> Result<Vec<Domain>, ClientError> {
        let url = self.list_url(&["org", org_id, "domains"]);
        let list: DomainList = self
            .call("list-domains", Method::GET, url, None::<&()>)
            .await?;
        Ok(list.domains)
    }

    /// Sites of an organization
    pub async fn list_sites(&self, org_id: &str) -> Result<Vec<Site>, ClientError> {
        let url = self.list_url(&["org", org_id, "sites"]);
        let list: SiteList = self
            .call("list-sites", Method::GET, url, None::<&()>)
            .await?;
        Ok(list.sites)
    }

    /// Site by numeric id
    pub async fn get_site_by_id(&self, site_id: i64) -> Result<Site, ClientError> {
        self.call(
            "get-site",
            Method::GET,
            self.url(&["site", &site_id.to_string()]),
            None::<&()>,
        )
        .await
    }

    /// Site by nice id within an organization
    pub async fn get_site_by_nice_id(
        &self,
        org_id: &str,
        nice_id: &str,
    ) -> Result<Site, ClientError> {
        self.call(
            "get-site-by-nice-id",
            Method::GET,
            self.url(&["org", org_id, "site", nice_id]),
            None::<&()>,
        )
        .await
    }

    /// Create a site
    pub async fn create_site(
        &self,
        org_id: &str,
        name: &str,
        site_type: &str,
    ) -> Result<Site, ClientError> {
        let body = CreateSiteRequest {
            name: name.to_string(),
            type_: site_type.to_string(),
        };
        self.call(
            "create-site",
            Method::PUT,
            self.url(&["org", org_id, "site"]),
            Some(&body),
        )
        .await
    }

    /// Create a resource on a site
    pub async fn create_resource(
        &self,
        org_id: &str,
        site_id: i64,
        request: &CreateResourceRequest,
    ) -> Result<Resource, ClientError> {
        self.call(
            "create-resource",
            Method::PUT,
            self.url(&["org", org_id, "site", &site_id.to_string(), "resource"]),
            Some(request),
        )
        .await
    }

    /// Create a forwarding target on a resource
    pub async fn create_target(
        &self,
        resource_id: &str,
        request: &CreateTargetRequest,
    ) -> Result<Target, ClientError> {
        self.call(
            "create-target",
            Method::PUT,
            self.url(&["resource", resource_id, "target"]),
            Some(request),
        )
        .await
    }

    async fn call<B, T>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(operation, method = %method, url = %url, "pangolin api request");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation, source })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport { operation, source })?;

        if !status.is_success() {
            return Err(ClientError::Status {
                operation,
                status: status.as_u16(),
                body: body_excerpt(&bytes),
            });
        }
        if !content_type.starts_with("application/json") {
            return Err(ClientError::ContentType {
                operation,
                content_type,
                status: status.as_u16(),
                body: body_excerpt(&bytes),
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
                operation,
                message: e.to_string(),
            })?;
        if !envelope.success {
            return Err(ClientError::Unsuccessful {
                operation,
                message: envelope.message,
            });
        }
        envelope.data.ok_or(ClientError::Decode {
            operation,
            message: "response has no data".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    const KEY: &str = "test-key";

    async fn serve(app: Router) -> PangolinClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        PangolinClient::new(&format!("http://{addr}/"), KEY).unwrap()
    }

    fn authorized(headers: &AxumHeaders) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {KEY}"))
    }

    fn ok(data: Value) -> Json<Value> {
        Json(json!({ "success": true, "data": data }))
    }

    #[tokio::test]
    async fn list_organizations_sends_bearer_and_unwraps_envelope() {
        let app = Router::new().route(
            "/v1/orgs",
            get(|headers: AxumHeaders| async move {
                if !authorized(&headers) {
                    return StatusCode::UNAUTHORIZED.into_response();
                }
                let ua = headers.get("user-agent").and_then(|v| v.to_str().ok());
                assert!(ua.is_some_and(|ua| ua.starts_with("pangolin-operator/")));
                ok(json!({"orgs": [
                    {"orgId": "org1", "name": "Acme", "subnet": "100.90.128.0/24"},
                    {"orgId": "org2", "name": "Other"}
                ]}))
                .into_response()
            }),
        );
        let client = serve(app).await;

        let orgs = client.list_organizations().await.unwrap();
        assert_eq!(orgs.len(), 2);
        assert_eq!(orgs[0].org_id, "org1");
        assert_eq!(orgs[0].subnet.as_deref(), Some("100.90.128.0/24"));
    }

    #[tokio::test]
    async fn list_domains_requests_a_single_large_page() {
        let app = Router::new().route(
            "/v1/org/{org}/domains",
            get(
                |Path(org): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(org, "org1");
                    assert_eq!(q.get("limit").map(String::as_str), Some("1000"));
                    assert_eq!(q.get("offset").map(String::as_str), Some("0"));
                    ok(json!({"domains": [
                        {"domainId": "d1", "baseDomain": "example.com", "verified": true},
                        {"domainId": 2, "baseDomain": "b.com", "verified": false}
                    ]}))
                },
            ),
        );
        let client = serve(app).await;

        let domains = client.list_domains("org1").await.unwrap();
        assert_eq!(domains[0].domain_id, "d1");
        assert_eq!(domains[1].domain_id, "2");
        assert!(!domains[1].verified);
    }

    #[tokio::test]
    async fn sites_are_fetched_by_id_nice_id_and_listed() {
        let site = json!({"siteId": 7, "niceId": "bright-otter", "name": "edge", "type": "newt", "online": true});
        let (s1, s2, s3) = (site.clone(), site.clone(), site);
        let app = Router::new()
            .route("/v1/site/{id}", get(move || async move { ok(s1) }))
            .route(
                "/v1/org/{org}/site/{nice}",
                get(move |Path((org, nice)): Path<(String, String)>| async move {
                    assert_eq!((org.as_str(), nice.as_str()), ("org1", "bright-otter"));
                    ok(s2)
                }),
            )
            .route(
                "/v1/org/{org}/sites",
                get(move || async move { ok(json!({ "sites": [s3] })) }),
            );
        let client = serve(app).await;

        assert_eq!(client.get_site_by_id(7).await.unwrap().site_id, 7);
        let by_nice = client.get_site_by_nice_id("org1", "bright-otter").await.unwrap();
        assert!(by_nice.online);
        assert_eq!(client.list_sites("org1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_site_puts_name_and_type() {
        let app = Router::new().route(
            "/v1/org/{org}/site",
            put(|Json(body): Json<Value>| async move {
                assert_eq!(body, json!({"name": "s1", "type": "newt"}));
                (
                    StatusCode::CREATED,
                    ok(json!({"siteId": 11, "name": "s1", "type": "newt", "newtId": "nid", "secret": "nsecret"})),
                )
            }),
        );
        let client = serve(app).await;

        let site = client.create_site("org1", "s1", "newt").await.unwrap();
        assert_eq!(site.site_id, 11);
        assert_eq!(site.newt_secret.as_deref(), Some("nsecret"));
    }

    /// Story: an HTTP resource goes over the wire as tcp, and the id the
    /// control plane returns as `resourceId` becomes the canonical id
    #[tokio::test]
    async fn story_create_http_resource_then_target() {
        let app = Router::new()
            .route(
                "/v1/org/{org}/site/{site}/resource",
                put(|Path((org, site)): Path<(String, i64)>, Json(body): Json<Value>| async move {
                    assert_eq!(org, "org1");
                    assert_eq!(site, 11);
                    assert_eq!(body["protocol"], "tcp");
                    assert_eq!(body["http"], true);
                    assert_eq!(body["subdomain"], "app");
                    assert_eq!(body["domainId"], "d1");
                    assert!(body.get("proxyPort").is_none());
                    ok(json!({"resourceId": 17, "name": "app"}))
                }),
            )
            .route(
                "/v1/resource/{id}/target",
                put(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                    assert_eq!(id, "17");
                    ok(json!({"targetId": 3, "ip": body["ip"], "port": body["port"], "method": "http", "enabled": true}))
                }),
            );
        let client = serve(app).await;

        let resource = client
            .create_resource("org1", 11, &CreateResourceRequest::http("app", 11, "app", "d1"))
            .await
            .unwrap();
        assert_eq!(resource.id, "17");

        let target = client
            .create_target(
                &resource.id,
                &CreateTargetRequest {
                    ip: "10.0.0.12".to_string(),
                    port: 8080,
                    method: "http".to_string(),
                    enabled: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(target.id, "3");
        assert_eq!(target.ip, "10.0.0.12");
    }

    #[tokio::test]
    async fn error_status_carries_truncated_body() {
        let app = Router::new().route(
            "/v1/orgs",
            get(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(5000)) }),
        );
        let client = serve(app).await;

        match client.list_organizations().await.unwrap_err() {
            ClientError::Status { status, body, operation } => {
                assert_eq!(status, 502);
                assert_eq!(operation, "list-orgs");
                assert_eq!(body.len(), 1024);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn html_page_is_rejected_by_content_type() {
        let app = Router::new().route(
            "/v1/resource/{id}/target",
            put(|| async { axum::response::Html("<html>maintenance</html>") }),
        );
        let client = serve(app).await;

        let err = client
            .create_target(
                "1",
                &CreateTargetRequest {
                    ip: "10.0.0.1".to_string(),
                    port: 80,
                    method: "http".to_string(),
                    enabled: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ContentType { ref content_type, .. } if content_type.starts_with("text/html")));
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_an_error() {
        let app = Router::new().route(
            "/v1/orgs",
            get(|| async { Json(json!({"success": false, "message": "key revoked", "data": null})) }),
        );
        let client = serve(app).await;

        let err = client.list_organizations().await.unwrap_err();
        assert!(matches!(err, ClientError::Unsuccessful { .. }));
        assert!(err.to_string().contains("key revoked"));
    }

    #[tokio::test]
    async fn path_parameters_are_percent_encoded() {
        let app = Router::new().route(
            "/v1/org/{org}/site/{nice}",
            get(|Path((org, nice)): Path<(String, String)>| async move {
                assert_eq!((org.as_str(), nice.as_str()), ("org/1", "otter?x=1"));
                ok(json!({"siteId": 9, "name": "edge"}))
            }),
        );
        let client = serve(app).await;

        let site = client.get_site_by_nice_id("org/1", "otter?x=1").await.unwrap();
        assert_eq!(site.site_id, 9);
    }

    #[test]
    fn endpoint_path_is_kept_under_v1() {
        let client = PangolinClient::new("https://pangolin.example.com/api/", KEY).unwrap();
        assert_eq!(
            client.url(&["org", "a b", "domains"]).as_str(),
            "https://pangolin.example.com/api/v1/org/a%20b/domains"
        );
        assert!(PangolinClient::new("not a url", KEY).is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let client = PangolinClient::new("http://127.0.0.1:1", KEY).unwrap();
        let err = client.list_organizations().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
    }
}
