use crate::error::KernelError;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info};

const XSRF_COOKIE: &str = "_xsrf";
const XSRF_HEADER: &str = "X-XSRFToken";

/// Bound on each HTTP call when the caller does not pick one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct KernelModel {
    id: String,
}

/// HTTP side of one kernel run: credentials, cookies and the kernel id.
pub struct KernelSession {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
    token: Option<String>,
    password: Option<String>,
    params: Vec<(String, String)>,
    xsrf: Option<String>,
    kernel_id: Option<String>,
}

impl KernelSession {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, KernelError> {
        Self::with_request_timeout(base_url, token, password, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Every HTTP call (login, create, delete) gives up after `timeout`.
    pub fn with_request_timeout(
        base_url: &str,
        token: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, KernelError> {
        let base_url = normalize_base_url(base_url)?;
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            jar,
            base_url,
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
            params: Vec::new(),
            xsrf: None,
            kernel_id: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel_id.as_deref()
    }

    /// Cookie auth is only used when a password is set and no token is.
    pub fn uses_cookie_auth(&self) -> bool {
        self.password.is_some() && self.token.is_none()
    }

    fn url(&self, path: &str) -> Result<Url, KernelError> {
        self.base_url.join(path).map_err(|err| KernelError::Url {
            message: format!("{}{}: {}", self.base_url, path, err),
        })
    }

    pub async fn sign_in(&mut self) -> Result<(), KernelError> {
        if self.uses_cookie_auth() {
            let login = self.url("login")?;
            let response = self.client.get(login.clone()).send().await?;
            let response = response.error_for_status().map_err(|err| KernelError::Auth {
                message: err.to_string(),
            })?;
            let xsrf = response
                .cookies()
                .find(|cookie| cookie.name() == XSRF_COOKIE)
                .map(|cookie| cookie.value().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| KernelError::Auth {
                    message: "_xsrf token not found".to_string(),
                })?;

            let password = self.password.clone().unwrap_or_default();
            self.client
                .post(login)
                .header(XSRF_HEADER, &xsrf)
                .form(&[(XSRF_COOKIE, xsrf.as_str()), ("password", password.as_str())])
                .send()
                .await?
                .error_for_status()
                .map_err(|err| KernelError::Auth {
                    message: err.to_string(),
                })?;

            debug!("signed in with password");
            self.xsrf = Some(xsrf);
        }

        if let Some(token) = &self.token {
            self.params.push(("token".to_string(), token.clone()));
        }
        Ok(())
    }

    pub async fn init_kernel(&mut self) -> Result<String, KernelError> {
        let mut request = self.client.post(self.url("api/kernels")?).query(&self.params);
        if let Some(xsrf) = &self.xsrf {
            request = request.header(XSRF_HEADER, xsrf);
        }

        let response = request
            .send()
            .await?
            .error_for_status()
            .map_err(|err| KernelError::KernelCreate {
                message: err.to_string(),
            })?;
        let kernel: KernelModel = response.json().await.map_err(|err| KernelError::KernelCreate {
            message: err.to_string(),
        })?;

        info!(kernel_id = %kernel.id, "kernel started");
        self.kernel_id = Some(kernel.id.clone());
        Ok(kernel.id)
    }

    /// `ws(s)://.../api/kernels/<id>/channels` with the auth query and, for
    /// cookie auth, the session cookie and xsrf header.
    pub fn channel_request(&self) -> Result<Request, KernelError> {
        let kernel_id = self.kernel_id.as_deref().ok_or_else(|| KernelError::Channel {
            message: "no kernel to connect to".to_string(),
        })?;
        let url = channel_url(&self.base_url, kernel_id, &self.params)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| KernelError::Url {
                message: err.to_string(),
            })?;

        if self.uses_cookie_auth() {
            let headers = request.headers_mut();
            if let Some(cookies) = self.jar.cookies(&self.base_url) {
                let cookies = HeaderValue::from_bytes(cookies.as_bytes()).map_err(|err| {
                    KernelError::Channel {
                        message: format!("invalid cookie header: {}", err),
                    }
                })?;
                headers.insert("Cookie", cookies);
            }
            if let Some(xsrf) = &self.xsrf {
                let xsrf = HeaderValue::from_str(xsrf).map_err(|err| KernelError::Channel {
                    message: format!("invalid xsrf header: {}", err),
                })?;
                headers.insert(XSRF_HEADER, xsrf);
            }
        }
        Ok(request)
    }

    /// Deletes the kernel if one was created.
    pub async fn delete_kernel(&mut self) -> Result<(), KernelError> {
        let Some(kernel_id) = self.kernel_id.take() else {
            return Ok(());
        };
        let mut request = self
            .client
            .delete(self.url(&format!("api/kernels/{}", kernel_id))?)
            .query(&self.params);
        if let Some(xsrf) = &self.xsrf {
            request = request.header(XSRF_HEADER, xsrf);
        }
        request.send().await?.error_for_status()?;
        info!(kernel_id = %kernel_id, "kernel deleted");
        Ok(())
    }
}

/// Parses the server URL and makes sure it ends with `/`.
pub fn normalize_base_url(base_url: &str) -> Result<Url, KernelError> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|err| KernelError::Url {
        message: format!("{}: {}", base_url, err),
    })
}

pub fn channel_url(
    base_url: &Url,
    kernel_id: &str,
    params: &[(String, String)],
) -> Result<Url, KernelError> {
    let mut url = base_url
        .join(&format!("api/kernels/{}/channels", kernel_id))
        .map_err(|err| KernelError::Url {
            message: err.to_string(),
        })?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(KernelError::Url {
                message: format!("unsupported scheme '{}'", other),
            })
        }
    };
    url.set_scheme(scheme).map_err(|_| KernelError::Url {
        message: format!("cannot switch {} to {}", base_url, scheme),
    })?;

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}
