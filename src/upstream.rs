//! Outbound HTTP client for the upstream completion API.
//!
//! The client resolves the configured upstream URL once at startup and opens
//! one HTTP/1.1 connection per forwarded request, over plain TCP or rustls
//! TLS depending on the scheme. Responses are returned with their streaming
//! `Incoming` body intact so the pipeline can either collect them (unary) or
//! pipe them through the deanonymizing stream buffer (SSE).

use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response, header};
use hyper::body::Incoming;
use hyper::client::{self};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::body::CloakBody;
use crate::error::CloakError;

/// Transport scheme of the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
  Http,
  Https,
}

/// Client for the configured upstream completion API.
pub struct UpstreamClient {
  scheme: Scheme,
  host: String,
  port: u16,
  base_path: String,
  connect_timeout: Duration,
  tls: TlsConnector,
}

impl UpstreamClient {
  /// Creates a client for the given upstream URL.
  ///
  /// The URL's path becomes the base path endpoints are joined onto, so
  /// `https://api.example.com/v1` forwards completions to
  /// `/v1/chat/completions`.
  pub fn new(upstream_url: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
    let url = url::Url::parse(upstream_url)?;

    let scheme = match url.scheme() {
      "http" => Scheme::Http,
      "https" => Scheme::Https,
      other => anyhow::bail!("unsupported upstream scheme: {other}"),
    };
    let host = url
      .host_str()
      .ok_or_else(|| anyhow::anyhow!("upstream url has no host"))?
      .to_string();
    let port = url
      .port()
      .unwrap_or(match scheme {
        Scheme::Http => 80,
        Scheme::Https => 443,
      });
    let base_path = url.path().trim_end_matches('/').to_string();

    let mut root_cert_store = RootCertStore::empty();
    root_cert_store.extend(TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
      .with_root_certificates(root_cert_store)
      .with_no_client_auth();
    let tls = TlsConnector::from(Arc::new(tls_config));

    Ok(Self {
      scheme,
      host,
      port,
      base_path,
      connect_timeout,
      tls,
    })
  }

  /// Joins an endpoint suffix onto the upstream base path.
  pub fn endpoint(&self, suffix: &str) -> String {
    format!("{}{}", self.base_path, suffix)
  }

  /// Host header value for forwarded requests.
  pub fn authority(&self) -> String {
    match (self.scheme, self.port) {
      (Scheme::Http, 80) | (Scheme::Https, 443) => self.host.clone(),
      _ => format!("{}:{}", self.host, self.port),
    }
  }

  /// Sends a request over a fresh upstream connection.
  ///
  /// The TCP connect and TLS handshake run under the connect timeout; the
  /// caller bounds how long it waits for the response. The returned body is
  /// left streaming.
  pub async fn request(
    &self,
    mut req: Request<CloakBody>,
  ) -> Result<Response<Incoming>, CloakError> {
    if !req.headers().contains_key(header::HOST) {
      let authority = self
        .authority()
        .parse()
        .map_err(|_| CloakError::Internal("invalid upstream authority".to_string()))?;
      req.headers_mut().insert(header::HOST, authority);
    }

    let mut sender = timeout(self.connect_timeout, self.handshake())
      .await
      .map_err(|_| CloakError::UpstreamTimeout {
        stage: "upstream connect",
      })??;

    sender
      .send_request(req)
      .await
      .map_err(|e| CloakError::UpstreamError {
        status: None,
        message: e.to_string(),
      })
  }

  /// Opens a connection and performs the HTTP/1.1 handshake.
  async fn handshake(&self) -> Result<client::conn::http1::SendRequest<CloakBody>, CloakError> {
    let addr = format!("{}:{}", self.host, self.port);
    let tcp_stream = TcpStream::connect(addr)
      .await
      .map_err(|e| CloakError::UpstreamError {
        status: None,
        message: format!("connect failed: {e}"),
      })?;

    match self.scheme {
      Scheme::Http => {
        let io = TokioIo::new(tcp_stream);
        let (sender, conn) = client::conn::http1::handshake::<_, CloakBody>(io)
          .await
          .map_err(|e| CloakError::UpstreamError {
            status: None,
            message: format!("handshake failed: {e}"),
          })?;
        tokio::spawn(async move {
          if let Err(err) = conn.await {
            tracing::debug!("upstream connection error: {err}");
          }
        });
        Ok(sender)
      }
      Scheme::Https => {
        let server_name = ServerName::try_from(self.host.clone()).map_err(|_| {
          CloakError::UpstreamError {
            status: None,
            message: format!("invalid upstream host name: {}", self.host),
          }
        })?;
        let tls_stream = self
          .tls
          .connect(server_name, tcp_stream)
          .await
          .map_err(|e| CloakError::UpstreamError {
            status: None,
            message: format!("tls handshake failed: {e}"),
          })?;
        let io = TokioIo::new(tls_stream);
        let (sender, conn) = client::conn::http1::handshake::<_, CloakBody>(io)
          .await
          .map_err(|e| CloakError::UpstreamError {
            status: None,
            message: format!("handshake failed: {e}"),
          })?;
        tokio::spawn(async move {
          if let Err(err) = conn.await {
            tracing::debug!("upstream connection error: {err}");
          }
        });
        Ok(sender)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_upstream_url_components() {
    let client = UpstreamClient::new("https://api.example.com/v1", Duration::from_secs(10))
      .expect("valid url");
    assert_eq!(client.endpoint("/chat/completions"), "/v1/chat/completions");
    assert_eq!(client.authority(), "api.example.com");
  }

  #[test]
  fn keeps_explicit_ports_in_the_authority() {
    let client =
      UpstreamClient::new("http://localhost:8081", Duration::from_secs(10)).expect("valid url");
    assert_eq!(client.authority(), "localhost:8081");
    assert_eq!(client.endpoint("/models"), "/models");
  }

  #[test]
  fn rejects_unsupported_schemes() {
    assert!(UpstreamClient::new("ftp://example.com", Duration::from_secs(1)).is_err());
  }
}
