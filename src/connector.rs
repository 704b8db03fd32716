use crate::errors::{new_io_error, Result};
use crate::socket::{MaybeTlsStream, Socket};
#[cfg(feature = "tls")]
use crate::tls::{AcceptAnyCert, Certificate};
use socket2::Socket as RawSocket;
use socket2::{Domain, Protocol, Type};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpSocket;
#[cfg(feature = "tls")]
use tokio_rustls::rustls;
#[cfg(feature = "tls")]
use tokio_rustls::rustls::pki_types::ServerName;
#[cfg(feature = "tls")]
use tokio_rustls::TlsConnector;
use url::Url;

/// ConnectorBuilder
#[derive(Clone, Debug)]
pub struct ConnectorBuilder {
  read_timeout: Option<Duration>,
  write_timeout: Option<Duration>,
  connect_timeout: Option<Duration>,
  nodelay: bool,
  #[cfg(feature = "tls")]
  certs_verification: bool,
  #[cfg(feature = "tls")]
  certificates: Vec<Certificate>,
}

impl Default for ConnectorBuilder {
  fn default() -> Self {
    Self {
      read_timeout: Some(Duration::from_secs(60)),
      write_timeout: Some(Duration::from_secs(30)),
      connect_timeout: Some(Duration::from_secs(10)),
      nodelay: true,
      #[cfg(feature = "tls")]
      certs_verification: true,
      #[cfg(feature = "tls")]
      certificates: vec![],
    }
  }
}

impl ConnectorBuilder {
  /// Budget for reading one whole ingestion response.
  ///
  /// Default is 60 seconds; large envelopes can take the backend a while.
  pub fn read_timeout(mut self, timeout: Option<Duration>) -> ConnectorBuilder {
    self.read_timeout = timeout;
    self
  }
  /// Budget for each write of the request.
  ///
  /// Default is 30 seconds.
  pub fn write_timeout(mut self, timeout: Option<Duration>) -> ConnectorBuilder {
    self.write_timeout = timeout;
    self
  }
  /// Set a timeout for only the connect phase.
  ///
  /// Default is 10 seconds.
  pub fn connect_timeout(mut self, timeout: Option<Duration>) -> ConnectorBuilder {
    self.connect_timeout = timeout;
    self
  }
  /// Set `SO_NODELAY` on every socket.
  ///
  /// Default is `true`.
  pub fn nodelay(mut self, value: bool) -> ConnectorBuilder {
    self.nodelay = value;
    self
  }
  /// Controls certificate validation for https endpoints.
  ///
  /// # Warning
  ///
  /// Turning this off trusts *any* certificate. Only use it against a lab
  /// backend with a self-signed certificate.
  #[cfg(feature = "tls")]
  pub fn certs_verification(mut self, value: bool) -> ConnectorBuilder {
    self.certs_verification = value;
    self
  }
  /// Adds roots that the connector will trust.
  #[cfg(feature = "tls")]
  pub fn certificates(mut self, value: Vec<Certificate>) -> ConnectorBuilder {
    self.certificates.extend(value);
    self
  }

  /// Builds the `Connector`.
  pub fn build(&self) -> Result<Connector> {
    #[cfg(feature = "tls")]
    let tls = {
      let mut roots = rustls::RootCertStore::empty();
      for cert in self.certificates.clone() {
        cert.add_to(&mut roots)?;
      }
      let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| std::sync::Arc::new(rustls::crypto::ring::default_provider()));
      let config_builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|_| crate::errors::builder("invalid TLS versions"))?;
      let config = if self.certs_verification {
        config_builder
          .with_root_certificates(roots)
          .with_no_client_auth()
      } else {
        config_builder
          .dangerous()
          .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAnyCert))
          .with_no_client_auth()
      };
      TlsConnector::from(std::sync::Arc::new(config))
    };
    Ok(Connector {
      connect_timeout: self.connect_timeout,
      nodelay: self.nodelay,
      read_timeout: self.read_timeout,
      write_timeout: self.write_timeout,
      #[cfg(feature = "tls")]
      tls,
    })
  }
}

/// Opens connections to ingestion endpoints.
#[derive(Clone)]
pub struct Connector {
  connect_timeout: Option<Duration>,
  nodelay: bool,
  read_timeout: Option<Duration>,
  write_timeout: Option<Duration>,
  #[cfg(feature = "tls")]
  tls: TlsConnector,
}

impl Connector {
  /// Connect to a remote endpoint with addr
  pub async fn connect_with_addr<S: Into<SocketAddr>>(&self, addr: S) -> Result<Socket> {
    let addr = addr.into();
    let raw_socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    raw_socket.set_nonblocking(true)?;
    let socket = TcpSocket::from_std_stream(raw_socket.into());
    if self.nodelay {
      socket.set_nodelay(true)?;
    }
    let stream = match self.connect_timeout {
      None => socket.connect(addr).await?,
      Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
        .await
        .map_err(|x| new_io_error(ErrorKind::TimedOut, &x.to_string()))??,
    };
    Ok(Socket::new(
      MaybeTlsStream::Tcp(stream),
      self.read_timeout,
      self.write_timeout,
    ))
  }

  /// Resolves the endpoint host and connects to the first address that
  /// answers, upgrading to TLS for `https`.
  pub async fn connect(&self, endpoint: &Url) -> Result<Socket> {
    let host = endpoint
      .host_str()
      .ok_or_else(|| crate::Error::InvalidUrl(endpoint.to_string()))?;
    let port = endpoint
      .port_or_known_default()
      .ok_or_else(|| crate::Error::InvalidUrl(endpoint.to_string()))?;
    let lookup_host = host.trim_start_matches('[').trim_end_matches(']');
    let mut last_error = None;
    let mut socket = None;
    for addr in tokio::net::lookup_host((lookup_host, port)).await? {
      match self.connect_with_addr(addr).await {
        Ok(s) => {
          socket = Some(s);
          break;
        }
        Err(err) => last_error = Some(err),
      }
    }
    let socket = match (socket, last_error) {
      (Some(socket), _) => socket,
      (None, Some(err)) => return Err(err),
      (None, None) => return Err(new_io_error(ErrorKind::NotFound, "endpoint host did not resolve")),
    };
    match endpoint.scheme() {
      "http" => Ok(socket),
      #[cfg(feature = "tls")]
      "https" => self.upgrade_to_tls(socket, lookup_host).await,
      _ => Err(crate::Error::InvalidUrl(endpoint.to_string())),
    }
  }

  #[cfg(feature = "tls")]
  async fn upgrade_to_tls(&self, stream: Socket, domain: &str) -> Result<Socket> {
    let domain = ServerName::try_from(domain.to_owned())
      .map_err(|e| crate::errors::Error::Other(e.to_string()))?;
    let this = self.tls.clone();
    let tls = stream
      .tls(move |t| async move { this.connect(domain, t).await })
      .await?;
    Ok(tls)
  }
}
