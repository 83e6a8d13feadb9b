use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;
use tracing::error;

use crate::constants::HEALTH_PROBE_SERVICE;
use crate::constants::HELLO_RPC_PATH;
use crate::ConnectError;
use crate::ConnectionConfig;
use crate::HandshakeReply;
use crate::HelloRequest;
use crate::HelloResponse;

/// Transport seam between topology discovery and the wire protocol.
///
/// `handshake` establishes (or reuses) the physical connection and runs the
/// introspection command; `ping` issues a lightweight health round trip.
/// The discovery core never touches the wire below this trait.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn handshake(
        &self,
        address: String,
    ) -> std::result::Result<HandshakeReply, ConnectError>;

    async fn ping(
        &self,
        address: String,
    ) -> std::result::Result<Duration, ConnectError>;

    async fn close(
        &self,
        address: String,
    );
}

/// Production connector over tonic channels.
///
/// Channels are cached per address and dropped on `close`; endpoint tuning
/// (connect/request timeouts, TCP and HTTP2 keepalive) comes from
/// [`ConnectionConfig`].
pub struct GrpcConnector {
    config: ConnectionConfig,
    channels: DashMap<String, Channel>,
}

impl GrpcConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
        }
    }

    /// Get or create a configured channel for `address`
    async fn channel(
        &self,
        address: &str,
    ) -> std::result::Result<Channel, ConnectError> {
        if let Some(cached) = self.channels.get(address) {
            return Ok(cached.clone());
        }

        debug!(address, "Establishing new gRPC connection");
        let channel = Endpoint::try_from(address.to_string())
            .map_err(|_| ConnectError::InvalidAddress(address.to_string()))?
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .tcp_keepalive(Some(Duration::from_secs(self.config.tcp_keepalive_in_secs)))
            .http2_keep_alive_interval(Duration::from_secs(
                self.config.http2_keep_alive_interval_in_secs,
            ))
            .keep_alive_timeout(Duration::from_secs(self.config.http2_keep_alive_timeout_in_secs))
            .connect()
            .await
            .map_err(|err| {
                error!("connect to {} failed: {}", address, err);
                ConnectError::Unreachable {
                    address: address.to_string(),
                    reason: err.to_string(),
                }
            })?;

        self.channels.insert(address.to_string(), channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn handshake(
        &self,
        address: String,
    ) -> std::result::Result<HandshakeReply, ConnectError> {
        let channel = self.channel(&address).await?;
        let mut grpc = tonic::client::Grpc::new(channel);

        grpc.ready().await.map_err(|err| ConnectError::Unreachable {
            address: address.clone(),
            reason: err.to_string(),
        })?;

        let codec: ProstCodec<HelloRequest, HelloResponse> = ProstCodec::default();
        let request = tonic::Request::new(HelloRequest {
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        let response = grpc
            .unary(request, PathAndQuery::from_static(HELLO_RPC_PATH), codec)
            .await
            .map_err(|status| ConnectError::Handshake {
                address: address.clone(),
                reason: status.message().to_string(),
            })?;

        Ok(HandshakeReply::from(response.into_inner()))
    }

    async fn ping(
        &self,
        address: String,
    ) -> std::result::Result<Duration, ConnectError> {
        let channel = self.channel(&address).await?;
        let mut client = HealthClient::new(channel);

        let started = Instant::now();
        let response = client
            .check(tonic::Request::new(HealthCheckRequest {
                service: HEALTH_PROBE_SERVICE.to_string(),
            }))
            .await
            .map_err(|err| ConnectError::Unreachable {
                address: address.clone(),
                reason: err.to_string(),
            })?
            .into_inner();

        if response.status == ServingStatus::Serving as i32 {
            Ok(started.elapsed())
        } else {
            Err(ConnectError::ServiceUnavailable {
                address,
                status: format!("serving status {}", response.status),
            })
        }
    }

    async fn close(
        &self,
        address: String,
    ) {
        // Dropping the cached channel releases the transport.
        self.channels.remove(&address);
    }
}
