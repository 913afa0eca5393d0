use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::DNSPacket;
use super::enums::{DNSResourceType, ResponseCode};
use super::resource::DNSResource;
use crate::config::ValidatorConfig;
use crate::error::{DnsError, Result};

/// The records returned for one name/type lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct DnsResponse {
    pub rcode: ResponseCode,
    pub answers: Vec<DNSResource>,
    /// Authority section; carries NSEC/NSEC3 proofs for negative answers
    pub authorities: Vec<DNSResource>,
}

impl DnsResponse {
    pub fn empty(rcode: ResponseCode) -> Self {
        Self {
            rcode,
            answers: Vec::new(),
            authorities: Vec::new(),
        }
    }

    /// Answer records of `rtype` owned by `name`
    pub fn answers_of(&self, name: &str, rtype: DNSResourceType) -> Vec<&DNSResource> {
        self.answers
            .iter()
            .filter(|rr| rr.rtype == rtype && rr.name().eq_ignore_ascii_case(name))
            .collect()
    }
}

impl From<DNSPacket> for DnsResponse {
    fn from(packet: DNSPacket) -> Self {
        Self {
            rcode: packet.rcode(),
            answers: packet.answers,
            authorities: packet.authorities,
        }
    }
}

/// Source of DNS answers for the chain walk. Every call observes the
/// cancellation token.
#[async_trait]
pub trait DnsQuery: Send + Sync {
    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        cancel: &CancellationToken,
    ) -> Result<DnsResponse>;
}

/// Queries recursive resolvers over UDP with TCP fallback on truncation.
pub struct UdpDnsClient {
    resolvers: Vec<SocketAddr>,
    query_timeout: Duration,
    max_retries: u8,
}

impl UdpDnsClient {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            resolvers: config.resolvers.clone(),
            query_timeout: config.query_timeout,
            max_retries: config.max_retries,
        }
    }

    async fn query_with_retries(&self, name: &str, rtype: DNSResourceType) -> Result<DNSPacket> {
        if self.resolvers.is_empty() {
            return Err(DnsError::NoResolvers);
        }

        let mut last_error = DnsError::NoResolvers;
        for retry in 0..=self.max_retries {
            let server = self.resolvers[retry as usize % self.resolvers.len()];
            let query = DNSPacket::query(rand::random::<u16>(), name, rtype, true);

            match self.send_query_with_timeout(&query, server).await {
                Ok(response) if response.rcode() == ResponseCode::ServerFailure => {
                    debug!("{} returned SERVFAIL for {} {}", server, name, rtype);
                    last_error = DnsError::ServerFailure {
                        name: name.to_string(),
                    };
                }
                Ok(response) => {
                    if retry > 0 {
                        debug!("Query for {} {} succeeded on retry {}", name, rtype, retry);
                    }
                    return Ok(response);
                }
                Err(e) => {
                    debug!("Query attempt {} for {} failed: {}", retry + 1, name, e);
                    last_error = e;
                }
            }

            if retry < self.max_retries {
                tokio::time::sleep(Duration::from_millis(100 * (u64::from(retry) + 1))).await;
            }
        }

        Err(last_error)
    }

    /// Try UDP first, fall back to TCP if the answer is truncated
    async fn send_query_with_timeout(
        &self,
        query: &DNSPacket,
        server: SocketAddr,
    ) -> Result<DNSPacket> {
        let query_bytes = query.serialize()?;
        let name = query
            .questions
            .first()
            .map(|q| q.labels.join("."))
            .unwrap_or_default();

        let exchange = async {
            let response = self.send_udp_query(&query_bytes, server).await?;
            if response.header.tc {
                debug!("UDP response from {} truncated, retrying with TCP", server);
                self.send_tcp_query(&query_bytes, server).await
            } else {
                Ok(response)
            }
        };

        let response = timeout(self.query_timeout, exchange)
            .await
            .map_err(|_| DnsError::Timeout { name })??;

        if response.header.id != query.header.id || !response.header.qr {
            return Err(DnsError::Parse(format!(
                "Mismatched response id {} from {}",
                response.header.id, server
            )));
        }

        Ok(response)
    }

    async fn send_udp_query(&self, query_bytes: &[u8], server: SocketAddr) -> Result<DNSPacket> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;
        socket.send(query_bytes).await?;

        let mut response_buf = vec![0u8; 4096];
        let response_len = socket.recv(&mut response_buf).await?;
        trace!("Received {} bytes over UDP from {}", response_len, server);

        Ok(DNSPacket::parse(&response_buf[..response_len])?)
    }

    async fn send_tcp_query(&self, query_bytes: &[u8], server: SocketAddr) -> Result<DNSPacket> {
        let mut stream = TcpStream::connect(server).await?;

        stream
            .write_all(&(query_bytes.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(query_bytes).await?;
        stream.flush().await?;

        let mut length_buf = [0u8; 2];
        stream.read_exact(&mut length_buf).await?;
        let response_length = u16::from_be_bytes(length_buf) as usize;

        let mut response_buf = vec![0; response_length];
        stream.read_exact(&mut response_buf).await?;
        trace!("Received {} bytes over TCP from {}", response_length, server);

        Ok(DNSPacket::parse(&response_buf)?)
    }
}

#[async_trait]
impl DnsQuery for UdpDnsClient {
    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        cancel: &CancellationToken,
    ) -> Result<DnsResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DnsError::Cancelled),
            result = self.query_with_retries(name, rtype) => result.map(DnsResponse::from),
        }
    }
}
