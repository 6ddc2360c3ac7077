use std::net::IpAddr;
use tracing::debug;
use crate::gateway::livebox::{LiveboxError, LiveboxResolver};

pub mod livebox;

#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the current public address of the network.
    async fn wan_ip(&self) -> Result<IpAddr, Self::Error>;
}

/// Where the WAN address comes from. A fixed address set by the operator
/// always wins over the gateway.
#[derive(Debug)]
pub enum WanIpSource {
    Fixed(IpAddr),
    Livebox(LiveboxResolver),
}

#[async_trait::async_trait]
impl Resolver for WanIpSource {
    type Error = LiveboxError;

    async fn wan_ip(&self) -> Result<IpAddr, Self::Error> {
        match self {
            WanIpSource::Fixed(ip) => {
                debug!(%ip, "using the configured WAN IP");
                Ok(*ip)
            }
            WanIpSource::Livebox(livebox) => livebox.wan_ip().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_ip_is_returned_as_is() {
        let source = WanIpSource::Fixed("9.9.9.9".parse().unwrap());
        assert_eq!(source.wan_ip().await.unwrap(), "9.9.9.9".parse::<IpAddr>().unwrap());
    }
}
