use std::{fmt, net::IpAddr};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use url::Url;

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Master,
    Agent,
    PublicAgent,
}

/// A cluster member as reported by node discovery. Identity is `ip`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NodeDescriptor {
    pub ip: IpAddr,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesos_id: Option<String>,
    #[serde(default)]
    pub leader: bool,
}

impl NodeDescriptor {
    /// Directory prefix for this node's entries inside a cluster archive.
    pub fn archive_prefix(&self) -> String {
        format!("{}_{}", self.ip, self.role)
    }
}

/// The identity of the node this process runs on, passed by construction.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    pub ip: IpAddr,
    pub role: Role,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.ip, self.role)
    }
}

/// Renders an address usable as the host part of a URL.
pub fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build base url for {ip}"))]
    ParseBaseUrl { source: url::ParseError, ip: IpAddr },
}

/// Maps `(ip, role)` to the base URL of that node's diagnostics service.
#[derive(Clone, Debug)]
pub struct UrlBuilder {
    master_port: u16,
    agent_port: u16,
    force_tls: bool,
}

impl UrlBuilder {
    pub fn new(master_port: u16, agent_port: u16, force_tls: bool) -> Self {
        Self {
            master_port,
            agent_port,
            force_tls,
        }
    }

    pub fn base(&self, ip: IpAddr, role: Role) -> Result<Url, Error> {
        let port = match role {
            Role::Master => self.master_port,
            Role::Agent | Role::PublicAgent => self.agent_port,
        };
        let scheme = if self.force_tls { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{}:{port}/", url_host(ip)))
            .context(ParseBaseUrlSnafu { ip })
    }
}
