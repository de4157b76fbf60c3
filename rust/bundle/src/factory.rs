use std::{collections::HashMap, net::IpAddr, path::PathBuf, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::{
    collector::{Collector, CommandCollector, EndpointCollector, FileCollector},
    node::{url_host, Role},
};

pub const DEFAULT_COLLECTOR_TIMEOUT: Duration = Duration::from_secs(60);

/// The endpoints-configuration document handed in by the deployment. Field
/// names are fixed by the external contract.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EndpointsConfig {
    #[serde(rename = "HTTPEndpoints", default)]
    pub http_endpoints: Vec<HttpEndpointSpec>,
    #[serde(rename = "LocalFiles", default)]
    pub local_files: Vec<LocalFileSpec>,
    #[serde(rename = "LocalCommands", default)]
    pub local_commands: Vec<LocalCommandSpec>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpEndpointSpec {
    /// Roles this endpoint applies to; empty means all roles.
    #[serde(default)]
    pub role: Vec<Role>,
    #[serde(default)]
    pub optional: bool,
    pub port: u16,
    #[serde(rename = "URI")]
    pub uri: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalFileSpec {
    #[serde(default)]
    pub role: Vec<Role>,
    #[serde(default)]
    pub optional: bool,
    pub location: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalCommandSpec {
    #[serde(default)]
    pub role: Vec<Role>,
    #[serde(default)]
    pub optional: bool,
    pub command: Vec<String>,
}

/// Translates the endpoints configuration into the concrete collector list
/// for one node role.
pub struct CollectorFactory {
    config: EndpointsConfig,
    http: reqwest::Client,
    endpoint_host: IpAddr,
    collector_timeout: Duration,
}

impl CollectorFactory {
    pub fn new(
        config: EndpointsConfig,
        http: reqwest::Client,
        endpoint_host: IpAddr,
        collector_timeout: Duration,
    ) -> Self {
        Self {
            config,
            http,
            endpoint_host,
            collector_timeout,
        }
    }

    pub fn collectors_for(&self, role: Role) -> Vec<Box<dyn Collector>> {
        let mut names = HashMap::new();
        let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

        for spec in &self.config.http_endpoints {
            if !applies(&spec.role, role) {
                continue;
            }
            let raw = format!(
                "http://{}:{}{}",
                url_host(self.endpoint_host),
                spec.port,
                spec.uri
            );
            let url = match Url::parse(&raw) {
                Ok(url) => url,
                Err(error) => {
                    tracing::warn!(
                        endpoint.url = %raw,
                        error = &error as &dyn std::error::Error,
                        "skipping endpoint with malformed url"
                    );
                    continue;
                }
            };
            let name = spec
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}-{}.json", spec.port, sanitize_uri(&spec.uri)));
            collectors.push(Box::new(EndpointCollector::new(
                dedup(&mut names, name),
                spec.optional,
                url,
                self.http.clone(),
                self.collector_timeout,
            )));
        }

        for spec in &self.config.local_files {
            if !applies(&spec.role, role) {
                continue;
            }
            let name = file_entry_name(&spec.location);
            collectors.push(Box::new(FileCollector::new(
                dedup(&mut names, name),
                spec.optional,
                spec.location.clone(),
            )));
        }

        for spec in &self.config.local_commands {
            if !applies(&spec.role, role) {
                continue;
            }
            if spec.command.is_empty() {
                tracing::warn!("skipping empty command in endpoints configuration");
                continue;
            }
            let name = command_entry_name(&spec.command);
            collectors.push(Box::new(CommandCollector::new(
                dedup(&mut names, name),
                spec.optional,
                spec.command.clone(),
                self.collector_timeout,
            )));
        }

        collectors
    }
}

fn applies(roles: &[Role], role: Role) -> bool {
    roles.is_empty() || roles.contains(&role)
}

/// Duplicate generated names get a trailing `-<k>` in enumeration order;
/// the first occurrence keeps the bare name.
fn dedup(names: &mut HashMap<String, u32>, name: String) -> String {
    match names.get_mut(&name) {
        None => {
            names.insert(name.clone(), 0);
            name
        }
        Some(k) => {
            let suffixed = format!("{name}-{k}");
            *k += 1;
            suffixed
        }
    }
}

fn sanitize_uri(uri: &str) -> String {
    uri.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_entry_name(location: &std::path::Path) -> String {
    location
        .to_string_lossy()
        .trim_start_matches('/')
        .replace('/', "_")
}

fn command_entry_name(command: &[String]) -> String {
    format!("{}.output", command.join("_").replace('/', ""))
}
