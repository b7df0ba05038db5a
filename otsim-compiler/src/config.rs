//! Configuration for the compiler.

use otsim_common::LoggingConfig;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tracing::warn;

use crate::catalog::{CatalogOverrides, DEFAULT_INFRASTRUCTURE};
use crate::document::{
    API_CA_DESTINATION, API_CERTIFICATE_DESTINATION, API_KEY_DESTINATION, ApiSection, ElasticLogs,
    GroundTruthSection, LogsSection, MessageBus,
};
use crate::ordered::OrderedMap;
use crate::error::{CompileError, Result};
use crate::topology::{EndpointSetting, FederateSetting, HelicsMetadata};

/// Default message bus pull endpoint.
pub const DEFAULT_PULL_ENDPOINT: &str = "tcp://127.0.0.1:1234";
/// Default message bus publish endpoint.
pub const DEFAULT_PUB_ENDPOINT: &str = "tcp://127.0.0.1:5678";
/// Default CPU module API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "0.0.0.0:9101";
/// Default Elasticsearch endpoint of the ground-truth module.
pub const DEFAULT_ELASTIC_ENDPOINT: &str = "http://localhost:9200";
/// Default Elasticsearch index base name of the ground-truth module.
pub const DEFAULT_INDEX_BASE_NAME: &str = "ot-sim";
/// Default Elasticsearch index for shipped logs.
pub const DEFAULT_LOG_INDEX: &str = "ot-sim-logs";
/// Default HELICS federate for devices declared without a `federate/` prefix.
pub const DEFAULT_FEDERATE: &str = "OpenDSS";
/// Endpoint name used when the app does not set one.
pub const DEFAULT_ENDPOINT_NAME: &str = "updates";

/// Complete compiler configuration (app-level metadata).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompilerConfig {
    /// Infrastructure used by nodes that don't name one.
    #[serde(default = "default_infrastructure")]
    pub infrastructure: String,

    /// Catalog extensions, merged at device-type granularity.
    #[serde(default)]
    pub infrastructures: CatalogOverrides,

    #[serde(default)]
    pub message_bus: MessageBusSettings,

    #[serde(default)]
    pub cpu_module: CpuModuleSettings,

    /// Log shipping applied to every node without its own.
    #[serde(default)]
    pub logs: Option<LogsSettings>,

    /// Ground-truth module enabled on every node unless a node disables it.
    #[serde(default)]
    pub ground_truth_module: Option<GroundTruthSettings>,

    /// Default HELICS broker, federate and endpoint.
    #[serde(default)]
    pub helics: HelicsMetadata,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_infrastructure() -> String {
    DEFAULT_INFRASTRUCTURE.to_string()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            infrastructure: default_infrastructure(),
            infrastructures: CatalogOverrides::default(),
            message_bus: MessageBusSettings::default(),
            cpu_module: CpuModuleSettings::default(),
            logs: None,
            ground_truth_module: None,
            helics: HelicsMetadata::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Message bus endpoints, app-level or per node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MessageBusSettings {
    #[serde(default)]
    pub pull_endpoint: Option<String>,
    #[serde(default)]
    pub pub_endpoint: Option<String>,
}

/// CPU module settings, app-level or per node.
///
/// The `api` object wins over the flat `api-endpoint` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CpuModuleSettings {
    #[serde(default)]
    pub api: Option<ApiSettings>,

    /// `None` when unset, `Some(None)` when explicitly `null` (API disabled).
    #[serde(default, deserialize_with = "explicit_null")]
    pub api_endpoint: Option<Option<String>>,
}

/// CPU API with optional TLS. Certificate values are host paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
    #[serde(default)]
    pub tls_certificate: Option<String>,
    #[serde(default)]
    pub ca_certificate: Option<String>,
}

impl ApiSettings {
    fn resolve(&self, default_endpoint: &str) -> NodeApi {
        let endpoint = self.endpoint.as_deref().unwrap_or(default_endpoint);
        let mut api = NodeApi::plain(endpoint);

        match (&self.tls_key, &self.tls_certificate) {
            (Some(key), Some(certificate)) => {
                api.section.tls_key = Some(API_KEY_DESTINATION.to_string());
                api.section.tls_certificate = Some(API_CERTIFICATE_DESTINATION.to_string());
                api.certificates.push(CertificateFile::new(key, API_KEY_DESTINATION));
                api.certificates.push(CertificateFile::new(
                    certificate,
                    API_CERTIFICATE_DESTINATION,
                ));
            }
            (None, None) => {}
            _ => warn!(
                "cpu-module.api on {}: tls-key and tls-certificate must be set together, TLS not enabled",
                endpoint
            ),
        }

        if let Some(ca) = &self.ca_certificate {
            api.section.ca_certificate = Some(API_CA_DESTINATION.to_string());
            api.certificates.push(CertificateFile::new(ca, API_CA_DESTINATION));
        }

        api
    }
}

/// Host file copied onto the VM at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFile {
    pub src: String,
    pub dst: &'static str,
}

impl CertificateFile {
    fn new(src: &str, dst: &'static str) -> Self {
        Self {
            src: src.to_string(),
            dst,
        }
    }
}

/// Resolved CPU API of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeApi {
    pub section: ApiSection,
    pub certificates: Vec<CertificateFile>,
}

impl NodeApi {
    fn plain(endpoint: &str) -> Self {
        Self {
            section: ApiSection::plain(endpoint),
            certificates: Vec::new(),
        }
    }
}

/// Log shipping settings, app-level or per node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LogsSettings {
    #[serde(default)]
    pub elastic: Option<ElasticLogSettings>,
    /// Loki push endpoint.
    #[serde(default)]
    pub loki: Option<String>,
}

/// Elasticsearch log target; ignored without an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ElasticLogSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
}

/// Ground-truth module settings, app-level or per node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GroundTruthSettings {
    #[serde(default)]
    pub elastic: Option<GroundTruthElastic>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroundTruthElastic {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub index_base_name: Option<String>,
    /// Extra labels attached to every published document.
    #[serde(default)]
    pub labels: OrderedMap<String>,
}

/// Distinguish a missing key from an explicit `null`.
pub(crate) fn explicit_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl CompilerConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: CompilerConfig = otsim_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: CompilerConfig = otsim_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.infrastructure.is_empty() {
            return Err(CompileError::config("infrastructure cannot be empty"));
        }

        for infra in self.infrastructures.keys() {
            if infra.is_empty() {
                return Err(CompileError::config(
                    "infrastructures: infrastructure name cannot be empty",
                ));
            }
        }

        for (key, value) in [
            ("pull-endpoint", &self.message_bus.pull_endpoint),
            ("pub-endpoint", &self.message_bus.pub_endpoint),
        ] {
            if value.as_deref() == Some("") {
                return Err(CompileError::config(format!(
                    "message-bus.{} cannot be empty",
                    key
                )));
            }
        }

        if let Some(Some(api)) = &self.cpu_module.api_endpoint {
            if api.is_empty() {
                return Err(CompileError::config(
                    "cpu-module.api-endpoint cannot be empty (use null to disable)",
                ));
            }
        }

        if let Some(api) = &self.cpu_module.api {
            for (key, value) in [
                ("endpoint", &api.endpoint),
                ("tls-key", &api.tls_key),
                ("tls-certificate", &api.tls_certificate),
                ("ca-certificate", &api.ca_certificate),
            ] {
                if value.as_deref() == Some("") {
                    return Err(CompileError::config(format!(
                        "cpu-module.api.{} cannot be empty",
                        key
                    )));
                }
            }
        }

        if let Some(logs) = &self.logs {
            let elastic = logs.elastic.as_ref().and_then(|e| e.endpoint.as_deref());
            if elastic == Some("") || logs.loki.as_deref() == Some("") {
                return Err(CompileError::config("logs: endpoints cannot be empty"));
            }
        }

        if self.default_federate().is_empty() {
            return Err(CompileError::config("helics.federate cannot be empty"));
        }

        Ok(())
    }

    /// Federate prefixed to device names declared without one.
    pub fn default_federate(&self) -> &str {
        self.helics
            .federate
            .as_ref()
            .and_then(FederateSetting::name)
            .unwrap_or(DEFAULT_FEDERATE)
    }

    /// Message endpoint given to devices that don't declare one, already
    /// qualified with a federate. `None` when disabled with `false`.
    pub fn default_endpoint(&self) -> Option<String> {
        let federate = self.default_federate();

        match &self.helics.endpoint {
            Some(EndpointSetting::Enabled(false)) => None,
            Some(EndpointSetting::Name(name)) if name.contains('/') => Some(name.clone()),
            Some(EndpointSetting::Name(name)) => Some(format!("{}/{}", federate, name)),
            Some(EndpointSetting::Enabled(true)) | None => {
                Some(format!("{}/{}", federate, DEFAULT_ENDPOINT_NAME))
            }
        }
    }

    /// Message bus endpoints for a node, with per-node settings taking
    /// precedence over app-level ones.
    pub fn message_bus(&self, node: Option<&MessageBusSettings>) -> MessageBus {
        let pick = |local: Option<&String>, app: Option<&String>, default: &str| {
            local.or(app).cloned().unwrap_or_else(|| default.to_string())
        };

        MessageBus {
            pull_endpoint: pick(
                node.and_then(|n| n.pull_endpoint.as_ref()),
                self.message_bus.pull_endpoint.as_ref(),
                DEFAULT_PULL_ENDPOINT,
            ),
            pub_endpoint: pick(
                node.and_then(|n| n.pub_endpoint.as_ref()),
                self.message_bus.pub_endpoint.as_ref(),
                DEFAULT_PUB_ENDPOINT,
            ),
        }
    }

    /// CPU API for a node; `None` when disabled.
    ///
    /// A node's `api` object inherits the app-level endpoint. A node that
    /// sets neither `api` nor `api-endpoint` gets the app-level API.
    pub fn api(&self, node: Option<&CpuModuleSettings>) -> Option<NodeApi> {
        let app = self.app_api();
        let Some(node) = node else {
            return app;
        };

        if let Some(api) = &node.api {
            let endpoint = app
                .as_ref()
                .map_or(DEFAULT_API_ENDPOINT, |a| a.section.endpoint.as_str());
            return Some(api.resolve(endpoint));
        }

        match &node.api_endpoint {
            Some(endpoint) => endpoint.as_deref().map(NodeApi::plain),
            None => app,
        }
    }

    fn app_api(&self) -> Option<NodeApi> {
        if let Some(api) = &self.cpu_module.api {
            return Some(api.resolve(DEFAULT_API_ENDPOINT));
        }

        match &self.cpu_module.api_endpoint {
            Some(endpoint) => endpoint.as_deref().map(NodeApi::plain),
            None => Some(NodeApi::plain(DEFAULT_API_ENDPOINT)),
        }
    }

    /// Log shipping for a node. Each target set on the node replaces the
    /// app-level one; a node Elasticsearch target without an index takes the
    /// app-level index.
    pub fn logs(&self, node: Option<&LogsSettings>) -> Option<LogsSection> {
        let app = self.logs.as_ref();
        let app_index = app
            .and_then(|l| l.elastic.as_ref())
            .and_then(|e| e.index.as_deref());

        let elastic = node
            .and_then(|n| n.elastic.as_ref())
            .or_else(|| app.and_then(|l| l.elastic.as_ref()))
            .and_then(|e| {
                Some(ElasticLogs {
                    endpoint: e.endpoint.clone()?,
                    index: e
                        .index
                        .as_deref()
                        .or(app_index)
                        .unwrap_or(DEFAULT_LOG_INDEX)
                        .to_string(),
                })
            });

        let loki = node
            .and_then(|n| n.loki.clone())
            .or_else(|| app.and_then(|l| l.loki.clone()));

        if elastic.is_none() && loki.is_none() {
            return None;
        }
        Some(LogsSection { elastic, loki })
    }

    /// Ground-truth module for a node. `Some(None)` is a node that disabled
    /// it with `null`; unset node values fall back to the app level.
    pub fn ground_truth(
        &self,
        node: Option<&Option<GroundTruthSettings>>,
    ) -> Option<GroundTruthSection> {
        let app = self
            .ground_truth_module
            .as_ref()
            .and_then(|g| g.elastic.as_ref());
        let local = match node {
            Some(None) => return None,
            Some(Some(settings)) => settings.elastic.as_ref(),
            None => None,
        };
        let elastic = local.or(app)?;

        let endpoint = elastic
            .endpoint
            .as_deref()
            .or(app.and_then(|a| a.endpoint.as_deref()))
            .unwrap_or(DEFAULT_ELASTIC_ENDPOINT);
        let index_base_name = elastic
            .index_base_name
            .as_deref()
            .or(app.and_then(|a| a.index_base_name.as_deref()))
            .unwrap_or(DEFAULT_INDEX_BASE_NAME);
        let labels = match app {
            Some(app) if elastic.labels.is_empty() => app.labels.clone(),
            _ => elastic.labels.clone(),
        };

        Some(GroundTruthSection {
            endpoint: endpoint.to_string(),
            index_base_name: index_base_name.to_string(),
            labels,
        })
    }
}
