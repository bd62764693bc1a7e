// 源地址解析
//
// 每个厂商对应一种取流地址的获取方式：模板替换，或者通过 ONVIF
// 向设备查询媒体配置。厂商表在启动时由配置构建，请求处理时只查表。

mod onvif;
mod template;

pub use onvif::OnvifClient;
pub use template::{redact, with_credentials, UrlTemplate};

use crate::config::{VendorConfig, VendorsConfig};
use async_trait::async_trait;
use common::{ConnectionParams, GatewayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 设备上的一个媒体配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaProfile {
    pub name: String,
    pub token: String,
}

/// 发现协议的目标设备
#[derive(Debug, Clone)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub account: String,
    pub password: String,
}

/// 设备发现客户端
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// 列出设备的媒体配置
    async fn profiles(&self, device: &DeviceEndpoint) -> Result<Vec<MediaProfile>>;

    /// 获取指定配置的取流地址
    async fn stream_uri(&self, device: &DeviceEndpoint, profile_token: &str) -> Result<String>;
}

/// 厂商取流地址策略
#[derive(Debug, Clone)]
pub enum VendorStrategy {
    Template(UrlTemplate),
    Discovery { port: u16, profile: String },
}

impl From<&VendorConfig> for VendorStrategy {
    fn from(config: &VendorConfig) -> Self {
        match config {
            VendorConfig::Template { template, subtype } => {
                VendorStrategy::Template(UrlTemplate::new(template.clone(), subtype.clone()))
            }
            VendorConfig::Onvif { port, profile } => VendorStrategy::Discovery {
                port: *port,
                profile: profile.clone(),
            },
        }
    }
}

/// 按名称匹配优先的配置，找不到时取第一个
pub fn select_profile<'a>(profiles: &'a [MediaProfile], preference: &str) -> Option<&'a MediaProfile> {
    profiles
        .iter()
        .find(|p| p.name.contains(preference))
        .or_else(|| profiles.first())
}

pub struct AddressResolver {
    vendors: HashMap<String, VendorStrategy>,
    default_vendor: Option<String>,
    discovery: Arc<dyn DiscoveryClient>,
    discovery_timeout: Duration,
}

impl AddressResolver {
    pub fn new(
        config: &VendorsConfig,
        discovery: Arc<dyn DiscoveryClient>,
        discovery_timeout: Duration,
    ) -> Self {
        let vendors = config
            .entries
            .iter()
            .map(|(name, vendor)| (name.clone(), VendorStrategy::from(vendor)))
            .collect();

        Self {
            vendors,
            default_vendor: config.default.clone(),
            discovery,
            discovery_timeout,
        }
    }

    fn strategy(&self, vendor: &str) -> Result<&VendorStrategy> {
        if let Some(strategy) = self.vendors.get(vendor) {
            return Ok(strategy);
        }

        let fallback = self
            .default_vendor
            .as_deref()
            .and_then(|name| self.vendors.get(name).map(|s| (name, s)));

        match fallback {
            Some((name, strategy)) => {
                warn!("Vendor '{}' is not configured, using default '{}'", vendor, name);
                Ok(strategy)
            }
            None => Err(GatewayError::Resolution(format!(
                "Vendor '{}' is not configured and no default vendor is set",
                vendor
            ))),
        }
    }

    /// 解析取流地址
    pub async fn resolve(&self, vendor: &str, params: &ConnectionParams) -> Result<String> {
        if params.ip.trim().is_empty() || params.account.trim().is_empty() {
            return Err(GatewayError::Resolution(
                "Device address and account are required".to_string(),
            ));
        }

        let address = match self.strategy(vendor)? {
            VendorStrategy::Template(template) => template.render(params),
            VendorStrategy::Discovery { port, profile } => {
                self.discover(params, *port, profile).await?
            }
        };

        if address.trim().is_empty() {
            return Err(GatewayError::Resolution(format!(
                "Vendor '{}' produced an empty source address",
                vendor
            )));
        }

        info!("Resolved source address for {}: {}", vendor, redact(&address));
        Ok(address)
    }

    async fn discover(&self, params: &ConnectionParams, port: u16, preference: &str) -> Result<String> {
        let device = DeviceEndpoint {
            host: params.ip.clone(),
            port,
            account: params.account.clone(),
            password: params.password.clone(),
        };

        let lookup = async {
            let profiles = self.discovery.profiles(&device).await?;
            debug!("Device {}:{} reported {} profiles", device.host, port, profiles.len());

            let profile = select_profile(&profiles, preference).ok_or_else(|| {
                GatewayError::Resolution(format!("Device {} has no media profiles", device.host))
            })?;

            self.discovery.stream_uri(&device, &profile.token).await
        };

        let uri = tokio::time::timeout(self.discovery_timeout, lookup)
            .await
            .map_err(|_| {
                GatewayError::Resolution(format!(
                    "Discovery on {}:{} timed out after {:?}",
                    device.host, port, self.discovery_timeout
                ))
            })??;

        if uri.trim().is_empty() {
            return Err(GatewayError::Resolution(format!(
                "Device {} returned an empty stream address",
                device.host
            )));
        }

        Ok(with_credentials(&uri, &params.account, &params.password))
    }
}
