//! Installation name → client identity resolution.

use std::sync::Arc;

use tracing::{debug, info};

use canvas_watch_core::config::{TrackingConfig, resolve_secret_field};
use canvas_watch_core::error::{CanvasWatchError, Result};
use canvas_watch_core::types::ClientInfo;
use canvas_watch_remote::RemoteApi;

/// Local device name, used when no installation name is configured.
pub trait DeviceNameProvider: Send + Sync {
    fn device_name(&self) -> Option<String>;
}

/// Host name of this machine: `HOSTNAME`/`COMPUTERNAME`, then the OS.
pub struct HostnameProvider;

impl DeviceNameProvider for HostnameProvider {
    fn device_name(&self) -> Option<String> {
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                #[cfg(unix)]
                {
                    nix::unistd::gethostname()
                        .ok()
                        .map(|h| h.to_string_lossy().trim().to_string())
                        .filter(|s| !s.is_empty())
                }
                #[cfg(not(unix))]
                {
                    None
                }
            })
    }
}

/// How installation names are compared against the client list.
///
/// Automatic resolution at start-up is exact; manual overrides typed by an
/// operator ignore case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    Exact,
    IgnoreCase,
}

impl MatchPolicy {
    fn matches(self, candidate: &str, wanted: &str) -> bool {
        match self {
            Self::Exact => candidate == wanted,
            Self::IgnoreCase => candidate.to_lowercase() == wanted.to_lowercase(),
        }
    }
}

/// First client whose `installation_name` matches, else the first whose
/// `name` matches.
pub fn find_client<'a>(
    clients: &'a [ClientInfo],
    wanted: &str,
    policy: MatchPolicy,
) -> Option<&'a ClientInfo> {
    clients
        .iter()
        .find(|c| !c.installation_name.is_empty() && policy.matches(&c.installation_name, wanted))
        .or_else(|| {
            clients
                .iter()
                .find(|c| !c.name.is_empty() && policy.matches(&c.name, wanted))
        })
}

/// Resolves this installation's name and maps names to client ids.
pub struct ClientResolver {
    configured_name: Option<String>,
    configured_name_env: Option<String>,
    device: Arc<dyn DeviceNameProvider>,
}

impl ClientResolver {
    pub fn new(configured_name: Option<String>, device: Arc<dyn DeviceNameProvider>) -> Self {
        Self {
            configured_name,
            configured_name_env: None,
            device,
        }
    }

    pub fn from_config(tracking: &TrackingConfig) -> Self {
        Self {
            configured_name: tracking.installation_name.clone(),
            configured_name_env: tracking.installation_name_env.clone(),
            device: Arc::new(HostnameProvider),
        }
    }

    /// The configured installation name, falling back to the device name.
    /// Re-evaluated on every call.
    pub fn installation_name(&self) -> Result<String> {
        if let Some(name) = resolve_secret_field(&self.configured_name, &self.configured_name_env) {
            return Ok(name.trim().to_string());
        }
        match self.device.device_name() {
            Some(name) => {
                debug!(%name, "No installation name configured, using device name");
                Ok(name)
            }
            None => Err(CanvasWatchError::InstallationNameUnavailable),
        }
    }

    /// List clients (fresh on every call) and return the matching one.
    pub async fn resolve_client(
        &self,
        api: &dyn RemoteApi,
        installation_name: &str,
        policy: MatchPolicy,
    ) -> Result<ClientInfo> {
        let clients = api.list_clients().await?;
        let client = find_client(&clients, installation_name, policy)
            .cloned()
            .ok_or_else(|| CanvasWatchError::ClientNotFound(installation_name.to_string()))?;
        info!(installation_name, client_id = %client.id, "Resolved client");
        Ok(client)
    }

    pub async fn resolve_client_id(
        &self,
        api: &dyn RemoteApi,
        installation_name: &str,
        policy: MatchPolicy,
    ) -> Result<String> {
        self.resolve_client(api, installation_name, policy)
            .await
            .map(|c| c.id)
    }
}
