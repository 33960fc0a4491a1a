//! Application launch capability.

use crate::appd::DirectoryApp;
use crate::context::Context;
use crate::core::{Error, InstanceId, Result};
use async_trait::async_trait;

/// Starts applications from their directory entry.
///
/// The returned instance id is the one the new instance will use when it
/// connects. Cleaning up instances that never become ready is up to the
/// launcher.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Launch an app, optionally passing the context it is opened with.
    async fn launch(&self, app: &DirectoryApp, context: Option<&Context>) -> Result<InstanceId>;
}

/// Launcher for hosts that cannot start applications.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableLauncher;

#[async_trait]
impl AppLauncher for UnavailableLauncher {
    async fn launch(&self, app: &DirectoryApp, _context: Option<&Context>) -> Result<InstanceId> {
        tracing::warn!(app = %app.app_id, "launch requested but no launcher is configured");
        Err(Error::LaunchFailed(format!("no launcher available for {}", app.app_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_launcher_fails() {
        let result = UnavailableLauncher.launch(&DirectoryApp::new("chart"), None).await;
        assert!(matches!(result, Err(Error::LaunchFailed(_))));
    }
}
