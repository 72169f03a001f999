//! Content-processing plugins for local tracks
//!
//! A plugin turns a native track into a processed one (noise suppression,
//! virtual background). Plugins on a track run as a chain; the sender carries
//! the output of the last plugin.

use crate::track::NativeTrack;
use crate::types::MediaKind;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Plugin errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Plugin cannot run here
    #[error("Plugin {name} is not supported: {reason}")]
    Unsupported {
        /// Plugin name
        name: String,
        /// Why
        reason: String,
    },

    /// A plugin with the same name is already on the track
    #[error("Plugin {0} is already added")]
    AlreadyAdded(String),

    /// No plugin with that name on the track
    #[error("Plugin {0} not found")]
    NotFound(String),

    /// Initialization failed
    #[error("Plugin {name} failed to initialize: {message}")]
    InitFailed {
        /// Plugin name
        name: String,
        /// Failure description
        message: String,
    },

    /// Processing failed
    #[error("Plugin {name} failed to process track: {message}")]
    ProcessingFailed {
        /// Plugin name
        name: String,
        /// Failure description
        message: String,
    },
}

/// Result of a support check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSupport {
    /// Whether the plugin can run
    pub is_supported: bool,
    /// Reason when unsupported
    pub reason: Option<String>,
}

impl PluginSupport {
    /// Supported
    #[must_use]
    pub fn supported() -> Self {
        Self {
            is_supported: true,
            reason: None,
        }
    }

    /// Unsupported for `reason`
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            is_supported: false,
            reason: Some(reason.into()),
        }
    }
}

/// A content processor attached to a local track
#[async_trait]
pub trait TrackPlugin: Send + Sync {
    /// Unique name
    fn name(&self) -> &str;

    /// Media kind the plugin processes
    fn kind(&self) -> MediaKind;

    /// Whether the plugin can run in this environment
    fn check_support(&self) -> PluginSupport {
        PluginSupport::supported()
    }

    /// Prepare resources before the first `process`
    async fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Produce a processed track from `input`
    async fn process(&self, input: &NativeTrack) -> Result<NativeTrack, PluginError>;

    /// Release resources
    async fn stop(&self) {}
}

/// Ordered plugin chain of one local track
pub struct PluginsManager {
    kind: MediaKind,
    plugins: Vec<Arc<dyn TrackPlugin>>,
}

impl PluginsManager {
    /// Empty chain for tracks of `kind`
    #[must_use]
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            plugins: Vec::new(),
        }
    }

    /// Names in chain order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Whether `plugin` could be added to this chain
    #[must_use]
    pub fn validate(&self, plugin: &dyn TrackPlugin) -> PluginSupport {
        if plugin.kind() != self.kind {
            return PluginSupport::unsupported(format!(
                "{} plugin cannot process {} tracks",
                plugin.kind(),
                self.kind
            ));
        }
        plugin.check_support()
    }

    /// Add `plugin` and process `input` through the whole chain
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unsupported, duplicated, fails to
    /// initialize, or the chain fails to process
    pub async fn add(
        &mut self,
        plugin: Arc<dyn TrackPlugin>,
        input: &NativeTrack,
    ) -> Result<Option<NativeTrack>, PluginError> {
        let name = plugin.name().to_string();
        let support = self.validate(plugin.as_ref());
        if !support.is_supported {
            return Err(PluginError::Unsupported {
                name,
                reason: support.reason.unwrap_or_default(),
            });
        }
        if self.plugins.iter().any(|p| p.name() == name) {
            return Err(PluginError::AlreadyAdded(name));
        }
        plugin.init().await?;
        self.plugins.push(plugin);
        tracing::info!(plugin = %name, kind = %self.kind, "Plugin added");
        self.reprocess(input).await
    }

    /// Remove the plugin called `name` and reprocess `input`
    ///
    /// # Errors
    ///
    /// Returns error if no such plugin exists or the remaining chain fails
    pub async fn remove(
        &mut self,
        name: &str,
        input: &NativeTrack,
    ) -> Result<Option<NativeTrack>, PluginError> {
        let index = self
            .plugins
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let plugin = self.plugins.remove(index);
        plugin.stop().await;
        tracing::info!(plugin = %name, kind = %self.kind, "Plugin removed");
        self.reprocess(input).await
    }

    /// Run `input` through the chain; `None` when the chain is empty
    ///
    /// # Errors
    ///
    /// Returns the first plugin failure
    pub async fn reprocess(&self, input: &NativeTrack) -> Result<Option<NativeTrack>, PluginError> {
        let mut current: Option<NativeTrack> = None;
        for plugin in &self.plugins {
            let source = current.as_ref().unwrap_or(input);
            let processed = plugin.process(source).await?;
            if let Some(intermediate) = current.replace(processed) {
                intermediate.stop();
            }
        }
        Ok(current)
    }

    /// Stop every plugin and empty the chain
    pub async fn cleanup(&mut self) {
        for plugin in self.plugins.drain(..) {
            plugin.stop().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::TaggingPlugin;

    fn mic() -> NativeTrack {
        NativeTrack::remote("mic-1", "local", MediaKind::Audio)
    }

    #[tokio::test]
    async fn test_chain_processes_in_order() {
        let mut manager = PluginsManager::new(MediaKind::Audio);
        let input = mic();
        let first = manager
            .add(Arc::new(TaggingPlugin::new("denoise", MediaKind::Audio)), &input)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id(), "mic-1+denoise");

        let chained = manager
            .add(Arc::new(TaggingPlugin::new("gain", MediaKind::Audio)), &input)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chained.id(), "mic-1+denoise+gain");
        assert_eq!(manager.names(), vec!["denoise", "gain"]);
    }

    #[tokio::test]
    async fn test_wrong_kind_is_unsupported() {
        let mut manager = PluginsManager::new(MediaKind::Audio);
        let err = manager
            .add(Arc::new(TaggingPlugin::new("blur", MediaKind::Video)), &mic())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Unsupported { .. }));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_removing_last_plugin_returns_none() {
        let mut manager = PluginsManager::new(MediaKind::Audio);
        let input = mic();
        manager
            .add(Arc::new(TaggingPlugin::new("denoise", MediaKind::Audio)), &input)
            .await
            .unwrap();
        assert!(manager.remove("denoise", &input).await.unwrap().is_none());
        assert!(matches!(
            manager.remove("denoise", &input).await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut manager = PluginsManager::new(MediaKind::Audio);
        let input = mic();
        manager
            .add(Arc::new(TaggingPlugin::new("denoise", MediaKind::Audio)), &input)
            .await
            .unwrap();
        let err = manager
            .add(Arc::new(TaggingPlugin::new("denoise", MediaKind::Audio)), &input)
            .await
            .unwrap_err();
        assert_eq!(err, PluginError::AlreadyAdded("denoise".to_string()));
    }
}
