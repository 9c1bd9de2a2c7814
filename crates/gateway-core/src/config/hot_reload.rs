//! Configuration hot-reload for zero-downtime updates.
//!
//! Watches the config file's mtime, reloads and re-validates on change, and
//! broadcasts the new snapshot to subscribers. Beyond just notifying,
//! `ConfigWatcher` additionally swaps the live route table and forward
//! engine settings in place (§5's copy-on-write strategy).

use crate::config::settings::load_settings;
use crate::config::validation::ConfigValidator;
use crate::models::settings::GatewaySettings;
use crate::services::pipeline::ForwardEngine;
use crate::services::router::DynamicRouter;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;

/// A single configuration update event: the new settings, when it was
/// loaded, and a monotonically increasing version number.
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub settings: Arc<GatewaySettings>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: u64,
}

/// Watches the configuration file for changes and broadcasts updates,
/// swapping the route table and forward-engine settings on every valid
/// reload.
pub struct ConfigWatcher {
    current_config: Arc<RwLock<ConfigUpdate>>,
    config_path: String,
    update_sender: broadcast::Sender<ConfigUpdate>,
    version_counter: Arc<std::sync::atomic::AtomicU64>,
    router: Arc<DynamicRouter>,
    engine: Arc<ForwardEngine>,
}

impl ConfigWatcher {
    pub fn new(
        initial_config: GatewaySettings,
        config_path: String,
        router: Arc<DynamicRouter>,
        engine: Arc<ForwardEngine>,
    ) -> Self {
        let (update_sender, _) = broadcast::channel(100);

        let initial_update = ConfigUpdate {
            settings: Arc::new(initial_config),
            timestamp: chrono::Utc::now(),
            version: 1,
        };

        Self {
            current_config: Arc::new(RwLock::new(initial_update)),
            config_path,
            update_sender,
            version_counter: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            router,
            engine,
        }
    }

    pub async fn get_current_config(&self) -> ConfigUpdate {
        self.current_config.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate> {
        self.update_sender.subscribe()
    }

    /// Spawns a background task that checks the file every 5 seconds for
    /// modifications and automatically reloads when changes are detected.
    pub fn start_watching(self: &Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(5));
        let watcher = self.clone();

        tokio::spawn(async move {
            let mut last_modified = get_file_modified_time(&watcher.config_path).await;

            loop {
                ticker.tick().await;

                match get_file_modified_time(&watcher.config_path).await {
                    Some(modified_time) => {
                        if Some(modified_time) != last_modified {
                            info!("configuration file changed, reloading...");
                            match watcher.manual_reload().await {
                                Ok(update) => {
                                    info!("configuration reloaded (version {})", update.version);
                                    last_modified = Some(modified_time);
                                }
                                Err(e) => {
                                    warn!("failed to reload configuration, keeping prior snapshot: {e}");
                                }
                            }
                        }
                    }
                    None => {
                        warn!("could not read modification time for config file: {}", watcher.config_path);
                    }
                }
            }
        });
    }

    fn reload_from_disk(config_path: &str) -> Result<GatewaySettings, String> {
        let new_settings = load_settings_from_path(config_path).map_err(|e| format!("failed to load config: {e}"))?;

        let validation_result = ConfigValidator::validate_comprehensive(&new_settings);
        if !validation_result.is_valid {
            return Err(format!(
                "configuration validation failed: {}",
                validation_result.errors.join(", ")
            ));
        }
        for warning in &validation_result.warnings {
            warn!("config validation warning: {warning}");
        }

        Ok(new_settings)
    }

    /// Forces an immediate reload, validates it, swaps the route table and
    /// forward engine settings, and broadcasts the update. An invalid reload
    /// is returned as an error and the prior snapshot stays live.
    pub async fn manual_reload(&self) -> Result<ConfigUpdate, String> {
        let new_settings = Self::reload_from_disk(&self.config_path)?;
        let settings = Arc::new(new_settings);

        self.router
            .replace_all(settings.routes.clone())
            .map_err(|e| format!("new route table failed to compile: {e}"))?;
        self.engine.replace_settings(settings.clone()).await;

        let version = self.version_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        let update = ConfigUpdate {
            settings,
            timestamp: chrono::Utc::now(),
            version,
        };

        *self.current_config.write().await = update.clone();
        if self.update_sender.send(update.clone()).is_err() {
            warn!("no subscribers for config update broadcast");
        }

        Ok(update)
    }
}

async fn get_file_modified_time(path: &str) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

fn load_settings_from_path(path: &str) -> Result<GatewaySettings, Box<dyn std::error::Error>> {
    std::env::set_var("KAIROS_CONFIG_PATH", path);
    load_settings()
}

/// Thin facade over [`ConfigWatcher`] exposed to the admin HTTP handlers.
pub struct ConfigManager {
    watcher: Arc<ConfigWatcher>,
}

impl ConfigManager {
    pub fn new(
        initial_config: GatewaySettings,
        config_path: String,
        router: Arc<DynamicRouter>,
        engine: Arc<ForwardEngine>,
    ) -> Self {
        Self {
            watcher: Arc::new(ConfigWatcher::new(initial_config, config_path, router, engine)),
        }
    }

    pub fn start(&self) {
        info!("starting configuration hot-reload watcher");
        self.watcher.start_watching();
    }

    pub async fn get_current_config(&self) -> ConfigUpdate {
        self.watcher.get_current_config().await
    }

    pub fn subscribe_to_updates(&self) -> broadcast::Receiver<ConfigUpdate> {
        self.watcher.subscribe()
    }

    pub async fn reload_now(&self) -> Result<ConfigUpdate, String> {
        self.watcher.manual_reload().await
    }
}
