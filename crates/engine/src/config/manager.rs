//! Owner of the active configuration and the preset catalogue.

use super::{ConfigurationUpdate, SafetyConfiguration, ValidationLimits, ValidationResult, presets};
use crate::events::{EventBus, SafetyEvent};
use crate::store::SafetyStore;
use safeguard_domain::{SafetyError, SafetyResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Holds exactly one active configuration.
///
/// Readers get an `Arc` snapshot that never changes underneath them; writers
/// validate a complete candidate and swap it in while holding the write lock,
/// so an invalid update never becomes visible.
pub struct ConfigurationManager {
    /// Active configuration.
    active: RwLock<Arc<SafetyConfiguration>>,
    /// Named immutable presets.
    presets: RwLock<BTreeMap<String, Arc<SafetyConfiguration>>>,
    /// Bounds for validation.
    limits: ValidationLimits,
    /// Last assigned version.
    version: AtomicU64,
    /// Bus for change notifications.
    bus: Option<Arc<EventBus>>,
    /// Persistence collaborator.
    store: Option<Arc<dyn SafetyStore>>,
    /// Highest version handed to the store. Serializes saves.
    saved_version: Mutex<u64>,
}

impl ConfigurationManager {
    /// Creates a manager with default validation limits.
    pub fn new(initial: SafetyConfiguration) -> SafetyResult<Self> {
        Self::with_limits(initial, ValidationLimits::default())
    }

    /// Creates a manager with custom validation limits.
    ///
    /// Built-in presets that do not satisfy `limits` are left out of the catalogue.
    pub fn with_limits(
        mut initial: SafetyConfiguration,
        limits: ValidationLimits,
    ) -> SafetyResult<Self> {
        initial.validate(&limits).into_result()?;
        initial.version = 1;

        let mut catalogue = BTreeMap::new();
        for preset in presets::builtin() {
            let result = preset.validate(&limits);
            if result.valid {
                catalogue.insert(preset.name.clone(), Arc::new(preset));
            } else {
                debug!(preset = %preset.name, errors = ?result.errors, "Skipping built-in preset");
            }
        }

        Ok(Self {
            active: RwLock::new(Arc::new(initial)),
            presets: RwLock::new(catalogue),
            limits,
            version: AtomicU64::new(1),
            bus: None,
            store: None,
            saved_version: Mutex::new(0),
        })
    }

    /// Publishes `ConfigurationChanged` on this bus after each install.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Saves each installed configuration to this store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SafetyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Gets the validation limits.
    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Gets a consistent snapshot of the active configuration.
    pub async fn active(&self) -> Arc<SafetyConfiguration> {
        self.active.read().await.clone()
    }

    /// Validates a complete configuration.
    pub fn validate(&self, config: &SafetyConfiguration) -> ValidationResult {
        config.validate(&self.limits)
    }

    /// Validates the result of applying `update` to the active configuration.
    pub async fn validate_update(&self, update: &ConfigurationUpdate) -> ValidationResult {
        let current = self.active().await;
        update.merge_onto(&current).validate(&self.limits)
    }

    /// Applies a partial update. Rejected updates leave the active configuration unchanged.
    pub async fn apply(&self, update: ConfigurationUpdate) -> SafetyResult<Arc<SafetyConfiguration>> {
        let installed = {
            let mut active = self.active.write().await;
            let candidate = update.merge_onto(&active);
            if let Err(e) = candidate.validate(&self.limits).into_result() {
                warn!(error = %e, "Configuration update rejected");
                return Err(e);
            }
            self.install(&mut active, candidate)
        };

        self.after_install(&installed).await;
        Ok(installed)
    }

    /// Lists presets by name.
    pub async fn list_presets(&self) -> Vec<Arc<SafetyConfiguration>> {
        self.presets.read().await.values().cloned().collect()
    }

    /// Adds a named preset. Existing names cannot be overwritten.
    pub async fn register_preset(&self, preset: SafetyConfiguration) -> SafetyResult<()> {
        preset.validate(&self.limits).into_result()?;
        let mut presets = self.presets.write().await;
        if presets.contains_key(&preset.name) {
            return Err(SafetyError::duplicate("preset", preset.name));
        }
        info!(preset = %preset.name, "Preset registered");
        presets.insert(preset.name.clone(), Arc::new(preset));
        Ok(())
    }

    /// Makes a copy of the named preset the active configuration.
    pub async fn activate_preset(&self, name: &str) -> SafetyResult<Arc<SafetyConfiguration>> {
        let preset = self
            .presets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SafetyError::not_found("preset", name))?;

        let installed = {
            let mut active = self.active.write().await;
            self.install(&mut active, preset.as_ref().clone())
        };

        info!(preset = %name, version = installed.version, "Preset activated");
        self.after_install(&installed).await;
        Ok(installed)
    }

    /// Restores the persisted configuration, if any and if it still validates.
    ///
    /// Returns whether a configuration was installed.
    pub async fn load_persisted(&self) -> anyhow::Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(stored) = store.load_configuration().await? else {
            debug!("No persisted configuration found");
            return Ok(false);
        };

        let result = stored.validate(&self.limits);
        if !result.valid {
            warn!(errors = ?result.errors, "Ignoring persisted configuration that no longer validates");
            return Ok(false);
        }

        let installed = {
            let mut active = self.active.write().await;
            self.install(&mut active, stored)
        };
        info!(name = %installed.name, version = installed.version, "Persisted configuration restored");
        if let Some(bus) = &self.bus {
            bus.publish(SafetyEvent::ConfigurationChanged {
                name: installed.name.clone(),
                version: installed.version,
            });
        }
        Ok(true)
    }

    /// Assigns the next version and swaps the candidate in.
    fn install(
        &self,
        active: &mut Arc<SafetyConfiguration>,
        mut candidate: SafetyConfiguration,
    ) -> Arc<SafetyConfiguration> {
        candidate.version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let installed = Arc::new(candidate);
        *active = installed.clone();
        installed
    }

    async fn after_install(&self, installed: &Arc<SafetyConfiguration>) {
        info!(
            name = %installed.name,
            version = installed.version,
            "Configuration installed"
        );

        if let Some(store) = &self.store {
            let mut saved = self.saved_version.lock().await;
            if installed.version <= *saved {
                debug!(
                    version = installed.version,
                    saved = *saved,
                    "Skipping save of superseded configuration"
                );
            } else {
                match store.save_configuration(installed).await {
                    Ok(()) => *saved = installed.version,
                    Err(e) => warn!(error = %e, "Failed to persist configuration"),
                }
            }
        }

        if let Some(bus) = &self.bus {
            bus.publish(SafetyEvent::ConfigurationChanged {
                name: installed.name.clone(),
                version: installed.version,
            });
        }
    }
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self {
            active: RwLock::new(Arc::new(SafetyConfiguration {
                version: 1,
                ..presets::balanced()
            })),
            presets: RwLock::new(
                presets::builtin()
                    .into_iter()
                    .map(|p| (p.name.clone(), Arc::new(p)))
                    .collect(),
            ),
            limits: ValidationLimits::default(),
            version: AtomicU64::new(1),
            bus: None,
            store: None,
            saved_version: Mutex::new(0),
        }
    }
}
