//! Process-wide gateway ownership
//!
//! [`GatewayRegistry::global`] holds the gateway shared by the whole
//! process. Tests construct their own registries with
//! [`GatewayRegistry::new`] so they never touch global state.

use crate::error::AppResult;
use crate::gateway::facade::Gateway;
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

static GLOBAL: OnceLock<GatewayRegistry> = OnceLock::new();

/// Holds at most one gateway
#[derive(Default)]
pub struct GatewayRegistry {
    slot: RwLock<Option<Gateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-global registry, created empty on first use
    pub fn global() -> &'static GatewayRegistry {
        GLOBAL.get_or_init(GatewayRegistry::new)
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Gateway>> {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Gateway>> {
        self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install `gateway` if the registry is empty
    ///
    /// # Errors
    ///
    /// Hands `gateway` back if one is already registered.
    pub fn register(&self, gateway: Gateway) -> Result<(), Gateway> {
        let mut slot = self.write();
        if slot.is_some() {
            return Err(gateway);
        }
        *slot = Some(gateway);
        tracing::debug!("Gateway registered");
        Ok(())
    }

    pub fn get(&self) -> Option<Gateway> {
        self.read().clone()
    }

    /// The registered gateway, building one with `factory` if none exists
    ///
    /// Concurrent callers see a single gateway; `factory` runs at most once
    /// per empty registry.
    pub fn get_or_create<F>(&self, factory: F) -> AppResult<Gateway>
    where
        F: FnOnce() -> AppResult<Gateway>,
    {
        if let Some(gateway) = self.get() {
            return Ok(gateway);
        }

        let mut slot = self.write();
        if let Some(gateway) = slot.as_ref() {
            return Ok(gateway.clone());
        }
        let gateway = factory()?;
        *slot = Some(gateway.clone());
        tracing::debug!("Gateway created and registered");
        Ok(gateway)
    }

    /// Swap in `gateway`, returning the previous one
    ///
    /// The previous gateway keeps running; call `shutdown` on it when done.
    pub fn replace(&self, gateway: Gateway) -> Option<Gateway> {
        self.write().replace(gateway)
    }

    /// Empty the registry, returning what it held
    pub fn clear(&self) -> Option<Gateway> {
        self.write().take()
    }

    pub fn is_registered(&self) -> bool {
        self.read().is_some()
    }
}
