//! Virtualization platform collaborator
//!
//! The gateway only forwards authorized lifecycle operations; the platform
//! behind this trait owns the VM data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryPlatform;

/// Platform errors
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("VM not found: {0}")]
    NotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Platform error: {0}")]
    Backend(String),
}

/// Power state of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Halted,
    Paused,
    Running,
    Suspended,
}

/// A VM as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub name_label: String,
    pub description: String,
    pub power_state: PowerState,
}

/// Request to clone a new VM from a template
#[derive(Debug, Clone, Deserialize)]
pub struct NewVm {
    pub name_label: String,
    pub template: String,
    #[serde(default)]
    pub description: String,
}

impl NewVm {
    pub fn is_valid(&self) -> bool {
        !self.name_label.trim().is_empty() && !self.template.trim().is_empty()
    }
}

/// Changes to apply to a VM; empty fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmUpdate {
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub description: String,
}

/// VM lifecycle operations
#[async_trait]
pub trait VmPlatform: Send + Sync {
    /// All VMs, templates excluded
    async fn list_vms(&self) -> Result<Vec<VmRecord>, PlatformError>;

    /// Clone `template` into a new VM and return its id
    async fn create_vm(&self, request: NewVm) -> Result<String, PlatformError>;

    async fn get_vm(&self, id: &str) -> Result<VmRecord, PlatformError>;

    async fn update_vm(&self, id: &str, update: VmUpdate) -> Result<(), PlatformError>;

    async fn delete_vm(&self, id: &str) -> Result<(), PlatformError>;
}
