//! In-process platform
//!
//! Keeps VMs in memory. Used when no remote platform is wired in, and by tests.

use super::{NewVm, PlatformError, PowerState, VmPlatform, VmRecord, VmUpdate};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::info;

/// Platform backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    templates: BTreeMap<String, VmRecord>,
    vms: RwLock<BTreeMap<String, VmRecord>>,
}

fn opaque_ref() -> String {
    format!("OpaqueRef:{}", uuid::Uuid::new_v4())
}

impl InMemoryPlatform {
    /// Platform offering the named templates
    pub fn with_templates<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let templates = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let record = VmRecord {
                    id: opaque_ref(),
                    description: format!("{} template", name),
                    name_label: name.clone(),
                    power_state: PowerState::Halted,
                };
                (name, record)
            })
            .collect();

        Self {
            templates,
            vms: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl VmPlatform for InMemoryPlatform {
    async fn list_vms(&self) -> Result<Vec<VmRecord>, PlatformError> {
        Ok(self.vms.read().values().cloned().collect())
    }

    async fn create_vm(&self, request: NewVm) -> Result<String, PlatformError> {
        let template = self
            .templates
            .get(&request.template)
            .ok_or_else(|| PlatformError::TemplateNotFound(request.template.clone()))?;

        let id = opaque_ref();
        let description = if request.description.is_empty() {
            template.description.clone()
        } else {
            request.description
        };

        self.vms.write().insert(
            id.clone(),
            VmRecord {
                id: id.clone(),
                name_label: request.name_label,
                description,
                power_state: PowerState::Halted,
            },
        );

        info!(vm_id = %id, template = %request.template, "VM cloned from template");
        Ok(id)
    }

    async fn get_vm(&self, id: &str) -> Result<VmRecord, PlatformError> {
        self.vms
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))
    }

    async fn update_vm(&self, id: &str, update: VmUpdate) -> Result<(), PlatformError> {
        let mut vms = self.vms.write();
        let vm = vms
            .get_mut(id)
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))?;

        if !update.name_label.is_empty() {
            vm.name_label = update.name_label;
        }
        if !update.description.is_empty() {
            vm.description = update.description;
        }
        Ok(())
    }

    async fn delete_vm(&self, id: &str) -> Result<(), PlatformError> {
        self.vms
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))
    }
}
