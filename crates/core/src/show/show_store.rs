use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use luminet_fixtures::{FixtureLibrary, FixtureTemplate, Group, Patch, Preset};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::artnet::network_config::UniverseConfig;
use crate::error::StoreError;
use crate::patch::address_allocator::{validate_address, AddressAllocator};
use crate::universe::{clamp_value, DmxBuffer, DMX_CHANNELS};

pub const TEMPLATES_FILE: &str = "fixture_templates.json";
pub const PATCHES_FILE: &str = "patches.json";
pub const GROUPS_FILE: &str = "groups.json";
pub const PRESETS_FILE: &str = "presets.json";
pub const DMX_VALUES_FILE: &str = "dmx_values.json";
pub const UNIVERSE_CONFIG_FILE: &str = "universe_config.json";

/// Keyed records held by the store.
pub trait Record {
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn assign_id(&mut self, id: String);
    fn stamp_created(&mut self, at: String);
}

macro_rules! impl_record {
    ($type:ty, $kind:expr) => {
        impl Record for $type {
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn assign_id(&mut self, id: String) {
                self.id = id;
            }

            fn stamp_created(&mut self, at: String) {
                self.created_at = at;
            }
        }
    };
}

impl_record!(FixtureTemplate, "template");
impl_record!(Patch, "patch");
impl_record!(Group, "group");
impl_record!(Preset, "preset");

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn find<'a, T: Record>(items: &'a [T], id: &str) -> Result<&'a T, StoreError> {
    items
        .iter()
        .find(|item| item.id() == id)
        .ok_or_else(|| StoreError::not_found(T::KIND, id))
}

fn position<T: Record>(items: &[T], id: &str) -> Result<usize, StoreError> {
    items
        .iter()
        .position(|item| item.id() == id)
        .ok_or_else(|| StoreError::not_found(T::KIND, id))
}

fn insert<T: Record + Clone>(items: &mut Vec<T>, mut item: T) -> T {
    item.assign_id(Uuid::new_v4().to_string());
    item.stamp_created(timestamp());
    items.push(item.clone());
    item
}

/// Replaces the record in place, keeping its identity and creation time.
fn replace<T: Record + Clone>(
    items: &mut [T],
    index: usize,
    mut item: T,
    created_at: String,
) -> T {
    let id = items[index].id().to_string();
    item.assign_id(id);
    item.stamp_created(created_at);
    items[index] = item.clone();
    item
}

/// File-backed record collections.
///
/// Every collection lives in memory and is written out in full after each
/// change. Writes are best effort: a failed save is logged and the in-memory
/// copy stays authoritative.
#[derive(Default)]
pub struct ShowStore {
    data_dir: Option<PathBuf>,
    templates: Vec<FixtureTemplate>,
    patches: Vec<Patch>,
    groups: Vec<Group>,
    presets: Vec<Preset>,
}

impl ShowStore {
    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every collection from `data_dir`, creating the directory if
    /// needed. Templates are seeded from the built-in library when no
    /// template file exists yet.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        if !data_dir.exists() {
            log::info!("Creating data directory: {}", data_dir.display());
            fs::create_dir_all(&data_dir)?;
        }

        let mut store = Self {
            templates: load_collection(&data_dir, TEMPLATES_FILE).unwrap_or_default(),
            patches: load_collection(&data_dir, PATCHES_FILE).unwrap_or_default(),
            groups: load_collection(&data_dir, GROUPS_FILE).unwrap_or_default(),
            presets: load_collection(&data_dir, PRESETS_FILE).unwrap_or_default(),
            data_dir: Some(data_dir),
        };

        store.patches.retain(|patch| match validate_address(patch.start_address) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Skipping patch {} ({}): {}", patch.id, patch.name, e);
                false
            }
        });

        if !store.path(TEMPLATES_FILE).is_some_and(|p| p.exists()) {
            store.seed_templates(&FixtureLibrary::new());
        }

        log::info!(
            "Show store loaded: {} templates, {} patches, {} groups, {} presets",
            store.templates.len(),
            store.patches.len(),
            store.groups.len(),
            store.presets.len()
        );
        Ok(store)
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn path(&self, file: &str) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(file))
    }

    fn save<T: Serialize>(&self, file: &str, value: &T) {
        let Some(path) = self.path(file) else {
            return;
        };
        let result = serde_json::to_string_pretty(value)
            .map_err(StoreError::from)
            .and_then(|json| fs::write(&path, json).map_err(StoreError::from));
        if let Err(e) = result {
            log::warn!("Failed to save {}: {}", path.display(), e);
        }
    }

    /// Add library templates that are not already present, keeping their ids.
    pub fn seed_templates(&mut self, library: &FixtureLibrary) {
        let mut ids: Vec<&String> = library.templates.keys().collect();
        ids.sort();
        for id in ids {
            if self.templates.iter().any(|t| &t.id == id) {
                continue;
            }
            let mut template = library.templates[id].clone();
            template.created_at = timestamp();
            self.templates.push(template);
        }
        self.save(TEMPLATES_FILE, &self.templates);
    }

    pub fn allocator(&self) -> AddressAllocator<'_> {
        AddressAllocator::new(&self.patches, &self.templates)
    }

    // Fixture templates

    pub fn templates(&self) -> &[FixtureTemplate] {
        &self.templates
    }

    pub fn template(&self, id: &str) -> Result<&FixtureTemplate, StoreError> {
        find(&self.templates, id)
    }

    pub fn create_template(
        &mut self,
        template: FixtureTemplate,
    ) -> Result<FixtureTemplate, StoreError> {
        template.validate().map_err(StoreError::InvalidTemplate)?;
        let created = insert(&mut self.templates, template);
        self.save(TEMPLATES_FILE, &self.templates);
        Ok(created)
    }

    /// A width change is refused if any patch using the template would no
    /// longer fit.
    pub fn update_template(
        &mut self,
        id: &str,
        template: FixtureTemplate,
    ) -> Result<FixtureTemplate, StoreError> {
        template.validate().map_err(StoreError::InvalidTemplate)?;
        let index = position(&self.templates, id)?;

        if template.channel_count != self.templates[index].channel_count {
            let mut candidate = self.templates.clone();
            candidate[index].channel_count = template.channel_count;
            let allocator = AddressAllocator::new(&self.patches, &candidate);
            for patch in self.patches.iter().filter(|p| p.template_id == id) {
                allocator.check_placement(
                    patch.universe,
                    patch.start_address,
                    template.channel_count,
                    Some(&patch.id),
                )?;
            }
        }

        let created_at = self.templates[index].created_at.clone();
        let updated = replace(&mut self.templates, index, template, created_at);
        self.save(TEMPLATES_FILE, &self.templates);
        Ok(updated)
    }

    pub fn delete_template(&mut self, id: &str) -> Result<FixtureTemplate, StoreError> {
        let index = position(&self.templates, id)?;
        let count = self.patches.iter().filter(|p| p.template_id == id).count();
        if count > 0 {
            return Err(StoreError::InUse {
                kind: FixtureTemplate::KIND,
                id: id.to_string(),
                count,
            });
        }
        let deleted = self.templates.remove(index);
        self.save(TEMPLATES_FILE, &self.templates);
        Ok(deleted)
    }

    // Patches

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch(&self, id: &str) -> Result<&Patch, StoreError> {
        find(&self.patches, id)
    }

    pub fn create_patch(&mut self, patch: Patch) -> Result<Patch, StoreError> {
        let width = self.template(&patch.template_id)?.channel_count;
        self.allocator()
            .check_placement(patch.universe, patch.start_address, width, None)?;

        let created = insert(&mut self.patches, patch);
        self.save(PATCHES_FILE, &self.patches);
        Ok(created)
    }

    pub fn update_patch(&mut self, id: &str, patch: Patch) -> Result<Patch, StoreError> {
        let index = position(&self.patches, id)?;
        let width = self.template(&patch.template_id)?.channel_count;
        self.allocator()
            .check_placement(patch.universe, patch.start_address, width, Some(id))?;

        let created_at = self.patches[index].created_at.clone();
        let updated = replace(&mut self.patches, index, patch, created_at);
        self.save(PATCHES_FILE, &self.patches);
        Ok(updated)
    }

    /// Also drops the patch from any group that lists it.
    pub fn delete_patch(&mut self, id: &str) -> Result<Patch, StoreError> {
        let index = position(&self.patches, id)?;
        let deleted = self.patches.remove(index);
        self.save(PATCHES_FILE, &self.patches);

        let mut groups_changed = false;
        for group in &mut self.groups {
            let before = group.patch_ids.len();
            group.patch_ids.retain(|patch_id| patch_id != id);
            groups_changed |= group.patch_ids.len() != before;
        }
        if groups_changed {
            self.save(GROUPS_FILE, &self.groups);
        }

        Ok(deleted)
    }

    /// Patch `quantity` instances of a template back to back. Nothing is
    /// created unless every instance fits.
    pub fn create_patches_bulk(
        &mut self,
        template_id: &str,
        universe: u16,
        quantity: usize,
        base_name: Option<&str>,
        start_address: Option<u16>,
    ) -> Result<Vec<Patch>, StoreError> {
        let template = self.template(template_id)?;
        let width = template.channel_count;
        let base_name = base_name
            .filter(|name| !name.is_empty())
            .unwrap_or(&template.name)
            .to_string();

        let addresses =
            self.allocator()
                .find_bulk(universe, width, quantity, start_address.unwrap_or(1))?;

        let created_at = timestamp();
        let created: Vec<Patch> = addresses
            .into_iter()
            .enumerate()
            .map(|(index, address)| Patch {
                id: Uuid::new_v4().to_string(),
                name: format!("{} {}", base_name, index + 1),
                template_id: template_id.to_string(),
                universe,
                start_address: address,
                created_at: created_at.clone(),
            })
            .collect();

        self.patches.extend(created.iter().cloned());
        self.save(PATCHES_FILE, &self.patches);
        log::info!(
            "Patched {} x {} in universe {}",
            created.len(),
            base_name,
            universe
        );
        Ok(created)
    }

    // Groups

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Result<&Group, StoreError> {
        find(&self.groups, id)
    }

    pub fn create_group(&mut self, group: Group) -> Result<Group, StoreError> {
        for patch_id in &group.patch_ids {
            self.patch(patch_id)?;
        }
        let created = insert(&mut self.groups, group);
        self.save(GROUPS_FILE, &self.groups);
        Ok(created)
    }

    pub fn update_group(&mut self, id: &str, group: Group) -> Result<Group, StoreError> {
        let index = position(&self.groups, id)?;
        for patch_id in &group.patch_ids {
            self.patch(patch_id)?;
        }
        let created_at = self.groups[index].created_at.clone();
        let updated = replace(&mut self.groups, index, group, created_at);
        self.save(GROUPS_FILE, &self.groups);
        Ok(updated)
    }

    pub fn delete_group(&mut self, id: &str) -> Result<Group, StoreError> {
        let index = position(&self.groups, id)?;
        let deleted = self.groups.remove(index);
        self.save(GROUPS_FILE, &self.groups);
        Ok(deleted)
    }

    // Presets

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn preset(&self, id: &str) -> Result<&Preset, StoreError> {
        find(&self.presets, id)
    }

    pub fn create_preset(&mut self, preset: Preset) -> Result<Preset, StoreError> {
        let created = insert(&mut self.presets, preset);
        self.save(PRESETS_FILE, &self.presets);
        Ok(created)
    }

    pub fn update_preset(&mut self, id: &str, mut preset: Preset) -> Result<Preset, StoreError> {
        let index = position(&self.presets, id)?;
        preset.updated_at = Some(timestamp());
        let created_at = self.presets[index].created_at.clone();
        let updated = replace(&mut self.presets, index, preset, created_at);
        self.save(PRESETS_FILE, &self.presets);
        Ok(updated)
    }

    pub fn delete_preset(&mut self, id: &str) -> Result<Preset, StoreError> {
        let index = position(&self.presets, id)?;
        let deleted = self.presets.remove(index);
        self.save(PRESETS_FILE, &self.presets);
        Ok(deleted)
    }

    // Runtime state

    /// Last saved universe levels. Out-of-range numbers are clamped and
    /// missing entries read as zero.
    pub fn load_dmx_values(&self) -> Option<DmxBuffer> {
        let values: Vec<f64> = load_json(self.data_dir.as_deref()?, DMX_VALUES_FILE)?;
        let mut buffer = [0u8; DMX_CHANNELS];
        for (slot, value) in buffer.iter_mut().zip(values) {
            *slot = clamp_value(value);
        }
        Some(buffer)
    }

    pub fn save_dmx_values(&self, values: &[u8]) {
        self.save(DMX_VALUES_FILE, &values);
    }

    pub fn load_universe_config(&self) -> Option<UniverseConfig> {
        let config: UniverseConfig = load_json(self.data_dir.as_deref()?, UNIVERSE_CONFIG_FILE)?;
        match config.validate() {
            Ok(()) => Some(config),
            Err(errors) => {
                log::warn!(
                    "Ignoring invalid {}: {}",
                    UNIVERSE_CONFIG_FILE,
                    errors.join(", ")
                );
                None
            }
        }
    }

    pub fn save_universe_config(&self, config: &UniverseConfig) {
        self.save(UNIVERSE_CONFIG_FILE, config);
    }
}

fn load_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Option<T> {
    let path = dir.join(file);
    if !path.exists() {
        log::debug!("No existing data file {}", path.display());
        return None;
    }

    let result = fs::read_to_string(&path)
        .map_err(StoreError::from)
        .and_then(|json| serde_json::from_str(&json).map_err(StoreError::from));
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::error!("Error loading {}: {}", path.display(), e);
            None
        }
    }
}

fn load_collection<T: DeserializeOwned>(dir: &Path, file: &str) -> Option<Vec<T>> {
    let items: Vec<T> = load_json(dir, file)?;
    log::debug!("Loaded {}: {} items", file, items.len());
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AddressError;
    use luminet_fixtures::{ChannelRole, FixtureChannel};
    use tempfile::TempDir;

    fn par_template() -> FixtureTemplate {
        FixtureTemplate {
            id: String::new(),
            name: "PAR".to_string(),
            manufacturer: "Generic".to_string(),
            model: "RGB PAR".to_string(),
            channel_count: 4,
            channels: vec![
                FixtureChannel::new("Dimmer", 0, ChannelRole::Dimmer),
                FixtureChannel::new("Red", 1, ChannelRole::Color),
                FixtureChannel::new("Green", 2, ChannelRole::Color),
                FixtureChannel::new("Blue", 3, ChannelRole::Color),
            ],
            created_at: String::new(),
        }
    }

    #[test]
    fn test_create_assigns_ids() {
        let mut store = ShowStore::in_memory();
        let template = store.create_template(par_template()).unwrap();
        assert_eq!(template.id.len(), 36);
        assert!(!template.created_at.is_empty());
        assert_eq!(store.template(&template.id).unwrap().name, "PAR");

        let other = store.create_template(par_template()).unwrap();
        assert_ne!(template.id, other.id);
    }

    #[test]
    fn test_invalid_template_rejected() {
        let mut store = ShowStore::in_memory();
        let mut template = par_template();
        template.channel_count = 0;
        assert!(matches!(
            store.create_template(template),
            Err(StoreError::InvalidTemplate(_))
        ));
        assert!(store.templates().is_empty());
    }

    #[test]
    fn test_patch_conflicts_mutate_nothing() {
        let mut store = ShowStore::in_memory();
        let template = store.create_template(par_template()).unwrap();

        let first = store
            .create_patch(Patch::new("PAR 1", &template.id, 0, 1))
            .unwrap();
        let result = store.create_patch(Patch::new("PAR 2", &template.id, 0, 3));
        assert!(matches!(
            result,
            Err(StoreError::Address(AddressError::Conflict { .. }))
        ));
        assert_eq!(store.patches().len(), 1);

        // Same range in another universe is fine.
        store
            .create_patch(Patch::new("PAR 2", &template.id, 1, 3))
            .unwrap();

        // Moving a patch onto itself is not a conflict.
        let moved = store
            .update_patch(&first.id, Patch::new("PAR 1", &template.id, 0, 2))
            .unwrap();
        assert_eq!(moved.id, first.id);
        assert_eq!(moved.created_at, first.created_at);
        assert_eq!(store.patch(&first.id).unwrap().start_address, 2);
    }

    #[test]
    fn test_unknown_references() {
        let mut store = ShowStore::in_memory();
        assert!(matches!(
            store.create_patch(Patch::new("X", "missing", 0, 1)),
            Err(StoreError::NotFound { kind: "template", .. })
        ));
        assert!(matches!(
            store.delete_preset("missing"),
            Err(StoreError::NotFound { kind: "preset", .. })
        ));
        assert!(matches!(
            store.create_group(Group::new("G", &["missing"], "#fff")),
            Err(StoreError::NotFound { kind: "patch", .. })
        ));
    }

    #[test]
    fn test_bulk_patching() {
        let mut store = ShowStore::in_memory();
        let template = store.create_template(par_template()).unwrap();

        let patches = store
            .create_patches_bulk(&template.id, 0, 3, None, None)
            .unwrap();
        let names: Vec<&str> = patches.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["PAR 1", "PAR 2", "PAR 3"]);
        let addresses: Vec<u16> = patches.iter().map(|p| p.start_address).collect();
        assert_eq!(addresses, vec![1, 5, 9]);

        let named = store
            .create_patches_bulk(&template.id, 0, 2, Some("Wash"), Some(13))
            .unwrap();
        assert_eq!(named[1].name, "Wash 2");
        assert_eq!(named[1].start_address, 17);

        // Overlaps the first block; nothing is created.
        let result = store.create_patches_bulk(&template.id, 0, 2, None, Some(7));
        assert!(result.is_err());
        assert_eq!(store.patches().len(), 5);
    }

    #[test]
    fn test_template_in_use() {
        let mut store = ShowStore::in_memory();
        let template = store.create_template(par_template()).unwrap();
        let patch = store
            .create_patch(Patch::new("PAR 1", &template.id, 0, 1))
            .unwrap();
        store
            .create_patch(Patch::new("PAR 2", &template.id, 0, 5))
            .unwrap();

        assert!(matches!(
            store.delete_template(&template.id),
            Err(StoreError::InUse { count: 2, .. })
        ));

        let mut wider = par_template();
        wider.channel_count = 6;
        assert!(matches!(
            store.update_template(&template.id, wider),
            Err(StoreError::Address(AddressError::Conflict { .. }))
        ));
        assert_eq!(store.template(&template.id).unwrap().channel_count, 4);

        let group = store
            .create_group(Group::new("Front", &[patch.id.as_str()], "#ff0000"))
            .unwrap();
        store.delete_patch(&patch.id).unwrap();
        assert!(store.group(&group.id).unwrap().patch_ids.is_empty());
    }

    #[test]
    fn test_preset_update_stamps_time() {
        let mut store = ShowStore::in_memory();
        let preset = store
            .create_preset(Preset::new("Warm", &[(1, 255)]))
            .unwrap();
        assert!(preset.updated_at.is_none());

        let updated = store
            .update_preset(&preset.id, Preset::new("Warmer", &[(1, 255), (2, 64)]))
            .unwrap();
        assert_eq!(updated.id, preset.id);
        assert!(updated.updated_at.is_some());
        assert_eq!(store.preset(&preset.id).unwrap().channel_values.len(), 2);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let preset_id;
        {
            let mut store = ShowStore::open(dir.path()).unwrap();
            // Seeded from the built-in library.
            assert!(store.template("generic-dimmer").is_ok());
            store
                .create_patch(Patch::new("Dim 1", "generic-dimmer", 0, 1))
                .unwrap();
            preset_id = store
                .create_preset(Preset::new("Full", &[(1, 255)]).with_fade(500))
                .unwrap()
                .id;
            store.save_dmx_values(&[0, 10, 44]);
            store.save_universe_config(&UniverseConfig::new(3, "10.0.0.255"));
        }

        let store = ShowStore::open(dir.path()).unwrap();
        assert_eq!(store.patches().len(), 1);
        assert_eq!(store.preset(&preset_id).unwrap().fade_ms, Some(500));

        let values = store.load_dmx_values().unwrap();
        assert_eq!(values[1], 10);
        assert_eq!(values[2], 44);
        assert_eq!(values[3], 0);

        assert_eq!(
            store.load_universe_config(),
            Some(UniverseConfig::new(3, "10.0.0.255"))
        );
    }

    #[test]
    fn test_corrupt_files_fall_back() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PRESETS_FILE), "not json").unwrap();
        fs::write(dir.path().join(DMX_VALUES_FILE), "[999, -5, 12.6]").unwrap();
        fs::write(
            dir.path().join(UNIVERSE_CONFIG_FILE),
            r#"{"universe": 0, "broadcastIP": "nope"}"#,
        )
        .unwrap();

        let store = ShowStore::open(dir.path()).unwrap();
        assert!(store.presets().is_empty());
        assert!(store.load_universe_config().is_none());

        let values = store.load_dmx_values().unwrap();
        assert_eq!(&values[..4], &[255, 0, 13, 0]);
    }

    #[test]
    fn test_out_of_range_patches_skipped_on_open() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(PATCHES_FILE),
            r#"[
                {"id": "ok", "name": "PAR 1", "templateId": "t", "universe": 0, "startAddress": 1},
                {"id": "high", "name": "PAR 2", "templateId": "t", "universe": 0, "startAddress": 65535},
                {"id": "zero", "name": "PAR 3", "templateId": "t", "universe": 0, "startAddress": 0}
            ]"#,
        )
        .unwrap();

        let store = ShowStore::open(dir.path()).unwrap();
        let ids: Vec<&str> = store.patches().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }
}
