use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::universe::{clamp_value, ChannelValue};

/// How contributions from different control elements combine on a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MergeMode {
    /// Highest value wins.
    #[default]
    #[serde(rename = "HTP")]
    Htp,
    /// Most recently activated element wins.
    #[serde(rename = "LTP")]
    Ltp,
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeMode::Htp => write!(f, "HTP"),
            MergeMode::Ltp => write!(f, "LTP"),
        }
    }
}

impl std::str::FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTP" => Ok(MergeMode::Htp),
            "LTP" => Ok(MergeMode::Ltp),
            other => Err(format!("unknown merge mode '{}', expected HTP or LTP", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Fader,
}

/// An engaged control: a latched button or a raised fader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub preset_ids: Vec<String>,
    /// 0-100. Buttons drive at 100, faders at their position.
    pub value: f64,
    /// Monotonic activation stamp; larger means more recently engaged.
    pub activated_at: u64,
}

impl ActiveElement {
    pub fn button(id: &str, preset_ids: &[&str], activated_at: u64) -> Self {
        Self {
            id: id.to_string(),
            kind: ElementKind::Button,
            preset_ids: preset_ids.iter().map(|s| s.to_string()).collect(),
            value: 100.0,
            activated_at,
        }
    }

    pub fn fader(id: &str, preset_ids: &[&str], value: f64, activated_at: u64) -> Self {
        Self {
            id: id.to_string(),
            kind: ElementKind::Fader,
            preset_ids: preset_ids.iter().map(|s| s.to_string()).collect(),
            value,
            activated_at,
        }
    }

    fn drive(&self) -> f64 {
        if self.value.is_nan() {
            0.0
        } else {
            self.value.clamp(0.0, 100.0)
        }
    }

    /// This element's own output: every referenced preset scaled by the
    /// drive value, combined highest-wins regardless of the merge mode.
    fn contribution(&self, presets: &HashMap<String, Vec<(u16, u8)>>) -> BTreeMap<u16, u8> {
        let drive = self.drive();
        let mut own = BTreeMap::new();

        for values in self.preset_ids.iter().filter_map(|id| presets.get(id)) {
            for &(channel, value) in values {
                let scaled = clamp_value(value as f64 * drive / 100.0);
                own.entry(channel)
                    .and_modify(|v: &mut u8| *v = (*v).max(scaled))
                    .or_insert(scaled);
            }
        }

        own
    }
}

/// Which element currently owns a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSource {
    pub element_id: String,
    pub value: u8,
    pub activated_at: u64,
}

/// Collapses all engaged control elements into one level per channel.
///
/// Every observable change triggers a full recomputation. The returned
/// targets always cover every channel the merger has ever driven, so a
/// channel whose last contributor went away resolves to an explicit 0.
pub struct ChannelMerger {
    mode: MergeMode,
    /// Insertion order is the LTP tie-break: later entries win.
    elements: Vec<ActiveElement>,
    presets: HashMap<String, Vec<(u16, u8)>>,
    touched: BTreeSet<u16>,
}

impl ChannelMerger {
    pub fn new(mode: MergeMode) -> Self {
        Self {
            mode,
            elements: Vec::new(),
            presets: HashMap::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MergeMode) -> Vec<ChannelValue> {
        self.mode = mode;
        self.resolve()
    }

    /// Engage or update an element. A drive value of 0 releases it.
    pub fn update_element(&mut self, element: ActiveElement) -> Vec<ChannelValue> {
        if element.drive() <= 0.0 {
            self.elements.retain(|e| e.id != element.id);
        } else if let Some(existing) = self.elements.iter_mut().find(|e| e.id == element.id) {
            *existing = element;
        } else {
            self.elements.push(element);
        }
        self.resolve()
    }

    pub fn remove_element(&mut self, element_id: &str) -> Vec<ChannelValue> {
        self.elements.retain(|e| e.id != element_id);
        self.resolve()
    }

    /// Release every element. The result zeroes everything ever driven.
    pub fn clear(&mut self) -> Vec<ChannelValue> {
        self.elements.clear();
        self.resolve()
    }

    /// Cache a preset's channel data. Returns new targets only when an
    /// engaged element references the preset; otherwise output is unaffected.
    pub fn set_preset_data(
        &mut self,
        preset_id: &str,
        values: Vec<(u16, u8)>,
    ) -> Option<Vec<ChannelValue>> {
        self.presets.insert(preset_id.to_string(), values);
        self.references(preset_id).then(|| self.resolve())
    }

    pub fn remove_preset_data(&mut self, preset_id: &str) -> Option<Vec<ChannelValue>> {
        self.presets.remove(preset_id)?;
        self.references(preset_id).then(|| self.resolve())
    }

    pub fn active_elements(&self) -> &[ActiveElement] {
        &self.elements
    }

    pub fn touched_channels(&self) -> impl Iterator<Item = u16> + '_ {
        self.touched.iter().copied()
    }

    /// Recompute every channel from scratch.
    pub fn resolve(&mut self) -> Vec<ChannelValue> {
        let resolved = self.merge();
        self.touched.extend(resolved.keys().copied());

        self.touched
            .iter()
            .map(|&channel| {
                let value = resolved.get(&channel).map_or(0, |s| s.value);
                ChannelValue::new(channel, value)
            })
            .collect()
    }

    /// The element currently winning `channel`, if any.
    pub fn source_of(&self, channel: u16) -> Option<ChannelSource> {
        self.merge().remove(&channel)
    }

    fn merge(&self) -> BTreeMap<u16, ChannelSource> {
        let mut resolved: BTreeMap<u16, ChannelSource> = BTreeMap::new();

        for element in &self.elements {
            for (channel, value) in element.contribution(&self.presets) {
                let candidate = ChannelSource {
                    element_id: element.id.clone(),
                    value,
                    activated_at: element.activated_at,
                };
                let wins = resolved
                    .get(&channel)
                    .map_or(true, |current| self.replaces(&candidate, current));
                if wins {
                    resolved.insert(channel, candidate);
                }
            }
        }

        resolved
    }

    fn replaces(&self, candidate: &ChannelSource, current: &ChannelSource) -> bool {
        match self.mode {
            MergeMode::Htp => candidate.value > current.value,
            // Equal stamps: the later element in insertion order wins.
            MergeMode::Ltp => candidate.activated_at >= current.activated_at,
        }
    }

    fn references(&self, preset_id: &str) -> bool {
        self.elements
            .iter()
            .any(|e| e.preset_ids.iter().any(|id| id == preset_id))
    }
}

impl Default for ChannelMerger {
    fn default() -> Self {
        Self::new(MergeMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(targets: &[ChannelValue], channel: u16) -> Option<u8> {
        targets.iter().find(|t| t.channel == channel).map(|t| t.value)
    }

    fn merger_with_presets(mode: MergeMode) -> ChannelMerger {
        let mut merger = ChannelMerger::new(mode);
        merger.set_preset_data("dim", vec![(1, 120)]);
        merger.set_preset_data("bright", vec![(1, 200)]);
        merger.set_preset_data("red", vec![(2, 255), (3, 40)]);
        merger
    }

    #[test]
    fn test_htp_ignores_activation_order() {
        for (first, second) in [("dim", "bright"), ("bright", "dim")] {
            let mut merger = merger_with_presets(MergeMode::Htp);
            merger.update_element(ActiveElement::button("a", &[first], 1));
            let targets = merger.update_element(ActiveElement::button("b", &[second], 2));
            assert_eq!(value_of(&targets, 1), Some(200));
        }
    }

    #[test]
    fn test_ltp_follows_latest_activation() {
        let mut merger = merger_with_presets(MergeMode::Ltp);
        merger.update_element(ActiveElement::button("a", &["bright"], 5));
        let targets = merger.update_element(ActiveElement::button("b", &["dim"], 9));
        assert_eq!(value_of(&targets, 1), Some(120));

        // Re-engaging the first element with a newer stamp takes it back.
        let targets = merger.update_element(ActiveElement::button("a", &["bright"], 12));
        assert_eq!(value_of(&targets, 1), Some(200));
        assert_eq!(merger.source_of(1).unwrap().element_id, "a");
    }

    #[test]
    fn test_ltp_tie_goes_to_later_insertion() {
        let mut merger = merger_with_presets(MergeMode::Ltp);
        merger.update_element(ActiveElement::button("a", &["bright"], 7));
        let targets = merger.update_element(ActiveElement::button("b", &["dim"], 7));
        assert_eq!(value_of(&targets, 1), Some(120));
    }

    #[test]
    fn test_presets_within_element_always_combine_htp() {
        let mut merger = merger_with_presets(MergeMode::Ltp);
        let targets = merger.update_element(ActiveElement::button("a", &["bright", "dim"], 1));
        assert_eq!(value_of(&targets, 1), Some(200));
    }

    #[test]
    fn test_fader_scales_and_rounds() {
        let mut merger = merger_with_presets(MergeMode::Htp);
        let targets = merger.update_element(ActiveElement::fader("f", &["red"], 50.0, 1));
        // 255 * 0.5 = 127.5 rounds up, 40 * 0.5 = 20.
        assert_eq!(value_of(&targets, 2), Some(128));
        assert_eq!(value_of(&targets, 3), Some(20));

        let targets = merger.update_element(ActiveElement::fader("f", &["red"], 150.0, 2));
        assert_eq!(value_of(&targets, 2), Some(255));
    }

    #[test]
    fn test_released_channels_resolve_to_zero() {
        let mut merger = merger_with_presets(MergeMode::Htp);
        merger.update_element(ActiveElement::button("a", &["red"], 1));
        merger.update_element(ActiveElement::button("b", &["dim"], 2));

        let targets = merger.update_element(ActiveElement::fader("a", &["red"], 0.0, 3));
        assert_eq!(value_of(&targets, 2), Some(0));
        assert_eq!(value_of(&targets, 3), Some(0));
        assert_eq!(value_of(&targets, 1), Some(120));
        assert_eq!(merger.active_elements().len(), 1);

        let targets = merger.clear();
        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|t| t.value == 0));
    }

    #[test]
    fn test_untouched_channels_are_not_emitted() {
        let mut merger = merger_with_presets(MergeMode::Htp);
        let targets = merger.update_element(ActiveElement::button("a", &["dim"], 1));
        assert_eq!(targets, vec![ChannelValue::new(1, 120)]);
        assert_eq!(merger.touched_channels().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_preset_updates_only_resolve_when_referenced() {
        let mut merger = merger_with_presets(MergeMode::Htp);
        assert!(merger.set_preset_data("dim", vec![(1, 90)]).is_none());

        merger.update_element(ActiveElement::button("a", &["dim"], 1));
        let targets = merger.set_preset_data("dim", vec![(1, 60)]).unwrap();
        assert_eq!(value_of(&targets, 1), Some(60));

        let targets = merger.remove_preset_data("dim").unwrap();
        assert_eq!(value_of(&targets, 1), Some(0));
    }

    #[test]
    fn test_mode_switch_re_resolves() {
        let mut merger = merger_with_presets(MergeMode::Htp);
        merger.update_element(ActiveElement::button("a", &["bright"], 1));
        merger.update_element(ActiveElement::button("b", &["dim"], 2));
        assert_eq!(value_of(&merger.resolve(), 1), Some(200));
        assert_eq!(value_of(&merger.set_mode(MergeMode::Ltp), 1), Some(120));
    }

    #[test]
    fn test_merge_mode_parsing() {
        assert_eq!("ltp".parse::<MergeMode>().unwrap(), MergeMode::Ltp);
        assert!("xtp".parse::<MergeMode>().is_err());
        assert_eq!(serde_json::to_string(&MergeMode::Htp).unwrap(), "\"HTP\"");
    }
}
