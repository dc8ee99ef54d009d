mod fixture_library;

pub use fixture_library::FixtureLibrary;

use serde::{Deserialize, Serialize};

/// Number of addressable channels in one DMX universe.
pub const DMX_CHANNELS: usize = 512;

/// What a fixture channel controls. The resolution pipeline never looks at
/// this; it only matters to presentation and to homing a fixture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Dimmer,
    Color,
    Position,
    Gobo,
    #[default]
    Other,
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChannelRole::Dimmer => write!(f, "Dimmer"),
            ChannelRole::Color => write!(f, "Color"),
            ChannelRole::Position => write!(f, "Position"),
            ChannelRole::Gobo => write!(f, "Gobo"),
            ChannelRole::Other => write!(f, "Other"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureChannel {
    pub name: String,
    /// Zero-based offset from the patch start address.
    pub channel_offset: u16,
    #[serde(rename = "type")]
    pub role: ChannelRole,
    pub default_value: u8,
    pub min_value: u8,
    pub max_value: u8,
}

impl FixtureChannel {
    pub fn new(name: &str, channel_offset: u16, role: ChannelRole) -> Self {
        Self {
            name: name.to_string(),
            channel_offset,
            role,
            default_value: 0,
            min_value: 0,
            max_value: 255,
        }
    }

    pub fn with_default(mut self, value: u8) -> Self {
        self.default_value = value;
        self
    }

    /// The default value forced into the channel's own `[min, max]` window.
    pub fn home_value(&self) -> u8 {
        let (lo, hi) = if self.min_value <= self.max_value {
            (self.min_value, self.max_value)
        } else {
            (self.max_value, self.min_value)
        };
        self.default_value.clamp(lo, hi)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    /// Channel width of one patched instance (1..=512).
    pub channel_count: u16,
    #[serde(default)]
    pub channels: Vec<FixtureChannel>,
    #[serde(default)]
    pub created_at: String,
}

impl FixtureTemplate {
    /// Checks the width and that every channel offset lands inside it.
    pub fn validate(&self) -> Result<(), String> {
        if self.channel_count == 0 || self.channel_count as usize > DMX_CHANNELS {
            return Err(format!(
                "channel count {} must be between 1 and {}",
                self.channel_count, DMX_CHANNELS
            ));
        }
        if let Some(channel) = self
            .channels
            .iter()
            .find(|c| c.channel_offset >= self.channel_count)
        {
            return Err(format!(
                "channel '{}' offset {} is outside the {}-channel footprint",
                channel.name, channel.channel_offset, self.channel_count
            ));
        }
        Ok(())
    }

    pub fn channels_with_role(&self, role: ChannelRole) -> impl Iterator<Item = &FixtureChannel> {
        self.channels.iter().filter(move |c| c.role == role)
    }

    /// Absolute (channel, value) pairs that put a fixture patched at
    /// `start_address` into its home state. Channels past 512 are skipped.
    pub fn home_values(&self, start_address: u16) -> Vec<(u16, u8)> {
        self.channels
            .iter()
            .filter_map(|c| {
                let channel = start_address as usize + c.channel_offset as usize;
                (channel <= DMX_CHANNELS).then(|| (channel as u16, c.home_value()))
            })
            .collect()
    }
}

impl std::fmt::Display for FixtureTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.manufacturer.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.manufacturer, self.model)
        }
    }
}

/// A template placed at a start address inside a universe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub universe: u16,
    /// 1-based.
    pub start_address: u16,
    #[serde(default)]
    pub created_at: String,
}

impl Patch {
    pub fn new(name: &str, template_id: &str, universe: u16, start_address: u16) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            template_id: template_id.to_string(),
            universe,
            start_address,
            created_at: String::new(),
        }
    }

    /// Last channel occupied by this patch given its template width.
    /// Saturates at `u16::MAX` for corrupt start addresses.
    pub fn end_address(&self, width: u16) -> u16 {
        self.start_address.saturating_add(width.saturating_sub(1))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub patch_ids: Vec<String>,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub created_at: String,
}

impl Group {
    pub fn new(name: &str, patch_ids: &[&str], color: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            patch_ids: patch_ids.iter().map(|id| id.to_string()).collect(),
            color: color.to_string(),
            created_at: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetChannelValue {
    pub channel: u16,
    pub value: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
}

impl PresetChannelValue {
    pub fn new(channel: u16, value: u8) -> Self {
        Self {
            channel,
            value,
            patch_id: None,
            patch_name: None,
            channel_name: None,
        }
    }
}

/// A sparse scene: only channels that differ from zero are stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub channel_values: Vec<PresetChannelValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_ms: Option<u64>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Preset {
    pub fn new(name: &str, values: &[(u16, u8)]) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            description: None,
            channel_values: values
                .iter()
                .map(|&(channel, value)| PresetChannelValue::new(channel, value))
                .collect(),
            fade_ms: None,
            created_at: String::new(),
            updated_at: None,
        }
    }

    pub fn with_fade(mut self, fade_ms: u64) -> Self {
        self.fade_ms = Some(fade_ms);
        self
    }

    /// Stored (channel, value) pairs whose channel lies inside 1..=512.
    pub fn addressable_values(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.channel_values
            .iter()
            .filter(|cv| cv.channel >= 1 && cv.channel as usize <= DMX_CHANNELS)
            .map(|cv| (cv.channel, cv.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_validation() {
        let library = FixtureLibrary::new();
        for template in library.templates.values() {
            assert!(template.validate().is_ok(), "{} should be valid", template);
        }

        let mut template = library.templates["generic-dimmer"].clone();
        template.channel_count = 0;
        assert!(template.validate().is_err());

        template.channel_count = 513;
        assert!(template.validate().is_err());

        let mut template = library.templates["generic-rgbw-par"].clone();
        template.channel_count = 3;
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_home_values_respect_limits() {
        let mut channel = FixtureChannel::new("Tilt", 1, ChannelRole::Position).with_default(200);
        channel.max_value = 180;
        assert_eq!(channel.home_value(), 180);

        let template = FixtureTemplate {
            id: "t".to_string(),
            name: "Mover".to_string(),
            manufacturer: String::new(),
            model: String::new(),
            channel_count: 2,
            channels: vec![
                FixtureChannel::new("Pan", 0, ChannelRole::Position).with_default(128),
                channel,
            ],
            created_at: String::new(),
        };
        assert_eq!(template.home_values(10), vec![(10, 128), (11, 180)]);
        // Second channel would land on 513.
        assert_eq!(template.home_values(511), vec![(511, 128), (512, 180)]);
        assert_eq!(template.home_values(512), vec![(512, 128)]);
    }

    #[test]
    fn test_serde_matches_stored_records() {
        let json = r#"{
            "id": "p1",
            "name": "Warm",
            "channelValues": [
                {"channel": 1, "value": 255, "patchName": "PAR 1"},
                {"channel": 600, "value": 10}
            ],
            "fadeMs": 1500,
            "createdAt": "2024-01-01T00:00:00Z"
        }"#;
        let preset: Preset = serde_json::from_str(json).unwrap();
        assert_eq!(preset.fade_ms, Some(1500));
        assert_eq!(preset.channel_values[0].patch_name.as_deref(), Some("PAR 1"));
        assert_eq!(preset.addressable_values().collect::<Vec<_>>(), vec![(1, 255)]);

        let channel: FixtureChannel = serde_json::from_str(
            r#"{"name":"Dim","channelOffset":0,"type":"dimmer","defaultValue":0,"minValue":0,"maxValue":255}"#,
        )
        .unwrap();
        assert_eq!(channel.role, ChannelRole::Dimmer);
    }

    #[test]
    fn test_patch_end_address() {
        let patch = Patch {
            id: "a".to_string(),
            name: "PAR 1".to_string(),
            template_id: "t".to_string(),
            universe: 0,
            start_address: 9,
            created_at: String::new(),
        };
        assert_eq!(patch.end_address(8), 16);
        assert_eq!(patch.end_address(1), 9);
        assert_eq!(patch.end_address(0), 9);

        let corrupt = Patch::new("PAR 2", "t", 0, u16::MAX);
        assert_eq!(corrupt.end_address(8), u16::MAX);
    }
}
