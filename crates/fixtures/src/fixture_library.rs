use std::collections::HashMap;

use crate::{ChannelRole, FixtureChannel, FixtureTemplate};

/// Builds a channel list with offsets taken from list position.
macro_rules! channel_layout {
    ($(($name:expr, $role:expr $(, $default:expr)?)),* $(,)?) => {{
        let mut channels: Vec<FixtureChannel> = Vec::new();
        $(
            #[allow(unused_mut)]
            let mut channel = FixtureChannel::new($name, channels.len() as u16, $role);
            $( channel = channel.with_default($default); )?
            channels.push(channel);
        )*
        channels
    }};
}

/// Starter templates offered before the user has defined any of their own.
#[derive(Default)]
pub struct FixtureLibrary {
    pub templates: HashMap<String, FixtureTemplate>,
}

impl FixtureLibrary {
    pub fn new() -> Self {
        let mut templates = HashMap::new();

        // Note in the future we'll load these from disk.
        templates.insert(
            "generic-dimmer".to_string(),
            template(
                "generic-dimmer",
                "Dimmer",
                "Generic",
                "Single Channel Dimmer",
                channel_layout![("Intensity", ChannelRole::Dimmer)],
            ),
        );

        templates.insert(
            "generic-rgbw-par".to_string(),
            template(
                "generic-rgbw-par",
                "RGBW PAR",
                "Shehds",
                "LED Flat PAR 12x3W RGBW",
                channel_layout![
                    ("Dimmer", ChannelRole::Dimmer),
                    ("Red", ChannelRole::Color),
                    ("Green", ChannelRole::Color),
                    ("Blue", ChannelRole::Color),
                    ("White", ChannelRole::Color),
                    ("Strobe", ChannelRole::Other),
                    ("Program", ChannelRole::Other),
                    ("Function", ChannelRole::Other),
                ],
            ),
        );

        templates.insert(
            "shehds-led-spot-60w".to_string(),
            template(
                "shehds-led-spot-60w",
                "Spot 60W",
                "Shehds",
                "LED Spot 60W Lighting",
                channel_layout![
                    ("Pan", ChannelRole::Position, 128),
                    ("Tilt", ChannelRole::Position, 128),
                    ("Color", ChannelRole::Color),
                    ("Gobo", ChannelRole::Gobo),
                    ("Strobe", ChannelRole::Other),
                    ("Dimmer", ChannelRole::Dimmer),
                    ("Speed", ChannelRole::Other),
                    ("Auto", ChannelRole::Other),
                    ("Reset", ChannelRole::Other),
                    ("Function", ChannelRole::Other),
                ],
            ),
        );

        templates.insert(
            "shehds-mini-led-pinspot-10w".to_string(),
            template(
                "shehds-mini-led-pinspot-10w",
                "Pinspot",
                "Shehds",
                "Mini LED Pinspot 10W",
                channel_layout![
                    ("Dimmer", ChannelRole::Dimmer),
                    ("Red", ChannelRole::Color),
                    ("Green", ChannelRole::Color),
                    ("Blue", ChannelRole::Color),
                    ("White", ChannelRole::Color),
                    ("Strobe", ChannelRole::Other),
                    // 0-50: no effect, 51-250: color/jump/gradient/auto, 251-255: sound
                    ("Function", ChannelRole::Other),
                    ("Speed", ChannelRole::Other),
                ],
            ),
        );

        FixtureLibrary { templates }
    }

    pub fn get(&self, id: &str) -> Option<&FixtureTemplate> {
        self.templates.get(id)
    }
}

fn template(
    id: &str,
    name: &str,
    manufacturer: &str,
    model: &str,
    channels: Vec<FixtureChannel>,
) -> FixtureTemplate {
    FixtureTemplate {
        id: id.to_string(),
        name: name.to_string(),
        manufacturer: manufacturer.to_string(),
        model: model.to_string(),
        channel_count: channels.len() as u16,
        channels,
        created_at: String::new(),
    }
}
