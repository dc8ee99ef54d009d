pub use artnet::broadcaster::{Broadcaster, DmxUpdate};
pub use artnet::network_config::{ArtNetMode, UniverseConfig};
pub use artnet::output::ArtNetOutput;
pub use artnet::packet::{decode, encode, DmxPacket, ARTNET_PORT, PACKET_LEN};
pub use config::{ConfigError, ConfigManager, ConfigSchema};
pub use console::{AppliedPreset, LightingConsole};
pub use error::{AddressError, ConsoleError, PacketError, StoreError};
pub use fade::fade_engine::{Fade, FadeEngine, FadeId};
pub use merge::channel_merger::{ActiveElement, ChannelMerger, ElementKind, MergeMode};
pub use messages::{ConsoleCommand, ConsoleEvent, Settings};
pub use modules::{
    AsyncModule, DmxModule, ModuleEvent, ModuleId, ModuleManager, ModuleMessage, PersistModule,
};
pub use patch::address_allocator::{AddressAllocator, AddressCheck, UsedRange};
pub use show::show_store::ShowStore;
pub use universe::{ChannelRequest, ChannelValue, DmxBuffer, UniverseState, DMX_CHANNELS};

pub mod artnet;
mod config;
mod console;
pub mod error;
pub mod fade;
pub mod merge;
pub mod messages;
pub mod modules;
pub mod patch;
mod pipeline;
pub mod show;
pub mod universe;
