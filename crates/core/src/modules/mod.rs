pub mod dmx_module;
pub mod module_manager;
pub mod persist_module;
pub mod traits;

pub use dmx_module::DmxModule;
pub use module_manager::ModuleManager;
pub use persist_module::PersistModule;
pub use traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};
