// chimera-core: Chimera 的宿主运行时
//
// 提供：
// - 类模型（显式的方法分派表，可在运行时替换方法）
// - 应用上下文（托管 controller / provider 实例）
// - 实例发现契约
// - 配置、日志、插件生命周期与应用启动

pub mod app;
pub mod class;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod plugin;

// 重新导出常用类型
pub use app::{ChimeraApplication, RunningApplication};
pub use class::{
    Accessor, Class, ClassBuilder, ClassDef, ClassId, Method, MethodResult, Object, Prototype,
    Receiver, Slot, CONSTRUCTOR,
};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use context::ApplicationContext;
pub use discovery::{InstanceDiscovery, InstanceWrapper, Metatype};
pub use error::{ApplicationError, ApplicationResult, ContainerError, ContainerResult, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use plugin::{load_plugins, ApplicationPlugin, PluginRegistry, PluginSubmission};

// 导出 async_trait、inventory 和 serde_json，供宏和插件使用
pub use async_trait;
pub use inventory;
pub use serde_json;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::app::{ChimeraApplication, RunningApplication};
    pub use crate::class::{Class, ClassDef, Method, Object, Receiver, Slot};
    pub use crate::config::{self, ConfigValue, Environment, MapPropertySource, PropertySource};
    pub use crate::context::ApplicationContext;
    pub use crate::discovery::{InstanceDiscovery, InstanceWrapper, Metatype};
    pub use crate::error::{ApplicationError, ApplicationResult, ContainerError, Result};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::plugin::{ApplicationPlugin, PluginRegistry};
    pub use anyhow::{anyhow, Context};
    pub use serde_json::{json, Value};
}
