//! Chimera AOP - 面向切面编程支持
//!
//! 启动时为容器托管实例的方法织入通知：
//! - 五种通知类型（Around、Before、After、AfterReturning、AfterThrowing）
//! - 通过 `#[derive(AspectClass)]` 与 `#[advised]` 在编译期声明
//! - 按切面顺序组合，顺序越小越靠外层
//! - 按类缓存扫描结果
//! - 通过 AopPlugin 自动接入应用生命周期

pub mod aspect;
pub mod aspects;
pub mod composer;
pub mod error;
pub mod installer;
pub mod metadata;
pub mod plugin;
pub mod registry;
pub mod scanner;

// 重新导出核心类型
pub use aspect::{
    AdviceCallback, AdviceContext, AdviceSlots, AroundCallback, AroundContext, Aspect, AspectClass,
    ThrowingCallback,
};
pub use aspects::{
    register_builtin_aspects, CachingAspect, ErrorLoggingAspect, LoggingAspect, TimingAspect,
};
pub use composer::{apply_advice, sort_by_order, AdviceApplication};
pub use error::{AopError, AopResult};
pub use installer::{AopInstaller, InstallReport};
pub use metadata::{
    adapt_aspect, AdviceDeclaration, AdviceKind, AdviceOptions, AdviceSubmission, AspectAdapter,
    AspectMarker, AspectRef, AspectSubmission, MetadataStore,
};
pub use plugin::{AopPlugin, AOP_ENABLED, AOP_LOG_CACHE_STATS};
pub use registry::{AspectInstance, AspectRegistry, ManagedInstance};
pub use scanner::{CacheStats, MethodScanner, OrderedDeclaration, ResolvedMethod, ScanResult};

// 导出 inventory 与 serde_json 供宏使用
pub use inventory;
pub use serde_json;

/// 预导入模块
pub mod prelude {
    pub use crate::aspect::{AdviceContext, AdviceSlots, AroundContext, Aspect, AspectClass};
    pub use crate::aspects::{
        register_builtin_aspects, CachingAspect, ErrorLoggingAspect, LoggingAspect, TimingAspect,
    };
    pub use crate::installer::{AopInstaller, InstallReport};
    pub use crate::metadata::{AdviceDeclaration, AdviceKind, AdviceOptions, AspectRef, MetadataStore};
    pub use crate::plugin::AopPlugin;
    pub use crate::scanner::{CacheStats, MethodScanner};
}
