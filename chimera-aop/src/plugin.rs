//! AOP Plugin - 通过插件机制集成 AOP 到框架
//!
//! 织入在 `on_startup` 阶段执行一次，此时所有托管实例都已注册。

use async_trait::async_trait;
use chimera_core::prelude::*;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::installer::{AopInstaller, InstallReport};
use crate::metadata::MetadataStore;
use crate::scanner::CacheStats;

/// 配置键：是否启用 AOP
pub const AOP_ENABLED: &str = "aop.enabled";

/// 配置键：启动后是否输出扫描缓存统计
pub const AOP_LOG_CACHE_STATS: &str = "aop.log-cache-stats";

/// AOP 应用插件
///
/// ## 使用方式
///
/// ### 方式一：自动加载（推荐）
///
/// AopPlugin 通过 inventory 自动注册，元数据来自 `#[derive(AspectClass)]` 与 `#[advised]`：
///
/// ```ignore
/// ChimeraApplication::new("demo")
///     .initializer(|ctx| { /* 注册实例 */ Ok(()) })
///     .run()
///     .await?;
/// ```
///
/// ### 方式二：显式添加
///
/// ```ignore
/// ChimeraApplication::new("demo")
///     .add_plugin(Arc::new(AopPlugin::with_metadata(Arc::new(store))))
///     .run()
///     .await?;
/// ```
pub struct AopPlugin {
    /// 插件名称
    name: String,
    /// 显式提供的元数据，None 时从 inventory 构建
    metadata: Option<Arc<MetadataStore>>,
    /// 织入结果，整个生命周期只织入一次
    outcome: OnceCell<(InstallReport, CacheStats)>,
}

impl AopPlugin {
    pub fn new() -> Self {
        Self {
            name: "AopPlugin".to_string(),
            metadata: None,
            outcome: OnceCell::new(),
        }
    }

    /// 使用显式构建的元数据
    pub fn with_metadata(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::new()
        }
    }

    /// 织入结果，尚未织入或 AOP 被禁用时为 None
    pub fn report(&self) -> Option<InstallReport> {
        self.outcome.get().map(|(report, _)| *report)
    }

    /// 织入结束时的扫描缓存统计
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.outcome.get().map(|(_, stats)| *stats)
    }

    fn weave(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<(InstallReport, CacheStats)> {
        let metadata = self
            .metadata
            .clone()
            .unwrap_or_else(|| Arc::new(MetadataStore::from_inventory()));

        let installer = AopInstaller::new(context.clone(), metadata);
        let report = installer.install().map_err(|e| ApplicationError::PluginFailed {
            plugin: self.name.clone(),
            source: e.into(),
        })?;

        let stats = installer.scanner().stats();
        if context.environment().get_bool_or(AOP_LOG_CACHE_STATS, true) {
            tracing::info!(
                "[AopPlugin] Scan cache: {} hit(s), {} miss(es), hit rate {:.1}%",
                stats.hits,
                stats.misses,
                installer.scanner().hit_rate()
            );
        }
        Ok((report, stats))
    }
}

impl Default for AopPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplicationPlugin for AopPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    /// 在其他插件之后启动，确保它们注册的实例也能被织入
    fn priority(&self) -> i32 {
        1000
    }

    async fn on_startup(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        if !context.environment().get_bool_or(AOP_ENABLED, true) {
            tracing::info!("[AopPlugin] AOP is disabled by '{}', skipping", AOP_ENABLED);
            return Ok(());
        }
        if self.outcome.get().is_some() {
            tracing::warn!("[AopPlugin] AOP already installed, ignoring repeated startup");
            return Ok(());
        }

        tracing::info!("[AopPlugin] Installing AOP advice...");
        let outcome = self.outcome.get_or_try_init(|| self.weave(context))?;
        let (report, _) = outcome;
        tracing::info!(
            "[AopPlugin] AOP installed: {} instance(s), {} method(s), {} advice(s), {} failure(s)",
            report.instances,
            report.methods_woven,
            report.advice_applied,
            report.failures
        );
        Ok(())
    }

    async fn on_shutdown(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        if self.outcome.get().is_some() {
            tracing::info!("[AopPlugin] Shutting down AOP support");
        }
        Ok(())
    }
}

// 自动注册 AOP 插件到 inventory
chimera_core::submit_plugin!(AopPlugin);
