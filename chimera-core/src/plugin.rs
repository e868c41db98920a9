//! 插件机制
//!
//! 插件在应用启动的固定阶段被调用，AOP 等扩展都以插件形式接入

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::ApplicationContext;
use crate::error::ApplicationResult;

/// 应用插件 trait
#[async_trait]
pub trait ApplicationPlugin: Send + Sync {
    /// 插件名称（同名插件只会注册一次）
    fn name(&self) -> &str;

    /// 插件优先级（数字越小优先级越高）
    fn priority(&self) -> i32 {
        100
    }

    /// 配置阶段 - 在初始化器之后、启动之前执行
    fn configure(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        Ok(())
    }

    /// 启动阶段 - 所有实例就绪后执行，整个生命周期只调用一次
    async fn on_startup(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        Ok(())
    }

    /// 关闭阶段
    async fn on_shutdown(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        Ok(())
    }
}

/// 插件注册表
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn ApplicationPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册插件，已存在同名插件时忽略
    pub fn register(&mut self, plugin: Arc<dyn ApplicationPlugin>) -> bool {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            tracing::debug!("Plugin '{}' already registered, skipping", plugin.name());
            return false;
        }
        tracing::debug!("Registering plugin: {}", plugin.name());
        self.plugins.push(plugin);
        self.plugins.sort_by_key(|p| p.priority());
        true
    }

    pub fn plugins(&self) -> &[Arc<dyn ApplicationPlugin>] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn configure_all(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        for plugin in &self.plugins {
            tracing::info!("Configuring plugin: {}", plugin.name());
            plugin.configure(context)?;
        }
        Ok(())
    }

    pub async fn startup_all(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        for plugin in &self.plugins {
            tracing::info!("Starting plugin: {}", plugin.name());
            plugin.on_startup(context).await?;
        }
        Ok(())
    }

    /// 逆序关闭，单个插件失败不影响其他插件
    pub async fn shutdown_all(&self, context: &Arc<ApplicationContext>) {
        for plugin in self.plugins.iter().rev() {
            tracing::info!("Shutting down plugin: {}", plugin.name());
            if let Err(e) = plugin.on_shutdown(context).await {
                tracing::error!("Failed to shutdown plugin {}: {}", plugin.name(), e);
            }
        }
    }
}

/// 插件提交结构，用于 inventory 自动收集
pub struct PluginSubmission {
    pub create: fn() -> Arc<dyn ApplicationPlugin>,
}

inventory::collect!(PluginSubmission);

/// 提交插件到全局收集器
#[macro_export]
macro_rules! submit_plugin {
    ($plugin_type:ty) => {
        $crate::inventory::submit! {
            $crate::PluginSubmission {
                create: || ::std::sync::Arc::new(<$plugin_type>::default())
                    as ::std::sync::Arc<dyn $crate::ApplicationPlugin>,
            }
        }
    };
}

/// 将所有自动提交的插件加入注册表
pub fn load_plugins(registry: &mut PluginRegistry) {
    for submission in inventory::iter::<PluginSubmission> {
        registry.register((submission.create)());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedPlugin {
        name: &'static str,
        priority: i32,
    }

    #[async_trait]
    impl ApplicationPlugin for NamedPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[test]
    fn test_priority_sorting_and_dedup() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register(Arc::new(NamedPlugin { name: "late", priority: 500 })));
        assert!(registry.register(Arc::new(NamedPlugin { name: "early", priority: 1 })));
        assert!(!registry.register(Arc::new(NamedPlugin { name: "late", priority: 0 })));

        let names: Vec<&str> = registry.plugins().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_lifecycle_defaults() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(NamedPlugin { name: "noop", priority: 100 }));
        let context = Arc::new(ApplicationContext::new());

        registry.configure_all(&context).unwrap();
        registry.startup_all(&context).await.unwrap();
        registry.shutdown_all(&context).await;
    }
}
