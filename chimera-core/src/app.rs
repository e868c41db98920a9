use std::path::Path;
use std::sync::Arc;

use crate::config::{EnvironmentPropertySource, TomlPropertySource, Environment};
use crate::context::ApplicationContext;
use crate::error::ApplicationResult;
use crate::logging::LoggingConfig;
use crate::plugin::{load_plugins, ApplicationPlugin, PluginRegistry};

type Initializer = Box<dyn Fn(&Arc<ApplicationContext>) -> ApplicationResult<()> + Send + Sync>;

/// Chimera 应用程序
///
/// 启动顺序：日志 -> 配置 -> 上下文 -> 初始化器（注册实例）-> 插件配置 -> 插件启动。
/// AOP 织入发生在插件启动阶段，此时所有托管实例都已就绪。
pub struct ChimeraApplication {
    /// 应用名称
    name: String,

    /// 配置文件路径
    config_files: Vec<String>,

    /// 环境变量前缀
    env_prefix: String,

    /// 激活的 profiles
    profiles: Vec<String>,

    /// 日志配置，None 时从环境变量读取
    logging_config: Option<LoggingConfig>,

    /// 是否初始化日志系统
    init_logging: bool,

    /// 是否加载通过 inventory 提交的插件
    auto_plugins: bool,

    /// 显式添加的插件
    plugins: Vec<Arc<dyn ApplicationPlugin>>,

    /// 自定义初始化函数
    initializers: Vec<Initializer>,
}

impl ChimeraApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_files: vec!["application.toml".to_string()],
            env_prefix: "APP_".to_string(),
            profiles: Vec::new(),
            logging_config: None,
            init_logging: true,
            auto_plugins: true,
            plugins: Vec::new(),
            initializers: Vec::new(),
        }
    }

    /// 设置配置文件路径
    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.config_files = vec![path.into()];
        self
    }

    /// 设置多个配置文件
    pub fn config_files(mut self, paths: Vec<String>) -> Self {
        self.config_files = paths;
        self
    }

    /// 设置环境变量前缀
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// 设置激活的 profiles
    pub fn profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// 设置日志配置
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    /// 不初始化全局日志（测试中同一进程会启动多个应用）
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// 是否自动加载 inventory 插件
    pub fn auto_plugins(mut self, enabled: bool) -> Self {
        self.auto_plugins = enabled;
        self
    }

    /// 显式添加插件
    ///
    /// 显式插件先于自动插件注册，同名时显式插件生效。
    pub fn add_plugin(mut self, plugin: Arc<dyn ApplicationPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// 添加初始化器，用于注册类和实例
    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<ApplicationContext>) -> ApplicationResult<()> + Send + Sync + 'static,
    {
        self.initializers.push(Box::new(f));
        self
    }

    /// 运行应用
    pub async fn run(self) -> ApplicationResult<RunningApplication> {
        let start_time = std::time::Instant::now();

        // 日志配置依赖配置文件，先加载环境
        let active_profiles = self.resolve_profiles();
        let environment = Arc::new(Environment::new());
        self.load_configurations(&environment, &active_profiles);
        environment.add_property_source(Box::new(EnvironmentPropertySource::new(&self.env_prefix)));
        environment.set_active_profiles(active_profiles.clone());

        if self.init_logging {
            let config = match &self.logging_config {
                Some(config) => config.clone(),
                None => LoggingConfig::from_env().merge_environment(&environment),
            };
            config.init()?;
        }

        tracing::info!("Starting {} application", self.name);
        if active_profiles.is_empty() {
            tracing::info!("No active profiles set, using default configuration");
        } else {
            tracing::info!("Active profiles: {:?}", active_profiles);
        }
        tracing::debug!("Environment variable prefix: {}", self.env_prefix);

        let context = Arc::new(ApplicationContext::with_environment(environment));
        context.set_app_name(self.name.clone());

        for initializer in &self.initializers {
            initializer(&context)?;
        }
        tracing::info!(
            "ApplicationContext initialized with {} managed instances",
            context.get_bean_names().len()
        );

        let mut registry = PluginRegistry::new();
        for plugin in &self.plugins {
            registry.register(plugin.clone());
        }
        if self.auto_plugins {
            load_plugins(&mut registry);
        }

        registry.configure_all(&context)?;
        registry.startup_all(&context).await?;

        tracing::info!(
            "Started {} in {}ms",
            self.name,
            start_time.elapsed().as_millis()
        );

        Ok(RunningApplication {
            context,
            plugins: registry,
        })
    }

    /// 代码设置优先，其次是 `{prefix}PROFILES_ACTIVE` 环境变量
    fn resolve_profiles(&self) -> Vec<String> {
        if !self.profiles.is_empty() {
            return self.profiles.clone();
        }
        std::env::var(format!("{}PROFILES_ACTIVE", self.env_prefix))
            .map(|value| {
                value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 加载配置文件
    ///
    /// application.toml 优先级为 0，application-{profile}.toml 从 10 开始递增。
    fn load_configurations(&self, environment: &Environment, active_profiles: &[String]) {
        for base_config in &self.config_files {
            try_load_config_file(environment, base_config, 0);
        }

        for (index, profile) in active_profiles.iter().enumerate() {
            for base_config in &self.config_files {
                let profile_config = profile_config_path(base_config, profile);
                try_load_config_file(environment, &profile_config, 10 + index as i32);
            }
        }
    }
}

impl Default for ChimeraApplication {
    fn default() -> Self {
        Self::new("ChimeraApplication")
    }
}

/// application.toml -> application-dev.toml
fn profile_config_path(base_path: &str, profile: &str) -> String {
    match base_path.rfind('.') {
        Some(dot_pos) => {
            let (name, ext) = base_path.split_at(dot_pos);
            format!("{}-{}{}", name, profile, ext)
        }
        None => format!("{}-{}", base_path, profile),
    }
}

/// 缺失或损坏的配置文件不会中断启动
fn try_load_config_file(environment: &Environment, config_file: &str, priority: i32) {
    if !Path::new(config_file).exists() {
        tracing::debug!("Configuration file not found: {}", config_file);
        return;
    }
    match TomlPropertySource::from_file(config_file) {
        Ok(source) => {
            tracing::info!(
                "Loaded configuration from: {} (priority: {})",
                config_file,
                priority
            );
            environment.add_property_source(Box::new(source.with_priority(priority)));
        }
        Err(e) => {
            tracing::warn!("Failed to load {}: {}", config_file, e);
        }
    }
}

/// 运行中的应用
pub struct RunningApplication {
    context: Arc<ApplicationContext>,
    plugins: PluginRegistry,
}

impl RunningApplication {
    pub fn context(&self) -> &Arc<ApplicationContext> {
        &self.context
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// 逆序关闭所有插件
    pub async fn shutdown(self) {
        tracing::info!("Shutting down application");
        self.plugins.shutdown_all(&self.context).await;
    }
}
