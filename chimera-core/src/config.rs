//! 配置管理
//!
//! Environment 聚合多个按优先级排序的配置源，键使用点分路径，例如 `aop.enabled`。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{ApplicationError, ApplicationResult};

/// 配置值
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s),
            toml::Value::Integer(i) => ConfigValue::Int(i),
            toml::Value::Float(f) => ConfigValue::Float(f),
            toml::Value::Boolean(b) => ConfigValue::Bool(b),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::Array(items.into_iter().map(ConfigValue::from).collect())
            }
            toml::Value::Table(table) => ConfigValue::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// 配置源
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// 优先级，数字越大越优先
    fn priority(&self) -> i32 {
        0
    }
}

/// 配置环境
#[derive(Default)]
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
    active_profiles: RwLock<Vec<String>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加配置源，保持按优先级降序
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        tracing::debug!(
            "Adding property source '{}' (priority: {})",
            source.name(),
            source.priority()
        );
        let mut sources = self.sources.write();
        sources.push(source);
        sources.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.sources.read().iter().find_map(|source| {
            let value = source.get(key)?;
            tracing::trace!("Config '{}' resolved from '{}'", key, source.name());
            Some(value)
        })
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn set_active_profiles(&self, profiles: Vec<String>) {
        *self.active_profiles.write() = profiles;
    }

    pub fn get_active_profiles(&self) -> Vec<String> {
        self.active_profiles.read().clone()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self
            .sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        f.debug_struct("Environment")
            .field("sources", &sources)
            .field("active_profiles", &*self.active_profiles.read())
            .finish()
    }
}

/// 环境变量配置源
///
/// `APP_AOP_ENABLED` 对应键 `aop.enabled`；键中的 `-` 也映射为 `_`。
pub struct EnvironmentPropertySource {
    prefix: String,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace(['.', '-'], "_").to_uppercase())
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.env_key(key)).ok().map(ConfigValue::String)
    }

    fn priority(&self) -> i32 {
        100
    }
}

/// TOML 配置源，嵌套表展平为点分键
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> ApplicationResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApplicationError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&content, path.display().to_string())
    }

    pub fn parse(content: &str, name: impl Into<String>) -> ApplicationResult<Self> {
        let table: toml::Table = content
            .parse()
            .map_err(|e: toml::de::Error| ApplicationError::ConfigLoadFailed(e.to_string()))?;

        let mut properties = HashMap::new();
        flatten("", toml::Value::Table(table), &mut properties);

        Ok(Self {
            name: name.into(),
            properties,
            priority: 0,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

fn flatten(prefix: &str, value: toml::Value, out: &mut HashMap<String, ConfigValue>) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, nested, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), ConfigValue::from(leaf));
        }
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 内存配置源（用于测试或运行时覆盖）
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_flattening() {
        let source = TomlPropertySource::parse(
            r#"
            [aop]
            enabled = false
            log-cache-stats = true

            [logging]
            level = "debug"
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(source.get("aop.enabled"), Some(ConfigValue::Bool(false)));
        assert_eq!(
            source.get("logging.level"),
            Some(ConfigValue::String("debug".to_string()))
        );
        assert!(source.get("aop").is_none());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(TomlPropertySource::parse("aop = [", "broken").is_err());
    }

    #[test]
    fn test_priority_order() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("low")
                .with_property("aop.enabled", ConfigValue::Bool(true))
                .with_priority(1),
        ));
        env.add_property_source(Box::new(
            MapPropertySource::new("high")
                .with_property("aop.enabled", ConfigValue::String("off".to_string()))
                .with_priority(10),
        ));

        assert_eq!(env.get_bool("aop.enabled"), Some(false));
        assert!(env.get_bool_or("aop.missing", true));
    }

    #[test]
    fn test_typed_getters() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("map")
                .with_property("threshold", ConfigValue::String(" 25 ".to_string()))
                .with_property("name", ConfigValue::String("demo".to_string())),
        ));
        assert_eq!(env.get_i64_or("threshold", 0), 25);
        assert_eq!(env.get_string_or("name", "x"), "demo");
        assert_eq!(env.get_string_or("other", "x"), "x");
    }

    #[test]
    fn test_env_key_mapping() {
        let source = EnvironmentPropertySource::new("APP_");
        assert_eq!(source.env_key("aop.log-cache-stats"), "APP_AOP_LOG_CACHE_STATS");
    }
}
