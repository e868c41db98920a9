use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::class::{Class, Object, Receiver};
use crate::config::Environment;
use crate::discovery::{InstanceDiscovery, InstanceWrapper, Metatype};
use crate::error::{ContainerError, ContainerResult};

/// 应用上下文 - 持有所有托管实例、类注册表和 Environment
///
/// controller 与 provider 分开保存，发现时按 controller 在前、provider 在后的顺序返回。
pub struct ApplicationContext {
    /// 配置环境
    environment: Arc<Environment>,

    /// 类型到类的映射（用于解析工厂创建的实例）
    classes: RwLock<HashMap<TypeId, Class>>,

    /// controller 实例
    controllers: RwLock<Vec<InstanceWrapper>>,

    /// provider 实例
    providers: RwLock<Vec<InstanceWrapper>>,

    /// 应用名称
    app_name: RwLock<Option<String>>,
}

impl ApplicationContext {
    pub fn new() -> Self {
        Self::with_environment(Arc::new(Environment::new()))
    }

    pub fn with_environment(environment: Arc<Environment>) -> Self {
        Self {
            environment,
            classes: RwLock::new(HashMap::new()),
            controllers: RwLock::new(Vec::new()),
            providers: RwLock::new(Vec::new()),
            app_name: RwLock::new(None),
        }
    }

    /// 获取 Environment
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn set_app_name(&self, name: impl Into<String>) {
        *self.app_name.write() = Some(name.into());
    }

    pub fn get_app_name(&self) -> Option<String> {
        self.app_name.read().clone()
    }

    /// 注册类，后注册的同类型类会覆盖先前的
    pub fn register_class(&self, class: Class) {
        tracing::trace!("Registering class '{}' ({})", class.name(), class.type_name());
        self.classes.write().insert(class.instance_type_id(), class);
    }

    /// 按 Rust 类型查找已注册的类
    pub fn class_of<T: Any>(&self) -> Option<Class> {
        self.classes.read().get(&TypeId::of::<T>()).cloned()
    }

    /// 注册 controller 实例
    pub fn register_controller<T>(&self, name: impl Into<String>, instance: T, class: Class) -> ContainerResult<Object>
    where
        T: Any + Send + Sync,
    {
        let name = name.into();
        self.ensure_unique(&name)?;
        let object = self.bind(instance, class)?;
        self.controllers.write().push(InstanceWrapper::new(
            name.clone(),
            Some(object.receiver().clone()),
            Some(Metatype::Class(object.class().clone())),
        ));
        tracing::debug!("Controller '{}' registered", name);
        Ok(object)
    }

    /// 注册 provider 实例
    pub fn register_provider<T>(&self, name: impl Into<String>, instance: T, class: Class) -> ContainerResult<Object>
    where
        T: Any + Send + Sync,
    {
        let name = name.into();
        self.ensure_unique(&name)?;
        let object = self.bind(instance, class)?;
        self.providers.write().push(InstanceWrapper::new(
            name.clone(),
            Some(object.receiver().clone()),
            Some(Metatype::Class(object.class().clone())),
        ));
        tracing::debug!("Provider '{}' registered", name);
        Ok(object)
    }

    /// 注册由工厂创建的 provider
    ///
    /// 条目只记录工厂名称，实例的类在发现时通过 [`InstanceDiscovery::resolve_class`] 解析。
    pub fn register_factory_provider<T, F>(&self, name: impl Into<String>, factory: F) -> ContainerResult<Receiver>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let name = name.into();
        self.ensure_unique(&name)?;
        let instance = factory()
            .map_err(|e| ContainerError::BeanCreationFailed(format!("{}: {}", name, e)))?;
        let receiver: Receiver = Arc::new(instance);
        self.providers.write().push(InstanceWrapper::new(
            name.clone(),
            Some(receiver.clone()),
            Some(Metatype::Factory { name: name.clone() }),
        ));
        tracing::debug!("Factory provider '{}' registered", name);
        Ok(receiver)
    }

    /// 直接追加 provider 条目，不做任何校验（允许重复）
    pub fn push_provider(&self, wrapper: InstanceWrapper) {
        self.providers.write().push(wrapper);
    }

    /// 直接追加 controller 条目，不做任何校验（允许重复）
    pub fn push_controller(&self, wrapper: InstanceWrapper) {
        self.controllers.write().push(wrapper);
    }

    /// 按名称获取托管对象
    pub fn get_object(&self, name: &str) -> ContainerResult<Object> {
        let wrapper = self
            .find_wrapper(name)
            .ok_or_else(|| ContainerError::BeanNotFound(name.to_string()))?;
        let instance = wrapper
            .instance
            .ok_or_else(|| ContainerError::BeanNotFound(name.to_string()))?;
        let class = match wrapper.metatype {
            Some(Metatype::Class(class)) => Some(class),
            _ => self.resolve_class(&instance),
        }
        .ok_or_else(|| ContainerError::ClassNotResolved(name.to_string()))?;
        Ok(Object::new(instance, class))
    }

    /// 检查是否包含指定名称的 Bean
    pub fn contains_bean(&self, name: &str) -> bool {
        self.find_wrapper(name).is_some()
    }

    /// 获取所有 Bean 的名称
    pub fn get_bean_names(&self) -> Vec<String> {
        self.controllers
            .read()
            .iter()
            .chain(self.providers.read().iter())
            .map(|wrapper| wrapper.name.clone())
            .collect()
    }

    fn find_wrapper(&self, name: &str) -> Option<InstanceWrapper> {
        let controllers = self.controllers.read();
        let providers = self.providers.read();
        controllers
            .iter()
            .chain(providers.iter())
            .find(|wrapper| wrapper.name == name)
            .cloned()
    }

    fn ensure_unique(&self, name: &str) -> ContainerResult<()> {
        if self.contains_bean(name) {
            tracing::warn!("Bean '{}' already exists, registration failed", name);
            return Err(ContainerError::BeanAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    fn bind<T>(&self, instance: T, class: Class) -> ContainerResult<Object>
    where
        T: Any + Send + Sync,
    {
        let receiver: Receiver = Arc::new(instance);
        if !class.is_instance(&receiver) {
            return Err(ContainerError::ReceiverMismatch {
                expected: class.type_name(),
            });
        }
        self.register_class(class.clone());
        Ok(Object::new(receiver, class))
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceDiscovery for ApplicationContext {
    fn get_controllers(&self) -> ContainerResult<Vec<InstanceWrapper>> {
        Ok(self.controllers.read().clone())
    }

    fn get_providers(&self) -> ContainerResult<Vec<InstanceWrapper>> {
        Ok(self.providers.read().clone())
    }

    fn resolve_class(&self, instance: &Receiver) -> Option<Class> {
        let type_id = (**instance).type_id();
        self.classes.read().get(&type_id).cloned()
    }
}
