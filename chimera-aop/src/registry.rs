//! 切面注册表
//!
//! 从宿主容器枚举托管实例，并找出其中被标记为切面的实例。

use chimera_core::{Class, InstanceDiscovery, InstanceWrapper, Metatype, Receiver};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

use crate::aspect::Aspect;
use crate::error::AopResult;
use crate::metadata::{AspectRef, MetadataStore};

/// 托管实例及其解析出的类
#[derive(Clone, Debug)]
pub struct ManagedInstance {
    pub name: String,
    pub instance: Option<Receiver>,
    pub class: Option<Class>,
}

/// 已发现的切面实例
#[derive(Clone)]
pub struct AspectInstance {
    /// 切面类型句柄，用于与通知声明匹配
    pub aspect_ref: AspectRef,
    /// 切面实例的类名
    pub class_name: String,
    pub instance: Arc<dyn Aspect>,
}

impl fmt::Debug for AspectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectInstance")
            .field("aspect_ref", &self.aspect_ref)
            .field("class_name", &self.class_name)
            .finish()
    }
}

/// 切面注册表
pub struct AspectRegistry {
    discovery: Arc<dyn InstanceDiscovery>,
    metadata: Arc<MetadataStore>,
    /// 切面集合在启动后不会变化，只计算一次
    aspects: OnceCell<Vec<AspectInstance>>,
}

impl AspectRegistry {
    pub fn new(discovery: Arc<dyn InstanceDiscovery>, metadata: Arc<MetadataStore>) -> Self {
        Self {
            discovery,
            metadata,
            aspects: OnceCell::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// 列出所有托管实例：controller 在前，provider 在后，不去重
    pub fn list_managed_instances(&self) -> AopResult<Vec<ManagedInstance>> {
        let controllers = self.discovery.get_controllers()?;
        let providers = self.discovery.get_providers()?;

        Ok(controllers
            .into_iter()
            .chain(providers)
            .map(|wrapper| self.to_managed(wrapper))
            .collect())
    }

    fn to_managed(&self, wrapper: InstanceWrapper) -> ManagedInstance {
        let class = match (&wrapper.metatype, &wrapper.instance) {
            (Some(Metatype::Class(class)), _) => Some(class.clone()),
            // 工厂创建的实例，通知声明挂在真实类上，需要从实例本身解析
            (Some(Metatype::Factory { name }), Some(instance)) => {
                let resolved = self.discovery.resolve_class(instance);
                if resolved.is_none() {
                    tracing::debug!("Could not resolve class of factory instance '{}'", name);
                }
                resolved
            }
            _ => None,
        };

        ManagedInstance {
            name: wrapper.name,
            instance: wrapper.instance,
            class,
        }
    }

    /// 列出所有切面实例
    pub fn list_aspect_instances(&self) -> AopResult<&[AspectInstance]> {
        let aspects = self.aspects.get_or_try_init(|| {
            let managed = self.list_managed_instances()?;
            Ok::<_, crate::error::AopError>(self.collect_aspects(managed))
        })?;
        Ok(aspects.as_slice())
    }

    fn collect_aspects(&self, managed: Vec<ManagedInstance>) -> Vec<AspectInstance> {
        let mut aspects = Vec::new();

        for item in managed {
            let (Some(instance), Some(class)) = (item.instance, item.class) else {
                continue;
            };
            let Some(marker) = self.metadata.aspect_marker(class.instance_type_id()) else {
                continue;
            };

            match (marker.adapter)(&instance) {
                Some(aspect) => {
                    tracing::debug!(
                        "  ├─ Found aspect '{}' (class: {}, order: {:?})",
                        item.name,
                        class.name(),
                        marker.order
                    );
                    aspects.push(AspectInstance {
                        aspect_ref: marker.aspect,
                        class_name: class.name().to_string(),
                        instance: aspect,
                    });
                }
                None => {
                    tracing::warn!(
                        "Instance '{}' is marked as aspect {} but could not be adapted",
                        item.name,
                        marker.aspect
                    );
                }
            }
        }

        tracing::info!("Discovered {} aspect instance(s)", aspects.len());
        aspects
    }
}
