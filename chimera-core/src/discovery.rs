//! 实例发现 - 宿主容器对外暴露托管实例的契约

use std::fmt;

use crate::class::{Class, Receiver};
use crate::error::ContainerResult;

/// 实例的元类型
#[derive(Clone)]
pub enum Metatype {
    /// 直接由类创建的实例
    Class(Class),
    /// 由工厂函数创建的实例，真实类型需从实例本身解析
    Factory { name: String },
}

impl fmt::Debug for Metatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metatype::Class(class) => write!(f, "Class({})", class.name()),
            Metatype::Factory { name } => write!(f, "Factory({})", name),
        }
    }
}

/// 容器中的一个实例条目
#[derive(Clone, Debug)]
pub struct InstanceWrapper {
    /// Bean 名称
    pub name: String,
    /// 实例（尚未创建时为 None）
    pub instance: Option<Receiver>,
    /// 元类型
    pub metatype: Option<Metatype>,
}

impl InstanceWrapper {
    pub fn new(name: impl Into<String>, instance: Option<Receiver>, metatype: Option<Metatype>) -> Self {
        Self {
            name: name.into(),
            instance,
            metatype,
        }
    }
}

/// 实例发现 trait
///
/// 由宿主容器实现，AOP 通过它枚举所有托管实例。
pub trait InstanceDiscovery: Send + Sync {
    /// 所有 controller 实例
    fn get_controllers(&self) -> ContainerResult<Vec<InstanceWrapper>>;

    /// 所有 provider 实例
    fn get_providers(&self) -> ContainerResult<Vec<InstanceWrapper>>;

    /// 解析实例的运行时类
    ///
    /// 尽力而为：无法确定时返回 None。
    fn resolve_class(&self, instance: &Receiver) -> Option<Class>;
}
