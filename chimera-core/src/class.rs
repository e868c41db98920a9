//! 类模型 - 运行时分派表
//!
//! Rust 没有运行时原型链，容器托管的每个类型都通过 [`ClassDef`] 描述：
//! 一张按定义顺序保存的方法槽表（[`Prototype`]），外加可选的父类。
//! 方法调用统一经由分派表完成，因此 AOP 可以通过一次显式的
//! [`Prototype::replace_method`] 把织入后的方法安装回去。

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ContainerError;

/// 构造器槽名称，扫描方法时会被排除
pub const CONSTRUCTOR: &str = "constructor";

/// 容器托管的对象实例
pub type Receiver = Arc<dyn Any + Send + Sync>;

/// 方法调用结果，`Err` 表示方法抛出了错误
pub type MethodResult = anyhow::Result<Value>;

type MethodFn = dyn Fn(&Receiver, &[Value]) -> MethodResult + Send + Sync;

/// 可调用的方法
///
/// 克隆开销很小（内部是 `Arc`），织入时被层层包装。
#[derive(Clone)]
pub struct Method {
    inner: Arc<MethodFn>,
}

impl Method {
    /// 从无类型的闭包创建方法
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Receiver, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// 从绑定到具体类型的闭包创建方法
    ///
    /// 调用时 receiver 不是 `T` 会返回 [`ContainerError::ReceiverMismatch`]。
    pub fn bound<T, F>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self::new(move |receiver, args| {
            let target = (**receiver)
                .downcast_ref::<T>()
                .ok_or(ContainerError::ReceiverMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            f(target, args)
        })
    }

    /// 调用方法
    pub fn call(&self, receiver: &Receiver, args: &[Value]) -> MethodResult {
        (self.inner)(receiver, args)
    }

    /// 是否是同一个方法（引用相等）
    pub fn ptr_eq(&self, other: &Method) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({:p})", Arc::as_ptr(&self.inner))
    }
}

/// 属性读取器，读取时可能失败
pub type Accessor = Arc<dyn Fn() -> anyhow::Result<Slot> + Send + Sync>;

/// 原型上的一个属性槽
#[derive(Clone)]
pub enum Slot {
    /// 方法
    Method(Method),
    /// 普通值（不可调用）
    Value(Value),
    /// 读取器
    Accessor(Accessor),
}

impl Slot {
    /// 如果是方法则返回它
    pub fn as_method(&self) -> Option<&Method> {
        match self {
            Slot::Method(method) => Some(method),
            _ => None,
        }
    }

    /// 是否可调用
    pub fn is_callable(&self) -> bool {
        matches!(self, Slot::Method(_))
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Method(method) => write!(f, "Slot::Method({:?})", method),
            Slot::Value(value) => write!(f, "Slot::Value({})", value),
            Slot::Accessor(_) => write!(f, "Slot::Accessor(..)"),
        }
    }
}

/// 原型 - 类自身（非继承）的方法槽表
#[derive(Default)]
pub struct Prototype {
    slots: RwLock<IndexMap<String, Slot>>,
}

impl Prototype {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_slots(slots: IndexMap<String, Slot>) -> Self {
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// 按定义顺序返回自身属性名
    pub fn own_names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// 是否定义了指定属性
    pub fn contains(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    /// 读取属性，读取器会被执行
    pub fn get(&self, name: &str) -> anyhow::Result<Option<Slot>> {
        // 先释放读锁再执行读取器，读取器内部可能再次访问原型
        let slot = self.slots.read().get(name).cloned();
        match slot {
            Some(Slot::Accessor(getter)) => getter().map(Some),
            other => Ok(other),
        }
    }

    /// 读取方法，读取失败或不是方法时返回 None
    pub fn method(&self, name: &str) -> Option<Method> {
        match self.get(name) {
            Ok(Some(Slot::Method(method))) => Some(method),
            _ => None,
        }
    }

    /// 定义（或覆盖）属性
    pub fn define(&self, name: impl Into<String>, slot: Slot) {
        self.slots.write().insert(name.into(), slot);
    }

    /// 替换已有属性为新方法
    ///
    /// 属性不存在时不做任何修改并返回 false。
    pub fn replace_method(&self, name: &str, method: Method) -> bool {
        match self.slots.write().get_mut(name) {
            Some(slot) => {
                *slot = Slot::Method(method);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototype")
            .field("slots", &self.own_names())
            .finish()
    }
}

/// 类标识，进程内唯一且不会复用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

impl ClassId {
    fn next() -> Self {
        Self(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 类定义
pub struct ClassDef {
    id: ClassId,
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    parent: Option<Class>,
    prototype: Option<Arc<Prototype>>,
}

/// 共享的类句柄，类的身份即 [`ClassId`]
pub type Class = Arc<ClassDef>;

impl ClassDef {
    /// 创建类构建器
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder::new(name)
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 实例的 Rust 类型
    pub fn instance_type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn parent(&self) -> Option<&Class> {
        self.parent.as_ref()
    }

    /// 原型，不透明类返回 None
    pub fn prototype(&self) -> Option<&Arc<Prototype>> {
        self.prototype.as_ref()
    }

    /// 分派方法：先查自身原型，再沿父类链查找
    pub fn find_method(&self, name: &str) -> Option<Method> {
        self.prototype
            .as_ref()
            .and_then(|prototype| prototype.method(name))
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.find_method(name)))
    }

    /// receiver 是否是此类的实例
    pub fn is_instance(&self, receiver: &Receiver) -> bool {
        (**receiver).type_id() == self.type_id
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .field("prototype", &self.prototype)
            .finish()
    }
}

/// 类构建器
///
/// ```ignore
/// let class = ClassDef::builder::<GreetingService>("GreetingService")
///     .method("get_hello", |svc: &GreetingService, args| {
///         Ok(json!(svc.greet(args[0].as_str().unwrap_or_default())))
///     })
///     .build();
/// ```
pub struct ClassBuilder<T> {
    name: String,
    parent: Option<Class>,
    slots: Option<IndexMap<String, Slot>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let class_name = name.clone();

        let mut slots = IndexMap::new();
        slots.insert(
            CONSTRUCTOR.to_string(),
            Slot::Method(Method::new(move |_, _| Ok(Value::String(class_name.clone())))),
        );

        Self {
            name,
            parent: None,
            slots: Some(slots),
            _marker: PhantomData,
        }
    }

    /// 设置父类
    pub fn extends(mut self, parent: Class) -> Self {
        self.parent = Some(parent);
        self
    }

    /// 定义绑定到 `T` 的方法
    pub fn method<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        self.slot(name, Slot::Method(Method::bound::<T, F>(f)))
    }

    /// 定义无类型的方法
    pub fn raw_method(self, name: impl Into<String>, method: Method) -> Self {
        self.slot(name, Slot::Method(method))
    }

    /// 定义普通属性
    pub fn property(self, name: impl Into<String>, value: Value) -> Self {
        self.slot(name, Slot::Value(value))
    }

    /// 定义读取器属性
    pub fn accessor<F>(self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> anyhow::Result<Slot> + Send + Sync + 'static,
    {
        self.slot(name, Slot::Accessor(Arc::new(getter)))
    }

    /// 不透明类：没有可访问的原型
    pub fn opaque(mut self) -> Self {
        self.slots = None;
        self
    }

    fn slot(mut self, name: impl Into<String>, slot: Slot) -> Self {
        if let Some(slots) = self.slots.as_mut() {
            slots.insert(name.into(), slot);
        } else {
            tracing::warn!("Ignoring slot on opaque class '{}'", self.name);
        }
        self
    }

    pub fn build(self) -> Class {
        Arc::new(ClassDef {
            id: ClassId::next(),
            name: self.name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            parent: self.parent,
            prototype: self.slots.map(|slots| Arc::new(Prototype::from_slots(slots))),
        })
    }
}

/// 托管对象：实例 + 类
#[derive(Clone)]
pub struct Object {
    receiver: Receiver,
    class: Class,
}

impl Object {
    pub fn new(receiver: Receiver, class: Class) -> Self {
        Self { receiver, class }
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.receiver).downcast_ref::<T>()
    }

    /// 通过分派表调用方法
    pub fn invoke(&self, name: &str, args: &[Value]) -> MethodResult {
        let method = self
            .class
            .find_method(name)
            .ok_or_else(|| ContainerError::MethodNotFound {
                class: self.class.name().to_string(),
                method: name.to_string(),
            })?;
        method.call(&self.receiver, args)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeter {
        greeting: String,
    }

    fn greeter_class() -> Class {
        ClassDef::builder::<Greeter>("Greeter")
            .method("greet", |g: &Greeter, args| {
                Ok(json!(format!("{} {}", g.greeting, args[0].as_str().unwrap_or("?"))))
            })
            .property("version", json!(2))
            .build()
    }

    fn greeter() -> Object {
        let receiver: Receiver = Arc::new(Greeter {
            greeting: "Hi".to_string(),
        });
        Object::new(receiver, greeter_class())
    }

    #[test]
    fn test_invoke_bound_method() {
        let object = greeter();
        let result = object.invoke("greet", &[json!("Bob")]).unwrap();
        assert_eq!(result, json!("Hi Bob"));
    }

    #[test]
    fn test_invoke_missing_method() {
        let err = greeter().invoke("wave", &[]).unwrap_err();
        assert!(err.to_string().contains("wave"));
    }

    #[test]
    fn test_receiver_mismatch() {
        let class = greeter_class();
        let wrong: Receiver = Arc::new(42u32);
        let method = class.find_method("greet").unwrap();
        let err = method.call(&wrong, &[json!("x")]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::ReceiverMismatch { .. })
        ));
    }

    #[test]
    fn test_prototype_keeps_definition_order_and_constructor() {
        let class = greeter_class();
        let names = class.prototype().unwrap().own_names();
        assert_eq!(names, vec!["constructor", "greet", "version"]);
    }

    #[test]
    fn test_replace_method_only_existing() {
        let class = greeter_class();
        let prototype = class.prototype().unwrap();
        let replacement = Method::new(|_, _| Ok(json!("replaced")));

        assert!(!prototype.replace_method("missing", replacement.clone()));
        assert!(!prototype.contains("missing"));

        assert!(prototype.replace_method("greet", replacement.clone()));
        let installed = prototype.method("greet").unwrap();
        assert!(installed.ptr_eq(&replacement));
    }

    #[test]
    fn test_define_adds_non_callable_slot() {
        let class = greeter_class();
        let prototype = class.prototype().unwrap();
        prototype.define("injected", Slot::Value(json!(7)));

        assert_eq!(prototype.own_names().last().map(String::as_str), Some("injected"));
        assert!(matches!(prototype.get("injected").unwrap(), Some(Slot::Value(_))));
        assert!(prototype.method("injected").is_none());
    }

    #[test]
    fn test_accessor_failure_surfaces_on_get() {
        let class = ClassDef::builder::<Greeter>("Greeter")
            .accessor("broken", || Err(anyhow::anyhow!("getter exploded")))
            .build();
        let prototype = class.prototype().unwrap();
        assert!(prototype.get("broken").is_err());
        assert!(prototype.method("broken").is_none());
    }

    #[test]
    fn test_parent_dispatch() {
        let base = ClassDef::builder::<()>("Base")
            .raw_method("ping", Method::new(|_, _| Ok(json!("pong"))))
            .build();
        let child = ClassDef::builder::<Greeter>("Child").extends(base).build();

        assert_eq!(child.parent().map(|parent| parent.name()), Some("Base"));
        assert!(!child.prototype().unwrap().contains("ping"));
        let receiver: Receiver = Arc::new(Greeter {
            greeting: String::new(),
        });
        let object = Object::new(receiver, child);
        assert_eq!(object.invoke("ping", &[]).unwrap(), json!("pong"));
    }

    #[test]
    fn test_opaque_class_has_no_prototype() {
        let class = ClassDef::builder::<Greeter>("Sealed").opaque().build();
        assert!(class.prototype().is_none());
        assert!(class.find_method("constructor").is_none());
    }

    #[test]
    fn test_class_ids_are_unique() {
        let a = greeter_class();
        let b = greeter_class();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.instance_type_id(), b.instance_type_id());
        assert_eq!(a.instance_type_id(), TypeId::of::<Greeter>());
    }

    #[test]
    fn test_is_instance() {
        let object = greeter();
        assert!(object.class().is_instance(object.receiver()));
        let other: Receiver = Arc::new(1u8);
        assert!(!object.class().is_instance(&other));
    }
}
