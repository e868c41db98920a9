//! 通知元数据存储
//!
//! 显式的旁路表：`(声明类, 方法名) -> [AdviceDeclaration]`，以及切面类型上的
//! 切面标记（顺序 + 适配器）。启动时构建，之后只读。

use chimera_core::Receiver;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::aspect::{Aspect, AspectClass};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviceKind {
    Around,
    Before,
    After,
    AfterReturning,
    AfterThrowing,
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            AdviceKind::Around => "AROUND",
            AdviceKind::Before => "BEFORE",
            AdviceKind::After => "AFTER",
            AdviceKind::AfterReturning => "AFTER_RETURNING",
            AdviceKind::AfterThrowing => "AFTER_THROWING",
        };
        f.write_str(kind)
    }
}

/// 通知选项
pub type AdviceOptions = serde_json::Map<String, Value>;

/// 切面类型的类型化句柄
///
/// 相等性只比较 `TypeId`，名称仅用于日志。
#[derive(Clone, Copy)]
pub struct AspectRef {
    type_id: TypeId,
    name: &'static str,
}

impl AspectRef {
    pub fn of<A: Any>() -> Self {
        let full = std::any::type_name::<A>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self {
            type_id: TypeId::of::<A>(),
            name,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for AspectRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for AspectRef {}

impl Hash for AspectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for AspectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AspectRef({})", self.name)
    }
}

impl fmt::Display for AspectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 一次通知注解的声明
#[derive(Debug, Clone, PartialEq)]
pub struct AdviceDeclaration {
    pub kind: AdviceKind,
    pub options: AdviceOptions,
    /// 为 None 时属于配置错误，织入时会被跳过
    pub aspect: Option<AspectRef>,
}

impl AdviceDeclaration {
    pub fn new(kind: AdviceKind, aspect: AspectRef) -> Self {
        Self {
            kind,
            options: AdviceOptions::new(),
            aspect: Some(aspect),
        }
    }

    /// 没有切面引用的声明
    pub fn detached(kind: AdviceKind) -> Self {
        Self {
            kind,
            options: AdviceOptions::new(),
            aspect: None,
        }
    }

    pub fn with_options(mut self, options: AdviceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// 将托管实例转换为切面
pub type AspectAdapter = fn(&Receiver) -> Option<Arc<dyn Aspect>>;

/// 默认适配器：按具体类型向下转换
pub fn adapt_aspect<A: Aspect>(receiver: &Receiver) -> Option<Arc<dyn Aspect>> {
    receiver
        .clone()
        .downcast::<A>()
        .ok()
        .map(|aspect| aspect as Arc<dyn Aspect>)
}

/// 切面标记
#[derive(Clone, Copy)]
pub struct AspectMarker {
    pub aspect: AspectRef,
    pub order: Option<i32>,
    pub adapter: AspectAdapter,
}

impl fmt::Debug for AspectMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectMarker")
            .field("aspect", &self.aspect)
            .field("order", &self.order)
            .finish()
    }
}

/// `#[derive(AspectClass)]` 提交的切面标记
pub struct AspectSubmission {
    pub aspect: fn() -> AspectRef,
    pub order: Option<i32>,
    pub adapter: AspectAdapter,
}

inventory::collect!(AspectSubmission);

/// `#[advised]` 提交的方法通知
///
/// `position` 是注解在源码中的先后位置，同一方法的多条声明按它排序。
pub struct AdviceSubmission {
    pub declaring: fn() -> TypeId,
    pub method: &'static str,
    pub position: u32,
    pub kind: AdviceKind,
    pub aspect: Option<fn() -> AspectRef>,
    pub options: fn() -> AdviceOptions,
}

inventory::collect!(AdviceSubmission);

/// 元数据存储
#[derive(Default)]
pub struct MetadataStore {
    advice: HashMap<(TypeId, String), Vec<AdviceDeclaration>>,
    aspects: HashMap<TypeId, AspectMarker>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从编译期提交的注解构建
    pub fn from_inventory() -> Self {
        let mut store = Self::new();

        for submission in inventory::iter::<AspectSubmission> {
            store.mark_aspect(AspectMarker {
                aspect: (submission.aspect)(),
                order: submission.order,
                adapter: submission.adapter,
            });
        }

        let mut submissions: Vec<&AdviceSubmission> = inventory::iter::<AdviceSubmission>.into_iter().collect();
        submissions.sort_by_key(|s| ((s.declaring)(), s.method, s.position));

        for submission in submissions {
            let declaration = match submission.aspect {
                Some(aspect) => AdviceDeclaration::new(submission.kind, aspect()),
                None => AdviceDeclaration::detached(submission.kind),
            }
            .with_options((submission.options)());
            store.append_advice_for((submission.declaring)(), submission.method, declaration);
        }

        tracing::debug!(
            "Loaded AOP metadata: {} aspect(s), {} advised method(s)",
            store.aspects.len(),
            store.advice.len()
        );
        store
    }

    /// 为 `T` 的方法追加一条通知声明
    pub fn append_advice<T: Any>(&mut self, method: &str, declaration: AdviceDeclaration) {
        self.append_advice_for(TypeId::of::<T>(), method, declaration);
    }

    pub fn append_advice_for(&mut self, declaring: TypeId, method: &str, declaration: AdviceDeclaration) {
        self.advice
            .entry((declaring, method.to_string()))
            .or_default()
            .push(declaration);
    }

    /// 读取声明类上某方法的通知声明
    pub fn read_advice(&self, declaring: TypeId, method: &str) -> Option<&[AdviceDeclaration]> {
        self.advice
            .get(&(declaring, method.to_string()))
            .map(Vec::as_slice)
    }

    /// 标记切面
    pub fn mark_aspect(&mut self, marker: AspectMarker) {
        self.aspects.insert(marker.aspect.type_id(), marker);
    }

    /// 标记切面类型并返回它的句柄
    pub fn mark_as_aspect<A: Aspect>(&mut self, order: Option<i32>) -> AspectRef {
        let aspect = AspectRef::of::<A>();
        self.mark_aspect(AspectMarker {
            aspect,
            order,
            adapter: adapt_aspect::<A>,
        });
        aspect
    }

    /// 使用类型上声明的顺序标记切面
    pub fn mark_aspect_class<A: AspectClass>(&mut self) -> AspectRef {
        self.mark_as_aspect::<A>(A::ORDER)
    }

    pub fn is_marked_as_aspect(&self, type_id: TypeId) -> bool {
        self.aspects.contains_key(&type_id)
    }

    pub fn aspect_marker(&self, type_id: TypeId) -> Option<&AspectMarker> {
        self.aspects.get(&type_id)
    }

    pub fn read_aspect_order(&self, aspect: &AspectRef) -> Option<i32> {
        self.aspects
            .get(&aspect.type_id())
            .and_then(|marker| marker.order)
    }
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataStore")
            .field("advised_methods", &self.advice.len())
            .field("aspects", &self.aspects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::AdviceSlots;
    use serde_json::json;

    struct Audit;
    struct Service;

    impl Aspect for Audit {
        fn advice(self: Arc<Self>) -> AdviceSlots {
            AdviceSlots::new()
        }
    }

    #[test]
    fn test_append_keeps_order() {
        let mut store = MetadataStore::new();
        let audit = store.mark_as_aspect::<Audit>(Some(3));

        store.append_advice::<Service>(
            "save",
            AdviceDeclaration::new(AdviceKind::Before, audit).with_option("tag", "first"),
        );
        store.append_advice::<Service>(
            "save",
            AdviceDeclaration::new(AdviceKind::Before, audit).with_option("tag", "second"),
        );

        let declarations = store.read_advice(TypeId::of::<Service>(), "save").unwrap();
        let tags: Vec<&Value> = declarations.iter().map(|d| &d.options["tag"]).collect();
        assert_eq!(tags, vec![&json!("first"), &json!("second")]);
        assert!(store.read_advice(TypeId::of::<Service>(), "load").is_none());
        assert!(store.read_advice(TypeId::of::<Audit>(), "save").is_none());
    }

    #[test]
    fn test_aspect_marker_and_order() {
        let mut store = MetadataStore::new();
        let audit = store.mark_as_aspect::<Audit>(Some(7));

        assert!(store.is_marked_as_aspect(TypeId::of::<Audit>()));
        assert!(!store.is_marked_as_aspect(TypeId::of::<Service>()));
        assert_eq!(store.read_aspect_order(&audit), Some(7));
        assert_eq!(store.read_aspect_order(&AspectRef::of::<Service>()), None);
        assert_eq!(audit.name(), "Audit");
    }

    #[test]
    fn test_adapter_downcasts_receiver() {
        let receiver: Receiver = Arc::new(Audit);
        assert!(adapt_aspect::<Audit>(&receiver).is_some());

        let other: Receiver = Arc::new(Service);
        assert!(adapt_aspect::<Audit>(&other).is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AdviceKind::AfterReturning.to_string(), "AFTER_RETURNING");
        assert_eq!(json!(AdviceKind::AfterThrowing), json!("AFTER_THROWING"));
    }
}
