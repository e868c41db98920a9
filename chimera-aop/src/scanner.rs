//! 方法扫描器
//!
//! 对一个类枚举自身（非继承）的方法，读取每个方法上的通知声明并附加切面顺序。
//! 结果按类缓存，同一个类的多个实例共享一次扫描。

use chimera_core::{Class, ClassId, Receiver, CONSTRUCTOR};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metadata::{AdviceDeclaration, MetadataStore};

/// 附带切面顺序的通知声明
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedDeclaration {
    pub declaration: AdviceDeclaration,
    /// 切面未声明顺序时为 None
    pub order: Option<i32>,
}

impl Deref for OrderedDeclaration {
    type Target = AdviceDeclaration;

    fn deref(&self) -> &Self::Target {
        &self.declaration
    }
}

/// 带通知的方法，`declarations` 永不为空
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub method_name: String,
    pub declarations: Vec<OrderedDeclaration>,
}

/// 扫描结果
#[derive(Debug, Default)]
pub struct ScanResult {
    pub methods: Vec<ResolvedMethod>,
    pub resolved_class: Option<Class>,
}

impl ScanResult {
    fn empty(resolved_class: Option<Class>) -> Self {
        Self {
            methods: Vec::new(),
            resolved_class,
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// 方法扫描器，每个实例拥有独立的缓存
pub struct MethodScanner {
    metadata: Arc<MetadataStore>,
    cache: Mutex<HashMap<ClassId, Arc<ScanResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MethodScanner {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 扫描实例的类
    ///
    /// 实例或类缺失时返回空结果；类没有可访问的原型时返回只带类的空结果。
    /// 这两种情况都不经过缓存，也不影响统计。
    pub fn scan(&self, instance: Option<&Receiver>, class: Option<&Class>) -> Arc<ScanResult> {
        let (Some(_), Some(class)) = (instance, class) else {
            return Arc::new(ScanResult::empty(None));
        };

        if class.prototype().is_none() {
            tracing::trace!("Prototype of class '{}' is not accessible", class.name());
            return Arc::new(ScanResult::empty(Some(class.clone())));
        }

        if let Some(cached) = self.cache.lock().get(&class.id()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Scan cache hit for class '{}'", class.name());
            return cached.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = Arc::new(self.scan_class(class));

        // 扫描期间锁已释放，若已有结果则沿用先写入的那个
        self.cache
            .lock()
            .entry(class.id())
            .or_insert(result)
            .clone()
    }

    fn scan_class(&self, class: &Class) -> ScanResult {
        let Some(prototype) = class.prototype() else {
            return ScanResult::empty(Some(class.clone()));
        };

        let mut methods = Vec::new();

        for name in prototype.own_names() {
            if name == CONSTRUCTOR {
                continue;
            }

            match prototype.get(&name) {
                Ok(Some(slot)) if slot.is_callable() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(
                        "Skipping property '{}' of class '{}': {}",
                        name,
                        class.name(),
                        e
                    );
                    continue;
                }
            }

            let Some(declarations) = self.metadata.read_advice(class.instance_type_id(), &name) else {
                continue;
            };
            if declarations.is_empty() {
                continue;
            }

            let declarations = declarations
                .iter()
                .map(|declaration| OrderedDeclaration {
                    order: declaration
                        .aspect
                        .as_ref()
                        .and_then(|aspect| self.metadata.read_aspect_order(aspect)),
                    declaration: declaration.clone(),
                })
                .collect();

            methods.push(ResolvedMethod {
                method_name: name,
                declarations,
            });
        }

        tracing::debug!(
            "Scanned class '{}': {} advised method(s)",
            class.name(),
            methods.len()
        );

        ScanResult {
            methods,
            resolved_class: Some(class.clone()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// 命中率（百分比），没有任何调用时为 0
    pub fn hit_rate(&self) -> f64 {
        let CacheStats { hits, misses } = self.stats();
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64 * 100.0
    }

    /// 清空缓存并重置统计
    pub fn clear_caches(&self) {
        self.cache.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// 只移除一个类的缓存
    pub fn invalidate(&self, class: &Class) -> bool {
        self.cache.lock().remove(&class.id()).is_some()
    }

    pub fn cached_classes(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{AdviceSlots, Aspect};
    use crate::metadata::{AdviceKind, AspectRef};
    use chimera_core::ClassDef;
    use serde_json::json;

    struct Service;
    struct Plain;
    struct Ordered;
    struct Unordered;

    impl Aspect for Ordered {
        fn advice(self: Arc<Self>) -> AdviceSlots {
            AdviceSlots::new()
        }
    }

    fn metadata() -> Arc<MetadataStore> {
        let mut store = MetadataStore::new();
        let ordered = store.mark_as_aspect::<Ordered>(Some(2));
        let unordered = AspectRef::of::<Unordered>();

        store.append_advice::<Service>("find", AdviceDeclaration::new(AdviceKind::Before, ordered));
        store.append_advice::<Service>("find", AdviceDeclaration::new(AdviceKind::After, unordered));
        store.append_advice::<Service>("version", AdviceDeclaration::new(AdviceKind::Before, ordered));
        store.append_advice::<Service>("broken", AdviceDeclaration::new(AdviceKind::Before, ordered));
        store.append_advice::<Service>(
            "constructor",
            AdviceDeclaration::new(AdviceKind::Before, ordered),
        );
        Arc::new(store)
    }

    fn service_class() -> Class {
        ClassDef::builder::<Service>("Service")
            .method("find", |_: &Service, _| Ok(json!(1)))
            .method("save", |_: &Service, _| Ok(json!(2)))
            .property("version", json!("1.0"))
            .accessor("broken", || Err(anyhow::anyhow!("getter failed")))
            .build()
    }

    fn receiver() -> Receiver {
        Arc::new(Service)
    }

    #[test]
    fn test_scan_collects_advised_methods_with_order() {
        let scanner = MethodScanner::new(metadata());
        let class = service_class();
        let result = scanner.scan(Some(&receiver()), Some(&class));

        assert_eq!(result.methods.len(), 1);
        let method = &result.methods[0];
        assert_eq!(method.method_name, "find");
        let orders: Vec<Option<i32>> = method.declarations.iter().map(|d| d.order).collect();
        assert_eq!(orders, vec![Some(2), None]);
        assert_eq!(method.declarations[1].kind, AdviceKind::After);
        assert_eq!(result.resolved_class.as_ref().map(|c| c.id()), Some(class.id()));
    }

    #[test]
    fn test_cache_identity_and_clear() {
        let scanner = MethodScanner::new(metadata());
        let class = service_class();

        let first = scanner.scan(Some(&receiver()), Some(&class));
        let second = scanner.scan(Some(&receiver()), Some(&class));
        assert!(Arc::ptr_eq(&first, &second));

        scanner.clear_caches();
        assert_eq!(scanner.stats(), CacheStats::default());

        let third = scanner.scan(Some(&receiver()), Some(&class));
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(scanner.stats(), CacheStats { hits: 0, misses: 1 });
    }

    #[test]
    fn test_hit_rate() {
        let scanner = MethodScanner::new(metadata());
        assert_eq!(scanner.hit_rate(), 0.0);

        let a = service_class();
        let b = ClassDef::builder::<Plain>("Plain").build();
        let instance = receiver();

        scanner.scan(Some(&instance), Some(&a));
        scanner.scan(Some(&instance), Some(&b));
        for _ in 0..6 {
            scanner.scan(Some(&instance), Some(&a));
        }

        assert_eq!(scanner.stats(), CacheStats { hits: 6, misses: 2 });
        assert!((scanner.hit_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalidate_single_class() {
        let scanner = MethodScanner::new(metadata());
        let a = service_class();
        let b = ClassDef::builder::<Plain>("Plain").build();
        let instance = receiver();

        let a1 = scanner.scan(Some(&instance), Some(&a));
        let b1 = scanner.scan(Some(&instance), Some(&b));

        assert!(scanner.invalidate(&a));
        assert!(!scanner.invalidate(&a));

        let a2 = scanner.scan(Some(&instance), Some(&a));
        let b2 = scanner.scan(Some(&instance), Some(&b));
        assert!(!Arc::ptr_eq(&a1, &a2));
        assert!(Arc::ptr_eq(&b1, &b2));
    }

    #[test]
    fn test_class_without_advice() {
        let scanner = MethodScanner::new(metadata());
        let class = ClassDef::builder::<Plain>("Plain")
            .method("run", |_: &Plain, _| Ok(json!(null)))
            .build();

        for _ in 0..3 {
            let result = scanner.scan(Some(&receiver()), Some(&class));
            assert!(result.methods.is_empty());
            assert_eq!(result.resolved_class.as_ref().map(|c| c.id()), Some(class.id()));
        }
    }

    #[test]
    fn test_degenerate_inputs_do_not_touch_cache() {
        let scanner = MethodScanner::new(metadata());
        let class = service_class();
        let opaque = ClassDef::builder::<Service>("Sealed").opaque().build();

        let none = scanner.scan(None, None);
        assert!(none.methods.is_empty());
        assert!(none.resolved_class.is_none());

        let missing_class = scanner.scan(Some(&receiver()), None);
        assert!(missing_class.resolved_class.is_none());

        let missing_instance = scanner.scan(None, Some(&class));
        assert!(missing_instance.resolved_class.is_none());

        let sealed = scanner.scan(Some(&receiver()), Some(&opaque));
        assert!(sealed.methods.is_empty());
        assert_eq!(sealed.resolved_class.as_ref().map(|c| c.id()), Some(opaque.id()));

        assert_eq!(scanner.stats(), CacheStats::default());
        assert_eq!(scanner.cached_classes(), 0);
    }

    #[test]
    fn test_scanners_do_not_share_cache() {
        let store = metadata();
        let first = MethodScanner::new(store.clone());
        let second = MethodScanner::new(store);
        let class = service_class();

        let a = first.scan(Some(&receiver()), Some(&class));
        let b = second.scan(Some(&receiver()), Some(&class));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(second.stats().misses, 1);
    }
}
