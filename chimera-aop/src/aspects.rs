//! 预定义的常用切面
//!
//! 每个切面都带有自己的类定义和切面标记，注册为 provider 后即可在通知声明中引用。

use chimera_core::{ApplicationContext, Class, ClassDef, ContainerResult, Method, Receiver};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::aspect::{AdviceSlots, Aspect, AspectClass, AroundContext};
use crate::metadata::{adapt_aspect, AspectRef, AspectSubmission};

/// 日志切面 - 记录方法进入与返回
///
/// 选项：`log_args`（默认 false）、`log_result`（默认 true）
#[derive(Debug, Default)]
pub struct LoggingAspect;

impl LoggingAspect {
    pub fn class() -> Class {
        ClassDef::builder::<LoggingAspect>("LoggingAspect").build()
    }
}

impl Aspect for LoggingAspect {
    fn advice(self: Arc<Self>) -> AdviceSlots {
        AdviceSlots::new()
            .before(|ctx, args| {
                if flag(ctx.option("log_args"), false) {
                    let args = Value::from(args.to_vec());
                    tracing::info!("→ Entering: {} with args {}", ctx.signature(), args);
                } else {
                    tracing::info!("→ Entering: {}", ctx.signature());
                }
                Ok(())
            })
            .after_returning(|ctx, _| {
                match ctx.result {
                    Some(result) if flag(ctx.option("log_result"), true) => {
                        tracing::info!("← Exiting: {} => {}", ctx.signature(), result);
                    }
                    _ => tracing::info!("← Exiting: {}", ctx.signature()),
                }
                Ok(())
            })
    }
}

impl AspectClass for LoggingAspect {
    const ORDER: Option<i32> = None;
}

/// 计时切面 - 方法耗时超过阈值时告警
///
/// 选项：`threshold_ms` 覆盖切面默认阈值
#[derive(Debug)]
pub struct TimingAspect {
    threshold_ms: u64,
}

impl TimingAspect {
    pub fn new(threshold_ms: u64) -> Self {
        Self { threshold_ms }
    }

    pub fn class() -> Class {
        ClassDef::builder::<TimingAspect>("TimingAspect").build()
    }
}

impl Default for TimingAspect {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Aspect for TimingAspect {
    fn advice(self: Arc<Self>) -> AdviceSlots {
        AdviceSlots::new().around(move |ctx: AroundContext| {
            let threshold = ctx
                .options
                .get("threshold_ms")
                .and_then(Value::as_u64)
                .unwrap_or(self.threshold_ms);
            let signature = ctx.signature();
            let next = ctx.method;

            Method::new(move |receiver, args| {
                let start = Instant::now();
                let result = next.call(receiver, args);
                let elapsed = start.elapsed().as_millis();
                if elapsed > u128::from(threshold) {
                    tracing::warn!("⏱ Slow method: {} took {}ms (threshold: {}ms)", signature, elapsed, threshold);
                } else {
                    tracing::debug!("⏱ {} took {}ms", signature, elapsed);
                }
                result
            })
        })
    }
}

impl AspectClass for TimingAspect {
    const ORDER: Option<i32> = Some(0);
}

/// 异常日志切面
#[derive(Debug, Default)]
pub struct ErrorLoggingAspect;

impl ErrorLoggingAspect {
    pub fn class() -> Class {
        ClassDef::builder::<ErrorLoggingAspect>("ErrorLoggingAspect").build()
    }
}

impl Aspect for ErrorLoggingAspect {
    fn advice(self: Arc<Self>) -> AdviceSlots {
        AdviceSlots::new().after_throwing(|ctx, _| {
            if let Some(error) = ctx.error {
                tracing::error!("✗ Exception in {}: {:#}", ctx.signature(), error);
            }
        })
    }
}

impl AspectClass for ErrorLoggingAspect {
    const ORDER: Option<i32> = None;
}

/// 缓存切面 - 按实例和序列化后的参数缓存返回值，错误不缓存
///
/// 条目持有实例的弱引用：实例释放后条目失效，即使地址被新实例复用也不会命中。
/// 条目数达到上限时先清理失效条目，仍然已满则不再缓存新结果。
#[derive(Debug)]
pub struct CachingAspect {
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

#[derive(Debug)]
struct CacheEntry {
    owner: Weak<dyn Any + Send + Sync>,
    value: Value,
}

impl CacheEntry {
    fn is_owned_by(&self, receiver: &Receiver) -> bool {
        self.owner
            .upgrade()
            .is_some_and(|owner| Arc::ptr_eq(&owner, receiver))
    }
}

impl CachingAspect {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn class() -> Class {
        ClassDef::builder::<CachingAspect>("CachingAspect").build()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// 移除实例已释放的条目，返回移除数量
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.owner.strong_count() > 0);
        before - entries.len()
    }

    fn lookup(&self, key: &str, receiver: &Receiver) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_owned_by(receiver) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, receiver: &Receiver, value: Value) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.owner.strong_count() > 0);
            if entries.len() >= self.capacity {
                tracing::trace!("Cache full ({} entries), not caching {}", self.capacity, key);
                return;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                owner: Arc::downgrade(receiver),
                value,
            },
        );
    }
}

impl Default for CachingAspect {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl Aspect for CachingAspect {
    fn advice(self: Arc<Self>) -> AdviceSlots {
        AdviceSlots::new().around(move |ctx: AroundContext| {
            let cache = self.clone();
            let signature = ctx.signature();
            let next = ctx.method;

            Method::new(move |receiver, args| {
                let key = format!(
                    "{}@{:p}:{}",
                    signature,
                    Arc::as_ptr(receiver),
                    Value::from(args.to_vec())
                );
                if let Some(hit) = cache.lookup(&key, receiver) {
                    tracing::trace!("Cache hit for {}", key);
                    return Ok(hit);
                }

                let value = next.call(receiver, args)?;
                cache.store(key, receiver, value.clone());
                Ok(value)
            })
        })
    }
}

impl AspectClass for CachingAspect {
    const ORDER: Option<i32> = Some(10);
}

/// 注册所有预定义切面为 provider
pub fn register_builtin_aspects(context: &ApplicationContext) -> ContainerResult<()> {
    context.register_provider("loggingAspect", LoggingAspect, LoggingAspect::class())?;
    context.register_provider("timingAspect", TimingAspect::default(), TimingAspect::class())?;
    context.register_provider("errorLoggingAspect", ErrorLoggingAspect, ErrorLoggingAspect::class())?;
    context.register_provider("cachingAspect", CachingAspect::default(), CachingAspect::class())?;
    Ok(())
}

fn flag(value: Option<&Value>, default: bool) -> bool {
    value.and_then(Value::as_bool).unwrap_or(default)
}

inventory::submit! {
    AspectSubmission {
        aspect: AspectRef::of::<LoggingAspect>,
        order: <LoggingAspect as AspectClass>::ORDER,
        adapter: adapt_aspect::<LoggingAspect>,
    }
}

inventory::submit! {
    AspectSubmission {
        aspect: AspectRef::of::<TimingAspect>,
        order: <TimingAspect as AspectClass>::ORDER,
        adapter: adapt_aspect::<TimingAspect>,
    }
}

inventory::submit! {
    AspectSubmission {
        aspect: AspectRef::of::<ErrorLoggingAspect>,
        order: <ErrorLoggingAspect as AspectClass>::ORDER,
        adapter: adapt_aspect::<ErrorLoggingAspect>,
    }
}

inventory::submit! {
    AspectSubmission {
        aspect: AspectRef::of::<CachingAspect>,
        order: <CachingAspect as AspectClass>::ORDER,
        adapter: adapt_aspect::<CachingAspect>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::AopInstaller;
    use crate::metadata::{AdviceDeclaration, AdviceKind, MetadataStore};
    use chimera_core::Object;
    use serde_json::json;
    use std::any::TypeId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Calculator {
        calls: AtomicUsize,
    }

    fn calculator_class() -> Class {
        ClassDef::builder::<Calculator>("Calculator")
            .method("square", |calc: &Calculator, args| {
                calc.calls.fetch_add(1, Ordering::SeqCst);
                let n = args.first().and_then(Value::as_i64).unwrap_or_default();
                Ok(json!(n * n))
            })
            .method("divide", |_: &Calculator, args| {
                let a = args[0].as_i64().unwrap_or_default();
                let b = args[1].as_i64().unwrap_or_default();
                if b == 0 {
                    anyhow::bail!("division by zero");
                }
                Ok(json!(a / b))
            })
            .build()
    }

    fn weave() -> (Arc<ApplicationContext>, Object) {
        let context = Arc::new(ApplicationContext::new());
        register_builtin_aspects(&context).unwrap();
        let calculator = context
            .register_provider(
                "calculator",
                Calculator {
                    calls: AtomicUsize::new(0),
                },
                calculator_class(),
            )
            .unwrap();

        let mut store = MetadataStore::from_inventory();
        let caching = store.mark_aspect_class::<CachingAspect>();
        let timing = store.mark_aspect_class::<TimingAspect>();
        let logging = store.mark_aspect_class::<LoggingAspect>();
        let errors = store.mark_aspect_class::<ErrorLoggingAspect>();

        store.append_advice::<Calculator>(
            "square",
            AdviceDeclaration::new(AdviceKind::Around, caching),
        );
        store.append_advice::<Calculator>(
            "square",
            AdviceDeclaration::new(AdviceKind::Around, timing).with_option("threshold_ms", 50),
        );
        store.append_advice::<Calculator>(
            "square",
            AdviceDeclaration::new(AdviceKind::Before, logging).with_option("log_args", true),
        );
        store.append_advice::<Calculator>(
            "divide",
            AdviceDeclaration::new(AdviceKind::AfterThrowing, errors),
        );
        store.append_advice::<Calculator>(
            "divide",
            AdviceDeclaration::new(AdviceKind::AfterReturning, logging),
        );

        let report = AopInstaller::new(context.clone(), Arc::new(store))
            .install()
            .unwrap();
        assert_eq!(report.methods_woven, 2);
        assert_eq!(report.advice_applied, 5);

        (context, calculator)
    }

    #[test]
    fn test_builtin_markers_submitted() {
        let store = MetadataStore::from_inventory();
        assert!(store.is_marked_as_aspect(TypeId::of::<LoggingAspect>()));
        assert!(store.is_marked_as_aspect(TypeId::of::<CachingAspect>()));
        assert_eq!(
            store.read_aspect_order(&AspectRef::of::<TimingAspect>()),
            Some(0)
        );
    }

    #[test]
    fn test_caching_aspect_memoizes_by_arguments() {
        let (context, calculator) = weave();

        assert_eq!(calculator.invoke("square", &[json!(4)]).unwrap(), json!(16));
        assert_eq!(calculator.invoke("square", &[json!(4)]).unwrap(), json!(16));
        assert_eq!(calculator.invoke("square", &[json!(5)]).unwrap(), json!(25));

        let target = calculator.downcast_ref::<Calculator>().unwrap();
        assert_eq!(target.calls.load(Ordering::SeqCst), 2);

        let cache = context.get_object("cachingAspect").unwrap();
        assert_eq!(cache.downcast_ref::<CachingAspect>().unwrap().len(), 2);
    }

    #[test]
    fn test_cache_entry_belongs_to_its_receiver() {
        let cache = CachingAspect::default();
        let first: Receiver = Arc::new(Calculator {
            calls: AtomicUsize::new(0),
        });
        let second: Receiver = Arc::new(Calculator {
            calls: AtomicUsize::new(0),
        });

        cache.store("square:[2]".to_string(), &first, json!(4));
        assert_eq!(cache.lookup("square:[2]", &first), Some(json!(4)));

        // 同一个键被其他实例读取时视为失效
        assert_eq!(cache.lookup("square:[2]", &second), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_drops_entries_of_released_instances() {
        let (context, calculator) = weave();
        let transient = Object::new(
            Arc::new(Calculator {
                calls: AtomicUsize::new(0),
            }),
            calculator.class().clone(),
        );

        assert_eq!(transient.invoke("square", &[json!(3)]).unwrap(), json!(9));
        assert_eq!(calculator.invoke("square", &[json!(3)]).unwrap(), json!(9));

        let cache = context.get_object("cachingAspect").unwrap();
        let cache = cache.downcast_ref::<CachingAspect>().unwrap();
        assert_eq!(cache.len(), 2);

        drop(transient);
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_full_cache_stops_storing() {
        let cache = CachingAspect::with_capacity(1);
        let receiver: Receiver = Arc::new(Calculator {
            calls: AtomicUsize::new(0),
        });
        let released: Receiver = Arc::new(Calculator {
            calls: AtomicUsize::new(0),
        });

        cache.store("a".to_string(), &released, json!(1));
        drop(released);
        // 满时先清理失效条目
        cache.store("b".to_string(), &receiver, json!(2));
        cache.store("c".to_string(), &receiver, json!(3));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("b", &receiver), Some(json!(2)));
        assert_eq!(cache.lookup("c", &receiver), None);
    }

    #[test]
    fn test_error_logging_keeps_error() {
        let (_, calculator) = weave();
        assert_eq!(calculator.invoke("divide", &[json!(9), json!(3)]).unwrap(), json!(3));

        let err = calculator
            .invoke("divide", &[json!(1), json!(0)])
            .unwrap_err();
        assert_eq!(err.to_string(), "division by zero");
    }
}
