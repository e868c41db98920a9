//! AOP 安装器
//!
//! 启动时执行一次：发现实例 -> 扫描类 -> 组合通知 -> 写回原型。
//! 单个实例或方法的失败只记录日志，不影响其他实例。

use chimera_core::{Class, ClassId, InstanceDiscovery};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::composer::{apply_advice, sort_by_order, AdviceApplication};
use crate::error::{AopError, AopResult};
use crate::metadata::MetadataStore;
use crate::registry::{AspectInstance, AspectRegistry, ManagedInstance};
use crate::scanner::{MethodScanner, ResolvedMethod};

/// 安装结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// 处理的托管实例数
    pub instances: usize,
    /// 被替换的方法数
    pub methods_woven: usize,
    /// 生效的通知数
    pub advice_applied: usize,
    /// 失败的实例或方法数
    pub failures: usize,
}

/// AOP 安装器
pub struct AopInstaller {
    registry: AspectRegistry,
    scanner: MethodScanner,
    /// 已织入的 (类, 方法)，同一个类的多个实例只织入一次
    woven: Mutex<HashSet<(ClassId, String)>>,
}

impl AopInstaller {
    pub fn new(discovery: Arc<dyn InstanceDiscovery>, metadata: Arc<MetadataStore>) -> Self {
        Self {
            registry: AspectRegistry::new(discovery, metadata.clone()),
            scanner: MethodScanner::new(metadata),
            woven: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &AspectRegistry {
        &self.registry
    }

    pub fn scanner(&self) -> &MethodScanner {
        &self.scanner
    }

    /// 为所有托管实例安装通知
    ///
    /// 只有实例发现失败会返回错误。
    pub fn install(&self) -> AopResult<InstallReport> {
        let instances = self.registry.list_managed_instances().map_err(|e| {
            tracing::error!("Failed to discover managed instances: {}", e);
            e
        })?;
        let aspects = self.registry.list_aspect_instances().map_err(|e| {
            tracing::error!("Failed to discover aspect instances: {}", e);
            e
        })?;

        tracing::info!(
            "[AOP] Weaving {} managed instance(s) with {} aspect(s)",
            instances.len(),
            aspects.len()
        );

        let mut report = InstallReport::default();
        for managed in &instances {
            report.instances += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.install_instance(managed, aspects, &mut report)
            }));
            if outcome.is_err() {
                tracing::error!("[AOP] Failed to process instance '{}'", managed.name);
                report.failures += 1;
            }
        }

        tracing::info!(
            "[AOP] Woven {} method(s) with {} advice(s), {} failure(s)",
            report.methods_woven,
            report.advice_applied,
            report.failures
        );
        Ok(report)
    }

    fn install_instance(
        &self,
        managed: &ManagedInstance,
        aspects: &[AspectInstance],
        report: &mut InstallReport,
    ) {
        let scan = self
            .scanner
            .scan(managed.instance.as_ref(), managed.class.as_ref());
        let Some(class) = scan.resolved_class.as_ref() else {
            tracing::trace!("Instance '{}' has no resolvable class", managed.name);
            return;
        };

        for method in &scan.methods {
            let key = (class.id(), method.method_name.clone());
            if self.woven.lock().contains(&key) {
                tracing::trace!(
                    "{}.{} already woven, skipping for '{}'",
                    class.name(),
                    method.method_name,
                    managed.name
                );
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| self.install_method(class, method, aspects)));
            match outcome {
                Ok(Ok(applied)) => {
                    self.woven.lock().insert(key);
                    if applied > 0 {
                        report.methods_woven += 1;
                        report.advice_applied += applied;
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        "[AOP] Failed to weave {}.{} on '{}': {}",
                        class.name(),
                        method.method_name,
                        managed.name,
                        e
                    );
                    report.failures += 1;
                }
                Err(_) => {
                    tracing::error!(
                        "[AOP] Advice for {}.{} on '{}' panicked during weaving",
                        class.name(),
                        method.method_name,
                        managed.name
                    );
                    report.failures += 1;
                }
            }
        }
    }

    fn install_method(
        &self,
        class: &Class,
        method: &ResolvedMethod,
        aspects: &[AspectInstance],
    ) -> AopResult<usize> {
        // 原始方法只取一次，同一方法上的所有通知共享
        let original = class
            .prototype()
            .and_then(|prototype| prototype.method(&method.method_name))
            .ok_or_else(|| AopError::MethodNotCallable {
                class: class.name().to_string(),
                method: method.method_name.clone(),
            })?;

        let mut declarations = method.declarations.clone();
        sort_by_order(&mut declarations);

        apply_advice(AdviceApplication {
            class,
            method_name: &method.method_name,
            declarations: &declarations,
            aspect_instances: aspects,
            original_method: &original,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{AdviceSlots, Aspect};
    use crate::metadata::{AdviceDeclaration, AdviceKind};
    use chimera_core::{
        ApplicationContext, ClassDef, ContainerError, ContainerResult, InstanceWrapper, Metatype,
        Method, Receiver,
    };
    use serde_json::{json, Value};

    struct Counter;
    struct Shouter;
    struct Exploding;

    impl Aspect for Shouter {
        fn advice(self: Arc<Self>) -> AdviceSlots {
            AdviceSlots::new().around(|ctx| {
                let next = ctx.method;
                Method::new(move |receiver, args| {
                    let value = next.call(receiver, args)?;
                    Ok(json!(value.as_str().unwrap_or_default().to_uppercase()))
                })
            })
        }
    }

    impl Aspect for Exploding {
        fn advice(self: Arc<Self>) -> AdviceSlots {
            panic!("aspect misconfigured");
        }
    }

    fn counter_class() -> Class {
        ClassDef::builder::<Counter>("Counter")
            .method("name", |_: &Counter, _| Ok(json!("counter")))
            .method("label", |_: &Counter, _| Ok(json!("label")))
            .build()
    }

    fn shouter_class() -> Class {
        ClassDef::builder::<Shouter>("Shouter").build()
    }

    fn metadata(with_exploding: bool) -> Arc<MetadataStore> {
        let mut store = MetadataStore::new();
        let shouter = store.mark_as_aspect::<Shouter>(None);
        store.append_advice::<Counter>("name", AdviceDeclaration::new(AdviceKind::Around, shouter));
        if with_exploding {
            let exploding = store.mark_as_aspect::<Exploding>(None);
            store.append_advice::<Counter>(
                "label",
                AdviceDeclaration::new(AdviceKind::Before, exploding),
            );
        }
        Arc::new(store)
    }

    #[test]
    fn test_install_weaves_once_per_class() {
        let context = Arc::new(ApplicationContext::new());
        let class = counter_class();
        let first = context.register_provider("first", Counter, class.clone()).unwrap();
        let second = context.register_provider("second", Counter, class).unwrap();
        context
            .register_provider("shouter", Shouter, shouter_class())
            .unwrap();

        let installer = AopInstaller::new(context, metadata(false));
        let report = installer.install().unwrap();

        assert_eq!(
            report,
            InstallReport {
                instances: 3,
                methods_woven: 1,
                advice_applied: 1,
                failures: 0,
            }
        );
        assert_eq!(first.invoke("name", &[]).unwrap(), json!("COUNTER"));
        assert_eq!(second.invoke("name", &[]).unwrap(), json!("COUNTER"));
        assert_eq!(first.invoke("label", &[]).unwrap(), json!("label"));

        // 第二个实例命中扫描缓存
        assert_eq!(installer.scanner().stats().hits, 1);
    }

    #[test]
    fn test_failing_aspect_does_not_abort_others() {
        let context = Arc::new(ApplicationContext::new());
        let counter = context
            .register_provider("counter", Counter, counter_class())
            .unwrap();
        context
            .register_provider("shouter", Shouter, shouter_class())
            .unwrap();
        context
            .register_provider(
                "exploding",
                Exploding,
                ClassDef::builder::<Exploding>("Exploding").build(),
            )
            .unwrap();

        let installer = AopInstaller::new(context, metadata(true));
        let report = installer.install().unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.methods_woven, 1);
        assert_eq!(counter.invoke("name", &[]).unwrap(), json!("COUNTER"));
        assert_eq!(counter.invoke("label", &[]).unwrap(), json!("label"));
    }

    #[test]
    fn test_instances_without_class_are_skipped() {
        let context = Arc::new(ApplicationContext::new());
        context.push_provider(InstanceWrapper::new("empty", None, None));
        context
            .register_factory_provider("anonymous", || Ok(Value::Null))
            .unwrap();

        let installer = AopInstaller::new(context, metadata(false));
        let report = installer.install().unwrap();
        assert_eq!(report.instances, 2);
        assert_eq!(report.methods_woven, 0);
        assert_eq!(report.failures, 0);
        assert_eq!(installer.scanner().stats().misses, 0);
    }

    struct BrokenDiscovery;

    impl InstanceDiscovery for BrokenDiscovery {
        fn get_controllers(&self) -> ContainerResult<Vec<InstanceWrapper>> {
            Ok(Vec::new())
        }

        fn get_providers(&self) -> ContainerResult<Vec<InstanceWrapper>> {
            Err(ContainerError::Other(anyhow::anyhow!("provider scan failed")))
        }

        fn resolve_class(&self, _instance: &Receiver) -> Option<Class> {
            None
        }
    }

    #[test]
    fn test_discovery_failure_is_fatal() {
        let installer = AopInstaller::new(Arc::new(BrokenDiscovery), metadata(false));
        let err = installer.install().unwrap_err();
        assert!(err.to_string().contains("provider scan failed"));
    }

    #[test]
    fn test_factory_instance_is_woven_through_resolved_class() {
        let context = Arc::new(ApplicationContext::new());
        context.register_class(counter_class());
        let receiver = context
            .register_factory_provider("counterFactory", || Ok(Counter))
            .unwrap();
        context
            .register_provider("shouter", Shouter, shouter_class())
            .unwrap();
        context.push_controller(InstanceWrapper::new(
            "counterAlias",
            Some(receiver),
            Some(Metatype::Factory {
                name: "counterAlias".to_string(),
            }),
        ));

        let installer = AopInstaller::new(context.clone(), metadata(false));
        let report = installer.install().unwrap();
        assert_eq!(report.methods_woven, 1);

        let object = context.get_object("counterFactory").unwrap();
        assert_eq!(object.invoke("name", &[]).unwrap(), json!("COUNTER"));
    }
}
