//! 通知组合器
//!
//! 把一个方法上的通知声明解析为切面实例，并把它们逐层包装成一个替换方法，
//! 最后通过 [`Prototype::replace_method`](chimera_core::Prototype::replace_method)
//! 一次性写回原型。
//!
//! 声明按 `order` 升序排列，最小的 `order` 在最外层：它的 before 通知最先执行，
//! after 类通知最后执行。

use chimera_core::{Class, Method, Receiver};
use serde_json::Value;
use std::sync::Arc;

use crate::aspect::{AdviceContext, AdviceSlots, AroundContext};
use crate::error::{AopError, AopResult};
use crate::metadata::{AdviceKind, AdviceOptions};
use crate::registry::AspectInstance;
use crate::scanner::OrderedDeclaration;

/// 按 `order` 升序稳定排序，未声明顺序的排在最后，相同顺序保持声明顺序
pub fn sort_by_order(declarations: &mut [OrderedDeclaration]) {
    declarations.sort_by_key(|d| (d.order.is_none(), d.order));
}

/// 一次织入请求
pub struct AdviceApplication<'a> {
    /// 目标类
    pub class: &'a Class,
    pub method_name: &'a str,
    /// 已按优先级排序的声明
    pub declarations: &'a [OrderedDeclaration],
    pub aspect_instances: &'a [AspectInstance],
    /// 织入前的原始方法，所有通知回调看到的都是它
    pub original_method: &'a Method,
}

/// 织入点信息，所有包装层共享
struct JoinSite {
    original: Method,
    target: String,
    method_name: String,
}

impl JoinSite {
    fn context<'a>(
        &'a self,
        receiver: &'a Receiver,
        options: &'a AdviceOptions,
        result: Option<&'a Value>,
        error: Option<&'a anyhow::Error>,
    ) -> AdviceContext<'a> {
        AdviceContext {
            method: &self.original,
            options,
            result,
            error,
            receiver,
            target: &self.target,
            method_name: &self.method_name,
        }
    }
}

/// 组合并安装通知，返回实际生效的通知数
///
/// 原型上不存在该方法时什么也不做。
pub fn apply_advice(application: AdviceApplication<'_>) -> AopResult<usize> {
    let AdviceApplication {
        class,
        method_name,
        declarations,
        aspect_instances,
        original_method,
    } = application;

    let Some(prototype) = class.prototype() else {
        return Ok(0);
    };
    if !prototype.contains(method_name) {
        tracing::debug!(
            "Method '{}' no longer exists on class '{}', skipping",
            method_name,
            class.name()
        );
        return Ok(0);
    }

    // 先按优先级顺序解析，告警也按这个顺序输出
    let mut resolved = Vec::with_capacity(declarations.len());
    for declaration in declarations {
        let Some(aspect_ref) = declaration.aspect else {
            tracing::warn!(
                "Decorator without decoratorClass found for method {}. Skipping.",
                method_name
            );
            continue;
        };

        match aspect_instances.iter().find(|a| a.aspect_ref == aspect_ref) {
            Some(aspect) => resolved.push((declaration, aspect)),
            None => {
                tracing::warn!(
                    "No matching decorator instance found for {} on method {}.",
                    aspect_ref,
                    method_name
                );
            }
        }
    }

    let site = Arc::new(JoinSite {
        original: original_method.clone(),
        target: class.name().to_string(),
        method_name: method_name.to_string(),
    });

    let mut current = prototype
        .method(method_name)
        .unwrap_or_else(|| original_method.clone());
    let mut applied = 0;

    // 从优先级最低的开始包装，最终优先级最高的在最外层
    for (declaration, aspect) in resolved.into_iter().rev() {
        let slots = aspect.instance.clone().advice();
        match wrap(declaration.kind, &slots, current.clone(), &declaration.options, &site) {
            Some(wrapped) => {
                tracing::debug!(
                    "  ├─ Applied {} advice from {} to {}.{}",
                    declaration.kind,
                    aspect.class_name,
                    site.target,
                    method_name
                );
                current = wrapped;
                applied += 1;
            }
            None => {
                tracing::debug!(
                    "Aspect {} does not implement {} advice, skipping",
                    aspect.class_name,
                    declaration.kind
                );
            }
        }
    }

    if !prototype.replace_method(method_name, current) {
        return Err(AopError::InstallFailed {
            class: class.name().to_string(),
            method: method_name.to_string(),
        });
    }

    Ok(applied)
}

/// 用一种通知包装当前方法，切面未实现该通知时返回 None
fn wrap(
    kind: AdviceKind,
    slots: &AdviceSlots,
    next: Method,
    options: &AdviceOptions,
    site: &Arc<JoinSite>,
) -> Option<Method> {
    let options = Arc::new(options.clone());
    let site = site.clone();

    let method = match kind {
        AdviceKind::Before => {
            let before = slots.before.clone()?;
            Method::new(move |receiver, args| {
                before(&site.context(receiver, &options, None, None), args)?;
                next.call(receiver, args)
            })
        }
        AdviceKind::After => {
            let after = slots.after.clone()?;
            // 仅在正常返回时执行
            Method::new(move |receiver, args| {
                let result = next.call(receiver, args)?;
                after(&site.context(receiver, &options, None, None), args)?;
                Ok(result)
            })
        }
        AdviceKind::AfterReturning => {
            let after_returning = slots.after_returning.clone()?;
            Method::new(move |receiver, args| {
                let result = next.call(receiver, args)?;
                after_returning(&site.context(receiver, &options, Some(&result), None), args)?;
                Ok(result)
            })
        }
        AdviceKind::AfterThrowing => {
            let after_throwing = slots.after_throwing.clone()?;
            Method::new(move |receiver, args| match next.call(receiver, args) {
                Ok(result) => Ok(result),
                Err(error) => {
                    after_throwing(&site.context(receiver, &options, None, Some(&error)), args);
                    Err(error)
                }
            })
        }
        AdviceKind::Around => {
            let around = slots.around.clone()?;
            around(AroundContext {
                method: next,
                original: site.original.clone(),
                options: (*options).clone(),
                target: site.target.clone(),
                method_name: site.method_name.clone(),
            })
        }
    };

    Some(method)
}
