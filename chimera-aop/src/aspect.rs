//! 切面（Aspect）定义
//!
//! 切面以五个可选的能力槽描述自己支持的通知类型，织入时逐个检查。

use chimera_core::{Method, Receiver};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::metadata::{AdviceKind, AdviceOptions};

/// 通知回调的上下文
pub struct AdviceContext<'a> {
    /// 原始（未织入）方法
    pub method: &'a Method,
    /// 注解上的选项
    pub options: &'a AdviceOptions,
    /// 方法的返回值，仅 after-returning 通知可见
    pub result: Option<&'a Value>,
    /// 方法抛出的错误，仅 after-throwing 通知可见
    pub error: Option<&'a anyhow::Error>,
    /// 调用的目标实例
    pub receiver: &'a Receiver,
    /// 目标类名
    pub target: &'a str,
    /// 目标方法名
    pub method_name: &'a str,
}

impl AdviceContext<'_> {
    /// `Class.method` 形式的签名
    pub fn signature(&self) -> String {
        format!("{}.{}", self.target, self.method_name)
    }

    /// 读取选项
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

impl fmt::Debug for AdviceContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceContext")
            .field("signature", &self.signature())
            .field("options", &self.options)
            .field("result", &self.result)
            .field("error", &self.error.map(|e| e.to_string()))
            .finish()
    }
}

/// 环绕通知的上下文
///
/// `method` 是当前的（可能已被包装过的）方法，环绕通知决定是否以及如何调用它。
#[derive(Clone, Debug)]
pub struct AroundContext {
    pub method: Method,
    pub original: Method,
    pub options: AdviceOptions,
    pub target: String,
    pub method_name: String,
}

impl AroundContext {
    pub fn signature(&self) -> String {
        format!("{}.{}", self.target, self.method_name)
    }
}

/// before / after / after-returning 回调，返回 `Err` 等同于方法抛出错误
pub type AdviceCallback = Arc<dyn Fn(&AdviceContext<'_>, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// after-throwing 回调，不能改变错误
pub type ThrowingCallback = Arc<dyn Fn(&AdviceContext<'_>, &[Value]) + Send + Sync>;

/// around 回调，返回替换后的方法
pub type AroundCallback = Arc<dyn Fn(AroundContext) -> Method + Send + Sync>;

/// 切面支持的通知
#[derive(Clone, Default)]
pub struct AdviceSlots {
    pub around: Option<AroundCallback>,
    pub before: Option<AdviceCallback>,
    pub after: Option<AdviceCallback>,
    pub after_returning: Option<AdviceCallback>,
    pub after_throwing: Option<ThrowingCallback>,
}

impl AdviceSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn around<F>(mut self, f: F) -> Self
    where
        F: Fn(AroundContext) -> Method + Send + Sync + 'static,
    {
        self.around = Some(Arc::new(f));
        self
    }

    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn(&AdviceContext<'_>, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn after<F>(mut self, f: F) -> Self
    where
        F: Fn(&AdviceContext<'_>, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(f));
        self
    }

    pub fn after_returning<F>(mut self, f: F) -> Self
    where
        F: Fn(&AdviceContext<'_>, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_returning = Some(Arc::new(f));
        self
    }

    pub fn after_throwing<F>(mut self, f: F) -> Self
    where
        F: Fn(&AdviceContext<'_>, &[Value]) + Send + Sync + 'static,
    {
        self.after_throwing = Some(Arc::new(f));
        self
    }

    /// 是否实现了指定类型的通知
    pub fn supports(&self, kind: AdviceKind) -> bool {
        match kind {
            AdviceKind::Around => self.around.is_some(),
            AdviceKind::Before => self.before.is_some(),
            AdviceKind::After => self.after.is_some(),
            AdviceKind::AfterReturning => self.after_returning.is_some(),
            AdviceKind::AfterThrowing => self.after_throwing.is_some(),
        }
    }
}

impl fmt::Debug for AdviceSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceSlots")
            .field("around", &self.around.is_some())
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("after_returning", &self.after_returning.is_some())
            .field("after_throwing", &self.after_throwing.is_some())
            .finish()
    }
}

/// 切面 Trait
///
/// 切面本身也是容器托管的实例，回调通常捕获 `self` 的克隆来访问切面状态：
///
/// ```ignore
/// impl Aspect for AuditAspect {
///     fn advice(self: Arc<Self>) -> AdviceSlots {
///         AdviceSlots::new().before(move |ctx, args| {
///             self.record(ctx.signature(), args);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Aspect: Send + Sync + 'static {
    fn advice(self: Arc<Self>) -> AdviceSlots;
}

/// 带有声明顺序的切面类型，由 `#[derive(AspectClass)]` 实现
pub trait AspectClass: Aspect {
    /// 切面优先级，数字越小越靠外层
    const ORDER: Option<i32>;
}
