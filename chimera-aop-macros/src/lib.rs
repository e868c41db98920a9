//! Chimera AOP 过程宏
//!
//! 提供 AOP 相关的过程宏，包括：
//! - `#[derive(AspectClass)]` - 标记切面并声明顺序
//! - `#[advised]` - 收集 impl 块中方法上的通知声明

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput, ItemImpl};

mod advised;
mod aspect;
mod utils;

/// `#[derive(AspectClass)]` 宏
///
/// 将结构体标记为切面。类型本身仍需实现 `chimera_aop::Aspect`，
/// 并作为 provider 注册到容器中。
///
/// 使用示例：
/// ```ignore
/// use chimera_aop::prelude::*;
/// use chimera_aop_macros::AspectClass;
///
/// #[derive(AspectClass, Default)]
/// #[aspect(order = 1)]
/// pub struct AuditAspect;
///
/// impl Aspect for AuditAspect {
///     fn advice(self: Arc<Self>) -> AdviceSlots {
///         AdviceSlots::new().before(|ctx, _| {
///             tracing::info!("audit {}", ctx.signature());
///             Ok(())
///         })
///     }
/// }
/// ```
#[proc_macro_derive(AspectClass, attributes(aspect))]
pub fn derive_aspect_class(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    aspect::impl_aspect_class_derive(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// `#[advised]` 属性宏
///
/// 用在 impl 块上，方法可以带以下通知属性：
/// `#[before]`、`#[after]`、`#[after_returning]`、`#[after_throwing]`、`#[around]`。
/// 参数为切面类型和可选的 `key = value` 选项。
///
/// 使用示例：
/// ```ignore
/// #[advised]
/// impl GreetingService {
///     #[before(AuditAspect, level = "info")]
///     #[after_returning(AuditAspect)]
///     fn get_hello(&self, name: &str) -> String {
///         format!("Hello {}!", name)
///     }
/// }
/// ```
///
/// 通知按方法名挂在 `Self` 类型上，类定义中的方法名需与 Rust 方法名一致。
#[proc_macro_attribute]
pub fn advised(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemImpl);
    advised::impl_advised(item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
