//! 工具函数

use proc_macro2::{Ident, Span};
use syn::{Error, Generics, Path, Result};

/// inventory 需要具体类型，带泛型参数的类型无法注册
pub fn ensure_no_generics(generics: &Generics, macro_name: &str) -> Result<()> {
    if generics.params.is_empty() {
        return Ok(());
    }
    Err(Error::new_spanned(
        generics,
        format!("{} does not support generic types", macro_name),
    ))
}

/// 通知属性名 -> `AdviceKind` 变体名
pub fn advice_kind(path: &Path) -> Option<Ident> {
    let variant = match path.get_ident()?.to_string().as_str() {
        "around" => "Around",
        "before" => "Before",
        "after" => "After",
        "after_returning" => "AfterReturning",
        "after_throwing" => "AfterThrowing",
        _ => return None,
    };
    Some(Ident::new(variant, Span::call_site()))
}
