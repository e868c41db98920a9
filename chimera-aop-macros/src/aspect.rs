//! AspectClass 派生宏实现

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Expr, Result};

use crate::utils::ensure_no_generics;

pub fn impl_aspect_class_derive(input: &DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    ensure_no_generics(&input.generics, "#[derive(AspectClass)]")?;

    let order = match extract_order(input)? {
        Some(order) => quote!(::core::option::Option::Some(#order)),
        None => quote!(::core::option::Option::None),
    };

    Ok(quote! {
        impl ::chimera_aop::AspectClass for #name {
            const ORDER: ::core::option::Option<i32> = #order;
        }

        // 切面标记，织入时据此识别切面实例
        ::chimera_aop::inventory::submit! {
            ::chimera_aop::AspectSubmission {
                aspect: ::chimera_aop::AspectRef::of::<#name>,
                order: <#name as ::chimera_aop::AspectClass>::ORDER,
                adapter: ::chimera_aop::adapt_aspect::<#name>,
            }
        }
    })
}

/// 解析 `#[aspect(order = N)]`，未声明时为 None
fn extract_order(input: &DeriveInput) -> Result<Option<Expr>> {
    let mut order = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("aspect")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("order") {
                order = Some(meta.value()?.parse::<Expr>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported aspect attribute, expected `order = N`"))
            }
        })?;
    }

    Ok(order)
}
