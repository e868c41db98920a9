//! #[advised] 属性宏实现
//!
//! 收集 impl 块中方法上的通知属性，移除它们并为每一个生成一条 inventory 提交。

use proc_macro2::{Ident, TokenStream};
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Error, Expr, ImplItem, ItemImpl, Meta, Result, Token, Type};

use crate::utils::{advice_kind, ensure_no_generics};

/// 通知属性参数：`(AspectType, key = value, ...)`，切面类型可省略
struct AdviceArgs {
    aspect: Option<Type>,
    options: Vec<(Ident, Expr)>,
}

impl Parse for AdviceArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut args = AdviceArgs {
            aspect: None,
            options: Vec::new(),
        };

        while !input.is_empty() {
            if input.peek(syn::Ident) && input.peek2(Token![=]) {
                let key: Ident = input.parse()?;
                input.parse::<Token![=]>()?;
                let value: Expr = input.parse()?;
                args.options.push((key, value));
            } else {
                let aspect: Type = input.parse()?;
                if args.aspect.is_some() {
                    return Err(Error::new_spanned(aspect, "only one aspect type may be given"));
                }
                args.aspect = Some(aspect);
            }

            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }

        Ok(args)
    }
}

fn parse_args(attr: &Attribute) -> Result<AdviceArgs> {
    match &attr.meta {
        Meta::Path(_) => Ok(AdviceArgs {
            aspect: None,
            options: Vec::new(),
        }),
        Meta::List(list) => list.parse_args(),
        Meta::NameValue(nv) => Err(Error::new_spanned(
            nv,
            "expected advice attribute like #[before(Aspect, key = value)]",
        )),
    }
}

pub fn impl_advised(mut item: ItemImpl) -> Result<TokenStream> {
    ensure_no_generics(&item.generics, "#[advised]")?;
    let self_ty = item.self_ty.clone();
    let mut submissions = Vec::new();

    for impl_item in &mut item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        let method_name = method.sig.ident.to_string();
        let mut position: u32 = 0;
        let mut kept = Vec::with_capacity(method.attrs.len());

        // 同一方法上的多个通知按源码中从上到下的顺序编号
        for attr in method.attrs.drain(..) {
            let Some(kind) = advice_kind(attr.path()) else {
                kept.push(attr);
                continue;
            };
            let args = parse_args(&attr)?;
            submissions.push(submission(&self_ty, &method_name, position, &kind, args));
            position += 1;
        }

        method.attrs = kept;
    }

    Ok(quote! {
        #item

        #(#submissions)*
    })
}

fn submission(self_ty: &Type, method_name: &str, position: u32, kind: &Ident, args: AdviceArgs) -> TokenStream {
    let aspect = match &args.aspect {
        Some(aspect) => quote!(::core::option::Option::Some(::chimera_aop::AspectRef::of::<#aspect>)),
        None => quote!(::core::option::Option::None),
    };
    let keys = args.options.iter().map(|(key, _)| key.to_string());
    let values = args.options.iter().map(|(_, value)| value);

    quote! {
        ::chimera_aop::inventory::submit! {
            ::chimera_aop::AdviceSubmission {
                declaring: ::core::any::TypeId::of::<#self_ty>,
                method: #method_name,
                position: #position,
                kind: ::chimera_aop::AdviceKind::#kind,
                aspect: #aspect,
                options: || {
                    #[allow(unused_mut)]
                    let mut options = ::chimera_aop::AdviceOptions::new();
                    #(
                        options.insert(
                            ::std::string::String::from(#keys),
                            ::chimera_aop::serde_json::json!(#values),
                        );
                    )*
                    options
                },
            }
        }
    }
}
