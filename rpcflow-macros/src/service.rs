//! `#[rpc_service]` implementation
//!
//! The attribute reads an inherent impl block and emits it back unchanged
//! (minus `#[rpc(..)]` helper attributes), followed by an `ExposedService`
//! impl describing every exposed method.
//!
//! # Code Generation Example
//!
//! Input:
//! ```ignore
//! #[rpc_service]
//! impl Calculator {
//!     pub fn add(&self, a: i64, #[rpc(default = 10)] b: i64) -> i64 {
//!         a + b
//!     }
//! }
//! ```
//!
//! Generated output (abridged):
//! ```ignore
//! impl rpcflow_server::ExposedService for Calculator {
//!     fn service_name() -> &'static str { "Calculator" }
//!     fn methods() -> Vec<rpcflow_server::MethodMetadata> {
//!         vec![
//!             MethodMetadata::new("add", ReturnShape::SyncValue,
//!                 MethodInvoker::sync_value(|this: &Self, mut args, call| {
//!                     let a: i64 = args.take(0)?;
//!                     let b: i64 = args.take(1)?;
//!                     Ok::<_, Error>(this.add(a, b))
//!                 }))
//!             .param(ParameterInfo::wire::<i64>(0, "a"))
//!             .param(ParameterInfo::wire::<i64>(1, "b").with_default(to_value(10)))
//!             .returns(type_name::<i64>()),
//!         ]
//!     }
//! }
//! ```

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{
    spanned::Spanned, Attribute, Expr, FnArg, GenericArgument, ImplItem, ImplItemFn, ItemImpl,
    LitStr, Pat, Path, PathArguments, ReturnType, Type, Visibility,
};

/// Arguments of the `#[rpc_service(..)]` attribute
pub struct ServiceArgs {
    krate: Path,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            krate: syn::parse_quote!(::rpcflow_server),
        }
    }
}

impl ServiceArgs {
    pub fn parse(attr: proc_macro::TokenStream) -> syn::Result<Self> {
        let mut args = Self::default();
        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("crate") {
                args.krate = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported rpc_service argument; expected `crate = path`"))
            }
        });
        syn::parse::Parser::parse(parser, attr)?;
        Ok(args)
    }
}

#[derive(Default)]
struct MethodOptions {
    skip: bool,
    name: Option<String>,
    undocumented: bool,
}

enum ParamKind {
    Wire {
        ty: Type,
        optional: bool,
        default: Option<Expr>,
    },
    Context {
        by_ref: bool,
    },
}

struct Param {
    ident: syn::Ident,
    kind: ParamKind,
}

enum Output {
    Unit,
    Value(Type),
    Fallible(Type),
}

impl Output {
    /// `()` and `Result<(), E>` both answer `null`
    fn is_void(&self) -> bool {
        match self {
            Output::Unit => true,
            Output::Value(_) => false,
            Output::Fallible(ok) => is_unit(ok),
        }
    }
}

fn is_unit(ty: &Type) -> bool {
    matches!(ty, Type::Tuple(tuple) if tuple.elems.is_empty())
}

struct Method {
    ident: syn::Ident,
    name: String,
    params: Vec<Param>,
    is_async: bool,
    output: Output,
    documented: bool,
}

pub fn expand(args: ServiceArgs, mut item: ItemImpl) -> syn::Result<TokenStream> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[rpc_service] goes on an inherent impl block",
        ));
    }
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new(
            item.generics.span(),
            "#[rpc_service] does not support generic impl blocks",
        ));
    }

    let service_name = service_name(&item.self_ty)?;
    let mut methods = Vec::new();
    for impl_item in &mut item.items {
        if let ImplItem::Fn(function) = impl_item {
            if let Some(method) = parse_method(function)? {
                methods.push(method);
            }
        }
    }

    let krate = &args.krate;
    let self_ty = &item.self_ty;
    let metadata = methods.iter().map(|method| method_metadata(krate, method));

    Ok(quote! {
        #item

        impl #krate::ExposedService for #self_ty {
            fn service_name() -> &'static str {
                #service_name
            }

            fn methods() -> ::std::vec::Vec<#krate::MethodMetadata> {
                ::std::vec![#(#metadata),*]
            }
        }
    })
}

fn service_name(self_ty: &Type) -> syn::Result<String> {
    match self_ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .ok_or_else(|| syn::Error::new(self_ty.span(), "expected a named type")),
        _ => Err(syn::Error::new(self_ty.span(), "expected a named type")),
    }
}

/// Strips `#[rpc(..)]` attributes from `function` and describes it when exposed
fn parse_method(function: &mut ImplItemFn) -> syn::Result<Option<Method>> {
    let options = take_method_options(&mut function.attrs)?;
    let exposed = matches!(function.vis, Visibility::Public(_))
        && matches!(
            function.sig.inputs.first(),
            Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none()
        );

    let mut params = Vec::new();
    for input in function.sig.inputs.iter_mut() {
        let FnArg::Typed(typed) = input else {
            continue;
        };
        let default = take_param_default(&mut typed.attrs)?;
        if !exposed || options.skip {
            continue;
        }

        let ident = match &*typed.pat {
            Pat::Ident(pat) => pat.ident.clone(),
            other => {
                return Err(syn::Error::new(
                    other.span(),
                    "exposed methods need plain identifier parameters",
                ))
            }
        };
        let kind = if let Some(by_ref) = call_context(&typed.ty) {
            if default.is_some() {
                return Err(syn::Error::new(
                    typed.span(),
                    "the call context cannot have a default",
                ));
            }
            ParamKind::Context { by_ref }
        } else {
            ParamKind::Wire {
                ty: (*typed.ty).clone(),
                optional: last_segment_is(&typed.ty, "Option"),
                default,
            }
        };
        params.push(Param { ident, kind });
    }

    if !exposed || options.skip {
        return Ok(None);
    }

    let ident = function.sig.ident.clone();
    Ok(Some(Method {
        name: options.name.unwrap_or_else(|| ident.to_string()),
        ident,
        params,
        is_async: function.sig.asyncness.is_some(),
        output: output(&function.sig.output),
        documented: !options.undocumented,
    }))
}

fn take_method_options(attrs: &mut Vec<Attribute>) -> syn::Result<MethodOptions> {
    let mut options = MethodOptions::default();
    let mut result = Ok(());
    attrs.retain(|attr| {
        if !attr.path().is_ident("rpc") {
            return true;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                options.skip = true;
            } else if meta.path.is_ident("undocumented") {
                options.undocumented = true;
            } else if meta.path.is_ident("name") {
                let name: LitStr = meta.value()?.parse()?;
                options.name = Some(name.value());
            } else {
                return Err(meta.error("expected `skip`, `undocumented` or `name = \"..\"`"));
            }
            Ok(())
        });
        if let Err(error) = parsed {
            result = Err(error);
        }
        false
    });
    result.map(|()| options)
}

fn take_param_default(attrs: &mut Vec<Attribute>) -> syn::Result<Option<Expr>> {
    let mut default = None;
    let mut result = Ok(());
    attrs.retain(|attr| {
        if !attr.path().is_ident("rpc") {
            return true;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("default") {
                default = Some(meta.value()?.parse::<Expr>()?);
                Ok(())
            } else {
                Err(meta.error("expected `default = expr`"))
            }
        });
        if let Err(error) = parsed {
            result = Err(error);
        }
        false
    });
    result.map(|()| default)
}

/// `Some(by_ref)` when `ty` is `CallContext` or `&CallContext`
fn call_context(ty: &Type) -> Option<bool> {
    match ty {
        Type::Reference(reference) if last_segment_is(&reference.elem, "CallContext") => Some(true),
        ty if last_segment_is(ty, "CallContext") => Some(false),
        _ => None,
    }
}

fn last_segment_is(ty: &Type, name: &str) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == name),
        _ => false,
    }
}

fn output(ret: &ReturnType) -> Output {
    let ty = match ret {
        ReturnType::Default => return Output::Unit,
        ReturnType::Type(_, ty) => &**ty,
    };
    if is_unit(ty) {
        return Output::Unit;
    }
    if let Type::Path(path) = ty {
        if let Some(segment) = path.path.segments.last() {
            if segment.ident == "Result" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(ok)) = args.args.first() {
                        return Output::Fallible(ok.clone());
                    }
                }
            }
        }
    }
    Output::Value(ty.clone())
}

fn method_metadata(krate: &Path, method: &Method) -> TokenStream {
    let name = &method.name;
    let ident = &method.ident;

    let params = method.params.iter().enumerate().map(|(index, param)| {
        let param_name = param.ident.to_string();
        match &param.kind {
            ParamKind::Wire {
                ty,
                optional,
                default,
            } => {
                let mut info = quote! { #krate::ParameterInfo::wire::<#ty>(#index, #param_name) };
                if *optional {
                    info = quote! { #info.optional() };
                }
                if let Some(default) = default {
                    info = quote! {
                        #info.with_default(
                            #krate::__private::serde_json::to_value(#default).unwrap_or_default()
                        )
                    };
                }
                quote! { .param(#info) }
            }
            ParamKind::Context { .. } => quote! {
                .param(#krate::ParameterInfo::injected(#index, #param_name, "CallContext"))
            },
        }
    });

    let locals: Vec<syn::Ident> = method
        .params
        .iter()
        .map(|param| format_ident!("__{}", param.ident))
        .collect();
    let takes = method.params.iter().zip(&locals).enumerate().filter_map(|(index, (param, local))| {
        match &param.kind {
            ParamKind::Wire { ty, .. } => Some(quote! { let #local: #ty = args.take(#index)?; }),
            ParamKind::Context { .. } => None,
        }
    });
    let takes: Vec<TokenStream> = takes.collect();

    let call_args = method.params.iter().zip(&locals).map(|(param, local)| match &param.kind {
        ParamKind::Wire { .. } => quote! { #local },
        ParamKind::Context { by_ref: true } => {
            if method.is_async {
                quote! { &call }
            } else {
                quote! { call }
            }
        }
        ParamKind::Context { by_ref: false } => quote! { call.clone() },
    });
    let call_args: Vec<TokenStream> = call_args.collect();

    let await_call = if method.is_async {
        quote! { this.#ident(#(#call_args),*).await }
    } else {
        quote! { this.#ident(#(#call_args),*) }
    };
    let body = match &method.output {
        Output::Unit => quote! {
            #await_call;
            ::std::result::Result::Ok::<(), #krate::Error>(())
        },
        Output::Value(_) => quote! {
            ::std::result::Result::Ok::<_, #krate::Error>(#await_call)
        },
        Output::Fallible(_) => quote! {
            #await_call.map_err(#krate::Error::from)
        },
    };

    let (shape, constructor) = match (method.is_async, method.output.is_void()) {
        (false, true) => (quote! { SyncVoid }, quote! { sync_void }),
        (false, false) => (quote! { SyncValue }, quote! { sync_value }),
        (true, true) => (quote! { AsyncVoid }, quote! { async_void }),
        (true, false) => (quote! { AsyncValue }, quote! { async_value }),
    };

    let args_binding = if takes.is_empty() {
        quote! { _args }
    } else {
        quote! { mut args }
    };
    let invoker = if method.is_async {
        quote! {
            #krate::MethodInvoker::#constructor(
                |this: ::std::sync::Arc<Self>, #args_binding: #krate::BoundArguments, call: #krate::CallContext| async move {
                    let _ = &call;
                    #(#takes)*
                    #body
                }
            )
        }
    } else {
        quote! {
            #krate::MethodInvoker::#constructor(
                |this: &Self, #args_binding: #krate::BoundArguments, call: &#krate::CallContext| {
                    let _ = call;
                    #(#takes)*
                    #body
                }
            )
        }
    };

    let returns = match &method.output {
        _ if method.output.is_void() => quote! {},
        Output::Value(ty) | Output::Fallible(ty) => {
            quote! { .returns(::std::any::type_name::<#ty>()) }
        }
        Output::Unit => quote! {},
    };
    let undocumented = if method.documented {
        quote! {}
    } else {
        quote! { .undocumented() }
    };

    quote! {
        #krate::MethodMetadata::new(#name, #krate::ReturnShape::#shape, #invoker)
            #(#params)*
            #returns
            #undocumented
    }
}
