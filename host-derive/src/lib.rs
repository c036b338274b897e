//! Derive macro for the `HostObject` trait.
//!
//! This crate provides `#[derive(HostObject)]`, which turns a plain Rust
//! struct into a host class whose marked fields are visible from scripts
//! running in an `openworkers-bridge-v8` context.
//!
//! # Usage
//!
//! ```ignore
//! use std::cell::Cell;
//! use openworkers_bridge_v8::DeriveHostObject;
//!
//! #[derive(DeriveHostObject)]
//! #[host(name = "Counter")]
//! struct Counter {
//!     #[host(expose, writable)]
//!     value: Cell<f64>,
//!     #[host(expose)]
//!     label: String,
//!     // Not visible from scripts
//!     secret: u64,
//! }
//! ```
//!
//! Writable fields need interior mutability (`Cell` or `RefCell`), since
//! scripts mutate the object through a shared reference.
//!
//! # Inside the crate
//!
//! When deriving inside `openworkers-bridge-v8` itself, use
//! `#[host(crate_path = "crate")]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive macro for implementing `HostObject`.
///
/// # Attributes
///
/// - `#[host(name = "...")]` on the struct - class name seen by scripts (default: the struct name)
/// - `#[host(crate_path = "path")]` on the struct - override the crate path (default: `openworkers_bridge_v8`)
/// - `#[host(expose)]` on a field - readable from scripts
/// - `#[host(expose, writable)]` on a field - readable and assignable from scripts
/// - `#[host(expose, rename = "...")]` on a field - property name seen by scripts
#[proc_macro_derive(HostObject, attributes(host))]
pub fn derive_host_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let options = match StructOptions::parse(&input) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "HostObject can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        Data::Enum(_) => {
            return syn::Error::new_spanned(&input, "HostObject cannot be derived for enums")
                .to_compile_error()
                .into();
        }
        Data::Union(_) => {
            return syn::Error::new_spanned(&input, "HostObject cannot be derived for unions")
                .to_compile_error()
                .into();
        }
    };

    let mut exposed = Vec::new();

    for field in fields {
        match FieldOptions::parse(field) {
            Ok(Some(opts)) => exposed.push(opts),
            Ok(None) => {}
            Err(err) => return err.to_compile_error().into(),
        }
    }

    let crate_path = &options.crate_path;
    let class_name = options
        .class_name
        .clone()
        .unwrap_or_else(|| name.to_string());

    let get_arms = exposed.iter().map(|f| {
        let ident = &f.ident;
        let key = &f.js_name;
        quote! {
            #key => ::std::option::Option::Some(
                #crate_path::ToHostValue::to_host_value(&self.#ident)
            ),
        }
    });

    let set_arms = exposed.iter().map(|f| {
        let ident = &f.ident;
        let key = &f.js_name;

        if f.writable {
            quote! {
                #key => {
                    #crate_path::HostField::write(&self.#ident, value)?;
                    ::std::result::Result::Ok(true)
                }
            }
        } else {
            let message = format!("attribute '{}' of '{}' is read-only", key, class_name);
            quote! {
                #key => ::std::result::Result::Err(
                    #crate_path::BridgeError::ReadOnly(#message.to_string())
                ),
            }
        }
    });

    let keys = exposed.iter().map(|f| {
        let key = &f.js_name;
        quote! { #key.to_string() }
    });

    let expanded = quote! {
        impl #impl_generics #crate_path::HostObject for #name #ty_generics #where_clause {
            fn class_name(&self) -> &str {
                #class_name
            }

            fn get(&self, key: &str) -> ::std::option::Option<#crate_path::HostValue> {
                match key {
                    #(#get_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            #[allow(unused_variables)]
            fn set(
                &self,
                key: &str,
                value: #crate_path::HostValue,
            ) -> #crate_path::Result<bool> {
                match key {
                    #(#set_arms)*
                    _ => ::std::result::Result::Ok(false),
                }
            }

            fn keys(&self) -> ::std::vec::Vec<::std::string::String> {
                ::std::vec![#(#keys),*]
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };

    TokenStream::from(expanded)
}

struct StructOptions {
    crate_path: proc_macro2::TokenStream,
    class_name: Option<String>,
}

impl StructOptions {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let mut crate_path = None;
        let mut class_name = None;

        for attr in &input.attrs {
            if !attr.path().is_ident("host") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("crate_path") {
                    let value: syn::LitStr = meta.value()?.parse()?;
                    let path: syn::Path = value.parse()?;
                    crate_path = Some(quote! { #path });
                    Ok(())
                } else if meta.path.is_ident("name") {
                    let value: syn::LitStr = meta.value()?.parse()?;
                    class_name = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `name` or `crate_path`"))
                }
            })?;
        }

        Ok(Self {
            crate_path: crate_path.unwrap_or_else(|| quote! { openworkers_bridge_v8 }),
            class_name,
        })
    }
}

struct FieldOptions {
    ident: syn::Ident,
    js_name: String,
    writable: bool,
}

impl FieldOptions {
    /// Returns `None` for fields without `#[host(expose)]`.
    fn parse(field: &syn::Field) -> syn::Result<Option<Self>> {
        let mut expose = false;
        let mut writable = false;
        let mut rename = None;

        for attr in &field.attrs {
            if !attr.path().is_ident("host") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("expose") {
                    expose = true;
                    Ok(())
                } else if meta.path.is_ident("writable") {
                    writable = true;
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    let value: syn::LitStr = meta.value()?.parse()?;
                    rename = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `expose`, `writable` or `rename`"))
                }
            })?;
        }

        if !expose {
            if writable || rename.is_some() {
                return Err(syn::Error::new_spanned(
                    field,
                    "`writable` and `rename` require `expose`",
                ));
            }
            return Ok(None);
        }

        let Some(ident) = field.ident.clone() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };

        let js_name = rename.unwrap_or_else(|| ident.to_string());

        Ok(Some(Self {
            ident,
            js_name,
            writable,
        }))
    }
}
