//! Derive macros for Ripple
//!
//! # Available Macros
//!
//! - `#[derive(StateDiff)]` - Field-by-field state comparison for the test harness
//!
//! # Example
//!
//! ```ignore
//! use ripple_testing::StateDiff;
//!
//! #[derive(StateDiff, Clone, Debug, PartialEq)]
//! struct AppState {
//!     count: i32,
//!     #[diff(nested)]
//!     settings: Settings,
//!     #[diff(skip)]
//!     last_refreshed: DateTime<Utc>,
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, parse_quote, Attribute, Data, DeriveInput, Fields, Index, Type, WhereClause};

/// How a field takes part in the comparison
#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldMode {
    /// Compared as a whole with `PartialEq`, rendered with `Debug`
    Value,
    /// Compared through its own `StateDiff` impl, reporting inner paths
    Nested,
    /// Not compared
    Skip,
}

/// Derive macro for `ripple_testing::StateDiff`
///
/// Structs are compared field by field; each differing field is reported by
/// its path (`settings.theme`, `items`, `0`). Enums are compared as whole
/// values.
///
/// # Attributes
///
/// - `#[diff(skip)]` - Leave the field out of assertions (timestamps, caches)
/// - `#[diff(nested)]` - Recurse into a field whose type also implements `StateDiff`
///
/// Plain fields need `PartialEq + Debug`.
///
/// # Example
///
/// ```ignore
/// #[derive(StateDiff, Clone, Debug, PartialEq)]
/// struct TodosState {
///     items: Vec<Todo>,
///     #[diff(nested)]
///     filter: Filter,
///     #[diff(skip)]
///     loaded_at: Option<DateTime<Utc>>,
/// }
/// ```
#[proc_macro_derive(StateDiff, attributes(diff))]
pub fn derive_state_diff(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_state_diff(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand_state_diff(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let mut generics = input.generics.clone();
    let (_, ty_generics, _) = input.generics.split_for_impl();
    let bounds = generics.make_where_clause();

    let body = match &input.data {
        Data::Struct(data_struct) => {
            let mut comparisons = Vec::new();
            match &data_struct.fields {
                Fields::Named(fields) => {
                    for field in &fields.named {
                        let Some(ident) = field.ident.as_ref() else {
                            continue;
                        };
                        let label = ident.to_string();
                        let mode = field_mode(&field.attrs)?;
                        bound(bounds, mode, &field.ty);
                        comparisons.push(compare(mode, &quote!(#ident), &label));
                    }
                },
                Fields::Unnamed(fields) => {
                    for (position, field) in fields.unnamed.iter().enumerate() {
                        let index = Index::from(position);
                        let label = position.to_string();
                        let mode = field_mode(&field.attrs)?;
                        bound(bounds, mode, &field.ty);
                        comparisons.push(compare(mode, &quote!(#index), &label));
                    }
                },
                Fields::Unit => {},
            }
            quote! { #(#comparisons)* }
        },
        Data::Enum(_) => {
            bounds.predicates.push(parse_quote! {
                Self: ::std::cmp::PartialEq + ::std::fmt::Debug
            });
            quote! {
                ::ripple_testing::diff::diff_value(self, other, path, changes);
            }
        },
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "#[derive(StateDiff)] can only be used on structs and enums",
            ));
        },
    };

    let (impl_generics, _, where_clause) = generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::ripple_testing::diff::StateDiff for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn diff_into(
                &self,
                other: &Self,
                path: &str,
                changes: &mut ::std::vec::Vec<::ripple_testing::diff::FieldChange>,
            ) {
                #body
            }
        }
    })
}

/// Require what the comparison of a field of type `ty` needs
fn bound(bounds: &mut WhereClause, mode: FieldMode, ty: &Type) {
    match mode {
        FieldMode::Skip => {},
        FieldMode::Value => bounds.predicates.push(parse_quote! {
            #ty: ::std::cmp::PartialEq + ::std::fmt::Debug
        }),
        FieldMode::Nested => bounds.predicates.push(parse_quote! {
            #ty: ::ripple_testing::diff::StateDiff
        }),
    }
}

fn compare(mode: FieldMode, member: &TokenStream2, label: &str) -> TokenStream2 {
    match mode {
        FieldMode::Skip => quote! {},
        FieldMode::Value => quote! {
            ::ripple_testing::diff::diff_value(
                &self.#member,
                &other.#member,
                &::ripple_testing::diff::field_path(path, #label),
                changes,
            );
        },
        FieldMode::Nested => quote! {
            ::ripple_testing::diff::StateDiff::diff_into(
                &self.#member,
                &other.#member,
                &::ripple_testing::diff::field_path(path, #label),
                changes,
            );
        },
    }
}

/// Read `#[diff(skip)]` / `#[diff(nested)]`
fn field_mode(attrs: &[Attribute]) -> syn::Result<FieldMode> {
    let mut mode = FieldMode::Value;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("diff")) {
        attr.parse_nested_meta(|meta| {
            let requested = if meta.path.is_ident("skip") {
                FieldMode::Skip
            } else if meta.path.is_ident("nested") {
                FieldMode::Nested
            } else {
                return Err(meta.error("expected `skip` or `nested`"));
            };
            if mode != FieldMode::Value && mode != requested {
                return Err(meta.error("a field cannot be both `skip` and `nested`"));
            }
            mode = requested;
            Ok(())
        })?;
    }
    Ok(mode)
}
