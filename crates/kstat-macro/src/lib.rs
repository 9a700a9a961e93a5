// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use proc_macro::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::DeriveInput;
use syn::Field;
use syn::FieldsNamed;
use syn::FieldsUnnamed;
use syn::Ident;
use syn::parse_macro_input;

/// Generate a [`nd6::ddi::kstat::KStatProvider`] implementation
/// given a struct of named fields of type
/// [`nd6::ddi::kstat::KStatU64`].
///
/// ```Rust
/// #[derive(KStatProvider)]
/// struct NdStats {
///     ra_in: KStatU64,
///     ra_bad: KStatU64,
/// }
/// ```
///
/// Along with the trait implementation this generates a plain
/// `NdStatsSnap` struct holding a `u64` per counter, and a `fields()`
/// method on it listing each counter by name in declaration order.
#[proc_macro_derive(KStatProvider)]
pub fn derive_kstat_provider(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);
    let fields: Vec<Field> = match data {
        syn::Data::Struct(s) => match s.fields {
            syn::Fields::Named(FieldsNamed { named, .. }) => {
                named.into_iter().collect()
            }

            syn::Fields::Unnamed(FieldsUnnamed { unnamed: _, .. }) => {
                panic!("A KStatProvider cannot have unnamed fields");
            }

            syn::Fields::Unit => {
                panic!("A unit struct cannot be a KStatProvider");
            }
        },

        _ => panic!("Only a struct may be a KStatProvider"),
    };

    let num_fields = fields.len() as u32;
    let num_fields_usize = fields.len();
    let fields_ident: Vec<Ident> =
        fields.iter().filter_map(|f| f.ident.clone()).collect();
    let ident_snap = format_ident!("{}Snap", ident);

    let output = quote! {
        #[derive(Clone, Debug, Default, Eq, PartialEq)]
        pub struct #ident_snap {
            #( pub #fields_ident: u64, )*
        }

        impl #ident_snap {
            /// Each counter as a `(name, value)` pair.
            pub fn fields(&self) -> [(&'static str, u64); #num_fields_usize] {
                [ #( (stringify!(#fields_ident), self.#fields_ident), )* ]
            }
        }

        impl ::nd6::ddi::kstat::KStatProvider for #ident {
            const NUM_FIELDS: u32 = #num_fields;
            type Snap = #ident_snap;

            fn init(
                &mut self
            ) -> core::result::Result<(), ::nd6::ddi::kstat::Error> {
                #( self.#fields_ident.init(stringify!(#fields_ident))?; )*
                Ok(())
            }

            fn new() -> Self {
                use ::nd6::ddi::kstat::KStatU64;

                Self {
                    #( #fields_ident: KStatU64::new(), )*
                }
            }

            fn snapshot(&self) -> Self::Snap {
                #ident_snap {
                    #( #fields_ident: self.#fields_ident.val(), )*
                }
            }
        }
    };

    output.into()
}
