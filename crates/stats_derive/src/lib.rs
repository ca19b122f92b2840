extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, Fields};

/// Field-wise `saturating_sub` of every named counter against a baseline value.
#[proc_macro_derive(Delta)]
pub fn delta_derive(input: TokenStream) -> TokenStream {
    let ast: syn::DeriveInput = syn::parse(input).unwrap();
    let name = &ast.ident;
    let fields = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named.named.iter()
                .filter_map(|f| f.ident.clone())
                .collect::<Vec<_>>(),
            _ => panic!("Delta can only be derived for structs with named fields"),
        },
        _ => panic!("Delta can only be derived for structs"),
    };
    let gen = quote! {
        impl Delta for #name {
            fn delta(&self, baseline: &Self) -> Self {
                Self {
                    #( #fields: self.#fields.saturating_sub(baseline.#fields), )*
                }
            }
        }
    };
    gen.into()
}
