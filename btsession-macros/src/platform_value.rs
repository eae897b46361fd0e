use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitInt, LitStr, Variant};

enum PlatformAttr {
    Code(LitInt),
    Action(LitStr),
}

pub fn expand(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match syn::parse(input) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error().into(),
    };

    let Data::Enum(data) = &input.data else {
        return syn::Error::new_spanned(&input, "PlatformValue can only be derived for enums")
            .to_compile_error()
            .into();
    };

    let mut codes: Vec<(&Ident, LitInt)> = Vec::new();
    let mut actions: Vec<(&Ident, LitStr)> = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return syn::Error::new_spanned(variant, "PlatformValue variants cannot carry fields")
                .to_compile_error()
                .into();
        }

        match parse_variant_attr(variant) {
            Ok(Some(PlatformAttr::Code(code))) => codes.push((&variant.ident, code)),
            Ok(Some(PlatformAttr::Action(action))) => actions.push((&variant.ident, action)),
            Ok(None) => {
                return syn::Error::new_spanned(
                    variant,
                    "missing `#[platform(code = ...)]` or `#[platform(action = \"...\")]`",
                )
                .to_compile_error()
                .into();
            }
            Err(err) => return err.to_compile_error().into(),
        }
    }

    if !codes.is_empty() && !actions.is_empty() {
        return syn::Error::new_spanned(
            &input.ident,
            "PlatformValue enums must use either codes or actions, not both",
        )
        .to_compile_error()
        .into();
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = if actions.is_empty() {
        let idents: Vec<_> = codes.iter().map(|(ident, _)| *ident).collect();
        let values: Vec<_> = codes.iter().map(|(_, code)| code).collect();
        quote! {
            /// Returns the platform code reported for this value.
            #[must_use]
            pub const fn code(self) -> i32 {
                match self {
                    #(Self::#idents => #values,)*
                }
            }

            /// Maps a raw platform code, returning `None` for unknown codes.
            #[must_use]
            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    #(#values => Some(Self::#idents),)*
                    _ => None,
                }
            }
        }
    } else {
        let idents: Vec<_> = actions.iter().map(|(ident, _)| *ident).collect();
        let values: Vec<_> = actions.iter().map(|(_, action)| action).collect();
        quote! {
            /// Returns the platform action string reported for this value.
            #[must_use]
            pub const fn action(self) -> &'static str {
                match self {
                    #(Self::#idents => #values,)*
                }
            }

            /// Maps a raw platform action, returning `None` for unknown actions.
            #[must_use]
            pub fn from_action(action: &str) -> Option<Self> {
                match action {
                    #(#values => Some(Self::#idents),)*
                    _ => None,
                }
            }
        }
    };

    quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            #body
        }
    }
    .into()
}

fn parse_variant_attr(variant: &Variant) -> Result<Option<PlatformAttr>, syn::Error> {
    let mut parsed = None;

    for attr in &variant.attrs {
        if !attr.path().is_ident("platform") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if parsed.is_some() {
                return Err(meta.error("only one platform value is allowed per variant"));
            }
            if meta.path.is_ident("code") {
                let value: LitInt = meta.value()?.parse()?;
                parsed = Some(PlatformAttr::Code(value));
            } else if meta.path.is_ident("action") {
                let value: LitStr = meta.value()?.parse()?;
                parsed = Some(PlatformAttr::Action(value));
            } else {
                return Err(meta.error("expected `code` or `action`"));
            }
            Ok(())
        })?;
    }

    Ok(parsed)
}
