use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Expr, Ident, ItemFn, Token};

struct ProgressArgs {
    message: Expr,
    finished: Expr,
}

impl Parse for ProgressArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut message = None;
        let mut finished = None;

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let value: Expr = input.parse()?;
            match key.to_string().as_str() {
                "message" => message = Some(value),
                "finished" => finished = Some(value),
                _ => return Err(syn::Error::new(key.span(), format!("unknown argument `{key}`"))),
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(Self {
            message: message.ok_or_else(|| input.error("missing `message = ...`"))?,
            finished: finished.ok_or_else(|| input.error("missing `finished = ...`"))?,
        })
    }
}

pub fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args: ProgressArgs = match syn::parse(attr) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut function: ItemFn = match syn::parse(item) {
        Ok(function) => function,
        Err(err) => return err.to_compile_error().into(),
    };

    let instrumented = function
        .attrs
        .iter()
        .any(|attr| attr.path().segments.last().is_some_and(|segment| segment.ident == "instrument"));
    if !instrumented {
        function
            .attrs
            .push(syn::parse_quote!(#[tracing::instrument(level = "info", skip_all)]));
    }

    let ProgressArgs { message, finished } = args;
    let statements = std::mem::take(&mut function.block.stmts);
    function.block = syn::parse_quote!({
        {
            use tracing_indicatif::span_ext::IndicatifSpanExt as _;
            let span = tracing::Span::current();
            span.pb_set_message(&#message);
            span.pb_set_finish_message(&#finished);
        }
        #(#statements)*
    });

    quote!(#function).into()
}
