use proc_macro::TokenStream;

mod platform_value;
mod progress;

/// Derives conversions between a fieldless enum and the platform value that
/// identifies each variant on the wire.
///
/// Every variant must carry exactly one of:
/// - `#[platform(code = N)]` for integer codes, generating `code()` and `from_code()`;
/// - `#[platform(action = "...")]` for action strings, generating `action()` and
///   `from_action()`.
///
/// Codes and actions cannot be mixed within one enum. Unknown platform values
/// map to `None` so callers can drop them.
#[proc_macro_derive(PlatformValue, attributes(platform))]
pub fn derive_platform_value(input: TokenStream) -> TokenStream {
    platform_value::expand(input)
}

/// Shows a spinner for the duration of an instrumented function.
///
/// `#[progress(message = "...", finished = "...")]` sets the progress bar
/// message and finish message of the function's span. Place it above
/// `#[instrument]`; without one, an `info` level span is added.
#[proc_macro_attribute]
pub fn progress(attr: TokenStream, item: TokenStream) -> TokenStream {
    progress::expand(attr, item)
}
