use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, Pat, Type, parse_macro_input};

/// Derive an `EmbeddedFn` implementation from a function.
///
/// The function parameters become the names the expression reads from its
/// bindings. Each name must be among the free names the parser declared
/// for the fragment, which the compiler checks against the generated
/// signature. Type validation is generated from the parameter types.
///
/// The generated struct is named after the function in PascalCase with an
/// `Expr` suffix.
///
/// # Attribute syntax
///
/// ```ignore
/// #[weft_expr(source = "items.join(sep)")]
/// ```
///
/// # Supported parameter types
/// - `Value`: accepts any value, no validation
/// - `String`: validates the binding is a string, passes the inner String
/// - `f64`: validates the binding is a number, passes the inner f64
/// - `bool`: validates the binding is a bool, passes the inner bool
/// - `Vec<Value>`: validates the binding is an array, passes the inner Vec
///
/// # Example
/// ```ignore
/// #[weft_expr(source = "items.join(sep)")]
/// fn join(items: Vec<Value>, sep: String) -> Result<Value, RenderError> {
///     let parts: Vec<String> = items.iter().map(Value::to_output_string).collect();
///     Ok(Value::String(parts.join(&sep)))
/// }
///
/// registry.register(JoinExpr);
/// ```
#[proc_macro_attribute]
pub fn weft_expr(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as ExprArgs);
    let input_fn = parse_macro_input!(item as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let struct_name = format_ident!("{}Expr", to_pascal_case(&fn_name.to_string()));
    let source = &args.source;

    let mut param_extractions = Vec::new();
    let mut param_names = Vec::new();
    let mut param_types = Vec::new();
    let mut param_defs = Vec::new();

    for arg in &input_fn.sig.inputs {
        if let FnArg::Typed(pat_type) = arg
            && let Pat::Ident(ident) = &*pat_type.pat
        {
            let param_name = &ident.ident;
            let param_name_str = param_name.to_string();
            let ty = &*pat_type.ty;

            let (extraction, value_type, rust_type) = generate_extraction(&param_name_str, ty);
            param_extractions.push(extraction);
            param_names.push(param_name.clone());
            param_types.push(rust_type);
            param_defs.push(quote! {
                weft::registry::ParamDef {
                    name: #param_name_str.to_string(),
                    expected_type: Some(#value_type),
                    required: true,
                }
            });
        }
    }

    let fn_body = &input_fn.block;

    let output = quote! {
        pub struct #struct_name;

        impl #struct_name {
            fn execute(#(#param_names: #param_types),*) -> Result<weft::Value, weft::RenderError> {
                #fn_body
            }
        }

        impl weft::registry::EmbeddedFn for #struct_name {
            fn call(
                &self,
                bindings: &weft::registry::Bindings<'_>,
            ) -> Result<weft::Value, weft::RenderError> {
                #(#param_extractions)*
                Self::execute(#(#param_names),*)
            }

            fn signature(&self) -> weft::registry::ExprSignature {
                weft::registry::ExprSignature {
                    source: #source.to_string(),
                    params: vec![#(#param_defs),*],
                }
            }
        }
    };

    output.into()
}

/// Returns (extraction_code, value_type_token, rust_type_token)
fn generate_extraction(
    name: &str,
    ty: &Type,
) -> (
    proc_macro2::TokenStream,
    proc_macro2::TokenStream,
    proc_macro2::TokenStream,
) {
    let ident = format_ident!("{}", name);
    let type_str = quote!(#ty).to_string().replace(' ', "");

    match type_str.as_str() {
        "String" => (
            quote! {
                let #ident = match bindings.get(#name)? {
                    weft::Value::String(s) => s.clone(),
                    other => return Err(weft::RenderError::type_error("string", other.type_name())),
                };
            },
            quote! { weft::registry::ValueType::String },
            quote! { String },
        ),
        "f64" => (
            quote! {
                let #ident = match bindings.get(#name)? {
                    weft::Value::Number(n) => *n,
                    other => return Err(weft::RenderError::type_error("number", other.type_name())),
                };
            },
            quote! { weft::registry::ValueType::Number },
            quote! { f64 },
        ),
        "bool" => (
            quote! {
                let #ident = match bindings.get(#name)? {
                    weft::Value::Bool(b) => *b,
                    other => return Err(weft::RenderError::type_error("bool", other.type_name())),
                };
            },
            quote! { weft::registry::ValueType::Bool },
            quote! { bool },
        ),
        "Vec<Value>" => (
            quote! {
                let #ident = match bindings.get(#name)? {
                    weft::Value::Array(arr) => arr.clone(),
                    other => return Err(weft::RenderError::type_error("array", other.type_name())),
                };
            },
            quote! { weft::registry::ValueType::Array },
            quote! { Vec<weft::Value> },
        ),
        // `Value` and anything unrecognized take the binding as is.
        _ => (
            quote! {
                let #ident = bindings.get(#name)?.clone();
            },
            quote! { weft::registry::ValueType::Any },
            quote! { weft::Value },
        ),
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

// -- Attribute arg parsing -----------------------------------------------

struct ExprArgs {
    source: String,
}

impl syn::parse::Parse for ExprArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let ident: syn::Ident = input.parse()?;
        if ident != "source" {
            return Err(syn::Error::new(
                ident.span(),
                format!("unexpected key `{ident}`, expected `source`"),
            ));
        }
        input.parse::<syn::Token![=]>()?;
        let lit: syn::LitStr = input.parse()?;
        if !input.is_empty() {
            input.parse::<syn::Token![,]>()?;
        }
        Ok(ExprArgs {
            source: lit.value(),
        })
    }
}
