extern crate proc_macro;

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::Data::Enum;
use syn::{DeriveInput, Ident};

/// Parse the derive input and collect its variant names. Only enums whose variants are all
/// fieldless are accepted; anything else becomes a compile error pointing at the offending item.
fn fieldless_variants(
    input: TokenStream,
    derive_name: &str,
) -> Result<(Ident, Vec<Ident>), syn::Error> {
    let ast: DeriveInput = syn::parse(input)?;
    let name = ast.ident;

    let Enum(data) = ast.data
    else {
        return Err(syn::Error::new_spanned(
            &name,
            format!("{derive_name} can only be derived for enums; {name} is not an enum"),
        ));
    };

    let mut variants = Vec::with_capacity(data.variants.len());
    for variant in data.variants {
        if !variant.fields.is_empty() {
            return Err(syn::Error::new_spanned(
                &variant.ident,
                format!(
                    "{derive_name} only supports fieldless variants; {name}::{} has fields",
                    variant.ident
                ),
            ));
        }
        variants.push(variant.ident);
    }

    Ok((name, variants))
}

/// `ReadMostly` -> `read_mostly`
fn snake_case(ident: &Ident) -> String {
    let mut out = String::new();
    for (i, c) in ident.to_string().chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Implement `std::fmt::Display` for a fieldless enum, writing each variant as its snake_case
/// name (`ReadMostly` is displayed as `read_mostly`).
#[proc_macro_derive(EnumDisplay)]
pub fn enum_display(input: TokenStream) -> TokenStream {
    let (name, variants) = match fieldless_variants(input, "EnumDisplay") {
        Ok(parsed) => parsed,
        Err(err) => return err.to_compile_error().into(),
    };

    let names = variants.iter().map(snake_case);
    let expanded = quote! {
        impl std::fmt::Display for #name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    #(Self::#variants => f.write_str(#names),)*
                }
            }
        }
    };

    expanded.into()
}

/// Implement `std::str::FromStr` for a fieldless enum, with `FromStr::Err` set to `String`.
/// Matching is case-insensitive and accepts either the variant name or its snake_case form, so
/// `ReadMostly`, `readmostly` and `read_mostly` all parse to the same variant.
#[proc_macro_derive(EnumFromStr)]
pub fn enum_from_str(input: TokenStream) -> TokenStream {
    let (name, variants) = match fieldless_variants(input, "EnumFromStr") {
        Ok(parsed) => parsed,
        Err(err) => return err.to_compile_error().into(),
    };

    let match_arms: Vec<_> = variants
        .iter()
        .map(|variant| {
            let plain = variant.to_string().to_ascii_lowercase();
            let snake = snake_case(variant);
            if plain == snake {
                quote! { #plain => Ok(Self::#variant) }
            } else {
                quote! { #plain | #snake => Ok(Self::#variant) }
            }
        })
        .collect();

    let err_fmt_string = format!("invalid {name} string: '{{}}'");
    let expanded = quote! {
        impl std::str::FromStr for #name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    #(#match_arms,)*
                    _ => Err(format!(#err_fmt_string, s)),
                }
            }
        }
    };

    expanded.into()
}

/// Implement `serde::Serialize` by writing the value's `Display` output as a string.
#[proc_macro_derive(StrSerialize)]
pub fn str_serialize(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = match syn::parse(input) {
        Ok(ast) => ast,
        Err(err) => return err.to_compile_error().into(),
    };
    let ident = &ast.ident;

    let expanded = quote! {
        impl serde::Serialize for #ident {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }
    };

    expanded.into()
}

/// Implement `serde::Deserialize` by parsing a string through the type's `FromStr` impl.
#[proc_macro_derive(StrDeserialize)]
pub fn str_deserialize(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = match syn::parse(input) {
        Ok(ast) => ast,
        Err(err) => return err.to_compile_error().into(),
    };
    let ident = &ast.ident;

    let visitor = format_ident!("__{}StrVisitor", ident);
    let expecting = format!("a string naming a {ident}");
    let expanded = quote! {
        const _: () = {
            struct #visitor;

            impl<'de> serde::de::Visitor<'de> for #visitor {
                type Value = #ident;

                fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    formatter.write_str(#expecting)
                }

                fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
                where
                    E: serde::de::Error,
                {
                    v.parse().map_err(serde::de::Error::custom)
                }
            }

            impl<'de> serde::Deserialize<'de> for #ident {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: serde::Deserializer<'de>,
                {
                    deserializer.deserialize_str(#visitor)
                }
            }
        };
    };

    expanded.into()
}
