use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    DeriveInput, Expr, ExprArray, Ident, Lit, LitStr, Path, Type, meta::ParseNestedMeta,
    parse_macro_input,
};

/// 派生 `Model` 与 `ObjectModel`
///
/// ```ignore
/// #[derive(Object)]
/// #[object(fields = ["name", "status"], rights(codes = UserCodes, rooms = UsersRooms))]
/// pub struct User;
/// ```
///
/// 每个 `lefts`/`rights` 条目都会在 `<类型名>Relations` 扩展 trait 上生成同名访问器。
#[proc_macro_derive(Object, attributes(object))]
pub fn derive_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_object(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// 派生 `Model` 与 `RelationModel`
///
/// ```ignore
/// #[derive(Relation)]
/// #[relation(name = "member", left = User, right = Room, fields = ["role", "status"])]
/// pub struct UsersRooms;
/// ```
#[proc_macro_derive(Relation, attributes(relation))]
pub fn derive_relation(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_relation(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

// 关系访问器声明：名称、关系类型、是否为 rights
struct Accessor {
    name: Ident,
    relation: Type,
    rightward: bool,
}

fn expand_object(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let vis = &input.vis;
    let mut name = LitStr::new(&ident.to_string(), ident.span());
    let mut fields = Vec::new();
    let mut id_generator: Option<Path> = None;
    let mut accessors = Vec::new();

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("object")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = meta.value()?.parse()?;
            } else if meta.path.is_ident("fields") {
                fields = parse_field_list(&meta)?;
            } else if meta.path.is_ident("id") {
                id_generator = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("lefts") || meta.path.is_ident("rights") {
                let rightward = meta.path.is_ident("rights");
                meta.parse_nested_meta(|entry| {
                    let Some(name) = entry.path.get_ident().cloned() else {
                        return Err(entry.error("expected an accessor name"));
                    };
                    let relation: Type = entry.value()?.parse()?;
                    accessors.push(Accessor {
                        name,
                        relation,
                        rightward,
                    });
                    Ok(())
                })?;
            } else {
                return Err(meta.error("unsupported object attribute"));
            }
            Ok(())
        })?;
    }

    // 先 lefts 后 rights，删除对象时按此顺序清理关系
    accessors.sort_by_key(|accessor| accessor.rightward);

    let new_id = id_generator.map(|path| {
        quote! {
            fn new_id() -> ::std::string::String {
                #path()
            }
        }
    });

    let slots = accessors.iter().map(|accessor| {
        let name = accessor.name.to_string();
        let relation = &accessor.relation;
        if accessor.rightward {
            quote! { ::redis_orm::RelationSlot::rightward::<#relation>(#name) }
        } else {
            quote! { ::redis_orm::RelationSlot::leftward::<#relation>(#name) }
        }
    });

    let relations_trait = (!accessors.is_empty()).then(|| {
        let trait_name = format_ident!("{}Relations", ident);
        let signatures = accessors.iter().map(|accessor| {
            let name = &accessor.name;
            let relation = &accessor.relation;
            if accessor.rightward {
                quote! { fn #name(&self) -> ::redis_orm::RightwardManager<#relation>; }
            } else {
                quote! { fn #name(&self) -> ::redis_orm::LeftwardManager<#relation>; }
            }
        });
        let bodies = accessors.iter().map(|accessor| {
            let name = &accessor.name;
            let relation = &accessor.relation;
            if accessor.rightward {
                quote! {
                    fn #name(&self) -> ::redis_orm::RightwardManager<#relation> {
                        self.rightward::<#relation>()
                    }
                }
            } else {
                quote! {
                    fn #name(&self) -> ::redis_orm::LeftwardManager<#relation> {
                        self.leftward::<#relation>()
                    }
                }
            }
        });
        quote! {
            #vis trait #trait_name {
                #(#signatures)*
            }

            impl #trait_name for ::redis_orm::Object<#ident> {
                #(#bodies)*
            }
        }
    });

    Ok(quote! {
        impl ::redis_orm::Model for #ident {
            const NAME: &'static str = #name;
            const FIELDS: &'static [&'static str] = &[#(#fields),*];
        }

        impl ::redis_orm::ObjectModel for #ident {
            #new_id

            fn relations() -> ::std::vec::Vec<::redis_orm::RelationSlot<Self>> {
                ::std::vec![#(#slots),*]
            }
        }

        #relations_trait

        ::redis_orm::inventory::submit! {
            ::redis_orm::ModelMeta::object::<#ident>()
        }
    })
}

fn expand_relation(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let mut name = LitStr::new(&ident.to_string(), ident.span());
    let mut fields = Vec::new();
    let mut left: Option<Type> = None;
    let mut right: Option<Type> = None;
    let mut cardinality = quote! { ::redis_orm::Cardinality::ManyToMany };
    let mut cascade = false;

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("relation")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = meta.value()?.parse()?;
            } else if meta.path.is_ident("fields") {
                fields = parse_field_list(&meta)?;
            } else if meta.path.is_ident("left") {
                left = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("right") {
                right = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("cardinality") {
                let mode: LitStr = meta.value()?.parse()?;
                cardinality = match mode.value().as_str() {
                    "many_to_many" => quote! { ::redis_orm::Cardinality::ManyToMany },
                    "one_to_many" => quote! { ::redis_orm::Cardinality::OneToMany },
                    _ => {
                        return Err(syn::Error::new(
                            mode.span(),
                            "cardinality must be \"many_to_many\" or \"one_to_many\"",
                        ));
                    }
                };
            } else if meta.path.is_ident("cascade") {
                cascade = true;
            } else {
                return Err(meta.error("unsupported relation attribute"));
            }
            Ok(())
        })?;
    }

    let Some(left) = left else {
        return Err(syn::Error::new_spanned(ident, "missing `left = Type` in #[relation(..)]"));
    };
    let Some(right) = right else {
        return Err(syn::Error::new_spanned(ident, "missing `right = Type` in #[relation(..)]"));
    };

    Ok(quote! {
        impl ::redis_orm::Model for #ident {
            const NAME: &'static str = #name;
            const FIELDS: &'static [&'static str] = &[#(#fields),*];
        }

        impl ::redis_orm::RelationModel for #ident {
            type Left = #left;
            type Right = #right;

            const CARDINALITY: ::redis_orm::Cardinality = #cardinality;
            const CASCADE: bool = #cascade;
        }

        ::redis_orm::inventory::submit! {
            ::redis_orm::ModelMeta::relation::<#ident>()
        }
    })
}

// 解析 `fields = ["a", "b"]`
fn parse_field_list(meta: &ParseNestedMeta) -> syn::Result<Vec<LitStr>> {
    let array: ExprArray = meta.value()?.parse()?;
    array
        .elems
        .into_iter()
        .map(|elem| match elem {
            Expr::Lit(expr) => match expr.lit {
                Lit::Str(field) if !field.value().is_empty() && !field.value().contains(':') => {
                    Ok(field)
                }
                lit => Err(syn::Error::new_spanned(
                    lit,
                    "field names must be non-empty strings without ':'",
                )),
            },
            other => Err(syn::Error::new_spanned(other, "expected a string literal")),
        })
        .collect()
}
