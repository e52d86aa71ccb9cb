use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// The environment variable naming the MongoDB server to test against.
const DB_URI_VAR: &str = "POLLBOOTH_TEST_DB_URI";

/// Run an asynchronous test against a real MongoDB server, injecting a
/// [`crate::store::MongoStore`] and/or the [`mongodb::Database`] behind it.
///
/// Each test gets a freshly named database with all indexes in place, which
/// is dropped afterwards WHETHER OR NOT the test passes. The server must be a
/// replica set, since the store uses transactions.
///
/// If `POLLBOOTH_TEST_DB_URI` is not set, the test is skipped (and passes).
#[proc_macro_attribute]
pub fn db_test(_: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => return err.into_compile_error().into(),
    };

    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let Ok(uri) = std::env::var(#DB_URI_VAR) else {
                eprintln!("{} not set, skipping {}", #DB_URI_VAR, stringify!(#name));
                return;
            };

            log4rs_test_utils::test_logging::init_logging_once_for(
                ["pollbooth_backend"],
                None,
                None,
            );

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("db-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let client = mongodb::Client::with_uri_str(&uri).await.unwrap();
                let db_name = format!("pollbooth_test_{}", mongodb::bson::oid::ObjectId::new());
                let db = client.database(&db_name);
                crate::model::mongodb::ensure_indexes_exist(&db).await.unwrap();
                #[allow(unused_variables)]
                let store = crate::store::MongoStore::new(client, &db);

                // Run on its own task so a panic can be caught, the database
                // dropped, and the panic rethrown.
                let result = rocket::tokio::spawn(#new_name(#(#test_args),*)).await;
                db.drop(None).await.unwrap();
                if let Err(err) = result {
                    if err.is_panic() {
                        std::panic::resume_unwind(err.into_panic());
                    }
                    panic!("{err}");
                }
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, and extract the parameters to inject.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_store = false;
    let mut has_db = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                let type_ident = type_path.path.segments.last().map(|s| &s.ident);
                if type_ident.map_or(false, |i| i == "MongoStore") && !has_store {
                    has_store = true;
                    args.push(quote! { store });
                    continue;
                } else if type_ident.map_or(false, |i| i == "Database") && !has_db {
                    has_db = true;
                    args.push(quote! { db.clone() });
                    continue;
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected at most one each of `store: MongoStore` and `db: Database`",
        ));
    }

    Ok(args)
}
