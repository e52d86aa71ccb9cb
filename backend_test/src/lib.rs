use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject
/// dependencies. Every test gets its own server over a fresh in-memory store.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and,
/// for `#[backend_test(voter)]`, the logged-in voter's
/// [`crate::model::mongodb::Id`].
///
/// `#[backend_test(admin)]` logs the client in as admin before the test runs;
/// `#[backend_test(voter)]` registers, verifies and logs in the example voter.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);
    let login = parse_macro_input!(args as Option<Ident>);

    let login_kind = match &login {
        None => Login::None,
        Some(arg) if arg == "admin" => Login::Admin,
        Some(arg) if arg == "voter" => Login::Voter,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `admin` or `voter`")
                .into_compile_error()
                .into();
        }
    };

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), login_kind) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Log in the client as admin/voter if needed.
    let maybe_login = match login_kind {
        Login::None => quote! {},
        Login::Admin => quote! {
            crate::test_login::admin(&rocket_client).await;
        },
        Login::Voter => quote! {
            voter = Some(crate::test_login::voter(&rocket_client).await);
        },
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                Option<crate::model::mongodb::Id>,
            ) {
                let rocket_client = rocket::local::asynchronous::Client::tracked(crate::test_rocket())
                    .await
                    .unwrap();
                #[allow(unused_mut)]
                let mut voter = None;

                #maybe_login

                (rocket_client, voter)
            }

            /// The test itself.
            #item_fn

            // Tests enter backend code, so enable logging.
            log4rs_test_utils::test_logging::init_logging_once_for(
                ["pollbooth_backend"],
                None,
                None,
            );

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                #[allow(unused_variables)]
                let (rocket_client, voter) = setup().await;
                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Login {
    None,
    Admin,
    Voter,
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature, login: Login) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_voter = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // Valid as the last path segment for any type is itself
                let type_ident = &type_path.path.segments.last().unwrap().ident;
                if type_ident == "Client" {
                    if has_client {
                        return Err(syn::Error::new(
                            input.span(),
                            "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                        ));
                    }
                    has_client = true;
                    args.push(quote! { rocket_client });
                    continue;
                } else if type_ident == "Id" {
                    if login != Login::Voter {
                        return Err(syn::Error::new(
                            input.span(),
                            "Only `#[backend_test(voter)]` tests can accept the voter's `Id`",
                        ));
                    }
                    if has_voter {
                        return Err(syn::Error::new(
                            input.span(),
                            "Test cannot accept more than one voter `Id`",
                        ));
                    }
                    has_voter = true;
                    args.push(quote! { voter.unwrap() });
                    continue;
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client` or `voter_ident: Id`",
        ));
    }

    Ok(args)
}
