// Copyright 2026 The Vimana Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Marks an async test in the workd crates.
///
/// The test runs on `#[tokio::test(<attr>)]` with tracing installed, and its
/// body runs inside an `error_span` named after the test so pool and router
/// events can be told apart when several tests share a log.
#[proc_macro_attribute]
pub fn workd_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let runtime_args = proc_macro2::TokenStream::from(attr);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "#[workd_test] expects an async fn")
            .to_compile_error()
            .into();
    }
    let test_name = sig.ident.to_string();

    quote! {
        #(#attrs)*
        #[tokio::test(#runtime_args)]
        #vis #sig {
            // Only the first test in the binary gets to install the subscriber.
            drop(::workd_util::init_tracing());
            ::workd_util::__tracing::Instrument::instrument(
                async move #block,
                ::workd_util::__tracing::error_span!("test", name = #test_name),
            )
            .await
        }
    }
    .into()
}
