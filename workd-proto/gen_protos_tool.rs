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

//! Regenerates `genproto/*.pb.rs` from the checked-in `.proto` files.
//! Requires `protoc` on the `PATH`.

use std::path::PathBuf;

use clap::Parser;
use prost_build::Config;

#[derive(Parser, Debug)]
#[clap(about = "Generate Rust sources for the CRI protos")]
struct Args {
    /// Input proto files.
    #[clap(required = true)]
    inputs: Vec<String>,

    /// Output directory.
    #[clap(short, long)]
    output_dir: PathBuf,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    tonic_build::configure()
        .build_client(false)
        .build_server(true)
        .out_dir(args.output_dir)
        .compile_protos_with_config(Config::new(), &args.inputs, &["proto"])?;
    Ok(())
}
