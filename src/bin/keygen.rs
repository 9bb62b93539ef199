// Copyright (c) 2026 LibreSeed
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Generate a publisher keypair into a data directory and print the wire
//! form of its public key.

use anyhow::Result;
use libreseed::core::security::keystore::Keystore;

fn main() -> Result<()> {
    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let keystore = Keystore::open(&data_dir)?;
    let handle = keystore.generate()?;
    println!("{}", handle.public_key().to_wire());
    Ok(())
}
