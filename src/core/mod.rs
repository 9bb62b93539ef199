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
#![allow(missing_docs)]

//! Protocol core: canonical codec, records, signing, packaging, validation.

pub mod codec;
pub mod pack;
pub mod records;
pub mod security;
pub mod tarball;
pub mod types;
pub mod validate;
