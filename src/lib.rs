// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # ilforge
//!
//! A cross-compiler and incremental uploader for managed .NET programs that execute on a
//! microcontroller-hosted IL interpreter. Starting from an entry method, `ilforge` walks the
//! reachable code graph, rewrites every metadata token in the method bodies into a dense remote
//! token space, lays out classes the way the native execution engine expects them, and streams
//! the result to the device as a sequence of small, 7-bit clean command packets.
//!
//! ## Features
//!
//! - **Dependency closure** - methods, fields, types, strings and virtual/interface overrides
//!   reachable from an entry point, with a configurable replacement registry
//! - **Token patching** - a single forward scan over each method body that resolves and rewrites
//!   every token-bearing operand in place
//! - **Class layout** - field ordering, sizes and struct alignment matching the native engine
//! - **Incremental upload** - a frozen kernel snapshot plus per-program increments, skipped
//!   entirely when the board already carries the same content hash
//! - **Remote tasks** - decoding of execution-state callbacks, including reconstruction of
//!   exceptions with symbolic stack traces
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ilforge::prelude::*;
//!
//! let universe = Universe::with_core_library();
//! let program = universe.define_type("Demo", "Program").build();
//! let main = universe
//!     .define_method(program, "Main")
//!     .attributes(MethodAttributes::STATIC)
//!     .body(MethodBody::new(vec![0x2A], 1))
//!     .build();
//!
//! let mut compiler = Compiler::new(&universe, &[])?;
//! let compilation = compiler.compile(&universe, main, &CompilerSettings::default())?;
//! println!("{} classes, {} methods", compilation.set.classes().len(), compilation.set.methods().len());
//! # Ok::<(), ilforge::Error>(())
//! ```
//!
//! ## Architecture
//!
//! The crate is organized leaves first:
//!
//! - [`metadata`] - the in-memory program model (types, methods, fields, original tokens)
//! - [`tokens`] - the remote token space
//! - [`layout`] - field classification and class layout
//! - [`il`] - opcode table and the token patcher
//! - [`execution`] - class/method declarations, the execution set and snapshots
//! - [`compiler`] - the dependency closure builder and the replacement registry
//! - [`protocol`] - wire commands, packet encoding, transports and the upload session
//! - [`runtime`] - remote tasks, execution states and remote exceptions

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod execution;
pub mod il;
pub mod layout;
pub mod metadata;
pub mod protocol;
pub mod runtime;
pub mod tokens;

/// `ilforge` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ilforge` Error type
///
/// The main error type for all operations in this crate. Covers compile-time failures,
/// transfer failures and errors reported back by the remote execution engine.
pub use error::Error;

pub use compiler::{Compilation, Compiler};
pub use config::CompilerSettings;
pub use execution::ExecutionSet;
pub use metadata::universe::Universe;
