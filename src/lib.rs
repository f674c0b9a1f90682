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

//! # enumbox
//!
//! Whole-program enum unboxing for a JVM-style SSA intermediate representation.
//!
//! Enum constants are heap objects; comparing, switching over or storing them costs
//! allocations, indirections and class initialization. When a whole-program analysis
//! can prove that no code observes an enum's object identity, every value of that
//! enum can be represented by a plain `int` instead: `0` for `null` and
//! `ordinal + 1` for each constant. `enumbox` decides which enums qualify and
//! rewrites the program accordingly.
//!
//! ## Features
//!
//! - **Candidate collection** - every enum class not pinned by keep rules
//! - **Fixed-point eligibility analysis** - a closed set of use-site rules, evaluated
//!   in parallel per method and committed deterministically
//! - **Instance-field mapping** - per-constant field values folded into ordinal
//!   lookups, constants or small lookup tables
//! - **Rewriting** - types, signatures, field and array types and every use site,
//!   plus `$SwitchMap$` elimination and `toString()` folding
//! - **Shared shims** - one utility class per artifact holding `ordinal`, `equals`,
//!   `compareTo`, `values` and null-check helpers, reused across compilation rounds
//! - **Cross-pass coordination** - rewrite records broadcast to collaborating caches
//!   and checked for stale references
//! - **Reference interpreter** - executes programs before and after rewriting so
//!   observable behavior can be compared
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────┐
//! │ Collector  │──▶│ Analyzer  │◀─▶│ Field Mapper │──▶│ Rewriter │──▶│ Verifier │
//! └────────────┘   └───────────┘   └──────────────┘   └────┬─────┘   └──────────┘
//!                                                          │
//!                                     ┌────────────────────┼────────────────────┐
//!                                     ▼                    ▼                    ▼
//!                               Shared utility      Local utilities      Coordinator
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use enumbox::prelude::*;
//!
//! # fn main() -> enumbox::Result<()> {
//! let mut pb = ProgramBuilder::new("app");
//! let color = pb.enum_class("com.example.Color").constants(&["RED", "GREEN"]).build()?;
//! let main = pb.class("com.example.Main")?;
//! let run = pb.static_method(main, "run", vec![], Type::Void);
//! pb.code(run, |f| {
//!     f.block(0, |b| {
//!         let green = b.sget(color.constants[1]);
//!         let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[green]);
//!         b.println(ordinal);
//!         b.ret();
//!     });
//! });
//! let mut program = pb.build();
//!
//! let report = EnumUnboxer::new(UnboxingConfig::default()).run(&mut program)?;
//! assert!(report.is_unboxed("com.example.Color"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared fixtures used by unit tests across modules.
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use enumbox::prelude::*;
///
/// let config = UnboxingConfig::default();
/// let unboxer = EnumUnboxer::new(config);
/// ```
pub mod prelude;

/// The closed-world program model: classes, fields, methods and SSA bodies.
///
/// Includes the builder DSL used to construct programs in tests, benchmarks and
/// shim synthesis, and the keep-rule and pin predicates other passes publish.
pub mod program;

/// A reference interpreter for the program model.
///
/// Used to compare the observable behavior (printed output and uncaught
/// exceptions) of a program before and after unboxing.
pub mod interp;

/// The enum unboxing engine.
///
/// See [`enums::EnumUnboxer`] for the entry point.
pub mod enums;

/// Thread-safe event log recording what the engine analyzed and changed.
pub mod events;

/// `enumbox` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `enumbox` Error type
///
/// Analysis demotions are not errors; see [`Error`] for the conditions that are.
pub use error::Error;

pub use enums::{EnumUnboxer, UnboxingConfig, UnboxingReport};
pub use program::{Program, ProgramBuilder};
