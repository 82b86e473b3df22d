//! Lumen Runtime: the narrow object-model construction API the compiler targets.
//!
//! This crate deliberately does **not** implement a virtual machine, a garbage
//! collector, a scheduler, or any standard-library registration — those are all
//! external collaborators, and the compiler only needs a small construction API to
//! build functions and classes. That API is what lives here:
//!
//! - [`value::Value`] — the literal values that can live in a constant pool or serve
//!   as a parameter default.
//! - [`function::FunctionObject`] / [`function::ConstantPool`] — what codegen builds
//!   per function, and what the optimizer/encoder finalizes in place.
//! - [`class::ClassObject`] — the class/metaclass pair codegen builds per `class`
//!   declaration.
//! - [`arena::RuntimeArena`] — the compiler-owned "mini VM" sandbox that all of the
//!   above live in until compilation succeeds or fails.
//! - [`closure::ModuleClosure`] — the final product: an arena plus a handle to the
//!   synthetic `$moduleinit` function.

pub mod arena;
pub mod class;
pub mod closure;
pub mod function;
pub mod sentinel;
pub mod value;

pub use arena::RuntimeArena;
pub use class::{Bound, ClassHandle, ClassObject};
pub use closure::ModuleClosure;
pub use function::{ConstantPool, FunctionBody, FunctionHandle, FunctionObject};
pub use value::Value;
