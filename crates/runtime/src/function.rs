use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A function's constant pool: the literal values a function's bytecode references by
/// 18-bit `LOADK` index. Not deduplicated — two equal literals used in different places
/// get distinct entries; deduplication is a reasonable future optimization but not one
/// this implementation needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantPool {
    values: Vec<Value>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` and return its index. Callers are responsible for checking the
    /// result against `lumen_runtime::sentinel::LAST_REAL_CPOOL_INDEX`.
    pub fn add(&mut self, value: Value) -> u32 {
        let idx = self.values.len() as u32;
        self.values.push(value);
        idx
    }

    pub fn get(&self, index: u32) -> Option<&Value> {
        self.values.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

/// Opaque handle to a `FunctionObject` living in a `RuntimeArena`. Replaces the raw
/// back-pointers the original C compiler threaded through the AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionHandle(pub(crate) u32);

impl FunctionHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// The bytecode a function carries. Starts `Pending` (codegen is still emitting IR into
/// a side-buffer owned by the compiler) and becomes `Encoded` once the optimizer/encoder
/// pass has bit-packed the IR into 32-bit words.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum FunctionBody {
    #[default]
    Pending,
    Encoded {
        words: Vec<u32>,
        /// Parallel line-number table, one entry per word, present only when the host
        /// requested debug info.
        lines: Option<Vec<u32>>,
    },
}

/// A compiled function, one of the runtime objects codegen produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionObject {
    pub identifier: String,
    pub nparams: u16,
    pub nlocals: u16,
    pub nupvalues: u16,
    pub param_names: Vec<String>,
    pub defaults: Option<Vec<Value>>,
    pub constants: ConstantPool,
    pub body: FunctionBody,
    /// `1.0 - impure_count / ninst`, computed at encode time.
    /// `None` until encoding completes.
    pub purity: Option<f64>,
    /// True if the function reads the implicit `_args` keyword (varargs marker).
    pub useargs: bool,
}

impl FunctionObject {
    pub fn new(identifier: impl Into<String>) -> Self {
        FunctionObject {
            identifier: identifier.into(),
            nparams: 0,
            nlocals: 0,
            nupvalues: 0,
            param_names: Vec::new(),
            defaults: None,
            constants: ConstantPool::new(),
            body: FunctionBody::Pending,
            purity: None,
            useargs: false,
        }
    }

    pub fn instruction_count(&self) -> usize {
        match &self.body {
            FunctionBody::Pending => 0,
            FunctionBody::Encoded { words, .. } => words.len(),
        }
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self.body, FunctionBody::Encoded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_pool_indices_are_sequential() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.add(Value::Int(1)), 0);
        assert_eq!(pool.add(Value::Int(2)), 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(0), Some(&Value::Int(1)));
        assert_eq!(pool.get(7), None);
    }

    #[test]
    fn fresh_function_is_pending_until_encoded() {
        let f = FunctionObject::new("main");
        assert!(!f.is_encoded());
        assert_eq!(f.instruction_count(), 0);
    }
}
