use crate::function::FunctionHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque handle to a `ClassObject` in a `RuntimeArena` (see `FunctionHandle` for why
/// this is a handle rather than a pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassHandle(pub(crate) u32);

impl ClassHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// A bound member of a class: either a plain method, or a computed property's
/// getter/setter pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Bound {
    Method(FunctionHandle),
    Property {
        getter: FunctionHandle,
        setter: Option<FunctionHandle>,
    },
}

/// A class object together with its metaclass. The metaclass carries static members;
/// the class carries instance members. Represented as two `ClassObject`s linked by
/// `metaclass` rather than as one struct with two member tables, so static and
/// instance lookups stay structurally distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassObject {
    pub identifier: String,
    pub superclass: Option<ClassHandle>,
    /// `None` on the metaclass itself (a metaclass has no further metaclass).
    pub metaclass: Option<ClassHandle>,
    pub ivar_count: u16,
    pub static_ivar_count: u16,
    pub members: HashMap<String, Bound>,
    pub is_struct: bool,
    /// Superclass lookup is deferred to the VM.
    pub is_extern_superclass: bool,
    /// Parsed and stored, never consulted.
    pub protocols: Vec<String>,
}

impl ClassObject {
    pub fn new(identifier: impl Into<String>) -> Self {
        ClassObject {
            identifier: identifier.into(),
            superclass: None,
            metaclass: None,
            ivar_count: 0,
            static_ivar_count: 0,
            members: HashMap::new(),
            is_struct: false,
            is_extern_superclass: false,
            protocols: Vec::new(),
        }
    }

    pub fn bind_method(&mut self, name: impl Into<String>, handle: FunctionHandle) {
        self.members.insert(name.into(), Bound::Method(handle));
    }

    pub fn bind_property(
        &mut self,
        name: impl Into<String>,
        getter: FunctionHandle,
        setter: Option<FunctionHandle>,
    ) {
        self.members
            .insert(name.into(), Bound::Property { getter, setter });
    }

    pub fn lookup(&self, name: &str) -> Option<&Bound> {
        self.members.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_lookup_method() {
        let mut class = ClassObject::new("Point");
        class.bind_method("magnitude", FunctionHandle(3));
        match class.lookup("magnitude") {
            Some(Bound::Method(h)) => assert_eq!(h.index(), 3),
            other => panic!("expected Method, got {other:?}"),
        }
        assert!(class.lookup("nope").is_none());
    }
}
