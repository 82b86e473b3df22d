use crate::arena::RuntimeArena;
use crate::function::{FunctionHandle, FunctionObject};

/// The product of a successful compilation: a closure over the module-init function.
/// Bundles the `RuntimeArena` bulk-transferred from the compiler's mini-VM sandbox
/// together with a handle to the synthetic `$moduleinit` function.
#[derive(Debug)]
pub struct ModuleClosure {
    arena: RuntimeArena,
    entry: FunctionHandle,
}

impl ModuleClosure {
    pub fn new(arena: RuntimeArena, entry: FunctionHandle) -> Self {
        ModuleClosure { arena, entry }
    }

    pub fn entry(&self) -> FunctionHandle {
        self.entry
    }

    pub fn entry_function(&self) -> &FunctionObject {
        self.arena.function(self.entry)
    }

    pub fn arena(&self) -> &RuntimeArena {
        &self.arena
    }

    /// Consume the closure and hand the arena to a caller-owned execution VM.
    pub fn into_arena(self) -> (RuntimeArena, FunctionHandle) {
        (self.arena, self.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_function_resolves_through_arena() {
        let mut arena = RuntimeArena::new();
        let entry = arena.push_function(FunctionObject::new("$moduleinit"));
        let closure = ModuleClosure::new(arena, entry);
        assert_eq!(closure.entry_function().identifier, "$moduleinit");
    }
}
