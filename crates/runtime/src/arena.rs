use crate::class::{ClassHandle, ClassObject};
use crate::function::{FunctionHandle, FunctionObject};

/// The compiler-owned "mini VM" sandbox: every function and class object codegen
/// creates lives here until compilation finishes. On success the arena is handed to the
/// caller inside a `ModuleClosure`; on any accumulated error it is simply dropped.
/// Rust's ownership model turns what would otherwise be a manual bulk-cleanup walk over
/// every published object and class hash table into something `Drop` does for free.
#[derive(Debug, Default)]
pub struct RuntimeArena {
    functions: Vec<FunctionObject>,
    classes: Vec<ClassObject>,
}

impl RuntimeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_function(&mut self, function: FunctionObject) -> FunctionHandle {
        let handle = FunctionHandle(self.functions.len() as u32);
        self.functions.push(function);
        handle
    }

    pub fn push_class(&mut self, class: ClassObject) -> ClassHandle {
        let handle = ClassHandle(self.classes.len() as u32);
        self.classes.push(class);
        handle
    }

    pub fn function(&self, handle: FunctionHandle) -> &FunctionObject {
        &self.functions[handle.index() as usize]
    }

    pub fn function_mut(&mut self, handle: FunctionHandle) -> &mut FunctionObject {
        &mut self.functions[handle.index() as usize]
    }

    pub fn class(&self, handle: ClassHandle) -> &ClassObject {
        &self.classes[handle.index() as usize]
    }

    pub fn class_mut(&mut self, handle: ClassHandle) -> &mut ClassObject {
        &mut self.classes[handle.index() as usize]
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionHandle, &FunctionObject)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionHandle(i as u32), f))
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassHandle, &ClassObject)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassHandle(i as u32), c))
    }

    /// Explicit release for callers that want an intention-revealing name; on the
    /// error path the caller can just drop the whole arena instead, which is
    /// equivalent and cheaper.
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_round_trip() {
        let mut arena = RuntimeArena::new();
        let f = arena.push_function(FunctionObject::new("main"));
        let c = arena.push_class(ClassObject::new("Point"));
        assert_eq!(arena.function(f).identifier, "main");
        assert_eq!(arena.class(c).identifier, "Point");
        assert_eq!(arena.function_count(), 1);
        assert_eq!(arena.class_count(), 1);
    }
}
