//! Runtime program image: the classes, methods and declaration tables the
//! collector walks. Produced by the loader from a compiled program; the
//! collector only ever reads it.

use rustc_hash::FxHashMap;
use std::sync::Mutex;

/// Declaration slot kinds in instance, class and frame memory. Each slot is
/// one word except `Func`, which packs `(virtual class id, method id)` in
/// one word and the closure pointer in the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDclr {
    Int,
    Char,
    Float,
    Func,
    ByteArray,
    CharArray,
    IntArray,
    FloatArray,
    Obj,
    ObjArray,
}

impl StackDclr {
    /// Words this declaration occupies in a frame or object.
    pub fn slot_words(self) -> usize {
        match self {
            StackDclr::Func => 2,
            _ => 1,
        }
    }
}

/// Reference to a method in the program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: usize,
    pub method: usize,
}

#[derive(Debug)]
pub struct StackMethod {
    pub id: usize,
    pub name: String,
    pub is_lambda: bool,
    /// Frame carries an extra logic slot after `self`.
    pub has_and_or: bool,
    pub dclrs: Vec<StackDclr>,
}

#[derive(Debug)]
pub struct StackClass {
    pub id: usize,
    pub name: String,
    /// Instance payload size in bytes.
    pub instance_size: usize,
    pub instance_dclrs: Vec<StackDclr>,
    pub class_dclrs: Vec<StackDclr>,
    /// Static class memory, one word per class-declaration slot.
    pub class_mem: Mutex<Vec<usize>>,
    pub methods: Vec<StackMethod>,
    /// Closure declaration tables keyed by method id, for tracing lambda
    /// captures.
    pub closures: FxHashMap<usize, Vec<StackDclr>>,
}

impl StackClass {
    pub fn method(&self, id: usize) -> Option<&StackMethod> {
        self.methods.iter().find(|m| m.id == id)
    }

    pub fn closure_dclrs(&self, method_id: usize) -> &[StackDclr] {
        self.closures
            .get(&method_id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
pub struct StackProgram {
    classes: Vec<StackClass>,
}

impl StackProgram {
    pub fn new() -> Self {
        StackProgram::default()
    }

    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        instance_size: usize,
        instance_dclrs: Vec<StackDclr>,
        class_dclrs: Vec<StackDclr>,
    ) -> usize {
        let id = self.classes.len();
        let class_mem_len = class_dclrs.iter().map(|d| d.slot_words()).sum();
        self.classes.push(StackClass {
            id,
            name: name.into(),
            instance_size,
            instance_dclrs,
            class_dclrs,
            class_mem: Mutex::new(vec![0; class_mem_len]),
            methods: Vec::new(),
            closures: FxHashMap::default(),
        });
        id
    }

    pub fn add_method(
        &mut self,
        class: usize,
        name: impl Into<String>,
        is_lambda: bool,
        has_and_or: bool,
        dclrs: Vec<StackDclr>,
    ) -> MethodRef {
        let methods = &mut self.classes[class].methods;
        let id = methods.len();
        methods.push(StackMethod {
            id,
            name: name.into(),
            is_lambda,
            has_and_or,
            dclrs,
        });
        MethodRef { class, method: id }
    }

    pub fn add_closure(&mut self, class: usize, method_id: usize, dclrs: Vec<StackDclr>) {
        self.classes[class].closures.insert(method_id, dclrs);
    }

    pub fn class(&self, id: usize) -> Option<&StackClass> {
        self.classes.get(id)
    }

    pub fn classes(&self) -> &[StackClass] {
        &self.classes
    }

    pub fn method(&self, reference: MethodRef) -> Option<&StackMethod> {
        self.classes
            .get(reference.class)
            .and_then(|c| c.methods.get(reference.method))
    }
}
