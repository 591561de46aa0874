//! Semantic analysis errors (E3xxx).
//!
//! Diagnostics are buffered in a line-keyed ordered map: the first error
//! reported on a source line wins and later ones on the same line are
//! dropped, then everything is rendered in line order once the pass
//! completes. Analysis never aborts on a user error.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, miette::Diagnostic, Clone, PartialEq)]
pub enum SemanticError {
    // --- name resolution -----------------------------------------------------
    #[error("Bundle name '{name}' not defined in program or linked libraries")]
    #[diagnostic(code(E3001))]
    BundleNotDefined { name: String },

    #[error("Undefined class: '{name}'")]
    #[diagnostic(code(E3002))]
    UndefinedClass { name: String },

    #[error("Undefined enum: '{name}'")]
    #[diagnostic(code(E3003))]
    UndefinedEnum { name: String },

    #[error("Undefined enum item: '{name}'")]
    #[diagnostic(code(E3004))]
    UndefinedEnumItem { name: String },

    #[error("Undefined interface: '{name}'")]
    #[diagnostic(code(E3005))]
    UndefinedInterface { name: String },

    #[error("Undefined alias: '{name}'")]
    #[diagnostic(code(E3006))]
    UndefinedAlias { name: String },

    #[error("Invalid nested alias reference")]
    #[diagnostic(code(E3007))]
    NestedAlias,

    #[error("Undefined variable: '{name}'")]
    #[diagnostic(code(E3008))]
    UndefinedVariable { name: String },

    #[error("Undefined class or enum: '{name}'")]
    #[diagnostic(code(E3009))]
    UndefinedClassOrEnum { name: String },

    #[error("Undefined class or interface: '{name}'")]
    #[diagnostic(code(E3010))]
    UndefinedClassOrInterface { name: String },

    #[error("Class '{name}' defined in shared libraries")]
    #[diagnostic(code(E3011))]
    ClassShadowsLibrary { name: String },

    #[error("Enum '{name}' defined in program and shared libraries")]
    #[diagnostic(code(E3012))]
    EnumShadowsLibrary { name: String },

    // --- visibility ----------------------------------------------------------
    #[error("Cannot reference a private method from this context")]
    #[diagnostic(code(E3020))]
    PrivateMethod,

    #[error("Cannot access private class '{name}' from this bundle scope")]
    #[diagnostic(code(E3021))]
    PrivateClass { name: String },

    #[error("Cannot reference an instance method from this context")]
    #[diagnostic(code(E3022))]
    InstanceMethodFromStatic,

    #[error("Cannot reference an instance variable from this context")]
    #[diagnostic(code(E3023))]
    InstanceVariableFromStatic,

    // --- arity / signature ---------------------------------------------------
    #[error("Undefined function/method call: '{name}(..)'\n\tEnsure the object and it's calling parameters are properly casted{alternatives}")]
    #[diagnostic(code(E3030))]
    NoMatchingOverload { name: String, alternatives: String },

    #[error("Method or function already overloaded '{name}'")]
    #[diagnostic(code(E3031))]
    AlreadyOverloaded { name: String },

    #[error("Invalid method call context")]
    #[diagnostic(code(E3032))]
    InvalidCallContext,

    // --- typing --------------------------------------------------------------
    #[error("Invalid cast with classes: {left} and {right}")]
    #[diagnostic(code(E3040))]
    InvalidCast { left: String, right: String },

    #[error("Invalid operation using classes: {left} and {right}")]
    #[diagnostic(code(E3041))]
    InvalidOperation { left: String, right: String },

    #[error("Invalid operation with 'Nil' value")]
    #[diagnostic(code(E3042))]
    NilOperation,

    #[error("Invalid operation with Nil")]
    #[diagnostic(code(E3043))]
    NilWithNil,

    #[error("Dimension size mismatch")]
    #[diagnostic(code(E3044))]
    DimensionMismatch,

    #[error("Invalid array cast")]
    #[diagnostic(code(E3045))]
    InvalidArrayCast,

    #[error("Array index type must be an Integer, Char, Byte or Enum")]
    #[diagnostic(code(E3046))]
    InvalidArrayIndex,

    #[error("Empty array index")]
    #[diagnostic(code(E3047))]
    EmptyArrayIndex,

    #[error("Invalid 'TypeOf' check, the left and right hand sides must be class types")]
    #[diagnostic(code(E3048))]
    InvalidTypeOf,

    #[error("Expected a boolean expression")]
    #[diagnostic(code(E3049))]
    ExpectedBoolean,

    #[error("Unable to make a method call from an indexed array element")]
    #[diagnostic(code(E3050))]
    IndexedCallReceiver,

    #[error("Unable to make method calls on static arrays")]
    #[diagnostic(code(E3051))]
    StaticArrayCall,

    #[error("Invalid class type or assignment")]
    #[diagnostic(code(E3052))]
    InvalidReceiverType,

    #[error("Undefined class reference: '{name}'\n\tIf external reference to generic ensure it has been typed")]
    #[diagnostic(code(E3053))]
    UndefinedClassReference { name: String },

    // --- inheritance / interfaces -------------------------------------------
    #[error("Class '{name}' cannot be derived from a generic or interface")]
    #[diagnostic(code(E3060))]
    InheritFromInterfaceOrGeneric { name: String },

    #[error("Classes cannot be derived from interfaces")]
    #[diagnostic(code(E3061))]
    InheritFromLibraryInterface,

    #[error("Attempting to inherent from an undefined class type")]
    #[diagnostic(code(E3062))]
    UndefinedParent,

    #[error("Expected an interface type")]
    #[diagnostic(code(E3063))]
    ExpectedInterface,

    #[error("Interface method must be defined as 'virtual'")]
    #[diagnostic(code(E3064))]
    InterfaceMethodNotVirtual,

    #[error("Not all methods have been implemented for the interface: {name}")]
    #[diagnostic(code(E3065))]
    InterfaceNotImplemented { name: String },

    #[error("Not all virtual methods have been defined for class/interface: {name}")]
    #[diagnostic(code(E3066))]
    VirtualMethodMismatch { name: String },

    #[error("Not all virtual methods have been implemented for the class/interface: {name}")]
    #[diagnostic(code(E3067))]
    VirtualMethodsMissing { name: String },

    #[error("Implementation method cannot be virtual")]
    #[diagnostic(code(E3068))]
    ImplementationIsVirtual,

    #[error("Parent call required")]
    #[diagnostic(code(E3069))]
    ParentCallRequired,

    #[error("Class has no parent")]
    #[diagnostic(code(E3070))]
    NoParent,

    #[error("Cannot create an instance of a virtual class or interface")]
    #[diagnostic(code(E3071))]
    VirtualInstance,

    #[error("Declaration name '{name}' defined in a parent class")]
    #[diagnostic(code(E3072))]
    DuplicateParentEntry { name: String },

    // --- generics ------------------------------------------------------------
    #[error("Cannot create an unqualified instance of class: '{name}'")]
    #[diagnostic(code(E3080))]
    UnqualifiedGenericInstance { name: String },

    #[error("Cannot utilize an unqualified instance of class: '{name}'")]
    #[diagnostic(code(E3081))]
    UnqualifiedGenericUse { name: String },

    #[error("Concrete to generic size mismatch")]
    #[diagnostic(code(E3082))]
    ConcreteSizeMismatch,

    #[error("Concrete class: '{concrete}' is incompatible with backing class/interface '{backing}'")]
    #[diagnostic(code(E3083))]
    IncompatibleBacking { concrete: String, backing: String },

    #[error("Generic reference '{name}' previously defined as a class")]
    #[diagnostic(code(E3084))]
    GenericShadowsClass { name: String },

    #[error("Undefined backing generic interface: '{name}'")]
    #[diagnostic(code(E3085))]
    UndefinedBackingInterface { name: String },

    #[error("Invalid generic to concrete type mismatch '{from}' to '{to}'")]
    #[diagnostic(code(E3086))]
    GenericConcreteMismatch { from: String, to: String },

    // --- defaults / lambdas --------------------------------------------------
    #[error("Virtual methods and interfaces cannot contain default parameter values")]
    #[diagnostic(code(E3090))]
    DefaultParamOnVirtual,

    #[error("Only trailing parameters may have default values")]
    #[diagnostic(code(E3091))]
    DefaultParamNotTrailing,

    #[error("Invalid lambda type")]
    #[diagnostic(code(E3092))]
    InvalidLambdaType,

    #[error("Declaration and parameter size mismatch")]
    #[diagnostic(code(E3093))]
    LambdaParamMismatch,

    // --- control flow --------------------------------------------------------
    #[error("All method/function paths must return a value")]
    #[diagnostic(code(E3100))]
    NonReturningPath,

    #[error("Invalid return statement")]
    #[diagnostic(code(E3107))]
    InvalidReturn,

    #[error("'break' or 'continue' must be within a loop")]
    #[diagnostic(code(E3101))]
    BreakOutsideLoop,

    #[error("Only one 'leaving' block may be defined in a method or function")]
    #[diagnostic(code(E3102))]
    MultipleLeaving,

    #[error("A 'leaving' block must be defined at the top level of a method or function")]
    #[diagnostic(code(E3103))]
    NestedLeaving,

    #[error("Duplicate select label")]
    #[diagnostic(code(E3104))]
    DuplicateSelectLabel,

    #[error("Select label must be an Integer, Char, Byte or Enum constant")]
    #[diagnostic(code(E3105))]
    InvalidSelectLabel,

    #[error("Expected at least one select label")]
    #[diagnostic(code(E3106))]
    EmptySelect,

    // --- entry points --------------------------------------------------------
    #[error("The 'Main(args)' function was not defined")]
    #[diagnostic(code(E3110))]
    MainNotDefined,

    #[error("The 'Main(args)' function has already been defined")]
    #[diagnostic(code(E3111))]
    MainRedefined,

    #[error("The 'Action(args)' function was not defined")]
    #[diagnostic(code(E3112))]
    ActionNotDefined,

    #[error("The 'Action(args)' function has already been defined")]
    #[diagnostic(code(E3113))]
    ActionRedefined,

    #[error("Libraries and web applications may not define a 'Main(args)' function")]
    #[diagnostic(code(E3114))]
    MainInLibrary,
}

/// A reported diagnostic: the error plus where it was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub error: SemanticError,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.error)
    }
}

/// Line-keyed diagnostic buffer. Insertion keeps the first error per
/// (file, line); iteration is file- then line-ordered.
#[derive(Debug, Default)]
pub struct ErrorMap {
    errors: BTreeMap<(String, u32), SemanticError>,
}

impl ErrorMap {
    pub fn new() -> Self {
        ErrorMap::default()
    }

    pub fn report(&mut self, file: &str, line: u32, error: SemanticError) {
        self.errors
            .entry((file.to_string(), line))
            .or_insert(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.errors
            .into_iter()
            .map(|((file, line), error)| Diagnostic { file, line, error })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, u32), &SemanticError)> {
        self.errors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_on_a_line_wins() {
        let mut map = ErrorMap::new();
        map.report("a.obs", 4, SemanticError::NilOperation);
        map.report(
            "a.obs",
            4,
            SemanticError::UndefinedClass {
                name: "X".to_string(),
            },
        );
        assert_eq!(map.len(), 1);
        let diags = map.into_diagnostics();
        assert_eq!(diags[0].error, SemanticError::NilOperation);
    }

    #[test]
    fn diagnostics_render_in_line_order() {
        let mut map = ErrorMap::new();
        map.report("a.obs", 9, SemanticError::NonReturningPath);
        map.report("a.obs", 2, SemanticError::ParentCallRequired);
        let diags = map.into_diagnostics();
        assert_eq!(diags[0].line, 2);
        assert_eq!(diags[1].line, 9);
        assert_eq!(
            diags[0].to_string(),
            "a.obs:2: Parent call required"
        );
    }
}
