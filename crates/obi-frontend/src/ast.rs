//! Parsed AST: bundles, classes, methods, statements and expressions.
//!
//! The class graph (parents, children, interfaces) is cyclic, so classes live
//! in a flat arena on [`Program`] and refer to each other by [`ClassId`].
//! Back-references (`children`) are maintained by the analyzer's binder and
//! are never followed during teardown.

use crate::symbols::SymbolTableManager;
use crate::types::{GenericParam, Type};
use rustc_hash::FxHashMap;

// =============================================================================
// Identity
// =============================================================================

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub fn new(index: u32) -> Self {
                Self(index)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

id_type!(
    /// Identity of an AST node; key for the analyzer's side tables.
    NodeId
);
id_type!(
    /// Identity of a program class in the [`Program`] arena.
    ClassId
);
id_type!(
    /// Identity of a class loaded from a linked library.
    LibClassId
);
id_type!(
    /// Identity of an enum defined in the program.
    EnumId
);
id_type!(
    /// Identity of an enum loaded from a linked library.
    LibEnumId
);
id_type!(
    /// Identity of a symbol-table entry.
    EntryId
);
id_type!(
    /// Identity of a source file registered with the builder.
    FileId
);

/// Index of a method within its class's method list.
pub type MethodIdx = usize;

/// Source position carried by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub file: FileId,
    pub line: u32,
}

// =============================================================================
// Program structure
// =============================================================================

#[derive(Debug)]
pub struct Program {
    pub file_name: String,
    /// File names registered by the builder, indexed by [`FileId`].
    pub files: Vec<String>,
    /// Bundle names referenced with `use`.
    pub uses: Vec<String>,
    pub bundles: Vec<Bundle>,
    /// Class arena; [`Bundle::classes`] and all cross-references index here.
    pub classes: Vec<Class>,
    pub enums: Vec<Enum>,
    pub aliases: Vec<Alias>,
    pub symbols: SymbolTableManager,
    /// Compiling a shared library (no entry point allowed).
    pub is_lib: bool,
    /// Compiling a web target (`Action(req, resp)` entry point).
    pub is_web: bool,
}

impl Program {
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.index()]
    }

    pub fn enum_def(&self, id: EnumId) -> &Enum {
        &self.enums[id.index()]
    }

    pub fn file(&self, id: FileId) -> &str {
        &self.files[id.index()]
    }

    pub fn has_bundle(&self, name: &str) -> bool {
        self.bundles.iter().any(|b| b.name == name)
    }
}

#[derive(Debug)]
pub struct Bundle {
    pub name: String,
    pub classes: Vec<ClassId>,
    pub enums: Vec<EnumId>,
}

// =============================================================================
// Classes and methods
// =============================================================================

#[derive(Debug)]
pub struct Class {
    pub loc: Loc,
    pub id: ClassId,
    /// Fully qualified `Bundle.Name`.
    pub name: String,
    pub bundle_name: String,
    /// Parent name as parsed; defaulted to `System.Base` by the binder.
    pub parent_name: String,
    pub parent: Option<ClassId>,
    pub lib_parent: Option<LibClassId>,
    pub interface_names: Vec<String>,
    pub interfaces: Vec<ClassId>,
    pub lib_interfaces: Vec<LibClassId>,
    /// Subclasses and implementing classes; maintained by the binder.
    pub children: Vec<ClassId>,
    /// Formal generic parameters, in declaration order.
    pub generics: Vec<GenericParam>,
    pub methods: Vec<Method>,
    /// Encoded name -> method index; built by `associate_methods`.
    pub method_index: FxHashMap<String, MethodIdx>,
    /// Field declarations.
    pub statements: Vec<Statement>,
    pub is_interface: bool,
    pub is_virtual: bool,
    pub is_public: bool,
    /// Liveness flag: a call site referenced the class.
    pub is_called: bool,
}

impl Class {
    /// Formal generic parameter by name.
    pub fn generic(&self, name: &str) -> Option<&GenericParam> {
        self.generics.iter().find(|g| g.name == name)
    }

    /// Position of a formal generic parameter, `None` if not generic here.
    pub fn generic_index(&self, name: &str) -> Option<usize> {
        self.generics.iter().position(|g| g.name == name)
    }

    pub fn has_generics(&self) -> bool {
        !self.generics.is_empty()
    }

    pub fn method_by_encoded_name(&self, encoded: &str) -> Option<MethodIdx> {
        self.method_index.get(encoded).copied()
    }

    /// All methods whose short name matches, regardless of signature.
    pub fn methods_by_short_name(&self, short: &str) -> Vec<MethodIdx> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.short_name == short)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Visibility and construction role of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Public,
    Private,
    NewPublic,
    NewPrivate,
}

impl MethodKind {
    pub fn is_new(self) -> bool {
        matches!(self, MethodKind::NewPublic | MethodKind::NewPrivate)
    }

    pub fn is_private(self) -> bool {
        matches!(self, MethodKind::Private | MethodKind::NewPrivate)
    }
}

#[derive(Debug, Clone)]
pub struct Method {
    pub loc: Loc,
    /// `Class:Short`, the scope prefix for local symbol lookups.
    pub name: String,
    pub short_name: String,
    /// Parser scope key; unique per overload, names the method's symbol table.
    pub parsed_name: String,
    /// Canonical signature key; empty until signature re-encoding runs.
    pub encoded_name: String,
    pub kind: MethodKind,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_native: bool,
    pub is_lambda: bool,
    pub return_type: Type,
    /// Parameters; trailing entries may carry default-value assignments.
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Statement>,
    /// Canonical method when this is a generated default-parameter
    /// trampoline.
    pub original: Option<MethodIdx>,
    /// Body uses short-circuit logic or closures; affects frame layout.
    pub and_or: bool,
    /// Numeric id assigned during analysis.
    pub id: i32,
}

impl Method {
    pub fn is_alt(&self) -> bool {
        self.original.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub loc: Loc,
    pub node_id: NodeId,
    pub entry: EntryId,
    /// Default-value assignment for trailing parameters.
    pub assignment: Option<Box<Assignment>>,
}

// =============================================================================
// Enums and aliases
// =============================================================================

#[derive(Debug)]
pub struct Enum {
    pub loc: Loc,
    pub id: EnumId,
    /// Fully qualified; nested enums use `Owner#Name`.
    pub name: String,
    /// Ordered item name -> value pairs.
    pub items: Vec<(String, i64)>,
}

impl Enum {
    pub fn item(&self, name: &str) -> Option<i64> {
        self.items.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
    }
}

/// Named type abbreviation parameterized by a suffix, referenced as
/// `Name#Suffix`. Aliases may not expand to other aliases.
#[derive(Debug)]
pub struct Alias {
    pub loc: Loc,
    pub name: String,
    pub types: FxHashMap<String, Type>,
}

impl Alias {
    pub fn type_for(&self, suffix: &str) -> Option<&Type> {
        self.types.get(suffix)
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone)]
pub enum Statement {
    Declaration(Declaration),
    Assignment(Assignment),
    /// Expression in statement position (method call, increment).
    Expression(Expression),
    If(IfStatement),
    Select(SelectStatement),
    While(WhileStatement),
    DoWhile(WhileStatement),
    For(ForStatement),
    Return(ReturnStatement),
    Break(Loc),
    Continue(Loc),
    Critical(CriticalStatement),
    Leaving(LeavingStatement),
    Empty(Loc),
}

impl Statement {
    pub fn loc(&self) -> Loc {
        match self {
            Statement::Declaration(d) => d.loc,
            Statement::Assignment(a) => a.loc,
            Statement::Expression(e) => e.loc,
            Statement::If(s) => s.loc,
            Statement::Select(s) => s.loc,
            Statement::While(s) | Statement::DoWhile(s) => s.loc,
            Statement::For(s) => s.loc,
            Statement::Return(s) => s.loc,
            Statement::Break(loc) | Statement::Continue(loc) | Statement::Empty(loc) => *loc,
            Statement::Critical(s) => s.loc,
            Statement::Leaving(s) => s.loc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub loc: Loc,
    pub node_id: NodeId,
    pub variable: Variable,
    pub op: AssignOp,
    pub expr: Expression,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub loc: Loc,
    pub cond: Expression,
    pub then_block: Vec<Statement>,
    /// `else if` continuation.
    pub next: Option<Box<IfStatement>>,
    pub else_block: Option<Vec<Statement>>,
}

#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub loc: Loc,
    pub node_id: NodeId,
    pub operand: Expression,
    pub arms: Vec<SelectArm>,
    pub other: Option<Vec<Statement>>,
}

#[derive(Debug, Clone)]
pub struct SelectArm {
    pub labels: Vec<Expression>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct WhileStatement {
    pub loc: Loc,
    pub cond: Expression,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct ForStatement {
    pub loc: Loc,
    pub pre: Box<Statement>,
    pub cond: Expression,
    pub update: Box<Statement>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct ReturnStatement {
    pub loc: Loc,
    pub node_id: NodeId,
    pub expr: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct CriticalStatement {
    pub loc: Loc,
    pub variable: Variable,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct LeavingStatement {
    pub loc: Loc,
    pub body: Vec<Statement>,
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone)]
pub struct Expression {
    pub loc: Loc,
    pub node_id: NodeId,
    pub kind: ExprKind,
    /// Explicit conversion target from the parser (`->As(T)`).
    pub cast_type: Option<Type>,
    /// Chained method call on this expression's result; the kind of the
    /// chained expression is always `ExprKind::MethodCall`.
    pub chain: Option<Box<Expression>>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    BoolLit(bool),
    ByteLit(u8),
    CharLit(char),
    IntLit(i64),
    FloatLit(f64),
    /// Character-string literal; evaluates to `System.String`.
    StringLit(String),
    Variable(Variable),
    MethodCall(MethodCall),
    Lambda(Lambda),
    Calc(Box<CalcExpression>),
    Cond(Box<CondExpression>),
    StaticArray(Vec<Expression>),
    TypeOf(Box<TypeOfExpression>),
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub loc: Loc,
    pub node_id: NodeId,
    pub name: String,
    pub indices: Option<Vec<Expression>>,
}

/// Shape of a method-call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `Klass->New(..)`.
    New,
    /// `Int->New[len]` and friends.
    NewArray,
    /// `Color->Red` style enum item access.
    Enum,
    /// Constructor's call to the parent constructor.
    Parent,
    Method,
}

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub loc: Loc,
    pub node_id: NodeId,
    pub kind: CallKind,
    /// Receiver name as written: a variable, a class, an enum.
    pub receiver_name: String,
    pub method_name: String,
    pub args: Vec<Expression>,
    /// Receiver variable node when the receiver resolves to a symbol.
    pub variable: Option<Box<Variable>>,
    /// Explicit concrete generic arguments at the call site.
    pub concrete_types: Vec<Type>,
    /// Function reference (`Klass->Method(Int, Int) ~ Int`), not a call.
    pub is_func_reference: bool,
    /// Declared return for function references and typed new-array calls.
    pub func_return: Option<Type>,
    /// Element type for `NewArray` calls.
    pub array_type: Option<Type>,
}

/// Anonymous function. Parsed with untyped parameters; the analyzer fills
/// them in from the alias, the declared type, or the callee's signature.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub loc: Loc,
    pub node_id: NodeId,
    /// Alias reference (`Fn#Apply`) when the lambda is declared by alias.
    pub alias_name: String,
    /// Explicit function type, when written inline.
    pub lambda_type: Option<Type>,
    pub method: Box<Method>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

impl CalcOp {
    /// Result is Bool regardless of operand types.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            CalcOp::Eq | CalcOp::Neq | CalcOp::Lt | CalcOp::Gt | CalcOp::Leq | CalcOp::Geq
        )
    }

    /// Short-circuit logical operator; operands must be Bool.
    pub fn is_logical(self) -> bool {
        matches!(self, CalcOp::And | CalcOp::Or)
    }

    /// Integer-only operator.
    pub fn is_integer_only(self) -> bool {
        matches!(
            self,
            CalcOp::Mod | CalcOp::Shl | CalcOp::Shr | CalcOp::BitAnd | CalcOp::BitOr | CalcOp::BitXor
        )
    }
}

#[derive(Debug, Clone)]
pub struct CalcExpression {
    pub op: CalcOp,
    pub left: Expression,
    pub right: Expression,
}

/// `cond ? then : other`.
#[derive(Debug, Clone)]
pub struct CondExpression {
    pub cond: Expression,
    pub then_expr: Expression,
    pub else_expr: Expression,
}

/// Run-time class identity check; evaluates to Bool.
#[derive(Debug, Clone)]
pub struct TypeOfExpression {
    pub expr: Expression,
    pub queried: Type,
}

// =============================================================================
// Tree builder
// =============================================================================

/// Node factory. Owns node-id assignment and the file registry; the parser
/// (outside this repository) and the test suites construct programs through
/// it so ids stay dense and unique.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    next_node: u32,
    files: Vec<String>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        TreeBuilder::default()
    }

    pub fn file(&mut self, name: &str) -> FileId {
        if let Some(pos) = self.files.iter().position(|f| f == name) {
            return FileId::new(pos as u32);
        }
        self.files.push(name.to_string());
        FileId::new((self.files.len() - 1) as u32)
    }

    pub fn node_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn into_files(self) -> Vec<String> {
        self.files
    }

    pub fn variable(&mut self, loc: Loc, name: impl Into<String>) -> Variable {
        Variable {
            loc,
            node_id: self.node_id(),
            name: name.into(),
            indices: None,
        }
    }

    pub fn expr(&mut self, loc: Loc, kind: ExprKind) -> Expression {
        Expression {
            loc,
            node_id: self.node_id(),
            kind,
            cast_type: None,
            chain: None,
        }
    }

    pub fn variable_expr(&mut self, loc: Loc, name: impl Into<String>) -> Expression {
        let var = self.variable(loc, name);
        self.expr(loc, ExprKind::Variable(var))
    }

    pub fn int_lit(&mut self, loc: Loc, value: i64) -> Expression {
        self.expr(loc, ExprKind::IntLit(value))
    }

    pub fn float_lit(&mut self, loc: Loc, value: f64) -> Expression {
        self.expr(loc, ExprKind::FloatLit(value))
    }

    pub fn method_call(
        &mut self,
        loc: Loc,
        kind: CallKind,
        receiver: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Expression>,
    ) -> Expression {
        let call = MethodCall {
            loc,
            node_id: self.node_id(),
            kind,
            receiver_name: receiver.into(),
            method_name: method.into(),
            args,
            variable: None,
            concrete_types: Vec::new(),
            is_func_reference: false,
            func_return: None,
            array_type: None,
        };
        self.expr(loc, ExprKind::MethodCall(call))
    }

    pub fn assignment(
        &mut self,
        loc: Loc,
        variable: Variable,
        op: AssignOp,
        expr: Expression,
    ) -> Assignment {
        Assignment {
            loc,
            node_id: self.node_id(),
            variable,
            op,
            expr,
        }
    }

    pub fn return_stmt(&mut self, loc: Loc, expr: Option<Expression>) -> Statement {
        Statement::Return(ReturnStatement {
            loc,
            node_id: self.node_id(),
            expr,
        })
    }
}
