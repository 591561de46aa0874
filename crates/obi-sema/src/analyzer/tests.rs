use super::*;
use crate::errors::SemanticError;
use crate::library::LibraryIndex;
use crate::resolution::{BoxingRewrite, ResolvedCall};
use obi_frontend::ast::*;
use obi_frontend::types::{GenericParam, Type};

// =============================================================================
// Program scaffolding
// =============================================================================

struct Build {
    b: TreeBuilder,
    file: FileId,
    classes: Vec<Class>,
    enums: Vec<Enum>,
    aliases: Vec<Alias>,
    symbols: obi_frontend::symbols::SymbolTableManager,
    uses: Vec<String>,
    is_lib: bool,
    parsed_counter: u32,
}

impl Build {
    fn new() -> Self {
        let mut b = TreeBuilder::new();
        let file = b.file("test.obs");
        Build {
            b,
            file,
            classes: Vec::new(),
            enums: Vec::new(),
            aliases: Vec::new(),
            symbols: obi_frontend::symbols::SymbolTableManager::new(),
            uses: vec!["System".to_string()],
            is_lib: false,
            parsed_counter: 0,
        }
    }

    fn loc(&mut self, line: u32) -> Loc {
        Loc {
            file: self.file,
            line,
        }
    }

    fn class(&mut self, name: &str) -> ClassId {
        let id = ClassId::new(self.classes.len() as u32);
        let loc = self.loc(1);
        self.classes.push(Class {
            loc,
            id,
            name: name.to_string(),
            bundle_name: String::new(),
            parent_name: String::new(),
            parent: None,
            lib_parent: None,
            interface_names: Vec::new(),
            interfaces: Vec::new(),
            lib_interfaces: Vec::new(),
            children: Vec::new(),
            generics: Vec::new(),
            methods: Vec::new(),
            method_index: Default::default(),
            statements: Vec::new(),
            is_interface: false,
            is_virtual: false,
            is_public: true,
            is_called: false,
        });
        id
    }

    fn interface(&mut self, name: &str) -> ClassId {
        let id = self.class(name);
        self.classes[id.index()].is_interface = true;
        self.classes[id.index()].is_virtual = true;
        id
    }

    fn method_full(
        &mut self,
        class_id: ClassId,
        short: &str,
        kind: MethodKind,
        is_static: bool,
        is_virtual: bool,
        ret: Type,
        params: Vec<(&str, Type)>,
        body: Vec<Statement>,
    ) -> MethodIdx {
        let class_name = self.classes[class_id.index()].name.clone();
        let name = format!("{class_name}:{short}");
        let parsed_name = format!("{name}#{}", self.parsed_counter);
        self.parsed_counter += 1;

        let mut declarations = Vec::with_capacity(params.len());
        for (pname, pty) in params {
            let entry = self
                .symbols
                .bind(
                    &parsed_name,
                    format!("{name}:{pname}"),
                    pty,
                    true,
                    false,
                )
                .expect("unique parameter name");
            let loc = self.loc(2);
            declarations.push(Declaration {
                loc,
                node_id: self.b.node_id(),
                entry,
                assignment: None,
            });
        }

        let loc = self.loc(2);
        self.classes[class_id.index()].methods.push(Method {
            loc,
            name,
            short_name: short.to_string(),
            parsed_name,
            encoded_name: String::new(),
            kind,
            is_static,
            is_virtual,
            is_native: false,
            is_lambda: false,
            return_type: ret,
            declarations,
            statements: body,
            original: None,
            and_or: false,
            id: -1,
        });
        self.classes[class_id.index()].methods.len() - 1
    }

    fn static_method(
        &mut self,
        class_id: ClassId,
        short: &str,
        ret: Type,
        params: Vec<(&str, Type)>,
        body: Vec<Statement>,
    ) -> MethodIdx {
        self.method_full(
            class_id,
            short,
            MethodKind::Public,
            true,
            false,
            ret,
            params,
            body,
        )
    }

    /// Attach a default value to a trailing parameter.
    fn default_param(&mut self, class_id: ClassId, method_idx: MethodIdx, pname: &str, value: i64) {
        let (method_name, entry) = {
            let method = &self.classes[class_id.index()].methods[method_idx];
            let qualified = format!("{}:{pname}", method.name);
            let declaration = method
                .declarations
                .iter()
                .find(|d| self.symbols.entry(d.entry).name == qualified)
                .expect("parameter exists");
            (method.name.clone(), declaration.entry)
        };
        let _ = method_name;
        let loc = self.loc(3);
        let variable = self.b.variable(loc, pname);
        self.b.node_id(); // keep ids distinct from the variable's
        let value = self.b.int_lit(loc, value);
        let assignment = self.b.assignment(loc, variable, AssignOp::Assign, value);
        let declaration = self.classes[class_id.index()].methods[method_idx]
            .declarations
            .iter_mut()
            .find(|d| d.entry == entry)
            .unwrap();
        declaration.assignment = Some(Box::new(assignment));
    }

    /// A `Main(args)` so entry-point validation passes.
    fn main_method(&mut self, class_id: ClassId, body: Vec<Statement>) -> MethodIdx {
        self.static_method(
            class_id,
            "Main",
            Type::nil(),
            vec![("args", Type::class("System.String").with_dim(1))],
            body,
        )
    }

    /// A local declaration in an existing method's scope.
    fn local(
        &mut self,
        class_id: ClassId,
        method_idx: MethodIdx,
        name: &str,
        ty: Type,
    ) -> Declaration {
        let (method_name, parsed_name) = {
            let method = &self.classes[class_id.index()].methods[method_idx];
            (method.name.clone(), method.parsed_name.clone())
        };
        let entry = self
            .symbols
            .bind(&parsed_name, format!("{method_name}:{name}"), ty, true, false)
            .expect("unique local name");
        let loc = self.loc(4);
        Declaration {
            loc,
            node_id: self.b.node_id(),
            entry,
            assignment: None,
        }
    }

    fn call(&mut self, method: &str, args: Vec<Expression>) -> Expression {
        let loc = self.loc(5);
        self.b
            .method_call(loc, CallKind::Method, method, "", args)
    }

    fn new_call(&mut self, class: &str, concrete: Vec<Type>, args: Vec<Expression>) -> Expression {
        let loc = self.loc(5);
        let mut expr = self.b.method_call(loc, CallKind::New, class, "New", args);
        if let ExprKind::MethodCall(call) = &mut expr.kind {
            call.concrete_types = concrete;
        }
        expr
    }

    fn assign(&mut self, class_id: ClassId, method_idx: MethodIdx, name: &str, expr: Expression) -> Statement {
        let _ = (class_id, method_idx);
        let loc = self.loc(6);
        let variable = self.b.variable(loc, name);
        Statement::Assignment(self.b.assignment(loc, variable, AssignOp::Assign, expr))
    }

    fn finish(self) -> Program {
        let class_ids = self.classes.iter().map(|c| c.id).collect();
        let enum_ids = self.enums.iter().map(|e| e.id).collect();
        Program {
            file_name: "test.obs".to_string(),
            files: self.b.into_files(),
            uses: self.uses,
            bundles: vec![Bundle {
                name: String::new(),
                classes: class_ids,
                enums: enum_ids,
            }],
            classes: self.classes,
            enums: self.enums,
            aliases: self.aliases,
            symbols: self.symbols,
            is_lib: self.is_lib,
            is_web: false,
        }
    }
}

/// The minimal `System` bundle every test links against.
fn system_library() -> LibraryIndex {
    let mut lib = LibraryIndex::new();
    lib.add_bundle("System");

    let base = lib.add_class(
        "System.Base",
        "System",
        "",
        vec![],
        vec![],
        false,
        false,
        true,
    );
    lib.add_method(
        base,
        "New",
        MethodKind::NewPublic,
        false,
        false,
        vec![],
        Type::class("System.Base"),
    );

    for name in [
        "System.Bool",
        "System.Byte",
        "System.Char",
        "System.Int",
        "System.Float",
    ] {
        lib.add_class(name, "System", "System.Base", vec![], vec![], false, false, true);
    }

    let string = lib.add_class(
        "System.String",
        "System",
        "System.Base",
        vec![],
        vec![],
        false,
        false,
        true,
    );
    lib.add_method(
        string,
        "New",
        MethodKind::NewPublic,
        false,
        false,
        vec![],
        Type::class("System.String"),
    );
    lib.add_method(
        string,
        "Size",
        MethodKind::Public,
        false,
        false,
        vec![],
        Type::int(),
    );

    for (holder, primitive) in [
        ("System.BoolHolder", Type::bool_type()),
        ("System.ByteHolder", Type::byte()),
        ("System.CharHolder", Type::char_type()),
        ("System.IntHolder", Type::int()),
        ("System.FloatHolder", Type::float()),
    ] {
        let id = lib.add_class(holder, "System", "System.Base", vec![], vec![], false, false, true);
        lib.add_method(
            id,
            "New",
            MethodKind::NewPublic,
            false,
            false,
            vec![primitive.clone()],
            Type::class(holder),
        );
        lib.add_method(id, "Get", MethodKind::Public, false, false, vec![], primitive);
    }

    lib
}

fn analyze(program: Program) -> Result<crate::resolution::AnalyzedProgram, Vec<crate::errors::Diagnostic>> {
    Analyzer::new(program, system_library()).analyze()
}

fn has_error(
    result: &Result<crate::resolution::AnalyzedProgram, Vec<crate::errors::Diagnostic>>,
    predicate: impl Fn(&SemanticError) -> bool,
) -> bool {
    match result {
        Ok(_) => false,
        Err(diags) => diags.iter().any(|d| predicate(&d.error)),
    }
}

// =============================================================================
// Default parameters (S1)
// =============================================================================

fn default_param_program(call_arg_count: usize) -> Program {
    let mut build = Build::new();
    let app = build.class("App");

    let a_var = {
        let loc = build.loc(7);
        build.b.variable_expr(loc, "a")
    };
    let ret_a = {
        let loc = build.loc(7);
        build.b.return_stmt(loc, Some(a_var))
    };
    let f = build.static_method(
        app,
        "F",
        Type::int(),
        vec![("a", Type::int()), ("b", Type::int()), ("c", Type::int())],
        vec![ret_a],
    );
    build.default_param(app, f, "b", 3);
    build.default_param(app, f, "c", 4);

    let args: Vec<Expression> = (0..call_arg_count)
        .map(|i| {
            let loc = build.loc(8);
            build.b.int_lit(loc, i as i64)
        })
        .collect();
    let call = build.call("F", args);
    build.main_method(app, vec![Statement::Expression(call)]);
    build.finish()
}

#[test]
fn default_parameters_generate_one_trampoline_per_prefix() {
    let result = analyze(default_param_program(1)).expect("F(1) resolves");
    let app = &result.program.classes[0];
    let signatures: Vec<&str> = app
        .methods
        .iter()
        .filter(|m| m.short_name == "F")
        .map(|m| m.encoded_name.as_str())
        .collect();
    assert!(signatures.contains(&"App:F:i,"));
    assert!(signatures.contains(&"App:F:i,i,"));
    assert!(signatures.contains(&"App:F:i,i,i,"));
    assert_eq!(signatures.len(), 3);
}

#[test]
fn default_parameter_calls_resolve_for_every_prefix() {
    for count in 1..=3 {
        analyze(default_param_program(count))
            .unwrap_or_else(|e| panic!("F with {count} args: {e:?}"));
    }
}

#[test]
fn zero_argument_call_fails_when_first_parameter_has_no_default() {
    let result = analyze(default_param_program(0));
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::NoMatchingOverload { name, .. } if name == "F"
    )));
}

#[test]
fn trampolines_point_at_their_original() {
    let result = analyze(default_param_program(1)).unwrap();
    let app = &result.program.classes[0];
    let alts = app.methods.iter().filter(|m| m.is_alt()).count();
    assert_eq!(alts, 2);
}

#[test]
fn non_trailing_defaults_are_rejected() {
    let mut build = Build::new();
    let app = build.class("App");
    let f = build.static_method(
        app,
        "F",
        Type::nil(),
        vec![("a", Type::int()), ("b", Type::int()), ("c", Type::int())],
        vec![],
    );
    // default on `a` and `c` but not `b`
    build.default_param(app, f, "a", 1);
    build.default_param(app, f, "c", 4);
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::DefaultParamNotTrailing
    )));
}

#[test]
fn virtual_methods_may_not_have_defaults() {
    let mut build = Build::new();
    let iface = build.interface("Iter");
    let next = build.method_full(
        iface,
        "Next",
        MethodKind::Public,
        false,
        true,
        Type::int(),
        vec![("n", Type::int())],
        vec![],
    );
    build.default_param(iface, next, "n", 0);
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::DefaultParamOnVirtual
    )));
}

// =============================================================================
// Interface conformance (S2)
// =============================================================================

fn iter_interface(build: &mut Build) -> ClassId {
    let iface = build.interface("Iter");
    build.method_full(
        iface,
        "Next",
        MethodKind::Public,
        false,
        true,
        Type::int(),
        vec![],
        vec![],
    );
    iface
}

#[test]
fn missing_interface_method_is_reported() {
    let mut build = Build::new();
    iter_interface(&mut build);
    let list = build.class("List");
    build.classes[list.index()].interface_names = vec!["Iter".to_string()];
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::InterfaceNotImplemented { name } if name == "Iter"
    )));
}

#[test]
fn static_implementation_does_not_satisfy_a_virtual_method() {
    let mut build = Build::new();
    iter_interface(&mut build);
    let list = build.class("List");
    build.classes[list.index()].interface_names = vec!["Iter".to_string()];
    let zero = {
        let loc = build.loc(9);
        build.b.int_lit(loc, 0)
    };
    let ret = {
        let loc = build.loc(9);
        build.b.return_stmt(loc, Some(zero))
    };
    build.static_method(list, "Next", Type::int(), vec![], vec![ret]);
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::VirtualMethodMismatch { name } if name == "Iter"
    )));
}

#[test]
fn conforming_implementation_passes() {
    let mut build = Build::new();
    iter_interface(&mut build);
    let list = build.class("List");
    build.classes[list.index()].interface_names = vec!["Iter".to_string()];
    let zero = {
        let loc = build.loc(9);
        build.b.int_lit(loc, 0)
    };
    let ret = {
        let loc = build.loc(9);
        build.b.return_stmt(loc, Some(zero))
    };
    build.method_full(
        list,
        "Next",
        MethodKind::Public,
        false,
        false,
        Type::int(),
        vec![],
        vec![ret],
    );
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn interface_methods_must_be_virtual() {
    let mut build = Build::new();
    let iface = build.interface("Iter");
    build.method_full(
        iface,
        "Next",
        MethodKind::Public,
        false,
        false,
        Type::int(),
        vec![],
        vec![],
    );
    let list = build.class("List");
    build.classes[list.index()].interface_names = vec!["Iter".to_string()];
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::InterfaceMethodNotVirtual
    )));
}

// =============================================================================
// Generic backing interfaces (S3)
// =============================================================================

fn generic_box_program(concrete_implements: bool) -> Program {
    let mut build = Build::new();

    let comparable = build.interface("Comparable");
    build.method_full(
        comparable,
        "Compare",
        MethodKind::Public,
        false,
        true,
        Type::int(),
        vec![("o", Type::class("Comparable"))],
        vec![],
    );

    let boxed = build.class("Box");
    build.classes[boxed.index()].generics = vec![GenericParam {
        name: "T".to_string(),
        backing: Some(Type::class("Comparable")),
    }];
    build.method_full(
        boxed,
        "New",
        MethodKind::NewPublic,
        false,
        false,
        Type::class("Box"),
        vec![],
        vec![],
    );

    let thing = build.class("Thing");
    if concrete_implements {
        build.classes[thing.index()].interface_names = vec!["Comparable".to_string()];
        let zero = {
            let loc = build.loc(9);
            build.b.int_lit(loc, 0)
        };
        let ret = {
            let loc = build.loc(9);
            build.b.return_stmt(loc, Some(zero))
        };
        build.method_full(
            thing,
            "Compare",
            MethodKind::Public,
            false,
            false,
            Type::int(),
            vec![("o", Type::class("Comparable"))],
            vec![ret],
        );
    }

    let app = build.class("App");
    let construction = build.new_call("Box", vec![Type::class("Thing")], vec![]);
    build.main_method(app, vec![Statement::Expression(construction)]);
    build.finish()
}

#[test]
fn concrete_type_must_satisfy_its_backing_interface() {
    let result = analyze(generic_box_program(false));
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::IncompatibleBacking { concrete, backing }
            if concrete == "Thing" && backing == "Comparable"
    )));
}

#[test]
fn implementing_concrete_type_is_accepted() {
    let result = analyze(generic_box_program(true));
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn unqualified_generic_construction_is_rejected() {
    let mut build = Build::new();
    let boxed = build.class("Box");
    build.classes[boxed.index()].generics = vec![GenericParam {
        name: "T".to_string(),
        backing: None,
    }];
    build.method_full(
        boxed,
        "New",
        MethodKind::NewPublic,
        false,
        false,
        Type::class("Box"),
        vec![],
        vec![],
    );
    let app = build.class("App");
    let construction = build.new_call("Box", vec![], vec![]);
    build.main_method(app, vec![Statement::Expression(construction)]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::UnqualifiedGenericInstance { name } if name == "Box"
    )));
}

// =============================================================================
// Lambda inference (S4)
// =============================================================================

#[test]
fn lambda_parameters_infer_from_the_callee_signature() {
    let mut build = Build::new();
    let app = build.class("App");

    // Map(f : (Int) ~ Int) ~ Int
    let ten = {
        let loc = build.loc(10);
        build.b.int_lit(loc, 10)
    };
    let ret_ten = {
        let loc = build.loc(10);
        build.b.return_stmt(loc, Some(ten))
    };
    build.static_method(
        app,
        "Map",
        Type::int(),
        vec![("f", Type::func(vec![Type::int()], Type::int()))],
        vec![ret_ten],
    );

    // \x => x + 1
    let lambda_name = "App:#lambda0".to_string();
    let lambda_parsed = format!("{lambda_name}#p");
    let x_entry = build
        .symbols
        .bind(
            &lambda_parsed,
            format!("{lambda_name}:x"),
            Type::var(),
            true,
            false,
        )
        .unwrap();
    let loc = build.loc(11);
    let x_decl = Declaration {
        loc,
        node_id: build.b.node_id(),
        entry: x_entry,
        assignment: None,
    };
    let x_var = build.b.variable_expr(loc, "x");
    let one = build.b.int_lit(loc, 1);
    let body_expr = build.b.expr(
        loc,
        ExprKind::Calc(Box::new(CalcExpression {
            op: CalcOp::Add,
            left: x_var,
            right: one,
        })),
    );
    let lambda_ret = build.b.return_stmt(loc, Some(body_expr));
    let lambda_method = Method {
        loc,
        name: lambda_name,
        short_name: "#lambda0".to_string(),
        parsed_name: lambda_parsed,
        encoded_name: String::new(),
        kind: MethodKind::Private,
        is_static: true,
        is_virtual: false,
        is_native: false,
        is_lambda: true,
        return_type: Type::var(),
        declarations: vec![x_decl],
        statements: vec![lambda_ret],
        original: None,
        and_or: false,
        id: -1,
    };
    let lambda_expr = build.b.expr(
        loc,
        ExprKind::Lambda(Lambda {
            loc,
            node_id: NodeId::new(90_000),
            alias_name: String::new(),
            lambda_type: None,
            method: Box::new(lambda_method),
        }),
    );

    let call = build.call("Map", vec![lambda_expr]);
    let call_node = call.node_id;
    build.main_method(app, vec![Statement::Expression(call)]);

    let result = analyze(build.finish()).expect("lambda call resolves");

    // the call bound to Map
    assert!(matches!(
        result.resolutions.get(&call_node),
        Some(ResolvedCall::Method { .. })
    ));
    // the lambda parameter was typed Int from the callee's signature
    let x = result
        .program
        .symbols
        .entry(x_entry);
    assert_eq!(x.ty.kind, obi_frontend::types::TypeKind::Int);
    // the hoisted lambda method landed on the class with an Int return
    let hoisted = result.program.classes[0]
        .methods
        .iter()
        .find(|m| m.is_lambda)
        .expect("lambda hoisted");
    assert_eq!(hoisted.return_type.kind, obi_frontend::types::TypeKind::Int);
}

// =============================================================================
// Cast matrix (S5)
// =============================================================================

#[test]
fn float_into_int_gets_an_implicit_narrowing_cast() {
    let mut build = Build::new();
    let app = build.class("App");
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "n", Type::int());
    let value = {
        let loc = build.loc(12);
        build.b.float_lit(loc, 3.5)
    };
    let value_node = value.node_id;
    let assign = build.assign(app, main, "n", value);
    build.classes[app.index()].methods[main]
        .statements
        .extend([Statement::Declaration(decl), assign]);

    let result = analyze(build.finish()).expect("narrowing is implicit");
    let cast = result.expression_data.cast_type(value_node).expect("cast recorded");
    assert_eq!(cast.kind, obi_frontend::types::TypeKind::Int);
}

#[test]
fn int_into_float_requires_an_explicit_cast() {
    let mut build = Build::new();
    let app = build.class("App");
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "f", Type::float());
    let value = {
        let loc = build.loc(12);
        build.b.int_lit(loc, 3)
    };
    let assign = build.assign(app, main, "f", value);
    build.classes[app.index()].methods[main]
        .statements
        .extend([Statement::Declaration(decl), assign]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::InvalidCast { .. }
    )));
}

#[test]
fn explicitly_cast_int_assigns_into_float() {
    let mut build = Build::new();
    let app = build.class("App");
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "f", Type::float());
    let mut value = {
        let loc = build.loc(12);
        build.b.int_lit(loc, 3)
    };
    value.cast_type = Some(Type::float());
    let assign = build.assign(app, main, "f", value);
    build.classes[app.index()].methods[main]
        .statements
        .extend([Statement::Declaration(decl), assign]);

    assert!(analyze(build.finish()).is_ok());
}

#[test]
fn library_construction_assigns_into_a_class_variable() {
    let mut build = Build::new();
    let app = build.class("App");
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "s", Type::class("System.String"));
    let construction = build.new_call("System.String", vec![], vec![]);
    let call_node = match &construction.kind {
        ExprKind::MethodCall(call) => call.node_id,
        _ => unreachable!(),
    };
    let assign = build.assign(app, main, "s", construction);
    build.classes[app.index()].methods[main]
        .statements
        .extend([Statement::Declaration(decl), assign]);

    let result = analyze(build.finish()).expect("library construction resolves");
    assert!(matches!(
        result.resolutions.get(&call_node),
        Some(ResolvedCall::LibraryMethod(_))
    ));
}

// =============================================================================
// Overload selection laws
// =============================================================================

fn overload_program(int_first: bool) -> (Program, NodeId) {
    let mut build = Build::new();
    let app = build.class("App");

    let add = |build: &mut Build, ty: Type| {
        let loc = build.loc(13);
        let zero = build.b.int_lit(loc, 0);
        let ret = build.b.return_stmt(loc, Some(zero));
        (ty, ret)
    };
    if int_first {
        let (ty, ret) = add(&mut build, Type::int());
        build.static_method(app, "G", Type::int(), vec![("v", ty)], vec![ret]);
        let (ty, ret) = add(&mut build, Type::float());
        build.static_method(app, "G", Type::int(), vec![("v", ty)], vec![ret]);
    } else {
        let (ty, ret) = add(&mut build, Type::float());
        build.static_method(app, "G", Type::int(), vec![("v", ty)], vec![ret]);
        let (ty, ret) = add(&mut build, Type::int());
        build.static_method(app, "G", Type::int(), vec![("v", ty)], vec![ret]);
    }

    let arg = {
        let loc = build.loc(14);
        build.b.int_lit(loc, 7)
    };
    let call = build.call("G", vec![arg]);
    let call_node = call.node_id;
    build.main_method(app, vec![Statement::Expression(call)]);
    (build.finish(), call_node)
}

#[test]
fn exact_candidate_wins_irrespective_of_declaration_order() {
    for int_first in [true, false] {
        let (program, call_node) = overload_program(int_first);
        let result = analyze(program).expect("overload resolves");
        let Some(ResolvedCall::Method { class, method }) = result.resolutions.get(&call_node)
        else {
            panic!("expected a program method resolution");
        };
        let selected = &result.program.classes[class.index()].methods[*method];
        assert_eq!(selected.encoded_name, "App:G:i,", "int_first={int_first}");
    }
}

#[test]
fn autoboxing_a_primitive_binds_the_holder_overload() {
    let mut build = Build::new();
    let app = build.class("App");
    build.static_method(
        app,
        "G",
        Type::nil(),
        vec![("h", Type::class("System.IntHolder"))],
        vec![],
    );
    let arg = {
        let loc = build.loc(15);
        build.b.int_lit(loc, 5)
    };
    let arg_node = arg.node_id;
    let call = build.call("G", vec![arg]);
    let call_node = call.node_id;
    build.main_method(app, vec![Statement::Expression(call)]);

    let result = analyze(build.finish()).expect("autoboxed call resolves");
    assert!(matches!(
        result.resolutions.get(&call_node),
        Some(ResolvedCall::Method { .. })
    ));
    assert_eq!(
        result.boxing.get(&arg_node),
        Some(&BoxingRewrite::Construct {
            holder: "System.IntHolder".to_string()
        })
    );
}

#[test]
fn holder_unboxes_into_a_primitive_parameter() {
    let mut build = Build::new();
    let app = build.class("App");
    build.static_method(app, "H", Type::nil(), vec![("i", Type::int())], vec![]);
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "h", Type::class("System.IntHolder"));
    let arg = {
        let loc = build.loc(16);
        build.b.variable_expr(loc, "h")
    };
    let arg_node = arg.node_id;
    let call = build.call("H", vec![arg]);
    build.classes[app.index()].methods[main]
        .statements
        .extend([Statement::Declaration(decl), Statement::Expression(call)]);

    let result = analyze(build.finish()).expect("unboxed call resolves");
    assert_eq!(result.boxing.get(&arg_node), Some(&BoxingRewrite::Unwrap));
}

// =============================================================================
// Return paths and control flow
// =============================================================================

fn if_return_program(with_else: bool) -> Program {
    let mut build = Build::new();
    let app = build.class("App");

    let loc = build.loc(17);
    let cond = build.b.expr(loc, ExprKind::BoolLit(true));
    let one = build.b.int_lit(loc, 1);
    let two = build.b.int_lit(loc, 2);
    let then_ret = build.b.return_stmt(loc, Some(one));
    let else_ret = build.b.return_stmt(loc, Some(two));
    let if_stmt = Statement::If(IfStatement {
        loc,
        cond,
        then_block: vec![then_ret],
        next: None,
        else_block: with_else.then(|| vec![else_ret]),
    });

    build.static_method(app, "Pick", Type::int(), vec![], vec![if_stmt]);
    build.main_method(app, vec![]);
    build.finish()
}

#[test]
fn every_branch_must_return() {
    assert!(analyze(if_return_program(true)).is_ok());
    let result = analyze(if_return_program(false));
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::NonReturningPath
    )));
}

#[test]
fn select_requires_other_to_return() {
    let mut build = Build::new();
    let app = build.class("App");
    let loc = build.loc(18);
    let operand = build.b.int_lit(loc, 1);
    let label = build.b.int_lit(loc, 0);
    let one = build.b.int_lit(loc, 1);
    let arm_ret = build.b.return_stmt(loc, Some(one));
    let node_id = build.b.node_id();
    let select = Statement::Select(SelectStatement {
        loc,
        node_id,
        operand,
        arms: vec![SelectArm {
            labels: vec![label],
            body: vec![arm_ret],
        }],
        other: None,
    });
    build.static_method(app, "Pick", Type::int(), vec![], vec![select]);
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::NonReturningPath
    )));
}

#[test]
fn duplicate_select_labels_are_reported() {
    let mut build = Build::new();
    let app = build.class("App");
    let loc = build.loc(19);
    let operand = build.b.int_lit(loc, 1);
    let label_a = build.b.int_lit(loc, 4);
    let label_b = build.b.int_lit(loc, 4);
    let node_id = build.b.node_id();
    let select = Statement::Select(SelectStatement {
        loc,
        node_id,
        operand,
        arms: vec![
            SelectArm {
                labels: vec![label_a],
                body: vec![],
            },
            SelectArm {
                labels: vec![label_b],
                body: vec![],
            },
        ],
        other: Some(vec![]),
    });
    build.main_method(app, vec![select]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::DuplicateSelectLabel
    )));
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let mut build = Build::new();
    let app = build.class("App");
    let loc = build.loc(20);
    build.main_method(app, vec![Statement::Break(loc)]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::BreakOutsideLoop
    )));
}

#[test]
fn only_one_leaving_block_per_method() {
    let mut build = Build::new();
    let app = build.class("App");
    let loc = build.loc(21);
    build.main_method(
        app,
        vec![
            Statement::Leaving(LeavingStatement { loc, body: vec![] }),
            Statement::Leaving(LeavingStatement { loc, body: vec![] }),
        ],
    );

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::MultipleLeaving
    )));
}

// =============================================================================
// Structure and naming
// =============================================================================

#[test]
fn field_shadowing_a_parent_field_is_reported() {
    let mut build = Build::new();
    let parent = build.class("Parent");
    let child = build.class("Child");
    build.classes[child.index()].parent_name = "Parent".to_string();

    for (class_id, class_name) in [(parent, "Parent"), (child, "Child")] {
        let entry = build
            .symbols
            .bind(
                class_name,
                format!("{class_name}:count"),
                Type::int(),
                false,
                false,
            )
            .unwrap();
        let loc = build.loc(22);
        let declaration = Declaration {
            loc,
            node_id: build.b.node_id(),
            entry,
            assignment: None,
        };
        build.classes[class_id.index()]
            .statements
            .push(Statement::Declaration(declaration));
    }

    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::DuplicateParentEntry { name } if name == "count"
    )));
}

#[test]
fn undefined_use_bundle_is_reported() {
    let mut build = Build::new();
    build.uses.push("Collections.Wild".to_string());
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::BundleNotDefined { name } if name == "Collections.Wild"
    )));
}

#[test]
fn missing_main_is_reported() {
    let mut build = Build::new();
    build.class("App");
    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(e, SemanticError::MainNotDefined)));
}

#[test]
fn libraries_may_not_define_main() {
    let mut build = Build::new();
    build.is_lib = true;
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(e, SemanticError::MainInLibrary)));
}

#[test]
fn classes_cannot_derive_from_interfaces() {
    let mut build = Build::new();
    iter_interface(&mut build);
    let list = build.class("List");
    build.classes[list.index()].parent_name = "Iter".to_string();
    let app = build.class("App");
    build.main_method(app, vec![]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::InheritFromInterfaceOrGeneric { .. }
    )));
}

#[test]
fn encoded_names_are_deterministic_across_runs() {
    let collect = || {
        let result = analyze(default_param_program(1)).unwrap();
        let mut names: Vec<String> = result.program.classes[0]
            .methods
            .iter()
            .map(|m| m.encoded_name.clone())
            .collect();
        names.sort();
        names
    };
    assert_eq!(collect(), collect());
}

#[test]
fn nested_aliases_are_rejected() {
    let mut build = Build::new();
    let loc = build.loc(23);
    let mut types = rustc_hash::FxHashMap::default();
    types.insert("Apply".to_string(), Type::alias("Fn2#Other"));
    build.aliases.push(Alias {
        loc,
        name: "Fn".to_string(),
        types,
    });
    let app = build.class("App");
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "f", Type::alias("Fn#Apply"));
    build.classes[app.index()].methods[main]
        .statements
        .push(Statement::Declaration(decl));

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(e, SemanticError::NestedAlias)));
}

#[test]
fn alias_expansion_rewrites_declared_types() {
    let mut build = Build::new();
    let loc = build.loc(24);
    let mut types = rustc_hash::FxHashMap::default();
    types.insert(
        "Apply".to_string(),
        Type::func(vec![Type::int()], Type::int()),
    );
    build.aliases.push(Alias {
        loc,
        name: "Fn".to_string(),
        types,
    });
    let app = build.class("App");
    let main = build.main_method(app, vec![]);
    let decl = build.local(app, main, "f", Type::alias("Fn#Apply"));
    let entry = decl.entry;
    build.classes[app.index()].methods[main]
        .statements
        .push(Statement::Declaration(decl));

    let result = analyze(build.finish()).expect("alias resolves");
    assert_eq!(
        result.program.symbols.entry(entry).ty.kind,
        obi_frontend::types::TypeKind::Func
    );
}

#[test]
fn every_call_site_resolves_to_exactly_one_target() {
    let result = analyze(default_param_program(2)).unwrap();
    // one resolution per analyzed call node, each with a concrete target
    assert!(!result.resolutions.is_empty());
    for resolution in result.resolutions.values() {
        match resolution {
            ResolvedCall::Method { .. }
            | ResolvedCall::LibraryMethod(_)
            | ResolvedCall::EnumItem { .. }
            | ResolvedCall::LibraryEnumItem { .. }
            | ResolvedCall::Functional { .. }
            | ResolvedCall::NewArray => {}
        }
    }
}

#[test]
fn enum_items_resolve_to_values() {
    let mut build = Build::new();
    let loc = build.loc(25);
    let enum_id = EnumId::new(0);
    build.enums.push(Enum {
        loc,
        id: enum_id,
        name: "Color".to_string(),
        items: vec![("Red".to_string(), 0), ("Green".to_string(), 1)],
    });
    let app = build.class("App");
    let item = build
        .b
        .method_call(loc, CallKind::Enum, "Color", "Green", vec![]);
    let item_node = match &item.kind {
        ExprKind::MethodCall(call) => call.node_id,
        _ => unreachable!(),
    };
    build.main_method(app, vec![Statement::Expression(item)]);

    let result = analyze(build.finish()).expect("enum reference resolves");
    assert_eq!(
        result.resolutions.get(&item_node),
        Some(&ResolvedCall::EnumItem { enum_id, value: 1 })
    );
}

#[test]
fn undefined_enum_items_are_reported() {
    let mut build = Build::new();
    let loc = build.loc(26);
    build.enums.push(Enum {
        loc,
        id: EnumId::new(0),
        name: "Color".to_string(),
        items: vec![("Red".to_string(), 0)],
    });
    let app = build.class("App");
    let item = build
        .b
        .method_call(loc, CallKind::Enum, "Color", "Purple", vec![]);
    build.main_method(app, vec![Statement::Expression(item)]);

    let result = analyze(build.finish());
    assert!(has_error(&result, |e| matches!(
        e,
        SemanticError::UndefinedEnumItem { name } if name == "Purple"
    )));
}
