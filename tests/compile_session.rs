//! End-to-end session tests: parsed program in, annotated program or
//! rendered diagnostics out.

use obi::frontend::ast::*;
use obi::frontend::symbols::SymbolTableManager;
use obi::frontend::types::Type;
use obi::sema::LibraryIndex;
use obi::{OptLevel, Session};

/// Minimal linked `System` bundle.
fn system_library() -> LibraryIndex {
    let mut lib = LibraryIndex::new();
    lib.add_bundle("System");
    let base = lib.add_class("System.Base", "System", "", vec![], vec![], false, false, true);
    lib.add_method(
        base,
        "New",
        MethodKind::NewPublic,
        false,
        false,
        vec![],
        Type::class("System.Base"),
    );
    lib.add_class(
        "System.String",
        "System",
        "System.Base",
        vec![],
        vec![],
        false,
        false,
        true,
    );
    lib
}

struct Fixture {
    builder: TreeBuilder,
    file: FileId,
    symbols: SymbolTableManager,
    classes: Vec<Class>,
}

impl Fixture {
    fn new() -> Self {
        let mut builder = TreeBuilder::new();
        let file = builder.file("session.obs");
        Fixture {
            builder,
            file,
            symbols: SymbolTableManager::new(),
            classes: Vec::new(),
        }
    }

    fn loc(&self, line: u32) -> Loc {
        Loc {
            file: self.file,
            line,
        }
    }

    fn class(&mut self, name: &str) -> ClassId {
        let id = ClassId::new(self.classes.len() as u32);
        self.classes.push(Class {
            loc: self.loc(1),
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

    fn method(
        &mut self,
        class_id: ClassId,
        short: &str,
        ret: Type,
        params: Vec<(&str, Type)>,
        body: Vec<Statement>,
    ) -> MethodIdx {
        let class_name = self.classes[class_id.index()].name.clone();
        let name = format!("{class_name}:{short}");
        let parsed_name = format!("{name}/{}", self.classes[class_id.index()].methods.len());

        let mut declarations = Vec::new();
        for (pname, pty) in params {
            let entry = self
                .symbols
                .bind(&parsed_name, format!("{name}:{pname}"), pty, true, false)
                .expect("unique parameter");
            declarations.push(Declaration {
                loc: self.loc(2),
                node_id: self.builder.node_id(),
                entry,
                assignment: None,
            });
        }

        let method_loc = self.loc(2);
        self.classes[class_id.index()].methods.push(Method {
            loc: method_loc,
            name,
            short_name: short.to_string(),
            parsed_name,
            encoded_name: String::new(),
            kind: MethodKind::Public,
            is_static: true,
            is_virtual: false,
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

    fn finish(self) -> Program {
        let class_ids = self.classes.iter().map(|c| c.id).collect();
        Program {
            file_name: "session.obs".to_string(),
            files: self.builder.into_files(),
            uses: vec!["System".to_string()],
            bundles: vec![Bundle {
                name: String::new(),
                classes: class_ids,
                enums: Vec::new(),
            }],
            classes: self.classes,
            enums: Vec::new(),
            aliases: Vec::new(),
            symbols: self.symbols,
            is_lib: false,
            is_web: false,
        }
    }
}

#[test]
fn well_formed_programs_compile_with_exit_code_zero() {
    let mut fx = Fixture::new();
    let app = fx.class("App");

    let loc = fx.loc(3);
    let arg = fx.builder.int_lit(loc, 41);
    let call = fx.builder.method_call(loc, CallKind::Method, "Inc", "", vec![arg]);
    fx.method(
        app,
        "Main",
        Type::nil(),
        vec![("args", Type::class("System.String").with_dim(1))],
        vec![Statement::Expression(call)],
    );

    let loc = fx.loc(4);
    let n = fx.builder.variable_expr(loc, "n");
    let one = fx.builder.int_lit(loc, 1);
    let sum = fx.builder.expr(
        loc,
        ExprKind::Calc(Box::new(CalcExpression {
            op: CalcOp::Add,
            left: n,
            right: one,
        })),
    );
    let ret = fx.builder.return_stmt(loc, Some(sum));
    fx.method(app, "Inc", Type::int(), vec![("n", Type::int())], vec![ret]);

    let outcome = Session::new(system_library(), OptLevel::S3).compile(fx.finish());
    assert!(outcome.is_ok(), "{:?}", outcome.diagnostics);
    assert_eq!(outcome.exit_code(), 0);

    let analyzed = outcome.analyzed.unwrap();
    assert!(analyzed.entry_point.is_some());
    // every analyzed method carries its canonical encoded name
    let app = &analyzed.program.classes[0];
    assert!(app
        .methods
        .iter()
        .any(|m| m.encoded_name == "App:Main:o.System.String*,"));
    assert!(app.methods.iter().any(|m| m.encoded_name == "App:Inc:i,"));
}

#[test]
fn failed_compiles_render_line_ordered_diagnostics() {
    let mut fx = Fixture::new();
    let app = fx.class("App");

    // Main with a bad assignment: Float variable, Int value
    let main = fx.method(
        app,
        "Main",
        Type::nil(),
        vec![("args", Type::class("System.String").with_dim(1))],
        vec![],
    );
    let (method_name, parsed_name) = {
        let method = &fx.classes[app.index()].methods[main];
        (method.name.clone(), method.parsed_name.clone())
    };
    let entry = fx
        .symbols
        .bind(
            &parsed_name,
            format!("{method_name}:f"),
            Type::float(),
            true,
            false,
        )
        .unwrap();
    let loc = fx.loc(9);
    let declaration = Statement::Declaration(Declaration {
        loc,
        node_id: fx.builder.node_id(),
        entry,
        assignment: None,
    });
    let variable = fx.builder.variable(loc, "f");
    let value = fx.builder.int_lit(loc, 2);
    let assignment = fx.builder.assignment(loc, variable, AssignOp::Assign, value);
    fx.classes[app.index()].methods[main]
        .statements
        .extend([declaration, Statement::Assignment(assignment)]);

    let outcome = Session::new(system_library(), OptLevel::S0).compile(fx.finish());
    assert!(!outcome.is_ok());
    assert_eq!(outcome.exit_code(), 1);

    let rendered = outcome.render_diagnostics();
    assert_eq!(rendered.len(), 1);
    assert!(
        rendered[0].starts_with("session.obs:9: Invalid cast with classes:"),
        "{rendered:?}"
    );
}

#[test]
fn opt_levels_parse_from_shell_flags() {
    assert_eq!("s0".parse::<OptLevel>().unwrap(), OptLevel::S0);
    assert_eq!("s3".parse::<OptLevel>().unwrap(), OptLevel::S3);
    assert!("s9".parse::<OptLevel>().is_err());
    assert_eq!(OptLevel::default(), OptLevel::S3);
}
