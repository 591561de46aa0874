//! Compile-session driver: the seam the REPL shell builds on.
//!
//! A session owns the linked-library index and the optimization level the
//! shell selected (`-lib`, `-opt`). Each `compile` call runs contextual
//! analysis over one parsed program and reports either the annotated
//! program or rendered diagnostics; the shell maps a failed outcome to a
//! nonzero exit code.

use obi_frontend::ast::Program;
use obi_sema::{AnalyzedProgram, Analyzer, Diagnostic, LibraryIndex};

/// Optimization level selected with `-opt s0..s3`; recorded for the code
/// generator, which sits downstream of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    S0,
    S1,
    S2,
    #[default]
    S3,
}

impl std::str::FromStr for OptLevel {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "s0" => Ok(OptLevel::S0),
            "s1" => Ok(OptLevel::S1),
            "s2" => Ok(OptLevel::S2),
            "s3" => Ok(OptLevel::S3),
            other => Err(format!("unknown optimization level '{other}'")),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    library: LibraryIndex,
    opt_level: OptLevel,
}

impl Session {
    pub fn new(library: LibraryIndex, opt_level: OptLevel) -> Self {
        Session { library, opt_level }
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Analyze one parsed program against the linked libraries. The session
    /// is consumed with the program: the analyzer owns both for the pass.
    pub fn compile(self, program: Program) -> CompileOutcome {
        tracing::debug!(file = %program.file_name, opt = ?self.opt_level, "compile");
        match Analyzer::new(program, self.library).analyze() {
            Ok(analyzed) => CompileOutcome {
                analyzed: Some(analyzed),
                diagnostics: Vec::new(),
            },
            Err(diagnostics) => CompileOutcome {
                analyzed: None,
                diagnostics,
            },
        }
    }
}

#[derive(Debug)]
pub struct CompileOutcome {
    /// The validated, annotated program; `None` when any error was
    /// reported.
    pub analyzed: Option<AnalyzedProgram>,
    /// Line-ordered diagnostics, at most one per source line.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutcome {
    pub fn is_ok(&self) -> bool {
        self.analyzed.is_some()
    }

    /// Shell exit code: nonzero on compilation error.
    pub fn exit_code(&self) -> i32 {
        if self.is_ok() {
            0
        } else {
            1
        }
    }

    /// `file:line: message` lines, in order.
    pub fn render_diagnostics(&self) -> Vec<String> {
        self.diagnostics.iter().map(|d| d.to_string()).collect()
    }
}

/// Driver-side logging, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
