pub mod compiler;
pub mod engine;
pub mod lexer;
pub mod parser;
pub mod types;

use ariadne::{Color, Label, Report, ReportKind, Source};

pub use engine::error::{ErrorKind, ExecResult, ScriptError};
pub use engine::native::{FieldRefresh, NativeMethod};
pub use engine::persist::{load_invocation, save_invocation, PersistError};
pub use engine::ty::{TypeDesc, TypeKind};
pub use engine::value::{Instance, Value};
pub use engine::{ClassId, Engine, FuncId, Invocation, Outcome, ProgramId};

/// A rendered-error handle for hosts that want pretty output rather
/// than the raw `ScriptError`.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub span: std::ops::Range<usize>,
}

impl From<&ScriptError> for Diagnostic {
    fn from(err: &ScriptError) -> Self {
        Diagnostic {
            message: err.message(),
            span: err.span.clone(),
        }
    }
}

impl Diagnostic {
    pub fn format(&self, path: &str, src: &str, kind: &str, code: usize) -> String {
        let mut buffer = Vec::new();
        Report::build(ReportKind::Error, (path, self.span.clone()))
            .with_config(ariadne::Config::new().with_index_type(ariadne::IndexType::Byte))
            .with_code(code)
            .with_message(kind)
            .with_label(
                Label::new((path, self.span.clone()))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(src)), &mut buffer)
            .ok();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

/// Render every error of a failed compile against its source text.
pub fn format_errors(errors: &[ScriptError], path: &str, src: &str) -> String {
    let mut out = String::new();
    for (i, err) in errors.iter().enumerate() {
        out.push_str(&Diagnostic::from(err).format(path, src, "Compilation failed", i + 1));
    }
    out
}
