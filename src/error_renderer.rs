//! Error rendering using ariadne
//!
//! Compile errors carry byte spans into the source text the host parsed.
//! This module draws them against that text with a labelled snippet.

use crate::{CompileError, Error};
use ariadne::{ColorGenerator, IndexType, Label, Report, ReportKind, Source};
use std::io::Write;

/// Character set for rendering error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharSet {
    /// Use Unicode characters for rich visual output.
    #[default]
    Unicode,
    /// Use ASCII-only characters for compatibility.
    Ascii,
}

/// Configuration for error rendering.
#[derive(Debug, Clone)]
pub struct RenderConfig<'a> {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
    /// The filename to display in error messages.
    /// Defaults to "<unknown>" if not provided.
    pub filename: Option<&'a str>,
    pub charset: CharSet,
}

impl Default for RenderConfig<'_> {
    fn default() -> Self {
        Self {
            color: true,
            filename: None,
            charset: CharSet::Unicode,
        }
    }
}

/// Render an error to stderr using the default config.
///
/// # Example
/// ```no_run
/// use ember::{Environment, ExprBuilder, render_error};
/// use bumpalo::Bump;
///
/// let arena = Bump::new();
/// let env = Environment::new();
/// let b = ExprBuilder::new(&arena);
///
/// let source = "nope";
/// let expr = b.at(ember::syntax::ExprKind::Ident("nope"), ember::Span::new(0, 4));
/// if let Err(e) = ember::evaluate(&env, &arena, expr, &[]) {
///     render_error(&e, source);
/// }
/// ```
pub fn render_error(error: &Error, source: &str) {
    render_error_to(error, source, &mut std::io::stderr(), &RenderConfig::default()).ok();
}

/// Render an error to a writer with the given configuration.
///
/// Resolution errors are drawn against `source`. Internal compiler errors
/// and runtime errors have no location and are written as a single line.
pub fn render_error_to(
    error: &Error,
    source: &str,
    writer: &mut dyn Write,
    config: &RenderConfig,
) -> std::io::Result<()> {
    let filename = config.filename.unwrap_or("<unknown>");

    match error {
        Error::Compile(CompileError::Resolution(resolution)) => match resolution.span {
            Some(span) => {
                let message = resolution.message();
                let mut colors = ColorGenerator::new();
                colors.next(); // Skip the first color.

                let ariadne_charset = match config.charset {
                    CharSet::Unicode => ariadne::CharSet::Unicode,
                    CharSet::Ascii => ariadne::CharSet::Ascii,
                };
                let ariadne_config = ariadne::Config::default()
                    .with_color(config.color)
                    .with_char_set(ariadne_charset)
                    .with_index_type(IndexType::Byte);

                Report::build(ReportKind::Error, (filename, span.range()))
                    .with_code(resolution.key.code())
                    .with_message(&message)
                    .with_config(ariadne_config)
                    .with_label(
                        Label::new((filename, span.range()))
                            .with_message(&message)
                            .with_color(colors.next()),
                    )
                    .finish()
                    .write((filename, Source::from(source)), &mut *writer)
            }
            None => writeln!(writer, "[{}] Error: {}", resolution.key.code(), resolution),
        },
        Error::Compile(internal @ CompileError::Internal(_)) => writeln!(writer, "{}", internal),
        Error::Runtime(runtime) => writeln!(writer, "Runtime error: {}", runtime),
    }
}
