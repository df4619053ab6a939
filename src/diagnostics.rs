//! Diagnostics collected while building an execution set.
//!
//! Every build owns one [`Diagnostics`] sink. The closure builder, the token patcher and the
//! kernel cache report constructs they skip or degrade (dropped `filter` clauses, suppressed
//! classes, kernel reuse) into it, and the sink is handed back inside [`crate::Compilation`].
//! Fatal conditions never end up here; they are returned as [`crate::Error`].
//!
//! ```rust
//! use ilforge::diagnostics::{Diagnostics, DiagnosticCategory};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.warning(
//!     DiagnosticCategory::ExceptionClause,
//!     "Filter clause in Demo.Program::Main() dropped",
//! );
//!
//! assert!(diagnostics.has_warnings());
//! assert_eq!(diagnostics.warning_count(), 1);
//! ```

use std::fmt;

use serde::Serialize;
use strum::Display;

/// How bad a reported construct is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize)]
pub enum DiagnosticSeverity {
    /// A decision worth knowing about, e.g. a reused kernel
    #[strum(to_string = "INFO")]
    Info,
    /// A construct was dropped or degraded; the program still builds
    #[strum(to_string = "WARN")]
    Warning,
    /// The build finished but the program will likely fail on the device
    #[strum(to_string = "ERROR")]
    Error,
}

/// The build stage that reported a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum DiagnosticCategory {
    /// Method preparation and IL patching
    Method,
    /// Class preparation
    Type,
    /// Field resolution and static storage
    Field,
    /// Exception clause translation
    ExceptionClause,
    /// Replacement registry lookups
    Replacement,
    /// Kernel construction and reuse
    Kernel,
    /// Override discovery
    Dispatch,
    /// Static constructor ordering
    StaticConstructor,
    /// Everything else
    General,
}

/// One reported construct.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: DiagnosticSeverity,
    /// Reporting stage
    pub category: DiagnosticCategory,
    /// Description
    pub message: String,
    /// IL offset inside the method being patched
    pub offset: Option<usize>,
    /// Original metadata token of the construct
    pub token: Option<u32>,
    /// Methods on the analysis stack, innermost last
    pub trace: Vec<String>,
}

impl Diagnostic {
    /// A diagnostic without location.
    pub fn new(
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            severity,
            category,
            message: message.into(),
            offset: None,
            token: None,
            trace: Vec::new(),
        }
    }

    /// Sets the IL offset.
    #[must_use]
    pub fn with_offset(self, offset: usize) -> Self {
        Diagnostic {
            offset: Some(offset),
            ..self
        }
    }

    /// Sets the original token.
    #[must_use]
    pub fn with_token(self, token: u32) -> Self {
        Diagnostic {
            token: Some(token),
            ..self
        }
    }

    /// Sets the analysis stack.
    #[must_use]
    pub fn with_trace(self, trace: Vec<String>) -> Self {
        Diagnostic { trace, ..self }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)?;
        if let Some(offset) = self.offset {
            write!(f, " (IL_{offset:04x})")?;
        }
        if let Some(token) = self.token {
            write!(f, " (token: 0x{token:08x})")?;
        }
        self.trace
            .iter()
            .try_for_each(|frame| write!(f, "\n    at {frame}"))
    }
}

/// Append-only diagnostic sink shared by reference between the build stages.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Diagnostics {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports an [`DiagnosticSeverity::Info`] entry.
    pub fn info(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Info, category, message));
    }

    /// Reports a [`DiagnosticSeverity::Warning`] entry.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Warning, category, message));
    }

    /// Reports a [`DiagnosticSeverity::Error`] entry.
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Error, category, message));
    }

    /// Reports a prepared entry and mirrors it to the log.
    pub fn push(&self, diagnostic: Diagnostic) {
        let level = match diagnostic.severity {
            DiagnosticSeverity::Info => log::Level::Debug,
            DiagnosticSeverity::Warning => log::Level::Warn,
            DiagnosticSeverity::Error => log::Level::Error,
        };
        log::log!(level, "{diagnostic}");
        self.entries.push(diagnostic);
    }

    /// Returns true if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.count() == 0
    }

    /// Number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Number of entries with `severity`.
    #[must_use]
    pub fn count_of(&self, severity: DiagnosticSeverity) -> usize {
        self.iter().filter(|d| d.severity == severity).count()
    }

    /// Returns true if an error was reported.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.count_of(DiagnosticSeverity::Error) > 0
    }

    /// Returns true if a warning was reported.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.count_of(DiagnosticSeverity::Warning) > 0
    }

    /// Number of warnings.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_of(DiagnosticSeverity::Warning)
    }

    /// All entries in report order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Entries reported by one stage.
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_severity() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.is_empty());

        diagnostics.info(DiagnosticCategory::Kernel, "Cached kernel reused");
        diagnostics.warning(DiagnosticCategory::ExceptionClause, "Filter clause dropped");
        diagnostics.error(DiagnosticCategory::Type, "Layout of Demo.Led is invalid");

        assert_eq!(diagnostics.count(), 3);
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.warning_count(), 1);
        assert_eq!(diagnostics.count_of(DiagnosticSeverity::Info), 1);
        assert_eq!(diagnostics.by_category(DiagnosticCategory::Kernel).len(), 1);
    }

    #[test]
    fn display_includes_location_and_trace() {
        let entry = Diagnostic::new(
            DiagnosticSeverity::Warning,
            DiagnosticCategory::Method,
            "Abstract method without override",
        )
        .with_offset(0x12)
        .with_token(0x0600_0001)
        .with_trace(vec!["Demo.Program::Main()".to_string()]);

        assert_eq!(
            entry.to_string(),
            "[WARN] Method: Abstract method without override (IL_0012) (token: 0x06000001)\n    at Demo.Program::Main()"
        );
    }
}
