//! Pass 2: validation pipeline.
//!
//! An ordered chain of [`Validator`]s over the canonical AST. In relaxed
//! mode every validator runs and the diagnostics are merged; in strict mode
//! the chain stops after the first validator that reports an error.

mod semantic;
mod structural;

pub use semantic::SemanticValidator;
pub use structural::StructuralValidator;

pub(crate) use semantic::{unresolved_flow, MESSAGE_KINDS};
pub(crate) use structural::missing_display_name;

use crate::ast::{File, Section};
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::Diagnostic;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        ValidationReport {
            is_valid: !diagnostics.iter().any(Diagnostic::is_error),
            diagnostics,
        }
    }
}

/// What a validator may know beyond the document itself.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Documents pulled in by `import`, already parsed.
    pub imports: Vec<Arc<File>>,
    pub cancel: CancellationToken,
}

impl ValidationContext {
    pub fn new(imports: Vec<Arc<File>>, cancel: CancellationToken) -> Self {
        ValidationContext { imports, cancel }
    }

    pub fn imported_flow(&self, name: &str) -> bool {
        self.imports
            .iter()
            .any(|f| f.sections_of("flow").any(|s| s.name.as_deref() == Some(name)))
    }
}

/// A named, side-effect-free check over the AST.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    fn validate(&self, file: &File, ctx: &ValidationContext)
        -> Result<ValidationReport, Cancelled>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("a validator named '{0}' is already registered")]
    DuplicateValidator(String),
}

#[derive(Default)]
pub struct ValidationPipeline {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Structural checks, then semantic checks.
    pub fn with_defaults() -> Self {
        ValidationPipeline {
            validators: vec![
                Box::new(StructuralValidator),
                Box::new(SemanticValidator),
            ],
        }
    }

    pub fn add(&mut self, validator: Box<dyn Validator>) -> Result<&mut Self, PipelineError> {
        if self.validators.iter().any(|v| v.name() == validator.name()) {
            return Err(PipelineError::DuplicateValidator(validator.name().to_owned()));
        }
        self.validators.push(validator);
        Ok(self)
    }

    pub fn names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    pub fn run(
        &self,
        file: &File,
        ctx: &ValidationContext,
        strict: bool,
    ) -> Result<ValidationReport, Cancelled> {
        let mut diagnostics = Vec::new();
        for validator in &self.validators {
            ctx.cancel.check()?;
            let report = validator.validate(file, ctx)?;
            debug!(
                validator = validator.name(),
                diagnostics = report.diagnostics.len(),
                "validator finished"
            );
            diagnostics.extend(report.diagnostics);
            if strict && !report.is_valid {
                break;
            }
        }
        Ok(ValidationReport::from_diagnostics(diagnostics))
    }
}

/// The section a `...Name` spread refers to: any named section of the
/// document (top level or one level down), then of its imports.
pub(crate) fn find_spread_target<'a>(
    file: &'a File,
    imports: &'a [Arc<File>],
    name: &str,
) -> Option<&'a Section> {
    std::iter::once(file)
        .chain(imports.iter().map(|f| f.as_ref()))
        .flat_map(|f| {
            f.sections
                .iter()
                .flat_map(|s| std::iter::once(s).chain(s.subsections.iter()))
        })
        .find(|s| s.name.as_deref() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::codes;
    use crate::pass1_canonicalize::parse_ok;

    struct AlwaysFails;

    impl Validator for AlwaysFails {
        fn name(&self) -> &str {
            "structural"
        }

        fn validate(&self, _: &File, _: &ValidationContext) -> Result<ValidationReport, Cancelled> {
            Ok(ValidationReport::default())
        }
    }

    #[test]
    fn duplicate_validator_name_fails_at_construction() {
        let mut pipeline = ValidationPipeline::with_defaults();
        let err = pipeline.add(Box::new(AlwaysFails)).err();
        assert_eq!(
            err,
            Some(PipelineError::DuplicateValidator("structural".into()))
        );
        assert_eq!(pipeline.names(), vec!["structural", "semantic"]);
    }

    const BROKEN: &str = "agent A\n  flow F\n    start: X\n    on X\n      -> start Nowhere\n";

    #[test]
    fn relaxed_mode_runs_every_validator() {
        let file = parse_ok(BROKEN);
        let report = ValidationPipeline::with_defaults()
            .run(&file, &ValidationContext::default(), false)
            .unwrap();
        let codes: Vec<_> = report.diagnostics.iter().filter_map(|d| d.code()).collect();
        assert!(codes.contains(&codes::MISSING_DISPLAY_NAME));
        assert!(codes.contains(&codes::UNRESOLVED_FLOW));
        assert!(!report.is_valid);
    }

    #[test]
    fn strict_mode_stops_after_first_failing_validator() {
        let file = parse_ok(BROKEN);
        let report = ValidationPipeline::with_defaults()
            .run(&file, &ValidationContext::default(), true)
            .unwrap();
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code(), Some(codes::MISSING_DISPLAY_NAME));
    }

    #[test]
    fn cancelled_pipeline_stops() {
        let file = parse_ok(BROKEN);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ValidationContext::new(Vec::new(), cancel);
        assert_eq!(
            ValidationPipeline::with_defaults().run(&file, &ctx, false),
            Err(Cancelled)
        );
    }

    #[test]
    fn imported_flows_resolve() {
        let file = parse_ok("agent A\n  displayName: \"A\"\n  flow F\n    start: X\n    on X\n      -> start Shared\n");
        let lib = parse_ok("flow Shared\n  start: S\n  on S\n    -> :end\n");
        let ctx = ValidationContext::new(vec![Arc::new(lib)], CancellationToken::new());
        let report = ValidationPipeline::with_defaults().run(&file, &ctx, false).unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    }
}
