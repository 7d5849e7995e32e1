//! Schematron interpreter
//!
//! Runs a compiled [`Schema`] against one XML document:
//!
//! ```text
//! for each pattern, for each rule (document order):
//!     contexts := evaluate(rule.context)            # from the document root
//!     for each assertion (declaration order):
//!         for each context (selection order):
//!             variables := rule lets, evaluated at the context
//!             if assertion fires for evaluate(test, context, variables):
//!                 emit Diagnostic(message, title, line of context)
//! ```
//!
//! Let bindings are evaluated lazily, at most once per context node, and
//! never shared between rules. Any evaluation failure aborts the whole call:
//! a call either returns every diagnostic or an error, never a partial list.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::diagnostic::Diagnostic;
use crate::error::{Result, ValidationError};
use crate::evaluator::Evaluator;
use crate::libxml2::{Node, XmlDocument};
use crate::resolver::ResourceResolver;
use crate::schema::{Message, MessagePart, Rule, Schema};
use crate::xpath::{Item, Sequence, Variables};

/// Per-call settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Base directory for `document()` paths
    pub working_directory: PathBuf,
    /// Candidate locations for external references
    pub resolver: ResourceResolver,
    /// Load external DTDs while parsing
    pub load_dtd: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("."),
            resolver: ResourceResolver::default(),
            load_dtd: false,
        }
    }
}

impl ValidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_directory(mut self, working_directory: impl Into<PathBuf>) -> Self {
        self.working_directory = working_directory.into();
        self
    }

    pub fn with_resolver(mut self, resolver: ResourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_load_dtd(mut self, load_dtd: bool) -> Self {
        self.load_dtd = load_dtd;
        self
    }
}

impl Schema {
    /// Validate an XML document held in memory
    pub fn validate(&self, xml_input: &[u8], options: &ValidationOptions) -> Result<Vec<Diagnostic>> {
        self.validate_source(xml_input, None, options)
    }

    /// Validate an XML document read from `path`
    pub fn validate_file(&self, path: &Path, options: &ValidationOptions) -> Result<Vec<Diagnostic>> {
        let data = std::fs::read(path)?;
        self.validate_source(&data, Some(&path.to_string_lossy()), options)
    }

    /// Validate a document whose external references resolve against `base_url`
    pub fn validate_source(
        &self,
        xml_input: &[u8],
        base_url: Option<&str>,
        options: &ValidationOptions,
    ) -> Result<Vec<Diagnostic>> {
        let evaluator = Evaluator::new(options);
        let document = evaluator.parse_document(xml_input, base_url)?;
        self.validate_document(&document, &evaluator)
    }

    /// Validate an already parsed document
    pub fn validate_document<'d>(
        &self,
        document: &'d XmlDocument,
        evaluator: &'d Evaluator,
    ) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();

        for pattern in &self.patterns {
            trace!(pattern = pattern.id.as_deref(), rules = pattern.rules.len(), "entering pattern");
            for rule in &pattern.rules {
                self.check_rule(rule, document, evaluator, &mut diagnostics)?;
            }
        }

        debug!(
            title = %self.title,
            document = document.name(),
            diagnostics = diagnostics.len(),
            "validation finished"
        );
        Ok(diagnostics)
    }

    fn check_rule<'d>(
        &self,
        rule: &Rule,
        document: &'d XmlDocument,
        evaluator: &'d Evaluator,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        let contexts = self.select_contexts(rule, document, evaluator)?;
        debug!(context = %rule.context, contexts = contexts.len(), "rule selected contexts");
        if contexts.is_empty() {
            return Ok(());
        }

        let mut bindings: Vec<Option<Variables<'d>>> = Vec::new();
        bindings.resize_with(contexts.len(), || None);

        for assertion in &rule.assertions {
            for (index, context) in contexts.iter().enumerate() {
                if bindings[index].is_none() {
                    bindings[index] = Some(self.bind_variables(rule, document, *context, evaluator)?);
                }
                let variables = bindings[index].as_deref().unwrap_or_default();

                let result = evaluator.evaluate(
                    document,
                    Some(*context),
                    &assertion.test,
                    &self.namespaces,
                    variables,
                )?;
                if !assertion.kind.fires(result.is_truthy()) {
                    continue;
                }

                let message =
                    self.render_message(&assertion.message, document, *context, evaluator, variables)?;
                let line = source_line(document, *context)?;
                trace!(
                    kind = assertion.kind.as_str(),
                    id = assertion.id.as_deref(),
                    line,
                    "assertion fired"
                );
                diagnostics.push(Diagnostic::new(message, self.title.as_str(), line));
            }
        }

        Ok(())
    }

    fn select_contexts<'d>(
        &self,
        rule: &Rule,
        document: &'d XmlDocument,
        evaluator: &'d Evaluator,
    ) -> Result<Vec<Node<'d>>> {
        let selected = evaluator.evaluate(document, None, &rule.context, &self.namespaces, &[])?;
        selected
            .into_iter()
            .map(|item| match item {
                Item::Node(node) => Ok(node),
                other => Err(ValidationError::expression(
                    rule.context.as_str(),
                    format!("rule context selected a {} instead of a node", other.type_name()),
                )),
            })
            .collect()
    }

    /// Evaluate the lets of `rule` at `context`
    ///
    /// Each value sees the bindings declared before it.
    fn bind_variables<'d>(
        &self,
        rule: &Rule,
        document: &'d XmlDocument,
        context: Node<'d>,
        evaluator: &'d Evaluator,
    ) -> Result<Variables<'d>> {
        let mut variables = Variables::new();
        for binding in &rule.lets {
            let value = evaluator.evaluate(
                document,
                Some(context),
                &binding.value,
                &self.namespaces,
                &variables,
            )?;
            variables.retain(|(name, _)| *name != binding.name);
            variables.push((binding.name.clone(), value));
        }
        Ok(variables)
    }

    fn render_message<'d>(
        &self,
        message: &Message,
        document: &'d XmlDocument,
        context: Node<'d>,
        evaluator: &'d Evaluator,
        variables: &[(String, Sequence<'d>)],
    ) -> Result<String> {
        if let Some(text) = message.static_text() {
            return Ok(text);
        }

        let mut rendered = String::new();
        for part in message.parts() {
            match part {
                MessagePart::Text(text) => rendered.push_str(text),
                MessagePart::ValueOf(select) => {
                    let value = evaluator.evaluate(
                        document,
                        Some(context),
                        select,
                        &self.namespaces,
                        variables,
                    )?;
                    rendered.push_str(&value.string_value());
                }
                MessagePart::Name(None) => {
                    rendered.push_str(&context.qualified_name().unwrap_or_default());
                }
                MessagePart::Name(Some(path)) => {
                    let selected = evaluator.evaluate(
                        document,
                        Some(context),
                        path,
                        &self.namespaces,
                        variables,
                    )?;
                    if let Some(name) = selected.nodes().next().and_then(|node| node.qualified_name()) {
                        rendered.push_str(&name);
                    }
                }
            }
        }
        Ok(rendered.trim().to_string())
    }
}

/// Line reported for a diagnostic raised at `context`
///
/// Falls back to the document element when the node carries no line.
fn source_line(document: &XmlDocument, context: Node<'_>) -> Result<u32> {
    context
        .line()
        .or_else(|| document.root().and_then(|root| root.line()))
        .ok_or_else(|| ValidationError::LibXml2Internal {
            details: format!(
                "no source line for {} in {}",
                context.qualified_name().unwrap_or_else(|| "context node".to_string()),
                document.name()
            ),
        })
}

/// Validate an XML stream against a Schematron schema stream
///
/// Returns every finding in order; an empty vector means the document
/// conforms. Errors mean the validation could not be completed.
pub fn validate<X: Read, S: Read>(
    mut xml_input: X,
    mut schema_input: S,
    options: &ValidationOptions,
) -> Result<Vec<Diagnostic>> {
    let mut xml = Vec::new();
    xml_input.read_to_end(&mut xml)?;
    let mut schema = Vec::new();
    schema_input.read_to_end(&mut schema)?;
    validate_bytes(&xml, &schema, options)
}

/// Validate an XML document against a Schematron schema, both in memory
pub fn validate_bytes(
    xml_input: &[u8],
    schema_input: &[u8],
    options: &ValidationOptions,
) -> Result<Vec<Diagnostic>> {
    Schema::from_bytes(schema_input, options)?.validate(xml_input, options)
}

/// Validate an XML file against a Schematron schema file
pub fn validate_files(
    xml_path: &Path,
    schema_path: &Path,
    options: &ValidationOptions,
) -> Result<Vec<Diagnostic>> {
    Schema::from_file(schema_path, options)?.validate_file(xml_path, options)
}
