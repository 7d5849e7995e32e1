//! Compiled Schematron schemas
//!
//! A schema document is compiled once into a [`Schema`]: plain owned data
//! (title, namespaces, patterns, rules, lets and assertions) that no longer
//! refers to the libxml2 tree it came from. A compiled schema is `Send + Sync`
//! and can be executed against any number of documents.

use std::path::Path;

use tracing::debug;

use crate::diagnostic::UNTITLED_SCHEMA;
use crate::error::{Result, ValidationError};
use crate::libxml2::{LibXml2Wrapper, Node, NodeKind, ParseOptions, XmlDocument};
use crate::schematron::ValidationOptions;
use crate::xpath::Namespaces;

/// ISO Schematron namespace
pub const ISO_SCHEMATRON_NS: &str = "http://purl.oclc.org/dsdl/schematron";

/// Schematron 1.5 namespace
pub const LEGACY_SCHEMATRON_NS: &str = "http://www.ascc.net/xml/schematron";

/// A compiled Schematron schema
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Title carried by every diagnostic
    pub title: String,
    /// Prefix → URI mapping shared by every expression
    pub namespaces: Namespaces,
    pub patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub id: Option<String>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Expression selecting the context nodes, evaluated from the document root
    pub context: String,
    /// Variable bindings, in declaration order
    pub lets: Vec<LetBinding>,
    /// Asserts and reports, in declaration order
    pub assertions: Vec<Assertion>,
    /// Line of the `rule` element in the schema
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetBinding {
    pub name: String,
    /// Expression, evaluated per context node
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub kind: AssertionKind,
    pub test: String,
    pub message: Message,
    pub id: Option<String>,
    pub role: Option<String>,
    pub flag: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    /// Diagnoses when the test does not hold
    Assert,
    /// Diagnoses when the test holds
    Report,
}

impl AssertionKind {
    /// Whether a test outcome produces a diagnostic
    pub fn fires(&self, holds: bool) -> bool {
        match self {
            AssertionKind::Assert => !holds,
            AssertionKind::Report => holds,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionKind::Assert => "assert",
            AssertionKind::Report => "report",
        }
    }
}

/// Body of an assertion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    /// `<value-of select="…"/>`
    ValueOf(String),
    /// `<name/>`, optionally with a `path`
    Name(Option<String>),
}

impl Message {
    pub fn new(parts: Vec<MessagePart>) -> Self {
        Self { parts }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    /// True when the message needs no evaluation to render
    pub fn is_static(&self) -> bool {
        self.parts
            .iter()
            .all(|part| matches!(part, MessagePart::Text(_)))
    }

    /// Trimmed text of a static message
    pub fn static_text(&self) -> Option<String> {
        if !self.is_static() {
            return None;
        }
        let mut text = String::new();
        for part in &self.parts {
            if let MessagePart::Text(chunk) = part {
                text.push_str(chunk);
            }
        }
        Some(text.trim().to_string())
    }
}

impl Schema {
    /// Compile a parsed schema document
    pub fn from_document(document: &XmlDocument) -> Result<Self> {
        let root = document
            .root()
            .ok_or_else(|| ValidationError::invalid_schema("document has no root element"))?;
        if !is_schematron(root, "schema") {
            return Err(ValidationError::invalid_schema(format!(
                "root element is `{}`, expected `schema`",
                root.qualified_name().unwrap_or_default()
            )));
        }

        let title = schematron_children(root, "title")
            .next()
            .map(|title| title.text_content().trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| UNTITLED_SCHEMA.to_string());

        let mut namespaces = Namespaces::new();
        for ns in schematron_children(root, "ns") {
            let prefix = required_attribute(ns, "prefix")?;
            let uri = required_attribute(ns, "uri")?;
            // Later declarations replace earlier ones.
            if let Some(previous) = namespaces.insert(prefix.clone(), uri) {
                debug!(prefix = %prefix, previous = %previous, "namespace prefix redeclared");
            }
        }

        let patterns = schematron_children(root, "pattern")
            .map(compile_pattern)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            title = %title,
            namespaces = namespaces.len(),
            patterns = patterns.len(),
            "compiled schema"
        );

        Ok(Schema {
            title,
            namespaces,
            patterns,
        })
    }

    /// Parse and compile a schema from memory
    pub fn from_bytes(data: &[u8], options: &ValidationOptions) -> Result<Self> {
        let document = parse_schema(data, None, options)?;
        Self::from_document(&document)
    }

    /// Read, parse and compile a schema file
    pub fn from_file(path: &Path, options: &ValidationOptions) -> Result<Self> {
        let data = std::fs::read(path)?;
        let name = path.to_string_lossy();
        let document = parse_schema(&data, Some(&name), options)?;
        Self::from_document(&document)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.patterns.iter().flat_map(|pattern| pattern.rules.iter())
    }

    pub fn rule_count(&self) -> usize {
        self.rules().count()
    }

    pub fn assertion_count(&self) -> usize {
        self.rules().map(|rule| rule.assertions.len()).sum()
    }
}

fn parse_schema(
    data: &[u8],
    base_url: Option<&str>,
    options: &ValidationOptions,
) -> Result<XmlDocument> {
    LibXml2Wrapper::new().parse_document(
        data,
        base_url,
        &ParseOptions {
            load_dtd: options.load_dtd,
        },
        &options.resolver,
    )
}

fn compile_pattern(pattern: Node<'_>) -> Result<Pattern> {
    let mut rules = Vec::new();
    for rule in schematron_children(pattern, "rule") {
        if rule.attribute("abstract").as_deref() == Some("true") {
            debug!(line = rule.line(), "skipping abstract rule");
            continue;
        }
        rules.push(compile_rule(rule)?);
    }

    Ok(Pattern {
        id: pattern.attribute("id"),
        rules,
    })
}

fn compile_rule(rule: Node<'_>) -> Result<Rule> {
    let context = required_attribute(rule, "context")?;
    let mut lets = Vec::new();
    let mut assertions = Vec::new();

    for child in rule.element_children() {
        if is_schematron(child, "let") {
            lets.push(LetBinding {
                name: required_attribute(child, "name")?,
                value: required_attribute(child, "value")?,
            });
        } else if is_schematron(child, "assert") {
            assertions.push(compile_assertion(child, AssertionKind::Assert)?);
        } else if is_schematron(child, "report") {
            assertions.push(compile_assertion(child, AssertionKind::Report)?);
        }
    }

    Ok(Rule {
        context,
        lets,
        assertions,
        line: rule.line(),
    })
}

fn compile_assertion(element: Node<'_>, kind: AssertionKind) -> Result<Assertion> {
    Ok(Assertion {
        kind,
        test: required_attribute(element, "test")?,
        message: compile_message(element)?,
        id: element.attribute("id"),
        role: element.attribute("role"),
        flag: element.attribute("flag"),
        line: element.line(),
    })
}

fn compile_message(element: Node<'_>) -> Result<Message> {
    let mut parts = Vec::new();
    for child in element.children() {
        match child.kind() {
            NodeKind::Text | NodeKind::CData => parts.push(MessagePart::Text(child.text_content())),
            NodeKind::Element if is_schematron(child, "value-of") => {
                parts.push(MessagePart::ValueOf(required_attribute(child, "select")?));
            }
            NodeKind::Element if is_schematron(child, "name") => {
                parts.push(MessagePart::Name(child.attribute("path")));
            }
            NodeKind::Element => parts.push(MessagePart::Text(child.text_content())),
            _ => {}
        }
    }
    Ok(Message::new(parts))
}

fn is_schematron(node: Node<'_>, local_name: &str) -> bool {
    node.is_element()
        && node.local_name().as_deref() == Some(local_name)
        && match node.namespace_uri().as_deref() {
            None => true,
            Some(uri) => uri == ISO_SCHEMATRON_NS || uri == LEGACY_SCHEMATRON_NS,
        }
}

fn schematron_children<'d>(
    parent: Node<'d>,
    local_name: &'static str,
) -> impl Iterator<Item = Node<'d>> {
    parent
        .element_children()
        .filter(move |child| is_schematron(*child, local_name))
}

fn required_attribute(element: Node<'_>, name: &str) -> Result<String> {
    element.attribute(name).ok_or_else(|| {
        ValidationError::invalid_schema(format!(
            "`{}` element on line {} is missing the `{}` attribute",
            element.local_name().unwrap_or_default(),
            element.line().unwrap_or(0),
            name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE_SCHEMA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<schema xmlns="http://purl.oclc.org/dsdl/schematron">
  <title>  Invoice rules  </title>
  <ns prefix="inv" uri="urn:example:invoice"/>
  <ns prefix="cbc" uri="urn:example:old"/>
  <ns prefix="cbc" uri="urn:example:basic"/>
  <pattern id="totals">
    <rule context="/inv:Invoice">
      <let name="lines" value="sum(inv:Line)"/>
      <assert test="inv:Total = $lines" id="BR-CO-10" flag="fatal">
        Total must equal the sum of lines.
      </assert>
      <report test="inv:Total &lt; 0">Total is <value-of select="inv:Total"/> for <name/></report>
    </rule>
    <rule abstract="true" id="abstract-rule">
      <assert test="true()">never compiled</assert>
    </rule>
  </pattern>
  <phase id="all"><active pattern="totals"/></phase>
</schema>"#;

    fn compile(schema: &str) -> Result<Schema> {
        Schema::from_bytes(schema.as_bytes(), &ValidationOptions::new())
    }

    #[test]
    fn test_compile_schema() {
        let schema = compile(INVOICE_SCHEMA).unwrap();

        assert_eq!(schema.title, "Invoice rules");
        assert_eq!(schema.patterns.len(), 1);
        assert_eq!(schema.patterns[0].id.as_deref(), Some("totals"));
        assert_eq!(schema.rule_count(), 1);
        assert_eq!(schema.assertion_count(), 2);

        let rule = &schema.patterns[0].rules[0];
        assert_eq!(rule.context, "/inv:Invoice");
        assert_eq!(rule.line, Some(8));
        assert_eq!(
            rule.lets,
            [LetBinding {
                name: "lines".to_string(),
                value: "sum(inv:Line)".to_string(),
            }]
        );

        let assert = &rule.assertions[0];
        assert_eq!(assert.kind, AssertionKind::Assert);
        assert_eq!(assert.test, "inv:Total = $lines");
        assert_eq!(assert.id.as_deref(), Some("BR-CO-10"));
        assert_eq!(assert.flag.as_deref(), Some("fatal"));
        assert_eq!(
            assert.message.static_text().as_deref(),
            Some("Total must equal the sum of lines.")
        );

        let report = &rule.assertions[1];
        assert_eq!(report.kind, AssertionKind::Report);
        assert!(!report.message.is_static());
        assert_eq!(
            report.message.parts(),
            [
                MessagePart::Text("Total is ".to_string()),
                MessagePart::ValueOf("inv:Total".to_string()),
                MessagePart::Text(" for ".to_string()),
                MessagePart::Name(None),
            ]
        );
    }

    #[test]
    fn test_duplicate_prefix_last_wins() {
        let schema = compile(INVOICE_SCHEMA).unwrap();
        assert_eq!(schema.namespaces.len(), 2);
        assert_eq!(schema.namespaces["cbc"], "urn:example:basic");
        assert_eq!(schema.namespaces["inv"], "urn:example:invoice");
    }

    #[test]
    fn test_default_title() {
        let schema = compile("<schema><pattern/></schema>").unwrap();
        assert_eq!(schema.title, UNTITLED_SCHEMA);

        let blank = compile("<schema><title>   </title></schema>").unwrap();
        assert_eq!(blank.title, UNTITLED_SCHEMA);
    }

    #[test]
    fn test_no_namespace_and_legacy_namespace() {
        let plain = compile(r#"<schema><pattern><rule context="/"><assert test="1">x</assert></rule></pattern></schema>"#)
            .unwrap();
        assert_eq!(plain.assertion_count(), 1);

        let legacy = compile(
            r#"<sch:schema xmlns:sch="http://www.ascc.net/xml/schematron">
  <sch:pattern><sch:rule context="/"><sch:report test="1">x</sch:report></sch:rule></sch:pattern>
</sch:schema>"#,
        )
        .unwrap();
        assert_eq!(legacy.patterns[0].rules[0].assertions[0].kind, AssertionKind::Report);
    }

    #[test]
    fn test_foreign_namespace_elements_ignored() {
        let schema = compile(
            r#"<schema xmlns:x="urn:other">
  <x:pattern><rule context="/"><assert test="1">x</assert></rule></x:pattern>
</schema>"#,
        )
        .unwrap();
        assert!(schema.patterns.is_empty());
    }

    #[test]
    fn test_wrong_root_is_invalid_schema() {
        let err = compile("<rules/>").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSchema { .. }));
    }

    #[test]
    fn test_missing_required_attributes() {
        let missing_context =
            compile("<schema><pattern><rule><assert test='1'>x</assert></rule></pattern></schema>")
                .unwrap_err();
        assert!(missing_context.to_string().contains("`context`"));

        let missing_test =
            compile("<schema><pattern><rule context='/'><assert>x</assert></rule></pattern></schema>")
                .unwrap_err();
        assert!(missing_test.to_string().contains("`test`"));

        let missing_uri = compile("<schema><ns prefix='a'/></schema>").unwrap_err();
        assert!(missing_uri.to_string().contains("`uri`"));
    }

    #[test]
    fn test_assertion_kind_polarity() {
        assert!(AssertionKind::Assert.fires(false));
        assert!(!AssertionKind::Assert.fires(true));
        assert!(AssertionKind::Report.fires(true));
        assert!(!AssertionKind::Report.fires(false));
    }

    #[test]
    fn test_schema_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Schema>();
    }
}
