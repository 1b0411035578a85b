use crate::error::ExtractionError;
use crate::types::{CodeUnit, ExtractedClass, ExtractedFile};
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Extracts classes, methods and module-level functions from Python source
pub struct EntityExtractor {
    parser: Parser,
}

impl EntityExtractor {
    /// Create a new extractor with the Python grammar loaded
    pub fn new() -> Result<Self, ExtractionError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ExtractionError::LanguageSetup(e.to_string()))?;

        Ok(Self { parser })
    }

    /// Parse source code into class and function records.
    ///
    /// Fails on syntactically invalid input so the caller can skip the file.
    pub fn extract(&mut self, source: &str) -> Result<ExtractedFile, ExtractionError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or(ExtractionError::NoTree)?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ExtractionError::ParseFailed {
                line: first_error_line(root).unwrap_or(1),
            });
        }

        let mut file = ExtractedFile::default();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            let Some(definition) = unwrap_decorated(child) else {
                continue;
            };
            match definition.kind() {
                "function_definition" => {
                    if let Some(unit) = code_unit(definition, source) {
                        file.functions.push(unit);
                    }
                }
                "class_definition" => {
                    if let Some(class) = extract_class(definition, source) {
                        file.classes.push(class);
                    }
                }
                _ => {}
            }
        }

        Ok(file)
    }
}

/// Whether a unit counts as a test: its name starts with the test prefix, or
/// the file that contains it does.
pub fn is_test_unit(name: &str, file_path: &str, prefix: &str) -> bool {
    if name.starts_with(prefix) {
        return true;
    }
    Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(prefix))
}

fn extract_class(node: Node, source: &str) -> Option<ExtractedClass> {
    let unit = code_unit(node, source)?;
    let mut methods = Vec::new();

    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            if let Some(definition) = unwrap_decorated(child)
                && definition.kind() == "function_definition"
                && let Some(method) = code_unit(definition, source)
            {
                methods.push(method);
            }
        }
    }

    Some(ExtractedClass { unit, methods })
}

/// Decorators are not part of the stored definition
fn unwrap_decorated(node: Node) -> Option<Node> {
    if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition")
    } else {
        Some(node)
    }
}

fn code_unit(node: Node, source: &str) -> Option<CodeUnit> {
    let name = node
        .child_by_field_name("name")?
        .utf8_text(source.as_bytes())
        .ok()?
        .to_string();
    if name.is_empty() {
        return None;
    }

    let source_text = source.get(node.start_byte()..node.end_byte())?.to_string();

    Some(CodeUnit {
        name,
        source_text,
        docstring: docstring_of(node, source),
        // Tree-sitter rows are 0-indexed
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
    })
}

/// The first statement of the body, if it is a bare string literal
fn docstring_of(node: Node, source: &str) -> String {
    let Some(body) = node.child_by_field_name("body") else {
        return String::new();
    };

    let mut cursor = body.walk();
    let first_statement = body
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment");

    let Some(statement) = first_statement else {
        return String::new();
    };
    if statement.kind() != "expression_statement" {
        return String::new();
    }

    match statement.named_child(0) {
        Some(expr) if expr.kind() == "string" => expr
            .utf8_text(source.as_bytes())
            .map(clean_docstring)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Strip string prefix and quotes, then dedent the continuation lines
fn clean_docstring(literal: &str) -> String {
    let unprefixed = literal.trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B', 'f', 'F']);
    let quote_len = if unprefixed.starts_with("\"\"\"") || unprefixed.starts_with("'''") {
        3
    } else {
        1
    };
    let inner = if unprefixed.len() >= quote_len * 2 {
        &unprefixed[quote_len..unprefixed.len() - quote_len]
    } else {
        ""
    };

    let mut lines = inner.lines();
    let first = lines.next().unwrap_or("").trim().to_string();
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned = vec![first];
    cleaned.extend(
        rest.iter()
            .map(|l| l.get(indent..).unwrap_or("").trim_end().to_string()),
    );

    cleaned.join("\n").trim().to_string()
}

fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error()
            && let Some(line) = first_error_line(child)
        {
            return Some(line);
        }
    }
    None
}
