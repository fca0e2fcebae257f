//! Prompt templates and their rendering.
//!
//! A template body is plain text with `{name}` placeholders. `{{` and `}}`
//! produce literal braces. Placeholders are checked against the registry's
//! known variables when the template is registered, so a registered template
//! can only fail to render when a cell lacks a value for one of them.
//!
//! Besides the cell itself a template can read the rest of its row:
//! `{col:B}` is the value in column B of the same row, and `{context}`
//! lists every other non-empty cell of the row as `- Label: value` lines.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::error::TemplateError;
use crate::job::{CellAddress, parse_column};

/// Variables every template may reference.
pub const BUILTIN_VARIABLES: &[&str] = &["value", "row", "col", "header", "address", "context"];

/// Prefix of a placeholder naming another column of the row, as in `{col:B}`.
const COLUMN_PREFIX: &str = "col:";

fn column_reference(name: &str) -> Option<u32> {
    name.strip_prefix(COLUMN_PREFIX).and_then(|letters| parse_column(letters.trim()))
}

/// Ready-made transformations registered by [`TemplateRegistry::with_presets`].
pub const PRESETS: &[(&str, &str)] = &[
    ("uppercase", "Convert all text to uppercase."),
    ("lowercase", "Convert all text to lowercase."),
    (
        "title_case",
        "Format the text in title case (capitalize first letter of each word, except for articles, prepositions, and conjunctions).",
    ),
    ("summarize", "Summarize this text in one sentence."),
    ("fix_grammar", "Fix any grammar or spelling errors in this text."),
    ("extract_numbers", "Extract all numbers from this text."),
    ("format_date", "Format this as a standard date (YYYY-MM-DD)."),
    ("translate_english", "Translate this text to English."),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A parsed, immutable prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    body: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Var(v) if seen.insert(v.as_str()) => Some(v.as_str()),
                _ => None,
            })
            .collect()
    }

    fn parse(name: &str, body: &str) -> Result<Self, TemplateError> {
        let malformed = |offset, reason| TemplateError::Malformed {
            template: name.to_string(),
            offset,
            reason,
        };

        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = body.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    text.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut var = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        if c == '{' {
                            return Err(malformed(i, "nested `{`"));
                        }
                        var.push(c);
                    }
                    if !closed {
                        return Err(malformed(i, "unterminated placeholder"));
                    }
                    let var = var.trim().to_string();
                    if var.is_empty() {
                        return Err(malformed(i, "empty placeholder"));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Var(var));
                }
                '}' => return Err(malformed(i, "unmatched `}`")),
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self {
            name: name.to_string(),
            body: body.to_string(),
            segments,
        })
    }
}

/// Another cell in the same row as the one being rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCell {
    pub col: u32,
    /// Column header, or the column letters when there is none.
    pub label: String,
    pub value: String,
}

/// Values a template can draw from when rendering one cell.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub address: CellAddress,
    pub value: &'a str,
    pub header: Option<&'a str>,
    pub variables: &'a BTreeMap<String, String>,
    /// The other cells of the row, in column order.
    pub row_cells: &'a [RowCell],
}

impl RenderContext<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "value" => Some(self.value.to_string()),
            "row" => Some((self.address.row + 1).to_string()),
            "col" => Some(self.address.column_letters()),
            "address" => Some(self.address.to_string()),
            "header" => self.header.map(str::to_string),
            "context" => Some(self.row_context()),
            other => match column_reference(other) {
                Some(col) if col == self.address.col => Some(self.value.to_string()),
                Some(col) => self
                    .row_cells
                    .iter()
                    .find(|cell| cell.col == col)
                    .map(|cell| cell.value.clone()),
                None => self.variables.get(other).cloned(),
            },
        }
    }

    fn row_context(&self) -> String {
        self.row_cells
            .iter()
            .filter(|cell| !cell.value.trim().is_empty())
            .map(|cell| format!("- {}: {}", cell.label, cell.value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// In-memory name → template mapping shared by every run.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, Template>>,
    extra_variables: RwLock<BTreeSet<String>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with [`PRESETS`].
    pub fn with_presets() -> Self {
        let registry = Self::new();
        for (name, instruction) in PRESETS {
            let registered =
                registry.register(name, &format!("{instruction}\n\nCell content: {{value}}"));
            debug_assert!(registered.is_ok(), "preset `{name}`: {registered:?}");
        }
        registry
    }

    /// Makes `name` usable as a placeholder in templates registered afterwards.
    pub fn declare_variable(&self, name: &str) {
        self.extra_variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    fn is_known(&self, name: &str) -> bool {
        BUILTIN_VARIABLES.contains(&name)
            || column_reference(name).is_some()
            || self
                .extra_variables
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(name)
    }

    pub fn register(&self, name: &str, body: &str) -> Result<(), TemplateError> {
        let template = Template::parse(name, body)?;
        if let Some(unknown) = template.placeholders().into_iter().find(|p| !self.is_known(p)) {
            return Err(TemplateError::UnknownPlaceholder {
                template: name.to_string(),
                placeholder: unknown.to_string(),
            });
        }

        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        if templates.contains_key(name) {
            return Err(TemplateError::Duplicate(name.to_string()));
        }
        log::debug!("registered template `{name}`");
        templates.insert(name.to_string(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Template> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn render(&self, name: &str, context: &RenderContext<'_>) -> Result<String, TemplateError> {
        let template = self
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;
        render_template(&template, context)
    }
}

/// Substitutes `context` into an already-resolved template.
pub fn render_template(
    template: &Template,
    context: &RenderContext<'_>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.body.len() + context.value.len());
    for segment in &template.segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Var(v) => {
                let value = context
                    .lookup(v)
                    .ok_or_else(|| TemplateError::MissingVariable {
                        variable: v.clone(),
                        address: context.address,
                    })?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(value: &'a str, vars: &'a BTreeMap<String, String>) -> RenderContext<'a> {
        RenderContext {
            address: CellAddress::new(2, 1),
            value,
            header: Some("Name"),
            variables: vars,
            row_cells: &[],
        }
    }

    #[test]
    fn render_builtin_variables() {
        let registry = TemplateRegistry::new();
        registry
            .register("all", "{address} {col}{row} [{header}] = {value}")
            .unwrap();
        let vars = BTreeMap::new();
        let out = registry.render("all", &ctx("alice", &vars)).unwrap();
        assert_eq!(out, "B3 B3 [Name] = alice");
    }

    #[test]
    fn render_is_deterministic() {
        let registry = TemplateRegistry::new();
        registry.register("up", "Uppercase: {value}").unwrap();
        let vars = BTreeMap::new();
        let a = registry.render("up", &ctx("abc", &vars)).unwrap();
        let b = registry.render("up", &ctx("abc", &vars)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "Uppercase: abc");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let registry = TemplateRegistry::new();
        registry.register("json", "{{\"v\": \"{value}\"}}").unwrap();
        let vars = BTreeMap::new();
        let out = registry.render("json", &ctx("x", &vars)).unwrap();
        assert_eq!(out, "{\"v\": \"x\"}");
    }

    #[test]
    fn unknown_placeholder_rejected() {
        let registry = TemplateRegistry::new();
        let err = registry.register("bad", "Hello {nme}").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { ref placeholder, .. } if placeholder == "nme"));
        assert!(!registry.contains("bad"));
    }

    #[test]
    fn duplicate_name_rejected() {
        let registry = TemplateRegistry::new();
        registry.register("t", "{value}").unwrap();
        let err = registry.register("t", "other {value}").unwrap_err();
        assert_eq!(err, TemplateError::Duplicate("t".into()));
        assert_eq!(registry.get("t").unwrap().body(), "{value}");
    }

    #[test]
    fn malformed_bodies_rejected() {
        let registry = TemplateRegistry::new();
        assert!(matches!(
            registry.register("a", "open {value"),
            Err(TemplateError::Malformed { .. })
        ));
        assert!(matches!(
            registry.register("b", "empty {}"),
            Err(TemplateError::Malformed { .. })
        ));
        assert!(matches!(
            registry.register("c", "stray } brace"),
            Err(TemplateError::Malformed { .. })
        ));
    }

    #[test]
    fn declared_variables_render_from_context() {
        let registry = TemplateRegistry::new();
        registry.declare_variable("tone");
        registry.register("rewrite", "Rewrite in a {tone} tone: {value}").unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("tone".to_string(), "formal".to_string());
        let out = registry.render("rewrite", &ctx("hey", &vars)).unwrap();
        assert_eq!(out, "Rewrite in a formal tone: hey");
    }

    #[test]
    fn missing_variable_fails_render() {
        let registry = TemplateRegistry::new();
        registry.declare_variable("tone");
        registry.register("rewrite", "{tone}: {value}").unwrap();
        let vars = BTreeMap::new();
        let err = registry.render("rewrite", &ctx("hey", &vars)).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable { ref variable, .. } if variable == "tone"));
    }

    #[test]
    fn missing_header_fails_render() {
        let registry = TemplateRegistry::new();
        registry.register("h", "{header}: {value}").unwrap();
        let vars = BTreeMap::new();
        let context = RenderContext {
            address: CellAddress::new(0, 0),
            value: "v",
            header: None,
            variables: &vars,
            row_cells: &[],
        };
        assert!(registry.render("h", &context).is_err());
    }

    #[test]
    fn unknown_template_fails_render() {
        let registry = TemplateRegistry::new();
        let vars = BTreeMap::new();
        let err = registry.render("nope", &ctx("v", &vars)).unwrap_err();
        assert_eq!(err, TemplateError::UnknownTemplate("nope".into()));
    }

    fn row() -> Vec<RowCell> {
        vec![
            RowCell {
                col: 0,
                label: "Name".into(),
                value: "Ada".into(),
            },
            RowCell {
                col: 2,
                label: "C".into(),
                value: "".into(),
            },
            RowCell {
                col: 3,
                label: "City".into(),
                value: "London".into(),
            },
        ]
    }

    #[test]
    fn column_reference_reads_same_row() {
        let registry = TemplateRegistry::new();
        registry
            .register("greet", "Greet {col:A} from {col:d} about {value} ({col:B})")
            .unwrap();
        let vars = BTreeMap::new();
        let cells = row();
        let context = RenderContext {
            row_cells: &cells,
            ..ctx("maths", &vars)
        };
        let out = registry.render("greet", &context).unwrap();
        assert_eq!(out, "Greet Ada from London about maths (maths)");
    }

    #[test]
    fn column_reference_outside_row_fails_render() {
        let registry = TemplateRegistry::new();
        registry.register("far", "{col:Z} {value}").unwrap();
        let vars = BTreeMap::new();
        let cells = row();
        let context = RenderContext {
            row_cells: &cells,
            ..ctx("x", &vars)
        };
        let err = registry.render("far", &context).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable { ref variable, .. } if variable == "col:Z"));
    }

    #[test]
    fn malformed_column_reference_rejected() {
        let registry = TemplateRegistry::new();
        assert!(matches!(
            registry.register("bad", "{col:1} {value}"),
            Err(TemplateError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn context_lists_non_empty_row_cells() {
        let registry = TemplateRegistry::new();
        registry
            .register("ctx", "Cell content: {value}\n\nContext information:\n{context}")
            .unwrap();
        let vars = BTreeMap::new();
        let cells = row();
        let context = RenderContext {
            row_cells: &cells,
            ..ctx("maths", &vars)
        };
        let out = registry.render("ctx", &context).unwrap();
        assert_eq!(
            out,
            "Cell content: maths\n\nContext information:\n- Name: Ada\n- City: London"
        );

        let alone = registry.render("ctx", &ctx("maths", &vars)).unwrap();
        assert!(alone.ends_with("Context information:\n"));
    }

    #[test]
    fn every_preset_registers_and_renders() {
        let registry = TemplateRegistry::with_presets();
        let vars = BTreeMap::new();
        for (name, instruction) in PRESETS {
            let template = registry.get(name).unwrap();
            assert_eq!(template.placeholders(), vec!["value"]);
            let out = registry.render(name, &ctx("abc", &vars)).unwrap();
            assert_eq!(out, format!("{instruction}\n\nCell content: abc"));
        }
    }

    #[test]
    fn presets_are_registered() {
        let registry = TemplateRegistry::with_presets();
        assert_eq!(registry.names().len(), PRESETS.len());
        let vars = BTreeMap::new();
        let out = registry.render("uppercase", &ctx("abc", &vars)).unwrap();
        assert_eq!(out, "Convert all text to uppercase.\n\nCell content: abc");
    }

    #[test]
    fn placeholders_listed_once_in_order() {
        let template = Template::parse("t", "{value} {row} {value}").unwrap();
        assert_eq!(template.placeholders(), vec!["value", "row"]);
    }
}
