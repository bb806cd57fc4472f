//! Script compiler.
//!
//! Compilation turns script source into a [`CompiledProgram`]: the
//! ordered parameter declarations, the callable function descriptors
//! and any diagnostics. Malformed user input never panics or aborts a
//! compile; every problem becomes a [`Message`] on the result so the
//! UI can show it next to the program.
//!
//! The script's top level is executed once with a dedicated engine.
//! Parameter declarations are harvested from the resulting scope: every
//! top-level variable bound to a declaration value (built by
//! `param_int`, `param_valve`, ...) becomes a parameter, in scope
//! order, with the variable name as its symbol. Visibility and
//! lifecycle callbacks are collected from top-level `display` /
//! `on_stop` / `on_pause` / `on_resume` calls.

use std::sync::{Arc, Mutex};

use rhai::{Engine, Scope, AST};

use crate::api;
use crate::params::{ParameterDeclaration, ParameterKind, ParameterValue};
use crate::script::{fingerprint, Program};

/// Classification of a diagnostic or log message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Script `log()` output.
    Info,
    /// Produced while compiling; survives message clearing.
    CompileError,
    /// Produced while a task was running.
    RuntimeError,
}

/// One line in a program's message area.
#[derive(Clone, Debug)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Info,
            text: text.into(),
        }
    }

    pub fn compile_error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::CompileError,
            text: text.into(),
        }
    }

    pub fn runtime_error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::RuntimeError,
            text: text.into(),
        }
    }
}

/// One callable script function.
#[derive(Clone, Debug)]
pub struct FunctionDescriptor {
    /// Function name in the script.
    pub symbol: String,
    /// UI label; `None` while the function is hidden.
    pub display_name: Option<String>,
    /// Asynchronous functions take a checkpoint argument and may yield
    /// wait requests; synchronous ones run to completion in one call.
    pub is_async: bool,
    /// Symbols of lifecycle callback functions, when attached.
    pub on_stop: Option<String>,
    pub on_pause: Option<String>,
    pub on_resume: Option<String>,
}

impl FunctionDescriptor {
    pub fn is_visible(&self) -> bool {
        self.display_name.is_some()
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.symbol)
    }
}

/// The result of compiling one script for one program.
#[derive(Clone, Debug)]
pub struct CompiledProgram {
    /// Declarations in scope order.
    pub parameters: Vec<ParameterDeclaration>,
    pub functions: Vec<FunctionDescriptor>,
    /// Compile-time diagnostics.
    pub messages: Vec<Message>,
    /// Program description set by the script.
    pub description: String,
    /// Fingerprint of the compiled source, for memoization.
    pub fingerprint: u64,
    /// `None` when the source failed to parse.
    pub ast: Option<AST>,
}

impl CompiledProgram {
    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.kind == MessageKind::CompileError)
    }

    pub fn function(&self, symbol: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.symbol == symbol)
    }

    /// Functions shown in the default UI listing.
    pub fn visible_functions(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.functions.iter().filter(|f| f.is_visible())
    }
}

/// A parameter declaration value as it exists inside the script.
///
/// Built by the `param_*` functions, bound to a top-level variable, and
/// harvested from the scope after evaluation. Malformed declarations
/// carry their error so the parameter can still be listed.
#[derive(Clone, Debug)]
pub struct ParamDecl {
    pub display_name: String,
    pub kind: ParameterKind,
    pub default: ParameterValue,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub error: Option<String>,
}

impl ParamDecl {
    fn new(kind: ParameterKind) -> Self {
        let default = kind.none_value();
        Self {
            display_name: String::new(),
            kind,
            default,
            minimum: None,
            maximum: None,
            error: None,
        }
    }

    fn with_default(kind: ParameterKind, default: ParameterValue) -> Self {
        Self {
            default,
            ..Self::new(kind)
        }
    }

    fn invalid(kind: ParameterKind, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(kind)
        }
    }
}

/// Top-level declaration calls collected during evaluation.
#[derive(Default)]
struct CompileSink {
    displays: Vec<(String, Option<String>)>,
    on_stop: Vec<(String, String)>,
    on_pause: Vec<(String, String)>,
    on_resume: Vec<(String, String)>,
    description: Option<String>,
}

fn register_declarations(engine: &mut Engine, sink: Arc<Mutex<CompileSink>>) {
    engine.register_type_with_name::<ParamDecl>("ParamDecl");

    engine.register_fn("param_int", || ParamDecl::new(ParameterKind::Integer));
    engine.register_fn("param_int", |default: i64| {
        ParamDecl::with_default(ParameterKind::Integer, ParameterValue::Integer(default))
    });
    engine.register_fn("param_int", |default: i64, min: i64, max: i64| {
        let mut decl =
            ParamDecl::with_default(ParameterKind::Integer, ParameterValue::Integer(default));
        decl.minimum = Some(min as f64);
        decl.maximum = Some(max as f64);
        if min > max {
            decl.error = Some(format!("empty range {}..{}", min, max));
        }
        decl
    });

    engine.register_fn("param_real", || ParamDecl::new(ParameterKind::Real));
    engine.register_fn("param_real", |default: f64| {
        ParamDecl::with_default(ParameterKind::Real, ParameterValue::Real(default))
    });
    engine.register_fn("param_real", |default: f64, min: f64, max: f64| {
        let mut decl = ParamDecl::with_default(ParameterKind::Real, ParameterValue::Real(default));
        decl.minimum = Some(min);
        decl.maximum = Some(max);
        if min > max {
            decl.error = Some(format!("empty range {}..{}", min, max));
        }
        decl
    });

    engine.register_fn("param_text", || ParamDecl::new(ParameterKind::Text));
    engine.register_fn("param_text", |default: &str| {
        ParamDecl::with_default(ParameterKind::Text, ParameterValue::Text(default.to_string()))
    });

    engine.register_fn("param_bool", || ParamDecl::new(ParameterKind::Boolean));
    engine.register_fn("param_bool", |default: bool| {
        ParamDecl::with_default(ParameterKind::Boolean, ParameterValue::Boolean(default))
    });

    engine.register_fn("param_options", |options: rhai::Array| {
        options_decl(options, None)
    });
    engine.register_fn("param_options", |options: rhai::Array, default: &str| {
        options_decl(options, Some(default.to_string()))
    });

    engine.register_fn("param_valve", || ParamDecl::new(ParameterKind::Valve));
    engine.register_fn("param_program", || ParamDecl::new(ParameterKind::ProgramRef));

    engine.register_fn("param_list", |tag: &str| match ParameterKind::from_tag(tag) {
        Some(element) => ParamDecl::new(ParameterKind::ListOf(Box::new(element))),
        None => ParamDecl::invalid(
            ParameterKind::ListOf(Box::new(ParameterKind::Text)),
            format!("unknown list element kind '{}'", tag),
        ),
    });

    engine.register_fn("named", |decl: &mut ParamDecl, label: &str| {
        let mut named = decl.clone();
        named.display_name = label.to_string();
        named
    });

    let displays = Arc::clone(&sink);
    engine.register_fn("display", move |symbol: &str| {
        let mut sink = lock(&displays);
        sink.displays.push((symbol.to_string(), None));
    });
    let displays = Arc::clone(&sink);
    engine.register_fn("display", move |symbol: &str, label: &str| {
        let mut sink = lock(&displays);
        sink.displays
            .push((symbol.to_string(), Some(label.to_string())));
    });

    let stops = Arc::clone(&sink);
    engine.register_fn("on_stop", move |symbol: &str, callback: &str| {
        let mut sink = lock(&stops);
        sink.on_stop.push((symbol.to_string(), callback.to_string()));
    });
    let pauses = Arc::clone(&sink);
    engine.register_fn("on_pause", move |symbol: &str, callback: &str| {
        let mut sink = lock(&pauses);
        sink.on_pause.push((symbol.to_string(), callback.to_string()));
    });
    let resumes = Arc::clone(&sink);
    engine.register_fn("on_resume", move |symbol: &str, callback: &str| {
        let mut sink = lock(&resumes);
        sink.on_resume
            .push((symbol.to_string(), callback.to_string()));
    });

    let descriptions = Arc::clone(&sink);
    engine.register_fn("description", move |text: &str| {
        let mut sink = lock(&descriptions);
        sink.description = Some(text.to_string());
    });
}

fn lock(sink: &Arc<Mutex<CompileSink>>) -> std::sync::MutexGuard<'_, CompileSink> {
    match sink.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn options_decl(options: rhai::Array, default: Option<String>) -> ParamDecl {
    let mut names = Vec::with_capacity(options.len());
    for entry in options {
        match entry.into_string() {
            Ok(name) => names.push(name),
            Err(other) => {
                return ParamDecl::invalid(
                    ParameterKind::Options(names),
                    format!("options must be strings, found {}", other),
                )
            }
        }
    }
    if names.is_empty() {
        return ParamDecl::invalid(ParameterKind::Options(names), "options list is empty");
    }
    let kind = ParameterKind::Options(names.clone());
    match default {
        Some(choice) if !names.contains(&choice) => {
            ParamDecl::invalid(kind, format!("default '{}' is not an option", choice))
        }
        Some(choice) => ParamDecl::with_default(kind, ParameterValue::Choice(choice)),
        None => ParamDecl::new(kind),
    }
}

/// Compile one script source.
///
/// The thread-local runtime handle must be initialized first (see
/// [`crate::api::init_api`]) because the script's top level may call
/// runtime API functions.
pub fn compile(source: &str) -> CompiledProgram {
    let fingerprint = fingerprint(source);
    let sink = Arc::new(Mutex::new(CompileSink::default()));
    let mut engine = api::create_engine();
    register_declarations(&mut engine, Arc::clone(&sink));

    let mut compiled = CompiledProgram {
        parameters: Vec::new(),
        functions: Vec::new(),
        messages: Vec::new(),
        description: String::new(),
        fingerprint,
        ast: None,
    };

    let ast = match engine.compile(source) {
        Ok(ast) => ast,
        Err(err) => {
            compiled
                .messages
                .push(Message::compile_error(format!("Parse error: {}", err)));
            return compiled;
        }
    };

    // Run the top level once to collect declarations. A runtime error
    // here is a diagnostic; declarations made before the error are
    // still harvested.
    let mut scope = Scope::new();
    if let Err(err) = engine.run_ast_with_scope(&mut scope, &ast) {
        compiled
            .messages
            .push(Message::compile_error(format!("Script error: {}", err)));
    }

    for (symbol, _constant, value) in scope.iter() {
        let Some(decl) = value.try_cast::<ParamDecl>() else {
            continue;
        };
        if let Some(error) = &decl.error {
            compiled.messages.push(Message::compile_error(format!(
                "Parameter '{}': {}",
                symbol, error
            )));
        }
        let display_name = if decl.display_name.is_empty() {
            symbol.to_string()
        } else {
            decl.display_name.clone()
        };
        compiled.parameters.push(ParameterDeclaration {
            symbol: symbol.to_string(),
            display_name,
            kind: decl.kind,
            default: decl.default,
            minimum: decl.minimum,
            maximum: decl.maximum,
            valid: decl.error.is_none(),
        });
    }

    for function in ast.iter_functions() {
        // Exactly one parameter marks an asynchronous function, its
        // checkpoint argument. More than one marks a plain helper.
        let is_async = match function.params.len() {
            0 => false,
            1 => true,
            _ => continue,
        };
        compiled.functions.push(FunctionDescriptor {
            symbol: function.name.to_string(),
            display_name: None,
            is_async,
            on_stop: None,
            on_pause: None,
            on_resume: None,
        });
    }

    let sink = lock(&sink);
    for (symbol, label) in &sink.displays {
        match compiled.functions.iter_mut().find(|f| f.symbol == *symbol) {
            Some(function) => {
                function.display_name =
                    Some(label.clone().unwrap_or_else(|| symbol.clone()));
            }
            None => compiled.messages.push(Message::compile_error(format!(
                "display() names unknown function '{}'",
                symbol
            ))),
        }
    }

    let callbacks = [
        ("on_stop", &sink.on_stop),
        ("on_pause", &sink.on_pause),
        ("on_resume", &sink.on_resume),
    ];
    for (which, entries) in callbacks {
        for (symbol, callback) in entries.iter() {
            if compiled.function(callback).is_none() {
                compiled.messages.push(Message::compile_error(format!(
                    "{}() names unknown callback '{}'",
                    which, callback
                )));
                continue;
            }
            match compiled.functions.iter_mut().find(|f| f.symbol == *symbol) {
                Some(function) => match which {
                    "on_stop" => function.on_stop = Some(callback.clone()),
                    "on_pause" => function.on_pause = Some(callback.clone()),
                    _ => function.on_resume = Some(callback.clone()),
                },
                None => compiled.messages.push(Message::compile_error(format!(
                    "{}() names unknown function '{}'",
                    which, symbol
                ))),
            }
        }
    }

    let mut seen = std::collections::HashMap::new();
    for function in compiled.functions.iter().filter(|f| f.is_visible()) {
        if let Some(previous) =
            seen.insert(function.label().to_string(), function.symbol.clone())
        {
            compiled.messages.push(Message::compile_error(format!(
                "Functions '{}' and '{}' share the display name '{}'",
                previous,
                function.symbol,
                function.label()
            )));
        }
    }

    compiled.description = sink.description.clone().unwrap_or_default();
    compiled.ast = Some(ast);
    compiled
}

/// Reconcile a program's stored values with a compile result.
///
/// Missing or type-incompatible values are replaced with the declared
/// default; compatible values and explicit visibility choices are kept.
pub fn backfill(compiled: &CompiledProgram, program: &mut Program) {
    for decl in &compiled.parameters {
        let compatible = program
            .parameter_values
            .get(&decl.symbol)
            .is_some_and(|value| decl.kind.accepts(value));
        if !compatible {
            program
                .parameter_values
                .insert(decl.symbol.clone(), decl.default.clone());
        }
        program
            .parameter_visibility
            .entry(decl.symbol.clone())
            .or_insert(true);
    }
    program.description = compiled.description.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    #[test]
    fn test_declarations_in_scope_order() {
        let compiled = compile(
            r#"
            let wait_time = param_real(10.0, 0.0, 600.0);
            let valve = param_valve();
            let cycles = param_int(3);
            "#,
        );
        assert!(!compiled.has_errors());
        let symbols: Vec<_> = compiled.parameters.iter().map(|p| &p.symbol).collect();
        assert_eq!(symbols, ["wait_time", "valve", "cycles"]);
        assert_eq!(compiled.parameters[0].minimum, Some(0.0));
        assert_eq!(compiled.parameters[0].maximum, Some(600.0));
        assert_eq!(
            compiled.parameters[2].default,
            ParameterValue::Integer(3)
        );
    }

    #[test]
    fn test_named_overrides_display_name() {
        let compiled = compile(r#"let wt = param_real(5.0).named("Wait time");"#);
        assert_eq!(compiled.parameters[0].display_name, "Wait time");

        let compiled = compile("let wait_time = param_real(5.0);");
        assert_eq!(compiled.parameters[0].display_name, "wait_time");
    }

    #[test]
    fn test_invalid_declarations_stay_listed() {
        let compiled = compile(
            r#"
            let mode = param_options([]);
            let steps = param_list("matrix");
            "#,
        );
        assert!(compiled.has_errors());
        assert_eq!(compiled.parameters.len(), 2);
        assert!(!compiled.parameters[0].valid);
        assert!(!compiled.parameters[1].valid);
        assert_eq!(compiled.messages.len(), 2);
    }

    #[test]
    fn test_options_default_must_be_an_option() {
        let compiled = compile(r#"let mode = param_options(["fast", "slow"], "medium");"#);
        assert!(compiled.has_errors());
        assert!(!compiled.parameters[0].valid);

        let compiled = compile(r#"let mode = param_options(["fast", "slow"], "slow");"#);
        assert!(!compiled.has_errors());
        assert_eq!(
            compiled.parameters[0].default,
            ParameterValue::Choice("slow".into())
        );
    }

    #[test]
    fn test_async_classification_by_arity() {
        let compiled = compile(
            r#"
            fn prime() {}
            fn run(step) { done() }
            fn helper(a, b) { a + b }
            "#,
        );
        assert_eq!(compiled.functions.len(), 2);
        assert!(!compiled.function("prime").unwrap().is_async);
        assert!(compiled.function("run").unwrap().is_async);
        assert!(compiled.function("helper").is_none());
    }

    #[test]
    fn test_display_and_callbacks() {
        let compiled = compile(
            r#"
            fn run(step) { done() }
            fn cleanup() {}
            display("run", "Run assay");
            on_stop("run", "cleanup");
            "#,
        );
        assert!(!compiled.has_errors());
        let run = compiled.function("run").unwrap();
        assert_eq!(run.display_name.as_deref(), Some("Run assay"));
        assert_eq!(run.on_stop.as_deref(), Some("cleanup"));
        assert!(run.on_pause.is_none());
        // cleanup itself stays hidden
        assert!(!compiled.function("cleanup").unwrap().is_visible());
        assert_eq!(compiled.visible_functions().count(), 1);
    }

    #[test]
    fn test_display_name_collision_is_an_error() {
        let compiled = compile(
            r#"
            fn first() {}
            fn second() {}
            display("first", "Go");
            display("second", "Go");
            "#,
        );
        assert!(compiled.has_errors());
    }

    #[test]
    fn test_unknown_symbols_are_errors() {
        let compiled = compile(
            r#"
            fn run(step) { done() }
            display("missing");
            on_stop("run", "nowhere");
            "#,
        );
        assert_eq!(
            compiled
                .messages
                .iter()
                .filter(|m| m.kind == MessageKind::CompileError)
                .count(),
            2
        );
    }

    #[test]
    fn test_parse_error_is_a_message() {
        let compiled = compile("let x = ;");
        assert!(compiled.has_errors());
        assert!(compiled.ast.is_none());
        assert!(compiled.messages[0].text.contains("Parse error"));
    }

    #[test]
    fn test_description() {
        let compiled = compile(r#"description("Primes the chip inputs.");"#);
        assert_eq!(compiled.description, "Primes the chip inputs.");
    }

    #[test]
    fn test_backfill_replaces_incompatible_values() {
        let compiled = compile(
            r#"
            let wait_time = param_real(10.0);
            let cycles = param_int(3);
            "#,
        );
        let mut program = Program::new(1, Script::builtin("t", ""), "P");
        program
            .parameter_values
            .insert("wait_time".into(), ParameterValue::Real(42.0));
        program
            .parameter_values
            .insert("cycles".into(), ParameterValue::Text("three".into()));
        program.parameter_visibility.insert("cycles".into(), false);

        backfill(&compiled, &mut program);

        // Compatible value kept, incompatible one reset to the default.
        assert_eq!(
            program.parameter_values["wait_time"],
            ParameterValue::Real(42.0)
        );
        assert_eq!(program.parameter_values["cycles"], ParameterValue::Integer(3));
        // Explicit visibility survives; missing visibility defaults on.
        assert_eq!(program.parameter_visibility["cycles"], false);
        assert_eq!(program.parameter_visibility["wait_time"], true);
    }
}
