//! Scripts baked into the binary.
//!
//! Every new chip starts with these in its script registry, so a fresh
//! project can drive hardware before the user writes a line of code.

use crate::script::Script;

pub fn builtin_scripts() -> Vec<Script> {
    vec![
        Script::builtin(
            "Reagent toggle",
            include_str!("builtins/reagent_toggle.rhai"),
        ),
        Script::builtin("Chip priming", include_str!("builtins/chip_prep.rhai")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;

    #[test]
    fn test_builtins_compile_cleanly() {
        for script in builtin_scripts() {
            let source = script.read().unwrap();
            let compiled = compile(&source);
            assert!(
                !compiled.has_errors(),
                "'{}' has errors: {:?}",
                script.name(),
                compiled.messages
            );
            assert!(compiled.visible_functions().count() > 0);
            assert!(!compiled.description.is_empty());
            assert!(!compiled.parameters.is_empty());
        }
    }

    #[test]
    fn test_toggle_has_stop_callback() {
        let source = builtin_scripts()[0].read().unwrap();
        let compiled = compile(&source);
        let toggle = compiled.function("toggle").unwrap();
        assert!(toggle.is_async);
        assert_eq!(toggle.on_stop.as_deref(), Some("close_both"));
    }
}
