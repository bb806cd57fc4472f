//! Parameter access and logging for scripts.
//!
//! Script functions cannot see the script's top-level variables, so
//! parameter values flow through `param("symbol")`, which resolves
//! against the stored values of the program that owns the running code.

use rhai::{Dynamic, Engine, EvalAltResult};

use super::valve::{ProgramHandle, ValveHandle};
use super::{context, require_handle};
use crate::compile::Message;
use crate::params::ParameterValue;
use crate::runtime::RuntimeHandle;
use crate::script::ProgramId;

fn current_program() -> Result<ProgramId, Box<EvalAltResult>> {
    context::current_program().ok_or_else(|| "No program context for this call".into())
}

/// Lower a stored value into a script value.
///
/// Valve and program references come back as live handles; unassigned
/// references come back as `()` so scripts can test for them.
fn value_to_dynamic(
    handle: &RuntimeHandle,
    value: &ParameterValue,
) -> Result<Dynamic, Box<EvalAltResult>> {
    Ok(match value {
        ParameterValue::Integer(i) => Dynamic::from(*i),
        ParameterValue::Real(r) => Dynamic::from(*r),
        ParameterValue::Text(s) | ParameterValue::Choice(s) => Dynamic::from(s.clone()),
        ParameterValue::Boolean(b) => Dynamic::from(*b),
        ParameterValue::Valve(None) | ParameterValue::ProgramRef(None) => Dynamic::UNIT,
        ParameterValue::Valve(Some(name)) => {
            let valve = handle
                .state()
                .with_state_read(|state| state.chip.find_valve(name).cloned());
            match valve {
                Some(valve) => Dynamic::from(ValveHandle {
                    name: valve.name,
                    solenoid_number: valve.solenoid_number,
                }),
                None => {
                    return Err(
                        format!("Parameter references unknown valve '{}'", name).into()
                    )
                }
            }
        }
        ParameterValue::ProgramRef(Some(name)) => Dynamic::from(ProgramHandle {
            name: name.clone(),
        }),
        ParameterValue::List(items) => {
            let mut array = rhai::Array::with_capacity(items.len());
            for item in items {
                array.push(value_to_dynamic(handle, item)?);
            }
            Dynamic::from(array)
        }
    })
}

fn param(symbol: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    let program = current_program()?;
    let handle = require_handle();
    let value = handle.state().with_state_read(|state| {
        state
            .chip
            .program(program)
            .and_then(|p| p.parameter_values.get(symbol).cloned())
    });
    match value {
        Some(value) => value_to_dynamic(&handle, &value),
        None => Err(format!("No parameter '{}' on this program", symbol).into()),
    }
}

fn set_param(symbol: &str, value: Dynamic) -> Result<(), Box<EvalAltResult>> {
    let program = current_program()?;
    let handle = require_handle();
    let kind = handle.state().with_state_read(|state| {
        state
            .compiled
            .get(&program)
            .and_then(|c| c.parameters.iter().find(|d| d.symbol == symbol))
            .map(|d| d.kind.clone())
    });
    let Some(kind) = kind else {
        return Err(format!("No parameter '{}' on this program", symbol).into());
    };
    let Some(converted) = ParameterValue::from_dynamic(&kind, &value) else {
        return Err(format!(
            "Value {} does not fit parameter '{}' ({})",
            value,
            symbol,
            kind.label()
        )
        .into());
    };
    handle.state().with_state_write(|state| {
        if let Some(p) = state.chip.program_mut(program) {
            p.parameter_values.insert(symbol.to_string(), converted);
        }
        state.bump_version();
    });
    Ok(())
}

fn log_line(text: &str) {
    log::info!("[script] {}", text);
    if let (Some(program), Some(handle)) = (context::current_program(), super::get_handle()) {
        handle.state().with_state_write(|state| {
            state.push_message(program, Message::info(text));
        });
    }
}

pub fn register(engine: &mut Engine) {
    engine.register_fn("param", |symbol: &str| param(symbol));
    engine.register_fn("set_param", |symbol: &str, value: Dynamic| {
        set_param(symbol, value)
    });
    engine.register_fn("log", |text: &str| log_line(text));
}
