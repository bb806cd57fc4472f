//! Valve and program references for scripts.

use rhai::{Engine, EvalAltResult};

use super::require_handle;

/// A named valve resolved against the chip.
///
/// Carries the solenoid number so state changes go straight to the rig
/// without another chip lookup.
#[derive(Clone, Debug)]
pub struct ValveHandle {
    pub name: String,
    pub solenoid_number: u32,
}

/// A reference to another program, by name.
#[derive(Clone, Debug)]
pub struct ProgramHandle {
    pub name: String,
}

fn set_solenoid(number: u32, open: bool) {
    require_handle()
        .rig()
        .with_rig(|rig| rig.set_solenoid_state(number, open));
}

fn solenoid_state(number: u32) -> bool {
    require_handle()
        .rig()
        .with_rig(|rig| rig.get_solenoid_state(number))
}

/// Resolve a valve by name, or fail the script with a useful message.
pub fn find_valve(name: &str) -> Result<ValveHandle, Box<EvalAltResult>> {
    let found = require_handle()
        .state()
        .with_state_read(|state| state.chip.find_valve(name).cloned());
    match found {
        Some(valve) => Ok(ValveHandle {
            name: valve.name,
            solenoid_number: valve.solenoid_number,
        }),
        None => Err(format!("No valve named '{}' on this chip", name).into()),
    }
}

pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<ValveHandle>("Valve");
    engine.register_type_with_name::<ProgramHandle>("Program");

    engine.register_fn("find_valve", |name: &str| find_valve(name));

    engine.register_fn("open", |valve: &mut ValveHandle| {
        set_solenoid(valve.solenoid_number, true);
    });
    engine.register_fn("close", |valve: &mut ValveHandle| {
        set_solenoid(valve.solenoid_number, false);
    });
    engine.register_fn("set_open", |valve: &mut ValveHandle, open: bool| {
        set_solenoid(valve.solenoid_number, open);
    });
    engine.register_fn("is_open", |valve: &mut ValveHandle| {
        solenoid_state(valve.solenoid_number)
    });
    engine.register_fn("name", |valve: &mut ValveHandle| valve.name.clone());
    engine.register_fn("solenoid_number", |valve: &mut ValveHandle| {
        valve.solenoid_number as i64
    });

    // Raw access by solenoid number, for valves not named on the chip.
    engine.register_fn("set_valve", |number: i64, open: bool| {
        set_solenoid(number as u32, open);
    });
    engine.register_fn("is_valve_open", |number: i64| solenoid_state(number as u32));

    engine.register_fn("valve_names", || -> rhai::Array {
        require_handle().state().with_state_read(|state| {
            state
                .chip
                .valves
                .iter()
                .map(|v| v.name.clone().into())
                .collect()
        })
    });

    engine.register_fn(
        "find_program",
        |name: &str| -> Result<ProgramHandle, Box<EvalAltResult>> {
            let exists = require_handle()
                .state()
                .with_state_read(|state| state.chip.find_program_by_name(name).is_some());
            if exists {
                Ok(ProgramHandle {
                    name: name.to_string(),
                })
            } else {
                Err(format!("No program named '{}'", name).into())
            }
        },
    );
    engine.register_fn("name", |program: &mut ProgramHandle| program.name.clone());
}
