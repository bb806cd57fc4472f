//! Chip project model: scripts, valves and programs.
//!
//! A [`Chip`] is the explicitly-owned project container. It holds the
//! named valves of the chip layout, the scripts known to the project
//! (built-in or file-backed) and the programs the user has created by
//! attaching a script to the rig. Persistence of this model is an
//! external collaborator's concern.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::builtins::builtin_scripts;
use crate::params::ParameterValue;

/// Where a script's source lives.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptSource {
    /// Baked into the process at build time.
    BuiltIn { name: String, source: String },
    /// Re-read from disk on every compile.
    File { path: PathBuf },
}

/// An immutable source of control logic.
#[derive(Clone, Debug, PartialEq)]
pub struct Script {
    pub source: ScriptSource,
}

impl Script {
    pub fn builtin(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            source: ScriptSource::BuiltIn {
                name: name.into(),
                source: source.into(),
            },
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ScriptSource::File { path: path.into() },
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.source, ScriptSource::BuiltIn { .. })
    }

    /// Display name: the built-in name, or the file stem.
    pub fn name(&self) -> String {
        match &self.source {
            ScriptSource::BuiltIn { name, .. } => name.clone(),
            ScriptSource::File { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        }
    }

    /// Read the current script content.
    ///
    /// File-backed scripts are re-read on demand so that edits are
    /// picked up by the next compile.
    pub fn read(&self) -> std::io::Result<String> {
        match &self.source {
            ScriptSource::BuiltIn { source, .. } => Ok(source.clone()),
            ScriptSource::File { path } => std::fs::read_to_string(path),
        }
    }
}

/// Content fingerprint used to memoize compilation.
pub fn fingerprint(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// One named valve on the chip, mapped to a rig solenoid index.
#[derive(Clone, Debug, PartialEq)]
pub struct Valve {
    pub name: String,
    pub solenoid_number: u32,
}

/// Identifier of a program within its chip.
pub type ProgramId = u64;

/// A user-configured binding of a script to a set of parameter values.
#[derive(Clone, Debug)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub script: Script,
    /// Stored values, keyed by parameter symbol. Sparse until the
    /// compiler backfills missing symbols with defaults.
    pub parameter_values: HashMap<String, ParameterValue>,
    /// Per-parameter visibility in the default UI listing.
    pub parameter_visibility: HashMap<String, bool>,
    /// Free-text description set by the script.
    pub description: String,
}

impl Program {
    pub fn new(id: ProgramId, script: Script, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            script,
            parameter_values: HashMap::new(),
            parameter_visibility: HashMap::new(),
            description: String::new(),
        }
    }
}

/// The chip project: valves, scripts and programs.
#[derive(Clone, Debug)]
pub struct Chip {
    pub valves: Vec<Valve>,
    pub scripts: Vec<Script>,
    pub programs: Vec<Program>,
    next_program_id: ProgramId,
}

impl Default for Chip {
    fn default() -> Self {
        Self::new()
    }
}

impl Chip {
    /// Create an empty chip seeded with the built-in scripts.
    pub fn new() -> Self {
        Self {
            valves: Vec::new(),
            scripts: builtin_scripts(),
            programs: Vec::new(),
            next_program_id: 1,
        }
    }

    pub fn add_valve(&mut self, name: impl Into<String>, solenoid_number: u32) {
        self.valves.push(Valve {
            name: name.into(),
            solenoid_number,
        });
    }

    pub fn find_valve(&self, name: &str) -> Option<&Valve> {
        self.valves.iter().find(|v| v.name == name)
    }

    /// Attach a script to the rig as a new program.
    pub fn add_program(&mut self, script: Script, name: impl Into<String>) -> ProgramId {
        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.push(Program::new(id, script, name));
        id
    }

    pub fn remove_program(&mut self, id: ProgramId) {
        self.programs.retain(|p| p.id != id);
    }

    /// Clone a program's script binding, values and visibility.
    pub fn duplicate_program(&mut self, id: ProgramId) -> Option<ProgramId> {
        let original = self.program(id)?.clone();
        let new_id = self.next_program_id;
        self.next_program_id += 1;
        let mut copy = original;
        copy.id = new_id;
        self.programs.push(copy);
        Some(new_id)
    }

    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        self.programs.iter().find(|p| p.id == id)
    }

    pub fn program_mut(&mut self, id: ProgramId) -> Option<&mut Program> {
        self.programs.iter_mut().find(|p| p.id == id)
    }

    pub fn find_program_by_name(&self, name: &str) -> Option<&Program> {
        self.programs.iter().find(|p| p.name == name)
    }
}
