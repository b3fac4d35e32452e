//! Lua sandbox creation
//!
//! This module provides a restricted Lua sandbox that prevents access to
//! dangerous operations like filesystem I/O, network access, and process execution.
//!
//! The `pipeline` helper module is always injected as it's needed for writing
//! definitions. Definitions are data: stage steps are shell command strings that
//! the job runner executes, never Lua functions.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math)
/// and does NOT include any I/O capabilities or the ability to load external code.
///
/// # Security
/// This sandbox prevents:
/// - Network access
/// - File system access
/// - Process execution
/// - Loading external modules via require()
///
/// # Example
/// ```no_run
/// use keel_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let definition: mlua::Table = lua
///     .load(r#"return pipeline.define { name = "todo", stages = {} }"#)
///     .eval()?;
/// let name: String = definition.get("name")?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG, COROUTINE
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;

    // Remove dangerous globals
    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// Register the pipeline helper module
///
/// `define` and `stage` return their table unchanged; `step` and `axis`
/// build the tables the parser expects from positional arguments.
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    // pipeline.define(definition)
    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    pipeline.set("define", define_fn)?;

    // pipeline.stage(config)
    let stage_fn = lua.create_function(|_, config: Table| Ok(config))?;
    pipeline.set("stage", stage_fn)?;

    // pipeline.step(name, run)
    let step_fn = lua.create_function(|lua, (name, run): (String, String)| {
        let step = lua.create_table()?;
        step.set("name", name)?;
        step.set("run", run)?;
        Ok(step)
    })?;
    pipeline.set("step", step_fn)?;

    // pipeline.axis(name, values)
    let axis_fn = lua.create_function(|lua, (name, values): (String, Table)| {
        let axis = lua.create_table()?;
        axis.set("name", name)?;
        axis.set("values", values)?;
        Ok(axis)
    })?;
    pipeline.set("axis", axis_fn)?;

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua.load(r#"return string.upper("hello")"#).eval().unwrap();
        assert_eq!(result, "HELLO");
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_require() {
        let lua = create_sandbox().unwrap();

        let result: LuaResult<()> = lua.load(r#"require("os")"#).exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_pipeline_helpers() {
        let lua = create_sandbox().unwrap();

        let name: String = lua
            .load(r#"return pipeline.define({ name = "todo" }).name"#)
            .eval()
            .unwrap();
        assert_eq!(name, "todo");

        let run: String = lua
            .load(r#"return pipeline.step("lint", "flake8 .").run"#)
            .eval()
            .unwrap();
        assert_eq!(run, "flake8 .");

        let second: String = lua
            .load(r#"return pipeline.axis("os", {"A", "B"}).values[2]"#)
            .eval()
            .unwrap();
        assert_eq!(second, "B");
    }
}
