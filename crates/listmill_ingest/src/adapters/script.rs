//! Script adapter: runs a user-supplied extractor inside an embedded Lua
//! interpreter.
//!
//! The sandbox loads only the table/string/math libraries and exposes
//! exactly three helpers: `http_get(url)` bound to the service's proxy/TLS
//! policy, `json_decode`/`json_encode`, and a `print` that captures lines
//! for the run log. The script must define a nullary `main` returning a
//! sequence of records.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use mlua::{Lua, LuaOptions, LuaSerdeExt, StdLib, Value as LuaValue, Variadic};

use crate::config::NetPolicy;
use crate::error::{ImportError, Result};
use crate::log::RunLog;

/// HTTP timeout used by the sandbox's `http_get` helper.
const SCRIPT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_script(
    policy: &NetPolicy,
    code: &str,
    timeout: Duration,
    log: &mut RunLog,
) -> Result<serde_json::Value> {
    log.info("Executing extraction script in the Lua sandbox");

    let policy = policy.clone();
    let code = code.to_string();
    let task = tokio::task::spawn_blocking(move || execute(&policy, &code));

    let (result, printed) = match tokio::time::timeout(timeout, task).await {
        Ok(joined) => joined.map_err(|e| ImportError::Script(format!("sandbox panicked: {e}")))?,
        Err(_) => {
            return Err(ImportError::Script(format!(
                "script exceeded its wall-clock budget of {}s",
                timeout.as_secs()
            )))
        }
    };

    for line in printed {
        log.info(format!("SCRIPT OUTPUT: {line}"));
    }

    let records = result?;
    match &records {
        serde_json::Value::Array(items) => {
            log.info(format!("Script returned {} entries", items.len()));
            Ok(records)
        }
        other => Err(ImportError::Script(format!(
            "main() must return a sequence of records, got {}",
            json_type_name(other)
        ))),
    }
}

type ScriptResult = (std::result::Result<serde_json::Value, ImportError>, Vec<String>);

fn execute(policy: &NetPolicy, code: &str) -> ScriptResult {
    let printed = Rc::new(RefCell::new(Vec::new()));
    let result = execute_inner(policy, code, Rc::clone(&printed));
    let printed = Rc::try_unwrap(printed)
        .map(RefCell::into_inner)
        .unwrap_or_default();
    (result, printed)
}

fn execute_inner(
    policy: &NetPolicy,
    code: &str,
    printed: Rc<RefCell<Vec<String>>>,
) -> std::result::Result<serde_json::Value, ImportError> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )
    .map_err(|e| ImportError::Script(format!("sandbox init failed: {e}")))?;

    install_helpers(&lua, policy, printed).map_err(script_error)?;

    lua.load(code).exec().map_err(script_error)?;

    let main: mlua::Function = lua
        .globals()
        .get("main")
        .map_err(|_| ImportError::Script("script must define a main() function".into()))?;
    let value: LuaValue = main.call(()).map_err(script_error)?;
    lua.from_value(value)
        .map_err(|e| ImportError::Script(format!("main() returned an unconvertible value: {e}")))
}

fn install_helpers(
    lua: &Lua,
    policy: &NetPolicy,
    printed: Rc<RefCell<Vec<String>>>,
) -> mlua::Result<()> {
    let globals = lua.globals();

    let print = lua.create_function(move |lua, args: Variadic<LuaValue>| {
        let mut parts = Vec::with_capacity(args.len());
        for value in args.iter() {
            let text = match lua.coerce_string(value.clone())? {
                Some(s) => s.to_str()?.to_string(),
                None => format!("{value:?}"),
            };
            parts.push(text);
        }
        printed.borrow_mut().push(parts.join(" "));
        Ok(())
    })?;
    globals.set("print", print)?;

    let policy = policy.clone();
    let http_get = lua.create_function(move |_, url: String| {
        let client = policy
            .build_blocking_client(SCRIPT_HTTP_TIMEOUT)
            .map_err(|e| mlua::Error::external(e.to_string()))?;
        let response = client
            .get(&url)
            .send()
            .map_err(|e| mlua::Error::external(format!("http_get {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(mlua::Error::external(format!(
                "http_get {url} returned status {status}"
            )));
        }
        response
            .text()
            .map_err(|e| mlua::Error::external(format!("http_get {url}: {e}")))
    })?;
    globals.set("http_get", http_get)?;

    let json_decode = lua.create_function(|lua, raw: String| {
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| mlua::Error::external(format!("json_decode: {e}")))?;
        lua.to_value(&value)
    })?;
    globals.set("json_decode", json_decode)?;

    let json_encode = lua.create_function(|lua, value: LuaValue| {
        let value: serde_json::Value = lua.from_value(value)?;
        serde_json::to_string(&value).map_err(|e| mlua::Error::external(format!("json_encode: {e}")))
    })?;
    globals.set("json_encode", json_encode)?;

    Ok(())
}

fn script_error(error: mlua::Error) -> ImportError {
    ImportError::Script(error.to_string())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_returns_records_and_captures_print() {
        let mut log = RunLog::new();
        let code = r#"
            function main()
                print("fetching", 2, "pages")
                return {
                    { name = "alpha", value = 1 },
                    { name = "beta", value = 2 },
                }
            end
        "#;
        let records = run_script(&NetPolicy::default(), code, Duration::from_secs(5), &mut log)
            .await
            .unwrap();
        let items = records.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("SCRIPT OUTPUT: fetching 2 pages")));
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let mut log = RunLog::new();
        let code = r#"
            function main()
                local parsed = json_decode('[{"k":"v"}]')
                assert(json_encode(parsed) == '[{"k":"v"}]')
                return parsed
            end
        "#;
        let records = run_script(&NetPolicy::default(), code, Duration::from_secs(5), &mut log)
            .await
            .unwrap();
        assert_eq!(records[0]["k"], "v");
    }

    #[tokio::test]
    async fn missing_main_is_a_script_error() {
        let mut log = RunLog::new();
        let err = run_script(
            &NetPolicy::default(),
            "x = 1",
            Duration::from_secs(5),
            &mut log,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::Script(_)));
    }

    #[tokio::test]
    async fn non_sequence_result_is_rejected() {
        let mut log = RunLog::new();
        let err = run_script(
            &NetPolicy::default(),
            "function main() return 42 end",
            Duration::from_secs(5),
            &mut log,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::Script(_)));
    }

    #[tokio::test]
    async fn sandbox_has_no_os_or_io_access() {
        let mut log = RunLog::new();
        let code = r#"
            function main()
                if os ~= nil or io ~= nil then
                    error("sandbox leak")
                end
                return { { ok = "yes" } }
            end
        "#;
        let records = run_script(&NetPolicy::default(), code, Duration::from_secs(5), &mut log)
            .await
            .unwrap();
        assert_eq!(records.as_array().unwrap().len(), 1);
    }
}
